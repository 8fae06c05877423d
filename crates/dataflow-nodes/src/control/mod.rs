//! Control nodes
//!
//! Timing nodes. Branching, loops and races are engine intrinsics.

mod delay;

pub use delay::{DelayConfig, DelayNode};
