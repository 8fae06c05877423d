//! Processing nodes
//!
//! Nodes that transform values.

mod compare;
mod join;

pub use compare::{CompareConfig, CompareNode, Comparison};
pub use join::{join_values, JoinConfig, JoinNode};
