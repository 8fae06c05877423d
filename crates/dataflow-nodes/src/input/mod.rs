//! Input nodes
//!
//! Constants and values read from the run's context.

mod context_value;
mod number;
mod text;

pub use context_value::{ContextConfig, ContextNode};
pub use number::{BooleanConfig, BooleanNode, NumberConfig, NumberNode};
pub use text::{interpolate, template_inputs, TextConfig, TextNode};
