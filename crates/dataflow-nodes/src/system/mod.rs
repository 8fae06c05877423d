//! Host nodes
//!
//! Nodes that call into the embedding host.

mod external_call;

pub use external_call::{ExternalCallConfig, ExternalCallNode};
