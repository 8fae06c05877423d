//! Node descriptor trait and metadata types
//!
//! Behaviors self-describe through `NodeDescriptor`, which keeps a node
//! type's identity next to its implementation. Built-in behaviors are
//! collected at link time through `inventory` so `NodeRegistry::with_builtins`
//! never needs a hand-maintained list.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::behavior::NodeBehavior;
use crate::types::NodeCategory;

/// Trait for behaviors that can describe their metadata
///
/// # Example
///
/// ```ignore
/// impl NodeDescriptor for PassthroughNode {
///     fn descriptor() -> NodeMetadata {
///         NodeMetadata::new("passthrough", NodeCategory::Control, "Passthrough")
///             .with_description("Forwards its inputs unchanged")
///     }
/// }
/// ```
pub trait NodeDescriptor {
    /// Get the static metadata for this node type
    fn descriptor() -> NodeMetadata
    where
        Self: Sized;
}

/// Catalog metadata for a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Unique type identifier (e.g., "loopController")
    pub node_type: String,
    /// Category for catalog grouping
    pub category: NodeCategory,
    /// Human-readable label, used as the default node title
    pub label: String,
    pub description: String,
}

impl NodeMetadata {
    pub fn new(node_type: impl Into<String>, category: NodeCategory, label: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            category,
            label: label.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Link-time registration of a built-in behavior
///
/// ```ignore
/// inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<TextNode>));
/// ```
pub struct BehaviorFn(pub fn() -> Arc<dyn NodeBehavior>);

inventory::collect!(BehaviorFn);

/// Construct a shared behavior from its default value
///
/// Exists so `BehaviorFn` can be built from a plain function path.
pub fn shared<T>() -> Arc<dyn NodeBehavior>
where
    T: NodeBehavior + Default + 'static,
{
    Arc::new(T::default())
}
