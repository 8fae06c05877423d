//! Dataflow Nodes
//!
//! Generic node behaviors for the dataflow engine. Each node is a small
//! building block; control flow, graph interface, globals and events ship
//! with the engine itself.
//!
//! # Categories
//!
//! - **Input**: constants and values read from the run (`text`, `number`, `boolean`, `context`)
//! - **Processing**: value transformation (`compare`, `join`)
//! - **Control**: timing (`delay`)
//! - **Host**: calls into host-registered functions (`externalCall`)
//!
//! Every behavior is submitted through `inventory`, so linking this crate is
//! enough for `NodeRegistry::with_builtins()` to see it.

pub mod control;
pub mod input;
pub mod processing;
pub mod system;

// Re-export all nodes for convenience
pub use control::*;
pub use input::*;
pub use processing::*;
pub use system::*;


#[cfg(test)]
mod tests {
    use dataflow_engine::NodeRegistry;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = NodeRegistry::with_builtins();

        // Engine intrinsics plus this crate's catalog
        assert_eq!(registry.all_metadata().len(), 22);

        // Spot-check known types
        assert!(registry.has_node_type("text"));
        assert!(registry.has_node_type("number"));
        assert!(registry.has_node_type("compare"));
        assert!(registry.has_node_type("delay"));
        assert!(registry.has_node_type("externalCall"));
        assert!(registry.has_node_type("join"));
        assert!(registry.has_node_type("loopController"));
    }
}
