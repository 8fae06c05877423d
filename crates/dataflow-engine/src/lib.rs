//! Dataflow Engine - typed dataflow graph execution
//!
//! This crate executes graphs of pluggable nodes wired together by typed
//! ports. It supports:
//!
//! - Readiness-driven scheduling with every ready node running concurrently
//! - Exclusion-based control flow (if, coalesce, race) instead of branching
//! - Sub-graphs and loop controllers with per-iteration ProcessIds
//! - Cooperative abort with a grace period for in-flight nodes
//! - A timestamped event log that can be recorded and replayed
//!
//! # Architecture
//!
//! - `NodeBehavior`: the contract every node type implements
//! - `NodeRegistry`: node type to behavior lookup, with `inventory`-collected built-ins
//! - `GraphProcessor`: validates a graph and runs it
//! - `EventSink` / `ExecutionRecorder`: observation and replay
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dataflow_engine::{GraphProcessor, NodeRegistry, ProcessContext};
//!
//! let processor = GraphProcessor::new(Arc::new(project), None, Arc::new(NodeRegistry::with_builtins()))?;
//! let outputs = processor
//!     .process_graph(ProcessContext::new(), inputs, Default::default())
//!     .await?;
//! ```

pub mod behavior;
pub mod builder;
pub mod coerce;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod nodes;
pub mod processor;
pub mod recording;
pub mod registry;
pub mod services;
pub mod settings;
pub mod types;
pub mod validation;
pub mod value;

// Re-export key types
pub use behavior::{FlowRole, GraphInterfacePort, NodeBehavior, NodeOutput, PortContext, ProcessUpdate};
pub use builder::{GraphBuilder, ProjectBuilder};
pub use context::{external_function, ExternalFunction, NodeContext, ProcessContext};
pub use descriptor::{shared, BehaviorFn, NodeDescriptor, NodeMetadata};
pub use error::{EngineError, Result};
pub use events::{
    CallbackEventSink, ChannelEventSink, EventError, EventKind, EventSink, EventStream, FilteredSink,
    NullEventSink, ProcessorEvent, RecordedEvent, VecEventSink,
};
pub use processor::GraphProcessor;
pub use recording::{ExecutionRecorder, RecorderOptions, Recording};
pub use registry::{CallbackBehavior, NodeRegistry};
pub use services::{AudioProvider, DatasetProvider, HostServices, NativeApi};
pub use settings::ProcessorSettings;
pub use types::{
    Connection, GraphId, GraphInputs, GraphNode, GraphOutputs, Inputs, NodeCategory, NodeGraph, NodeId,
    Outputs, PortDefinition, PortId, ProcessId, Project,
};
pub use validation::{validate_graph, validate_project, ValidationError};
pub use value::{DataType, DataValue};

// Re-export inventory so catalog crates can submit behaviors without
// depending on it directly
pub use inventory;
