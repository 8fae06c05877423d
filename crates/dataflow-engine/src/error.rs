//! Error types for the dataflow engine

use thiserror::Error;

use crate::types::{GraphOutputs, ProcessId};

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while loading or running a graph
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node references a type that no behavior is registered for
    #[error("Unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// Two nodes share the same id within a graph
    #[error("Duplicate node id '{0}'")]
    DuplicateNodeId(String),

    /// A connection references a node that is not in the graph
    #[error("Connection {from} -> {to} references unknown node '{node_id}'")]
    DanglingConnection {
        from: String,
        to: String,
        node_id: String,
    },

    /// More than one connection feeds the same input port
    #[error("Input '{port_id}' on node '{node_id}' has more than one connection")]
    DuplicateInputConnection { node_id: String, port_id: String },

    /// The requested graph does not exist in the project
    #[error("Graph '{0}' not found in project")]
    GraphNotFound(String),

    /// A processor was asked to run while a run was already in flight
    #[error("Cannot process graph while already processing")]
    AlreadyRunning,

    /// A node's process function failed
    #[error("{message}")]
    NodeFailed {
        node_id: String,
        title: String,
        process_id: ProcessId,
        message: String,
    },

    /// Generic execution failure raised by node behaviors
    #[error("{0}")]
    ExecutionFailed(String),

    /// The run finished with errored nodes
    #[error("{0}")]
    GraphFailed(String),

    /// The run was aborted
    #[error("{}", .error.as_deref().unwrap_or("Graph aborted"))]
    Aborted {
        successful: bool,
        error: Option<String>,
        partial_outputs: GraphOutputs,
    },

    /// Processing was cancelled before the node could settle
    #[error("Processing aborted")]
    Cancelled,

    /// A node or external call exceeded its configured timeout
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// A value could not be coerced into the requested type
    #[error("Expected value of type {expected} but got {actual}")]
    Coercion { expected: String, actual: String },

    /// A host service required by a node was not provided
    #[error("Host service '{0}' is not available")]
    MissingService(String),

    /// No external function registered under the given name
    #[error("External function '{0}' is not registered")]
    UnknownExternalFunction(String),

    /// A recording could not be read
    #[error("Unsupported serialized events version {0}")]
    UnsupportedRecordingVersion(u64),

    /// Replay references a graph or node the project does not contain
    #[error("Mismatch between project and recording: {0}")]
    RecordingMismatch(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Whether this error marks a configuration problem found before execution
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownNodeType { .. }
                | Self::DuplicateNodeId(_)
                | Self::DanglingConnection { .. }
                | Self::DuplicateInputConnection { .. }
                | Self::GraphNotFound(_)
        )
    }

    /// Whether the run ended through an abort that was requested as successful
    pub fn is_successful_abort(&self) -> bool {
        matches!(self, Self::Aborted { successful: true, .. })
    }
}
