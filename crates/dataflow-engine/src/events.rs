//! Event types for observing a run
//!
//! Every state transition of a run is emitted as a `ProcessorEvent` wrapped
//! in a timestamped `RecordedEvent`. Hosts consume them through an
//! `EventSink` (push) or an `EventStream` (pull); the recorder is itself a
//! sink, which is what makes a run replayable.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures_util::Stream;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{GraphId, GraphInputs, GraphOutputs, Inputs, NodeId, Outputs, ProcessId};
use crate::value::DataValue;

/// Events emitted during graph processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ProcessorEvent {
    /// Root run started
    #[serde(rename_all = "camelCase")]
    Start {
        project_id: String,
        start_graph: GraphId,
        inputs: GraphInputs,
        context_values: HashMap<String, DataValue>,
    },

    /// A graph or sub-graph started
    #[serde(rename_all = "camelCase")]
    GraphStart { graph_id: GraphId, inputs: GraphInputs },

    /// A graph or sub-graph finished
    #[serde(rename_all = "camelCase")]
    GraphFinish { graph_id: GraphId, outputs: GraphOutputs },

    /// A graph or sub-graph failed
    #[serde(rename_all = "camelCase")]
    GraphError { graph_id: GraphId, error: String },

    /// A graph or sub-graph ended through an abort
    #[serde(rename_all = "camelCase")]
    GraphAbort {
        graph_id: GraphId,
        successful: bool,
        error: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    NodeStart {
        node_id: NodeId,
        inputs: Inputs,
        process_id: ProcessId,
    },

    #[serde(rename_all = "camelCase")]
    NodeFinish {
        node_id: NodeId,
        outputs: Outputs,
        process_id: ProcessId,
    },

    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: NodeId,
        error: String,
        process_id: ProcessId,
    },

    /// A node was skipped because of an excluded input
    #[serde(rename_all = "camelCase")]
    NodeExcluded {
        node_id: NodeId,
        process_id: ProcessId,
        inputs: Inputs,
        outputs: Outputs,
        reason: String,
    },

    /// Intermediate outputs of a streaming node
    #[serde(rename_all = "camelCase")]
    PartialOutput {
        node_id: NodeId,
        outputs: Outputs,
        index: usize,
        process_id: ProcessId,
    },

    /// A loop body node was reset for the next iteration
    #[serde(rename_all = "camelCase")]
    NodeOutputsCleared {
        node_id: NodeId,
        process_id: Option<ProcessId>,
    },

    /// A user input node is waiting for `GraphProcessor::user_input`
    #[serde(rename_all = "camelCase")]
    UserInput {
        node_id: NodeId,
        inputs: Inputs,
        process_id: ProcessId,
        prompt: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    GlobalSet {
        id: String,
        value: DataValue,
        process_id: ProcessId,
    },

    /// A named event was raised for waiting nodes
    #[serde(rename_all = "camelCase")]
    UserEvent { name: String, data: Option<DataValue> },

    /// Abort was requested
    #[serde(rename_all = "camelCase")]
    Abort {
        successful: bool,
        error: Option<String>,
    },

    Pause,

    Resume,

    Trace(String),

    /// Root run failed
    #[serde(rename_all = "camelCase")]
    Error { error: String },

    /// Root run finished
    #[serde(rename_all = "camelCase")]
    Done { results: GraphOutputs },
}

/// Discriminant of `ProcessorEvent`, used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Start,
    GraphStart,
    GraphFinish,
    GraphError,
    GraphAbort,
    NodeStart,
    NodeFinish,
    NodeError,
    NodeExcluded,
    PartialOutput,
    NodeOutputsCleared,
    UserInput,
    GlobalSet,
    UserEvent,
    Abort,
    Pause,
    Resume,
    Trace,
    Error,
    Done,
}

impl ProcessorEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Start { .. } => EventKind::Start,
            Self::GraphStart { .. } => EventKind::GraphStart,
            Self::GraphFinish { .. } => EventKind::GraphFinish,
            Self::GraphError { .. } => EventKind::GraphError,
            Self::GraphAbort { .. } => EventKind::GraphAbort,
            Self::NodeStart { .. } => EventKind::NodeStart,
            Self::NodeFinish { .. } => EventKind::NodeFinish,
            Self::NodeError { .. } => EventKind::NodeError,
            Self::NodeExcluded { .. } => EventKind::NodeExcluded,
            Self::PartialOutput { .. } => EventKind::PartialOutput,
            Self::NodeOutputsCleared { .. } => EventKind::NodeOutputsCleared,
            Self::UserInput { .. } => EventKind::UserInput,
            Self::GlobalSet { .. } => EventKind::GlobalSet,
            Self::UserEvent { .. } => EventKind::UserEvent,
            Self::Abort { .. } => EventKind::Abort,
            Self::Pause => EventKind::Pause,
            Self::Resume => EventKind::Resume,
            Self::Trace(_) => EventKind::Trace,
            Self::Error { .. } => EventKind::Error,
            Self::Done { .. } => EventKind::Done,
        }
    }

    /// Node id for node-scoped events
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeFinish { node_id, .. }
            | Self::NodeError { node_id, .. }
            | Self::NodeExcluded { node_id, .. }
            | Self::PartialOutput { node_id, .. }
            | Self::NodeOutputsCleared { node_id, .. }
            | Self::UserInput { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Graph id for graph-scoped events
    pub fn graph_id(&self) -> Option<&str> {
        match self {
            Self::Start { start_graph, .. } => Some(start_graph),
            Self::GraphStart { graph_id, .. }
            | Self::GraphFinish { graph_id, .. }
            | Self::GraphError { graph_id, .. }
            | Self::GraphAbort { graph_id, .. } => Some(graph_id),
            _ => None,
        }
    }

    /// ProcessId for events tied to one node execution attempt
    pub fn process_id(&self) -> Option<&ProcessId> {
        match self {
            Self::NodeStart { process_id, .. }
            | Self::NodeFinish { process_id, .. }
            | Self::NodeError { process_id, .. }
            | Self::NodeExcluded { process_id, .. }
            | Self::PartialOutput { process_id, .. }
            | Self::UserInput { process_id, .. }
            | Self::GlobalSet { process_id, .. } => Some(process_id),
            Self::NodeOutputsCleared { process_id, .. } => process_id.as_ref(),
            _ => None,
        }
    }

    /// Whether this event ends a root run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. } | Self::Abort { .. })
    }
}

/// An event with its emission time in milliseconds since the Unix epoch
///
/// Serialized flat as `{ "type": ..., "data": ..., "ts": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", try_from = "serde_json::Value")]
pub struct RecordedEvent {
    pub event: ProcessorEvent,
    pub ts: i64,
}

impl RecordedEvent {
    /// Stamp an event with the current time
    pub fn now(event: ProcessorEvent) -> Self {
        Self {
            event,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

impl From<RecordedEvent> for serde_json::Value {
    fn from(value: RecordedEvent) -> Self {
        let mut json = serde_json::to_value(&value.event).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = json.as_object_mut() {
            obj.insert("ts".to_string(), serde_json::Value::from(value.ts));
        }
        json
    }
}

impl TryFrom<serde_json::Value> for RecordedEvent {
    type Error = String;

    fn try_from(mut value: serde_json::Value) -> Result<Self, Self::Error> {
        let ts = value
            .as_object_mut()
            .and_then(|obj| obj.remove("ts"))
            .and_then(|ts| ts.as_i64())
            .ok_or_else(|| "recorded event is missing 'ts'".to_string())?;
        let event = serde_json::from_value(value).map_err(|e| e.to_string())?;
        Ok(Self { event, ts })
    }
}

/// Trait for receiving processor events
///
/// This abstracts over the transport (channel, debugger socket, recorder)
/// so the processor stays host-agnostic.
pub trait EventSink: Send + Sync {
    /// Receive an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: &RecordedEvent) -> Result<(), EventError>;
}

/// Error when delivering events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: &RecordedEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Collected events without timestamps
    pub fn processor_events(&self) -> Vec<ProcessorEvent> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &RecordedEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Push-callback sink
///
/// The callback runs while the bus holds its delivery lock, so it must not
/// call back into the processor in a way that emits events.
pub struct CallbackEventSink<F> {
    callback: F,
}

impl<F> CallbackEventSink<F>
where
    F: Fn(&RecordedEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> EventSink for CallbackEventSink<F>
where
    F: Fn(&RecordedEvent) + Send + Sync,
{
    fn send(&self, event: &RecordedEvent) -> Result<(), EventError> {
        (self.callback)(event);
        Ok(())
    }
}

/// Forwards only the listed event kinds to an inner sink
pub struct FilteredSink {
    kinds: HashSet<EventKind>,
    inner: Arc<dyn EventSink>,
}

impl FilteredSink {
    pub fn new(kinds: impl IntoIterator<Item = EventKind>, inner: Arc<dyn EventSink>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            inner,
        }
    }
}

impl EventSink for FilteredSink {
    fn send(&self, event: &RecordedEvent) -> Result<(), EventError> {
        if self.kinds.contains(&event.event.kind()) {
            self.inner.send(event)
        } else {
            Ok(())
        }
    }
}

/// Channel-backed sink feeding an `EventStream`
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<RecordedEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the stream reading from it
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, EventStream { rx })
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: &RecordedEvent) -> Result<(), EventError> {
        self.tx
            .send(event.clone())
            .map_err(|_| EventError::channel_closed())
    }
}

/// Pull-based view of a run's events
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<RecordedEvent>,
}

impl EventStream {
    /// Receive the next event, or `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<RecordedEvent> {
        self.rx.recv().await
    }

    /// Drain events already buffered without waiting
    pub fn drain(&mut self) -> Vec<RecordedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = RecordedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Fan-out of events to every registered sink
///
/// Shared between a processor and its sub-processors so nested runs report
/// through the same sinks.
/// Stamping and delivery happen under one lock, so every sink sees the
/// same order and timestamps never go backwards.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    /// Timestamp of the last delivered event
    delivery: Mutex<i64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Stamp and deliver an event to every sink
    pub fn emit(&self, event: ProcessorEvent) {
        if let ProcessorEvent::Trace(message) = &event {
            log::trace!("{}", message);
        }
        let mut last = self.delivery.lock();
        let mut event = RecordedEvent::now(event);
        event.ts = event.ts.max(*last);
        *last = event.ts;
        self.deliver(&event);
    }

    /// Deliver an already-stamped event (used by replay)
    pub fn emit_recorded(&self, event: RecordedEvent) {
        let mut last = self.delivery.lock();
        *last = event.ts;
        self.deliver(&event);
    }

    fn deliver(&self, event: &RecordedEvent) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            if let Err(e) = sink.send(event) {
                log::warn!("Dropping {:?} event: {}", event.event.kind(), e);
            }
        }
    }
}
