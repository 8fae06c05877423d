//! Graph processor
//!
//! `GraphProcessor` is the host-facing handle bound to one graph of a
//! project. It validates the graph up front, runs it through the readiness
//! scheduler in `run`, and exposes run control (abort, pause, user input,
//! events) while a run is in flight.
//!
//! A processor runs one graph at a time. Sub-graph nodes get their own
//! processor that shares the root's `SharedState`.

mod plan;
mod run;
mod task;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::context::{ExternalFunction, ProcessContext, RunControl, RunScope, SharedState};
use crate::error::{EngineError, Result};
use crate::events::{ChannelEventSink, EventKind, EventSink, EventStream, FilteredSink, ProcessorEvent};
use crate::recording::ExecutionRecorder;
use crate::registry::NodeRegistry;
use crate::settings::ProcessorSettings;
use crate::types::{GraphInputs, GraphOutputs, NodeId, Outputs, ProcessId, Project};
use crate::value::DataValue;

use plan::GraphPlan;
use run::Run;

struct Inner {
    shared: Arc<SharedState>,
    plan: Arc<GraphPlan>,
    is_root: bool,
    /// Token of the node that spawned this sub-processor
    parent_token: Option<CancellationToken>,
    current: Mutex<Option<Arc<RunControl>>>,
    running: watch::Sender<bool>,
    node_outputs: Arc<Mutex<HashMap<NodeId, Outputs>>>,
}

/// Executes one graph of a project
///
/// Cloning yields another handle to the same processor, which is how a host
/// keeps control (abort, user input) while `process_graph` is awaited
/// elsewhere.
#[derive(Clone)]
pub struct GraphProcessor {
    inner: Arc<Inner>,
}

/// Resets the running flag when a run ends, including when the run future
/// is dropped
struct RunGuard<'a> {
    inner: &'a Inner,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.inner.current.lock() = None;
        self.inner.running.send_replace(false);
    }
}

impl GraphProcessor {
    /// Create a processor for `graph_id`, or the project's main graph
    ///
    /// Fails when the graph does not exist or has structural errors
    /// (unknown node types, duplicate ids, dangling or duplicate connections).
    pub fn new(project: Arc<Project>, graph_id: Option<&str>, registry: Arc<NodeRegistry>) -> Result<Self> {
        let graph_id = graph_id
            .map(str::to_string)
            .or_else(|| project.main_graph_id.clone())
            .ok_or_else(|| EngineError::GraphNotFound("<main>".to_string()))?;

        let shared = Arc::new(SharedState::new(project, registry));
        Self::build(shared, &graph_id, true, None)
    }

    pub(crate) fn sub_processor(
        shared: Arc<SharedState>,
        graph_id: &str,
        parent_token: CancellationToken,
    ) -> Result<Self> {
        Self::build(shared, graph_id, false, Some(parent_token))
    }

    fn build(
        shared: Arc<SharedState>,
        graph_id: &str,
        is_root: bool,
        parent_token: Option<CancellationToken>,
    ) -> Result<Self> {
        let plan = GraphPlan::build(&shared.project, graph_id, &shared.registry)?;
        log::debug!("Planned graph {} with {} nodes", plan.label(), plan.nodes.len());

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                plan: Arc::new(plan),
                is_root,
                parent_token,
                current: Mutex::new(None),
                running: watch::channel(false).0,
                node_outputs: Arc::new(Mutex::new(HashMap::new())),
            }),
        })
    }

    pub fn graph_id(&self) -> &str {
        &self.inner.plan.graph_id
    }

    /// Run the graph to a terminal state
    ///
    /// `context_values` are readable by every node of the run through
    /// `NodeContext::context_value`; sub-processors ignore theirs and see
    /// the root's. A successful abort resolves to the outputs produced so far.
    pub async fn process_graph(
        &self,
        context: ProcessContext,
        inputs: GraphInputs,
        context_values: HashMap<String, DataValue>,
    ) -> Result<GraphOutputs> {
        let inner = &self.inner;
        if inner.running.send_replace(true) {
            return Err(EngineError::AlreadyRunning);
        }
        let _guard = RunGuard { inner };

        let token = match &inner.parent_token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let control = Arc::new(RunControl::new(token, inner.shared.clone(), inner.is_root));
        *inner.current.lock() = Some(control.clone());
        inner.node_outputs.lock().clear();

        let graph_id = inner.plan.graph_id.clone();
        if inner.is_root {
            *inner.shared.context_values.write() = context_values.clone();
            inner.shared.bus.emit(ProcessorEvent::Start {
                project_id: inner.shared.project.metadata.id.clone(),
                start_graph: graph_id.clone(),
                inputs: inputs.clone(),
                context_values,
            });
        }
        log::info!("Processing graph {}", inner.plan.label());
        inner.shared.bus.emit(ProcessorEvent::GraphStart {
            graph_id: graph_id.clone(),
            inputs: inputs.clone(),
        });

        let settings = context
            .settings
            .unwrap_or_else(|| inner.shared.settings.read().clone());
        let scope = Arc::new(RunScope {
            shared: inner.shared.clone(),
            graph_id,
            services: context.services,
            settings,
            graph_inputs: inputs,
            graph_outputs: Mutex::new(GraphOutputs::new()),
            control,
        });

        Run::new(inner.plan.clone(), scope, inner.node_outputs.clone(), inner.is_root)
            .execute()
            .await
    }

    /// Stop the current run and wait for it to settle
    ///
    /// No node starts after this call. In-flight nodes are cancelled and get
    /// the configured grace period before being abandoned. Does nothing when
    /// no run is in flight.
    pub async fn abort(&self, successful: bool, error: Option<String>) {
        let control = self.inner.current.lock().clone();
        let Some(control) = control else {
            return;
        };
        control.request_abort(successful, error);

        let mut running = self.inner.running.subscribe();
        // The sender lives in `inner`, which `self` keeps alive
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Hold back nodes that have not started their work yet
    pub fn pause(&self) {
        if self.inner.shared.set_paused(true) {
            log::info!("Pausing graph {}", self.inner.plan.label());
            self.inner.shared.bus.emit(ProcessorEvent::Pause);
        }
    }

    pub fn resume(&self) {
        if self.inner.shared.set_paused(false) {
            log::info!("Resuming graph {}", self.inner.plan.label());
            self.inner.shared.bus.emit(ProcessorEvent::Resume);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.shared.is_paused()
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// Answer the oldest pending user input request of a node
    ///
    /// Returns false when the node is not waiting for input.
    pub fn user_input(&self, node_id: &str, values: Vec<String>) -> bool {
        match self.inner.shared.take_pending_input(|p| p.node_id == node_id) {
            Some(sender) => sender.send(values).is_ok(),
            None => {
                log::warn!("Node {} is not waiting for user input", node_id);
                false
            }
        }
    }

    /// Answer the user input request of one node attempt, as named by the
    /// `processId` of its `userInput` event
    pub fn user_input_for(&self, process_id: &ProcessId, values: Vec<String>) -> bool {
        match self.inner.shared.take_pending_input(|p| p.process_id == *process_id) {
            Some(sender) => sender.send(values).is_ok(),
            None => {
                log::warn!("Attempt {} is not waiting for user input", process_id);
                false
            }
        }
    }

    /// Deliver a named event to every node waiting for it
    pub fn raise_event(&self, name: &str, data: Option<DataValue>) {
        self.inner.shared.raise_event(name, data);
    }

    /// Register a host function callable from nodes
    ///
    /// Replaces any function of the same name, including the built-in `echo`.
    pub fn set_external_function(&self, name: &str, function: ExternalFunction) {
        self.inner
            .shared
            .external_functions
            .write()
            .insert(name.to_string(), function);
    }

    /// Settings for runs whose `ProcessContext` carries none
    pub fn set_settings(&self, settings: ProcessorSettings) {
        *self.inner.shared.settings.write() = settings;
    }

    pub fn settings(&self) -> ProcessorSettings {
        self.inner.shared.settings.read().clone()
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.shared.bus.add_sink(sink);
    }

    /// Pull-based event subscription, optionally restricted to some kinds
    pub fn subscribe(&self, kinds: Option<Vec<EventKind>>) -> EventStream {
        let (sink, stream) = ChannelEventSink::new();
        let sink: Arc<dyn EventSink> = match kinds {
            Some(kinds) => Arc::new(FilteredSink::new(kinds, Arc::new(sink))),
            None => Arc::new(sink),
        };
        self.add_sink(sink);
        stream
    }

    /// Outputs of every node that finished or was excluded in the last run
    pub fn node_outputs(&self) -> HashMap<NodeId, Outputs> {
        self.inner.node_outputs.lock().clone()
    }

    /// Re-emit a recorded run through this processor's sinks
    ///
    /// No node logic executes. Every graph and node the recording mentions
    /// must exist in the project. Node outputs are rebuilt from the recorded
    /// events and the recorded `done` results are returned.
    pub async fn replay_recording(&self, recorder: &ExecutionRecorder) -> Result<GraphOutputs> {
        let inner = &self.inner;
        if inner.running.send_replace(true) {
            return Err(EngineError::AlreadyRunning);
        }
        let _guard = RunGuard { inner };

        let events = recorder.events();
        for recorded in &events {
            if let Some(graph_id) = recorded.event.graph_id() {
                if inner.shared.project.graph(graph_id).is_none() {
                    return Err(EngineError::RecordingMismatch(format!(
                        "graph '{}' is not in the project",
                        graph_id
                    )));
                }
            }
            if let Some(node_id) = recorded.event.node_id() {
                if inner.shared.project.find_node(node_id).is_none() {
                    return Err(EngineError::RecordingMismatch(format!(
                        "node '{}' is not in the project",
                        node_id
                    )));
                }
            }
        }

        log::info!("Replaying {} recorded events", events.len());
        inner.node_outputs.lock().clear();
        let mut result = None;
        for recorded in events {
            match &recorded.event {
                ProcessorEvent::NodeFinish { node_id, outputs, .. }
                | ProcessorEvent::NodeExcluded { node_id, outputs, .. } => {
                    inner.node_outputs.lock().insert(node_id.clone(), outputs.clone());
                }
                ProcessorEvent::NodeOutputsCleared { node_id, .. } => {
                    inner.node_outputs.lock().remove(node_id);
                }
                ProcessorEvent::Done { results } => result = Some(Ok(results.clone())),
                ProcessorEvent::Error { error } => result = Some(Err(EngineError::ExecutionFailed(error.clone()))),
                _ => {}
            }
            inner.shared.bus.emit_recorded(recorded);
            tokio::task::yield_now().await;
        }

        result.unwrap_or_else(|| {
            Err(EngineError::RecordingMismatch(
                "recording has no done or error event".to_string(),
            ))
        })
    }
}
