//! Execution context handed to node behaviors
//!
//! `ProcessContext` is what the host supplies for a run. `NodeContext` is
//! what one node execution attempt sees: its identity, its cancellation
//! token and the run-wide facilities (events, globals, external functions,
//! user input, sub-graph execution).
//!
//! State that must outlive a single graph (globals, the event bus, pending
//! user inputs, pause state) lives in `SharedState` and is handed down to
//! sub-processors unchanged.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::events::{EventBus, ProcessorEvent};
use crate::processor::GraphProcessor;
use crate::registry::NodeRegistry;
use crate::services::HostServices;
use crate::settings::ProcessorSettings;
use crate::types::{GraphId, GraphInputs, GraphOutputs, Inputs, NodeId, ProcessId, Project};
use crate::value::DataValue;

/// A host function callable from nodes by name
pub type ExternalFunction =
    Arc<dyn Fn(Vec<DataValue>) -> BoxFuture<'static, Result<DataValue>> + Send + Sync>;

/// Wrap an async closure as an `ExternalFunction`
pub fn external_function<F, Fut>(f: F) -> ExternalFunction
where
    F: Fn(Vec<DataValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataValue>> + Send + 'static,
{
    Arc::new(move |args| -> BoxFuture<'static, Result<DataValue>> { Box::pin(f(args)) })
}

/// Host-provided context for a run
#[derive(Clone, Default)]
pub struct ProcessContext {
    pub services: Arc<HostServices>,
    /// Overrides the processor's own settings for this run
    pub settings: Option<ProcessorSettings>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_services(mut self, services: HostServices) -> Self {
        self.services = Arc::new(services);
        self
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = Some(settings);
        self
    }
}

/// Last-write-wins key/value store shared by a run and its sub-runs
pub(crate) struct GlobalStore {
    values: RwLock<HashMap<String, DataValue>>,
    version: watch::Sender<u64>,
}

impl GlobalStore {
    fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            version: watch::channel(0).0,
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<DataValue> {
        self.values.read().get(id).cloned()
    }

    /// Store a value, returning the previous one
    pub(crate) fn set(&self, id: &str, value: DataValue) -> Option<DataValue> {
        let previous = self.values.write().insert(id.to_string(), value);
        self.version.send_modify(|v| *v += 1);
        previous
    }

    async fn wait_for(&self, id: &str, token: &CancellationToken) -> Result<DataValue> {
        let mut changes = self.version.subscribe();
        loop {
            if let Some(value) = self.get(id) {
                return Ok(value);
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Cancelled);
                    }
                }
                _ = token.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }
}

/// A user event delivered to waiting nodes
#[derive(Debug, Clone)]
pub(crate) struct UserEvent {
    pub name: String,
    pub data: Option<DataValue>,
}

/// A node attempt suspended in `request_user_input`
pub(crate) struct PendingInput {
    pub node_id: NodeId,
    pub process_id: ProcessId,
    pub sender: oneshot::Sender<Vec<String>>,
}

/// The last raise of each event name, numbered in raise order
#[derive(Default)]
struct RaisedEvents {
    sequence: u64,
    last: HashMap<String, (u64, Option<DataValue>)>,
}

/// State shared by a root processor and every sub-processor it spawns
pub(crate) struct SharedState {
    pub project: Arc<Project>,
    pub registry: Arc<NodeRegistry>,
    pub bus: EventBus,
    pub settings: RwLock<ProcessorSettings>,
    pub globals: GlobalStore,
    pub external_functions: RwLock<HashMap<String, ExternalFunction>>,
    pub context_values: RwLock<HashMap<String, DataValue>>,
    /// Oldest request first
    pub pending_inputs: Mutex<Vec<PendingInput>>,
    user_events: broadcast::Sender<UserEvent>,
    raised: Mutex<RaisedEvents>,
    paused: watch::Sender<bool>,
}

impl SharedState {
    pub(crate) fn new(project: Arc<Project>, registry: Arc<NodeRegistry>) -> Self {
        let mut external_functions: HashMap<String, ExternalFunction> = HashMap::new();
        external_functions.insert(
            "echo".to_string(),
            external_function(|args| async move {
                Ok(args
                    .into_iter()
                    .next()
                    .unwrap_or(DataValue::Any(serde_json::Value::Null)))
            }),
        );

        Self {
            project,
            registry,
            bus: EventBus::new(),
            settings: RwLock::new(ProcessorSettings::default()),
            globals: GlobalStore::new(),
            external_functions: RwLock::new(external_functions),
            context_values: RwLock::new(HashMap::new()),
            pending_inputs: Mutex::new(Vec::new()),
            user_events: broadcast::channel(64).0,
            raised: Mutex::new(RaisedEvents::default()),
            paused: watch::channel(false).0,
        }
    }

    pub(crate) fn raise_event(&self, name: &str, data: Option<DataValue>) {
        self.bus.emit(ProcessorEvent::UserEvent {
            name: name.to_string(),
            data: data.clone(),
        });
        let mut raised = self.raised.lock();
        raised.sequence += 1;
        let sequence = raised.sequence;
        raised.last.insert(name.to_string(), (sequence, data.clone()));
        // No receivers just means nobody is waiting
        let _ = self.user_events.send(UserEvent {
            name: name.to_string(),
            data,
        });
    }

    /// Subscribe to user events, along with the sequence number they start after
    fn subscribe_events(&self) -> (broadcast::Receiver<UserEvent>, u64) {
        let raised = self.raised.lock();
        (self.user_events.subscribe(), raised.sequence)
    }

    /// Data of the latest `name` event raised after `since`
    fn raised_since(&self, name: &str, since: u64) -> Option<Option<DataValue>> {
        self.raised
            .lock()
            .last
            .get(name)
            .filter(|(sequence, _)| *sequence > since)
            .map(|(_, data)| data.clone())
    }

    /// Remove and return the sender of the first pending request `matches` accepts
    pub(crate) fn take_pending_input(
        &self,
        matches: impl Fn(&PendingInput) -> bool,
    ) -> Option<oneshot::Sender<Vec<String>>> {
        let mut pending = self.pending_inputs.lock();
        let position = pending.iter().position(matches)?;
        Some(pending.remove(position).sender)
    }

    /// Returns whether the pause state changed
    pub(crate) fn set_paused(&self, paused: bool) -> bool {
        self.paused.send_replace(paused) != paused
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub(crate) async fn wait_unpaused(&self, token: &CancellationToken) -> Result<()> {
        let mut paused = self.paused.subscribe();
        loop {
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                changed = paused.changed() => changed.map_err(|_| EngineError::Cancelled)?,
                _ = token.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    pub(crate) fn external_function(&self, name: &str) -> Option<ExternalFunction> {
        self.external_functions.read().get(name).cloned()
    }
}

/// Why and how a run was asked to stop early
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AbortRequest {
    pub successful: bool,
    pub error: Option<String>,
}

/// Stop switch of one graph run
pub(crate) struct RunControl {
    pub token: CancellationToken,
    abort: Mutex<Option<AbortRequest>>,
    shared: Arc<SharedState>,
    is_root: bool,
}

impl RunControl {
    pub(crate) fn new(token: CancellationToken, shared: Arc<SharedState>, is_root: bool) -> Self {
        Self {
            token,
            abort: Mutex::new(None),
            shared,
            is_root,
        }
    }

    /// Request an abort; only the first request counts
    pub(crate) fn request_abort(&self, successful: bool, error: Option<String>) {
        {
            let mut abort = self.abort.lock();
            if abort.is_some() {
                return;
            }
            *abort = Some(AbortRequest {
                successful,
                error: error.clone(),
            });
        }

        log::info!(
            "Aborting run ({})",
            if successful { "successful" } else { "with error" }
        );
        if self.is_root {
            self.shared.bus.emit(ProcessorEvent::Abort { successful, error });
        }
        self.token.cancel();
    }

    pub(crate) fn abort_request(&self) -> Option<AbortRequest> {
        self.abort.lock().clone()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.abort.lock().is_some()
    }
}

/// Everything a run hands to the nodes it launches
pub(crate) struct RunScope {
    pub shared: Arc<SharedState>,
    pub graph_id: GraphId,
    pub services: Arc<HostServices>,
    pub settings: ProcessorSettings,
    pub graph_inputs: GraphInputs,
    pub graph_outputs: Mutex<GraphOutputs>,
    pub control: Arc<RunControl>,
}

/// Context for one execution attempt of a node
#[derive(Clone)]
pub struct NodeContext {
    node_id: NodeId,
    process_id: ProcessId,
    iteration: u32,
    token: CancellationToken,
    scope: Arc<RunScope>,
}

impl NodeContext {
    pub(crate) fn new(
        node_id: NodeId,
        process_id: ProcessId,
        iteration: u32,
        token: CancellationToken,
        scope: Arc<RunScope>,
    ) -> Self {
        Self {
            node_id,
            process_id,
            iteration,
            token,
            scope,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    /// Loop iteration this attempt belongs to (0 outside loops)
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn graph_id(&self) -> &str {
        &self.scope.graph_id
    }

    /// Cancellation signal for this attempt
    ///
    /// Fires on abort, on fail-fast shutdown and when a race this node
    /// feeds has already been won.
    pub fn signal(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.scope.settings
    }

    pub fn services(&self) -> &HostServices {
        &self.scope.services
    }

    pub fn project(&self) -> &Project {
        &self.scope.shared.project
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.scope.shared.registry
    }

    /// Context to hand to a sub-processor so it runs with the same host
    /// services and settings
    pub fn process_context(&self) -> ProcessContext {
        ProcessContext {
            services: self.scope.services.clone(),
            settings: Some(self.scope.settings.clone()),
        }
    }

    /// Inputs passed to the graph this node runs in
    pub fn graph_inputs(&self) -> &GraphInputs {
        &self.scope.graph_inputs
    }

    pub fn graph_output(&self, id: &str) -> Option<DataValue> {
        self.scope.graph_outputs.lock().get(id).cloned()
    }

    pub fn set_graph_output(&self, id: &str, value: DataValue) {
        self.scope.graph_outputs.lock().insert(id.to_string(), value);
    }

    pub fn context_value(&self, id: &str) -> Option<DataValue> {
        self.scope.shared.context_values.read().get(id).cloned()
    }

    /// Suspend until the named user event is raised
    pub async fn wait_event(&self, name: &str) -> Result<Option<DataValue>> {
        let shared = &self.scope.shared;
        let (mut events, since) = shared.subscribe_events();
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) if event.name == name => return Ok(event.data),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        log::debug!("Node {} missed {} user events", self.node_id, missed);
                        if let Some(data) = shared.raised_since(name, since) {
                            return Ok(data);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(EngineError::Cancelled),
                },
                _ = self.token.cancelled() => return Err(EngineError::Cancelled),
            }
        }
    }

    /// Raise a user event visible to every waiting node of the run
    pub fn raise_event(&self, name: &str, data: Option<DataValue>) {
        self.scope.shared.raise_event(name, data);
    }

    /// Call a host external function by name
    pub async fn call_external(&self, name: &str, args: Vec<DataValue>) -> Result<DataValue> {
        let function = self
            .scope
            .shared
            .external_function(name)
            .ok_or_else(|| EngineError::UnknownExternalFunction(name.to_string()))?;

        let call = function(args);
        let call = async {
            match self.scope.settings.external_call_timeout() {
                Some(timeout) => tokio::time::timeout(timeout, call)
                    .await
                    .map_err(|_| EngineError::Timeout(timeout.as_millis() as u64))?,
                None => call.await,
            }
        };

        tokio::select! {
            result = call => result,
            _ = self.token.cancelled() => Err(EngineError::Cancelled),
        }
    }

    pub fn get_global(&self, id: &str) -> Option<DataValue> {
        self.scope.shared.globals.get(id)
    }

    /// Store a global, returning the previous value
    pub fn set_global(&self, id: &str, value: DataValue) -> Option<DataValue> {
        let previous = self.scope.shared.globals.set(id, value.clone());
        self.scope.shared.bus.emit(ProcessorEvent::GlobalSet {
            id: id.to_string(),
            value,
            process_id: self.process_id.clone(),
        });
        previous
    }

    /// Suspend until the global is set
    pub async fn wait_for_global(&self, id: &str) -> Result<DataValue> {
        self.scope.shared.globals.wait_for(id, &self.token).await
    }

    pub(crate) async fn wait_unpaused(&self) -> Result<()> {
        self.scope.shared.wait_unpaused(&self.token).await
    }

    pub(crate) fn emit(&self, event: ProcessorEvent) {
        self.scope.shared.bus.emit(event);
    }

    /// Emit a trace event
    pub fn trace(&self, message: impl Into<String>) {
        self.scope.shared.bus.emit(ProcessorEvent::Trace(message.into()));
    }

    /// Ask the run this node belongs to to stop
    ///
    /// Without an error the abort is a successful early exit. Returns
    /// immediately; the run settles after this node returns.
    pub fn abort_graph(&self, error: Option<String>) {
        self.scope.control.request_abort(error.is_none(), error);
    }

    /// Suspend until the host answers through `GraphProcessor::user_input`
    pub async fn request_user_input(&self, inputs: Inputs, prompt: Option<String>) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.scope.shared.pending_inputs.lock().push(PendingInput {
            node_id: self.node_id.clone(),
            process_id: self.process_id.clone(),
            sender: tx,
        });

        self.scope.shared.bus.emit(ProcessorEvent::UserInput {
            node_id: self.node_id.clone(),
            inputs,
            process_id: self.process_id.clone(),
            prompt,
        });

        let answer = tokio::select! {
            answer = rx => answer.map_err(|_| EngineError::Cancelled),
            _ = self.token.cancelled() => Err(EngineError::Cancelled),
        };
        if answer.is_err() {
            self.scope
                .shared
                .take_pending_input(|p| p.process_id == self.process_id);
        }
        answer
    }

    /// Create a processor for another graph of the project that shares this
    /// run's globals, events and cancellation
    pub fn create_sub_processor(&self, graph_id: &str) -> Result<GraphProcessor> {
        GraphProcessor::sub_processor(self.scope.shared.clone(), graph_id, self.token.clone())
    }
}
