//! The readiness scheduler driving one graph run
//!
//! A `Run` owns the per-node execution state of a single `process_graph`
//! call. Candidates are checked in insertion order; every ready node is
//! spawned into a `JoinSet` and the driver reacts to completions one at a
//! time, so all state mutation happens on this single task.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::plan::GraphPlan;
use super::task::{NodeTask, TaskOutcome};
use crate::behavior::FlowRole;
use crate::context::{NodeContext, RunScope};
use crate::error::{EngineError, Result};
use crate::events::ProcessorEvent;
use crate::types::{Connection, GraphOutputs, Inputs, NodeId, Outputs, ProcessId};
use crate::value::DataValue;

/// Output port of a loop controller that is excluded while the loop runs
const BREAK_PORT: &str = "break";

#[derive(Default)]
struct NodeState {
    visited: bool,
    running: bool,
    errored: bool,
    results: Option<Outputs>,
    process_id: Option<ProcessId>,
    loop_of: Option<usize>,
    token: Option<CancellationToken>,
}

#[derive(Default)]
struct LoopState {
    iteration: u32,
    /// Nodes that ran in the current iteration
    body: HashSet<usize>,
    broken: bool,
}

enum Readiness {
    Wait,
    /// Upstream nodes errored; the node can never run
    DependencyErrored(Vec<usize>),
    Ready { inputs: Inputs, excluded: bool },
}

pub(crate) struct Run {
    plan: Arc<GraphPlan>,
    scope: Arc<RunScope>,
    node_outputs: Arc<Mutex<HashMap<NodeId, Outputs>>>,
    is_root: bool,
    states: Vec<NodeState>,
    loops: HashMap<usize, LoopState>,
    completed_races: HashSet<usize>,
    errors: Vec<(usize, String)>,
    halted: bool,
    queue: VecDeque<usize>,
    queued: Vec<bool>,
    tasks: JoinSet<TaskOutcome>,
}

impl Run {
    pub fn new(
        plan: Arc<GraphPlan>,
        scope: Arc<RunScope>,
        node_outputs: Arc<Mutex<HashMap<NodeId, Outputs>>>,
        is_root: bool,
    ) -> Self {
        let count = plan.nodes.len();
        Self {
            states: (0..count).map(|_| NodeState::default()).collect(),
            queued: vec![false; count],
            plan,
            scope,
            node_outputs,
            is_root,
            loops: HashMap::new(),
            completed_races: HashSet::new(),
            errors: Vec::new(),
            halted: false,
            queue: VecDeque::new(),
            tasks: JoinSet::new(),
        }
    }

    pub async fn execute(mut self) -> Result<GraphOutputs> {
        for i in 0..self.plan.nodes.len() {
            self.enqueue(i);
        }

        loop {
            self.schedule();
            match self.tasks.join_next().await {
                Some(Ok(outcome)) => self.complete(outcome),
                Some(Err(e)) => log::error!("Node task failed to join: {}", e),
                None => break,
            }
        }

        self.finish()
    }

    fn stopped(&self) -> bool {
        self.halted || self.scope.control.token.is_cancelled()
    }

    fn emit(&self, event: ProcessorEvent) {
        self.scope.shared.bus.emit(event);
    }

    fn enqueue(&mut self, i: usize) {
        if !self.queued[i] {
            self.queued[i] = true;
            self.queue.push_back(i);
        }
    }

    fn enqueue_dependents(&mut self, i: usize) {
        let plan = self.plan.clone();
        for &d in &plan.nodes[i].dependents {
            self.enqueue(d);
        }
    }

    /// Launch every candidate that is ready, in insertion order
    fn schedule(&mut self) {
        while let Some(i) = self.queue.pop_front() {
            self.queued[i] = false;
            if self.stopped() {
                log::debug!("Run stopped; dropping {} queued nodes", self.queue.len() + 1);
                for j in self.queue.drain(..) {
                    self.queued[j] = false;
                }
                return;
            }

            match self.readiness(i) {
                Readiness::Wait => {}
                Readiness::DependencyErrored(sources) => {
                    let plan = self.plan.clone();
                    let names: Vec<String> = sources.iter().map(|&s| plan.nodes[s].label()).collect();
                    let message = format!(
                        "Cannot process node {} because it depends on errored nodes: {}",
                        plan.nodes[i].label(),
                        names.join(", ")
                    );
                    self.fail_node(i, None, EngineError::failed(message));
                }
                Readiness::Ready { inputs, excluded } => self.launch(i, inputs, excluded),
            }
        }
    }

    fn source_index(&self, connection: &Connection) -> Option<usize> {
        self.plan.index.get(&connection.output_node_id).copied()
    }

    /// Whether a finished source feeds node `i` a real value
    fn source_has_value(&self, i: usize, s: usize) -> bool {
        let Some(results) = &self.states[s].results else {
            return false;
        };
        self.plan.nodes[i]
            .incoming
            .iter()
            .filter(|c| self.source_index(c) == Some(s))
            .any(|c| results.get(&c.output_id).map(|v| !v.is_excluded()).unwrap_or(false))
    }

    fn readiness(&self, i: usize) -> Readiness {
        let planned = &self.plan.nodes[i];
        let state = &self.states[i];

        if state.running || state.errored {
            return Readiness::Wait;
        }
        if state.visited {
            let looping = planned.role == FlowRole::LoopController
                && self.loops.get(&i).map(|l| !l.broken).unwrap_or(false);
            if !looping {
                return Readiness::Wait;
            }
        }
        if self.plan.races[i].iter().any(|r| self.completed_races.contains(r)) {
            return Readiness::Wait;
        }

        if planned.role == FlowRole::Race {
            let any_value = planned
                .sources
                .iter()
                .any(|&s| self.states[s].visited && self.source_has_value(i, s));
            let all_settled = planned
                .sources
                .iter()
                .all(|&s| self.states[s].visited || self.states[s].errored);
            if !any_value && !all_settled {
                return Readiness::Wait;
            }
        } else {
            let errored: Vec<usize> = planned
                .sources
                .iter()
                .copied()
                .filter(|&s| self.states[s].errored)
                .collect();
            if !errored.is_empty() {
                return Readiness::DependencyErrored(errored);
            }

            for &s in &planned.sources {
                if self.states[s].visited {
                    continue;
                }
                // A controller's first run cannot wait for its own body
                let first_loop_run =
                    planned.role == FlowRole::LoopController && !state.visited && self.plan.same_cycle(i, s);
                if !first_loop_run {
                    return Readiness::Wait;
                }
            }
        }

        let mut inputs = Inputs::new();
        let mut excluded = false;
        for port in &planned.inputs {
            let connection = planned.incoming.iter().find(|c| c.input_id == port.id);
            let value = connection
                .and_then(|c| {
                    let s = self.source_index(c)?;
                    self.states[s].results.as_ref()?.get(&c.output_id).cloned()
                })
                .or_else(|| port.default_value.clone());

            match value {
                None if port.required && connection.is_none() => return Readiness::Wait,
                None => {}
                Some(v) if v.is_waiting_for_loop() => return Readiness::Wait,
                Some(v) if v.is_excluded() && !planned.role.consumes_excluded() => {
                    if port.required {
                        excluded = true;
                    }
                }
                Some(v) => {
                    inputs.insert(port.id.clone(), v);
                }
            }
        }

        Readiness::Ready { inputs, excluded }
    }

    /// The loop a value arriving over `connection` belongs to
    fn source_loop(&self, connection: &Connection) -> Option<usize> {
        let s = self.source_index(connection)?;
        if self.plan.nodes[s].role == FlowRole::LoopController {
            return (connection.output_id != BREAK_PORT).then_some(s);
        }
        self.states[s].loop_of
    }

    fn loop_membership(&self, i: usize) -> Result<Option<usize>> {
        let planned = &self.plan.nodes[i];
        if planned.role == FlowRole::LoopController {
            let nested = planned
                .incoming
                .iter()
                .filter_map(|c| self.source_loop(c))
                .any(|l| l != i);
            if nested {
                return Err(EngineError::failed("Nested loops are not supported"));
            }
            return Ok(Some(i));
        }
        Ok(planned.incoming.iter().find_map(|c| self.source_loop(c)))
    }

    fn launch(&mut self, i: usize, inputs: Inputs, excluded: bool) {
        let plan = self.plan.clone();
        let planned = &plan.nodes[i];

        let loop_of = match self.loop_membership(i) {
            Ok(loop_of) => loop_of,
            Err(e) => {
                self.fail_node(i, None, e);
                return;
            }
        };

        let (iteration, process_id) = match loop_of {
            Some(l) => {
                let state = self.loops.entry(l).or_default();
                if l != i {
                    state.body.insert(i);
                }
                (state.iteration, ProcessId::for_iteration(state.iteration))
            }
            None => (0, ProcessId::new()),
        };

        let state = &mut self.states[i];
        state.loop_of = loop_of;
        state.process_id = Some(process_id.clone());

        if excluded {
            let outputs: Outputs = planned
                .outputs
                .iter()
                .map(|p| (p.id.clone(), DataValue::excluded()))
                .collect();
            log::debug!("Excluding node {}", planned.label());
            state.visited = true;
            state.results = Some(outputs.clone());
            self.node_outputs.lock().insert(planned.node.id.clone(), outputs.clone());
            self.emit(ProcessorEvent::NodeExcluded {
                node_id: planned.node.id.clone(),
                process_id,
                inputs,
                outputs,
                reason: "control-flow-excluded input".to_string(),
            });
            self.enqueue_dependents(i);
            return;
        }

        let token = self.scope.control.token.child_token();
        state.running = true;
        state.token = Some(token.clone());

        log::debug!("Starting node {} [{}]", planned.label(), process_id);
        self.emit(ProcessorEvent::NodeStart {
            node_id: planned.node.id.clone(),
            inputs: inputs.clone(),
            process_id: process_id.clone(),
        });

        let task = NodeTask {
            index: i,
            node: planned.node.clone(),
            behavior: planned.behavior.clone(),
            inputs,
            output_ports: planned.outputs.clone(),
            context: NodeContext::new(planned.node.id.clone(), process_id, iteration, token, self.scope.clone()),
        };
        self.tasks.spawn(task.run());
    }

    fn complete(&mut self, outcome: TaskOutcome) {
        let TaskOutcome {
            index,
            process_id,
            result,
        } = outcome;
        let state = &mut self.states[index];
        state.running = false;
        state.token = None;

        match result {
            Ok(outputs) => self.finish_node(index, process_id, outputs),
            Err(e) => self.fail_node(index, Some(process_id), e),
        }
    }

    fn finish_node(&mut self, i: usize, process_id: ProcessId, outputs: Outputs) {
        let plan = self.plan.clone();
        let planned = &plan.nodes[i];

        if planned.role == FlowRole::LoopController {
            if let Err(e) = self.advance_loop(i, &outputs) {
                self.fail_node(i, Some(process_id), e);
                return;
            }
        }

        log::debug!("Finished node {} [{}]", planned.label(), process_id);
        let state = &mut self.states[i];
        state.visited = true;
        state.results = Some(outputs.clone());
        self.node_outputs.lock().insert(planned.node.id.clone(), outputs.clone());
        self.emit(ProcessorEvent::NodeFinish {
            node_id: planned.node.id.clone(),
            outputs,
            process_id,
        });

        if planned.role == FlowRole::Race {
            self.completed_races.insert(i);
            for &s in &planned.sources {
                if let Some(token) = self.states[s].token.as_ref().filter(|_| self.states[s].running) {
                    log::debug!("Race {} won; cancelling {}", planned.label(), plan.nodes[s].label());
                    token.cancel();
                }
            }
        }

        self.enqueue_dependents(i);
    }

    /// Move a loop to its next iteration or mark it broken
    fn advance_loop(&mut self, i: usize, outputs: &Outputs) -> Result<()> {
        let plan = self.plan.clone();
        let max = self.scope.settings.max_loop_iterations;
        let continuing = outputs
            .get(BREAK_PORT)
            .map(|v| v.is_waiting_for_loop())
            .unwrap_or(false);

        let state = self.loops.entry(i).or_default();
        if !continuing {
            log::debug!(
                "Loop controller {} finished after {} iterations",
                plan.nodes[i].label(),
                state.iteration
            );
            state.broken = true;
            return Ok(());
        }

        state.iteration += 1;
        if state.iteration > max {
            return Err(EngineError::failed(format!(
                "Loop controller {} has exceeded max iterations of {}",
                plan.nodes[i].node.title, max
            )));
        }
        log::debug!(
            "Loop controller {} starting iteration {}",
            plan.nodes[i].label(),
            state.iteration
        );

        let mut body: Vec<usize> = state.body.drain().collect();
        body.sort_unstable();
        for b in body {
            let node = &mut self.states[b];
            if node.running {
                continue;
            }
            node.visited = false;
            node.results = None;
            let process_id = node.process_id.clone();
            self.emit(ProcessorEvent::NodeOutputsCleared {
                node_id: plan.nodes[b].node.id.clone(),
                process_id,
            });
        }
        Ok(())
    }

    fn fail_node(&mut self, i: usize, process_id: Option<ProcessId>, error: EngineError) {
        let plan = self.plan.clone();
        let planned = &plan.nodes[i];
        let message = error.to_string();

        let state = &mut self.states[i];
        state.running = false;
        state.errored = true;
        let process_id = process_id
            .or_else(|| state.process_id.clone())
            .unwrap_or_default();
        state.process_id = Some(process_id.clone());

        self.emit(ProcessorEvent::NodeError {
            node_id: planned.node.id.clone(),
            error: message.clone(),
            process_id,
        });

        let in_race = !plan.races[i].is_empty();
        let stopped_run = matches!(error, EngineError::Cancelled) && self.scope.control.token.is_cancelled();
        if in_race || stopped_run {
            log::debug!("Ignoring error in node {}: {}", planned.label(), message);
        } else {
            log::warn!("Node {} failed: {}", planned.label(), message);
            self.errors.push((i, message));
            if self.scope.settings.fail_fast && !self.halted {
                log::info!("Stopping graph {} after first error", plan.label());
                self.halted = true;
                self.scope.control.token.cancel();
            }
        }

        self.enqueue_dependents(i);
    }

    fn finish(self) -> Result<GraphOutputs> {
        let graph_id = self.plan.graph_id.clone();
        let mut outputs = self.scope.graph_outputs.lock().clone();
        for (id, _) in &self.plan.outputs {
            outputs.entry(id.clone()).or_insert_with(DataValue::excluded);
        }

        if let Some(abort) = self.scope.control.abort_request() {
            log::info!("Graph {} aborted", self.plan.label());
            self.emit(ProcessorEvent::GraphAbort {
                graph_id,
                successful: abort.successful,
                error: abort.error.clone(),
            });
            if abort.successful {
                if self.is_root {
                    self.emit(ProcessorEvent::Done {
                        results: outputs.clone(),
                    });
                }
                return Ok(outputs);
            }
            let error = abort.error.unwrap_or_else(|| "Graph aborted".to_string());
            if self.is_root {
                self.emit(ProcessorEvent::Error { error: error.clone() });
            }
            return Err(EngineError::Aborted {
                successful: false,
                error: Some(error),
                partial_outputs: outputs,
            });
        }

        let failure = if !self.errors.is_empty() {
            let nodes: Vec<String> = self
                .errors
                .iter()
                .map(|(i, message)| format!("{}: {}", self.plan.nodes[*i].label(), message))
                .collect();
            Some(EngineError::GraphFailed(format!(
                "Graph {} failed to process due to errors in nodes: {}",
                self.plan.label(),
                nodes.join(", ")
            )))
        } else if self.scope.control.token.is_cancelled() {
            Some(EngineError::Cancelled)
        } else {
            None
        };

        if let Some(failure) = failure {
            let error = failure.to_string();
            log::warn!("{}", error);
            self.emit(ProcessorEvent::GraphError {
                graph_id,
                error: error.clone(),
            });
            if self.is_root {
                self.emit(ProcessorEvent::Error { error });
            }
            return Err(failure);
        }

        log::info!("Graph {} finished", self.plan.label());
        self.emit(ProcessorEvent::GraphFinish {
            graph_id,
            outputs: outputs.clone(),
        });
        if self.is_root {
            self.emit(ProcessorEvent::Done {
                results: outputs.clone(),
            });
        }
        Ok(outputs)
    }
}
