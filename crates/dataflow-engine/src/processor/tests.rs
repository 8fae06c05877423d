use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::behavior::{NodeBehavior, NodeOutput, PortContext, ProcessUpdate};
use crate::builder::{GraphBuilder, ProjectBuilder};
use crate::coerce::{to_number, to_string};
use crate::descriptor::NodeMetadata;
use crate::events::VecEventSink;
use crate::context::NodeContext;
use crate::types::{GraphNode, Inputs, NodeCategory, PortDefinition, ProcessId};
use crate::value::DataType;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn metadata(node_type: &str) -> NodeMetadata {
    NodeMetadata::new(node_type, NodeCategory::Processing, node_type)
}

fn single(port: &str, value: DataValue) -> Outputs {
    let mut outputs = Outputs::new();
    outputs.insert(port.to_string(), value);
    outputs
}

/// Built-ins plus small test behaviors
fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();

    registry.register_sync(
        metadata("upper"),
        vec![PortDefinition::required("input", "Input", DataType::STRING)],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |inputs| {
            let text = to_string(inputs.get("input")).unwrap_or_default();
            Ok(single("output", DataValue::String(text.to_uppercase())))
        },
    );
    registry.register_sync(
        metadata("increment"),
        vec![PortDefinition::required("input", "Input", DataType::NUMBER)],
        vec![PortDefinition::optional("output", "Output", DataType::NUMBER)],
        |inputs| {
            let n = to_number(inputs.get("input")).unwrap_or(0.0);
            Ok(single("output", DataValue::Number(n + 1.0)))
        },
    );
    registry.register_sync(
        metadata("below3"),
        vec![PortDefinition::required("value", "Value", DataType::NUMBER)],
        vec![PortDefinition::optional("result", "Result", DataType::BOOLEAN)],
        |inputs| {
            let n = to_number(inputs.get("value")).unwrap_or(0.0);
            Ok(single("result", DataValue::Boolean(n < 3.0)))
        },
    );
    registry.register_sync(
        metadata("pair"),
        vec![
            PortDefinition::required("a", "A", DataType::STRING),
            PortDefinition::optional("b", "B", DataType::STRING).with_default(DataValue::string("fallback")),
        ],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |inputs| {
            let a = to_string(inputs.get("a")).unwrap_or_default();
            let b = to_string(inputs.get("b")).unwrap_or_default();
            Ok(single("output", DataValue::String(format!("{}/{}", a, b))))
        },
    );
    registry.register_sync(
        metadata("fail"),
        vec![],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_| Err(EngineError::failed("boom")),
    );
    registry.register_sync(
        metadata("fast"),
        vec![],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_| Ok(single("output", DataValue::string("fast"))),
    );
    registry.register_callback(
        metadata("slow"),
        vec![],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_, context| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(3000)) => Ok(single("output", DataValue::string("slow"))),
                _ = context.signal().cancelled() => Err(EngineError::Cancelled),
            }
        },
    );
    registry.register_callback(
        metadata("stubborn"),
        vec![],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_, _context| async move {
            tokio::time::sleep(Duration::from_millis(3000)).await;
            Ok(single("output", DataValue::string("stubborn")))
        },
    );
    registry.register_callback(
        metadata("stopper"),
        vec![PortDefinition::required("input", "Input", DataType::STRING)],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |inputs, context| async move {
            context.abort_graph(None);
            let value = inputs.get("input").cloned().unwrap_or_else(|| DataValue::string(""));
            Ok(single("output", value))
        },
    );

    registry
}

fn graph_input(id: &str, data_type: &str, default: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "dataType": data_type, "defaultValue": default })
}

fn graph_output(id: &str, data_type: &str) -> serde_json::Value {
    json!({ "id": id, "dataType": data_type })
}

fn processor_for(graph: crate::types::NodeGraph) -> (GraphProcessor, Arc<VecEventSink>) {
    let project = ProjectBuilder::new("project", "Project").graph(graph).build();
    processor_in(project)
}

fn processor_in(project: Project) -> (GraphProcessor, Arc<VecEventSink>) {
    let processor = GraphProcessor::new(Arc::new(project), None, Arc::new(registry())).unwrap();
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());
    (processor, sink)
}

async fn run(processor: &GraphProcessor) -> Result<GraphOutputs> {
    processor
        .process_graph(ProcessContext::new(), GraphInputs::new(), HashMap::new())
        .await
}

/// `(kind, node id)` of every node-scoped event, in order
fn node_events(sink: &VecEventSink) -> Vec<(EventKind, String)> {
    sink.processor_events()
        .iter()
        .filter_map(|e| Some((e.kind(), e.node_id()?.to_string())))
        .collect()
}

fn linear_graph() -> crate::types::NodeGraph {
    GraphBuilder::new("main", "Main")
        .add_node("a", "graphInput")
        .with_data(graph_input("text", "string", json!("input value")))
        .add_node("b", "upper")
        .add_node("c", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("a", "data", "b", "input")
        .connect("b", "output", "c", "value")
        .build()
}

#[tokio::test]
async fn test_linear_graph_runs_in_dependency_order() {
    init();
    let (processor, sink) = processor_for(linear_graph());

    let outputs = assert_ok!(run(&processor).await);
    assert_eq!(outputs.get("result"), Some(&DataValue::string("INPUT VALUE")));

    let expected: Vec<(EventKind, String)> = ["a", "b", "c"]
        .iter()
        .flat_map(|id| [(EventKind::NodeStart, id.to_string()), (EventKind::NodeFinish, id.to_string())])
        .collect();
    assert_eq!(node_events(&sink), expected);

    let kinds: Vec<EventKind> = sink.processor_events().iter().map(|e| e.kind()).collect();
    assert_eq!(kinds.first(), Some(&EventKind::Start));
    assert_eq!(kinds.last(), Some(&EventKind::Done));
    assert!(!processor.is_running());
}

#[tokio::test]
async fn test_unconnected_optional_input_uses_default() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("in", "graphInput")
        .with_data(graph_input("a", "string", json!("given")))
        .add_node("pair", "pair")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("in", "data", "pair", "a")
        .connect("pair", "output", "out", "value")
        .build();
    let (processor, _) = processor_for(graph);

    let outputs = run(&processor).await.unwrap();
    assert_eq!(outputs.get("result"), Some(&DataValue::string("given/fallback")));
}

#[tokio::test]
async fn test_exclusion_propagates_without_running_nodes() {
    init();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = registry();
    let counted = calls.clone();
    registry.register_sync(
        metadata("counted"),
        vec![PortDefinition::required("input", "Input", DataType::ANY)],
        vec![PortDefinition::optional("output", "Output", DataType::ANY)],
        move |inputs| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(inputs)
        },
    );

    let graph = GraphBuilder::new("main", "Main")
        .add_node("flag", "graphInput")
        .with_data(graph_input("flag", "boolean", json!(false)))
        .add_node("text", "graphInput")
        .with_data(graph_input("text", "string", json!("hello")))
        .add_node("gate", "if")
        .add_node("taken", "counted")
        .add_node("after", "upper")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .add_node("other", "graphOutput")
        .with_data(graph_output("other", "string"))
        .connect("flag", "data", "gate", "if")
        .connect("text", "data", "gate", "value")
        .connect("gate", "output", "taken", "input")
        .connect("taken", "output", "after", "input")
        .connect("after", "output", "out", "value")
        .connect("gate", "falseOutput", "other", "value")
        .build();
    let project = ProjectBuilder::new("project", "Project").graph(graph).build();
    let processor = GraphProcessor::new(Arc::new(project), None, Arc::new(registry)).unwrap();
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let outputs = run(&processor).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(outputs["result"].is_excluded());
    assert_eq!(outputs.get("other"), Some(&DataValue::string("hello")));

    let excluded: Vec<String> = node_events(&sink)
        .into_iter()
        .filter(|(kind, _)| *kind == EventKind::NodeExcluded)
        .map(|(_, id)| id)
        .collect();
    assert_eq!(excluded, vec!["taken", "after"]);
    assert!(processor.node_outputs()["after"]["output"].is_excluded());
}

#[tokio::test]
async fn test_fan_out_delivers_identical_values() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("in", "graphInput")
        .with_data(graph_input("text", "string", json!("shared")))
        .add_node("left", "upper")
        .add_node("right", "upper")
        .add_node("out-left", "graphOutput")
        .with_data(graph_output("left", "string"))
        .add_node("out-right", "graphOutput")
        .with_data(graph_output("right", "string"))
        .connect("in", "data", "left", "input")
        .connect("in", "data", "right", "input")
        .connect("left", "output", "out-left", "value")
        .connect("right", "output", "out-right", "value")
        .build();
    let (processor, sink) = processor_for(graph);

    let outputs = run(&processor).await.unwrap();
    assert_eq!(outputs["left"], outputs["right"]);

    let starts: Vec<Inputs> = sink
        .processor_events()
        .into_iter()
        .filter_map(|e| match e {
            ProcessorEvent::NodeStart { node_id, inputs, .. } if node_id == "left" || node_id == "right" => {
                Some(inputs)
            }
            _ => None,
        })
        .collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0], starts[1]);
}

#[tokio::test]
async fn test_race_does_not_wait_for_slow_branch() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("slow", "slow")
        .add_node("fast", "fast")
        .add_node("race", "raceInputs")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("slow", "output", "race", "input1")
        .connect("fast", "output", "race", "input2")
        .connect("race", "result", "out", "value")
        .build();
    let (processor, sink) = processor_for(graph);

    let started = Instant::now();
    let outputs = run(&processor).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(outputs.get("result"), Some(&DataValue::string("fast")));

    // The cancelled loser reports an error that does not fail the run
    assert!(node_events(&sink).contains(&(EventKind::NodeError, "slow".to_string())));
}

#[tokio::test]
async fn test_host_abort_settles_quickly() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("slow", "slow")
        .add_node("fast", "fast")
        .add_node("slow-out", "graphOutput")
        .with_data(graph_output("slow", "string"))
        .connect("slow", "output", "slow-out", "value")
        .build();
    let (processor, _) = processor_for(graph);
    let mut finishes = processor.subscribe(Some(vec![EventKind::NodeFinish]));

    let started = Instant::now();
    let running = processor.clone();
    let handle = tokio::spawn(async move { run(&running).await });

    let finished = finishes.recv().await.unwrap();
    assert_eq!(finished.event.node_id(), Some("fast"));
    processor.abort(true, None).await;

    let outputs = handle.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(outputs["slow"].is_excluded());
    assert!(!processor.is_running());
}

#[tokio::test]
async fn test_no_node_starts_after_abort() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("in", "graphInput")
        .with_data(graph_input("text", "string", json!("x")))
        .add_node("stop", "stopper")
        .add_node("after", "upper")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("in", "data", "stop", "input")
        .connect("stop", "output", "after", "input")
        .connect("after", "output", "out", "value")
        .build();
    let (processor, sink) = processor_for(graph);

    let outputs = run(&processor).await.unwrap();
    assert!(outputs["result"].is_excluded());

    let events = node_events(&sink);
    assert!(!events.iter().any(|(_, id)| id == "after" || id == "out"));
    let kinds: Vec<EventKind> = sink.processor_events().iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&EventKind::Abort));
    assert!(kinds.contains(&EventKind::GraphAbort));
    assert_eq!(kinds.last(), Some(&EventKind::Done));
}

#[tokio::test]
async fn test_abort_graph_node_with_error() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("abort", "abortGraph")
        .with_data(json!({ "successfully": false, "errorMessage": "stop here" }))
        .build();
    let (processor, sink) = processor_for(graph);

    match run(&processor).await {
        Err(EngineError::Aborted {
            successful, error, ..
        }) => {
            assert!(!successful);
            assert_eq!(error.as_deref(), Some("stop here"));
        }
        other => panic!("expected abort, got {:?}", other),
    }
    assert_eq!(
        sink.processor_events().last(),
        Some(&ProcessorEvent::Error {
            error: "stop here".to_string()
        })
    );
}

fn loop_graph(loop_config: serde_json::Value) -> crate::types::NodeGraph {
    GraphBuilder::new("main", "Main")
        .add_node("start", "graphInput")
        .with_data(graph_input("start", "number", json!(-1)))
        .add_node("loop", "loopController")
        .titled("Loop")
        .with_data(loop_config)
        .add_node("counter", "increment")
        .add_node("check", "below3")
        .add_node("gate", "if")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "any[]"))
        .connect("start", "data", "loop", "input1Default")
        .connect("loop", "output1", "counter", "input")
        .connect("counter", "output", "loop", "input1")
        .connect("counter", "output", "check", "value")
        .connect("check", "result", "gate", "if")
        .connect("check", "result", "gate", "value")
        .connect("gate", "output", "loop", "continue")
        .connect("loop", "break", "out", "value")
        .build()
}

#[tokio::test]
async fn test_loop_counter_runs_until_condition_excluded() {
    init();
    let (processor, sink) = processor_for(loop_graph(serde_json::Value::Null));

    let outputs = run(&processor).await.unwrap();
    assert_eq!(
        processor.node_outputs()["counter"].get("output"),
        Some(&DataValue::Number(3.0))
    );
    assert_eq!(outputs["result"].array_len(), Some(1));

    let counter_runs: HashSet<ProcessId> = sink
        .processor_events()
        .into_iter()
        .filter_map(|e| match e {
            ProcessorEvent::NodeStart {
                node_id, process_id, ..
            } if node_id == "counter" => Some(process_id),
            _ => None,
        })
        .collect();
    assert_eq!(counter_runs.len(), 4);
    assert!(counter_runs.iter().all(|p| p.iteration().is_some()));

    let cleared = node_events(&sink)
        .into_iter()
        .filter(|(kind, id)| *kind == EventKind::NodeOutputsCleared && id == "counter")
        .count();
    assert_eq!(cleared, 3);
}

#[tokio::test]
async fn test_loop_ceiling_is_an_error() {
    init();
    let (processor, _) = processor_for(loop_graph(json!({ "maxIterations": 2 })));

    let err = run(&processor).await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Graph Main (main) failed to process due to errors in nodes: Loop (loop)"));
    assert!(message.contains("Loop controller Loop has exceeded max iterations of 2"));
}

#[tokio::test]
async fn test_loop_breaks_at_controller_limit() {
    init();
    let (processor, _) = processor_for(loop_graph(json!({
        "maxIterations": 2,
        "atMaxIterationsAction": "break"
    })));

    let outputs = assert_ok!(run(&processor).await);
    assert_eq!(outputs["result"].array_len(), Some(1));
    assert_eq!(to_number(outputs["result"].element(0).as_ref()), Some(1.0));
}

#[tokio::test]
async fn test_unbounded_loop_breaks_at_default_limit() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("start", "graphInput")
        .with_data(graph_input("start", "number", json!(-1)))
        .add_node("loop", "loopController")
        .titled("Loop")
        .with_data(json!({ "atMaxIterationsAction": "break" }))
        .add_node("counter", "increment")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "any[]"))
        .connect("start", "data", "loop", "input1Default")
        .connect("loop", "output1", "counter", "input")
        .connect("counter", "output", "loop", "input1")
        .connect("loop", "break", "out", "value")
        .build();
    let (processor, _) = processor_for(graph);

    let outputs = assert_ok!(run(&processor).await);
    assert_eq!(to_number(outputs["result"].element(0).as_ref()), Some(99.0));
}

#[tokio::test]
async fn test_processor_loop_ceiling_applies_to_every_controller() {
    init();
    let (processor, _) = processor_for(loop_graph(json!({ "maxIterations": 1000 })));

    let settings = ProcessorSettings::default().with_max_loop_iterations(2);
    let err = assert_err!(
        processor
            .process_graph(ProcessContext::new().with_settings(settings), GraphInputs::new(), HashMap::new())
            .await
    );
    assert!(err
        .to_string()
        .contains("Loop (loop): Loop controller Loop has exceeded max iterations of 2"));
}

#[tokio::test]
async fn test_nested_loops_are_rejected() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("start", "graphInput")
        .with_data(graph_input("start", "number", json!(0)))
        .add_node("outer", "loopController")
        .titled("Outer")
        .with_data(json!({ "maxIterations": 1000 }))
        .add_node("outer-body", "increment")
        .add_node("inner", "loopController")
        .titled("Inner")
        .add_node("inner-body", "increment")
        .connect("start", "data", "outer", "input1Default")
        .connect("outer", "output1", "outer-body", "input")
        .connect("outer-body", "output", "outer", "input1")
        .connect("outer", "output1", "inner", "input1Default")
        .connect("inner", "output1", "inner-body", "input")
        .connect("inner-body", "output", "inner", "input1")
        .build();
    let (processor, _) = processor_for(graph);

    let err = assert_err!(run(&processor).await);
    assert!(err
        .to_string()
        .contains("Inner (inner): Nested loops are not supported"));
}

/// Streams two partial outputs before its final one
struct Ticker;

#[async_trait::async_trait]
impl NodeBehavior for Ticker {
    fn metadata(&self) -> NodeMetadata {
        metadata("ticker")
    }

    fn input_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![]
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional("output", "Output", DataType::STRING)]
    }

    async fn process(&self, _node: &GraphNode, _inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let updates: Vec<Result<ProcessUpdate>> = vec![
            Ok(ProcessUpdate::Partial(single("output", DataValue::string("a")))),
            Ok(ProcessUpdate::Partial(single("output", DataValue::string("ab")))),
            Ok(ProcessUpdate::Final(single("output", DataValue::string("abc")))),
        ];
        Ok(NodeOutput::Stream(futures_util::stream::iter(updates).boxed()))
    }
}

#[tokio::test]
async fn test_streamed_partials_reach_observers_only() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("tick", "ticker")
        .add_node("upper", "upper")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("tick", "output", "upper", "input")
        .connect("upper", "output", "out", "value")
        .build();
    let project = ProjectBuilder::new("project", "Project").graph(graph).build();
    let mut registry = registry();
    registry.register(Arc::new(Ticker));
    let processor = GraphProcessor::new(Arc::new(project), None, Arc::new(registry)).unwrap();
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let outputs = assert_ok!(run(&processor).await);
    assert_eq!(outputs.get("result"), Some(&DataValue::string("ABC")));

    let events = sink.processor_events();
    let partials: Vec<DataValue> = events
        .iter()
        .filter_map(|e| match e {
            ProcessorEvent::PartialOutput { node_id, outputs, .. } if node_id == "tick" => {
                outputs.get("output").cloned()
            }
            _ => None,
        })
        .collect();
    assert_eq!(partials, vec![DataValue::string("a"), DataValue::string("ab")]);

    let upper_inputs: Vec<&Inputs> = events
        .iter()
        .filter_map(|e| match e {
            ProcessorEvent::NodeStart { node_id, inputs, .. } if node_id == "upper" => Some(inputs),
            _ => None,
        })
        .collect();
    assert_eq!(upper_inputs.len(), 1);
    assert_eq!(upper_inputs[0].get("input"), Some(&DataValue::string("abc")));

    let tick_finish = events
        .iter()
        .position(|e| e.kind() == EventKind::NodeFinish && e.node_id() == Some("tick"));
    let last_partial = events.iter().rposition(|e| e.kind() == EventKind::PartialOutput);
    assert!(last_partial < tick_finish);
}

#[tokio::test]
async fn test_node_timeout_fails_the_node() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("slow", "slow")
        .titled("Slow")
        .build();
    let (processor, sink) = processor_for(graph);

    let settings = ProcessorSettings::default().with_node_timeout(Some(Duration::from_millis(50)));
    let started = Instant::now();
    let err = assert_err!(
        processor
            .process_graph(ProcessContext::new().with_settings(settings), GraphInputs::new(), HashMap::new())
            .await
    );
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert!(err.to_string().contains("Slow (slow): Timed out after 50ms"));
    assert!(node_events(&sink).contains(&(EventKind::NodeError, "slow".to_string())));
}

#[tokio::test]
async fn test_node_ignoring_cancellation_is_abandoned_after_grace_period() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("stubborn", "stubborn")
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("stubborn", "output", "out", "value")
        .build();
    let (processor, _) = processor_for(graph);

    let settings = ProcessorSettings::default().with_abort_grace_period(Some(Duration::from_millis(50)));
    let running = processor.clone();
    let handle = tokio::spawn(async move {
        running
            .process_graph(ProcessContext::new().with_settings(settings), GraphInputs::new(), HashMap::new())
            .await
    });
    while !processor.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    processor.abort(true, None).await;
    assert!(started.elapsed() < Duration::from_millis(1000));

    let outputs = assert_ok!(handle.await.unwrap());
    assert!(outputs["result"].is_excluded());
}

#[tokio::test]
async fn test_graph_error_message_names_failing_node() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("f", "fail")
        .titled("Fail")
        .build();
    let (processor, sink) = processor_for(graph);

    let err = run(&processor).await.unwrap_err();
    assert!(matches!(err, EngineError::GraphFailed(_)));
    assert_eq!(
        err.to_string(),
        "Graph Main (main) failed to process due to errors in nodes: Fail (f): boom"
    );

    let kinds: Vec<EventKind> = sink.processor_events().iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&EventKind::NodeError));
    assert!(kinds.contains(&EventKind::GraphError));
    assert_eq!(kinds.last(), Some(&EventKind::Error));
}

#[tokio::test]
async fn test_dependents_of_errored_nodes_fail_without_fail_fast() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("f", "fail")
        .titled("Fail")
        .add_node("after", "upper")
        .titled("After")
        .connect("f", "output", "after", "input")
        .build();
    let (processor, _) = processor_for(graph);

    let context = ProcessContext::new().with_settings(ProcessorSettings::default().with_fail_fast(false));
    let err = processor
        .process_graph(context, GraphInputs::new(), HashMap::new())
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Cannot process node After (after) because it depends on errored nodes: Fail (f)"));
}

#[tokio::test]
async fn test_recording_round_trip_and_replay() {
    init();
    let project = ProjectBuilder::new("project", "Project").graph(linear_graph()).build();
    let (processor, _) = processor_in(project.clone());
    let recorder = Arc::new(ExecutionRecorder::new());
    processor.add_sink(recorder.clone());

    let outputs = run(&processor).await.unwrap();
    assert!(recorder.finished());

    let restored = ExecutionRecorder::from_json(&recorder.to_json().unwrap()).unwrap();
    assert_eq!(restored.events(), recorder.events());

    let (replayer, sink) = processor_in(project);
    let replayed = replayer.replay_recording(&restored).await.unwrap();
    assert_eq!(replayed, outputs);
    assert_eq!(sink.events(), restored.events());
    assert_eq!(
        replayer.node_outputs()["b"].get("output"),
        Some(&DataValue::string("INPUT VALUE"))
    );
}

#[tokio::test]
async fn test_replay_rejects_unknown_nodes() {
    init();
    let (processor, _) = processor_for(linear_graph());
    let recorder = Arc::new(ExecutionRecorder::new());
    processor.add_sink(recorder.clone());
    run(&processor).await.unwrap();

    let other = GraphBuilder::new("main", "Main")
        .add_node("x", "fast")
        .build();
    let (replayer, _) = processor_for(other);
    let err = replayer.replay_recording(&recorder).await.unwrap_err();
    assert!(matches!(err, EngineError::RecordingMismatch(_)));
}

#[tokio::test]
async fn test_subgraph_runs_nested_graph() {
    init();
    let inner = GraphBuilder::new("inner", "Inner")
        .add_node("inner-in", "graphInput")
        .with_data(graph_input("name", "string", serde_json::Value::Null))
        .add_node("inner-upper", "upper")
        .add_node("inner-out", "graphOutput")
        .with_data(graph_output("greeting", "string"))
        .connect("inner-in", "data", "inner-upper", "input")
        .connect("inner-upper", "output", "inner-out", "value")
        .build();
    let main = GraphBuilder::new("main", "Main")
        .add_node("who", "graphInput")
        .with_data(graph_input("who", "string", json!("ada")))
        .add_node("sub", "subGraph")
        .with_data(json!({ "graphId": "inner" }))
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .connect("who", "data", "sub", "name")
        .connect("sub", "greeting", "out", "value")
        .build();
    let project = ProjectBuilder::new("project", "Project").graph(main).graph(inner).build();
    let (processor, sink) = processor_in(project);

    let outputs = run(&processor).await.unwrap();
    assert_eq!(outputs.get("result"), Some(&DataValue::string("ADA")));

    let events = sink.processor_events();
    let graph_starts: Vec<&str> = events
        .iter()
        .filter(|e| e.kind() == EventKind::GraphStart)
        .filter_map(|e| e.graph_id())
        .collect();
    assert_eq!(graph_starts, vec!["main", "inner"]);
    assert_eq!(events.iter().filter(|e| e.kind() == EventKind::Start).count(), 1);
    assert_eq!(events.iter().filter(|e| e.kind() == EventKind::Done).count(), 1);
}

#[tokio::test]
async fn test_subgraph_error_output() {
    init();
    let inner = GraphBuilder::new("inner", "Inner")
        .add_node("inner-fail", "fail")
        .titled("Inner Fail")
        .add_node("inner-out", "graphOutput")
        .with_data(graph_output("value", "string"))
        .connect("inner-fail", "output", "inner-out", "value")
        .build();
    let main = GraphBuilder::new("main", "Main")
        .add_node("sub", "subGraph")
        .with_data(json!({ "graphId": "inner", "useErrorOutput": true }))
        .add_node("out", "graphOutput")
        .with_data(graph_output("error", "string"))
        .connect("sub", "error", "out", "value")
        .build();
    let project = ProjectBuilder::new("project", "Project").graph(main).graph(inner).build();
    let (processor, _) = processor_in(project);

    let outputs = run(&processor).await.unwrap();
    let error = to_string(outputs.get("error")).unwrap();
    assert!(error.contains("Inner Fail (inner-fail): boom"));
    assert!(processor.node_outputs()["sub"]["value"].is_excluded());
}

#[tokio::test]
async fn test_get_global_waits_for_set() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("get", "getGlobal")
        .with_data(json!({ "id": "answer", "dataType": "number", "wait": true }))
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "number"))
        .add_node("value", "graphInput")
        .with_data(graph_input("value", "number", json!(42)))
        .add_node("set", "setGlobal")
        .with_data(json!({ "id": "answer", "dataType": "number" }))
        .connect("get", "value", "out", "value")
        .connect("value", "data", "set", "value")
        .build();
    let (processor, sink) = processor_for(graph);

    let outputs = run(&processor).await.unwrap();
    assert_eq!(outputs.get("result"), Some(&DataValue::Number(42.0)));
    assert!(sink
        .processor_events()
        .iter()
        .any(|e| e.kind() == EventKind::GlobalSet));
}

#[tokio::test]
async fn test_wait_for_event_resumes_on_host_event() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("in", "graphInput")
        .with_data(graph_input("text", "string", json!("hello")))
        .add_node("wait", "waitForEvent")
        .with_data(json!({ "eventName": "go" }))
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string"))
        .add_node("payload", "graphOutput")
        .with_data(graph_output("payload", "any"))
        .connect("in", "data", "wait", "inputData")
        .connect("wait", "outputData", "out", "value")
        .connect("wait", "eventData", "payload", "value")
        .build();
    let (processor, _) = processor_for(graph);

    let running = processor.clone();
    let handle = tokio::spawn(async move { run(&running).await });
    while !handle.is_finished() {
        processor.raise_event("go", Some(DataValue::string("payload")));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs.get("result"), Some(&DataValue::string("hello")));
    assert_eq!(to_string(outputs.get("payload")).as_deref(), Some("payload"));
}

#[tokio::test]
async fn test_user_input_round_trip() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("ask", "userInput")
        .with_data(json!({ "prompt": "Name?" }))
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string[]"))
        .connect("ask", "output", "out", "value")
        .build();
    let (processor, _) = processor_for(graph);
    let mut requests = processor.subscribe(Some(vec![EventKind::UserInput]));

    let running = processor.clone();
    let handle = tokio::spawn(async move { run(&running).await });

    let request = requests.recv().await.unwrap();
    let process_id = match &request.event {
        ProcessorEvent::UserInput {
            node_id,
            prompt,
            process_id,
            ..
        } => {
            assert_eq!(node_id, "ask");
            assert_eq!(prompt.as_deref(), Some("Name?"));
            process_id.clone()
        }
        other => panic!("unexpected event {:?}", other),
    };
    assert!(!processor.user_input_for(&ProcessId::new(), vec!["stranger".to_string()]));
    assert!(processor.user_input_for(&process_id, vec!["Ada".to_string()]));
    assert!(!processor.user_input("ask", vec!["again".to_string()]));

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(
        outputs.get("result"),
        Some(&DataValue::StringArray(vec!["Ada".to_string()]))
    );
}

#[tokio::test]
async fn test_split_run_collects_arrays() {
    init();
    let graph = GraphBuilder::new("main", "Main")
        .add_node("words", "graphInput")
        .with_data(graph_input("words", "string[]", json!(["a", "b"])))
        .add_node("upper", "upper")
        .split_run(None)
        .add_node("out", "graphOutput")
        .with_data(graph_output("result", "string[]"))
        .connect("words", "data", "upper", "input")
        .connect("upper", "output", "out", "value")
        .build();
    let (processor, _) = processor_for(graph);

    let outputs = run(&processor).await.unwrap();
    assert_eq!(
        outputs.get("result"),
        Some(&DataValue::StringArray(vec!["A".to_string(), "B".to_string()]))
    );
}

#[tokio::test]
async fn test_pause_holds_nodes_until_resume() {
    init();
    let (processor, sink) = processor_for(linear_graph());
    processor.pause();
    assert!(processor.is_paused());

    let running = processor.clone();
    let handle = tokio::spawn(async move { run(&running).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!node_events(&sink).iter().any(|(kind, _)| *kind == EventKind::NodeFinish));

    processor.resume();
    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs.get("result"), Some(&DataValue::string("INPUT VALUE")));

    let kinds: Vec<EventKind> = sink.processor_events().iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&EventKind::Pause));
    assert!(kinds.contains(&EventKind::Resume));
}

#[tokio::test]
async fn test_second_run_is_rejected_while_running() {
    init();
    let graph = GraphBuilder::new("main", "Main").add_node("slow", "slow").build();
    let (processor, _) = processor_for(graph);

    let running = processor.clone();
    let handle = tokio::spawn(async move { run(&running).await });
    while !processor.is_running() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = assert_err!(run(&processor).await);
    assert!(matches!(err, EngineError::AlreadyRunning));
    processor.abort(true, None).await;
    assert_ok!(handle.await.unwrap());
}

#[tokio::test]
async fn test_external_function_is_called() {
    init();
    let graph = GraphBuilder::new("main", "Main").add_node("x", "fast").build();
    let (processor, _) = processor_for(graph);
    processor.set_external_function(
        "double",
        crate::context::external_function(|args| async move {
            let n = to_number(args.first()).unwrap_or(0.0);
            Ok(DataValue::Number(n * 2.0))
        }),
    );

    let function = processor
        .inner
        .shared
        .external_function("double")
        .unwrap();
    assert_eq!(function(vec![DataValue::Number(21.0)]).await.unwrap(), DataValue::Number(42.0));
    assert!(processor.inner.shared.external_function("echo").is_some());
}

#[test]
fn test_unknown_node_type_is_rejected() {
    let graph = GraphBuilder::new("main", "Main").add_node("x", "mystery").build();
    let project = ProjectBuilder::new("project", "Project").graph(graph).build();

    let err = GraphProcessor::new(Arc::new(project), None, Arc::new(registry()))
        .err()
        .unwrap();
    assert!(err.is_configuration());
    assert!(matches!(err, EngineError::UnknownNodeType { .. }));
}
