//! One spawned node execution attempt

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::{FutureExt, StreamExt};

use crate::behavior::{NodeBehavior, NodeOutput, ProcessUpdate};
use crate::context::NodeContext;
use crate::error::{EngineError, Result};
use crate::events::ProcessorEvent;
use crate::types::{GraphNode, Inputs, Outputs, PortDefinition, ProcessId};
use crate::value::DataValue;

/// What a finished task reports back to the driver
pub(crate) struct TaskOutcome {
    pub index: usize,
    pub process_id: ProcessId,
    pub result: Result<Outputs>,
}

pub(crate) struct NodeTask {
    pub index: usize,
    pub node: GraphNode,
    pub behavior: Arc<dyn NodeBehavior>,
    pub inputs: Inputs,
    pub output_ports: Vec<PortDefinition>,
    pub context: NodeContext,
}

impl NodeTask {
    pub async fn run(self) -> TaskOutcome {
        let index = self.index;
        let node_id = self.node.id.clone();
        let process_id = self.context.process_id().clone();
        let token = self.context.signal().clone();
        let grace = self.context.settings().abort_grace_period();

        // After cancellation the node gets the grace period to settle on
        // its own before it is abandoned.
        let abandon = async {
            token.cancelled().await;
            match grace {
                Some(grace) => tokio::time::sleep(grace).await,
                None => std::future::pending::<()>().await,
            }
        };

        let work = AssertUnwindSafe(self.execute()).catch_unwind();
        let result = tokio::select! {
            biased;
            result = work => result.unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(EngineError::failed(format!("Node panicked: {}", message)))
            }),
            _ = abandon => {
                log::warn!("Abandoning node {} after abort grace period", node_id);
                Err(EngineError::Cancelled)
            }
        };

        TaskOutcome {
            index,
            process_id,
            result,
        }
    }

    async fn execute(self) -> Result<Outputs> {
        self.context.wait_unpaused().await?;

        let work = async {
            if self.node.is_split_run {
                self.split_run().await
            } else {
                self.process_once(self.inputs.clone(), 0).await
            }
        };

        match self.context.settings().node_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, work)
                .await
                .map_err(|_| EngineError::Timeout(timeout.as_millis() as u64))?,
            None => work.await,
        }
    }

    /// Run the behavior once and settle its output, forwarding partials
    async fn process_once(&self, inputs: Inputs, index: usize) -> Result<Outputs> {
        match self.behavior.process(&self.node, inputs, &self.context).await? {
            NodeOutput::Ready(outputs) => Ok(outputs),
            NodeOutput::Stream(mut stream) => {
                let mut last = None;
                while let Some(update) = stream.next().await {
                    match update? {
                        ProcessUpdate::Partial(outputs) => {
                            self.context.emit(ProcessorEvent::PartialOutput {
                                node_id: self.node.id.clone(),
                                outputs: outputs.clone(),
                                index,
                                process_id: self.context.process_id().clone(),
                            });
                            last = Some(outputs);
                        }
                        ProcessUpdate::Final(outputs) => return Ok(outputs),
                    }
                }
                Ok(last.unwrap_or_default())
            }
        }
    }

    /// Run once per element of the array inputs and collect outputs into arrays
    async fn split_run(&self) -> Result<Outputs> {
        let longest = self
            .inputs
            .values()
            .map(|v| v.array_len().unwrap_or(1))
            .max()
            .unwrap_or(1);
        let limit = self
            .node
            .split_run_max
            .unwrap_or(self.context.settings().split_run_max);
        let runs = longest.min(limit);

        if runs == 0 {
            return Ok(self
                .output_ports
                .iter()
                .map(|p| (p.id.clone(), DataValue::default_for(p.primary_type().to_array())))
                .collect());
        }

        let attempts = (0..runs).map(|i| {
            let inputs: Inputs = self
                .inputs
                .iter()
                .map(|(port, value)| {
                    let value = if value.is_array() {
                        value
                            .element(i)
                            .unwrap_or(DataValue::Any(serde_json::Value::Null))
                    } else {
                        value.clone()
                    };
                    (port.clone(), value)
                })
                .collect();
            self.process_once(inputs, i)
        });
        let results = join_all(attempts).await.into_iter().collect::<Result<Vec<_>>>()?;

        let mut columns: Vec<(String, Vec<DataValue>)> = Vec::new();
        for outputs in results {
            for (port, value) in outputs {
                match columns.iter_mut().find(|(p, _)| *p == port) {
                    Some((_, values)) => values.push(value),
                    None => columns.push((port, vec![value])),
                }
            }
        }

        Ok(columns
            .into_iter()
            .map(|(port, values)| {
                let element_type = self
                    .output_ports
                    .iter()
                    .find(|p| p.id == port)
                    .map(|p| p.primary_type().element_type());
                let value = match element_type {
                    Some(t) => DataValue::from_elements_typed(values, t),
                    None => DataValue::from_elements(values),
                };
                (port, value)
            })
            .collect())
    }
}
