//! Compare Node
//!
//! Compares two values. Equality coerces `b` to the type of `a` first, so
//! `"3" == 3` holds when `a` is the string.

use std::cmp::Ordering;

use async_trait::async_trait;
use dataflow_engine::coerce::{coerce_optional, to_bool, to_number, to_string};
use dataflow_engine::{
    DataType, DataValue, EngineError, GraphNode, Inputs, NodeBehavior, NodeCategory, NodeContext,
    NodeDescriptor, NodeMetadata, NodeOutput, Outputs, PortContext, PortDefinition, Result,
};
use serde::{Deserialize, Serialize};

/// Supported comparison functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "and")]
    And,
    #[serde(rename = "or")]
    Or,
}

impl Comparison {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "==" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            "<" => Some(Self::Less),
            "<=" => Some(Self::LessOrEqual),
            ">" => Some(Self::Greater),
            ">=" => Some(Self::GreaterOrEqual),
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            _ => None,
        }
    }

    pub fn apply(self, a: Option<&DataValue>, b: Option<&DataValue>) -> bool {
        match self {
            Self::Equal => values_equal(a, b),
            Self::NotEqual => !values_equal(a, b),
            Self::Less => order(a, b) == Some(Ordering::Less),
            Self::LessOrEqual => matches!(order(a, b), Some(Ordering::Less | Ordering::Equal)),
            Self::Greater => order(a, b) == Some(Ordering::Greater),
            Self::GreaterOrEqual => matches!(order(a, b), Some(Ordering::Greater | Ordering::Equal)),
            Self::And => to_bool(a) && to_bool(b),
            Self::Or => to_bool(a) || to_bool(b),
        }
    }
}

fn values_equal(a: Option<&DataValue>, b: Option<&DataValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), b) => {
            let b = coerce_optional(b, a.data_type());
            b.map(|b| b.to_json() == a.to_json()).unwrap_or(false)
        }
        (None, Some(_)) => false,
    }
}

/// Numeric order when both sides read as numbers, string order otherwise
fn order(a: Option<&DataValue>, b: Option<&DataValue>) -> Option<Ordering> {
    match (to_number(a), to_number(b)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(to_string(a)?.cmp(&to_string(b)?)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompareConfig {
    pub comparison_function: Comparison,
    pub use_comparison_function_input: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            comparison_function: Comparison::Equal,
            use_comparison_function_input: false,
        }
    }
}

/// Compares `a` with `b`
///
/// # Inputs
/// - `a`, `b`
/// - `comparisonFunction` - only when `useComparisonFunctionInput` is set
///
/// # Outputs
/// - `output` - boolean result
#[derive(Default)]
pub struct CompareNode;

impl CompareNode {
    pub const PORT_A: &'static str = "a";
    pub const PORT_B: &'static str = "b";
    pub const PORT_FUNCTION: &'static str = "comparisonFunction";
    pub const PORT_OUTPUT: &'static str = "output";
}

impl NodeDescriptor for CompareNode {
    fn descriptor() -> NodeMetadata {
        NodeMetadata::new("compare", NodeCategory::Processing, "Compare")
            .with_description("Compares two values and outputs a boolean")
    }
}

inventory::submit!(dataflow_engine::BehaviorFn(dataflow_engine::shared::<CompareNode>));

#[async_trait]
impl NodeBehavior for CompareNode {
    fn metadata(&self) -> NodeMetadata {
        Self::descriptor()
    }

    fn input_ports(&self, node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        let config: CompareConfig = node.config().unwrap_or_default();
        let mut inputs = vec![
            PortDefinition::optional(Self::PORT_A, "A", DataType::ANY),
            PortDefinition::optional(Self::PORT_B, "B", DataType::ANY),
        ];
        if config.use_comparison_function_input {
            inputs.push(PortDefinition::required(Self::PORT_FUNCTION, "Comparison Function", DataType::STRING));
        }
        inputs
    }

    fn output_ports(&self, _node: &GraphNode, _ports: &PortContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::BOOLEAN)]
    }

    async fn process(&self, node: &GraphNode, inputs: Inputs, _context: &NodeContext) -> Result<NodeOutput> {
        let config: CompareConfig = node.config()?;
        let comparison = if config.use_comparison_function_input {
            let name = to_string(inputs.get(Self::PORT_FUNCTION)).unwrap_or_default();
            Comparison::parse(&name)
                .ok_or_else(|| EngineError::failed(format!("Unknown comparison function '{}'", name)))?
        } else {
            config.comparison_function
        };

        let result = comparison.apply(inputs.get(Self::PORT_A), inputs.get(Self::PORT_B));

        let mut outputs = Outputs::new();
        outputs.insert(Self::PORT_OUTPUT.to_string(), DataValue::Boolean(result));
        Ok(outputs.into())
    }
}
