//! Port values exchanged between nodes
//!
//! `DataValue` is a tagged union serialized as `{ "type": ..., "value": ... }`.
//! The `control-flow-excluded` variant carries no payload and marks a path of
//! the graph that should not execute.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scalar kinds a port value can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Number,
    Boolean,
    Object,
    Any,
    Excluded,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Any => "any",
            Self::Excluded => "control-flow-excluded",
        }
    }
}

/// A port data type: a scalar kind, optionally as an array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct DataType {
    pub scalar: ScalarType,
    pub array: bool,
}

impl DataType {
    pub const STRING: DataType = DataType::scalar(ScalarType::String);
    pub const NUMBER: DataType = DataType::scalar(ScalarType::Number);
    pub const BOOLEAN: DataType = DataType::scalar(ScalarType::Boolean);
    pub const OBJECT: DataType = DataType::scalar(ScalarType::Object);
    pub const ANY: DataType = DataType::scalar(ScalarType::Any);
    pub const EXCLUDED: DataType = DataType::scalar(ScalarType::Excluded);
    pub const STRING_ARRAY: DataType = DataType::array_of(ScalarType::String);
    pub const NUMBER_ARRAY: DataType = DataType::array_of(ScalarType::Number);
    pub const BOOLEAN_ARRAY: DataType = DataType::array_of(ScalarType::Boolean);
    pub const OBJECT_ARRAY: DataType = DataType::array_of(ScalarType::Object);
    pub const ANY_ARRAY: DataType = DataType::array_of(ScalarType::Any);

    pub const fn scalar(scalar: ScalarType) -> Self {
        Self { scalar, array: false }
    }

    pub const fn array_of(scalar: ScalarType) -> Self {
        Self { scalar, array: true }
    }

    /// The element type of an array type, or the type itself
    pub fn element_type(&self) -> DataType {
        DataType::scalar(self.scalar)
    }

    /// The array form of this type
    pub fn to_array(&self) -> DataType {
        DataType::array_of(self.scalar)
    }

    pub fn is_any(&self) -> bool {
        self.scalar == ScalarType::Any
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scalar.as_str())?;
        if self.array {
            f.write_str("[]")?;
        }
        Ok(())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, array) = match s.strip_suffix("[]") {
            Some(base) => (base, true),
            None => (s, false),
        };
        let scalar = match base {
            "string" => ScalarType::String,
            "number" => ScalarType::Number,
            "boolean" => ScalarType::Boolean,
            "object" => ScalarType::Object,
            "any" => ScalarType::Any,
            "control-flow-excluded" => ScalarType::Excluded,
            other => return Err(format!("Unknown data type '{}'", other)),
        };
        Ok(Self { scalar, array })
    }
}

impl From<DataType> for String {
    fn from(value: DataType) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for DataType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Why a value was excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExclusionReason {
    /// Emitted by a loop controller on `break` while the loop keeps going
    #[serde(rename = "loop-not-broken")]
    LoopNotBroken,
}

/// JSON object payload
pub type ObjectValue = serde_json::Map<String, serde_json::Value>;

/// Numbers on the wire
///
/// JSON has no NaN or infinities, so those are written as the strings
/// `"NaN"`, `"Infinity"` and `"-Infinity"`. A `null` reads back as NaN.
mod number {
    use serde::de::{self, Deserializer, Visitor};
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    pub fn serialize<S: Serializer>(n: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if n.is_nan() {
            serializer.serialize_str("NaN")
        } else if n.is_infinite() {
            serializer.serialize_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            serializer.serialize_f64(*n)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(NumberVisitor)
    }

    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a number, \"NaN\", \"Infinity\" or \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            match v {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Wire(#[serde(with = "self")] f64);

    pub mod array {
        use super::*;

        pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(values.iter().map(|n| Wire(*n)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
            let values = Vec::<Wire>::deserialize(deserializer)?;
            Ok(values.into_iter().map(|Wire(n)| n).collect())
        }
    }
}

/// A value carried on a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataValue {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "number")]
    Number(#[serde(with = "number")] f64),
    #[serde(rename = "boolean")]
    Boolean(bool),
    #[serde(rename = "object")]
    Object(ObjectValue),
    #[serde(rename = "any")]
    Any(serde_json::Value),
    #[serde(rename = "string[]")]
    StringArray(Vec<String>),
    #[serde(rename = "number[]")]
    NumberArray(#[serde(with = "number::array")] Vec<f64>),
    #[serde(rename = "boolean[]")]
    BooleanArray(Vec<bool>),
    #[serde(rename = "object[]")]
    ObjectArray(Vec<ObjectValue>),
    #[serde(rename = "any[]")]
    AnyArray(Vec<serde_json::Value>),
    #[serde(rename = "control-flow-excluded")]
    Excluded(Option<ExclusionReason>),
}

impl DataValue {
    /// A plain excluded value
    pub fn excluded() -> Self {
        Self::Excluded(None)
    }

    /// The excluded value a loop controller emits while still looping
    pub fn loop_not_broken() -> Self {
        Self::Excluded(Some(ExclusionReason::LoopNotBroken))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Excluded(_))
    }

    /// Whether this is the loop-not-broken exclusion
    pub fn is_waiting_for_loop(&self) -> bool {
        matches!(self, Self::Excluded(Some(ExclusionReason::LoopNotBroken)))
    }

    /// The data type of this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::STRING,
            Self::Number(_) => DataType::NUMBER,
            Self::Boolean(_) => DataType::BOOLEAN,
            Self::Object(_) => DataType::OBJECT,
            Self::Any(_) => DataType::ANY,
            Self::StringArray(_) => DataType::STRING_ARRAY,
            Self::NumberArray(_) => DataType::NUMBER_ARRAY,
            Self::BooleanArray(_) => DataType::BOOLEAN_ARRAY,
            Self::ObjectArray(_) => DataType::OBJECT_ARRAY,
            Self::AnyArray(_) => DataType::ANY_ARRAY,
            Self::Excluded(_) => DataType::EXCLUDED,
        }
    }

    pub fn is_array(&self) -> bool {
        self.data_type().array
    }

    /// Number of elements for array values
    pub fn array_len(&self) -> Option<usize> {
        match self {
            Self::StringArray(v) => Some(v.len()),
            Self::NumberArray(v) => Some(v.len()),
            Self::BooleanArray(v) => Some(v.len()),
            Self::ObjectArray(v) => Some(v.len()),
            Self::AnyArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Element `index` of an array value as a scalar value
    pub fn element(&self, index: usize) -> Option<DataValue> {
        match self {
            Self::StringArray(v) => v.get(index).cloned().map(Self::String),
            Self::NumberArray(v) => v.get(index).copied().map(Self::Number),
            Self::BooleanArray(v) => v.get(index).copied().map(Self::Boolean),
            Self::ObjectArray(v) => v.get(index).cloned().map(Self::Object),
            Self::AnyArray(v) => v.get(index).cloned().map(Self::Any),
            _ => None,
        }
    }

    /// Array elements as scalar values; scalars become a one-element list
    pub fn elements(&self) -> Vec<DataValue> {
        match self.array_len() {
            Some(len) => (0..len).filter_map(|i| self.element(i)).collect(),
            None => vec![self.clone()],
        }
    }

    /// Collect scalar values into an array value
    ///
    /// Uniform scalars produce the matching typed array; anything else
    /// falls back to `any[]`.
    pub fn from_elements(values: Vec<DataValue>) -> DataValue {
        let first = values.first().map(|v| v.data_type());
        let uniform = first
            .map(|t| !t.array && values.iter().all(|v| v.data_type() == t))
            .unwrap_or(false);

        if uniform {
            match first.map(|t| t.scalar) {
                Some(ScalarType::String) => {
                    return Self::StringArray(
                        values
                            .into_iter()
                            .filter_map(|v| match v {
                                Self::String(s) => Some(s),
                                _ => None,
                            })
                            .collect(),
                    )
                }
                Some(ScalarType::Number) => {
                    return Self::NumberArray(
                        values
                            .into_iter()
                            .filter_map(|v| match v {
                                Self::Number(n) => Some(n),
                                _ => None,
                            })
                            .collect(),
                    )
                }
                Some(ScalarType::Boolean) => {
                    return Self::BooleanArray(
                        values
                            .into_iter()
                            .filter_map(|v| match v {
                                Self::Boolean(b) => Some(b),
                                _ => None,
                            })
                            .collect(),
                    )
                }
                Some(ScalarType::Object) => {
                    return Self::ObjectArray(
                        values
                            .into_iter()
                            .filter_map(|v| match v {
                                Self::Object(o) => Some(o),
                                _ => None,
                            })
                            .collect(),
                    )
                }
                _ => {}
            }
        }

        Self::AnyArray(values.iter().map(DataValue::to_json).collect())
    }

    /// The raw payload as JSON
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Object(o) => Value::Object(o.clone()),
            Self::Any(v) => v.clone(),
            Self::StringArray(v) => Value::from(v.clone()),
            Self::NumberArray(v) => Value::from(v.clone()),
            Self::BooleanArray(v) => Value::from(v.clone()),
            Self::ObjectArray(v) => Value::Array(v.iter().cloned().map(Value::Object).collect()),
            Self::AnyArray(v) => Value::Array(v.clone()),
            Self::Excluded(_) => Value::Null,
        }
    }

    /// Infer a typed value from raw JSON
    pub fn infer(value: serde_json::Value) -> DataValue {
        use serde_json::Value;
        match value {
            Value::String(s) => Self::String(s),
            Value::Bool(b) => Self::Boolean(b),
            Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Any(Value::Null)),
            Value::Object(o) => Self::Object(o),
            Value::Array(items) => Self::from_elements(items.into_iter().map(Self::infer).collect()),
            Value::Null => Self::Any(Value::Null),
        }
    }

    /// Placeholder value for a type before anything was produced
    pub fn default_for(data_type: DataType) -> DataValue {
        if data_type.array {
            return match data_type.scalar {
                ScalarType::String => Self::StringArray(Vec::new()),
                ScalarType::Number => Self::NumberArray(Vec::new()),
                ScalarType::Boolean => Self::BooleanArray(Vec::new()),
                ScalarType::Object => Self::ObjectArray(Vec::new()),
                _ => Self::AnyArray(Vec::new()),
            };
        }
        match data_type.scalar {
            ScalarType::String => Self::String(String::new()),
            ScalarType::Number => Self::Number(0.0),
            ScalarType::Boolean => Self::Boolean(false),
            ScalarType::Object => Self::Object(ObjectValue::new()),
            ScalarType::Any => Self::Any(serde_json::Value::Null),
            ScalarType::Excluded => Self::excluded(),
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for DataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for DataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}
