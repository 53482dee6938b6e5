//! Value codec: turns raw parameter slices into typed values and responses
//! into wire text. The engine only talks to the [`ValueCodec`] trait.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::response::JsonRpcMessage;

/// Declared type of a parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamType {
    #[default]
    Any,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
    /// `null` or the inner type
    Nullable(Box<ParamType>),
}

impl ParamType {
    pub fn nullable(inner: ParamType) -> Self {
        ParamType::Nullable(Box::new(inner))
    }

    /// Whether a decoded value conforms to this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::Any => true,
            ParamType::Bool => value.is_boolean(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Nullable(inner) => value.is_null() || inner.accepts(value),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Any => f.write_str("any"),
            ParamType::Bool => f.write_str("boolean"),
            ParamType::Integer => f.write_str("integer"),
            ParamType::Number => f.write_str("number"),
            ParamType::String => f.write_str("string"),
            ParamType::Array => f.write_str("array"),
            ParamType::Object => f.write_str("object"),
            ParamType::Nullable(inner) => write!(f, "{}?", inner),
        }
    }
}

/// Codec failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed value: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: ParamType,
        found: &'static str,
    },
}

/// Pluggable decoder/encoder for parameter values and responses
pub trait ValueCodec: Send + Sync {
    /// Decode one raw JSON slice as the given type
    fn decode(&self, raw: &str, ty: &ParamType) -> Result<Value, CodecError>;

    /// Encode a finished response into wire text
    fn encode(&self, message: &JsonRpcMessage) -> Result<String, CodecError>;
}

/// `serde_json` backed codec with strict type checks
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn decode(&self, raw: &str, ty: &ParamType) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_str(raw)?;
        if ty.accepts(&value) {
            Ok(value)
        } else {
            Err(CodecError::TypeMismatch {
                expected: ty.clone(),
                found: value_kind(&value),
            })
        }
    }

    fn encode(&self, message: &JsonRpcMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
