use serde::{Deserialize, Serialize};

use crate::error::OutboxError;

/// A deferred call: the symbolic target + method name plus its arguments.
///
/// Called `className`/`methodName` in the source spec; renamed here to
/// `target_name`/`method_name` because the Rust rewrite has no reflective
/// class lookup — `target_name` is whatever string a [`DispatchTable`]
/// (in `outboxer-execution`) was registered under.
///
/// [`DispatchTable`]: https://docs.rs/outboxer-execution (crate-external; see outboxer-execution::instantiator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub target_name: String,
    pub method_name: String,
    pub parameter_type_names: Vec<String>,
    pub args: Vec<ArgValue>,
}

impl Invocation {
    pub fn new(target_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            method_name: method_name.into(),
            parameter_type_names: Vec::new(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, type_name: impl Into<String>, value: ArgValue) -> Self {
        self.parameter_type_names.push(type_name.into());
        self.args.push(value);
        self
    }
}

/// The closed set of argument shapes the serializer round-trips.
///
/// §4.1 requires primitives, strings, temporal types, enums, and opaque
/// blobs; this is that set made concrete. `Json` is an escape hatch for
/// already-structured payloads that don't need a dedicated variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArgValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Timestamp(chrono::DateTime<chrono::Utc>),
    /// `type_name` is the enum's symbolic name, `variant` the chosen case.
    Enum { type_name: String, variant: String },
    /// Opaque binary payload; serialized as base64 text by `JsonSerializer`.
    Blob(Vec<u8>),
    Json(serde_json::Value),
}

/// The serializer contract (§4.1): maps an [`Invocation`] to/from text.
///
/// Implementations must round-trip every [`ArgValue`] variant. Unsupported
/// argument *values* (not variants — the variant set is closed, but within
/// it a non-finite `F64` has no JSON representation) fail at `serialize`
/// time with [`OutboxError::SerializationUnsupported`], never at
/// `deserialize` time.
pub trait Serializer: Send + Sync {
    fn serialize(&self, invocation: &Invocation) -> Result<String, OutboxError>;
    fn deserialize(&self, text: &str) -> Result<Invocation, OutboxError>;
}

/// Default serializer: JSON, matching every `_json: serde_json::Value`
/// column in the teacher's persistence layer (`order_json`, `config_json`,
/// `payload`, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, invocation: &Invocation) -> Result<String, OutboxError> {
        validate_args(&invocation.args)?;
        serde_json::to_string(invocation)
            .map_err(|e| OutboxError::SerializationUnsupported(e.to_string()))
    }

    fn deserialize(&self, text: &str) -> Result<Invocation, OutboxError> {
        serde_json::from_str(text).map_err(|e| OutboxError::SerializationUnsupported(e.to_string()))
    }
}

fn validate_args(args: &[ArgValue]) -> Result<(), OutboxError> {
    for arg in args {
        if let ArgValue::F64(f) = arg {
            if !f.is_finite() {
                return Err(OutboxError::SerializationUnsupported(format!(
                    "non-finite f64 argument ({f}) has no JSON representation"
                )));
            }
        }
    }
    Ok(())
}
