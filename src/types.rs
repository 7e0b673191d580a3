use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChannelError, DecodeError};

/// Raw envelope fields, in the key order the backend sent them.
pub type Fields = Map<String, Value>;

/// One decoded frame from the backend.
///
/// The envelope is stored as received: typed accessors read from it but
/// nothing is dropped, renamed or coerced, so echoed correlation fields
/// (`email`, `rowId`, ...) stay available to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(Fields);

impl InboundMessage {
    /// Parse a text frame. Anything that is not a JSON object is rejected.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }

    pub fn action(&self) -> Option<&str> {
        self.0.get("action").and_then(Value::as_str)
    }

    /// `isError` flag; a missing or non-boolean flag reads as `false`.
    pub fn is_error(&self) -> bool {
        self.0.get("isError").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    pub fn error(&self) -> Option<ErrorDetail> {
        match self.0.get("error")? {
            Value::String(message) => Some(ErrorDetail {
                message: message.clone(),
                detail: None,
            }),
            Value::Object(obj) => Some(ErrorDetail {
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                detail: obj.get("detail").cloned(),
            }),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True when `key` is present and equals `value` as a string.
    pub fn field_is(&self, key: &str, value: &str) -> bool {
        self.0.get(key).and_then(Value::as_str) == Some(value)
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn into_fields(self) -> Fields {
        self.0
    }
}

/// The `error` member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

/// A request for the backend: an `action` tag plus whatever fields that
/// action takes. Serialized verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutboundRequest(Fields);

impl OutboundRequest {
    pub fn new(action: impl Into<String>) -> Self {
        let mut fields = Fields::new();
        fields.insert("action".to_string(), Value::String(action.into()));
        Self(fields)
    }

    /// Add an action-specific field. `action` itself is fixed by [`Self::new`]
    /// and is not overwritten here.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "action" {
            self.0.insert(key, value.into());
        }
        self
    }

    pub fn action(&self) -> &str {
        self.0
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn fields(&self) -> &Fields {
        &self.0
    }

    pub fn encode(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl TryFrom<Fields> for OutboundRequest {
    type Error = ChannelError;

    fn try_from(fields: Fields) -> Result<Self, Self::Error> {
        match fields.get("action") {
            Some(Value::String(_)) => Ok(Self(fields)),
            _ => Err(ChannelError::MissingAction),
        }
    }
}

impl TryFrom<Value> for OutboundRequest {
    type Error = ChannelError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            _ => Err(ChannelError::MissingAction),
        }
    }
}

/// An entry of the `accounts` listing as the navigation shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub title: String,
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
