//! Wire types exchanged with the store.
//!
//! - `Payload`: opaque JSON argument payload, passed through verbatim
//! - `TaskMessage`: the submission message stored per task id
//! - `TaskStatus` / `ResultEnvelope`: the outcome written back per task id

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::error::TaskError;

/// Opaque JSON payload.
///
/// The text is kept exactly as the producer wrote it; nothing in the engine
/// looks inside. Task functions call [`Payload::parse`] to decode it into
/// their own argument type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// The JSON `null` payload.
    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    /// Wraps raw JSON text, validating that it is well-formed.
    pub fn from_json(text: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(text.into()).map(Self)
    }

    /// Decodes the payload into a concrete type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }

    /// Returns the raw JSON text.
    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Submission message stored under a task id.
///
/// `{ "task": "<function name>", "args": <json>, "priority": <number> }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    /// Registered function name.
    pub task: String,
    /// Arguments handed to the function unchanged.
    #[serde(default)]
    pub args: Payload,
    /// Lower values are served sooner. Missing or `null` means 0.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub priority: f64,
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}

impl TaskMessage {
    pub fn new(task: impl Into<String>, args: Payload) -> Self {
        Self {
            task: task.into(),
            args,
            priority: 0.0,
        }
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Decodes a stored message.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Encodes the message for storage.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outcome of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Fail,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Fail => write!(f, "Fail"),
        }
    }
}

/// Result record persisted per task id.
///
/// `msg` holds the marshaled function result on success and the error text
/// on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: TaskStatus,
    pub msg: String,
}

impl ResultEnvelope {
    /// Creates a successful envelope from an already marshaled result.
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Success,
            msg: msg.into(),
        }
    }

    /// Creates a failed envelope from a task error.
    pub fn failure(error: &TaskError) -> Self {
        Self {
            status: TaskStatus::Fail,
            msg: error.to_string(),
        }
    }

    /// Builds the envelope for a finished task.
    pub fn from_outcome(outcome: &Result<String, TaskError>) -> Self {
        match outcome {
            Ok(marshaled) => Self::success(marshaled.as_str()),
            Err(e) => Self::failure(e),
        }
    }

    /// Returns whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Encodes the envelope for storage.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a stored envelope.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
