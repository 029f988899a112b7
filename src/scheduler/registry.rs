//! Function registry: task-type name to executable function.
//!
//! Functions are registered with their natural signature
//! `Fn(&Payload) -> Result<T, E>` and stored behind one erased shape that
//! also marshals the result, so a marshaling failure is reported the same
//! way as a function error.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::Serialize;

use super::message::Payload;
use crate::error::TaskError;

type ErasedFn = dyn Fn(&Payload) -> Result<String, TaskError> + Send + Sync;

/// A registered function, ready to call.
#[derive(Clone)]
pub struct TaskFunction {
    name: Arc<str>,
    inner: Arc<ErasedFn>,
}

impl std::fmt::Debug for TaskFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TaskFunction {
    /// Calls the function and returns the marshaled result.
    pub fn call(&self, args: &Payload) -> Result<String, TaskError> {
        (self.inner)(args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Mapping from task-type name to function.
///
/// Populated before the pool starts; the pool freezes it behind an `Arc` when
/// it runs.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, TaskFunction>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous entry.
    ///
    /// The function's error is rendered with `Display` into the result
    /// envelope; its value is serialized to JSON.
    pub fn register<F, T, E>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&Payload) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize,
        E: Display,
    {
        let name: String = name.into();
        let erased = move |args: &Payload| -> Result<String, TaskError> {
            let value = function(args).map_err(|e| TaskError::Function(e.to_string()))?;
            serde_json::to_string(&value).map_err(TaskError::Marshal)
        };
        let previous = self.functions.insert(
            name.clone(),
            TaskFunction {
                name: Arc::from(name.as_str()),
                inner: Arc::new(erased),
            },
        );
        if previous.is_some() {
            tracing::debug!(function = %name, "Replaced registered task function");
        }
    }

    /// Looks up a function by name.
    pub fn lookup(&self, name: &str) -> Result<TaskFunction, TaskError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::UnknownTaskType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
