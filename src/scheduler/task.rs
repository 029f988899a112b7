//! The executable unit handed from the queue to a worker.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::barrier::CompletionTicket;
use super::message::Payload;
use super::registry::TaskFunction;
use crate::error::TaskError;

/// A task bound to its function and argument payload.
///
/// Holds the completion ticket registered when the task entered the pool.
/// The ticket is signaled after the function returns, or when the task is
/// dropped without running.
#[derive(Debug)]
pub struct Task {
    id: String,
    function_name: String,
    function: Option<TaskFunction>,
    args: Payload,
    priority: f64,
    ticket: CompletionTicket,
}

impl Task {
    pub(crate) fn new(
        id: impl Into<String>,
        function_name: impl Into<String>,
        function: Option<TaskFunction>,
        args: Payload,
        priority: f64,
        ticket: CompletionTicket,
    ) -> Self {
        Self {
            id: id.into(),
            function_name: function_name.into(),
            function,
            args,
            priority,
            ticket,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Priority the producer submitted, before any aging.
    pub fn priority(&self) -> f64 {
        self.priority
    }

    /// Runs the bound function on the calling thread.
    ///
    /// Returns the marshaled result. Panics inside the function are caught
    /// and reported as [`TaskError::Panicked`]. Completion is signaled last,
    /// whatever the outcome.
    pub fn run(self) -> Result<String, TaskError> {
        let Task {
            function_name,
            function,
            args,
            ticket,
            ..
        } = self;

        let outcome = match function {
            Some(function) => catch_unwind(AssertUnwindSafe(|| function.call(&args)))
                .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic)))),
            None => Err(TaskError::UnknownTaskType(function_name)),
        };

        ticket.signal();
        outcome
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::barrier::CompletionBarrier;
    use crate::scheduler::registry::FunctionRegistry;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register("echo", |args: &Payload| Ok::<_, String>(args.clone()));
        registry.register("fail", |_: &Payload| Err::<(), _>("boom"));
        registry.register("explode", |_: &Payload| -> Result<(), String> {
            panic!("kaboom")
        });
        registry
    }

    fn task(barrier: &CompletionBarrier, name: &str, args: &str) -> Task {
        let function = registry().lookup(name).ok();
        Task::new(
            "task-1",
            name,
            function,
            Payload::from_json(args).expect("valid json"),
            0.0,
            barrier.register(),
        )
    }

    #[test]
    fn test_run_success_signals_completion() {
        let barrier = CompletionBarrier::new("tasks");
        let task = task(&barrier, "echo", r#"{"x":1}"#);
        assert_eq!(barrier.pending(), 1);

        let outcome = task.run();
        assert_eq!(outcome.expect("success"), r#"{"x":1}"#);
        assert_eq!(barrier.pending(), 0);
    }

    #[test]
    fn test_run_error_signals_completion() {
        let barrier = CompletionBarrier::new("tasks");
        let outcome = task(&barrier, "fail", "null").run();

        assert_eq!(outcome.expect_err("failure").to_string(), "boom");
        assert_eq!(barrier.pending(), 0);
    }

    #[test]
    fn test_run_panic_is_captured() {
        let barrier = CompletionBarrier::new("tasks");
        let outcome = task(&barrier, "explode", "null").run();

        let err = outcome.expect_err("panic captured");
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg == "kaboom"));
        assert_eq!(barrier.pending(), 0);
    }

    #[test]
    fn test_run_unknown_function() {
        let barrier = CompletionBarrier::new("tasks");
        let outcome = task(&barrier, "resize_image", "null").run();

        assert_eq!(
            outcome.expect_err("unknown").to_string(),
            "unknown task type: resize_image"
        );
        assert_eq!(barrier.pending(), 0);
    }

    #[test]
    fn test_dropped_task_signals_completion() {
        let barrier = CompletionBarrier::new("tasks");
        let task = task(&barrier, "echo", "null");
        assert_eq!(task.id(), "task-1");
        assert_eq!(task.function_name(), "echo");

        drop(task);
        assert_eq!(barrier.pending(), 0);
    }
}
