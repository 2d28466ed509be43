use std::any::Any;
use std::future::Future;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::{error::PipelineError, metrics_consts::TASKS_FAILED};

type TaskOutcome = (String, Result<(), PipelineError>);

/// A set of tasks sharing one cancellation scope. The first task to fail for any reason other
/// than cancellation cancels the scope for all the others.
pub struct TaskGroup {
    cancel: CancellationToken,
    tasks: JoinSet<TaskOutcome>,
}

impl TaskGroup {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tasks: JoinSet::new(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawns a task inside a span named after it.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let name = name.into();
        let span = info_span!("task", name = %name);
        let handle = tokio::spawn(task.instrument(span));

        // Awaiting the handle from a second task turns a panic into an outcome that still
        // carries the task name.
        self.tasks.spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(PipelineError::TaskPanicked {
                    task: name.clone(),
                    reason: panic_reason(e),
                }),
            };
            (name, result)
        });
    }

    /// Waits for every task to return. Yields the first non-cancellation error, or `Ok` when
    /// all tasks ended through cancellation or by running out of input.
    pub async fn wait(mut self) -> Result<(), PipelineError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => (
                    "supervisor".to_string(),
                    Err(PipelineError::TaskPanicked {
                        task: "supervisor".to_string(),
                        reason: panic_reason(e),
                    }),
                ),
            };

            match result {
                Ok(()) => debug!(task = %name, "Task finished"),
                Err(e) if e.is_cancellation() => debug!(task = %name, "Task cancelled"),
                Err(e) => {
                    error!(task = %name, error = %e, "Task failed");
                    metrics::counter!(TASKS_FAILED).increment(1);
                    if first_error.is_none() {
                        self.cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn panic_reason(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task was aborted".to_string();
    }

    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
