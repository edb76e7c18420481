use core::any::Any;
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use thiserror::Error;

/// Failure of a single task, observable through its [`TaskFuture`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The task panicked during execution; the payload is the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was dropped without ever running, so no result will arrive.
    #[error("task dropped before producing a result")]
    Dropped,
}

/// Outcome of a task submitted with `submit_with_result`.
pub type TaskResult<R> = Result<R, TaskError>;

/// One-shot handle to a task's eventual return value.
///
/// The sending half lives inside the task's closure cell; the value (or the
/// task's panic) is published exactly once, on the first run of the graph.
#[derive(Debug)]
#[must_use]
pub struct TaskFuture<R> {
    rx: Receiver<TaskResult<R>>,
}

impl<R> TaskFuture<R> {
    /// Block the calling thread until the result is available.
    pub fn wait(self) -> TaskResult<R> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(TaskError::Dropped),
        }
    }

    /// Poll for the result without blocking. `None` means the task has not
    /// finished yet.
    pub fn try_wait(&self) -> Option<TaskResult<R>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Dropped)),
        }
    }
}

pub(crate) fn result_channel<R>() -> (Sender<TaskResult<R>>, TaskFuture<R>) {
    let (tx, rx) = bounded(1);
    (tx, TaskFuture { rx })
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
