use crate::server::proxy::{BackendReply, ForwardRequest, ProxyError};
use tokio::sync::oneshot;

/// Outcome a worker delivers for one forwarded request.
pub type TaskResult = Result<BackendReply, ProxyError>;

/// A message sent from the [`BoundedDispatcher`] to the worker tasks.
///
/// All workers pull from one shared FIFO queue, so whichever worker is idle
/// first takes the oldest message.
///
/// [`BoundedDispatcher`]: super::manager::BoundedDispatcher
#[derive(Debug)]
pub enum WorkRequest {
    /// Forward one admitted request to the backend.
    ///
    /// - `request`: what to forward.
    /// - `reply`: where to deliver the result. The caller may have stopped
    ///   listening by the time the task finishes; the result is then dropped.
    Forward {
        request: ForwardRequest,
        reply: oneshot::Sender<TaskResult>,
    },

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   left its loop.
    Shutdown { response: oneshot::Sender<()> },
}
