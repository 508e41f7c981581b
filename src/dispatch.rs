//! Main execution context and background task helpers
//!
//! All store mutation and listener notification is marshaled onto one
//! designated context. Other tasks submit closures to it instead of
//! touching shared state directly.

use crate::error::{SessionError, SessionResult};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The single context that owns store mutation
pub trait MainContext: Send + Sync {
    /// Queue a job. Jobs run in submission order.
    fn dispatch(&self, job: Job);
}

/// Runs jobs immediately on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineMainContext;

impl MainContext for InlineMainContext {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Runs jobs one at a time on a dedicated tokio task
#[derive(Clone)]
pub struct ChannelMainContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl ChannelMainContext {
    /// Start the context loop. It stops once every handle is dropped.
    pub fn spawn() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("Main context job panicked");
                }
            }
            tracing::debug!("Main context stopped");
        });
        (Self { tx }, handle)
    }
}

impl MainContext for ChannelMainContext {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!("Dropped job: main context is not running");
        }
    }
}

/// Run `f` on the main context and wait for its result
pub async fn invoke<R, F>(context: &dyn MainContext, f: F) -> SessionResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    context.dispatch(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await.map_err(|_| SessionError::MainContextClosed)
}

/// Spawn a fire-and-forget task whose failure is logged rather than lost
pub fn spawn_logged<F>(task: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = SessionResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(SessionError::Cancelled)) => {
                tracing::debug!(task, "Background task cancelled");
            }
            Ok(Err(e)) => {
                tracing::error!(task, error = %e, "Background task failed");
            }
            Err(_) => {
                tracing::error!(task, "Background task panicked");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_channel_context_runs_jobs_in_order() {
        let (context, _handle) = ChannelMainContext::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            context.dispatch(Box::new(move || seen.lock().unwrap().push(i)));
        }
        let total = invoke(&context, {
            let seen = seen.clone();
            move || seen.lock().unwrap().len()
        })
        .await
        .unwrap();

        assert_eq!(total, 10);
        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_channel_context_survives_panicking_job() {
        let (context, _handle) = ChannelMainContext::spawn();
        context.dispatch(Box::new(|| panic!("boom")));

        assert_eq!(invoke(&context, || 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_inline_invoke() {
        assert_eq!(invoke(&InlineMainContext, || "ok").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_spawn_logged_swallows_errors() {
        let handle = spawn_logged("failing", async {
            Err(SessionError::Connection("down".into()))
        });
        assert!(handle.await.is_ok());

        let boom: fn() -> SessionResult<()> = || panic!("boom");
        let handle = spawn_logged("panicking", async move { boom() });
        assert!(handle.await.is_ok());
    }
}
