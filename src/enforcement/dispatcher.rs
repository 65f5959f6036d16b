use crate::core::{EnforceError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Level, event};

/// Work that must run on the host's single authoritative execution context.
pub type HostJob = BoxFuture<'static, ()>;

/// Hands jobs to the host execution context.
#[async_trait]
pub trait HostDispatcher: Send + Sync {
    /// Queues `job`. Completion is observed through [`run_on_host`].
    async fn submit(&self, job: HostJob) -> Result<()>;
}

/// Runs `job` on the host context and waits for its result.
pub async fn run_on_host<T, F>(dispatcher: &dyn HostDispatcher, job: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let (reply_tx, reply_rx) = oneshot::channel();
    dispatcher
        .submit(Box::pin(async move {
            let _ = reply_tx.send(job.await);
        }))
        .await?;

    reply_rx
        .await
        .map_err(|_| EnforceError::Dispatch("host job dropped before completing".to_string()))?
}

/// Executes jobs directly on the submitting task. For hosts without threading rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

#[async_trait]
impl HostDispatcher for InlineDispatcher {
    async fn submit(&self, job: HostJob) -> Result<()> {
        job.await;
        Ok(())
    }
}

/// Single consumer task that executes jobs one at a time, in submission order.
pub struct ChannelDispatcher {
    jobs: mpsc::Sender<HostJob>,
    join_handle: Option<JoinHandle<()>>,
}

impl ChannelDispatcher {
    pub fn spawn(capacity: usize) -> Self {
        let (jobs, mut rx) = mpsc::channel::<HostJob>(capacity.max(1));
        let join_handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            event!(Level::DEBUG, "host dispatcher drained");
        });

        Self {
            jobs,
            join_handle: Some(join_handle),
        }
    }
}

#[async_trait]
impl HostDispatcher for ChannelDispatcher {
    async fn submit(&self, job: HostJob) -> Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| EnforceError::Dispatch("host context is closed".to_string()))
    }
}

impl Drop for ChannelDispatcher {
    fn drop(&mut self) {
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
