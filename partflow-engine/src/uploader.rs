//! Public uploader handle

use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::info;

use partflow_core::*;

use crate::config::UploaderConfig;
use crate::finalizer;
use crate::registry::StartUpload;
use crate::scheduler::{Command, FinalizeKind, Scheduler, SchedulerStats};

/// Capacity of the part-uploaded notification channel
const PROGRESS_CAPACITY: usize = 1024;

/// Cloneable handle to a running scheduler.
///
/// The scheduler task stops once the last handle is dropped; parts already
/// dispatched keep running to completion.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    commands: mpsc::UnboundedSender<Command>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
    progress: broadcast::Sender<PartUploaded>,
}

impl Uploader {
    /// Validate `config` and start the scheduler task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn ObjectStore>, config: UploaderConfig) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        info!(
            "Starting uploader for bucket {} (part size {}, concurrency {}, {:?} selection)",
            config.bucket, config.part_size, config.concurrency, config.selection
        );

        let bucket = config.bucket.clone();
        let scheduler = Scheduler::new(config, store.clone(), events, progress.clone());
        tokio::spawn(scheduler.run(command_rx, event_rx));

        Ok(Uploader {
            inner: Arc::new(UploaderInner {
                commands,
                store,
                bucket,
                progress,
            }),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.inner.bucket
    }

    /// Register a session and start slicing its source.
    ///
    /// Returns as soon as the session is registered; remote creation of the
    /// multipart upload continues in the background.
    pub async fn start_upload(&self, request: StartUpload) -> Result<SessionId> {
        request.validate()?;
        self.request(|reply| Command::Start { request, reply }).await?
    }

    /// Remote multipart upload id of a session
    pub async fn upload_id(&self, id: SessionId) -> Result<String> {
        let upload_id = self.request(|reply| Command::UploadId { id, reply }).await??;
        upload_id.await
    }

    /// Results of every part submitted so far, in submission order
    pub async fn parts(&self, id: SessionId) -> Result<Vec<PartResult>> {
        let parts = self.request(|reply| Command::Parts { id, reply }).await??;
        try_join_all(parts).await
    }

    /// Wait for the source to be fully uploaded, then complete the object.
    ///
    /// On failure the session stays registered so it can be retried or
    /// aborted.
    pub async fn complete_upload(&self, id: SessionId) -> Result<CompletedUpload> {
        let ticket = self
            .request(|reply| Command::Finalize {
                id,
                kind: FinalizeKind::Complete,
                reply,
            })
            .await??;

        ticket.sliced.clone().await?;
        let parts = self.request(|reply| Command::Parts { id, reply }).await??;
        let completed =
            finalizer::complete(self.inner.store.as_ref(), &self.inner.bucket, &ticket, parts)
                .await?;

        ticket.finish();
        Ok(completed)
    }

    /// Stop reading the source, wait for dispatched parts and abort
    pub async fn abort_upload(&self, id: SessionId) -> Result<AbortAck> {
        let ticket = self
            .request(|reply| Command::Finalize {
                id,
                kind: FinalizeKind::Abort,
                reply,
            })
            .await??;

        let parts = self.request(|reply| Command::Parts { id, reply }).await??;
        let ack =
            finalizer::abort(self.inner.store.as_ref(), &self.inner.bucket, &ticket, parts).await?;

        ticket.finish();
        Ok(ack)
    }

    /// Complete every session registered at call time
    pub async fn complete_all(&self) -> Result<Vec<CompletedUpload>> {
        let ids = self.request(|reply| Command::Ids { reply }).await?;
        try_join_all(ids.into_iter().map(|id| self.complete_upload(id))).await
    }

    /// Abort every session registered at call time
    pub async fn abort_all(&self) -> Result<Vec<AbortAck>> {
        let ids = self.request(|reply| Command::Ids { reply }).await?;
        try_join_all(ids.into_iter().map(|id| self.abort_upload(id))).await
    }

    /// Notifications for every successfully uploaded part
    pub fn subscribe(&self) -> broadcast::Receiver<PartUploaded> {
        self.inner.progress.subscribe()
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.request(|reply| Command::Stats { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(build(reply))
            .map_err(|_| UploadError::Shutdown)?;
        response.await.map_err(|_| UploadError::Shutdown)
    }
}
