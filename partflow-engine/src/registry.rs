//! Upload session registry
//!
//! Owns one record per logical upload. Only the scheduler task touches it,
//! so records are plain data with no interior locking.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tracing::info;

use partflow_core::*;

use crate::config::UploaderConfig;
use crate::source::{BoxedSource, PartReader};

/// A result any number of waiters can await
pub(crate) type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

pub(crate) fn ready_shared<T>(value: Result<T>) -> SharedResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    futures::future::ready(value).boxed().shared()
}

/// Run `fut` as its own task so it makes progress whether or not anyone
/// is awaiting the shared handle yet.
pub(crate) fn spawn_shared<T, F>(fut: F) -> SharedResult<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let handle = tokio::spawn(fut);
    async move {
        handle
            .await
            .map_err(|e| UploadError::Internal(format!("upload task failed: {}", e)))?
    }
    .boxed()
    .shared()
}

/// Everything needed to open a session
pub struct StartUpload {
    pub target: UploadTarget,
    pub source: Option<BoxedSource>,
    pub metadata: Option<serde_json::Value>,
    pub resume: Option<ResumeParams>,
}

impl StartUpload {
    pub fn new(target: UploadTarget) -> Self {
        StartUpload {
            target,
            source: None,
            metadata: None,
            resume: None,
        }
    }

    pub fn with_source<R>(mut self, source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_resume(mut self, resume: ResumeParams) -> Self {
        self.resume = Some(resume);
        self
    }

    /// Reject requests that can never succeed, before any remote call
    pub fn validate(&self) -> Result<()> {
        if self.target.key.is_empty() {
            return Err(UploadError::MissingKey);
        }
        if let Some(resume) = &self.resume {
            match resume.upload_id.as_deref() {
                Some(upload_id) if !upload_id.is_empty() => {}
                _ => return Err(UploadError::MissingUploadHandle),
            }
            if resume.parts.len() >= MAX_PART_NUMBER as usize
                || resume.base_part_number() >= MAX_PART_NUMBER
            {
                return Err(UploadError::InvalidResume(format!(
                    "offset {} with {} parts leaves no part number at or below {}",
                    resume.base_part_number(),
                    resume.parts.len(),
                    MAX_PART_NUMBER
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StartUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartUpload")
            .field("target", &self.target)
            .field("source", &self.source.is_some())
            .field("metadata", &self.metadata)
            .field("resume", &self.resume)
            .finish()
    }
}

/// Bookkeeping for one upload
pub(crate) struct Session {
    pub id: SessionId,
    pub target: UploadTarget,
    pub upload_id: SharedResult<String>,
    pub parts: Vec<SharedResult<PartResult>>,
    pub reader: Option<PartReader>,
    pub metadata: Option<serde_json::Value>,
    /// Resolves once the source has been cut into parts completely
    pub sliced: SharedResult<()>,
    pub finalizing: bool,
    seeded: usize,
    base_part_number: u32,
    sliced_tx: Option<oneshot::Sender<Result<()>>>,
}

impl Session {
    /// Number for the next part this session submits, or `None` once the
    /// session has used up every valid part number
    pub fn next_part_number(&self) -> Option<u32> {
        u32::try_from(self.submitted())
            .ok()
            .and_then(|submitted| self.base_part_number.checked_add(submitted))
            .and_then(|last| last.checked_add(1))
            .filter(|next| *next <= MAX_PART_NUMBER)
    }

    /// Parts submitted by this session, excluding resumed ones
    pub fn submitted(&self) -> usize {
        self.parts.len() - self.seeded
    }

    pub fn push_part(&mut self, part: SharedResult<PartResult>) {
        self.parts.push(part);
    }

    /// Record that no further parts will come from the source
    pub fn mark_sliced(&mut self, outcome: Result<()>) {
        self.reader = None;
        if let Some(tx) = self.sliced_tx.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Stop reading the source; already dispatched parts are unaffected
    pub fn close(&mut self) {
        self.fail(UploadError::Source(
            "source closed before end of stream".to_string(),
        ));
    }

    /// Stop reading the source and fail any pending completion with `error`
    pub fn fail(&mut self, error: UploadError) {
        if let Some(reader) = self.reader.take() {
            reader.close();
        }
        self.mark_sliced(Err(error));
    }
}

/// Indexed storage of sessions
#[derive(Default)]
pub(crate) struct Registry {
    sessions: HashMap<SessionId, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a new session.
    ///
    /// Remote creation is started in the background; nothing is awaited.
    pub fn create<F>(
        &mut self,
        request: StartUpload,
        store: &Arc<dyn ObjectStore>,
        config: &UploaderConfig,
        on_ready: F,
    ) -> Result<SessionId>
    where
        F: Fn(SessionId) + Send + 'static,
    {
        request.validate()?;

        let mut id = SessionId::new();
        while self.sessions.contains_key(&id) {
            id = SessionId::new();
        }

        let StartUpload {
            target,
            source,
            metadata,
            resume,
        } = request;

        let (upload_id, parts, base_part_number) = match resume {
            Some(resume) => {
                let base = resume.base_part_number();
                let upload_id = resume.upload_id.unwrap_or_default();
                let parts: Vec<_> = resume
                    .parts
                    .into_iter()
                    .map(|part| ready_shared(Ok(part)))
                    .collect();
                (ready_shared(Ok(upload_id)), parts, base)
            }
            None => {
                let store = store.clone();
                let bucket = config.bucket.clone();
                let target = target.clone();
                let upload_id = spawn_shared(async move {
                    store.create_multipart_upload(&bucket, &target).await
                });
                (upload_id, Vec::new(), 0)
            }
        };

        let reader = source.map(|source| {
            PartReader::spawn(source, config.part_size, config.read_ahead_parts, move || {
                on_ready(id)
            })
        });

        let (sliced_tx, sliced) = if reader.is_some() {
            let (tx, rx) = oneshot::channel();
            let sliced = rx
                .map(|outcome| {
                    outcome.unwrap_or_else(|_| {
                        Err(UploadError::Internal("session dropped".to_string()))
                    })
                })
                .boxed()
                .shared();
            (Some(tx), sliced)
        } else {
            (None, ready_shared(Ok(())))
        };

        info!(
            "Registered upload session {} for key {} (resumed parts: {}, first part: {})",
            id,
            target.key,
            parts.len(),
            base_part_number + 1
        );

        let seeded = parts.len();
        self.sessions.insert(
            id,
            Session {
                id,
                target,
                upload_id,
                parts,
                reader,
                metadata,
                sliced,
                finalizing: false,
                seeded,
                base_part_number,
                sliced_tx,
            },
        );

        Ok(id)
    }

    pub fn get(&self, id: &SessionId) -> Result<&Session> {
        self.sessions
            .get(id)
            .ok_or(UploadError::UnknownSession(*id))
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or(UploadError::UnknownSession(*id))
    }

    /// Remove a session; removing an absent id is a no-op
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
