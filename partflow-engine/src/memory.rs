//! In-memory object store for tests and benchmarks
//!
//! Behaves like a strict S3 backend: completion requires ascending part
//! numbers and tags matching stored parts. Parts can be delayed or made to
//! fail, and the store records the concurrency it observed.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use partflow_core::*;

/// A call the store served, in completion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateMultipartUpload { key: String, upload_id: String },
    UploadPart { key: String, upload_id: String, part_number: u32, size: usize },
    CompleteMultipartUpload { key: String, upload_id: String, parts: Vec<PartResult> },
    AbortMultipartUpload { key: String, upload_id: String, parts: Vec<PartResult> },
    HeadObject { key: String },
}

struct MemoryUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct MemoryState {
    next_upload: u64,
    uploads: HashMap<String, MemoryUpload>,
    objects: HashMap<(String, String), Bytes>,
    calls: Vec<StoreCall>,
    failed_parts: Vec<u32>,
    part_delays: HashMap<u32, Duration>,
    failing_parts: HashSet<u32>,
    fail_create: bool,
    create_delay: Option<Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the upload of `part_number` for `delay` before storing it
    pub fn delay_part(&self, part_number: u32, delay: Duration) {
        self.state.lock().part_delays.insert(part_number, delay);
    }

    /// Make every upload of `part_number` fail
    pub fn fail_part(&self, part_number: u32) {
        self.state.lock().failing_parts.insert(part_number);
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    pub fn delay_create(&self, delay: Duration) {
        self.state.lock().create_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().calls.clone()
    }

    /// Part numbers stored, in the order the uploads finished
    pub fn uploaded_parts(&self) -> Vec<u32> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::UploadPart { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    pub fn failed_parts(&self) -> Vec<u32> {
        self.state.lock().failed_parts.clone()
    }

    /// Highest number of part uploads observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Multipart uploads neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(&self, bucket: &str, target: &UploadTarget) -> Result<String> {
        let (fail, delay) = {
            let state = self.state.lock();
            (state.fail_create, state.create_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(UploadError::remote(
                RemoteOperation::CreateMultipartUpload,
                "injected failure",
            ));
        }

        let mut state = self.state.lock();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            MemoryUpload {
                bucket: bucket.to_string(),
                key: target.key.clone(),
                parts: BTreeMap::new(),
            },
        );
        state.calls.push(StoreCall::CreateMultipartUpload {
            key: target.key.clone(),
            upload_id: upload_id.clone(),
        });
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        part_number: u32,
        upload_id: &str,
        body: Bytes,
    ) -> Result<String> {
        let (delay, fail) = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            (
                state.part_delays.get(&part_number).copied(),
                state.failing_parts.contains(&part_number),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;

        if fail {
            state.failed_parts.push(part_number);
            return Err(UploadError::remote(RemoteOperation::UploadPart, "injected failure"));
        }

        let tag = format!("\"{}-{}\"", upload_id, part_number);
        let size = body.len();
        let upload = state.uploads.get_mut(upload_id).ok_or_else(|| {
            UploadError::remote(RemoteOperation::UploadPart, format!("no such upload {}", upload_id))
        })?;
        upload.parts.insert(part_number, (tag.clone(), body));
        state.calls.push(StoreCall::UploadPart {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            part_number,
            size,
        });
        Ok(tag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<CompletedMultipart> {
        let mut state = self.state.lock();
        state.calls.push(StoreCall::CompleteMultipartUpload {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        });

        let invalid = |message: String| {
            UploadError::remote(RemoteOperation::CompleteMultipartUpload, message)
        };

        if parts.windows(2).any(|pair| pair[0].part_number >= pair[1].part_number) {
            return Err(invalid("InvalidPartOrder".to_string()));
        }

        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| invalid(format!("no such upload {}", upload_id)))?;

        let mut object = BytesMut::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((tag, body)) if *tag == part.tag => object.extend_from_slice(body),
                _ => return Err(invalid(format!("InvalidPart {}", part.part_number))),
            }
        }

        let upload_bucket = upload.bucket.clone();
        let upload_key = upload.key.clone();
        state.uploads.remove(upload_id);
        state
            .objects
            .insert((upload_bucket.clone(), upload_key.clone()), object.freeze());

        Ok(CompletedMultipart {
            location: Some(format!("memory://{}/{}", bucket, key)),
            bucket: upload_bucket,
            key: upload_key,
            tag: Some(format!("\"{}-{}\"", upload_id, parts.len())),
        })
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(StoreCall::AbortMultipartUpload {
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        });
        state.uploads.remove(upload_id).map(|_| ()).ok_or_else(|| {
            UploadError::remote(
                RemoteOperation::AbortMultipartUpload,
                format!("no such upload {}", upload_id),
            )
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let mut state = self.state.lock();
        state.calls.push(StoreCall::HeadObject { key: key.to_string() });
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| ObjectHead {
                content_length: object.len() as u64,
                tag: None,
            })
            .ok_or_else(|| UploadError::remote(RemoteOperation::HeadObject, "NoSuchKey"))
    }
}
