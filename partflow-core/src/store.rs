//! Remote object store seam
//!
//! The scheduler only interprets the fields named in the return types;
//! everything else a backend receives is pass-through.

use async_trait::async_trait;
use bytes::Bytes;

use crate::{CompletedMultipart, ObjectHead, PartResult, Result, UploadTarget};

/// Multipart-capable object store
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(&self, bucket: &str, target: &UploadTarget) -> Result<String>;

    /// Upload one part and return its entity tag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        part_number: u32,
        upload_id: &str,
        body: Bytes,
    ) -> Result<String>;

    /// Assemble the object from parts ordered by part number
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<CompletedMultipart>;

    /// Discard the upload and any stored parts
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead>;
}
