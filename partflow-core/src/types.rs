//! Core data types for partflow

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upload session identifier using ULID for time-ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(ulid::Ulid);

impl SessionId {
    /// Generate a new session id with current timestamp
    pub fn new() -> Self {
        SessionId(ulid::Ulid::new())
    }

    /// Create session id from ULID
    pub fn from_ulid(ulid: ulid::Ulid) -> Self {
        SessionId(ulid)
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(SessionId(s.parse()?))
    }
}

/// Target object and the pass-through parameters for creating its
/// multipart upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    pub key: String,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl UploadTarget {
    pub fn new(key: impl Into<String>) -> Self {
        UploadTarget {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }
}

/// One uploaded part as the completion call expects it.
///
/// Serialized with the S3 field names so resume parameters produced by
/// another coordinator can be fed back in unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartResult {
    #[serde(rename = "ETag")]
    pub tag: String,
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
}

impl PartResult {
    pub fn new(part_number: u32, tag: impl Into<String>) -> Self {
        PartResult {
            tag: tag.into(),
            part_number,
        }
    }
}

/// Parameters for joining a multipart upload created elsewhere
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeParams {
    #[serde(rename = "UploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "Offset", default)]
    pub offset: Option<u32>,
    #[serde(rename = "Parts", default)]
    pub parts: Vec<PartResult>,
}

impl ResumeParams {
    pub fn new(upload_id: impl Into<String>) -> Self {
        ResumeParams {
            upload_id: Some(upload_id.into()),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_parts(mut self, parts: Vec<PartResult>) -> Self {
        self.parts = parts;
        self
    }

    /// Part number the first newly submitted part is numbered after.
    ///
    /// An explicit offset wins; otherwise numbering continues after the
    /// supplied parts.
    pub fn base_part_number(&self) -> u32 {
        self.offset.unwrap_or(self.parts.len() as u32)
    }
}

/// Response of the remote "complete multipart upload" call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedMultipart {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub tag: Option<String>,
}

/// Response of the remote "head object" call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHead {
    pub content_length: u64,
    pub tag: Option<String>,
}

/// Result of a completed upload session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub tag: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub size: u64,
}

/// Acknowledgement of an aborted upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortAck {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub parts: usize,
}

/// Notification emitted after every successful part upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartUploaded {
    pub session: SessionId,
    pub part_number: u32,
    pub tag: String,
    pub size: usize,
}
