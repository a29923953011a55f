//! Uploader configuration

use serde::{Deserialize, Serialize};

use partflow_core::{Result, UploadError};

/// Default part size (5 MiB, the S3 minimum for non-final parts)
pub const DEFAULT_PART_SIZE: usize = partflow_core::MIN_PART_SIZE;

/// Default cap on concurrently outstanding part uploads
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of parts buffered ahead of the scheduler per session
pub const DEFAULT_READ_AHEAD_PARTS: usize = 2;

/// How the scheduler picks the next ready session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Uniform choice among ready sessions
    #[default]
    Random,
    /// Rotate through ready sessions in id order
    RoundRobin,
}

impl std::str::FromStr for SelectionPolicy {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SelectionPolicy::Random),
            "round-robin" => Ok(SelectionPolicy::RoundRobin),
            other => Err(UploadError::InvalidConfig(format!(
                "unknown selection policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub bucket: String,
    pub part_size: usize,
    pub concurrency: usize,
    pub read_ahead_parts: usize,
    pub selection: SelectionPolicy,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        UploaderConfig {
            bucket: String::new(),
            part_size: DEFAULT_PART_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            read_ahead_parts: DEFAULT_READ_AHEAD_PARTS,
            selection: SelectionPolicy::default(),
        }
    }
}

impl UploaderConfig {
    pub fn new(bucket: impl Into<String>) -> Self {
        UploaderConfig {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_read_ahead_parts(mut self, parts: usize) -> Self {
        self.read_ahead_parts = parts;
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(UploadError::InvalidConfig("empty bucket name".to_string()));
        }
        if self.part_size == 0 {
            return Err(UploadError::InvalidConfig("part size must be positive".to_string()));
        }
        if self.concurrency == 0 {
            return Err(UploadError::InvalidConfig("concurrency must be positive".to_string()));
        }
        if self.read_ahead_parts == 0 {
            return Err(UploadError::InvalidConfig(
                "read-ahead must cover at least one part".to_string(),
            ));
        }
        Ok(())
    }
}
