//! S3 backend for partflow
//!
//! Implements [`ObjectStore`](partflow_core::ObjectStore) over `aws-sdk-s3`
//! for AWS and S3-compatible endpoints.

pub mod client;
pub mod config;
pub mod error;

pub use client::S3Store;
pub use config::StorageConfig;
pub use error::S3ConfigError;
