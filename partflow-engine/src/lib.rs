//! Bounded-concurrency multipart upload scheduler
//!
//! Slices byte sources into fixed-size parts and uploads them through an
//! [`ObjectStore`](partflow_core::ObjectStore) with a global cap on parts in
//! flight, then completes or aborts each upload.

pub mod config;
pub mod source;
pub mod uploader;

mod finalizer;
mod registry;
mod scheduler;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use config::{SelectionPolicy, UploaderConfig};
pub use registry::StartUpload;
pub use scheduler::SchedulerStats;
pub use source::{BoxedSource, Drain, PartReader};
pub use uploader::Uploader;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryStore, StoreCall};
