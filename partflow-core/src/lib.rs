//! Core data models, errors and the object store seam for partflow

pub mod error;
pub mod store;
pub mod types;

pub use error::*;
pub use store::ObjectStore;
pub use types::*;

/// Result type alias for partflow operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Smallest part size S3 accepts for every part but the last (5 MiB)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Highest part number S3 accepts
pub const MAX_PART_NUMBER: u32 = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_remote_error_display() {
        let err = UploadError::remote(RemoteOperation::UploadPart, "connection reset");
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "UploadPart failed: connection reset");
    }

    #[test]
    fn test_target_builder() {
        let target = UploadTarget::new("books/dune.epub")
            .with_content_type("application/epub+zip")
            .with_metadata("owner", "atreides");

        assert_eq!(target.key, "books/dune.epub");
        assert_eq!(target.content_type.as_deref(), Some("application/epub+zip"));
        assert_eq!(target.metadata.get("owner").map(String::as_str), Some("atreides"));
    }
}
