//! Integration tests for completing and aborting sessions

use partflow_core::*;
use partflow_engine::*;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

fn uploader(store: &Arc<MemoryStore>) -> Uploader {
    let config = UploaderConfig::new("media").with_part_size(4).with_concurrency(2);
    Uploader::new(store.clone(), config).unwrap()
}

async fn start(uploader: &Uploader, key: &str, data: &[u8]) -> SessionId {
    uploader
        .start_upload(StartUpload::new(UploadTarget::new(key)).with_source(Cursor::new(data.to_vec())))
        .await
        .unwrap()
}

/// Yields its data, then fails the next read
struct FailingSource {
    data: Option<Vec<u8>>,
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "peer went away",
            ))),
        }
    }
}

#[tokio::test]
async fn completion_returns_metadata_and_removes_session() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);

    let id = uploader
        .start_upload(
            StartUpload::new(UploadTarget::new("report.pdf").with_content_type("application/pdf"))
                .with_source(Cursor::new(vec![0u8; 9]))
                .with_metadata(serde_json::json!({"owner": 42})),
        )
        .await
        .unwrap();

    let completed = uploader.complete_upload(id).await.unwrap();

    assert_eq!(completed.bucket, "media");
    assert_eq!(completed.key, "report.pdf");
    assert_eq!(completed.size, 9);
    assert_eq!(completed.metadata, Some(serde_json::json!({"owner": 42})));
    assert_eq!(completed.location.as_deref(), Some("memory://media/report.pdf"));
    assert_eq!(uploader.stats().await.unwrap().sessions, 0);
}

#[tokio::test]
async fn operations_after_completion_fail_with_unknown_session() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let id = start(&uploader, "once.bin", b"12345678").await;

    uploader.complete_upload(id).await.unwrap();

    assert_eq!(
        uploader.complete_upload(id).await.unwrap_err(),
        UploadError::UnknownSession(id)
    );
    assert_eq!(
        uploader.abort_upload(id).await.unwrap_err(),
        UploadError::UnknownSession(id)
    );
    assert_eq!(uploader.parts(id).await.unwrap_err(), UploadError::UnknownSession(id));
    assert_eq!(uploader.upload_id(id).await.unwrap_err(), UploadError::UnknownSession(id));
}

#[tokio::test]
async fn operations_after_abort_fail_with_unknown_session() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let id = start(&uploader, "gone.bin", b"12345678").await;

    let ack = uploader.abort_upload(id).await.unwrap();
    assert_eq!(ack.key, "gone.bin");

    assert_eq!(
        uploader.abort_upload(id).await.unwrap_err(),
        UploadError::UnknownSession(id)
    );
}

#[tokio::test]
async fn failed_part_fails_completion_and_keeps_session() {
    let store = Arc::new(MemoryStore::new());
    store.fail_part(2);
    let uploader = uploader(&store);
    let id = start(&uploader, "broken.bin", b"AAAABBBBCCCC").await;

    let err = uploader.complete_upload(id).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::RemoteRequest { operation: RemoteOperation::UploadPart, .. }
    ));
    assert_eq!(uploader.stats().await.unwrap().sessions, 1);
    assert!(!store
        .calls()
        .iter()
        .any(|call| matches!(call, StoreCall::CompleteMultipartUpload { .. })));

    // The caller can still clean up
    let ack = uploader.abort_upload(id).await.unwrap();
    assert_eq!(ack.parts, 2);
    assert_eq!(store.open_uploads(), 0);
    assert_eq!(uploader.stats().await.unwrap().sessions, 0);
}

#[tokio::test]
async fn abort_waits_for_every_part_to_settle() {
    let store = Arc::new(MemoryStore::new());
    store.fail_part(2);
    store.delay_part(1, Duration::from_millis(80));
    let uploader = uploader(&store);
    let id = start(&uploader, "slow.bin", b"AAAABBBB").await;

    // Let both parts get dispatched before aborting
    while uploader.stats().await.unwrap().in_flight < 2 && store.failed_parts().is_empty() {
        tokio::task::yield_now().await;
    }
    let ack = uploader.abort_upload(id).await.unwrap();

    let calls = store.calls();
    let part_one = calls
        .iter()
        .position(|call| matches!(call, StoreCall::UploadPart { part_number: 1, .. }))
        .expect("part 1 should have been stored");
    let abort = calls
        .iter()
        .position(|call| matches!(call, StoreCall::AbortMultipartUpload { .. }))
        .unwrap();

    assert!(part_one < abort, "abort must wait for the slow part");
    assert_eq!(store.failed_parts(), vec![2]);
    assert_eq!(ack.parts, 1);
}

#[tokio::test]
async fn abort_stops_reading_an_open_source() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let (mut writer, source) = tokio::io::duplex(64);

    let id = uploader
        .start_upload(StartUpload::new(UploadTarget::new("live.bin")).with_source(source))
        .await
        .unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut writer, b"AAAA").await.unwrap();

    uploader.abort_upload(id).await.unwrap();
    let _ = tokio::io::AsyncWriteExt::write_all(&mut writer, b"BBBBCCCC").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.uploaded_parts().len() <= 1);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn complete_waits_for_the_source_to_end() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let (mut writer, source) = tokio::io::duplex(64);

    let id = uploader
        .start_upload(StartUpload::new(UploadTarget::new("tail.bin")).with_source(source))
        .await
        .unwrap();

    let completing = {
        let uploader = uploader.clone();
        tokio::spawn(async move { uploader.complete_upload(id).await })
    };

    tokio::io::AsyncWriteExt::write_all(&mut writer, b"AAAABB").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!completing.is_finished());

    drop(writer);
    let completed = completing.await.unwrap().unwrap();
    assert_eq!(completed.size, 6);
}

#[tokio::test]
async fn concurrent_finalization_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let (writer, source) = tokio::io::duplex(64);

    let id = uploader
        .start_upload(StartUpload::new(UploadTarget::new("busy.bin")).with_source(source))
        .await
        .unwrap();

    let first = {
        let uploader = uploader.clone();
        tokio::spawn(async move { uploader.complete_upload(id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        uploader.complete_upload(id).await.unwrap_err(),
        UploadError::FinalizationInProgress(id)
    );

    drop(writer);
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn cancelled_completion_releases_the_session() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    let (_writer, source) = tokio::io::duplex(64);

    let id = uploader
        .start_upload(StartUpload::new(UploadTarget::new("stuck.bin")).with_source(source))
        .await
        .unwrap();

    let attempt = tokio::time::timeout(Duration::from_millis(20), uploader.complete_upload(id)).await;
    assert!(attempt.is_err());

    let ack = uploader.abort_upload(id).await.unwrap();
    assert_eq!(ack.parts, 0);
}

#[tokio::test]
async fn source_failure_fails_completion() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);

    let id = uploader
        .start_upload(
            StartUpload::new(UploadTarget::new("cut.bin")).with_source(FailingSource {
                data: Some(b"AAAA".to_vec()),
            }),
        )
        .await
        .unwrap();

    let err = uploader.complete_upload(id).await.unwrap_err();
    assert!(matches!(err, UploadError::Source(_)));
    assert_eq!(uploader.stats().await.unwrap().sessions, 1);

    let ack = uploader.abort_upload(id).await.unwrap();
    assert_eq!(ack.parts, 1);
}

#[tokio::test]
async fn failed_creation_surfaces_at_finalization() {
    let store = Arc::new(MemoryStore::new());
    store.fail_create();
    let uploader = uploader(&store);
    let id = start(&uploader, "nowhere.bin", b"AAAABBBB").await;

    let err = uploader.complete_upload(id).await.unwrap_err();
    assert!(matches!(
        err,
        UploadError::RemoteRequest { operation: RemoteOperation::CreateMultipartUpload, .. }
    ));

    // Parts never reached the store but their slots were released
    let stats = uploader.stats().await.unwrap();
    assert_eq!(stats.in_flight, 0);
    assert!(store.uploaded_parts().is_empty());
}

#[tokio::test]
async fn complete_all_finishes_every_session() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    for key in ["a", "b", "c"] {
        start(&uploader, key, b"0123456789").await;
    }

    let mut completed = uploader.complete_all().await.unwrap();
    completed.sort_by(|a, b| a.key.cmp(&b.key));

    let keys: Vec<&str> = completed.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);
    assert!(uploader.complete_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn abort_all_aborts_instead_of_completing() {
    let store = Arc::new(MemoryStore::new());
    let uploader = uploader(&store);
    start(&uploader, "x", b"AAAABBBB").await;
    start(&uploader, "y", b"CCCC").await;

    let acks = uploader.abort_all().await.unwrap();

    assert_eq!(acks.len(), 2);
    let calls = store.calls();
    let aborts = calls
        .iter()
        .filter(|call| matches!(call, StoreCall::AbortMultipartUpload { .. }))
        .count();
    assert_eq!(aborts, 2);
    assert!(!calls
        .iter()
        .any(|call| matches!(call, StoreCall::CompleteMultipartUpload { .. })));
    assert_eq!(store.open_uploads(), 0);
}
