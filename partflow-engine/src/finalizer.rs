//! Completion and abort of upload sessions

use futures::future::{join_all, try_join_all};
use tracing::{info, warn};

use partflow_core::*;

use crate::registry::SharedResult;
use crate::scheduler::FinalizeTicket;

/// Wait for the upload id and every part, then assemble the object.
///
/// Fails as soon as any of them fails; the caller keeps the session.
pub(crate) async fn complete(
    store: &dyn ObjectStore,
    bucket: &str,
    ticket: &FinalizeTicket,
    parts: Vec<SharedResult<PartResult>>,
) -> Result<CompletedUpload> {
    let (upload_id, mut parts) =
        futures::try_join!(ticket.upload_id.clone(), try_join_all(parts))?;

    // Completion order is network-bound; the store wants ascending numbers
    parts.sort_by_key(|part| part.part_number);

    let completed = store
        .complete_multipart_upload(bucket, &ticket.key, &upload_id, &parts)
        .await?;
    let head = store.head_object(&completed.bucket, &completed.key).await?;

    info!(
        "Completed {}/{} from {} parts ({} bytes)",
        completed.bucket,
        completed.key,
        parts.len(),
        head.content_length
    );

    Ok(CompletedUpload {
        location: completed.location,
        bucket: completed.bucket,
        key: completed.key,
        tag: completed.tag,
        metadata: ticket.metadata.clone(),
        size: head.content_length,
    })
}

/// Wait for every dispatched part to settle, then discard the upload.
///
/// Failed parts do not stop the abort; only a missing upload id does.
pub(crate) async fn abort(
    store: &dyn ObjectStore,
    bucket: &str,
    ticket: &FinalizeTicket,
    parts: Vec<SharedResult<PartResult>>,
) -> Result<AbortAck> {
    let (upload_id, settled) = futures::join!(ticket.upload_id.clone(), join_all(parts));
    let upload_id = upload_id?;

    let total = settled.len();
    let parts: Vec<PartResult> = settled.into_iter().filter_map(|part| part.ok()).collect();
    if parts.len() < total {
        warn!(
            "Aborting {}/{} with {} of {} parts failed",
            bucket,
            ticket.key,
            total - parts.len(),
            total
        );
    }

    store
        .abort_multipart_upload(bucket, &ticket.key, &upload_id, &parts)
        .await?;

    info!("Aborted {}/{} (upload {})", bucket, ticket.key, upload_id);

    Ok(AbortAck {
        bucket: bucket.to_string(),
        key: ticket.key.clone(),
        upload_id,
        parts: parts.len(),
    })
}
