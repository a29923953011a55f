//! Upload and abort subcommands

use anyhow::{bail, Context};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use partflow_core::*;
use partflow_engine::{BoxedSource, StartUpload, Uploader, UploaderConfig};
use partflow_s3::{S3Store, StorageConfig};

#[derive(Debug, Clone)]
pub struct UploadArgs {
    pub key: String,
    pub inputs: Vec<PathBuf>,
    pub content_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub resume: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AbortArgs {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Object key for every input.
///
/// A single input is stored under `key`; several inputs are stored as
/// `key/<file name>`.
fn object_keys(key: &str, inputs: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    if inputs.len() == 1 {
        return Ok(vec![key.to_string()]);
    }

    let prefix = key.trim_end_matches('/');
    let mut seen = HashSet::new();
    let mut keys = Vec::with_capacity(inputs.len());
    for input in inputs {
        if is_stdin(input) {
            bail!("stdin can only be uploaded on its own");
        }
        let name = input
            .file_name()
            .and_then(|name| name.to_str())
            .with_context(|| format!("{} has no usable file name", input.display()))?;
        if !seen.insert(name) {
            bail!("two inputs share the file name {}", name);
        }
        keys.push(format!("{}/{}", prefix, name));
    }
    Ok(keys)
}

async fn open_input(path: &Path) -> anyhow::Result<BoxedSource> {
    if is_stdin(path) {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Box::new(file))
}

async fn read_resume(path: &Path) -> anyhow::Result<ResumeParams> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid resume file {}", path.display()))
}

async fn log_progress(mut progress: broadcast::Receiver<PartUploaded>) {
    let mut total: u64 = 0;
    loop {
        match progress.recv().await {
            Ok(part) => {
                total += part.size as u64;
                info!(
                    "Session {} part {} uploaded ({} bytes, {} bytes total)",
                    part.session, part.part_number, part.size, total
                );
            }
            Err(RecvError::Lagged(missed)) => warn!("Progress log missed {} parts", missed),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn start_sessions(
    uploader: &Uploader,
    args: &UploadArgs,
    keys: Vec<String>,
    resume: Option<ResumeParams>,
) -> anyhow::Result<Vec<CompletedUpload>> {
    for (input, key) in args.inputs.iter().zip(keys) {
        let mut target = UploadTarget::new(key.clone());
        if let Some(content_type) = &args.content_type {
            target = target.with_content_type(content_type.clone());
        }

        let mut request = StartUpload::new(target);
        request.source = Some(open_input(input).await?);
        request.metadata = args.metadata.clone();
        request.resume = resume.clone();

        let id = uploader.start_upload(request).await?;
        info!("Session {} uploading {} to {}", id, input.display(), key);
    }

    Ok(uploader.complete_all().await?)
}

/// Upload every input concurrently, aborting whatever is left on failure
pub async fn upload(
    storage: &StorageConfig,
    config: UploaderConfig,
    args: UploadArgs,
) -> anyhow::Result<()> {
    let keys = object_keys(&args.key, &args.inputs)?;
    let resume = match &args.resume {
        Some(_) if args.inputs.len() > 1 => bail!("--resume applies to a single input"),
        Some(path) => Some(read_resume(path).await?),
        None => None,
    };

    let store = Arc::new(S3Store::new(storage).await);
    let uploader = Uploader::new(store, config)?;
    let progress = tokio::spawn(log_progress(uploader.subscribe()));

    let result = start_sessions(&uploader, &args, keys, resume).await;
    progress.abort();

    match result {
        Ok(completed) => {
            for upload in completed {
                info!("Stored {}/{} ({} bytes)", upload.bucket, upload.key, upload.size);
                println!("{}", serde_json::to_string(&upload)?);
            }
            Ok(())
        }
        Err(e) => {
            clean_up_after_failure(&uploader, args.resume.is_some()).await;
            Err(e)
        }
    }
}

/// Abort whatever sessions are still open after a failed run.
///
/// A resumed upload belongs to whoever handed out the resume file, so it
/// is left open for them to retry or abort.
async fn clean_up_after_failure(uploader: &Uploader, resumed: bool) {
    if resumed {
        warn!("Upload failed; leaving the resumed multipart upload open");
        return;
    }

    warn!("Upload failed, aborting open sessions");
    match uploader.abort_all().await {
        Ok(acks) => {
            for ack in acks {
                info!("Aborted {}/{} (upload {})", ack.bucket, ack.key, ack.upload_id);
            }
        }
        Err(abort_err) => warn!("Abort failed: {}", abort_err),
    }
}

/// Abort a multipart upload no session knows about
pub async fn abort(storage: &StorageConfig, args: AbortArgs) -> anyhow::Result<()> {
    let store = S3Store::new(storage).await;
    store
        .abort_multipart_upload(&args.bucket, &args.key, &args.upload_id, &[])
        .await?;

    info!("Aborted {}/{} (upload {})", args.bucket, args.key, args.upload_id);
    let ack = AbortAck {
        bucket: args.bucket,
        key: args.key,
        upload_id: args.upload_id,
        parts: 0,
    };
    println!("{}", serde_json::to_string(&ack)?);
    Ok(())
}
