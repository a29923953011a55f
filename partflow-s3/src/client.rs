//! Object store backed by the AWS SDK

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use tracing::{debug, info};

use partflow_core::*;

use crate::config::StorageConfig;

/// [`ObjectStore`] over S3 or any S3-compatible service
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from `config`, filling gaps from the AWS default
    /// provider chain
    pub async fn new(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "partflow",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        info!(
            "S3 store ready (endpoint: {}, region: {}, path style: {})",
            config.endpoint.as_deref().unwrap_or("default"),
            shared.region().map(|r| r.as_ref()).unwrap_or("unset"),
            config.force_path_style
        );

        S3Store {
            client: Client::from_conf(s3_config),
        }
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        S3Store { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

fn remote<E>(operation: RemoteOperation, error: E) -> UploadError
where
    E: std::error::Error,
{
    UploadError::remote(operation, DisplayErrorContext(error))
}

fn sdk_part_number(part_number: u32) -> Result<i32> {
    if part_number == 0 || part_number > MAX_PART_NUMBER {
        return Err(UploadError::remote(
            RemoteOperation::UploadPart,
            format!("part number {} outside 1..={}", part_number, MAX_PART_NUMBER),
        ));
    }
    Ok(part_number as i32)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn create_multipart_upload(&self, bucket: &str, target: &UploadTarget) -> Result<String> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(&target.key)
            .set_content_type(target.content_type.clone())
            .set_cache_control(target.cache_control.clone());
        for (name, value) in &target.metadata {
            request = request.metadata(name, value);
        }

        let output = request
            .send()
            .await
            .map_err(|e| remote(RemoteOperation::CreateMultipartUpload, e))?;

        let upload_id = output.upload_id().ok_or_else(|| {
            UploadError::remote(RemoteOperation::CreateMultipartUpload, "response carried no upload id")
        })?;
        debug!("Created multipart upload {} for {}/{}", upload_id, bucket, target.key);
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        part_number: u32,
        upload_id: &str,
        body: Bytes,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(sdk_part_number(part_number)?)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| remote(RemoteOperation::UploadPart, e))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            UploadError::remote(
                RemoteOperation::UploadPart,
                format!("part {} response carried no ETag", part_number),
            )
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> Result<CompletedMultipart> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .part_number(sdk_part_number(part.part_number)?)
                    .e_tag(&part.tag)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| remote(RemoteOperation::CompleteMultipartUpload, e))?;

        Ok(CompletedMultipart {
            location: output.location().map(str::to_string),
            bucket: output.bucket().unwrap_or(bucket).to_string(),
            key: output.key().unwrap_or(key).to_string(),
            tag: output.e_tag().map(str::to_string),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        _parts: &[PartResult],
    ) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| remote(RemoteOperation::AbortMultipartUpload, e))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| remote(RemoteOperation::HeadObject, e))?;

        Ok(ObjectHead {
            content_length: output.content_length().unwrap_or(0).max(0) as u64,
            tag: output.e_tag().map(str::to_string),
        })
    }
}
