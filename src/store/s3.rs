//! S3-compatible object store client (AWS S3, Tencent COS, MinIO, ...).

use super::{ListObjectsPage, ObjectStoreClient, ObjectStream, StoreObject};
use crate::errors::{MirrorError, StoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    Client,
    config::{Credentials, Region},
    error::DisplayErrorContext,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

/// Connection settings for an S3-compatible endpoint.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub region: String,
    pub secret_id: String,
    pub secret_key: String,
    /// Custom endpoint, e.g. `https://cos.ap-beijing.myqcloud.com`.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
}

#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from static credentials.
    pub async fn connect(settings: &S3Settings) -> Result<Self, MirrorError> {
        if settings.region.trim().is_empty() {
            return Err(MirrorError::Client("region is empty".into()));
        }
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(Credentials::new(
                &settings.secret_id,
                &settings.secret_key,
                None,
                None,
                "object-mirror",
            ))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        tracing::debug!(region = %settings.region, endpoint = ?settings.endpoint, "S3 client ready");
        Ok(Self::new(Client::from_conf(builder.build())))
    }
}

fn service_error<E>(err: E) -> StoreError
where
    E: std::error::Error,
{
    StoreError::Service(DisplayErrorContext(&err).to_string())
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()).unwrap_or_default()
}

#[async_trait]
impl ObjectStoreClient for S3ObjectStore {
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<ListObjectsPage, StoreError> {
        let output = self
            .client
            .list_objects()
            .bucket(bucket)
            .prefix(prefix)
            .set_marker((!marker.is_empty()).then(|| marker.to_string()))
            .max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX))
            .send()
            .await
            .map_err(service_error)?;

        let contents: Vec<StoreObject> = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(StoreObject {
                    key,
                    size: obj.size().unwrap_or_default().max(0) as u64,
                    etag: obj.e_tag().unwrap_or_default().to_string(),
                    last_modified: obj.last_modified().map(to_chrono).unwrap_or_default(),
                    storage_class: obj.storage_class().map(|c| c.as_str().to_string()),
                })
            })
            .collect();

        let is_truncated = output.is_truncated().unwrap_or(false);
        // Without a delimiter S3 may omit NextMarker; its documented
        // continuation is then the last key of the page.
        let next_marker = output
            .next_marker()
            .map(str::to_string)
            .or_else(|| {
                is_truncated
                    .then(|| contents.last().map(|o| o.key.clone()))
                    .flatten()
            });

        Ok(ListObjectsPage {
            contents: (!contents.is_empty()).then_some(contents),
            is_truncated,
            next_marker,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectStream, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(service_error)?;
        Ok(ReaderStream::new(output.body.into_async_read()).boxed())
    }
}
