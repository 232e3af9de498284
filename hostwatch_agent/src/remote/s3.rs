use super::{ObjectStore, StoreError};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{error::DisplayErrorContext, primitives::ByteStream, Client};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
}

/// S3 bucket client. Credentials come from the default AWS provider chain
/// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`, profiles...).
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub async fn new(config: S3Config) -> Self {
        let region = Region::new(config.region.clone());
        let base_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&base_config).region(region);
        if let Some(endpoint) = &config.endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint);
            s3_builder = s3_builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn count_prefix(&self, prefix: &str, limit: i32) -> Result<usize, StoreError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(limit)
            .send()
            .await
            .map_err(|e| StoreError::other("S3 list", prefix, DisplayErrorContext(e)))?;
        Ok(resp.key_count().unwrap_or_default().max(0) as usize)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|se| se.is_no_such_key())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                return Err(if missing {
                    StoreError::NotFound(key.to_string())
                } else {
                    StoreError::other("S3 get", key, DisplayErrorContext(e))
                });
            }
        };

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StoreError::other("S3 read", key, e))?
            .into_bytes();
        Ok(data)
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("text/csv")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StoreError::other("S3 put", key, DisplayErrorContext(e)))?;
        Ok(())
    }
}
