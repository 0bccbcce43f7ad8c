//! S3 implementation of the object-store contract
//!
//! Works against any S3-compatible service (MinIO, COS, Ceph RGW) using
//! static credentials and path-style addressing.

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::{debug, error};

use obsync_core::config::RemoteConfig;

use crate::{ObjectEntry, ObjectStore};

/// Object-store client bound to one bucket
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Build a client from the `remote:` config section
    #[must_use]
    pub fn new(remote: &RemoteConfig) -> Self {
        let scheme = if remote.use_ssl { "https" } else { "http" };
        let credentials = Credentials::new(
            remote.secret_id.clone(),
            remote.secret_key.clone(),
            None,
            None,
            "config",
        );

        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(remote.region.clone()))
            .endpoint_url(format!("{scheme}://{}", remote.endpoint))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(config),
            bucket: remote.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self) -> Result<()> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Err(eyre!("bucket {} does not exist", self.bucket))
                } else {
                    Err(eyre!("head bucket {}: {err}", self.bucket))
                }
            }
        }
    }

    async fn stat_object(&self, key: &str) -> Result<Option<ObjectEntry>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectEntry {
                key: key.to_string(),
                size: head.content_length().unwrap_or(0).max(0) as u64,
                last_modified_secs: head.last_modified().map_or(0, aws_sdk_s3::primitives::DateTime::secs),
                // S3 returns the ETag wrapped in double quotes
                etag: head
                    .e_tag()
                    .unwrap_or_default()
                    .trim_matches('"')
                    .to_string(),
            })),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(eyre!("stat object {key}: {err}"))
                }
            }
        }
    }

    async fn put_file(&self, key: &str, local: &Path) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|err| eyre!("reading {}: {err}", local.display()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| eyre!("put object {key}: {}", err.into_service_error()))?;
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> Result<()> {
        // Stat first so removing an absent key stays a no-op.
        if self.stat_object(key).await?.is_none() {
            debug!("remove skipped, no such key {key}");
            return Ok(());
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| eyre!("remove object {key}: {}", err.into_service_error()))?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(t) = &token {
                request = request.continuation_token(t);
            }

            let response = request
                .send()
                .await
                .map_err(|err| eyre!("list prefix {prefix}: {}", err.into_service_error()))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            token = if response.is_truncated() == Some(true) {
                response.next_continuation_token().map(str::to_string)
            } else {
                None
            };
            if token.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    async fn remove_objects(&self, keys: &[String]) -> Result<()> {
        let mut last_err = None;

        // DeleteObjects accepts at most 1000 keys per call.
        for chunk in keys.chunks(1000) {
            let identifiers = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| eyre!("building delete batch: {err}"))?;

            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .build()
                .map_err(|err| eyre!("building delete batch: {err}"))?;

            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|err| eyre!("remove objects: {}", err.into_service_error()))?;

            for fault in response.errors() {
                error!(
                    "remove {} failed: {}",
                    fault.key().unwrap_or("<unknown>"),
                    fault.message().unwrap_or("unknown error")
                );
                last_err = Some(eyre!(
                    "remove {} failed: {}",
                    fault.key().unwrap_or("<unknown>"),
                    fault.message().unwrap_or("unknown error")
                ));
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
