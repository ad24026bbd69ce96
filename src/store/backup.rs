//! Remote snapshot backup.
//!
//! Uploads the current snapshot file to an S3 bucket, overwriting any
//! previous backup object. Credentials come from the ambient AWS
//! environment; the bucket is probed at startup so a misconfigured backup
//! fails the process instead of failing silently every interval.

use std::path::Path;

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::info;

use crate::error::BackupError;

/// Object key of the uploaded snapshot.
const BACKUP_KEY: &str = "kawana.kdb";

/// A connected S3 backup target.
pub struct S3Backup {
    client: Client,
    bucket: String,
}

impl S3Backup {
    /// Resolves the AWS environment and verifies the bucket is reachable.
    pub async fn connect(bucket: &str) -> Result<Self, BackupError> {
        if bucket.is_empty() {
            return Err(BackupError::MissingBucket);
        }

        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = Client::new(&config);

        client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| BackupError::Probe(e.to_string()))?;

        info!(bucket, "s3 backup target verified");
        Ok(Self {
            client,
            bucket: bucket.to_string(),
        })
    }

    /// Uploads the snapshot at `path`, replacing the previous backup.
    pub async fn upload(&self, path: &Path) -> Result<(), BackupError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| BackupError::Read(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(BACKUP_KEY)
            .body(body)
            .send()
            .await
            .map_err(|e| BackupError::Upload(e.to_string()))?;

        Ok(())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}
