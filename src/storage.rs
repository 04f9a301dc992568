use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    presigning::PresigningConfig,
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

use crate::settings::repo_types::ApiSettings;

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String>;
}

/// Builds a storage client from the current settings. Credentials are
/// editable at runtime, so a client is built per operation.
#[async_trait]
pub trait StorageConnector: Send + Sync {
    /// `None` when the settings do not hold a complete set of credentials.
    async fn connect(&self, settings: &ApiSettings) -> anyhow::Result<Option<Arc<dyn StorageClient>>>;
}

/// S3-compatible bucket, addressed path-style.
#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "settings",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
        })
    }
}

#[async_trait]
impl StorageClient for Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, seconds: u64) -> anyhow::Result<String> {
        let req = self.client.get_object().bucket(&self.bucket).key(key);
        let presigned = req
            .presigned(PresigningConfig::expires_in(
                std::time::Duration::from_secs(seconds),
            )?)
            .await
            .context("s3 presign_get")?;
        Ok(presigned.uri().to_string())
    }
}

/// Cloudflare R2, configured from the settings document.
pub struct R2Connector;

pub fn r2_endpoint(account_id: &str) -> String {
    format!("https://{}.r2.cloudflarestorage.com", account_id.trim())
}

#[async_trait]
impl StorageConnector for R2Connector {
    async fn connect(&self, settings: &ApiSettings) -> anyhow::Result<Option<Arc<dyn StorageClient>>> {
        if !settings.storage_configured() {
            return Ok(None);
        }
        let storage = Storage::new(
            &r2_endpoint(&settings.r2_account_id),
            settings.r2_bucket_name.trim(),
            settings.r2_access_key_id.trim(),
            settings.r2_secret_access_key.trim(),
            "auto",
        )
        .await?;
        Ok(Some(Arc::new(storage) as Arc<dyn StorageClient>))
    }
}

/// Object key for an attachment; the filename is reduced to a safe subset.
pub fn attachment_key(email_id: &str, attachment_id: &str, filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let safe = safe.trim_start_matches('.');
    let safe = if safe.is_empty() { "attachment" } else { safe };
    format!("attachments/{email_id}/{attachment_id}-{safe}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r2_endpoint_uses_account_id() {
        assert_eq!(r2_endpoint(" abc123 "), "https://abc123.r2.cloudflarestorage.com");
    }

    #[test]
    fn attachment_key_sanitises_filename() {
        assert_eq!(
            attachment_key("em_1", "att_1", "report final.pdf"),
            "attachments/em_1/att_1-report_final.pdf"
        );
        assert_eq!(
            attachment_key("em_1", "att_2", "../../etc/passwd"),
            "attachments/em_1/att_2-_.._etc_passwd"
        );
        assert_eq!(attachment_key("em_1", "att_3", ""), "attachments/em_1/att_3-attachment");
    }

    #[tokio::test]
    async fn connector_declines_incomplete_settings() {
        let settings = ApiSettings {
            r2_account_id: "acct".into(),
            r2_bucket_name: "bucket".into(),
            ..Default::default()
        };
        assert!(R2Connector.connect(&settings).await.unwrap().is_none());
    }
}
