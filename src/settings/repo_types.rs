use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// The single settings document: third-party credentials editable by admins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct ApiSettings {
    pub resend_api_key: String,
    pub r2_account_id: String,
    pub r2_access_key_id: String,
    pub r2_secret_access_key: String,
    pub r2_bucket_name: String,
    pub r2_public_url: String,
    /// Signing secret for inbound webhooks (`whsec_...`).
    pub webhook_secret: String,
    pub updated_at: Option<OffsetDateTime>,
}

impl ApiSettings {
    pub fn resend_key(&self) -> Option<&str> {
        Some(self.resend_api_key.trim()).filter(|k| !k.is_empty())
    }

    pub fn webhook_key(&self) -> Option<&str> {
        Some(self.webhook_secret.trim()).filter(|k| !k.is_empty())
    }

    pub fn public_url(&self) -> Option<&str> {
        Some(self.r2_public_url.trim().trim_end_matches('/')).filter(|u| !u.is_empty())
    }

    pub fn storage_configured(&self) -> bool {
        [
            &self.r2_account_id,
            &self.r2_access_key_id,
            &self.r2_secret_access_key,
            &self.r2_bucket_name,
        ]
        .iter()
        .all(|v| !v.trim().is_empty())
    }
}
