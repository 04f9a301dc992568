use serde::Deserialize;

use crate::settings::repo_types::ApiSettings;

/// Form body of the API credentials section of the settings page.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiSettingsForm {
    pub resend_api_key: String,
    pub r2_account_id: String,
    pub r2_access_key_id: String,
    pub r2_secret_access_key: String,
    pub r2_bucket_name: String,
    pub r2_public_url: String,
    pub webhook_secret: String,
}

impl From<ApiSettingsForm> for ApiSettings {
    fn from(f: ApiSettingsForm) -> Self {
        Self {
            resend_api_key: f.resend_api_key.trim().to_string(),
            r2_account_id: f.r2_account_id.trim().to_string(),
            r2_access_key_id: f.r2_access_key_id.trim().to_string(),
            r2_secret_access_key: f.r2_secret_access_key.trim().to_string(),
            r2_bucket_name: f.r2_bucket_name.trim().to_string(),
            r2_public_url: f.r2_public_url.trim().to_string(),
            webhook_secret: f.webhook_secret.trim().to_string(),
            updated_at: None,
        }
    }
}
