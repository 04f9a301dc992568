use anyhow::Context;
use async_trait::async_trait;

use crate::db::PgStore;
use crate::settings::repo_types::ApiSettings;

#[async_trait]
pub trait SettingsRepo: Send + Sync {
    /// All-empty defaults when nothing has been saved yet.
    async fn load_settings(&self) -> anyhow::Result<ApiSettings>;
    async fn save_settings(&self, settings: &ApiSettings) -> anyhow::Result<()>;
}

#[async_trait]
impl SettingsRepo for PgStore {
    async fn load_settings(&self) -> anyhow::Result<ApiSettings> {
        let settings = sqlx::query_as::<_, ApiSettings>(
            r#"
            SELECT resend_api_key, r2_account_id, r2_access_key_id, r2_secret_access_key,
                   r2_bucket_name, r2_public_url, webhook_secret, updated_at
            FROM settings
            WHERE singleton
            "#,
        )
        .fetch_optional(self.pool())
        .await
        .context("load settings")?;
        Ok(settings.unwrap_or_default())
    }

    async fn save_settings(&self, settings: &ApiSettings) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (singleton, resend_api_key, r2_account_id, r2_access_key_id,
                                  r2_secret_access_key, r2_bucket_name, r2_public_url,
                                  webhook_secret, updated_at)
            VALUES (TRUE, $1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (singleton) DO UPDATE SET
                resend_api_key = EXCLUDED.resend_api_key,
                r2_account_id = EXCLUDED.r2_account_id,
                r2_access_key_id = EXCLUDED.r2_access_key_id,
                r2_secret_access_key = EXCLUDED.r2_secret_access_key,
                r2_bucket_name = EXCLUDED.r2_bucket_name,
                r2_public_url = EXCLUDED.r2_public_url,
                webhook_secret = EXCLUDED.webhook_secret,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&settings.resend_api_key)
        .bind(&settings.r2_account_id)
        .bind(&settings.r2_access_key_id)
        .bind(&settings.r2_secret_access_key)
        .bind(&settings.r2_bucket_name)
        .bind(&settings.r2_public_url)
        .bind(&settings.webhook_secret)
        .execute(self.pool())
        .await
        .context("save settings")?;
        Ok(())
    }
}
