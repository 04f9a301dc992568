use tracing::info;

use crate::{
    auth::{repo_types::User, services::require_admin},
    error::AppError,
    settings::{dto::ApiSettingsForm, repo::SettingsRepo, repo_types::ApiSettings},
    state::AppState,
};

pub async fn load(state: &AppState, admin: &User) -> Result<ApiSettings, AppError> {
    require_admin(admin)?;
    Ok(state.store.load_settings().await?)
}

/// Replaces the settings document. Only the Resend key is required.
pub async fn update_api_settings(
    state: &AppState,
    admin: &User,
    form: ApiSettingsForm,
) -> Result<ApiSettings, AppError> {
    require_admin(admin)?;

    let settings = ApiSettings::from(form);
    if settings.resend_key().is_none() {
        return Err(AppError::Validation("Resend API key is required".into()));
    }
    state.store.save_settings(&settings).await?;

    info!(
        by = %admin.username,
        storage = settings.storage_configured(),
        webhook_signed = settings.webhook_key().is_some(),
        "api settings updated"
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn user(is_admin: bool) -> User {
        User {
            username: if is_admin { "admin" } else { "member" }.into(),
            email: "x@example.com".into(),
            password_hash: String::new(),
            is_admin,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        }
    }

    #[tokio::test]
    async fn update_trims_and_persists() {
        let state = AppState::fake();
        let form = ApiSettingsForm {
            resend_api_key: "  re_123 ".into(),
            r2_bucket_name: "mail".into(),
            webhook_secret: "whsec_abc".into(),
            ..Default::default()
        };
        update_api_settings(&state, &user(true), form).await.unwrap();

        let saved = load(&state, &user(true)).await.unwrap();
        assert_eq!(saved.resend_api_key, "re_123");
        assert_eq!(saved.r2_bucket_name, "mail");
        assert_eq!(saved.webhook_key(), Some("whsec_abc"));
        assert!(saved.updated_at.is_some());
    }

    #[tokio::test]
    async fn resend_key_is_required() {
        let state = AppState::fake();
        let err = update_api_settings(&state, &user(true), ApiSettingsForm::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn members_cannot_touch_settings() {
        let state = AppState::fake();
        let form = ApiSettingsForm {
            resend_api_key: "re_123".into(),
            ..Default::default()
        };
        assert!(matches!(
            update_api_settings(&state, &user(false), form).await,
            Err(AppError::Authz)
        ));
        assert!(matches!(load(&state, &user(false)).await, Err(AppError::Authz)));
    }
}
