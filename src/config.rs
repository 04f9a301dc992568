use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Overrides the database named in `database_url` when set.
    pub database_name: Option<String>,
    pub session: SessionConfig,
    /// Sender address used for outgoing replies.
    pub mail_from: String,
    /// Upper bound for a single call to the email or storage provider.
    pub provider_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_name = std::env::var("DATABASE_NAME")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let session = SessionConfig {
            secret: std::env::var("SESSION_SECRET").context("SESSION_SECRET must be set")?,
            ttl_minutes: std::env::var("SESSION_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(60 * 24 * 7),
            secure_cookie: std::env::var("COOKIE_SECURE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        };
        anyhow::ensure!(!session.secret.is_empty(), "SESSION_SECRET must not be empty");

        Ok(Self {
            database_url,
            database_name,
            session,
            mail_from: std::env::var("MAIL_FROM").unwrap_or_else(|_| "onboarding@resend.dev".into()),
            provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
        })
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }
}
