use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;

use crate::auth::repo::UserRepo;
use crate::config::AppConfig;
use crate::db::{PgStore, Store};
use crate::mailer::{MailSender, ResendMailer};
use crate::storage::{R2Connector, StorageConnector};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
    pub mailer: Arc<dyn MailSender>,
    pub storage: Arc<dyn StorageConnector>,
    /// Plain HTTP client for fetching inbound attachments.
    pub http: reqwest::Client,
    bootstrapped: Arc<AtomicBool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = PgStore::connect(&config).await?;
        store.migrate().await?;

        let mailer = Arc::new(ResendMailer::new(config.provider_timeout())?) as Arc<dyn MailSender>;
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout())
            .build()
            .context("build http client")?;

        Ok(Self::from_parts(
            Arc::new(store),
            config,
            mailer,
            Arc::new(R2Connector),
            http,
        ))
    }

    pub fn from_parts(
        store: Arc<dyn Store>,
        config: Arc<AppConfig>,
        mailer: Arc<dyn MailSender>,
        storage: Arc<dyn StorageConnector>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            mailer,
            storage,
            http,
            bootstrapped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the first admin exists. The transition is one-way, so once
    /// observed it is remembered and the store is not asked again.
    pub async fn is_bootstrapped(&self) -> anyhow::Result<bool> {
        if self.bootstrapped.load(Ordering::Acquire) {
            return Ok(true);
        }
        let exists = self.store.any_user_exists().await?;
        if exists {
            self.mark_bootstrapped();
        }
        Ok(exists)
    }

    pub fn mark_bootstrapped(&self) {
        self.bootstrapped.store(true, Ordering::Release);
    }
}
