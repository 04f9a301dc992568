use std::{str::FromStr, time::Duration};

use anyhow::Context;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

use crate::{
    auth::repo::{SessionRepo, UserRepo},
    config::AppConfig,
    emails::repo::EmailRepo,
    settings::repo::SettingsRepo,
};

#[cfg(test)]
pub mod memory;

/// Everything the handlers need from the document store.
pub trait Store: UserRepo + SessionRepo + EmailRepo + SettingsRepo {}

impl<T> Store for T where T: UserRepo + SessionRepo + EmailRepo + SettingsRepo {}

/// Postgres-backed store; nested documents live in JSONB columns.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let mut options =
            PgConnectOptions::from_str(&config.database_url).context("parse DATABASE_URL")?;
        if let Some(name) = &config.database_name {
            options = options.database(name);
        }
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Migrated store in a throwaway schema of the database named by
    /// `MAILROOM_TEST_DATABASE_URL`. `None` when the variable is unset, so
    /// Postgres tests are skipped on machines without a database.
    #[cfg(test)]
    pub(crate) async fn for_tests() -> Option<Self> {
        use rand::{distributions::Alphanumeric, Rng};

        let url = std::env::var("MAILROOM_TEST_DATABASE_URL").ok()?;
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let schema = format!("mailroom_test_{suffix}");

        let options = PgConnectOptions::from_str(&url).expect("parse MAILROOM_TEST_DATABASE_URL");
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await
            .expect("connect to test database");
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .expect("create test schema");
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect_with(options.options([("search_path", schema.as_str())]))
            .await
            .expect("connect to test schema");
        let store = Self { pool };
        store.migrate().await.expect("migrate test schema");
        Some(store)
    }
}
