use anyhow::Context;
use async_trait::async_trait;
use sqlx::types::Json;

use crate::db::PgStore;
use crate::emails::repo_types::{Email, EmailRow};

const EMAIL_COLUMNS: &str = "id, from_addr, to_addrs, cc_addrs, bcc_addrs, subject, body_html, \
                             body_text, message_id, attachments, is_read, replied, sent_at, received_at";

#[async_trait]
pub trait EmailRepo: Send + Sync {
    /// Inserts the email; returns `false` if one with the same id is already stored.
    async fn insert_email(&self, email: &Email) -> anyhow::Result<bool>;
    async fn email_exists(&self, id: &str) -> anyhow::Result<bool>;
    /// Newest first (`received_at DESC, id DESC`).
    async fn list_emails(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Email>>;
    async fn count_emails(&self) -> anyhow::Result<i64>;
    async fn find_email(&self, id: &str) -> anyhow::Result<Option<Email>>;
    async fn mark_read(&self, id: &str) -> anyhow::Result<bool>;
    async fn mark_replied(&self, id: &str) -> anyhow::Result<bool>;
    /// Removes the email and hands back what was deleted.
    async fn delete_email(&self, id: &str) -> anyhow::Result<Option<Email>>;
}

#[async_trait]
impl EmailRepo for PgStore {
    async fn insert_email(&self, email: &Email) -> anyhow::Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO emails (id, from_addr, to_addrs, cc_addrs, bcc_addrs, subject,
                                body_html, body_text, message_id, attachments,
                                is_read, replied, sent_at, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&email.id)
        .bind(&email.from)
        .bind(Json(&email.to))
        .bind(Json(&email.cc))
        .bind(Json(&email.bcc))
        .bind(&email.subject)
        .bind(&email.body_html)
        .bind(&email.body_text)
        .bind(&email.message_id)
        .bind(Json(&email.attachments))
        .bind(email.is_read)
        .bind(email.replied)
        .bind(email.sent_at)
        .bind(email.received_at)
        .execute(self.pool())
        .await
        .context("insert email")?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn email_exists(&self, id: &str) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM emails WHERE id = $1)")
            .bind(id)
            .fetch_one(self.pool())
            .await
            .context("check email exists")?;
        Ok(exists)
    }

    async fn list_emails(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Email>> {
        let rows = sqlx::query_as::<_, EmailRow>(&format!(
            r#"
            SELECT {EMAIL_COLUMNS}
            FROM emails
            ORDER BY received_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
        .context("list emails")?;
        Ok(rows.into_iter().map(Email::from).collect())
    }

    async fn count_emails(&self) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails")
            .fetch_one(self.pool())
            .await
            .context("count emails")?;
        Ok(count)
    }

    async fn find_email(&self, id: &str) -> anyhow::Result<Option<Email>> {
        let row = sqlx::query_as::<_, EmailRow>(&format!(
            "SELECT {EMAIL_COLUMNS} FROM emails WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("find email")?;
        Ok(row.map(Email::from))
    }

    async fn mark_read(&self, id: &str) -> anyhow::Result<bool> {
        let updated = sqlx::query("UPDATE emails SET is_read = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .context("mark email read")?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn mark_replied(&self, id: &str) -> anyhow::Result<bool> {
        let updated = sqlx::query("UPDATE emails SET replied = TRUE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .context("mark email replied")?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn delete_email(&self, id: &str) -> anyhow::Result<Option<Email>> {
        let row = sqlx::query_as::<_, EmailRow>(&format!(
            "DELETE FROM emails WHERE id = $1 RETURNING {EMAIL_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .context("delete email")?;
        Ok(row.map(Email::from))
    }
}
