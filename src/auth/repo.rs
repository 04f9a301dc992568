use anyhow::Context;
use async_trait::async_trait;
use time::OffsetDateTime;

use crate::auth::repo_types::{DeleteUserOutcome, NewUser, Session, User};
use crate::db::PgStore;

const USER_COLUMNS: &str = "username, email, password_hash, is_admin, created_at, last_login";

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn any_user_exists(&self) -> anyhow::Result<bool>;
    async fn find_user(&self, username: &str) -> anyhow::Result<Option<User>>;
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;
    /// Inserts the user unless the username or email is taken, in which case `None`.
    async fn create_user(&self, new: &NewUser) -> anyhow::Result<Option<User>>;
    /// Inserts the very first user. Only one call can ever succeed; later or
    /// concurrent calls get `None`.
    async fn create_first_admin(&self, new: &NewUser) -> anyhow::Result<Option<User>>;
    /// Deletes the user and their sessions, refusing to remove the last admin.
    async fn delete_user(&self, username: &str) -> anyhow::Result<DeleteUserOutcome>;
    async fn touch_last_login(&self, username: &str, at: OffsetDateTime) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SessionRepo: Send + Sync {
    async fn insert_session(&self, session: &Session) -> anyhow::Result<()>;
    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>>;
    /// Deleting an unknown token is not an error.
    async fn delete_session(&self, token: &str) -> anyhow::Result<()>;
    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

#[async_trait]
impl UserRepo for PgStore {
    async fn any_user_exists(&self) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users)")
            .fetch_one(self.pool())
            .await
            .context("check users exist")?;
        Ok(exists)
    }

    async fn find_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(self.pool())
        .await
        .context("find user")?;
        Ok(user)
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, username ASC"
        ))
        .fetch_all(self.pool())
        .await
        .context("list users")?;
        Ok(users)
    }

    async fn create_user(&self, new: &NewUser) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, is_admin)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.is_admin)
        .fetch_optional(self.pool())
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn create_first_admin(&self, new: &NewUser) -> anyhow::Result<Option<User>> {
        let mut tx = self.pool().begin().await.context("begin tx")?;

        // The single-row marker serialises concurrent setups: the loser blocks on
        // the primary key until the winner commits, then sees the conflict.
        let claimed = sqlx::query("INSERT INTO bootstrap (singleton) VALUES (TRUE) ON CONFLICT DO NOTHING")
            .execute(&mut *tx)
            .await
            .context("claim bootstrap marker")?
            .rows_affected();
        if claimed == 0 {
            tx.rollback().await.context("rollback tx")?;
            return Ok(None);
        }

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, is_admin)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .fetch_optional(&mut *tx)
        .await
        .context("insert first admin")?;

        match user {
            Some(user) => {
                tx.commit().await.context("commit tx")?;
                Ok(Some(user))
            }
            None => {
                tx.rollback().await.context("rollback tx")?;
                Ok(None)
            }
        }
    }

    async fn delete_user(&self, username: &str) -> anyhow::Result<DeleteUserOutcome> {
        let mut tx = self.pool().begin().await.context("begin tx")?;

        // Lock every admin row so two concurrent deletes cannot both pass the guard.
        let admins: Vec<(String,)> =
            sqlx::query_as("SELECT username FROM users WHERE is_admin FOR UPDATE")
                .fetch_all(&mut *tx)
                .await
                .context("lock admins")?;

        let target: Option<(bool,)> =
            sqlx::query_as("SELECT is_admin FROM users WHERE username = $1 FOR UPDATE")
                .bind(username)
                .fetch_optional(&mut *tx)
                .await
                .context("lock target user")?;

        let outcome = match target {
            None => DeleteUserOutcome::NotFound,
            Some((true,)) if admins.len() <= 1 => DeleteUserOutcome::LastAdmin,
            Some(_) => {
                sqlx::query("DELETE FROM users WHERE username = $1")
                    .bind(username)
                    .execute(&mut *tx)
                    .await
                    .context("delete user")?;
                DeleteUserOutcome::Deleted
            }
        };

        tx.commit().await.context("commit tx")?;
        Ok(outcome)
    }

    async fn touch_last_login(&self, username: &str, at: OffsetDateTime) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET last_login = $2 WHERE username = $1")
            .bind(username)
            .bind(at)
            .execute(self.pool())
            .await
            .context("update last_login")?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for PgStore {
    async fn insert_session(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (token, username, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&session.token)
        .bind(&session.username)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(self.pool())
        .await
        .context("insert session")?;
        Ok(())
    }

    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT token, username, created_at, expires_at
            FROM sessions
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .context("find session")?;
        Ok(session)
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(self.pool())
            .await
            .context("delete session")?;
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let purged = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(self.pool())
            .await
            .context("purge expired sessions")?
            .rows_affected();
        Ok(purged)
    }
}
