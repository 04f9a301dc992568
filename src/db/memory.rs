//! In-memory store used by the test suite. Every operation takes the single
//! lock once, which gives the same atomicity the Postgres queries provide.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    auth::{
        repo::{SessionRepo, UserRepo},
        repo_types::{DeleteUserOutcome, NewUser, Session, User},
    },
    emails::{repo::EmailRepo, repo_types::Email},
    settings::{repo::SettingsRepo, repo_types::ApiSettings},
};

#[derive(Default)]
struct Inner {
    users: BTreeMap<String, User>,
    bootstrapped: bool,
    sessions: HashMap<String, Session>,
    emails: HashMap<String, Email>,
    settings: Option<ApiSettings>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

impl Inner {
    fn insert_user(&mut self, new: &NewUser) -> Option<User> {
        let taken = self.users.contains_key(&new.username)
            || self.users.values().any(|u| u.email == new.email);
        if taken {
            return None;
        }
        let user = User {
            username: new.username.clone(),
            email: new.email.clone(),
            password_hash: new.password_hash.clone(),
            is_admin: new.is_admin,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        };
        self.users.insert(user.username.clone(), user.clone());
        Some(user)
    }
}

#[async_trait]
impl UserRepo for MemoryStore {
    async fn any_user_exists(&self) -> anyhow::Result<bool> {
        Ok(!self.lock().users.is_empty())
    }

    async fn find_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        Ok(self.lock().users.get(username).cloned())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let mut users: Vec<User> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.username.cmp(&b.username)));
        Ok(users)
    }

    async fn create_user(&self, new: &NewUser) -> anyhow::Result<Option<User>> {
        Ok(self.lock().insert_user(new))
    }

    async fn create_first_admin(&self, new: &NewUser) -> anyhow::Result<Option<User>> {
        let mut inner = self.lock();
        if inner.bootstrapped {
            return Ok(None);
        }
        let admin = NewUser {
            is_admin: true,
            ..new.clone()
        };
        let user = inner.insert_user(&admin);
        inner.bootstrapped = user.is_some();
        Ok(user)
    }

    async fn delete_user(&self, username: &str) -> anyhow::Result<DeleteUserOutcome> {
        let mut inner = self.lock();
        let Some(target) = inner.users.get(username) else {
            return Ok(DeleteUserOutcome::NotFound);
        };
        let admins = inner.users.values().filter(|u| u.is_admin).count();
        if target.is_admin && admins <= 1 {
            return Ok(DeleteUserOutcome::LastAdmin);
        }
        inner.users.remove(username);
        inner.sessions.retain(|_, s| s.username != username);
        Ok(DeleteUserOutcome::Deleted)
    }

    async fn touch_last_login(&self, username: &str, at: OffsetDateTime) -> anyhow::Result<()> {
        if let Some(user) = self.lock().users.get_mut(username) {
            user.last_login = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepo for MemoryStore {
    async fn insert_session(&self, session: &Session) -> anyhow::Result<()> {
        let mut inner = self.lock();
        anyhow::ensure!(
            inner.users.contains_key(&session.username),
            "session for unknown user {}",
            session.username
        );
        anyhow::ensure!(
            !inner.sessions.contains_key(&session.token),
            "duplicate session token"
        );
        inner.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.lock().sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<()> {
        self.lock().sessions.remove(token);
        Ok(())
    }

    async fn purge_expired_sessions(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - inner.sessions.len()) as u64)
    }
}

#[async_trait]
impl EmailRepo for MemoryStore {
    async fn insert_email(&self, email: &Email) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        if inner.emails.contains_key(&email.id) {
            return Ok(false);
        }
        inner.emails.insert(email.id.clone(), email.clone());
        Ok(true)
    }

    async fn email_exists(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.lock().emails.contains_key(id))
    }

    async fn list_emails(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Email>> {
        let mut emails: Vec<Email> = self.lock().emails.values().cloned().collect();
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(b.id.cmp(&a.id)));
        Ok(emails
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_emails(&self) -> anyhow::Result<i64> {
        Ok(self.lock().emails.len() as i64)
    }

    async fn find_email(&self, id: &str) -> anyhow::Result<Option<Email>> {
        Ok(self.lock().emails.get(id).cloned())
    }

    async fn mark_read(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.lock().emails.get_mut(id).map(|e| e.is_read = true).is_some())
    }

    async fn mark_replied(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.lock().emails.get_mut(id).map(|e| e.replied = true).is_some())
    }

    async fn delete_email(&self, id: &str) -> anyhow::Result<Option<Email>> {
        Ok(self.lock().emails.remove(id))
    }
}

#[async_trait]
impl SettingsRepo for MemoryStore {
    async fn load_settings(&self) -> anyhow::Result<ApiSettings> {
        Ok(self.lock().settings.clone().unwrap_or_default())
    }

    async fn save_settings(&self, settings: &ApiSettings) -> anyhow::Result<()> {
        let saved = ApiSettings {
            updated_at: Some(OffsetDateTime::now_utc()),
            ..settings.clone()
        };
        self.lock().settings = Some(saved);
        Ok(())
    }
}
