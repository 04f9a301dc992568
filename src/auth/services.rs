use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    auth::{
        dto::{CreateUserForm, SetupForm},
        password::{hash_password, verify_password},
        repo::{SessionRepo, UserRepo},
        repo_types::{DeleteUserOutcome, NewUser, Session, User},
        session::{new_session_id, SessionKeys},
    },
    error::AppError,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9._-]{1,64}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

// Checked against on unknown usernames so a miss costs as much as a wrong password.
fn dummy_hash() -> Option<&'static str> {
    lazy_static! {
        static ref DUMMY_HASH: Option<String> = hash_password("mailroom-unknown-user").ok();
    }
    DUMMY_HASH.as_deref()
}

/// A freshly issued session: the signed cookie value and its owner.
#[derive(Debug)]
pub struct IssuedSession {
    pub token: String,
    pub user: User,
}

fn validate_account(username: &str, email: &str, password: &str) -> Result<(), AppError> {
    if !is_valid_username(username) {
        return Err(AppError::Validation(
            "Username may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    if !is_valid_email(email) {
        return Err(AppError::Validation("Invalid email".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

async fn issue_session(state: &AppState, user: User) -> Result<IssuedSession, AppError> {
    let keys = SessionKeys::from_ref(state);
    let now = OffsetDateTime::now_utc();
    let expires_at = now + time::Duration::seconds(keys.ttl.as_secs() as i64);
    let session = Session {
        token: new_session_id(),
        username: user.username.clone(),
        created_at: now,
        expires_at,
    };
    state.store.insert_session(&session).await?;
    let token = keys.sign(&session.token, &user.username, now, expires_at)?;
    Ok(IssuedSession { token, user })
}

/// Checks credentials and opens a new session.
pub async fn login(state: &AppState, username: &str, password: &str) -> Result<IssuedSession, AppError> {
    let username = username.trim();

    let Some(user) = state.store.find_user(username).await? else {
        if let Some(hash) = dummy_hash() {
            let _ = verify_password(password, hash);
        }
        warn!(username, "login unknown user");
        return Err(AppError::Auth("invalid credentials".into()));
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(username, "login invalid password");
        return Err(AppError::Auth("invalid credentials".into()));
    }

    let now = OffsetDateTime::now_utc();
    match state.store.purge_expired_sessions(now).await {
        Ok(0) => {}
        Ok(purged) => info!(purged, "expired sessions purged"),
        Err(e) => warn!(error = %e, "purging expired sessions failed"),
    }
    state.store.touch_last_login(&user.username, now).await?;

    let issued = issue_session(state, user).await?;
    info!(username = %issued.user.username, "user logged in");
    Ok(issued)
}

/// Maps a session cookie back to its user.
pub async fn resolve(state: &AppState, token: Option<&str>) -> Result<User, AppError> {
    let token = token.ok_or_else(|| AppError::Auth("missing session".into()))?;
    let keys = SessionKeys::from_ref(state);
    let claims = keys
        .verify(token)
        .map_err(|_| AppError::Auth("invalid or expired session".into()))?;

    let session = state
        .store
        .find_session(&claims.sid)
        .await?
        .ok_or_else(|| AppError::Auth("unknown session".into()))?;

    if session.is_expired(OffsetDateTime::now_utc()) {
        state.store.delete_session(&session.token).await?;
        return Err(AppError::Auth("session expired".into()));
    }
    if session.username != claims.sub {
        warn!(sid_user = %session.username, cookie_user = %claims.sub, "session owner mismatch");
        return Err(AppError::Auth("invalid session".into()));
    }

    state
        .store
        .find_user(&session.username)
        .await?
        .ok_or_else(|| AppError::Auth("user no longer exists".into()))
}

/// Revokes the session behind the cookie. Missing, forged or already revoked
/// cookies are not errors.
pub async fn logout(state: &AppState, token: Option<&str>) -> Result<(), AppError> {
    let Some(token) = token else {
        return Ok(());
    };
    let keys = SessionKeys::from_ref(state);
    match keys.verify_ignoring_expiry(token) {
        Ok(claims) => {
            state.store.delete_session(&claims.sid).await?;
            info!(username = %claims.sub, "user logged out");
        }
        Err(e) => warn!(error = %e, "logout with unverifiable cookie"),
    }
    Ok(())
}

pub fn require_admin(user: &User) -> Result<(), AppError> {
    if user.is_admin {
        Ok(())
    } else {
        warn!(username = %user.username, "admin route denied");
        Err(AppError::Authz)
    }
}

/// One-time creation of the first admin, followed by an immediate login.
pub async fn setup(state: &AppState, form: SetupForm) -> Result<IssuedSession, AppError> {
    let username = form.username.trim();
    let email = form.email.trim().to_lowercase();

    if form.password != form.confirm_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }
    validate_account(username, &email, &form.password)?;

    let new = NewUser {
        username: username.to_string(),
        email,
        password_hash: hash_password(&form.password)?,
        is_admin: true,
    };
    let Some(user) = state.store.create_first_admin(&new).await? else {
        warn!(username, "setup rejected: already completed");
        return Err(AppError::Validation("Setup has already been completed".into()));
    };

    state.mark_bootstrapped();
    info!(username = %user.username, "first admin created");
    issue_session(state, user).await
}

pub async fn list_users(state: &AppState, admin: &User) -> Result<Vec<User>, AppError> {
    require_admin(admin)?;
    Ok(state.store.list_users().await?)
}

pub async fn create_user(state: &AppState, admin: &User, form: CreateUserForm) -> Result<User, AppError> {
    require_admin(admin)?;

    let username = form.username.trim();
    let email = form.email.trim().to_lowercase();
    validate_account(username, &email, &form.password)?;

    let new = NewUser {
        username: username.to_string(),
        email,
        password_hash: hash_password(&form.password)?,
        is_admin: form.wants_admin(),
    };
    let user = state
        .store
        .create_user(&new)
        .await?
        .ok_or_else(|| AppError::Validation("Username or email already exists".into()))?;

    info!(created = %user.username, is_admin = user.is_admin, by = %admin.username, "user created");
    Ok(user)
}

pub async fn delete_user(state: &AppState, admin: &User, username: &str) -> Result<(), AppError> {
    require_admin(admin)?;

    if admin.username == username {
        return Err(AppError::Validation("You cannot delete your own account".into()));
    }

    match state.store.delete_user(username).await? {
        DeleteUserOutcome::Deleted => {
            info!(deleted = %username, by = %admin.username, "user deleted");
            Ok(())
        }
        DeleteUserOutcome::NotFound => Err(AppError::NotFound("User")),
        DeleteUserOutcome::LastAdmin => Err(AppError::Validation(
            "Cannot delete the last remaining admin".into(),
        )),
    }
}
