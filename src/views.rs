use askama::Template;
use axum::{http::StatusCode, response::Html};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use time::{macros::format_description, OffsetDateTime};

use crate::{
    auth::repo_types::User,
    emails::repo_types::Email,
    error::AppError,
    settings::repo_types::ApiSettings,
};

/// One-shot messages passed through a redirect as `?notice=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    InvalidCredentials,
    LoggedOut,
    ReplySent,
    ReplyFailed,
    ReplyNotConfigured,
    SettingsSaved,
    UserCreated,
}

impl Notice {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "invalid-credentials" => Some(Self::InvalidCredentials),
            "logged-out" => Some(Self::LoggedOut),
            "reply-sent" => Some(Self::ReplySent),
            "reply-failed" => Some(Self::ReplyFailed),
            "reply-not-configured" => Some(Self::ReplyNotConfigured),
            "settings-saved" => Some(Self::SettingsSaved),
            "user-created" => Some(Self::UserCreated),
            _ => None,
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid-credentials",
            Self::LoggedOut => "logged-out",
            Self::ReplySent => "reply-sent",
            Self::ReplyFailed => "reply-failed",
            Self::ReplyNotConfigured => "reply-not-configured",
            Self::SettingsSaved => "settings-saved",
            Self::UserCreated => "user-created",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password",
            Self::LoggedOut => "You have been logged out",
            Self::ReplySent => "Reply sent successfully",
            Self::ReplyFailed => "Failed to send reply, please try again",
            Self::ReplyNotConfigured => "Resend API key not configured",
            Self::SettingsSaved => "Settings updated successfully",
            Self::UserCreated => "User created successfully",
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::ReplyFailed | Self::ReplyNotConfigured
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct NoticeQuery {
    pub notice: Option<String>,
}

impl NoticeQuery {
    pub fn notice(&self) -> Option<Notice> {
        self.notice.as_deref().and_then(Notice::parse)
    }

    pub fn message(&self) -> Option<String> {
        self.notice().map(|n| n.message().to_string())
    }

    pub fn is_error(&self) -> bool {
        self.notice().is_some_and(Notice::is_error)
    }
}

// RFC 3986 unreserved characters minus '.', so "." and ".." ids stay opaque.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'~');

/// Percent-encodes one path segment. Email ids come from the provider and may
/// hold '/', '?', '#' or control bytes.
pub fn path_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

pub fn email_path(id: &str) -> String {
    format!("/email/{}", path_segment(id))
}

pub fn display_time(t: OffsetDateTime) -> String {
    t.format(format_description!("[year]-[month]-[day] [hour]:[minute] UTC"))
        .unwrap_or_else(|_| t.to_string())
}

pub fn render<T: Template>(tmpl: &T) -> Result<Html<String>, AppError> {
    tmpl.render()
        .map(Html)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("render template: {e}")))
}

// ── Templates ──

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginPage {
    pub message: Option<String>,
}

#[derive(Template)]
#[template(path = "setup.html")]
pub struct SetupPage {
    pub message: Option<String>,
    pub username: String,
    pub email: String,
}

pub struct InboxRow {
    pub href: String,
    pub from: String,
    pub subject: String,
    pub received_at: String,
    pub is_read: bool,
    pub replied: bool,
    pub attachment_count: usize,
}

impl From<&Email> for InboxRow {
    fn from(e: &Email) -> Self {
        Self {
            href: email_path(&e.id),
            from: e.from.clone(),
            subject: e.subject.clone(),
            received_at: display_time(e.received_at),
            is_read: e.is_read,
            replied: e.replied,
            attachment_count: e.attachments.len(),
        }
    }
}

#[derive(Template)]
#[template(path = "inbox.html")]
pub struct InboxPage {
    pub username: String,
    pub is_admin: bool,
    pub emails: Vec<InboxRow>,
    pub total: i64,
    pub first: i64,
    pub last: i64,
    pub prev_offset: Option<i64>,
    pub next_offset: Option<i64>,
    pub limit: i64,
    pub message: Option<String>,
}

pub struct AttachmentRow {
    pub href: String,
    pub filename: String,
    pub content_type: String,
    pub stored: bool,
}

pub struct EmailView {
    /// Encoded `/email/{id}`; the reply, delete and attachment links hang off it.
    pub path: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub received_at: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<AttachmentRow>,
    pub replied: bool,
}

impl From<&Email> for EmailView {
    fn from(e: &Email) -> Self {
        let path = email_path(&e.id);
        Self {
            from: e.from.clone(),
            to: e.to.join(", "),
            cc: e.cc.join(", "),
            subject: e.subject.clone(),
            received_at: display_time(e.received_at),
            body_text: e.body_text.clone(),
            body_html: e.body_html.clone(),
            attachments: e
                .attachments
                .iter()
                .map(|a| AttachmentRow {
                    href: format!("{path}/attachments/{}", path_segment(&a.id)),
                    filename: a.filename.clone(),
                    content_type: a.content_type.clone(),
                    stored: a.storage_ref.is_some(),
                })
                .collect(),
            replied: e.replied,
            path,
        }
    }
}

#[derive(Template)]
#[template(path = "email.html")]
pub struct EmailPage {
    pub username: String,
    pub is_admin: bool,
    pub email: EmailView,
    pub message: Option<String>,
    pub failed: bool,
}

pub struct UserRow {
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login: String,
}

impl From<&User> for UserRow {
    fn from(u: &User) -> Self {
        Self {
            username: u.username.clone(),
            email: u.email.clone(),
            is_admin: u.is_admin,
            created_at: display_time(u.created_at),
            last_login: u.last_login.map(display_time).unwrap_or_else(|| "never".into()),
        }
    }
}

#[derive(Template)]
#[template(path = "settings.html")]
pub struct SettingsPage {
    pub username: String,
    pub settings: ApiSettings,
    pub users: Vec<UserRow>,
    pub message: Option<String>,
    pub failed: bool,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorPage<'a> {
    pub status: u16,
    pub reason: &'a str,
    pub message: &'a str,
}

pub fn error_page(status: StatusCode, message: &str) -> Html<String> {
    let page = ErrorPage {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or("Error"),
        message,
    };
    match page.render() {
        Ok(html) => Html(html),
        Err(_) => Html(format!("<h1>{}</h1>", status.as_u16())),
    }
}
