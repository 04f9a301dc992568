use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, instrument, warn};

use super::{
    dto::{Pagination, ReplyForm, StatusResponse},
    services::{self, ReceiveOutcome},
    webhook::verify_signature,
};
use crate::{
    auth::extractors::CurrentUser,
    error::AppError,
    settings::repo::SettingsRepo,
    state::AppState,
    views::{self, EmailPage, EmailView, InboxPage, InboxRow, Notice, NoticeQuery},
};

const WEBHOOK_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn inbox_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(inbox))
        .route("/email/:id", get(view_email).delete(delete_email))
        .route("/email/:id/reply", post(reply))
        .route("/email/:id/attachments/:attachment_id", get(attachment))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook/email", post(webhook))
        .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT))
}

#[instrument(skip(state, user), fields(username = %user.username))]
pub async fn inbox(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(page): Query<Pagination>,
    Query(notice): Query<NoticeQuery>,
) -> Result<Html<String>, AppError> {
    let inbox = services::list_inbox(&state, &user, page).await?;
    let shown = inbox.emails.len() as i64;
    views::render(&InboxPage {
        username: user.username,
        is_admin: user.is_admin,
        emails: inbox.emails.iter().map(InboxRow::from).collect(),
        total: inbox.total,
        first: if shown == 0 { 0 } else { inbox.offset + 1 },
        last: inbox.offset + shown,
        prev_offset: inbox.prev_offset(),
        next_offset: inbox.next_offset(),
        limit: inbox.limit,
        message: notice.message(),
    })
}

#[instrument(skip(state, user), fields(username = %user.username))]
pub async fn view_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(notice): Query<NoticeQuery>,
) -> Result<Html<String>, AppError> {
    let email = services::open_email(&state, &id).await?;
    views::render(&EmailPage {
        username: user.username,
        is_admin: user.is_admin,
        email: EmailView::from(&email),
        message: notice.message(),
        failed: notice.is_error(),
    })
}

/// Sends the reply and returns to the email with the outcome as a notice.
#[instrument(skip(state, user, form), fields(username = %user.username))]
pub async fn reply(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Form(form): Form<ReplyForm>,
) -> Result<Redirect, AppError> {
    let notice = match services::reply(&state, &id, &form.reply_content).await {
        Ok(()) => Notice::ReplySent,
        Err(AppError::Config(_)) => Notice::ReplyNotConfigured,
        Err(AppError::Upstream(_)) => Notice::ReplyFailed,
        Err(e) => return Err(e),
    };
    Ok(Redirect::to(&format!(
        "{}?notice={}",
        views::email_path(&id),
        notice.slug()
    )))
}

#[instrument(skip(state, user), fields(username = %user.username))]
pub async fn delete_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Response {
    match services::delete(&state, &id).await {
        Ok(()) => Json(StatusResponse::new("success", "Email deleted")).into_response(),
        Err(AppError::NotFound(what)) => (
            StatusCode::NOT_FOUND,
            Json(StatusResponse::new("error", format!("{what} not found"))),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[instrument(skip(state, _user))]
pub async fn attachment(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Path((id, attachment_id)): Path<(String, String)>,
) -> Result<Redirect, AppError> {
    let url = services::attachment_url(&state, &id, &attachment_id).await?;
    Ok(Redirect::to(&url))
}

/// Inbound mail from the provider. Signature failures answer 401 and store
/// failures 500 so the provider retries; everything else is acknowledged.
#[instrument(skip(state, headers, body), fields(len = body.len()))]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<StatusResponse>) {
    let settings = match state.store.load_settings().await {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = ?e, "load settings for webhook");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::new("error", "settings unavailable")),
            );
        }
    };

    if let Err(e) = verify_signature(settings.webhook_key(), &headers, &body, OffsetDateTime::now_utc()) {
        warn!(error = %e, "webhook rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(StatusResponse::new("rejected", e.to_string())),
        );
    }

    match services::receive(&state, &settings, &body).await {
        Ok(ReceiveOutcome::Stored(id)) => (
            StatusCode::OK,
            Json(StatusResponse::new("success", format!("Email {id} stored"))),
        ),
        Ok(ReceiveOutcome::Duplicate(id)) => (
            StatusCode::OK,
            Json(StatusResponse::new("duplicate", format!("Email {id} already stored"))),
        ),
        Ok(ReceiveOutcome::Ignored(reason)) => {
            (StatusCode::OK, Json(StatusResponse::new("ignored", reason)))
        }
        Err(e) => {
            error!(error = ?e, "storing inbound email failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatusResponse::new("error", "could not store email")),
            )
        }
    }
}
