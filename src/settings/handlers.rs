use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Form, Json, Router,
};
use tracing::instrument;

use super::{dto::ApiSettingsForm, services};
use crate::{
    auth::{
        dto::CreateUserForm,
        extractors::AdminUser,
        repo_types::User,
        services as auth_services,
    },
    emails::dto::StatusResponse,
    error::AppError,
    state::AppState,
    views::{self, Notice, NoticeQuery, SettingsPage, UserRow},
};

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/settings", get(settings_page))
        .route("/settings/api", post(update_api))
        .route("/settings/users", post(create_user))
        .route("/settings/users/:username", delete(delete_user))
}

async fn render_settings(
    state: &AppState,
    admin: User,
    status: StatusCode,
    message: Option<String>,
    failed: bool,
) -> Result<Response, AppError> {
    let settings = services::load(state, &admin).await?;
    let users = auth_services::list_users(state, &admin).await?;
    let page = views::render(&SettingsPage {
        username: admin.username,
        settings,
        users: users.iter().map(UserRow::from).collect(),
        message,
        failed,
    })?;
    Ok((status, page).into_response())
}

/// Validation failures re-render the page with the message; anything else
/// goes through the normal error response.
async fn rerender_on_validation(
    state: &AppState,
    admin: User,
    err: AppError,
) -> Result<Response, AppError> {
    match err {
        AppError::Validation(msg) => {
            render_settings(state, admin, StatusCode::BAD_REQUEST, Some(msg), true).await
        }
        other => Err(other),
    }
}

#[instrument(skip(state, admin), fields(username = %admin.username))]
pub async fn settings_page(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(notice): Query<NoticeQuery>,
) -> Result<Response, AppError> {
    let failed = notice.is_error();
    render_settings(&state, admin, StatusCode::OK, notice.message(), failed).await
}

#[instrument(skip(state, admin, form), fields(username = %admin.username))]
pub async fn update_api(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(form): Form<ApiSettingsForm>,
) -> Result<Response, AppError> {
    match services::update_api_settings(&state, &admin, form).await {
        Ok(_) => Ok(saved(Notice::SettingsSaved)),
        Err(e) => rerender_on_validation(&state, admin, e).await,
    }
}

#[instrument(skip(state, admin, form), fields(username = %admin.username, new_user = %form.username))]
pub async fn create_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Form(form): Form<CreateUserForm>,
) -> Result<Response, AppError> {
    match auth_services::create_user(&state, &admin, form).await {
        Ok(_) => Ok(saved(Notice::UserCreated)),
        Err(e) => rerender_on_validation(&state, admin, e).await,
    }
}

#[instrument(skip(state, admin), fields(by = %admin.username))]
pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(username): Path<String>,
) -> Response {
    match auth_services::delete_user(&state, &admin, &username).await {
        Ok(()) => Json(StatusResponse::new("success", format!("User {username} deleted"))).into_response(),
        Err(e @ (AppError::Validation(_) | AppError::NotFound(_))) => (
            e.status(),
            Json(StatusResponse::new("error", e.to_string())),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

fn saved(notice: Notice) -> Response {
    Redirect::to(&format!("/settings?notice={}", notice.slug())).into_response()
}
