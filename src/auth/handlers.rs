use axum::{
    extract::{FromRef, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{LoginForm, SetupForm},
        extractors::CurrentUser,
        services::{self, IssuedSession},
        session::{token_from_headers, SessionKeys},
    },
    error::AppError,
    state::AppState,
    views::{self, LoginPage, Notice, NoticeQuery, SetupPage},
};

pub fn setup_routes() -> Router<AppState> {
    Router::new().route("/setup", get(setup_page).post(setup))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
}

/// Redirect that also sets the freshly issued session cookie.
fn signed_in(state: &AppState, issued: &IssuedSession) -> Response {
    let cookie = SessionKeys::from_ref(state).cookie(&issued.token);
    ([(SET_COOKIE, cookie)], Redirect::to("/")).into_response()
}

fn setup_form_page(
    status: StatusCode,
    message: Option<String>,
    username: String,
    email: String,
) -> Result<Response, AppError> {
    let page = views::render(&SetupPage {
        message,
        username,
        email,
    })?;
    Ok((status, page).into_response())
}

#[instrument(skip(state))]
pub async fn setup_page(State(state): State<AppState>) -> Result<Response, AppError> {
    if state.is_bootstrapped().await? {
        return Ok(Redirect::to("/login").into_response());
    }
    setup_form_page(StatusCode::OK, None, String::new(), String::new())
}

#[instrument(skip(state, form), fields(username = %form.username))]
pub async fn setup(
    State(state): State<AppState>,
    Form(form): Form<SetupForm>,
) -> Result<Response, AppError> {
    if state.is_bootstrapped().await? {
        return Ok(Redirect::to("/login").into_response());
    }

    let (username, email) = (form.username.clone(), form.email.clone());
    match services::setup(&state, form).await {
        Ok(issued) => Ok(signed_in(&state, &issued)),
        Err(AppError::Validation(msg)) => {
            setup_form_page(StatusCode::BAD_REQUEST, Some(msg), username, email)
        }
        Err(e) => Err(e),
    }
}

#[instrument(skip_all)]
pub async fn login_page(
    current: Option<CurrentUser>,
    Query(notice): Query<NoticeQuery>,
) -> Result<Response, AppError> {
    if current.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let page: Html<String> = views::render(&LoginPage {
        message: notice.message(),
    })?;
    Ok(page.into_response())
}

#[instrument(skip(state, form), fields(username = %form.username))]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    match services::login(&state, &form.username, &form.password).await {
        Ok(issued) => Ok(signed_in(&state, &issued)),
        Err(AppError::Auth(_)) => Ok(Redirect::to(&format!(
            "/login?notice={}",
            Notice::InvalidCredentials.slug()
        ))
        .into_response()),
        Err(e) => Err(e),
    }
}

#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let token = token_from_headers(&headers);
    services::logout(&state, token.as_deref()).await?;
    let cookie = SessionKeys::from_ref(&state).clear_cookie();
    Ok((
        [(SET_COOKIE, cookie)],
        Redirect::to(&format!("/login?notice={}", Notice::LoggedOut.slug())),
    )
        .into_response())
}
