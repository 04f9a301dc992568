use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::{
    repo_types::User,
    services::{require_admin, resolve},
    session::token_from_headers,
};
use crate::{error::AppError, state::AppState};

/// The user behind the request's session cookie.
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_headers(&parts.headers);
        let user = resolve(state, token.as_deref()).await?;
        Ok(CurrentUser(user))
    }
}

/// Like [`CurrentUser`], but only admins get through.
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        require_admin(&user)?;
        Ok(AdminUser(user))
    }
}
