mod store;

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
pub use store::{AuthError, MIN_PASSWORD_LEN, UserAccount, UserStore, generate_password};
use tower_sessions::Session;

const SESSION_USER: &str = "username";

/// The logged in account, refreshed from the store on every request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub username: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

impl From<UserAccount> for CurrentUser {
    fn from(user: UserAccount) -> Self {
        Self { username: user.username, email: user.email, is_admin: user.is_admin }
    }
}

/// A logged in admin. Other users get 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

/// Bind the session to `user`, issuing a fresh session id.
pub async fn start_session(
    session: &Session,
    user: &UserAccount,
) -> Result<(), tower_sessions::session::Error> {
    session.cycle_id().await?;
    session.insert(SESSION_USER, &user.username).await?;
    tracing::info!("User {} logged in", user.username);
    Ok(())
}

pub async fn end_session(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}

impl<S> OptionalFromRequestParts<S> for CurrentUser
where
    Arc<UserStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let Some(username) = session.get::<String>(SESSION_USER).await.ok().flatten() else {
            return Ok(None);
        };
        let store = Arc::<UserStore>::from_ref(state);
        let Some(user) = store.get_user(&username).await else {
            tracing::info!("Session user {} no longer exists", username);
            if let Err(e) = session.flush().await {
                tracing::error!("Failed to flush session: {}", e);
            }
            return Ok(None);
        };
        Ok(Some(user.into()))
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<UserStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        <CurrentUser as OptionalFromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?
            .ok_or_else(|| Redirect::to("/login").into_response())
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<UserStore>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = <CurrentUser as FromRequestParts<S>>::from_request_parts(parts, state).await?;
        if !user.is_admin {
            tracing::warn!("User {} denied admin access to {}", user.username, parts.uri.path());
            return Err((StatusCode::FORBIDDEN, "Forbidden").into_response());
        }
        Ok(Self(user))
    }
}
