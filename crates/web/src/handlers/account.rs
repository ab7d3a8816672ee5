use std::sync::Arc;

use axum::{
    Form,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use maud::{Markup, html};
use serde::Deserialize;
use tower_sessions::Session;
use tracker_auth::{AuthError, CurrentUser, MIN_PASSWORD_LEN, UserStore, end_session, start_session};
use tracker_core::AppError;

use crate::handlers::common::{Message, TemplateContext, flash};

pub async fn login(ctx: TemplateContext, current_user: Option<CurrentUser>) -> Response {
    if current_user.is_some() {
        return Redirect::to("/").into_response();
    }
    render_login(ctx, None, "")
}

fn render_login(ctx: TemplateContext, error: Option<&str>, username: &str) -> Response {
    let content = html! {
        h3 { "Login" }
        @if let Some(error) = error {
            article.error-card { (error) }
        }
        form method="post" action="/login" {
            label {
                "Username"
                input name="username" required autofocus autocomplete="username" value=(username);
            }
            label {
                "Password"
                input name="password" type="password" required autocomplete="current-password";
            }
            button type="submit" { "Login" }
        }
    };
    let rendered = ctx.page("Login", None, content);
    (ctx, rendered).into_response()
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

pub async fn login_save(
    ctx: TemplateContext,
    session: Session,
    State(users): State<Arc<UserStore>>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let username = form.username.trim();
    let Some(user) = users.authenticate(username, &form.password).await else {
        tracing::warn!("Failed login for {}", username);
        return Ok(render_login(ctx, Some(&AuthError::InvalidCredentials.to_string()), username));
    };
    start_session(&session, &user).await?;
    Ok(Redirect::to("/").into_response())
}

pub async fn logout(session: Session) -> Result<Response, AppError> {
    end_session(&session).await?;
    Ok(Redirect::to("/login").into_response())
}

pub async fn password(ctx: TemplateContext, current_user: CurrentUser) -> Response {
    render_password(ctx, &current_user, None)
}

fn password_form() -> Markup {
    html! {
        form method="post" action="/account/password" {
            label {
                "Current password"
                input name="current" type="password" required autocomplete="current-password";
            }
            label {
                "New password"
                input name="new" type="password" required minlength=(MIN_PASSWORD_LEN)
                    autocomplete="new-password";
                small { "At least " (MIN_PASSWORD_LEN) " characters." }
            }
            label {
                "Confirm new password"
                input name="confirm" type="password" required autocomplete="new-password";
            }
            button type="submit" { "Change password" }
        }
    }
}

fn render_password(
    ctx: TemplateContext,
    current_user: &CurrentUser,
    error: Option<&str>,
) -> Response {
    let content = html! {
        h3 { "Change password" }
        @if let Some(error) = error {
            article.error-card { (error) }
        }
        (password_form())
    };
    let rendered = ctx.page("Change password", Some(current_user), content);
    (ctx, rendered).into_response()
}

#[derive(Deserialize)]
pub struct PasswordForm {
    current: String,
    new: String,
    confirm: String,
}

pub async fn password_save(
    ctx: TemplateContext,
    session: Session,
    State(users): State<Arc<UserStore>>,
    current_user: CurrentUser,
    Form(form): Form<PasswordForm>,
) -> Result<Response, AppError> {
    if form.new != form.confirm {
        return Ok(render_password(ctx, &current_user, Some("New passwords do not match")));
    }
    match users.change_password(&current_user.username, &form.current, &form.new).await {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            return Ok(render_password(ctx, &current_user, Some("Current password is incorrect")));
        }
        Err(e @ AuthError::InvalidInput(_)) => {
            return Ok(render_password(ctx, &current_user, Some(&e.to_string())));
        }
        Err(e) => return Err(e.into()),
    }
    flash(&session, Message::Info("Password changed".to_string())).await;
    Ok(Redirect::to("/").into_response())
}
