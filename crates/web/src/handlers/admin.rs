use std::sync::Arc;

use axum::{
    Form,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use maud::html;
use serde::Deserialize;
use tower_sessions::Session;
use tracker_auth::{
    AdminUser, AuthError, CurrentUser, MIN_PASSWORD_LEN, UserAccount, UserStore, generate_password,
};
use tracker_core::AppError;

use crate::handlers::common::{Message, TemplateContext, date, flash};

pub async fn users(
    ctx: TemplateContext,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
) -> Response {
    let users = store.list_users().await;
    let content = html! {
        h3 { "Users" }
        p { a class="button" href="/admin/users/new" { "Add user" } }
        table {
            thead {
                tr {
                    th { "Username" }
                    th { "Email" }
                    th { "Admin" }
                    th { "Created" }
                    th { "Actions" }
                }
            }
            tbody {
                @for user in &users {
                    @let path = format!("/admin/users/{}", user.username);
                    tr {
                        td { a href=(path) { (user.username) } }
                        td { (user.email.as_deref().unwrap_or("")) }
                        td { @if user.is_admin { "Yes" } @else { "No" } }
                        td { (date(user.created_at)) }
                        td {
                            form method="post" action=(format!("{path}/password")) class="inline" {
                                button type="submit" class="secondary" { "Reset password" }
                            }
                            " "
                            @if !user.username.eq_ignore_ascii_case(&current_user.username) {
                                form method="post" action=(format!("{path}/delete")) class="inline" {
                                    button type="submit" class="danger" { "Delete" }
                                }
                            }
                        }
                    }
                }
            }
        }
    };
    let rendered = ctx.page("Users", Some(&current_user), content);
    (ctx, rendered).into_response()
}

pub async fn new(ctx: TemplateContext, AdminUser(current_user): AdminUser) -> Response {
    render_new(ctx, &current_user, None, &NewUserForm::default())
}

#[derive(Deserialize, Default)]
pub struct NewUserForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    is_admin: Option<String>,
}

fn render_new(
    ctx: TemplateContext,
    current_user: &CurrentUser,
    error: Option<&str>,
    form: &NewUserForm,
) -> Response {
    let content = html! {
        h3 { "Add user" }
        @if let Some(error) = error {
            article.error-card { (error) }
        }
        form method="post" action="/admin/users/new" {
            label {
                "Username"
                input name="username" required value=(form.username);
            }
            label {
                "Email "
                small { "(optional)" }
                input name="email" type="email" value=(form.email);
            }
            label {
                "Password"
                input name="password" type="password" required minlength=(MIN_PASSWORD_LEN)
                    autocomplete="new-password";
            }
            label {
                input name="is_admin" type="checkbox" checked[form.is_admin.is_some()];
                " Administrator"
            }
            button type="submit" { "Add" }
        }
    };
    let rendered = ctx.page("Add user", Some(current_user), content);
    (ctx, rendered).into_response()
}

pub async fn new_save(
    ctx: TemplateContext,
    session: Session,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
    Form(form): Form<NewUserForm>,
) -> Result<Response, AppError> {
    let username = form.username.trim();
    let email = Some(form.email.trim().to_string());
    match store.add_user(username, email, &form.password, form.is_admin.is_some()).await {
        Ok(user) => {
            flash(&session, Message::Info(format!("User {} added", user.username))).await;
            Ok(Redirect::to("/admin/users").into_response())
        }
        Err(e @ (AuthError::UserExists(_) | AuthError::InvalidInput(_))) => {
            Ok(render_new(ctx, &current_user, Some(&e.to_string()), &form))
        }
        Err(e) => Err(e.into()),
    }
}

async fn find_user(store: &UserStore, username: &str) -> Result<UserAccount, AppError> {
    store.get_user(username).await.ok_or(AppError::Status(StatusCode::NOT_FOUND))
}

pub async fn edit(
    ctx: TemplateContext,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = find_user(&store, &username).await?;
    let content = html! {
        h3 { "Edit " (user.username) }
        form method="post" action=(format!("/admin/users/{}", user.username)) {
            label {
                "Username"
                input type="text" readonly disabled value=(user.username);
            }
            label {
                "Email "
                small { "(optional)" }
                input name="email" type="email" value=(user.email.as_deref().unwrap_or(""));
            }
            label {
                input name="is_admin" type="checkbox" checked[user.is_admin];
                " Administrator"
            }
            button type="submit" { "Save" }
        }
    };
    let rendered = ctx.page(&format!("Edit {}", user.username), Some(&current_user), content);
    Ok((ctx, rendered).into_response())
}

#[derive(Deserialize)]
pub struct EditUserForm {
    #[serde(default)]
    email: String,
    is_admin: Option<String>,
}

pub async fn edit_save(
    session: Session,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
    Path(username): Path<String>,
    Form(form): Form<EditUserForm>,
) -> Result<Response, AppError> {
    let user = find_user(&store, &username).await?;
    let is_admin = form.is_admin.is_some();
    if !is_admin && user.username.eq_ignore_ascii_case(&current_user.username) {
        flash(&session, Message::Error("You cannot remove your own admin access".to_string()))
            .await;
        return Ok(Redirect::to(&format!("/admin/users/{}", user.username)).into_response());
    }
    let email = Some(form.email.trim().to_string());
    let user = store.update_user(&user.username, email, is_admin).await?;
    flash(&session, Message::Info(format!("User {} updated", user.username))).await;
    Ok(Redirect::to("/admin/users").into_response())
}

pub async fn reset_password(
    session: Session,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let user = find_user(&store, &username).await?;
    let password = generate_password()?;
    store.set_password(&user.username, &password).await?;
    tracing::info!("User {} reset the password of {}", current_user.username, user.username);
    flash(
        &session,
        Message::Info(format!("Password for {} reset to: {}", user.username, password)),
    )
    .await;
    Ok(Redirect::to("/admin/users").into_response())
}

pub async fn delete(
    session: Session,
    State(store): State<Arc<UserStore>>,
    AdminUser(current_user): AdminUser,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let message = match store.delete_user(&username, Some(&current_user.username)).await {
        Ok(()) => Message::Info(format!("User {} deleted", username)),
        Err(e @ AuthError::CannotDeleteSelf) => Message::Error(e.to_string()),
        Err(AuthError::UserNotFound(_)) => return Err(AppError::Status(StatusCode::NOT_FOUND)),
        Err(e) => return Err(e.into()),
    };
    flash(&session, message).await;
    Ok(Redirect::to("/admin/users").into_response())
}
