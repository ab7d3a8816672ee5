use std::sync::Arc;

use axum::{
    Form,
    extract::State,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracker_auth::CurrentUser;
use tracker_core::{AppError, util::parse_usernames};

use crate::{
    handlers::common::{Message, flash},
    settings::{JobDefaults, SettingsStore},
};

#[derive(Deserialize)]
pub struct DefaultsForm {
    #[serde(default)]
    organization: String,
    #[serde(default)]
    github_users: String,
}

pub async fn save_defaults(
    session: Session,
    State(settings): State<Arc<SettingsStore>>,
    _current_user: CurrentUser,
    Form(form): Form<DefaultsForm>,
) -> Result<Response, AppError> {
    let organization = form.organization.trim();
    settings
        .save(JobDefaults {
            organization: (!organization.is_empty()).then(|| organization.to_string()),
            users: parse_usernames(&form.github_users),
        })
        .await?;
    flash(&session, Message::Info("Default settings saved".to_string())).await;
    Ok(Redirect::to("/").into_response())
}

pub async fn clear_defaults(
    session: Session,
    State(settings): State<Arc<SettingsStore>>,
    _current_user: CurrentUser,
) -> Result<Response, AppError> {
    settings.clear().await?;
    flash(&session, Message::Info("Default settings cleared".to_string())).await;
    Ok(Redirect::to("/").into_response())
}
