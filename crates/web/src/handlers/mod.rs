use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

mod account;
mod admin;
mod common;
mod jobs;
mod reports;
mod settings;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::index))
        .route("/login", get(account::login).post(account::login_save))
        .route("/logout", post(account::logout))
        .route("/account/password", get(account::password).post(account::password_save))
        .route("/jobs", get(jobs::list).post(jobs::submit))
        .route("/jobs/{id}", get(jobs::status))
        .route("/jobs/{id}/data", get(jobs::data))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
        .route("/jobs/{id}/delete", post(jobs::delete))
        .route("/reports/{id}", get(reports::get_report))
        .route("/reports/{id}/download", get(reports::download))
        .route("/reports/{id}/files/{*file}", get(reports::get_file))
        .route("/settings/defaults", post(settings::save_defaults))
        .route("/settings/defaults/clear", post(settings::clear_defaults))
        .route("/admin/users", get(admin::users))
        .route("/admin/users/new", get(admin::new).post(admin::new_save))
        .route("/admin/users/{username}", get(admin::edit).post(admin::edit_save))
        .route("/admin/users/{username}/password", post(admin::reset_password))
        .route("/admin/users/{username}/delete", post(admin::delete))
}
