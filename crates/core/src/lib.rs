pub mod config;
pub mod models;
pub mod util;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum AppError {
    Status(StatusCode),
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::Status(status) if status == StatusCode::NOT_FOUND => {
                (status, "Not found").into_response()
            }
            Self::Status(status) if status == StatusCode::FORBIDDEN => {
                (status, "Forbidden").into_response()
            }
            Self::Status(status) => status.into_response(),
            Self::Internal(err) => {
                tracing::error!("{:?}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Something went wrong: {}", err))
                    .into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self::Internal(err.into()) }
}

/// Content type for a served report file, by extension.
pub fn mime_from_ext(ext: &str) -> Option<mime::Mime> {
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => Some(mime::TEXT_HTML_UTF_8),
        "csv" => Some(mime::TEXT_CSV_UTF_8),
        "png" => Some(mime::IMAGE_PNG),
        "jpg" | "jpeg" => Some(mime::IMAGE_JPEG),
        "svg" => Some(mime::IMAGE_SVG),
        "json" => Some(mime::APPLICATION_JSON),
        _ => None,
    }
}
