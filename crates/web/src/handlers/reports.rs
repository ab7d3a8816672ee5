use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use tracker_auth::CurrentUser;
use tracker_core::{AppError, mime_from_ext, models::JobRecord, util::join_normalized};
use tracker_jobs::JobRegistry;
use tracker_report::HTML_FILE;

use crate::handlers::jobs::find_job;

async fn report_record(
    jobs: &JobRegistry,
    id: &str,
    current_user: &CurrentUser,
) -> Result<(JobRecord, String), AppError> {
    let record = find_job(jobs, id, current_user).await?.snapshot();
    let Some(file) = record.report_file.clone() else {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    };
    Ok((record, file))
}

pub async fn get_report(
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (record, file) = report_record(&jobs, &id, &current_user).await?;
    if file == HTML_FILE {
        // Served under /files so relative chart links resolve
        return Ok(Redirect::to(&format!("/reports/{}/files/{}", record.id, file)).into_response());
    }
    let response = serve_file(&jobs, &record, &file).await?;
    let disposition = format!("attachment; filename=\"github_activity_{}.csv\"", record.id);
    Ok(with_disposition(response, &disposition))
}

pub async fn download(
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let (record, _) = report_record(&jobs, &id, &current_user).await?;
    let dir = jobs.report_dir(&record.id);
    if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    }
    let data = tokio::task::spawn_blocking(move || tracker_report::archive_dir(&dir))
        .await
        .context("Archive task failed")??;
    tracing::info!("Serving report archive for job {} ({} bytes)", record.id, data.len());
    let response = ([(header::CONTENT_TYPE, "application/zip")], data).into_response();
    let disposition = format!("attachment; filename=\"github_activity_{}.zip\"", record.id);
    Ok(with_disposition(response, &disposition))
}

pub async fn get_file(
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (record, _) = report_record(&jobs, &id, &current_user).await?;
    serve_file(&jobs, &record, &file).await
}

async fn serve_file(
    jobs: &JobRegistry,
    record: &JobRecord,
    file: &str,
) -> Result<Response, AppError> {
    let path = join_normalized(jobs.report_dir(&record.id), file);
    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Status(StatusCode::NOT_FOUND));
        }
        Err(e) => {
            return Err(anyhow::Error::from(e)
                .context(format!("Failed to read {}", path.display()))
                .into());
        }
    };
    let mime = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_from_ext)
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);
    Ok(([(header::CONTENT_TYPE, mime.to_string())], data).into_response())
}

fn with_disposition(mut response: Response, disposition: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(disposition) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
