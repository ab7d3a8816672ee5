use std::{str::FromStr, sync::Arc};

use axum::{
    Form, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use maud::{Markup, html};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, macros::format_description};
use tower_sessions::Session;
use tracker_auth::CurrentUser;
use tracker_core::{
    AppError,
    config::Config,
    models::{JobId, JobParameters, JobRecord, JobStatus, OutputFormat},
    util::{format_duration, mask_token, parse_usernames},
};
use tracker_github::GitHub;
use tracker_jobs::{Job, JobError, JobRegistry};

use crate::{
    handlers::common::{Message, TemplateContext, date, flash, timeago},
    settings::SettingsStore,
};

/// Look up a job the user may access. Other users' jobs are reported as missing.
pub async fn find_job(
    jobs: &JobRegistry,
    id: &str,
    current_user: &CurrentUser,
) -> Result<Arc<Job>, AppError> {
    let job =
        jobs.get(&JobId::new(id)).await.ok_or(AppError::Status(StatusCode::NOT_FOUND))?;
    if !current_user.is_admin && !job.owner().eq_ignore_ascii_case(&current_user.username) {
        tracing::warn!("User {} denied access to job {}", current_user.username, id);
        return Err(AppError::Status(StatusCode::NOT_FOUND));
    }
    Ok(job)
}

fn parse_date(value: &str) -> Option<Date> {
    Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).ok()
}

pub async fn index(
    ctx: TemplateContext,
    State(config): State<Arc<Config>>,
    State(settings): State<Arc<SettingsStore>>,
    current_user: CurrentUser,
) -> Response {
    let defaults = settings.defaults().await;
    let today = OffsetDateTime::now_utc().date();
    let from = today
        .checked_sub(time::Duration::days(config.worker.default_range_days.into()))
        .unwrap_or(today);
    let has_token = config.github.token.is_some();

    let content = html! {
        h3 { "New job" }
        form method="post" action="/jobs" {
            label {
                "GitHub token"
                input name="github_token" type="password" autocomplete="off"
                    required[!has_token];
                @if has_token {
                    small { "Optional. The server's configured token is used when left empty." }
                } @else {
                    small { "A personal access token with read access to the repositories." }
                }
            }
            label {
                "Organization "
                small { "(optional)" }
                input name="organization" value=(defaults.organization.as_deref().unwrap_or(""));
                small { "Only activity in this organization's repositories is included." }
            }
            label {
                "GitHub users"
                textarea name="github_users" required { (defaults.users.join("\n")) }
                small { "Separated by commas, spaces or new lines." }
            }
            .grid {
                label {
                    "From"
                    input name="date_from" type="date" required value=(from.to_string());
                }
                label {
                    "To"
                    input name="date_to" type="date" required value=(today.to_string());
                }
                label {
                    "Output format"
                    select name="output_format" {
                        @for format in OutputFormat::variants() {
                            option value=(format.as_str()) selected[*format == OutputFormat::default()] { (format.to_string()) }
                        }
                    }
                }
                label {
                    "Max workers"
                    input name="max_workers" type="number" min="0" value="0";
                    small { "0 picks a value from the CPU count." }
                }
            }
            button type="submit" { "Start" }
            " "
            button type="submit" class="secondary" formaction="/settings/defaults" formnovalidate {
                "Save organization and users as defaults"
            }
        }
        @if defaults.organization.is_some() || !defaults.users.is_empty() {
            form method="post" action="/settings/defaults/clear" {
                button type="submit" class="secondary" { "Clear defaults" }
            }
        }
    };
    let rendered = ctx.page("New job", Some(&current_user), content);
    (ctx, rendered).into_response()
}

#[derive(Deserialize)]
pub struct JobForm {
    #[serde(default)]
    github_token: String,
    #[serde(default)]
    organization: String,
    #[serde(default)]
    github_users: String,
    date_from: String,
    date_to: String,
    #[serde(default)]
    output_format: String,
    #[serde(default)]
    max_workers: String,
}

fn validate(form: &JobForm) -> Result<JobParameters, &'static str> {
    let users = parse_usernames(&form.github_users);
    if users.is_empty() {
        return Err("No GitHub users specified");
    }
    let (Some(date_from), Some(date_to)) = (parse_date(&form.date_from), parse_date(&form.date_to))
    else {
        return Err("Invalid date format");
    };
    if date_from > date_to {
        return Err("Start date must not be after the end date");
    }
    let output_format = if form.output_format.is_empty() {
        OutputFormat::default()
    } else {
        OutputFormat::from_str(&form.output_format).map_err(|_| "Unknown output format")?
    };
    let organization = form.organization.trim();
    Ok(JobParameters {
        users,
        organization: (!organization.is_empty()).then(|| organization.to_string()),
        date_from,
        date_to,
        output_format,
        max_workers: form.max_workers.trim().parse().unwrap_or(0),
        token_hint: None,
    })
}

pub async fn submit(
    session: Session,
    State(config): State<Arc<Config>>,
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Form(form): Form<JobForm>,
) -> Result<Response, AppError> {
    let token = Some(form.github_token.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| config.github.token.clone());
    let Some(token) = token else {
        flash(&session, Message::Error("GitHub token is required".to_string())).await;
        return Ok(Redirect::to("/").into_response());
    };
    let mut params = match validate(&form) {
        Ok(params) => params,
        Err(message) => {
            flash(&session, Message::Error(message.to_string())).await;
            return Ok(Redirect::to("/").into_response());
        }
    };
    params.token_hint = Some(mask_token(&token));

    let github = GitHub::new(&token, config.github.api_url.as_deref())?;
    let job = jobs.create(&current_user.username, params).await?;
    jobs.spawn(job.clone(), github);
    Ok(Redirect::to(&format!("/jobs/{}", job.id())).into_response())
}

pub async fn list(
    ctx: TemplateContext,
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
) -> Response {
    let owner = (!current_user.is_admin).then_some(current_user.username.as_str());
    let records = jobs.list(owner).await;
    let content = html! {
        h3 { "Jobs" }
        @if records.is_empty() {
            article { "No jobs yet. " a href="/" { "Start one" } "." }
        } @else {
            table {
                thead {
                    tr {
                        th { "Job" }
                        @if current_user.is_admin { th { "Owner" } }
                        th { "Status" }
                        th { "Users" }
                        th { "Range" }
                        th { "Started" }
                        th { "Duration" }
                        th { "Report" }
                    }
                }
                tbody {
                    @for record in &records {
                        tr {
                            td { a href=(format!("/jobs/{}", record.id)) { code { (record.id.as_str()) } } }
                            @if current_user.is_admin { td { (record.owner) } }
                            td class=(format!("status-{}", record.status.as_str())) { (record.status.to_string()) }
                            td { (record.processed_users) "/" (record.total_users) }
                            td { (record.parameters.date_from.to_string()) " to " (record.parameters.date_to.to_string()) }
                            td title=(date(record.started_at)) { (timeago(record.started_at)) }
                            td { (format_duration(record.elapsed())) }
                            td {
                                @if record.report_file.is_some() {
                                    a href=(format!("/reports/{}", record.id)) { "View" }
                                }
                            }
                        }
                    }
                }
            }
        }
    };
    let rendered = ctx.page("Jobs", Some(&current_user), content);
    (ctx, rendered).into_response()
}

fn status_fragment(record: &JobRecord) -> Markup {
    let params = &record.parameters;
    html! {
        article {
            p {
                "Status: " strong class=(format!("status-{}", record.status.as_str())) { (record.status.to_string()) }
            }
            progress value=(record.processed_users) max=(record.total_users.max(1)) {}
            p {
                (record.processed_users) " of " (record.total_users) " users processed ("
                (format!("{:.0}", record.progress_percent())) "%)"
                @if let Some(user) = &record.current_user {
                    ", fetching " strong { (user) }
                }
            }
            p class="muted" {
                "Started " (date(record.started_at))
                @if let Some(ended_at) = record.ended_at {
                    ", ended " (date(ended_at))
                }
                " (" (format_duration(record.elapsed())) ")"
            }
        }
        article {
            h4 { "Parameters" }
            ul {
                li { "Users: " (params.users.join(", ")) }
                li { "Organization: " (params.organization.as_deref().unwrap_or("any")) }
                li { "Range: " (params.date_from.to_string()) " to " (params.date_to.to_string()) }
                li { "Output: " (params.output_format.to_string()) }
                li {
                    "Workers: "
                    @if params.max_workers == 0 { "auto" } @else { (params.max_workers) }
                }
                @if let Some(token) = &params.token_hint {
                    li { "Token: " code { (token) } }
                }
                li { "Activities found: " (record.activities.len()) }
            }
        }
    }
}

pub async fn status(
    ctx: TemplateContext,
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job = find_job(&jobs, &id, &current_user).await?;
    let record = job.snapshot();
    let content = html! {
        @if record.status.is_active() {
            meta http-equiv="refresh" content="3";
        }
        h3 { "Job " code { (record.id.as_str()) } }
        (status_fragment(&record))
        @if !record.errors.is_empty() {
            article.error-card {
                h4 { "Errors" }
                ul {
                    @for error in &record.errors {
                        li { (error) }
                    }
                }
            }
        }
        .grid {
            @if record.report_file.is_some() {
                a class="button" href=(format!("/reports/{}", record.id)) { "View report" }
                a class="button secondary" href=(format!("/reports/{}/download", record.id)) { "Download ZIP" }
            }
            @if record.status.is_active() {
                form method="post" action=(format!("/jobs/{}/cancel", record.id)) {
                    button type="submit" class="danger" { "Cancel" }
                }
            } @else {
                form method="post" action=(format!("/jobs/{}/delete", record.id)) {
                    button type="submit" class="danger" { "Delete" }
                }
            }
        }
    };
    let rendered = ctx.page(&format!("Job {}", record.id), Some(&current_user), content);
    Ok((ctx, rendered).into_response())
}

/// Polling view of a job, without the collected activities.
#[derive(Serialize)]
pub struct JobData {
    id: JobId,
    owner: String,
    status: JobStatus,
    processed_users: usize,
    total_users: usize,
    progress: f32,
    current_user: Option<String>,
    activities: usize,
    errors: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    ended_at: Option<OffsetDateTime>,
    elapsed: String,
    report_url: Option<String>,
}

impl From<JobRecord> for JobData {
    fn from(record: JobRecord) -> Self {
        Self {
            progress: record.progress_percent(),
            elapsed: format_duration(record.elapsed()),
            activities: record.activities.len(),
            report_url: record.report_file.as_ref().map(|_| format!("/reports/{}", record.id)),
            id: record.id,
            owner: record.owner,
            status: record.status,
            processed_users: record.processed_users,
            total_users: record.total_users,
            current_user: record.current_user,
            errors: record.errors,
            started_at: record.started_at,
            ended_at: record.ended_at,
        }
    }
}

pub async fn data(
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<JobData>, AppError> {
    let job = find_job(&jobs, &id, &current_user).await?;
    Ok(Json(job.snapshot().into()))
}

pub async fn cancel(
    session: Session,
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job = find_job(&jobs, &id, &current_user).await?;
    let message = match jobs.cancel(job.id()).await {
        Ok(_) => Message::Info("Job cancelled".to_string()),
        Err(JobError::NotRunning) => Message::Error("Job is not running".to_string()),
        Err(JobError::NotFound) => return Err(AppError::Status(StatusCode::NOT_FOUND)),
        Err(e) => return Err(e.into()),
    };
    flash(&session, message).await;
    Ok(Redirect::to(&format!("/jobs/{}", job.id())).into_response())
}

pub async fn delete(
    session: Session,
    State(jobs): State<Arc<JobRegistry>>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job = find_job(&jobs, &id, &current_user).await?;
    match jobs.delete(job.id()).await {
        Ok(()) => {
            flash(&session, Message::Info("Job deleted".to_string())).await;
            Ok(Redirect::to("/jobs").into_response())
        }
        Err(JobError::StillRunning) => {
            flash(&session, Message::Error("Cannot delete a running job".to_string())).await;
            Ok(Redirect::to(&format!("/jobs/{}", job.id())).into_response())
        }
        Err(JobError::NotFound) => Err(AppError::Status(StatusCode::NOT_FOUND)),
        Err(e) => Err(e.into()),
    }
}
