use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result, bail};
use argp::FromArgs;
use time::{Date, OffsetDateTime};
use tracker_core::{
    config::ReportsConfig,
    models::{Activity, JobParameters, JobStatus, OutputFormat},
    util::{format_duration, mask_token},
};
use tracker_github::GitHub;
use tracker_jobs::{ActivitySource, JobRegistry};

use crate::util::{collect_users, date, load_config, output_format};

#[derive(FromArgs, PartialEq, Debug)]
/// Fetch GitHub activity for a list of users and write a report.
#[argp(subcommand, name = "track")]
pub struct Args {
    #[argp(option, short = 'u')]
    /// GitHub username(s); repeatable, comma separated lists are accepted
    users: Vec<String>,
    #[argp(option, short = 'f')]
    /// file with one username per line
    users_file: Option<PathBuf>,
    #[argp(option, short = 's', from_str_fn(date))]
    /// first day to include (YYYY-MM-DD)
    start_date: Date,
    #[argp(option, short = 'e', from_str_fn(date))]
    /// last day to include (YYYY-MM-DD, default: today)
    end_date: Option<Date>,
    #[argp(option)]
    /// only include repositories owned by this organization
    org: Option<String>,
    #[argp(option, short = 'o', from_str_fn(output_format))]
    /// report format: html or csv (default: html)
    output: Option<OutputFormat>,
    #[argp(option, short = 'j')]
    /// concurrent fetches (default: from config or CPU count)
    max_workers: Option<usize>,
    #[argp(option, short = 'd')]
    /// output directory (default: configured reports dir)
    out_dir: Option<PathBuf>,
    #[argp(positional)]
    /// more GitHub usernames, as in `--users alice bob`
    more_users: Vec<String>,
}

impl Args {
    fn usernames(&self) -> Vec<String> {
        self.users.iter().chain(&self.more_users).cloned().collect()
    }
}

/// Prints a line as each user finishes.
struct Progress<S> {
    inner: S,
    total: usize,
    done: AtomicUsize,
}

impl<S: ActivitySource> ActivitySource for Progress<S> {
    async fn verify(&self) -> Result<()> { self.inner.verify().await }

    async fn user_activities(
        &self,
        username: &str,
        from: Date,
        to: Date,
        org: Option<&str>,
    ) -> Result<Vec<Activity>> {
        let result = self.inner.user_activities(username, from, to, org).await;
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        match &result {
            Ok(activities) => {
                println!("[{done}/{}] {username}: {} activities", self.total, activities.len())
            }
            Err(e) => println!("[{done}/{}] {username}: failed: {e:#}", self.total),
        }
        result
    }
}

pub async fn run(args: Args) -> Result<()> {
    let config = load_config()?;
    let users = collect_users(&args.usernames(), args.users_file.as_deref())?;
    if users.is_empty() {
        bail!("No GitHub users specified (use --users or --users-file)");
    }
    let end_date = args.end_date.unwrap_or_else(|| OffsetDateTime::now_utc().date());
    if args.start_date > end_date {
        bail!("Start date {} is after end date {}", args.start_date, end_date);
    }
    let token = std::env::var("GITHUB_TOKEN")
        .ok()
        .filter(|t| !t.is_empty())
        .or_else(|| config.github.token.clone())
        .context("GitHub token required: set GITHUB_TOKEN or github.token in the config")?;

    let reports = ReportsConfig {
        dir: args.out_dir.unwrap_or_else(|| config.reports.dir.clone()),
        ticket_url_prefix: config.reports.ticket_url_prefix.clone(),
    };
    let registry = Arc::new(JobRegistry::new(None, reports, config.worker.clone()));
    let params = JobParameters {
        users,
        organization: args.org,
        date_from: args.start_date,
        date_to: end_date,
        output_format: args.output.unwrap_or_default(),
        max_workers: args.max_workers.unwrap_or(0),
        token_hint: Some(mask_token(&token)),
    };
    let total = params.users.len();
    let github = GitHub::new(&token, config.github.api_url.as_deref())?;
    let job = registry.create("cli", params).await?;
    println!("Tracking {} users from {} to {}", total, args.start_date, end_date);

    let mut handle =
        registry.spawn(job.clone(), Progress { inner: github, total, done: AtomicUsize::new(0) });
    tokio::select! {
        result = &mut handle => result.context("Job task failed")?,
        _ = tokio::signal::ctrl_c() => {
            println!("Cancelling...");
            if let Err(e) = registry.cancel(job.id()).await {
                tracing::warn!("Failed to cancel job: {}", e);
            }
            handle.await.context("Job task failed")?;
        }
    }

    let record = job.snapshot();
    println!(
        "{}: {} activities from {}/{} users in {}",
        record.status,
        record.activities.len(),
        record.processed_users,
        record.total_users,
        format_duration(record.elapsed())
    );
    for error in &record.errors {
        println!("  error: {error}");
    }
    if let (Some(path), Some(file)) = (&record.report_path, &record.report_file) {
        println!("Report: {}", path.join(file).display());
    }
    match record.status {
        JobStatus::Failed => bail!("Job failed"),
        JobStatus::Cancelled => bail!("Job cancelled"),
        _ => Ok(()),
    }
}
