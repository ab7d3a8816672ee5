use std::{path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use tokio::{sync::Semaphore, task::JoinSet};
use tracker_core::models::JobStatus;

use crate::{ActivitySource, Job, JobRegistry};

/// Error recorded when no user had any activity in the range.
pub const NO_ACTIVITIES_ERROR: &str = "No activities found for any users";

/// Concurrent fetches for a job: the requested count, then the configured default, then
/// twice the CPU count capped at 8. Never more than there are users.
pub fn worker_count(requested: usize, configured: usize, users: usize) -> usize {
    let count = if requested > 0 {
        requested
    } else if configured > 0 {
        configured
    } else {
        (num_cpus::get() * 2).min(8)
    };
    count.min(users).max(1)
}

impl JobRegistry {
    pub(crate) async fn run<S: ActivitySource>(&self, job: Arc<Job>, source: Arc<S>) {
        let params = job.snapshot().parameters;
        if !job.update(|r| r.status = JobStatus::Running) {
            return;
        }
        self.persist(&job).await;

        if let Err(e) = source.verify().await {
            tracing::error!("Job {} failed verification: {:?}", job.id, e);
            job.update(|r| {
                r.errors.push(format!("{e:#}"));
                r.status = JobStatus::Failed;
            });
            self.persist(&job).await;
            return;
        }

        let workers = worker_count(params.max_workers, self.worker.max_workers, params.users.len());
        tracing::info!(
            "Job {}: fetching {} users with {} workers",
            job.id,
            params.users.len(),
            workers
        );
        let sem = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for user in params.users.iter().cloned() {
            let sem = sem.clone();
            let job = job.clone();
            let source = source.clone();
            let org = params.organization.clone();
            let (from, to) = (params.date_from, params.date_to);
            set.spawn(async move {
                let Ok(_permit) = sem.acquire().await else { return };
                if job.is_cancelled() {
                    tracing::debug!("Job {}: skipping {}", job.id, user);
                    return;
                }
                job.update(|r| r.current_user = Some(user.clone()));
                let fetch = {
                    let user = user.clone();
                    tokio::spawn(async move {
                        source.user_activities(&user, from, to, org.as_deref()).await
                    })
                };
                let result = match fetch.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("Job {}: fetch for {} panicked: {:?}", job.id, user, e);
                        Err(anyhow!("unhandled error: {e}"))
                    }
                };
                apply_user_result(&job, &user, result);
            });
        }
        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                tracing::error!("Job {}: worker task failed: {:?}", job.id, e);
            }
            self.persist(&job).await;
        }

        if job.is_cancelled() {
            tracing::info!("Job {} cancelled", job.id);
            return;
        }

        let snapshot = job.snapshot();
        if snapshot.activities.is_empty() {
            tracing::info!("Job {}: no activities found", job.id);
            job.update(|r| {
                r.errors.push(NO_ACTIVITIES_ERROR.to_string());
                r.status = JobStatus::Completed;
            });
            self.persist(&job).await;
            return;
        }

        if !job.update(|r| r.status = JobStatus::GeneratingReport) {
            return;
        }
        self.persist(&job).await;

        let dir = self.report_dir(&job.id);
        let ticket_url_prefix = self.reports.ticket_url_prefix.clone();
        let render_dir = dir.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<String> {
            std::fs::create_dir_all(&render_dir)?;
            tracker_report::render_report(
                &snapshot.activities,
                &snapshot.parameters,
                ticket_url_prefix.as_deref(),
                &render_dir,
            )
        })
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);

        self.finish_report(&job, dir, result).await;
        self.persist(&job).await;
    }

    /// Record the rendered report. Output for a job cancelled or deleted meanwhile is removed.
    async fn finish_report(&self, job: &Job, dir: PathBuf, result: Result<String>) {
        let applied = match result {
            Ok(file) => {
                let path = dir.join(&file);
                let applied = job.update(|r| {
                    r.report_file = Some(file);
                    r.report_path = Some(dir.clone());
                    r.status = JobStatus::Completed;
                });
                if applied {
                    tracing::info!("Job {}: report written to {}", job.id, path.display());
                }
                applied
            }
            Err(e) => {
                tracing::error!("Job {}: failed to generate report: {:?}", job.id, e);
                job.update(|r| {
                    r.errors.push(format!("Failed to generate report: {e:#}"));
                    r.status = JobStatus::Failed;
                })
            }
        };
        if !applied && tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tracing::info!("Job {}: discarding report output", job.id);
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                tracing::warn!("Job {}: failed to remove {}: {}", job.id, dir.display(), e);
            }
        }
    }
}

fn apply_user_result(job: &Job, user: &str, result: Result<Vec<tracker_core::models::Activity>>) {
    let applied = job.update(|r| {
        match &result {
            Ok(activities) => r.activities.extend(activities.iter().cloned()),
            Err(e) => r.errors.push(format!("{user}: {e:#}")),
        }
        r.processed_users += 1;
    });
    match result {
        Ok(activities) if applied => {
            tracing::info!("Job {}: {} activities for {}", job.id, activities.len(), user)
        }
        Err(e) if applied => tracing::warn!("Job {}: failed to fetch {}: {:?}", job.id, user, e),
        _ => tracing::debug!("Job {}: discarding result for {}", job.id, user),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use time::{Date, macros::datetime};
    use tokio::sync::Notify;
    use tracker_core::models::{Activity, ActivityKind, OutputFormat};

    use super::*;
    use crate::tests::{params, registry};

    #[derive(Default)]
    struct FakeSource {
        activities: HashMap<String, usize>,
        missing: Vec<String>,
        invalid_token: bool,
        panics: Option<String>,
        /// Calls from this index on wait for `release`.
        block_from: Option<usize>,
        reached: Arc<Notify>,
        release: Arc<Notify>,
        calls: Arc<AtomicUsize>,
    }

    fn activity(user: &str, n: usize) -> Activity {
        Activity {
            user: user.to_string(),
            date: datetime!(2025-03-10 12:00 UTC) + Duration::from_secs(n as u64 * 3600),
            kind: ActivityKind::PullRequestEvent,
            repo: "acme/widgets".to_string(),
            number: n as u64 + 1,
            title: format!("Change {n}"),
            state: "open".to_string(),
            comments: 0,
            url: format!("https://github.com/acme/widgets/pull/{}", n + 1),
        }
    }

    impl ActivitySource for FakeSource {
        async fn verify(&self) -> Result<()> {
            if self.invalid_token { Err(anyhow!("Bad credentials")) } else { Ok(()) }
        }

        async fn user_activities(
            &self,
            username: &str,
            _from: Date,
            _to: Date,
            _org: Option<&str>,
        ) -> Result<Vec<Activity>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.block_from.is_some_and(|k| call >= k) {
                self.reached.notify_one();
                self.release.notified().await;
            }
            if self.panics.as_deref() == Some(username) {
                panic!("lost connection while fetching {username}");
            }
            if self.missing.iter().any(|m| m == username) {
                return Err(anyhow!("user not found"));
            }
            let count = self.activities.get(username).copied().unwrap_or(0);
            Ok((0..count).map(|n| activity(username, n)).collect())
        }
    }

    fn source(users: &[(&str, usize)]) -> FakeSource {
        FakeSource {
            activities: users.iter().map(|&(u, n)| (u.to_string(), n)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(3, 0, 10), 3);
        assert_eq!(worker_count(3, 6, 10), 3);
        assert_eq!(worker_count(0, 6, 10), 6);
        assert_eq!(worker_count(20, 0, 4), 4);
        assert_eq!(worker_count(0, 0, 1), 1);
        let auto = worker_count(0, 0, 100);
        assert!((1..=8).contains(&auto));
    }

    #[tokio::test]
    async fn test_all_users_complete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a", "b", "c"])).await.unwrap();
        registry.spawn(job.clone(), source(&[("a", 2), ("b", 1), ("c", 3)])).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.processed_users, 3);
        assert_eq!(record.activities.len(), 6);
        assert!(record.errors.is_empty());
        assert!(record.current_user.is_none());
        assert!(record.ended_at.is_some());
        assert_eq!(record.report_file.as_deref(), Some("github_activity.csv"));
        assert!(registry.report_dir(job.id()).join("github_activity.csv").exists());
    }

    #[tokio::test]
    async fn test_one_user_fails() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a", "ghost", "c"])).await.unwrap();
        let mut fake = source(&[("a", 1), ("c", 1)]);
        fake.missing.push("ghost".to_string());
        registry.spawn(job.clone(), fake).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.processed_users, 3);
        assert_eq!(record.activities.len(), 2);
        assert_eq!(record.errors, vec!["ghost: user not found".to_string()]);
    }

    #[tokio::test]
    async fn test_panicking_fetch_counts_user() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a", "boom", "c"])).await.unwrap();
        let fake =
            FakeSource { panics: Some("boom".to_string()), ..source(&[("a", 1), ("c", 2)]) };
        registry.spawn(job.clone(), fake).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.processed_users, 3);
        assert_eq!(record.activities.len(), 3);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].starts_with("boom: unhandled error"), "{:?}", record.errors);
        assert!(record.report_file.is_some());
    }

    #[tokio::test]
    async fn test_no_activities() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a", "b"])).await.unwrap();
        registry.spawn(job.clone(), source(&[])).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.errors, vec![NO_ACTIVITIES_ERROR.to_string()]);
        assert!(record.report_file.is_none());
        assert!(!registry.report_dir(job.id()).exists());
    }

    #[tokio::test]
    async fn test_invalid_token() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a", "b"])).await.unwrap();
        let fake = FakeSource { invalid_token: true, ..source(&[("a", 1)]) };
        let calls = fake.calls.clone();
        registry.spawn(job.clone(), fake).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.errors, vec!["Bad credentials".to_string()]);
        assert_eq!(record.processed_users, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let mut p = params(&["a", "b", "c", "d", "e"]);
        p.max_workers = 1;
        let job = registry.create("alice", p).await.unwrap();
        let users = [("a", 1), ("b", 1), ("c", 1), ("d", 1), ("e", 1)];
        let fake = FakeSource { block_from: Some(2), ..source(&users) };
        let (reached, release) = (fake.reached.clone(), fake.release.clone());
        let calls = fake.calls.clone();
        let handle = registry.spawn(job.clone(), fake);

        tokio::time::timeout(Duration::from_secs(5), reached.notified()).await.unwrap();
        let record = registry.cancel(job.id()).await.unwrap();
        assert_eq!(record.processed_users, 2);
        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.processed_users, 2);
        assert_eq!(record.activities.len(), 2);
        assert!(record.report_file.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_report_discarded_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path());
        let job = registry.create("alice", params(&["a"])).await.unwrap();
        let report_dir = registry.report_dir(job.id());
        std::fs::create_dir_all(&report_dir).unwrap();
        std::fs::write(report_dir.join("github_activity.csv"), "user\n").unwrap();
        registry.cancel(job.id()).await.unwrap();

        let file = "github_activity.csv".to_string();
        registry.finish_report(&job, report_dir.clone(), Ok(file)).await;
        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert!(record.report_file.is_none());
        assert!(!report_dir.exists());
    }

    #[tokio::test]
    async fn test_render_failure_keeps_activities() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("reports");
        std::fs::write(&not_a_dir, "").unwrap();
        let registry = registry(&not_a_dir);
        let mut p = params(&["a", "b"]);
        p.output_format = OutputFormat::Html;
        let job = registry.create("alice", p).await.unwrap();
        registry.spawn(job.clone(), source(&[("a", 2), ("b", 1)])).await.unwrap();

        let record = job.snapshot();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.activities.len(), 3);
        assert_eq!(record.processed_users, 2);
        assert_eq!(record.errors.len(), 1);
        assert!(record.errors[0].starts_with("Failed to generate report"));
        assert!(record.ended_at.is_some());
    }
}
