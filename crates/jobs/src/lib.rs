mod dispatch;
mod source;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
pub use dispatch::{NO_ACTIVITIES_ERROR, worker_count};
use rand::{TryRngCore, rngs::OsRng};
pub use source::ActivitySource;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracker_core::{
    config::{ReportsConfig, WorkerConfig},
    models::{JobId, JobParameters, JobRecord, JobStatus},
};
use tracker_db::Database;

/// Error recorded on jobs that were still active when the process stopped.
pub const INTERRUPTED_ERROR: &str = "Interrupted by server restart";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,
    #[error("Job is still running")]
    StillRunning,
    #[error("Job is not running")]
    NotRunning,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A tracked job. All mutation goes through the record lock.
pub struct Job {
    id: JobId,
    record: Mutex<JobRecord>,
    cancel: CancellationToken,
    /// Held from snapshot to write so stored rows never go backwards.
    save_lock: AsyncMutex<()>,
}

impl Job {
    fn new(record: JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            cancel: CancellationToken::new(),
            save_lock: AsyncMutex::new(()),
        }
    }

    pub fn id(&self) -> &JobId { &self.id }

    /// Consistent copy of the record.
    pub fn snapshot(&self) -> JobRecord {
        self.record.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn owner(&self) -> String {
        self.record.lock().unwrap_or_else(PoisonError::into_inner).owner.clone()
    }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Apply a worker update. Terminal records are left untouched and `false` is returned.
    fn update(&self, f: impl FnOnce(&mut JobRecord)) -> bool {
        let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
        if record.status.is_terminal() {
            return false;
        }
        f(&mut record);
        if record.status.is_terminal() {
            record.current_user = None;
            record.ended_at = Some(OffsetDateTime::now_utc());
        }
        true
    }

    /// Move an active job to `cancelled` and fire its token.
    fn cancel(&self) -> Result<JobRecord, JobError> {
        let snapshot = {
            let mut record = self.record.lock().unwrap_or_else(PoisonError::into_inner);
            if record.status.is_terminal() {
                return Err(JobError::NotRunning);
            }
            record.status = JobStatus::Cancelled;
            record.current_user = None;
            record.ended_at = Some(OffsetDateTime::now_utc());
            record.clone()
        };
        self.cancel.cancel();
        Ok(snapshot)
    }
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Job>>>,
    db: Option<Database>,
    reports: ReportsConfig,
    worker: WorkerConfig,
}

impl JobRegistry {
    pub fn new(db: Option<Database>, reports: ReportsConfig, worker: WorkerConfig) -> Self {
        Self { jobs: RwLock::new(HashMap::new()), db, reports, worker }
    }

    /// Load persisted jobs. Jobs that were still active are marked failed.
    pub async fn restore(&self) -> Result<usize> {
        let Some(db) = &self.db else { return Ok(0) };
        let records = db.load_jobs().await?;
        let mut jobs = self.jobs.write().await;
        let count = records.len();
        for mut record in records {
            if record.status.is_active() {
                tracing::warn!("Marking interrupted job {} as failed", record.id);
                record.status = JobStatus::Failed;
                record.current_user = None;
                record.ended_at = Some(OffsetDateTime::now_utc());
                record.errors.push(INTERRUPTED_ERROR.to_string());
                db.save_job(&record).await?;
            }
            jobs.insert(record.id.clone(), Arc::new(Job::new(record)));
        }
        Ok(count)
    }

    pub async fn create(&self, owner: &str, parameters: JobParameters) -> Result<Arc<Job>> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let id = loop {
                let id = generate_id()?;
                if !jobs.contains_key(&id) {
                    break id;
                }
            };
            let job = Arc::new(Job::new(JobRecord::new(id.clone(), owner.to_string(), parameters)));
            jobs.insert(id, job.clone());
            job
        };
        tracing::info!(
            "Created job {} for {} ({} users)",
            job.id,
            owner,
            job.snapshot().total_users
        );
        self.persist(&job).await;
        Ok(job)
    }

    pub async fn get(&self, id: &JobId) -> Option<Arc<Job>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Snapshots of all jobs, newest first, optionally limited to one owner.
    pub async fn list(&self, owner: Option<&str>) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut out = jobs
            .values()
            .map(|job| job.snapshot())
            .filter(|r| owner.is_none_or(|o| r.owner == o))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.started_at.cmp(&a.started_at).then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        out
    }

    pub async fn cancel(&self, id: &JobId) -> Result<JobRecord, JobError> {
        let job = self.get(id).await.ok_or(JobError::NotFound)?;
        let _guard = job.save_lock.lock().await;
        let snapshot = job.cancel()?;
        tracing::info!("Cancelled job {} after {} users", id, snapshot.processed_users);
        self.save(&snapshot).await;
        Ok(snapshot)
    }

    /// Remove a finished job along with its stored snapshot and report directory.
    pub async fn delete(&self, id: &JobId) -> Result<(), JobError> {
        let job = {
            let mut jobs = self.jobs.write().await;
            let job = jobs.get(id).ok_or(JobError::NotFound)?;
            if job.snapshot().status.is_active() {
                return Err(JobError::StillRunning);
            }
            jobs.remove(id).ok_or(JobError::NotFound)?
        };
        if let Some(db) = &self.db {
            let _guard = job.save_lock.lock().await;
            db.delete_job(id).await?;
        }
        let dir = self.report_dir(id);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir).await.map_err(anyhow::Error::from)?;
        }
        tracing::info!("Deleted job {}", id);
        Ok(())
    }

    pub fn report_dir(&self, id: &JobId) -> PathBuf { self.reports.dir.join(id.as_str()) }

    /// Run a job on its own task.
    pub fn spawn<S: ActivitySource>(
        self: &Arc<Self>,
        job: Arc<Job>,
        source: S,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move { registry.run(job, Arc::new(source)).await })
    }

    /// Store the current record. Jobs already removed from the registry are skipped.
    async fn persist(&self, job: &Job) {
        if self.db.is_none() {
            return;
        }
        let _guard = job.save_lock.lock().await;
        if !self.jobs.read().await.contains_key(&job.id) {
            tracing::debug!("Job {} was deleted, not saving", job.id);
            return;
        }
        self.save(&job.snapshot()).await
    }

    async fn save(&self, record: &JobRecord) {
        let Some(db) = &self.db else { return };
        if let Err(e) = db.save_job(record).await {
            tracing::error!("Failed to persist job {}: {:?}", record.id, e);
        }
    }
}

/// Random 12 character URL-safe id.
fn generate_id() -> Result<JobId> {
    let mut bytes = [0u8; 9];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(JobId::new(URL_SAFE_NO_PAD.encode(bytes)))
}
