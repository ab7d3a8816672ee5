use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::{
    Pool, Row, Sqlite, SqlitePool,
    migrate::MigrateDatabase,
    sqlite::SqliteConnectOptions,
};
use time::format_description::well_known::Rfc3339;
use tracker_core::{
    config::DbConfig,
    models::{JobId, JobRecord},
};

#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            let options = SqliteConnectOptions::from_str(&config.url)
                .with_context(|| format!("Invalid database URL {}", config.url))?;
            if let Some(parent) = options.get_filename().parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    /// Insert or replace the stored snapshot of a job.
    pub async fn save_job(&self, record: &JobRecord) -> Result<()> {
        let data = serde_json::to_string(record).context("Failed to serialize job")?;
        let started_at = record.started_at.format(&Rfc3339)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner, status, started_at, updated_at, data)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, ?)
            ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status, updated_at = CURRENT_TIMESTAMP, data = EXCLUDED.data
            "#,
        )
        .bind(record.id.as_str())
        .bind(&record.owner)
        .bind(record.status.as_str())
        .bind(started_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save job {}", record.id))?;
        Ok(())
    }

    /// Load every stored job, newest first. Rows that fail to parse are skipped.
    pub async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT id, data FROM jobs ORDER BY started_at DESC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load jobs")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let data: String = row.try_get("data")?;
            match serde_json::from_str::<JobRecord>(&data) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!("Skipping unreadable job {}: {}", id, e),
            }
        }
        Ok(out)
    }

    pub async fn delete_job(&self, id: &JobId) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete job {}", id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;
    use tracker_core::models::{JobParameters, JobStatus, OutputFormat};

    use super::*;

    fn record(id: &str, owner: &str) -> JobRecord {
        JobRecord::new(JobId::new(id), owner.to_string(), JobParameters {
            users: vec!["alice".to_string()],
            organization: None,
            date_from: date!(2025 - 01 - 01),
            date_to: date!(2025 - 01 - 31),
            output_format: OutputFormat::Csv,
            max_workers: 0,
            token_hint: None,
        })
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("nested/test.db").display());
        let db = Database::new(&DbConfig { url }).await.unwrap();

        let mut job = record("abc", "alice");
        db.save_job(&job).await.unwrap();
        job.status = JobStatus::Completed;
        job.errors.push("bob: not found".to_string());
        db.save_job(&job).await.unwrap();
        db.save_job(&record("def", "bob")).await.unwrap();

        let loaded = db.load_jobs().await.unwrap();
        assert_eq!(loaded.len(), 2);
        let abc = loaded.iter().find(|j| j.id.as_str() == "abc").unwrap();
        assert_eq!(abc, &job);

        db.delete_job(&JobId::new("abc")).await.unwrap();
        let loaded = db.load_jobs().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id.as_str(), "def");
        db.close().await;
    }
}
