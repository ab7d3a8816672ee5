use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Values pre-filled on the new job form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub organization: Option<String>,
    pub users: Vec<String>,
}

pub struct SettingsStore {
    path: PathBuf,
    defaults: RwLock<JobDefaults>,
}

impl SettingsStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let defaults = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JobDefaults::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Ok(Self { path, defaults: RwLock::new(defaults) })
    }

    pub async fn defaults(&self) -> JobDefaults { self.defaults.read().await.clone() }

    pub async fn save(&self, defaults: JobDefaults) -> Result<()> {
        let mut current = self.defaults.write().await;
        write_atomic(&self.path, &defaults).await?;
        tracing::info!(
            "Saved job defaults (org: {:?}, {} users)",
            defaults.organization,
            defaults.users.len()
        );
        *current = defaults;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> { self.save(JobDefaults::default()).await }
}

async fn write_atomic(path: &Path, defaults: &JobDefaults) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_vec_pretty(defaults)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data/settings.json");
        let store = SettingsStore::open(&path).await.unwrap();
        assert_eq!(store.defaults().await, JobDefaults::default());

        let defaults = JobDefaults {
            organization: Some("acme".to_string()),
            users: vec!["alice".to_string(), "bob".to_string()],
        };
        store.save(defaults.clone()).await.unwrap();
        assert_eq!(SettingsStore::open(&path).await.unwrap().defaults().await, defaults);

        store.clear().await.unwrap();
        let reopened = SettingsStore::open(&path).await.unwrap();
        assert_eq!(reopened.defaults().await, JobDefaults::default());
    }
}
