use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "TRACKER_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub github: GitHubConfig,
    pub auth: AuthConfig,
    pub reports: ReportsConfig,
    pub worker: WorkerConfig,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: Default::default(),
            db: Default::default(),
            github: Default::default(),
            auth: Default::default(),
            reports: Default::default(),
            worker: Default::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Load the config from `TRACKER_CONFIG`, falling back to `config.yml`.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.yml"));
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file {}", path.display()))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn settings_path(&self) -> PathBuf { self.data_dir.join("settings.json") }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Mark session cookies as `Secure` (enable behind HTTPS).
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 8080, secure_cookies: false } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
}

impl Default for DbConfig {
    fn default() -> Self { Self { url: "sqlite://data/tracker.db".to_string() } }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Fallback token used when a job submission doesn't provide one.
    pub token: Option<String>,
    /// Alternate API base, e.g. for GitHub Enterprise.
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub users_file: PathBuf,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users_file: PathBuf::from("data/users.json"),
            admin_username: "admin".to_string(),
            admin_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReportsConfig {
    pub dir: PathBuf,
    pub ticket_url_prefix: Option<String>,
}

impl Default for ReportsConfig {
    fn default() -> Self { Self { dir: PathBuf::from("reports"), ticket_url_prefix: None } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Default concurrent fetches per job; 0 derives it from the CPU count.
    pub max_workers: usize,
    pub default_range_days: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self { Self { max_workers: 0, default_range_days: 7 } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = serde_yaml::from_str("server:\n  port: 9000\n").unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.auth.admin_username, "admin");
        assert_eq!(config.reports.dir, PathBuf::from("reports"));
        assert_eq!(config.worker.max_workers, 0);
        assert!(config.github.token.is_none());
    }
}
