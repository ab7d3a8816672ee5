use std::path::Path;

use anyhow::{Context, Result};
use time::{Date, macros::format_description};
use tracker_core::{
    config::{CONFIG_PATH_ENV, Config},
    models::OutputFormat,
    util::{parse_usernames, parse_users_file},
};

// For argp::FromArgs
pub fn date(value: &str) -> Result<Date, String> {
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

// For argp::FromArgs
pub fn output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse().map_err(|_| format!("unknown output format '{value}', expected html or csv"))
}

/// Load the config file, or the defaults when none is present.
pub fn load_config() -> Result<Config> {
    let explicit = std::env::var_os(CONFIG_PATH_ENV).is_some();
    if !explicit && !Path::new("config.yml").exists() {
        tracing::debug!("No config.yml found, using defaults");
        return Ok(Config::default());
    }
    Config::load()
}

/// Users named on the command line, or read from a users file.
pub fn collect_users(users: &[String], users_file: Option<&Path>) -> Result<Vec<String>> {
    let mut out = parse_usernames(&users.join(" "));
    if let Some(path) = users_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read users file {}", path.display()))?;
        for user in parse_users_file(&contents) {
            if !out.iter().any(|u| u.eq_ignore_ascii_case(&user)) {
                out.push(user);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn test_date() {
        assert_eq!(date("2025-03-01"), Ok(date!(2025 - 03 - 01)));
        assert!(date("03/01/2025").is_err());
    }

    #[test]
    fn test_output_format() {
        assert_eq!(output_format("CSV"), Ok(OutputFormat::Csv));
        assert!(output_format("pdf").is_err());
    }

    #[test]
    fn test_collect_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.txt");
        std::fs::write(&path, "# team\nbob\n\ncarol\nAlice\n").unwrap();
        let args = vec!["alice,dave".to_string()];
        let users = collect_users(&args, Some(&path)).unwrap();
        assert_eq!(users, vec!["alice", "dave", "bob", "carol"]);
        assert!(collect_users(&[], Some(&dir.path().join("missing.txt"))).is_err());
    }
}
