use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// Join two paths, only including the normal components.
pub fn join_normalized(base: impl AsRef<Path>, path: impl AsRef<Path>) -> PathBuf {
    let mut out = base.as_ref().to_path_buf();
    out.extend(path.as_ref().components().filter(|v| matches!(v, std::path::Component::Normal(_))));
    out
}

/// Split a free-form list of usernames on commas and whitespace.
/// Keeps the first occurrence of each name (case-insensitive).
pub fn parse_usernames(input: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in input.split(|c: char| c == ',' || c.is_whitespace()) {
        let name = name.trim().trim_start_matches('@');
        if name.is_empty() || out.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

/// Read usernames from a file body, one per line. `#` starts a comment line.
pub fn parse_users_file(contents: &str) -> Vec<String> {
    let lines = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    parse_usernames(&lines)
}

/// Mask a secret, keeping only the last four characters.
pub fn mask_token(token: &str) -> String {
    let chars = token.chars().collect::<Vec<_>>();
    let tail = chars[chars.len().saturating_sub(4)..].iter().collect::<String>();
    format!("***{tail}")
}

pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 60.0 {
        format!("{:.1} seconds", seconds)
    } else if seconds < 3600.0 {
        format!("{:.1} minutes", seconds / 60.0)
    } else {
        format!("{:.1} hours", seconds / 3600.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usernames() {
        let cases: &[(&str, &[&str])] = &[
            ("alice bob", &["alice", "bob"]),
            ("alice,bob, carol", &["alice", "bob", "carol"]),
            ("  alice\n\nbob\t", &["alice", "bob"]),
            ("@alice, Alice, bob", &["alice", "bob"]),
            ("", &[]),
            (" , ,", &[]),
        ];
        for &(input, expected) in cases {
            assert_eq!(parse_usernames(input), expected, "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_users_file() {
        let contents = "# team\nalice\n\n  bob  \n# carol\ndave\n";
        assert_eq!(parse_users_file(contents), vec!["alice", "bob", "dave"]);
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("ghp_abcdef1234"), "***1234");
        assert_eq!(mask_token("ab"), "***ab");
    }

    #[test]
    fn test_join_normalized() {
        let reports = PathBuf::from("reports");
        assert_eq!(join_normalized(&reports, "../etc/passwd"), reports.join("etc/passwd"));
        assert_eq!(join_normalized(&reports, "/abs/file.png"), reports.join("abs/file.png"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5.0 seconds");
        assert_eq!(format_duration(Duration::from_secs(90)), "1.5 minutes");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1.5 hours");
    }
}
