mod export;
pub mod html;
pub mod summary;

use std::{
    fs::File,
    io::{BufWriter, Cursor, Write},
    path::Path,
};

use anyhow::{Context, Result};
pub use export::{read_csv, write_csv};
pub use html::find_ticket;
pub use summary::{Summary, summarize};
use time::OffsetDateTime;
use tracker_core::models::{Activity, ActivityKind, JobParameters, OutputFormat};
use tracker_images::Series;
use zip::{CompressionMethod, write::SimpleFileOptions};

pub const CSV_FILE: &str = "github_activity.csv";
pub const HTML_FILE: &str = "index.html";
pub const CHART_TRENDS: &str = "activity_trends.png";
pub const CHART_TYPES: &str = "activity_types.png";
pub const CHART_USERS: &str = "user_comparison.png";

/// Render a report into `dir`. Returns the main file name.
pub fn render_report(
    activities: &[Activity],
    params: &JobParameters,
    ticket_url_prefix: Option<&str>,
    dir: &Path,
) -> Result<String> {
    let mut sorted = activities.to_vec();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));

    let csv_path = dir.join(CSV_FILE);
    let file = File::create(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    write_csv(&sorted, BufWriter::new(file))?;
    if params.output_format == OutputFormat::Csv {
        return Ok(CSV_FILE.to_string());
    }

    let summary = summarize(&sorted);
    write_charts(&summary, dir)?;
    let page = html::render_html(
        &sorted,
        &summary,
        params,
        ticket_url_prefix,
        OffsetDateTime::now_utc(),
    );
    std::fs::write(dir.join(HTML_FILE), page.into_string())
        .with_context(|| format!("Failed to write {}", dir.join(HTML_FILE).display()))?;
    tracing::debug!("Rendered report with {} activities to {}", sorted.len(), dir.display());
    Ok(HTML_FILE.to_string())
}

fn write_charts(summary: &Summary, dir: &Path) -> Result<()> {
    let daily = summary.daily.iter().map(|(d, n)| (d.to_string(), *n as u64)).collect::<Vec<_>>();
    let types =
        summary.by_kind.iter().map(|(k, n)| (k.label().to_string(), *n as u64)).collect::<Vec<_>>();
    let users = summary.by_user.iter().map(|u| u.user.clone()).collect::<Vec<_>>();
    let series = ActivityKind::variants()
        .iter()
        .enumerate()
        .map(|(i, kind)| Series {
            name: kind.label().to_string(),
            values: summary.by_user.iter().map(|u| u.by_kind[i] as u64).collect(),
        })
        .collect::<Vec<_>>();

    for (name, svg) in [
        (CHART_TRENDS, tracker_images::line_chart("Activity over time", &daily)),
        (CHART_TYPES, tracker_images::bar_chart("Activity by type", &types)),
        (CHART_USERS, tracker_images::stacked_bar_chart("Activity by user", &users, &series)),
    ] {
        let png = tracker_images::render_png(&svg)
            .with_context(|| format!("Failed to render chart {name}"))?;
        std::fs::write(dir.join(name), png)
            .with_context(|| format!("Failed to write {}", dir.join(name).display()))?;
    }
    Ok(())
}

/// ZIP every file under `dir`, with paths relative to it.
pub fn archive_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read {}", current.display()))?
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
                continue;
            }
            let name = path
                .strip_prefix(dir)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            zip.start_file(name, options)?;
            zip.write_all(&std::fs::read(&path)?)?;
        }
    }
    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use time::macros::{date, datetime};

    use super::*;

    fn params(format: OutputFormat) -> JobParameters {
        JobParameters {
            users: vec!["alice".to_string(), "bob".to_string()],
            organization: None,
            date_from: date!(2025 - 03 - 01),
            date_to: date!(2025 - 03 - 07),
            output_format: format,
            max_workers: 0,
            token_hint: None,
        }
    }

    fn activities() -> Vec<Activity> {
        [
            ("alice", ActivityKind::PullRequestEvent, datetime!(2025-03-01 10:00 UTC)),
            ("bob", ActivityKind::IssueCommentEvent, datetime!(2025-03-03 10:00 UTC)),
            ("alice", ActivityKind::PullRequestReviewEvent, datetime!(2025-03-02 10:00 UTC)),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (user, kind, date))| Activity {
            user: user.to_string(),
            date,
            kind,
            repo: "acme/widgets".to_string(),
            number: i as u64 + 1,
            title: format!("WID-{i} change"),
            state: "open".to_string(),
            comments: 1,
            url: format!("https://github.com/acme/widgets/pull/{}", i + 1),
        })
        .collect()
    }

    #[test]
    fn test_render_csv_report() {
        let dir = tempfile::tempdir().unwrap();
        let file = render_report(&activities(), &params(OutputFormat::Csv), None, dir.path())
            .unwrap();
        assert_eq!(file, CSV_FILE);
        let read = read_csv(File::open(dir.path().join(CSV_FILE)).unwrap()).unwrap();
        assert_eq!(read.len(), 3);
        assert!(read.windows(2).all(|w| w[0].date >= w[1].date));
        assert!(!dir.path().join(HTML_FILE).exists());
    }

    #[test]
    fn test_render_html_report() {
        let dir = tempfile::tempdir().unwrap();
        let file = render_report(&activities(), &params(OutputFormat::Html), None, dir.path())
            .unwrap();
        assert_eq!(file, HTML_FILE);
        for name in [HTML_FILE, CSV_FILE, CHART_TRENDS, CHART_TYPES, CHART_USERS] {
            assert!(dir.path().join(name).exists(), "missing {name}");
        }
    }

    #[test]
    fn test_render_into_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(render_report(&activities(), &params(OutputFormat::Csv), None, &missing).is_err());
    }

    #[test]
    fn test_archive_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::create_dir(dir.path().join("extra")).unwrap();
        std::fs::write(dir.path().join("extra/notes.txt"), "hello").unwrap();

        let bytes = archive_dir(dir.path()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut names = archive.file_names().map(str::to_string).collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["extra/notes.txt", "index.html"]);
        let mut contents = String::new();
        archive.by_name("extra/notes.txt").unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "hello");
    }
}
