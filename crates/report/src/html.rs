use std::sync::OnceLock;

use maud::{DOCTYPE, Markup, PreEscaped, html};
use regex::Regex;
use time::{OffsetDateTime, macros::format_description};
use tracker_core::models::{Activity, JobParameters};

use crate::{CHART_TRENDS, CHART_TYPES, CHART_USERS, CSV_FILE, summary::Summary};

const STYLE: &str = r#"
body{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,Helvetica,Arial,sans-serif;margin:0 auto;max-width:1400px;padding:1.5rem;color:#222}
header{border-bottom:1px solid #ddd;margin-bottom:1rem}
.muted{color:#666}
.cards{display:flex;gap:1rem;flex-wrap:wrap;margin:1rem 0}
.card{border:1px solid #ddd;border-radius:6px;padding:.75rem 1.25rem;min-width:10rem}
.card strong{display:block;font-size:1.8rem}
.charts img{max-width:100%;border:1px solid #eee;margin-bottom:1rem}
table{border-collapse:collapse;width:100%;font-size:.9rem}
th,td{border:1px solid #ddd;padding:.35rem .5rem;text-align:left;vertical-align:top}
th{background:#f2f2f2;cursor:pointer;user-select:none}
tr:nth-child(even){background:#fafafa}
"#;

const SORT_SCRIPT: &str = r##"
document.querySelectorAll("#activity-table th").forEach((th,i)=>{let asc=true;th.addEventListener("click",()=>{const body=th.closest("table").tBodies[0];const rows=[...body.rows];const num=th.dataset.numeric!==undefined;rows.sort((a,b)=>{const x=a.cells[i].innerText,y=b.cells[i].innerText;const c=num?(parseFloat(x)||0)-(parseFloat(y)||0):x.localeCompare(y);return asc?c:-c});asc=!asc;rows.forEach(r=>body.appendChild(r))})});
"##;

/// First ticket id (e.g. `ABC-123`) in a pull request title.
pub fn find_ticket(title: &str) -> Option<&str> {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z0-9]*-\d+").unwrap());
    regex.find(title).map(|m| m.as_str())
}

fn format_date(value: OffsetDateTime) -> String {
    value
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| "[invalid]".to_string())
}

pub fn render_html(
    activities: &[Activity],
    summary: &Summary,
    params: &JobParameters,
    ticket_url_prefix: Option<&str>,
    generated_at: OffsetDateTime,
) -> Markup {
    let ticket_url_prefix = ticket_url_prefix.filter(|p| !p.is_empty());
    html! {
        (DOCTYPE)
        html {
            head lang="en" {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                title { "GitHub Activity Report" }
                style { (PreEscaped(STYLE)) }
            }
            body {
                header {
                    h1 { "GitHub Activity Report" }
                    p {
                        (params.date_from.to_string()) " to " (params.date_to.to_string())
                        @if let Some(org) = &params.organization {
                            " in " strong { (org) }
                        }
                    }
                    p class="muted" {
                        "Generated " (format_date(generated_at)) " UTC for "
                        (params.users.len()) " users. "
                        a href=(CSV_FILE) { "Download CSV" }
                    }
                }
                section class="cards" {
                    div class="card" { strong { (summary.total) } "Activities" }
                    div class="card" { strong { (summary.users) } "Active users" }
                    div class="card" { strong { (summary.repositories) } "Repositories" }
                    @for (kind, count) in &summary.by_kind {
                        div class="card" { strong { (count) } (kind.label()) "s" }
                    }
                }
                section class="charts" {
                    h2 { "Activity over time" }
                    img src=(CHART_TRENDS) alt="Activity over time";
                    h2 { "Activity by type" }
                    img src=(CHART_TYPES) alt="Activity by type";
                    h2 { "Activity by user" }
                    img src=(CHART_USERS) alt="Activity by user";
                }
                @if !summary.top_repositories.is_empty() {
                    section {
                        h2 { "Top repositories" }
                        table {
                            thead { tr { th { "Repository" } th { "Activities" } } }
                            tbody {
                                @for (repo, count) in &summary.top_repositories {
                                    tr { td { (repo) } td { (count) } }
                                }
                            }
                        }
                    }
                }
                section {
                    h2 { "Activities" }
                    table id="activity-table" {
                        thead {
                            tr {
                                th { "User" }
                                th { "Date" }
                                th { "Type" }
                                th { "State" }
                                th { "Repository" }
                                th { "Title" }
                                th data-numeric { "Number" }
                                th data-numeric { "Comments" }
                                th { "Ticket" }
                                th { "URL" }
                            }
                        }
                        tbody {
                            @for activity in activities {
                                tr {
                                    td { (activity.user) }
                                    td { (format_date(activity.date)) }
                                    td { (activity.kind.label()) }
                                    td { (activity.state) }
                                    td { (activity.repo) }
                                    td { (activity.title) }
                                    td { (activity.number) }
                                    td { (activity.comments) }
                                    td {
                                        @if let Some(ticket) = find_ticket(&activity.title) {
                                            @if let Some(prefix) = ticket_url_prefix {
                                                a href=(format!("{prefix}{ticket}")) target="_blank" { (ticket) }
                                            } @else {
                                                (ticket)
                                            }
                                        }
                                    }
                                    td { a href=(activity.url) target="_blank" { "#" (activity.number) } }
                                }
                            }
                        }
                    }
                }
                script { (PreEscaped(SORT_SCRIPT)) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};
    use tracker_core::models::{ActivityKind, OutputFormat};

    use super::*;
    use crate::summary::summarize;

    #[test]
    fn test_find_ticket() {
        let cases: &[(&str, Option<&str>)] = &[
            ("ABC-123: Fix crash", Some("ABC-123")),
            ("[sec-1243] lowercase", Some("sec-1243")),
            ("K9-1345 digits in key", Some("K9-1345")),
            ("Bump foo from 1.2 to 1.3", None),
            ("no ticket here", None),
            ("-12 leading dash", None),
        ];
        for &(title, expected) in cases {
            assert_eq!(find_ticket(title), expected, "title: {title}");
        }
    }

    #[test]
    fn test_render_html() {
        let activities = vec![Activity {
            user: "alice".to_string(),
            date: datetime!(2025-03-02 09:15 UTC),
            kind: ActivityKind::PullRequestReviewEvent,
            repo: "acme/widgets".to_string(),
            number: 7,
            title: "ABC-12 <b>bold</b>".to_string(),
            state: "open".to_string(),
            comments: 2,
            url: "https://github.com/acme/widgets/pull/7".to_string(),
        }];
        let params = JobParameters {
            users: vec!["alice".to_string()],
            organization: Some("acme".to_string()),
            date_from: date!(2025 - 03 - 01),
            date_to: date!(2025 - 03 - 07),
            output_format: OutputFormat::Html,
            max_workers: 0,
            token_hint: None,
        };
        let summary = summarize(&activities);
        let page = render_html(
            &activities,
            &summary,
            &params,
            Some("https://jira.example.com/browse/"),
            datetime!(2025-03-08 12:00 UTC),
        )
        .into_string();
        assert!(page.contains("2025-03-01 to 2025-03-07"));
        assert!(page.contains(r#"href="https://jira.example.com/browse/ABC-12""#));
        assert!(page.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(page.contains(r#"src="activity_trends.png""#));
        assert!(page.contains("2025-03-08 12:00"));
        assert!(page.contains(r##"querySelectorAll("#activity-table th")"##));
        assert!(page.contains(r#"id="activity-table""#));
    }
}
