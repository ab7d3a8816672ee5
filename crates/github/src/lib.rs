use anyhow::{Context, Result};
use octocrab::{
    Octocrab,
    models::{IssueState, issues::Issue},
};
use time::{Date, OffsetDateTime};
use tracker_core::models::{Activity, ActivityKind};
use url::Url;

/// Below this share of remaining requests, rate limit status is logged as a warning.
const RATE_LIMIT_WARN_PERCENT: f32 = 20.0;

#[derive(Clone)]
pub struct GitHub {
    pub client: Octocrab,
}

#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    pub limit: usize,
    pub remaining: usize,
    pub reset: u64,
}

impl RateStatus {
    pub fn remaining_percent(&self) -> f32 {
        if self.limit == 0 {
            return 0.0;
        }
        self.remaining as f32 / self.limit as f32 * 100.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub core: RateStatus,
    pub search: RateStatus,
}

impl GitHub {
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(api_url) = api_url {
            builder = builder.base_uri(api_url).context("Invalid GitHub API URL")?;
        }
        let client = builder.build().context("Failed to create GitHub client")?;
        Ok(Self { client })
    }

    /// Check that the token works. Returns the authenticated login.
    pub async fn verify(&self) -> Result<String> {
        let profile =
            self.client.current().user().await.context("Failed to authenticate with GitHub")?;
        tracing::info!("Authenticated with GitHub as {}", profile.login);
        if let Err(e) = self.check_rate_limit().await {
            tracing::warn!("Failed to check rate limit: {:?}", e);
        }
        Ok(profile.login)
    }

    pub async fn check_rate_limit(&self) -> Result<RateLimitStatus> {
        let rate_limit =
            self.client.ratelimit().get().await.context("Failed to fetch rate limit")?;
        let to_status = |rate: &octocrab::models::Rate| RateStatus {
            limit: rate.limit,
            remaining: rate.remaining,
            reset: rate.reset,
        };
        let status = RateLimitStatus {
            core: to_status(&rate_limit.resources.core),
            search: to_status(&rate_limit.resources.search),
        };
        for (name, rate) in [("core", status.core), ("search", status.search)] {
            if rate.remaining_percent() < RATE_LIMIT_WARN_PERCENT {
                tracing::warn!(
                    "GitHub {} rate limit running low: {}/{} (resets at {})",
                    name,
                    rate.remaining,
                    rate.limit,
                    rate.reset
                );
            } else {
                tracing::debug!("GitHub {} rate limit: {}/{}", name, rate.remaining, rate.limit);
            }
        }
        Ok(status)
    }

    /// Fetch every pull request a user authored, reviewed or commented on in the range.
    pub async fn user_activities(
        &self,
        username: &str,
        from: Date,
        to: Date,
        org: Option<&str>,
    ) -> Result<Vec<Activity>> {
        let mut activities = Vec::new();
        for &kind in ActivityKind::variants() {
            let query = search_query(kind, username, from, to, org);
            tracing::debug!("Searching: {}", query);
            let page = self
                .client
                .search()
                .issues_and_pull_requests(&query)
                .sort(sort_field(kind))
                .order("desc")
                .per_page(100)
                .send()
                .await
                .with_context(|| format!("Search failed for {}", query))?;
            let issues = self
                .client
                .all_pages(page)
                .await
                .with_context(|| format!("Failed to page through {}", query))?;
            let before = activities.len();
            activities.extend(
                issues
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_some())
                    .filter_map(|issue| SearchItem::from(issue).into_activity(username, kind))
                    .filter(|a| org.is_none_or(|org| in_org(&a.repo, org))),
            );
            tracing::debug!(
                "Found {} {} activities for {}",
                activities.len() - before,
                kind.label(),
                username
            );
        }
        tracing::info!("Found {} activities for {}", activities.len(), username);
        Ok(activities)
    }
}

fn sort_field(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::PullRequestEvent => "created",
        ActivityKind::PullRequestReviewEvent | ActivityKind::IssueCommentEvent => "updated",
    }
}

/// Build the search query for one kind of activity.
pub fn search_query(
    kind: ActivityKind,
    username: &str,
    from: Date,
    to: Date,
    org: Option<&str>,
) -> String {
    let (qualifier, date_field) = match kind {
        ActivityKind::PullRequestEvent => ("author", "created"),
        ActivityKind::PullRequestReviewEvent => ("reviewed-by", "updated"),
        ActivityKind::IssueCommentEvent => ("commenter", "updated"),
    };
    let mut query = format!("is:pr {qualifier}:{username} {date_field}:{from}..{to}");
    if let Some(org) = org.filter(|o| !o.is_empty()) {
        query.push_str(" org:");
        query.push_str(org);
    }
    query
}

/// Extract `owner/name` from an API repository URL.
pub fn repo_full_name(repository_url: &Url) -> Option<String> {
    let mut segments = repository_url.path_segments()?.filter(|s| !s.is_empty()).rev();
    let name = segments.next()?;
    let owner = segments.next()?;
    if segments.next() != Some("repos") {
        return None;
    }
    Some(format!("{owner}/{name}"))
}

pub fn in_org(repo: &str, org: &str) -> bool {
    repo.split_once('/').is_some_and(|(owner, _)| owner.eq_ignore_ascii_case(org))
}

/// The fields of a search result an activity is built from.
#[derive(Debug, Clone)]
pub struct SearchItem {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub html_url: Url,
    pub repository_url: Url,
    pub comments: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<Issue> for SearchItem {
    fn from(issue: Issue) -> Self {
        let state = match issue.state {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
            _ => "unknown",
        };
        Self {
            number: issue.number,
            title: issue.title,
            state: state.to_string(),
            html_url: issue.html_url,
            repository_url: issue.repository_url,
            comments: issue.comments,
            created_at: issue.created_at.timestamp(),
            updated_at: issue.updated_at.timestamp(),
        }
    }
}

impl SearchItem {
    pub fn into_activity(self, username: &str, kind: ActivityKind) -> Option<Activity> {
        let repo = repo_full_name(&self.repository_url)?;
        let timestamp = match kind {
            ActivityKind::PullRequestEvent => self.created_at,
            _ => self.updated_at,
        };
        let date = OffsetDateTime::from_unix_timestamp(timestamp).ok()?;
        Some(Activity {
            user: username.to_string(),
            date,
            kind,
            repo,
            number: self.number,
            title: self.title,
            state: self.state,
            comments: self.comments,
            url: self.html_url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;

    #[test]
    fn test_search_query() {
        let from = date!(2025 - 03 - 01);
        let to = date!(2025 - 03 - 31);
        assert_eq!(
            search_query(ActivityKind::PullRequestEvent, "alice", from, to, None),
            "is:pr author:alice created:2025-03-01..2025-03-31"
        );
        assert_eq!(
            search_query(ActivityKind::PullRequestReviewEvent, "alice", from, to, Some("acme")),
            "is:pr reviewed-by:alice updated:2025-03-01..2025-03-31 org:acme"
        );
        assert_eq!(
            search_query(ActivityKind::IssueCommentEvent, "bob", from, to, Some("")),
            "is:pr commenter:bob updated:2025-03-01..2025-03-31"
        );
    }

    #[test]
    fn test_repo_full_name() {
        let cases: &[(&str, Option<&str>)] = &[
            ("https://api.github.com/repos/acme/widgets", Some("acme/widgets")),
            ("https://ghe.example.com/api/v3/repos/acme/widgets", Some("acme/widgets")),
            ("https://api.github.com/repos/acme", None),
            ("https://api.github.com/users/acme/widgets", None),
        ];
        for &(url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(repo_full_name(&url).as_deref(), expected, "url: {url}");
        }
    }

    #[test]
    fn test_in_org() {
        assert!(in_org("acme/widgets", "acme"));
        assert!(in_org("Acme/widgets", "acme"));
        assert!(!in_org("acme-labs/widgets", "acme"));
        assert!(!in_org("widgets", "acme"));
    }

    #[test]
    fn test_into_activity() {
        let item = SearchItem {
            number: 42,
            title: "ABC-12 Fix widgets".to_string(),
            state: "closed".to_string(),
            html_url: Url::parse("https://github.com/acme/widgets/pull/42").unwrap(),
            repository_url: Url::parse("https://api.github.com/repos/acme/widgets").unwrap(),
            comments: 3,
            created_at: datetime!(2025-03-02 10:00 UTC).unix_timestamp(),
            updated_at: datetime!(2025-03-05 12:30 UTC).unix_timestamp(),
        };
        let authored = item.clone().into_activity("alice", ActivityKind::PullRequestEvent).unwrap();
        assert_eq!(authored.repo, "acme/widgets");
        assert_eq!(authored.date, datetime!(2025-03-02 10:00 UTC));
        assert_eq!(authored.url, "https://github.com/acme/widgets/pull/42");
        assert_eq!(authored.comments, 3);

        let reviewed = item.into_activity("bob", ActivityKind::PullRequestReviewEvent).unwrap();
        assert_eq!(reviewed.user, "bob");
        assert_eq!(reviewed.date, datetime!(2025-03-05 12:30 UTC));
    }
}
