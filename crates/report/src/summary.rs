use std::collections::BTreeMap;

use itertools::Itertools;
use time::Date;
use tracker_core::models::{Activity, ActivityKind};

pub const TOP_REPOSITORIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounts {
    pub user: String,
    pub total: usize,
    /// Aligned with `ActivityKind::variants()`.
    pub by_kind: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub users: usize,
    pub repositories: usize,
    pub by_kind: Vec<(ActivityKind, usize)>,
    /// Most active first.
    pub by_user: Vec<UserCounts>,
    pub top_repositories: Vec<(String, usize)>,
    /// One entry per day from the first to the last activity, gaps included.
    pub daily: Vec<(Date, usize)>,
}

pub fn summarize(activities: &[Activity]) -> Summary {
    if activities.is_empty() {
        return Summary {
            by_kind: ActivityKind::variants().iter().map(|&k| (k, 0)).collect(),
            ..Default::default()
        };
    }
    let kinds = activities.iter().counts_by(|a| a.kind);
    let by_kind = ActivityKind::variants()
        .iter()
        .map(|k| (*k, kinds.get(k).copied().unwrap_or(0)))
        .collect();

    let mut users = BTreeMap::<&str, Vec<usize>>::new();
    for activity in activities {
        let counts = users
            .entry(activity.user.as_str())
            .or_insert_with(|| vec![0; ActivityKind::variants().len()]);
        if let Some(i) = ActivityKind::variants().iter().position(|k| *k == activity.kind) {
            counts[i] += 1;
        }
    }
    let by_user = users
        .into_iter()
        .map(|(user, by_kind)| UserCounts {
            user: user.to_string(),
            total: by_kind.iter().sum(),
            by_kind,
        })
        .sorted_by(|a, b| b.total.cmp(&a.total).then_with(|| a.user.cmp(&b.user)))
        .collect::<Vec<_>>();

    let repos = activities.iter().counts_by(|a| a.repo.as_str());
    let repositories = repos.len();
    let top_repositories = repos
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
        .take(TOP_REPOSITORIES)
        .map(|(repo, count)| (repo.to_string(), count))
        .collect();

    let days = activities.iter().counts_by(|a| a.date.date());
    let daily = match days.keys().minmax() {
        itertools::MinMaxResult::NoElements => vec![],
        itertools::MinMaxResult::OneElement(&day) => vec![(day, days[&day])],
        itertools::MinMaxResult::MinMax(&first, &last) => {
            let mut out = Vec::new();
            let mut day = Some(first);
            while let Some(d) = day.filter(|d| *d <= last) {
                out.push((d, days.get(&d).copied().unwrap_or(0)));
                day = d.next_day();
            }
            out
        }
    };

    Summary {
        total: activities.len(),
        users: by_user.len(),
        repositories,
        by_kind,
        by_user,
        top_repositories,
        daily,
    }
}

#[cfg(test)]
mod tests {
    use time::{
        OffsetDateTime,
        macros::{date, datetime},
    };

    use super::*;

    fn activity(user: &str, kind: ActivityKind, repo: &str, date: OffsetDateTime) -> Activity {
        Activity {
            user: user.to_string(),
            date,
            kind,
            repo: repo.to_string(),
            number: 1,
            title: "t".to_string(),
            state: "open".to_string(),
            comments: 0,
            url: String::new(),
        }
    }

    #[test]
    fn test_summarize() {
        use ActivityKind::{PullRequestEvent, PullRequestReviewEvent};
        let activities = vec![
            activity("bob", PullRequestEvent, "acme/a", datetime!(2025-03-01 10:00 UTC)),
            activity("alice", PullRequestReviewEvent, "acme/a", datetime!(2025-03-01 23:59 UTC)),
            activity("alice", PullRequestEvent, "acme/b", datetime!(2025-03-04 08:00 UTC)),
        ];
        let summary = summarize(&activities);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.users, 2);
        assert_eq!(summary.repositories, 2);
        assert_eq!(summary.by_kind, vec![
            (ActivityKind::PullRequestEvent, 2),
            (ActivityKind::PullRequestReviewEvent, 1),
            (ActivityKind::IssueCommentEvent, 0),
        ]);
        assert_eq!(summary.by_user[0], UserCounts {
            user: "alice".to_string(),
            total: 2,
            by_kind: vec![1, 1, 0],
        });
        assert_eq!(summary.by_user[1].user, "bob");
        assert_eq!(summary.top_repositories[0], ("acme/a".to_string(), 2));
        assert_eq!(summary.daily, vec![
            (date!(2025 - 03 - 01), 2),
            (date!(2025 - 03 - 02), 0),
            (date!(2025 - 03 - 03), 0),
            (date!(2025 - 03 - 04), 1),
        ]);
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.daily.is_empty());
        assert_eq!(summary.by_kind.len(), 3);
    }

    #[test]
    fn test_top_repositories_limit() {
        let activities = (0..15)
            .map(|i| {
                activity(
                    "alice",
                    ActivityKind::IssueCommentEvent,
                    &format!("acme/repo{i:02}"),
                    datetime!(2025-03-01 10:00 UTC),
                )
            })
            .collect::<Vec<_>>();
        let summary = summarize(&activities);
        assert_eq!(summary.repositories, 15);
        assert_eq!(summary.top_repositories.len(), TOP_REPOSITORIES);
        assert_eq!(summary.top_repositories[0].0, "acme/repo00");
    }
}
