use std::future::Future;

use anyhow::Result;
use time::Date;
use tracker_core::models::Activity;
use tracker_github::GitHub;

/// Where per-user activity comes from.
pub trait ActivitySource: Send + Sync + 'static {
    /// Check credentials before any user is fetched.
    fn verify(&self) -> impl Future<Output = Result<()>> + Send;

    fn user_activities(
        &self,
        username: &str,
        from: Date,
        to: Date,
        org: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Activity>>> + Send;
}

impl ActivitySource for GitHub {
    async fn verify(&self) -> Result<()> {
        GitHub::verify(self).await?;
        Ok(())
    }

    async fn user_activities(
        &self,
        username: &str,
        from: Date,
        to: Date,
        org: Option<&str>,
    ) -> Result<Vec<Activity>> {
        GitHub::user_activities(self, username, from, to, org).await
    }
}
