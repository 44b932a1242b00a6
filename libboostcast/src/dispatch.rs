//! Boost dispatch loop
//!
//! One cycle polls the source account, and for every post not yet in the
//! ledger boosts it through each subscriber's own credential. A subscriber
//! whose credential is rejected is removed on the spot; any other failure
//! only affects that subscriber and that post. A post enters the ledger once
//! its fan-out pass is over, whatever the individual outcomes were.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::platforms::{ApiConnector, SocialApi};
use crate::state::BotState;
use crate::types::{CredentialPair, PostId, SubscriberId};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Account whose posts are boosted
    pub source_account: SubscriberId,
    /// The bot's own account, skipped during fan-out unless allowed
    pub bot_account: SubscriberId,
    pub let_bot_account_boost: bool,
    pub poll_interval: Duration,
    pub rate_limit_backoff: Duration,
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub new_posts: usize,
    pub reshares: usize,
    pub already_reshared: usize,
    pub revoked: usize,
    pub failures: usize,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            new_posts: 0,
            reshares: 0,
            already_reshared: 0,
            revoked: 0,
            failures: 0,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new post(s), {} boost(s), {} already boosted, {} revoked, {} failed",
            self.new_posts, self.reshares, self.already_reshared, self.revoked, self.failures
        )
    }
}

enum Outcome {
    Reshared,
    AlreadyReshared,
}

/// Releases the in-flight reservation if a pass is dropped before commit
struct Reservation<'a> {
    state: &'a BotState,
    id: &'a PostId,
    committed: bool,
}

impl<'a> Reservation<'a> {
    fn acquire(state: &'a BotState, id: &'a PostId) -> Option<Self> {
        state.begin_post(id).then_some(Self {
            state,
            id,
            committed: false,
        })
    }

    fn commit(mut self) {
        self.state.commit_post(self.id);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.abandon_post(self.id);
        }
    }
}

pub struct Dispatcher {
    state: BotState,
    bot_api: Arc<dyn SocialApi>,
    connector: Arc<dyn ApiConnector>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        state: BotState,
        bot_api: Arc<dyn SocialApi>,
        connector: Arc<dyn ApiConnector>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            state,
            bot_api,
            connector,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Poll once and fan out every new post
    ///
    /// # Errors
    ///
    /// Only a failed poll of the source account is returned; per-subscriber
    /// failures are counted in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::new();

        let mut posts = self
            .bot_api
            .recent_posts(&self.settings.source_account)
            .await?;
        debug!(count = posts.len(), "Polled source account");

        // Oldest first so the boosts keep the source's order
        posts.reverse();

        for post in posts {
            let Some(reservation) = Reservation::acquire(&self.state, &post.id) else {
                continue;
            };

            info!(post = %post.id, "New post from source account");
            report.new_posts += 1;
            self.fan_out(&post.id, &mut report).await;
            reservation.commit();
        }

        Ok(report)
    }

    async fn fan_out(&self, post: &PostId, report: &mut CycleReport) {
        for (id, subscriber) in self.state.snapshot_subscribers() {
            if id == self.settings.bot_account && !self.settings.let_bot_account_boost {
                debug!(subscriber = %id, "Skipping bot account");
                continue;
            }

            match self.reshare_as(&subscriber.credentials, post).await {
                Ok(Outcome::Reshared) => {
                    debug!(subscriber = %id, post = %post, "Boosted");
                    self.state.record_reshare();
                    report.reshares += 1;
                }
                Ok(Outcome::AlreadyReshared) => {
                    debug!(subscriber = %id, post = %post, "Already boosted");
                    report.already_reshared += 1;
                }
                Err(e) if e.is_credential_invalid() => {
                    if self.state.revoke(&id) {
                        report.revoked += 1;
                    }
                }
                Err(e) => {
                    warn!(subscriber = %id, post = %post, "Boost failed: {}", e);
                    report.failures += 1;
                }
            }
        }
    }

    async fn reshare_as(&self, credentials: &CredentialPair, post: &PostId) -> Result<Outcome> {
        let api = self.connector.connect(credentials)?;
        if api.fetch_post(post).await?.reshared {
            return Ok(Outcome::AlreadyReshared);
        }
        api.reshare(post).await?;
        Ok(Outcome::Reshared)
    }

    /// Run cycles until `shutdown` is set
    ///
    /// `on_cycle` is awaited with every successful report. Rate limiting on
    /// the poll waits `rate_limit_backoff` instead of `poll_interval`.
    pub async fn run<F, Fut>(&self, shutdown: Arc<AtomicBool>, mut on_cycle: F)
    where
        F: FnMut(CycleReport) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!(
            source = %self.settings.source_account,
            interval = ?self.settings.poll_interval,
            "Dispatch loop starting"
        );

        while !shutdown.load(Ordering::Relaxed) {
            let wait = match self.run_cycle().await {
                Ok(report) => {
                    if report.new_posts > 0 {
                        info!("{}", report);
                    } else {
                        debug!("No new posts");
                    }
                    on_cycle(report).await;
                    self.settings.poll_interval
                }
                Err(e) if e.is_rate_limited() => {
                    warn!(
                        "Rate limited while polling, backing off for {:?}: {}",
                        self.settings.rate_limit_backoff, e
                    );
                    self.settings.rate_limit_backoff
                }
                Err(e) => {
                    error!("Error polling source account: {}", e);
                    self.settings.poll_interval
                }
            };

            sleep_unless_shutdown(wait, &shutdown).await;
        }

        info!("Dispatch loop stopped");
    }
}

/// Sleep in slices of at most one second, returning early on shutdown
pub(crate) async fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_secs(1);
    let mut remaining = duration;

    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let mut report = CycleReport::new();
        report.new_posts = 2;
        report.reshares = 5;
        report.revoked = 1;

        assert_eq!(
            report.to_string(),
            "2 new post(s), 5 boost(s), 0 already boosted, 1 revoked, 0 failed"
        );
    }

    #[tokio::test]
    async fn test_sleep_returns_early_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        let started = std::time::Instant::now();

        sleep_unless_shutdown(Duration::from_secs(30), &shutdown).await;

        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_sleep_covers_whole_duration() {
        let shutdown = AtomicBool::new(false);
        let started = std::time::Instant::now();

        sleep_unless_shutdown(Duration::from_millis(1200), &shutdown).await;

        assert!(started.elapsed() >= Duration::from_millis(1200));
    }
}
