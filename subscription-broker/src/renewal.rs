//! Background renewal of subscriptions nearing expiration.
//!
//! The scheduler wakes once per renewal interval, renews every subscription
//! that would lapse within two intervals, and waits for all of those renewals
//! to finish before sleeping again. A failed renewal keeps the old expiration
//! and is retried on the next tick, which the two-interval lookahead leaves
//! room for.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, Result};
use crate::manager::{RenewOutcome, SubscriptionManager};

/// Outcome of one renewal pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Subscriptions that fell inside the renewal window
    pub due: usize,
    pub renewed: usize,
    pub failed: usize,
    /// Records removed between the snapshot and their renewal
    pub missing: usize,
    /// Renewals interrupted by shutdown
    pub canceled: usize,
}

/// Renews subscriptions held by a [`SubscriptionManager`].
#[derive(Debug, Clone)]
pub struct RenewalScheduler {
    manager: SubscriptionManager,
    interval: Duration,
}

impl RenewalScheduler {
    pub fn new(manager: SubscriptionManager, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Renew everything that expires before `now + 2 * interval`.
    ///
    /// Renewals run concurrently and this returns once all have completed.
    pub async fn renew_due(&self, now: DateTime<Utc>, cancel: &CancellationToken) -> RenewalReport {
        let window = chrono::Duration::from_std(self.interval * 2)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let checkpoint = now
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let due: Vec<_> = self
            .manager
            .subscriptions()
            .await
            .into_iter()
            .flat_map(|(_, records)| records)
            .filter(|record| record.expires_before(checkpoint))
            .collect();

        let mut report = RenewalReport {
            due: due.len(),
            ..RenewalReport::default()
        };
        if due.is_empty() {
            return report;
        }

        tracing::debug!("Renewing {} subscription(s) expiring before {}", due.len(), checkpoint);

        let results = join_all(
            due.iter()
                .map(|record| self.manager.try_renew(record.tenant_id, &record.id, cancel)),
        )
        .await;

        for result in results {
            match result {
                Ok(RenewOutcome::Renewed) => report.renewed += 1,
                Ok(RenewOutcome::Missing) => report.missing += 1,
                Ok(RenewOutcome::Failed) => report.failed += 1,
                Err(_) => report.canceled += 1,
            }
        }

        if report.missing > 0 {
            tracing::debug!(
                "{} subscription(s) removed before renewal; nothing to retry",
                report.missing
            );
        }
        if report.failed > 0 {
            tracing::warn!(
                "{} of {} subscription renewal(s) failed; retrying next cycle",
                report.failed,
                report.due
            );
        }
        report
    }

    /// Spawn the background loop.
    pub fn start(self) -> RenewalHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.run(cancel.clone()));
        RenewalHandle {
            cancel,
            task: Some(task),
        }
    }

    async fn run(self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Renewal scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    self.renew_due(Utc::now(), &cancel).await;
                }
            }
        }

        tracing::info!("Renewal scheduler stopped");
    }
}

/// Handle to a running scheduler.
#[derive(Debug)]
pub struct RenewalHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RenewalHandle {
    /// Stop the loop and wait for it to exit.
    ///
    /// In-flight renewals are canceled. Waits at most `wait` for the task.
    pub async fn shutdown(mut self, wait: Duration) -> Result<()> {
        self.cancel.cancel();

        let Some(task) = self.task.take() else {
            return Ok(());
        };

        match timeout(wait, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BrokerError::ShutdownError(format!(
                "Renewal task panicked: {e}"
            ))),
            Err(_) => Err(BrokerError::ShutdownError(format!(
                "Renewal task shutdown timed out after {} seconds",
                wait.as_secs()
            ))),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
