//! Progress counter and periodic progress reporting
//!
//! [`ProgressCounter`] keeps `processed + failed <= total` under one mutex, so
//! the check and the increment are a single step. The reporter task only
//! reads it.

use crate::error::{ProgressError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Number of cells in the rendered progress bar
const BAR_WIDTH: usize = 20;

#[derive(Debug, Default)]
struct Counts {
    total: Option<u64>,
    processed: u64,
    failed: u64,
}

/// Root-unit bookkeeping: processed, failed and the fixed total
#[derive(Debug, Default)]
pub struct ProgressCounter {
    counts: Mutex<Counts>,
}

impl ProgressCounter {
    /// Create a counter with no total set
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the number of units to be registered; allowed exactly once
    pub fn set_total(&self, total: u64) -> Result<()> {
        let mut counts = self.lock();
        if let Some(existing) = counts.total {
            return Err(ProgressError::TotalAlreadySet { total: existing }.into());
        }
        counts.total = Some(total);
        Ok(())
    }

    /// Configured total, if set
    pub fn total(&self) -> Option<u64> {
        self.lock().total
    }

    /// Current `(processed, failed)` pair
    pub fn counts(&self) -> (u64, u64) {
        let counts = self.lock();
        (counts.processed, counts.failed)
    }

    /// Register one successfully processed unit
    ///
    /// Returns the `(processed, failed)` pair after the increment.
    pub fn register_processed(&self) -> Result<(u64, u64)> {
        self.register(|counts| counts.processed += 1)
    }

    /// Register one failed unit
    ///
    /// Returns the `(processed, failed)` pair after the increment.
    pub fn register_failed(&self) -> Result<(u64, u64)> {
        self.register(|counts| counts.failed += 1)
    }

    fn register(&self, bump: impl FnOnce(&mut Counts)) -> Result<(u64, u64)> {
        let mut counts = self.lock();
        let total = counts.total.ok_or(ProgressError::TotalNotSet)?;
        if counts.processed + counts.failed >= total {
            return Err(ProgressError::Exhausted { total }.into());
        }
        bump(&mut counts);
        Ok((counts.processed, counts.failed))
    }
}

/// Render `Files: done/total |bar| pct% Complete`
pub fn render_progress_line(done: u64, total: u64) -> String {
    let ratio = if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    };
    let filled = if total == 0 {
        BAR_WIDTH
    } else {
        ((BAR_WIDTH as u64 * done) / total).min(BAR_WIDTH as u64) as usize
    };
    format!(
        "Files: {}/{} |{}{}| {:.1}% Complete",
        done,
        total,
        "█".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        ratio * 100.0
    )
}

/// Spawn a background task that logs a progress line every `interval`
pub fn spawn_progress_reporter(
    counter: Arc<ProgressCounter>,
    interval: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(total) = counter.total() else {
                        continue;
                    };
                    if total == 0 {
                        continue;
                    }
                    let (processed, failed) = counter.counts();
                    tracing::info!("{}", render_progress_line(processed + failed, total));
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    })
}
