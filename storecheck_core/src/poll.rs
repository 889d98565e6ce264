//! Bounded poll-until-visible primitive.
//!
//! Used by adapters whose backend applies writes asynchronously (ClickHouse
//! mutations, distributed inserts). The probe is re-run at a fixed interval
//! until it reports the expected state or the bound is exhausted.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;
use crate::timeout::PollConfig;

/// Outcome of a bounded poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The probe observed the expected state.
    Visible { attempts: u32, waited: Duration },
    /// The bound was exhausted first.
    TimedOut { attempts: u32, waited: Duration },
}

impl PollOutcome {
    pub fn is_visible(&self) -> bool {
        matches!(self, PollOutcome::Visible { .. })
    }

    /// Total time spent polling.
    pub fn waited(&self) -> Duration {
        match self {
            PollOutcome::Visible { waited, .. } | PollOutcome::TimedOut { waited, .. } => *waited,
        }
    }
}

/// Polls `probe` until it returns `Ok(true)` or `config.max_wait` elapses.
///
/// The probe always runs at least once. Probe errors end the poll
/// immediately and are returned as-is.
pub async fn poll_until<F, Fut>(config: &PollConfig, mut probe: F) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if probe().await? {
            return Ok(PollOutcome::Visible {
                attempts,
                waited: start.elapsed(),
            });
        }

        let waited = start.elapsed();
        if waited >= config.max_wait {
            tracing::debug!(attempts, ?waited, "poll bound exhausted");
            return Ok(PollOutcome::TimedOut { attempts, waited });
        }

        let remaining = config.max_wait - waited;
        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}
