//! Timeout configuration for adapter operations.
//!
//! Every adapter call made by the runner or the establisher is bounded by an
//! [`OperationTimeout`]. Backends that need to wait for eventual consistency
//! use the separate [`PollConfig`] bound through [`crate::poll::poll_until`].

use std::future::Future;
use std::time::Duration;

use crate::error::{CheckError, Result};

/// Upper bound for a single adapter operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationTimeout(Duration);

impl OperationTimeout {
    /// Creates a new OperationTimeout with the specified duration.
    ///
    /// # Example
    ///
    /// ```
    /// use storecheck_core::timeout::OperationTimeout;
    /// use std::time::Duration;
    ///
    /// let timeout = OperationTimeout::new(Duration::from_secs(5));
    /// assert_eq!(timeout.duration(), Duration::from_secs(5));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    /// Creates an OperationTimeout from seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    /// Creates an OperationTimeout from milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for OperationTimeout {
    /// Default timeout is 30 seconds.
    fn default() -> Self {
        Self(Duration::from_secs(30))
    }
}

/// Bounded poll parameters for read-your-write waits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Maximum total wait before the poll reports a timeout
    pub max_wait: Duration,
    /// Delay between probes
    pub interval: Duration,
}

impl PollConfig {
    /// Creates a poll configuration.
    pub fn new(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait, interval }
    }
}

impl Default for PollConfig {
    /// Default is a 10 second bound probed every 200 milliseconds.
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(10),
            interval: Duration::from_millis(200),
        }
    }
}

/// Combined timeout configuration handed to adapters and the runner.
///
/// # Example
///
/// ```
/// use storecheck_core::timeout::TimeoutConfig;
/// use std::time::Duration;
///
/// let config = TimeoutConfig::new();
/// assert_eq!(config.operation.duration(), Duration::from_secs(30));
/// assert_eq!(config.visibility.max_wait, Duration::from_secs(10));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Bound for each adapter call
    pub operation: OperationTimeout,
    /// Bound for visibility polling inside an adapter call
    pub visibility: PollConfig,
}

impl TimeoutConfig {
    /// Creates a TimeoutConfig with default bounds.
    pub fn new() -> Self {
        Self {
            operation: OperationTimeout::default(),
            visibility: PollConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `fut` under `timeout`, mapping expiry to [`CheckError::Timeout`].
pub async fn with_timeout<T, F>(timeout: OperationTimeout, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout.duration(), fut).await {
        Ok(result) => result,
        Err(_) => Err(CheckError::Timeout {
            operation: operation.to_string(),
            timeout: timeout.duration(),
        }),
    }
}
