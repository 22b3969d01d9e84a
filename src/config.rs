use std::sync::Arc;
use std::time::Duration;

use crate::logger::{Logger, NoOpLogger};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 150;

/// Configuration for a [`SocketSelector`](crate::selector::SocketSelector).
///
/// ## Tuning
///
/// - `poll_timeout`: upper bound on one blocking `poll`. Submissions wake
///   the selector early, so this mostly bounds how long an idle loop sleeps
///   between housekeeping passes. `Duration::ZERO` makes `poll` return
///   immediately when nothing is ready.
/// - `events_capacity`: readiness events accepted per poll (typical:
///   512-4096).
#[derive(Clone)]
pub struct SelectorConfig {
    /// Maximum time one `poll` call may block.
    pub poll_timeout: Duration,
    /// Capacity of the readiness event buffer.
    pub events_capacity: usize,
    /// Sink for conditions the selector swallowed to protect the loop.
    pub logger: Arc<dyn Logger>,
}

impl SelectorConfig {
    /// Create a new builder for SelectorConfig
    pub fn builder() -> SelectorConfigBuilder {
        SelectorConfigBuilder::new()
    }
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(DEFAULT_POLL_TIMEOUT_MS),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            logger: Arc::new(NoOpLogger),
        }
    }
}

/// Builder for SelectorConfig.
///
/// All fields are optional and fall back to `SelectorConfig::default()`.
pub struct SelectorConfigBuilder {
    poll_timeout: Option<Duration>,
    events_capacity: Option<usize>,
    logger: Option<Arc<dyn Logger>>,
}

impl SelectorConfigBuilder {
    pub fn new() -> Self {
        Self {
            poll_timeout: None,
            events_capacity: None,
            logger: None,
        }
    }

    /// Set the maximum blocking time of one poll
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set the readiness event buffer capacity
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = Some(capacity);
        self
    }

    /// Set the logger implementation
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the SelectorConfig
    pub fn build(self) -> SelectorConfig {
        let default = SelectorConfig::default();
        SelectorConfig {
            poll_timeout: self.poll_timeout.unwrap_or(default.poll_timeout),
            events_capacity: self.events_capacity.unwrap_or(default.events_capacity),
            logger: self.logger.unwrap_or(default.logger),
        }
    }
}

impl Default for SelectorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
