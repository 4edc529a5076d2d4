//! Pipeline configuration.
//!
//! `PipelineConfig` is an immutable value handed to every poller, processor
//! and scheduler at construction. Defaults reproduce the production
//! constants: 5 second poll cycle, 5 second deadlines and a retry ceiling
//! of 3.

use std::time::Duration;

use crate::error::ConfigError;

/// Default interval between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for claim, record and poll queries.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of failed executions after which a stage is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default capacity of each stage's work queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default cap on concurrent executions per stage.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Configuration shared by all pipeline components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Sleep between two poll cycles.
    pub poll_interval: Duration,
    /// Deadline for a single eligibility query.
    pub poll_timeout: Duration,
    /// Deadline for a claim or record operation.
    pub operation_timeout: Duration,
    /// Failed executions allowed before a stage is dead-lettered.
    pub max_retries: u32,
    /// Capacity of the bounded queue between poller and scheduler.
    pub queue_capacity: usize,
    /// Upper bound on concurrent executions per stage. `None` dispatches
    /// every polled item immediately.
    pub max_in_flight: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_timeout: DEFAULT_OPERATION_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_in_flight: Some(DEFAULT_MAX_IN_FLIGHT),
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the eligibility query deadline.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the claim/record deadline.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Sets the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the work queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bounds concurrent executions per stage.
    pub fn with_max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be greater than zero"));
        }
        if self.poll_timeout.is_zero() {
            return Err(invalid("poll_timeout", "must be greater than zero"));
        }
        if self.operation_timeout.is_zero() {
            return Err(invalid("operation_timeout", "must be greater than zero"));
        }
        if i32::try_from(self.max_retries).is_err() {
            return Err(invalid("max_retries", "must fit in a 32-bit signed integer"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be at least 1"));
        }
        if self.max_in_flight == Some(0) {
            return Err(invalid("max_in_flight", "must be at least 1 when set"));
        }
        Ok(())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
