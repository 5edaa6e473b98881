use crate::client::Callback;
use crate::error::ConfigError;
use crate::event::Context;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Wall-clock source. Injectable so tests can pin message times.
pub type NowFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Unique-id source. Injectable so tests can pin message ids.
pub type UidFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Maps a retry attempt index to the sleep before the next try.
pub type RetryAfterFn = Arc<dyn Fn(usize) -> Duration + Send + Sync>;

/// What to do when a batch is ready but every uploader slot is busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaturationPolicy {
    /// Suspend the dispatcher until a slot frees up. Favors durability.
    #[default]
    Block,
    /// Fail the batch immediately through the failure callback. Favors
    /// freshness over durability.
    FailBatch,
}

/// Client configuration. `Config::default()` matches the hosted endpoint
/// defaults; every field can be overridden before constructing the client.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the ingestion service.
    pub endpoint: String,

    /// Periodic flush interval for partially filled batches.
    pub interval: Duration,

    /// Maximum number of events per batch.
    pub batch_size: usize,

    /// Maximum encoded size of a batch in bytes.
    pub max_batch_bytes: usize,

    /// Maximum encoded size of a single event in bytes. Oversize events are
    /// rejected at enqueue time.
    pub max_message_bytes: usize,

    /// Number of uploads allowed in flight at once.
    pub max_concurrent_requests: usize,

    /// Behavior when the upload pool is saturated.
    pub saturation: SaturationPolicy,

    /// Upload attempts per batch before giving up.
    pub retry_attempts: usize,

    /// Sleep schedule between attempts. Defaults to exponential back-off
    /// with jitter.
    pub retry_after: Option<RetryAfterFn>,

    /// Per-request HTTP timeout.
    pub request_timeout: Duration,

    /// Pre-built HTTP client to use instead of constructing one.
    pub transport: Option<reqwest::Client>,

    /// Baseline context merged into every batch envelope. The library
    /// descriptor is always forced on top of it.
    pub default_context: Option<Context>,

    /// Per-event delivery observer.
    pub callback: Option<Arc<dyn Callback>>,

    /// Capacity of the input channel between producers and the dispatcher.
    /// Producers suspend while it is full.
    pub channel_capacity: usize,

    /// Time source override.
    pub now: Option<NowFn>,

    /// Id source override.
    pub uid: Option<UidFn>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "https://api.segment.io".to_owned(),
            interval: Duration::from_secs(5),
            batch_size: 250,
            max_batch_bytes: 500_000,
            max_message_bytes: 32_000,
            max_concurrent_requests: 1,
            saturation: SaturationPolicy::Block,
            retry_attempts: 10,
            retry_after: None,
            request_timeout: Duration::from_secs(10),
            transport: None,
            default_context: None,
            callback: None,
            channel_capacity: 100,
            now: None,
            uid: None,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Url::parse(&self.endpoint).is_err() {
            return Err(ConfigError::new(
                "Endpoint",
                &self.endpoint,
                "not a valid URL",
            ));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::new(
                "Interval",
                format!("{:?}", self.interval),
                "must be positive",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::new(
                "BatchSize",
                self.batch_size.to_string(),
                "must be greater than zero",
            ));
        }
        if self.max_batch_bytes == 0 {
            return Err(ConfigError::new(
                "MaxBatchBytes",
                self.max_batch_bytes.to_string(),
                "must be greater than zero",
            ));
        }
        if self.max_message_bytes == 0 {
            return Err(ConfigError::new(
                "MaxMessageBytes",
                self.max_message_bytes.to_string(),
                "must be greater than zero",
            ));
        }
        if self.max_message_bytes > self.max_batch_bytes {
            return Err(ConfigError::new(
                "MaxMessageBytes",
                self.max_message_bytes.to_string(),
                "must not exceed MaxBatchBytes",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::new(
                "MaxConcurrentRequests",
                self.max_concurrent_requests.to_string(),
                "must be greater than zero",
            ));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::new(
                "RetryAttempts",
                self.retry_attempts.to_string(),
                "must be greater than zero",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::new(
                "ChannelCapacity",
                self.channel_capacity.to_string(),
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub(crate) fn now_fn(&self) -> NowFn {
        self.now.clone().unwrap_or_else(|| Arc::new(Utc::now))
    }

    pub(crate) fn uid_fn(&self) -> UidFn {
        self.uid
            .clone()
            .unwrap_or_else(|| Arc::new(|| uuid::Uuid::new_v4().to_string()))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .field("max_batch_bytes", &self.max_batch_bytes)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("saturation", &self.saturation)
            .field("retry_attempts", &self.retry_attempts)
            .field("request_timeout", &self.request_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}
