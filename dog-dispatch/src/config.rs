use std::str::FromStr;
use std::time::Duration;

use crate::readiness::DEFAULT_READY_MAX_WAIT;

/// Key prefix for every queue stored in Redis
pub const QUEUE_PREFIX: &str = "app_queue_";

/// Which durable store the worker binary runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("Unknown queue backend: {}", other)),
        }
    }
}

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub prefix: String,
}

impl RedisSettings {
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!("redis://:{}@{}:{}/", password, self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            prefix: QUEUE_PREFIX.to_string(),
        }
    }
}

/// Process-level settings read from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis: RedisSettings,
    pub backend: BackendKind,
    pub worker_port: u16,
    pub komp_port: u16,
    pub queue: QueueConfig,
    pub json_logs: bool,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset or unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parse = |key: &str| get(key).and_then(|v| v.trim().parse::<u64>().ok());

        let redis = RedisSettings {
            host: get("REDIS_HOST").unwrap_or_else(|| "localhost".to_string()),
            port: parse("REDIS_PORT").and_then(|p| u16::try_from(p).ok()).unwrap_or(6379),
            password: get("REDIS_PASSWORD"),
            prefix: QUEUE_PREFIX.to_string(),
        };

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            concurrency: parse("WORKER_CONCURRENCY").map(|v| v.max(1) as usize).unwrap_or(defaults.concurrency),
            ready_max_wait: parse("READY_MAX_WAIT_MS").map(Duration::from_millis).unwrap_or(defaults.ready_max_wait),
            lease_duration: parse("QUEUE_LEASE_DURATION_SECS").map(Duration::from_secs).unwrap_or(defaults.lease_duration),
            heartbeat_interval: parse("QUEUE_HEARTBEAT_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            poll_interval: parse("QUEUE_POLL_INTERVAL_MS").map(Duration::from_millis).unwrap_or(defaults.poll_interval),
            bulk_throttle_every: parse("BULK_THROTTLE_EVERY").map(|v| v as u32).unwrap_or(defaults.bulk_throttle_every),
            bulk_throttle_pause: parse("BULK_THROTTLE_PAUSE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.bulk_throttle_pause),
        };

        Self {
            redis,
            backend: get("QUEUE_BACKEND").and_then(|v| v.parse().ok()).unwrap_or(BackendKind::Memory),
            worker_port: parse("WORKER_PORT").and_then(|p| u16::try_from(p).ok()).unwrap_or(8001),
            komp_port: parse("KOMP_PORT").and_then(|p| u16::try_from(p).ok()).unwrap_or(3000),
            queue,
            json_logs: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Worker pool tuning
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Jobs in flight per worker pool
    pub concurrency: usize,
    /// Bound on the readiness wait of a single attempt
    pub ready_max_wait: Duration,
    /// Lease duration for jobs
    pub lease_duration: Duration,
    /// Upper bound on the lease renewal tick; also paces stalled-job reclaims
    pub heartbeat_interval: Duration,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Bulk fan-out pauses after this many submissions
    pub bulk_throttle_every: u32,
    pub bulk_throttle_pause: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            ready_max_wait: DEFAULT_READY_MAX_WAIT,
            lease_duration: Duration::from_secs(300), // 5 minutes
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            bulk_throttle_every: 100,
            bulk_throttle_pause: Duration::from_millis(50),
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_ready_max_wait(mut self, max_wait: Duration) -> Self {
        self.ready_max_wait = max_wait;
        self
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_bulk_throttle(mut self, every: u32, pause: Duration) -> Self {
        self.bulk_throttle_every = every;
        self.bulk_throttle_pause = pause;
        self
    }

    /// How often a running job renews its lease. At most a third of the lease,
    /// so a renewal always lands before the lease can lapse.
    pub fn lease_heartbeat(&self) -> Duration {
        self.heartbeat_interval
            .min(self.lease_duration / 3)
            .max(Duration::from_millis(1))
    }
}
