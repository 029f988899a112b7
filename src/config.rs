//! Worker configuration.
//!
//! `WorkerConfig` carries everything needed to stand up a worker: pool size,
//! store connection details and the loop intervals. Store key names are
//! derived from the namespace through [`StoreKeys`].

use std::time::Duration;

/// Default Redis address.
const DEFAULT_ADDRESS: &str = "127.0.0.1:6379";

/// Default key namespace for all store keys.
const DEFAULT_NAMESPACE: &str = "delayed-worker";

/// What the broker does with a stored message that cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeFailurePolicy {
    /// Delete the message. The task is lost; nothing reaches the pool.
    #[default]
    Discard,
    /// Leave the message in the message map for manual inspection.
    Retain,
}

impl std::str::FromStr for DecodeFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "retain" => Ok(Self::Retain),
            other => Err(format!(
                "unknown decode failure policy '{}', expected 'discard' or 'retain'",
                other
            )),
        }
    }
}

/// Configuration for a worker (pool + broker).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent workers in the pool.
    pub size: usize,
    /// Store address as `host:port`.
    pub address: String,
    /// Store password, if any.
    pub password: Option<String>,
    /// Store database index.
    pub db: i64,
    /// Prefix for every store key.
    pub namespace: String,
    /// How often the broker polls the store for due tasks.
    pub poll_interval: Duration,
    /// How long the dispatcher sleeps when the queue is empty.
    pub dispatch_interval: Duration,
    /// Handling of undecodable stored messages.
    pub decode_failure: DecodeFailurePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            size: 4,
            address: DEFAULT_ADDRESS.to_string(),
            password: None,
            db: 0,
            namespace: DEFAULT_NAMESPACE.to_string(),
            poll_interval: Duration::from_secs(1),
            dispatch_interval: Duration::from_secs(1),
            decode_failure: DecodeFailurePolicy::Discard,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    /// Sets the store address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the store password.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the store database index.
    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Sets the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the broker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the dispatcher idle interval.
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval = interval;
        self
    }

    /// Sets the decode failure policy.
    pub fn with_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure = policy;
        self
    }

    /// Builds the Redis connection URL.
    ///
    /// The password is percent-encoded so it may contain `@`, `:` or `/`.
    pub fn redis_url(&self) -> String {
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}/{}",
                urlencoding::encode(password),
                self.address,
                self.db
            ),
            _ => format!("redis://{}/{}", self.address, self.db),
        }
    }

    /// Returns the store keys for this configuration's namespace.
    pub fn keys(&self) -> StoreKeys {
        StoreKeys::new(&self.namespace)
    }
}

/// Names of the three store structures the worker touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    /// Sorted set of task ids scored by execute-at unix timestamp.
    pub schedule: String,
    /// Hash of task id to serialized task message.
    pub messages: String,
    /// Hash of task id to serialized result envelope.
    pub results: String,
}

impl StoreKeys {
    pub fn new(namespace: &str) -> Self {
        Self {
            schedule: format!("{}:task:queue", namespace),
            messages: format!("{}:task:msg", namespace),
            results: format!("{}:task:result", namespace),
        }
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();

        assert_eq!(config.size, 4);
        assert_eq!(config.address, "127.0.0.1:6379");
        assert!(config.password.is_none());
        assert_eq!(config.db, 0);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.dispatch_interval, Duration::from_secs(1));
        assert_eq!(config.decode_failure, DecodeFailurePolicy::Discard);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::new(8)
            .with_address("redis.internal:6380")
            .with_password("secret")
            .with_db(3)
            .with_namespace("billing")
            .with_poll_interval(Duration::from_millis(250))
            .with_dispatch_interval(Duration::from_millis(50))
            .with_decode_failure(DecodeFailurePolicy::Retain);

        assert_eq!(config.size, 8);
        assert_eq!(config.address, "redis.internal:6380");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.db, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.dispatch_interval, Duration::from_millis(50));
        assert_eq!(config.decode_failure, DecodeFailurePolicy::Retain);
        assert_eq!(config.keys().schedule, "billing:task:queue");
    }

    #[test]
    fn test_redis_url() {
        let config = WorkerConfig::default();
        assert_eq!(config.redis_url(), "redis://127.0.0.1:6379/0");

        let config = WorkerConfig::default().with_password("p@ss/word").with_db(2);
        assert_eq!(config.redis_url(), "redis://:p%40ss%2Fword@127.0.0.1:6379/2");
    }

    #[test]
    fn test_store_keys() {
        let keys = StoreKeys::new("ns");
        assert_eq!(keys.schedule, "ns:task:queue");
        assert_eq!(keys.messages, "ns:task:msg");
        assert_eq!(keys.results, "ns:task:result");
    }

    #[test]
    fn test_decode_failure_policy_from_str() {
        assert_eq!(
            "discard".parse::<DecodeFailurePolicy>(),
            Ok(DecodeFailurePolicy::Discard)
        );
        assert_eq!(
            "RETAIN".parse::<DecodeFailurePolicy>(),
            Ok(DecodeFailurePolicy::Retain)
        );
        assert!("requeue".parse::<DecodeFailurePolicy>().is_err());
    }
}
