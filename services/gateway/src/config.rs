//! Gateway configuration (env-driven).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tokio::sync::Semaphore;

use crate::batch::BatchConfig;
use crate::read::SamplingRates;

/// Process configuration for the `qscheduler-gateway` binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// gRPC listen address.
    pub grpc_listen_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Limits and timeouts for the gateway itself.
    pub gateway: GatewayConfig,
}

/// Limits and timeouts of a [`Gateway`](crate::gateway::Gateway).
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Capacity of the assign admission limiter.
    pub assign_concurrency: usize,

    /// Capacity of the notify admission limiter; `None` admits every notify.
    pub notify_concurrency: Option<usize>,

    /// Deadline used when the caller does not send one.
    pub default_deadline: Duration,

    /// Upper bound on caller-supplied deadlines.
    pub max_deadline: Duration,

    /// Batch actor mailbox and batching limits.
    pub batch: BatchConfig,

    /// Callback hint sampling rates.
    pub sampling: SamplingRates,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            assign_concurrency: 64,
            notify_concurrency: None,
            default_deadline: Duration::from_secs(10),
            max_deadline: Duration::from_secs(60),
            batch: BatchConfig::default(),
            sampling: SamplingRates::default(),
        }
    }
}

impl GatewayConfig {
    /// Check limits that would make the gateway reject everything or that
    /// its semaphores and mailboxes cannot hold.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (1..=Semaphore::MAX_PERMITS).contains(&self.assign_concurrency),
            "assign concurrency must be between 1 and {}",
            Semaphore::MAX_PERMITS
        );
        if let Some(notify) = self.notify_concurrency {
            ensure!(
                (1..=Semaphore::MAX_PERMITS).contains(&notify),
                "notify concurrency must be between 1 and {} when enabled",
                Semaphore::MAX_PERMITS
            );
        }
        ensure!(
            !self.default_deadline.is_zero(),
            "default deadline must be positive"
        );
        ensure!(
            self.default_deadline <= self.max_deadline,
            "default deadline ({:?}) exceeds max deadline ({:?})",
            self.default_deadline,
            self.max_deadline
        );
        ensure!(
            (1..=Semaphore::MAX_PERMITS).contains(&self.batch.queue_capacity),
            "queue capacity must be between 1 and {}",
            Semaphore::MAX_PERMITS
        );
        ensure!(
            self.batch.max_batch_size >= 1,
            "max batch size must be at least 1"
        );
        Ok(())
    }

    /// Clamp a caller deadline to `max_deadline`, or use the default.
    pub fn effective_deadline(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(deadline) => deadline.min(self.max_deadline),
            None => self.default_deadline,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let grpc_listen_addr = std::env::var("QSCHED_GRPC_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9090".to_string())
            .parse()
            .context("QSCHED_GRPC_LISTEN_ADDR must be a socket address.")?;

        let log_level = std::env::var("QSCHED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let defaults = GatewayConfig::default();

        let assign_concurrency = env_parse("QSCHED_ASSIGN_CONCURRENCY")?
            .unwrap_or(defaults.assign_concurrency);

        let notify_concurrency = match env_parse::<usize>("QSCHED_NOTIFY_CONCURRENCY")? {
            None | Some(0) => None,
            Some(n) => Some(n),
        };

        let default_deadline = env_millis("QSCHED_DEFAULT_DEADLINE_MS")?
            .unwrap_or(defaults.default_deadline);
        let max_deadline =
            env_millis("QSCHED_MAX_DEADLINE_MS")?.unwrap_or(defaults.max_deadline);

        let batch = BatchConfig {
            queue_capacity: env_parse("QSCHED_QUEUE_CAPACITY")?
                .unwrap_or(defaults.batch.queue_capacity),
            max_batch_size: env_parse("QSCHED_MAX_BATCH_SIZE")?
                .unwrap_or(defaults.batch.max_batch_size),
            linger: env_millis("QSCHED_BATCH_LINGER_MS")?.unwrap_or(defaults.batch.linger),
        };

        let gateway = GatewayConfig {
            assign_concurrency,
            notify_concurrency,
            default_deadline,
            max_deadline,
            batch,
            sampling: defaults.sampling,
        };
        gateway.validate().context("Invalid gateway configuration.")?;

        Ok(Self {
            grpc_listen_addr,
            log_level,
            gateway,
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .ok()
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{key} must be a non-negative integer."))
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
