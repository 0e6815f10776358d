use crate::runtime::telemetry;
use crate::sync::backoff::{
    RetryTimer, DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX, DEFAULT_RETRY_MULTIPLIER,
};
use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Prefix shared by every environment variable the service reads.
pub const ENV_PREFIX: &str = "PROTOMEMPOOL_";

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8332";
const DEFAULT_RPC_USER: &str = "rpc";
const DEFAULT_RPC_PASSWORD: &str = "rpc";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_POLL_RATE_MS: u64 = 2_000;
const DEFAULT_INDEXER_INTERVAL_SECS: u64 = 60;
const DEFAULT_INDEX_DEPTH: usize = 1_008;
const DEFAULT_INITIAL_BLOCKS: usize = 8;
const DEFAULT_RESPAWN_DELAY_SECS: u64 = 10;

/// Runtime configuration for one protomempool process.
///
/// All instances must be constructed via [`SyncConfig::builder`], [`SyncConfig::new`] or
/// [`SyncConfig::from_env`] so invariants are validated before any consumer observes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    rpc_url: String,
    rpc_user: String,
    rpc_password: String,
    rpc_timeout: Duration,
    poll_interval: Duration,
    retry_base: Duration,
    retry_max: Duration,
    retry_multiplier: u32,
    indexing_enabled: bool,
    indexer_interval: Duration,
    index_depth: usize,
    initial_blocks: usize,
    worker_processes: usize,
    respawn_delay: Duration,
    metrics_interval: Duration,
}

pub struct SyncConfigParams {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub rpc_timeout: Duration,
    pub poll_interval: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub retry_multiplier: u32,
    pub indexing_enabled: bool,
    pub indexer_interval: Duration,
    pub index_depth: usize,
    pub initial_blocks: usize,
    pub worker_processes: usize,
    pub respawn_delay: Duration,
    pub metrics_interval: Duration,
}

impl SyncConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: SyncConfigParams) -> Result<Self> {
        let SyncConfigParams {
            rpc_url,
            rpc_user,
            rpc_password,
            rpc_timeout,
            poll_interval,
            retry_base,
            retry_max,
            retry_multiplier,
            indexing_enabled,
            indexer_interval,
            index_depth,
            initial_blocks,
            worker_processes,
            respawn_delay,
            metrics_interval,
        } = params;

        let config = Self {
            rpc_url: trimmed_string(rpc_url),
            rpc_user: trimmed_string(rpc_user),
            rpc_password: trimmed_string(rpc_password),
            rpc_timeout,
            poll_interval,
            retry_base,
            retry_max,
            retry_multiplier,
            indexing_enabled,
            indexer_interval,
            index_depth,
            initial_blocks,
            worker_processes,
            respawn_delay,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `PROTOMEMPOOL_*` variables, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        Self::builder()
            .rpc_url(read_env_or_default("RPC_URL", DEFAULT_RPC_URL))
            .rpc_user(read_env_or_default("RPC_USER", DEFAULT_RPC_USER))
            .rpc_password(read_env_or_default("RPC_PASSWORD", DEFAULT_RPC_PASSWORD))
            .rpc_timeout(Duration::from_secs(parse_env_with_default(
                "RPC_TIMEOUT_SECS",
                DEFAULT_RPC_TIMEOUT_SECS,
            )?))
            .poll_interval(Duration::from_millis(parse_env_with_default(
                "POLL_RATE_MS",
                DEFAULT_POLL_RATE_MS,
            )?))
            .retry_base(Duration::from_secs(parse_env_with_default(
                "RETRY_BASE_SECS",
                DEFAULT_RETRY_BASE.as_secs(),
            )?))
            .retry_max(Duration::from_secs(parse_env_with_default(
                "RETRY_MAX_SECS",
                DEFAULT_RETRY_MAX.as_secs(),
            )?))
            .retry_multiplier(parse_env_with_default(
                "RETRY_MULTIPLIER",
                DEFAULT_RETRY_MULTIPLIER,
            )?)
            .indexing_enabled(parse_flag_with_default("INDEXING_ENABLED", true)?)
            .indexer_interval(Duration::from_secs(parse_env_with_default(
                "INDEXER_INTERVAL_SECS",
                DEFAULT_INDEXER_INTERVAL_SECS,
            )?))
            .index_depth(parse_env_with_default("INDEX_DEPTH", DEFAULT_INDEX_DEPTH)?)
            .initial_blocks(parse_env_with_default(
                "INITIAL_BLOCKS",
                DEFAULT_INITIAL_BLOCKS,
            )?)
            .worker_processes(parse_env_with_default("SPAWN_CLUSTER_PROCS", 0usize)?)
            .respawn_delay(Duration::from_secs(parse_env_with_default(
                "RESPAWN_DELAY_SECS",
                DEFAULT_RESPAWN_DELAY_SECS,
            )?))
            .metrics_interval(Duration::from_secs(parse_env_with_default(
                "METRICS_INTERVAL_SECS",
                telemetry::DEFAULT_METRICS_INTERVAL.as_secs(),
            )?))
            .build()
    }

    /// Full RPC URL (including scheme) of the node.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    pub fn rpc_user(&self) -> &str {
        &self.rpc_user
    }

    pub fn rpc_password(&self) -> &str {
        &self.rpc_password
    }

    /// Per-call timeout applied by the JSON-RPC client.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Fixed delay between successful update passes.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn retry_base(&self) -> Duration {
        self.retry_base
    }

    pub fn retry_max(&self) -> Duration {
        self.retry_max
    }

    pub fn retry_multiplier(&self) -> u32 {
        self.retry_multiplier
    }

    /// Fresh backoff state built from the configured retry policy.
    pub fn retry_timer(&self) -> RetryTimer {
        RetryTimer::new(self.retry_base, self.retry_max, self.retry_multiplier)
    }

    pub fn indexing_enabled(&self) -> bool {
        self.indexing_enabled
    }

    /// Cadence of the external trigger that calls `IndexerJob::run`.
    pub fn indexer_interval(&self) -> Duration {
        self.indexer_interval
    }

    /// Number of recent blocks the node indexer keeps records for.
    pub fn index_depth(&self) -> usize {
        self.index_depth
    }

    /// Number of recent blocks the live sync keeps in memory.
    pub fn initial_blocks(&self) -> usize {
        self.initial_blocks
    }

    /// Worker process count; zero runs a single standalone worker.
    pub fn worker_processes(&self) -> usize {
        self.worker_processes
    }

    /// Delay before a dead worker process is replaced.
    pub fn respawn_delay(&self) -> Duration {
        self.respawn_delay
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.rpc_url)?;
        ensure_not_empty(&self.rpc_user, "rpc_user")?;
        ensure_not_empty(&self.rpc_password, "rpc_password")?;

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.retry_base.is_zero() {
            bail!("retry_base must be greater than 0");
        }

        if self.retry_max < self.retry_base {
            bail!(
                "retry_max ({:?}) must be at least retry_base ({:?})",
                self.retry_max,
                self.retry_base
            );
        }

        if self.retry_multiplier == 0 {
            bail!("retry_multiplier must be at least 1");
        }

        if self.indexer_interval.is_zero() {
            bail!("indexer_interval must be greater than 0");
        }

        if self.index_depth == 0 {
            bail!("index_depth must be greater than 0");
        }

        if self.initial_blocks == 0 {
            bail!("initial_blocks must be greater than 0");
        }

        if self.respawn_delay.is_zero() {
            bail!("respawn_delay must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SyncConfigBuilder {
    rpc_url: Option<String>,
    rpc_user: Option<String>,
    rpc_password: Option<String>,
    rpc_timeout: Option<Duration>,
    poll_interval: Option<Duration>,
    retry_base: Option<Duration>,
    retry_max: Option<Duration>,
    retry_multiplier: Option<u32>,
    indexing_enabled: Option<bool>,
    indexer_interval: Option<Duration>,
    index_depth: Option<usize>,
    initial_blocks: Option<usize>,
    worker_processes: Option<usize>,
    respawn_delay: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl SyncConfigBuilder {
    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    pub fn rpc_user(mut self, user: impl Into<String>) -> Self {
        self.rpc_user = Some(user.into());
        self
    }

    pub fn rpc_password(mut self, password: impl Into<String>) -> Self {
        self.rpc_password = Some(password.into());
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn retry_base(mut self, base: Duration) -> Self {
        self.retry_base = Some(base);
        self
    }

    pub fn retry_max(mut self, max: Duration) -> Self {
        self.retry_max = Some(max);
        self
    }

    pub fn retry_multiplier(mut self, multiplier: u32) -> Self {
        self.retry_multiplier = Some(multiplier);
        self
    }

    pub fn indexing_enabled(mut self, enabled: bool) -> Self {
        self.indexing_enabled = Some(enabled);
        self
    }

    pub fn indexer_interval(mut self, interval: Duration) -> Self {
        self.indexer_interval = Some(interval);
        self
    }

    pub fn index_depth(mut self, depth: usize) -> Self {
        self.index_depth = Some(depth);
        self
    }

    pub fn initial_blocks(mut self, blocks: usize) -> Self {
        self.initial_blocks = Some(blocks);
        self
    }

    pub fn worker_processes(mut self, workers: usize) -> Self {
        self.worker_processes = Some(workers);
        self
    }

    pub fn respawn_delay(mut self, delay: Duration) -> Self {
        self.respawn_delay = Some(delay);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<SyncConfig> {
        let params = SyncConfigParams {
            rpc_url: self.rpc_url.context("rpc_url is required")?,
            rpc_user: self.rpc_user.context("rpc_user is required")?,
            rpc_password: self.rpc_password.context("rpc_password is required")?,
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_POLL_RATE_MS)),
            retry_base: self.retry_base.unwrap_or(DEFAULT_RETRY_BASE),
            retry_max: self.retry_max.unwrap_or(DEFAULT_RETRY_MAX),
            retry_multiplier: self.retry_multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER),
            indexing_enabled: self.indexing_enabled.unwrap_or(true),
            indexer_interval: self
                .indexer_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_INDEXER_INTERVAL_SECS)),
            index_depth: self.index_depth.unwrap_or(DEFAULT_INDEX_DEPTH),
            initial_blocks: self.initial_blocks.unwrap_or(DEFAULT_INITIAL_BLOCKS),
            worker_processes: self.worker_processes.unwrap_or(0),
            respawn_delay: self
                .respawn_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RESPAWN_DELAY_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        SyncConfig::new(params)
    }
}

fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

fn read_env_or_default(name: &str, default: &str) -> String {
    env::var(env_key(name)).unwrap_or_else(|_| default.to_string())
}

fn parse_env_with_default<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = env_key(name);
    match env::var(&key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{key} has invalid value {value:?}: {err}")),
        Err(_) => Ok(default),
    }
}

fn parse_flag_with_default(name: &str, default: bool) -> Result<bool> {
    let key = env_key(name);
    match env::var(&key) {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            match normalized.as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => bail!("{key} must be a boolean (true/false), got {value:?}"),
            }
        }
        Err(_) => Ok(default),
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("rpc_url must start with http:// or https://");
    }
    Ok(())
}
