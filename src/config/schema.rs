//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the engine.
//! All types derive Serde traits for deserialization from config files.
//!
//! Per-key tables (`commands.<key>`, `pools.<key>`, `collapsers.<key>`) only
//! carry the fields they override; everything else comes from `defaults`.
//! Property tables reject unknown keys so a misspelled option fails to load.
//! A pool's capacity is `size`, also accepted as `isolation_pool_size`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the execution engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Properties applied to every key unless overridden.
    pub defaults: DefaultsConfig,

    /// Per-command overrides keyed by command key.
    pub commands: HashMap<String, CommandOverrides>,

    /// Per-pool overrides keyed by pool key.
    pub pools: HashMap<String, PoolOverrides>,

    /// Per-collapser overrides keyed by collapser key.
    pub collapsers: HashMap<String, CollapserOverrides>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl EngineConfig {
    /// Resolve the effective command properties for `key`.
    pub fn command(&self, key: &str) -> CommandProperties {
        let mut props = self.defaults.command.clone();
        if let Some(overrides) = self.commands.get(key) {
            overrides.apply(&mut props);
        }
        props
    }

    /// Resolve the effective pool properties for `key`.
    pub fn pool(&self, key: &str) -> PoolProperties {
        let mut props = self.defaults.pool.clone();
        if let Some(overrides) = self.pools.get(key) {
            overrides.apply(&mut props);
        }
        props
    }

    /// Resolve the effective collapser properties for `key`.
    pub fn collapser(&self, key: &str) -> CollapserProperties {
        let mut props = self.defaults.collapser.clone();
        if let Some(overrides) = self.collapsers.get(key) {
            overrides.apply(&mut props);
        }
        props
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultsConfig {
    pub command: CommandProperties,
    pub pool: PoolProperties,
    pub collapser: CollapserProperties,
}

/// How a command's invocation is isolated from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStrategy {
    /// Invoke on the caller's task; the slot is released with the outcome.
    Semaphore,
    /// Invoke on a spawned task that owns the slot until the call finishes.
    #[default]
    Worker,
}

/// Properties governing a single command key.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommandProperties {
    /// Deadline for one invocation in milliseconds.
    pub timeout_ms: u64,

    /// Disable to let invocations run without a deadline.
    pub execution_timeout_enabled: bool,

    /// Isolation strategy used when acquiring a pool slot.
    pub isolation_strategy: IsolationStrategy,

    /// Error percentage (0-100) at or above which the circuit opens.
    pub error_threshold_percentage: u8,

    /// Minimum number of requests in the rolling window before the
    /// error percentage is considered.
    pub request_volume_threshold: u64,

    /// How long the circuit stays open before a probe is allowed.
    pub sleep_window_ms: u64,

    /// Disable to never short-circuit (outcomes are still recorded).
    pub circuit_breaker_enabled: bool,

    /// Short-circuit every call.
    pub force_open: bool,

    /// Let every call through regardless of health. `force_open` wins.
    pub force_closed: bool,

    /// Rolling statistical window length in milliseconds.
    pub rolling_window_ms: u64,

    /// Number of buckets the rolling window is divided into.
    pub rolling_buckets: u32,

    /// Disable to surface failures even when a fallback is configured.
    pub fallback_enabled: bool,

    /// Disable to bypass the request-scoped result cache.
    pub request_cache_enabled: bool,
}

impl Default for CommandProperties {
    fn default() -> Self {
        Self {
            timeout_ms: 1_000,
            execution_timeout_enabled: true,
            isolation_strategy: IsolationStrategy::Worker,
            error_threshold_percentage: 50,
            request_volume_threshold: 20,
            sleep_window_ms: 5_000,
            circuit_breaker_enabled: true,
            force_open: false,
            force_closed: false,
            rolling_window_ms: 10_000,
            rolling_buckets: 10,
            fallback_enabled: true,
            request_cache_enabled: true,
        }
    }
}

/// Per-key overrides for [`CommandProperties`].
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommandOverrides {
    pub timeout_ms: Option<u64>,
    pub execution_timeout_enabled: Option<bool>,
    pub isolation_strategy: Option<IsolationStrategy>,
    pub error_threshold_percentage: Option<u8>,
    pub request_volume_threshold: Option<u64>,
    pub sleep_window_ms: Option<u64>,
    pub circuit_breaker_enabled: Option<bool>,
    pub force_open: Option<bool>,
    pub force_closed: Option<bool>,
    pub rolling_window_ms: Option<u64>,
    pub rolling_buckets: Option<u32>,
    pub fallback_enabled: Option<bool>,
    pub request_cache_enabled: Option<bool>,
}

impl CommandOverrides {
    pub fn apply(&self, props: &mut CommandProperties) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { props.$field = value; })*
            };
        }
        set!(
            timeout_ms,
            execution_timeout_enabled,
            isolation_strategy,
            error_threshold_percentage,
            request_volume_threshold,
            sleep_window_ms,
            circuit_breaker_enabled,
            force_open,
            force_closed,
            rolling_window_ms,
            rolling_buckets,
            fallback_enabled,
            request_cache_enabled,
        );
    }
}

/// Properties of an isolation pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolProperties {
    /// Maximum concurrent invocations admitted by the pool.
    #[serde(alias = "isolation_pool_size")]
    pub size: usize,
}

impl Default for PoolProperties {
    fn default() -> Self {
        Self { size: 10 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOverrides {
    #[serde(alias = "isolation_pool_size")]
    pub size: Option<usize>,
}

impl PoolOverrides {
    pub fn apply(&self, props: &mut PoolProperties) {
        if let Some(size) = self.size {
            props.size = size;
        }
    }
}

/// Properties of a request collapser.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CollapserProperties {
    /// Time a batch window stays open after its first request.
    pub collapsing_delay_ms: u64,

    /// Flush as soon as this many requests are pending (unbounded if unset).
    pub max_batch_size: Option<usize>,
}

impl Default for CollapserProperties {
    fn default() -> Self {
        Self {
            collapsing_delay_ms: 10,
            max_batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CollapserOverrides {
    pub collapsing_delay_ms: Option<u64>,
    pub max_batch_size: Option<usize>,
}

impl CollapserOverrides {
    pub fn apply(&self, props: &mut CollapserProperties) {
        if let Some(delay) = self.collapsing_delay_ms {
            props.collapsing_delay_ms = delay;
        }
        if self.max_batch_size.is_some() {
            props.max_batch_size = self.max_batch_size;
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the pretty format.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,

    /// Interval between snapshot events on `/admin/stream`.
    pub stream_interval_ms: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
            stream_interval_ms: 500,
        }
    }
}
