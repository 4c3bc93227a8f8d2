//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges on the defaults and
//! on every per-key override after it has been merged onto the defaults.
//! All violations are collected rather than stopping at the first one.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{
    CollapserProperties, CommandProperties, EngineConfig, PoolProperties,
};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{scope}.{field}: {reason}")]
pub struct ValidationError {
    /// Table the value was resolved for, e.g. `commands.findUserById`.
    pub scope: String,
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(scope: &str, field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            scope: scope.to_string(),
            field,
            reason: reason.into(),
        }
    }
}

/// Validate a configuration, returning every error found.
pub fn validate_config(config: &EngineConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_command("defaults.command", &config.defaults.command, &mut errors);
    check_pool("defaults.pool", &config.defaults.pool, &mut errors);
    check_collapser("defaults.collapser", &config.defaults.collapser, &mut errors);

    for key in config.commands.keys() {
        check_command(&format!("commands.{key}"), &config.command(key), &mut errors);
    }
    for key in config.pools.keys() {
        check_pool(&format!("pools.{key}"), &config.pool(key), &mut errors);
    }
    for key in config.collapsers.keys() {
        check_collapser(&format!("collapsers.{key}"), &config.collapser(key), &mut errors);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability",
            "metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin",
                "bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin", "api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_command(scope: &str, props: &CommandProperties, errors: &mut Vec<ValidationError>) {
    if props.execution_timeout_enabled && props.timeout_ms == 0 {
        errors.push(ValidationError::new(scope, "timeout_ms", "must be greater than 0"));
    }
    if props.error_threshold_percentage > 100 {
        errors.push(ValidationError::new(
            scope,
            "error_threshold_percentage",
            format!("{} is not a percentage", props.error_threshold_percentage),
        ));
    }
    if props.rolling_buckets == 0 {
        errors.push(ValidationError::new(scope, "rolling_buckets", "must be greater than 0"));
    } else if props.rolling_window_ms == 0
        || props.rolling_window_ms % u64::from(props.rolling_buckets) != 0
    {
        errors.push(ValidationError::new(
            scope,
            "rolling_window_ms",
            format!(
                "{} must be a positive multiple of rolling_buckets ({})",
                props.rolling_window_ms, props.rolling_buckets
            ),
        ));
    }
}

fn check_pool(scope: &str, props: &PoolProperties, errors: &mut Vec<ValidationError>) {
    if props.size == 0 {
        errors.push(ValidationError::new(scope, "size", "must be greater than 0"));
    }
}

fn check_collapser(scope: &str, props: &CollapserProperties, errors: &mut Vec<ValidationError>) {
    if props.max_batch_size == Some(0) {
        errors.push(ValidationError::new(scope, "max_batch_size", "must be greater than 0"));
    }
}
