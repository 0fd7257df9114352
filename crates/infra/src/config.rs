//! Commander configuration.

use std::time::Duration;

use thiserror::Error;

pub const COMMAND_STREAM_VAR: &str = "COMMANDER_COMMAND_STREAM";
pub const EVENT_STREAM_VAR: &str = "COMMANDER_EVENT_STREAM";
pub const CONSUMER_GROUP_VAR: &str = "COMMANDER_CONSUMER_GROUP";
pub const TIMEOUT_MS_VAR: &str = "COMMANDER_TIMEOUT_MS";
pub const EXTRA_STREAMS_VAR: &str = "COMMANDER_EXTRA_STREAMS";
pub const DELIVERY_CAPACITY_VAR: &str = "COMMANDER_DELIVERY_CAPACITY";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

/// Commander configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommanderConfig {
    /// Stream commands are produced on and consumed from.
    pub command_stream: String,
    /// Stream events are produced on and consumed from.
    pub event_stream: String,
    /// Consumer group of the single physical consumer.
    pub consumer_group: String,
    /// Default wait for `sync_command`.
    pub timeout: Duration,
    /// Additional streams consumed alongside commands and events.
    pub extra_streams: Vec<String>,
    /// Buffered deliveries per subscription.
    pub delivery_capacity: usize,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            command_stream: "commands".to_string(),
            event_stream: "events".to_string(),
            consumer_group: "commander".to_string(),
            timeout: Duration::from_secs(5),
            extra_streams: Vec::new(),
            delivery_capacity: 64,
        }
    }
}

impl CommanderConfig {
    pub fn with_command_stream(mut self, stream: impl Into<String>) -> Self {
        self.command_stream = stream.into();
        self
    }

    pub fn with_event_stream(mut self, stream: impl Into<String>) -> Self {
        self.event_stream = stream.into();
        self
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_extra_stream(mut self, stream: impl Into<String>) -> Self {
        self.extra_streams.push(stream.into());
        self
    }

    pub fn with_delivery_capacity(mut self, capacity: usize) -> Self {
        self.delivery_capacity = capacity;
        self
    }

    /// Every stream the physical consumer joins, without duplicates.
    pub fn streams(&self) -> Vec<String> {
        let mut streams = vec![self.command_stream.clone(), self.event_stream.clone()];
        for extra in &self.extra_streams {
            if !streams.contains(extra) {
                streams.push(extra.clone());
            }
        }
        streams
    }

    /// Read overrides from `COMMANDER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read overrides through `lookup`; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup(COMMAND_STREAM_VAR) {
            config.command_stream = non_empty(COMMAND_STREAM_VAR, v)?;
        }
        if let Some(v) = lookup(EVENT_STREAM_VAR) {
            config.event_stream = non_empty(EVENT_STREAM_VAR, v)?;
        }
        if let Some(v) = lookup(CONSUMER_GROUP_VAR) {
            config.consumer_group = non_empty(CONSUMER_GROUP_VAR, v)?;
        }
        if let Some(v) = lookup(TIMEOUT_MS_VAR) {
            let ms = parse_number::<u64>(TIMEOUT_MS_VAR, &v)?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup(EXTRA_STREAMS_VAR) {
            config.extra_streams = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup(DELIVERY_CAPACITY_VAR) {
            let capacity = parse_number::<usize>(DELIVERY_CAPACITY_VAR, &v)?;
            if capacity == 0 {
                return Err(ConfigError::InvalidValue {
                    var: DELIVERY_CAPACITY_VAR,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.delivery_capacity = capacity;
        }

        Ok(config)
    }
}

fn non_empty(var: &'static str, value: String) -> Result<String, ConfigError> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ConfigError::Empty(var));
    }
    Ok(value)
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: core::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        var,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = CommanderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CommanderConfig::default());
    }

    #[test]
    fn overrides_are_read() {
        let config = CommanderConfig::from_lookup(lookup(&[
            (COMMAND_STREAM_VAR, "orders.commands"),
            (EVENT_STREAM_VAR, "orders.events"),
            (TIMEOUT_MS_VAR, "250"),
            (EXTRA_STREAMS_VAR, "audit, ,metrics"),
            (DELIVERY_CAPACITY_VAR, "8"),
        ]))
        .unwrap();

        assert_eq!(config.command_stream, "orders.commands");
        assert_eq!(config.event_stream, "orders.events");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.extra_streams, vec!["audit", "metrics"]);
        assert_eq!(config.delivery_capacity, 8);
    }

    #[test]
    fn malformed_timeout_is_rejected() {
        let err = CommanderConfig::from_lookup(lookup(&[(TIMEOUT_MS_VAR, "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: TIMEOUT_MS_VAR, .. }));
    }

    #[test]
    fn empty_stream_is_rejected() {
        let err = CommanderConfig::from_lookup(lookup(&[(EVENT_STREAM_VAR, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Empty(EVENT_STREAM_VAR));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(CommanderConfig::from_lookup(lookup(&[(DELIVERY_CAPACITY_VAR, "0")])).is_err());
    }

    #[test]
    fn streams_are_deduplicated() {
        let config = CommanderConfig::default()
            .with_extra_stream("audit")
            .with_extra_stream("events");
        assert_eq!(config.streams(), vec!["commands", "events", "audit"]);
    }
}
