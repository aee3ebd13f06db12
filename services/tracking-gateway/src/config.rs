use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracking_hub::RegistryConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Period between WebSocket pings
    pub heartbeat_interval: Duration,
    /// Unanswered pings before a connection is considered dead
    pub max_missed_pings: u32,
    /// Per-connection outbound queue capacity
    pub queue_capacity: usize,
    /// Time a client has to send its subscription request
    pub handshake_timeout: Duration,
    /// Channels without activity for this long are torn down
    pub channel_idle_ttl: Duration,
    pub sweep_interval: Duration,
    /// Snapshot API burst per tracking number
    pub snapshot_rate_capacity: u32,
    /// Snapshot API tokens restored per second
    pub snapshot_rate_refill: f64,
    /// Shared secret for `/internal/*`; open when unset
    pub internal_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pings: 2,
            queue_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            channel_idle_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
            snapshot_rate_capacity: 60,
            snapshot_rate_refill: 1.0,
            internal_token: None,
        }
    }
}

impl GatewayConfig {
    /// Defaults overridden by `TRACKING_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            host: parse_or(&lookup, "TRACKING_HOST", defaults.host)?,
            port: parse_or(&lookup, "TRACKING_PORT", defaults.port)?,
            heartbeat_interval: secs_or(&lookup, "TRACKING_HEARTBEAT_SECS", defaults.heartbeat_interval)?,
            max_missed_pings: parse_or(&lookup, "TRACKING_MAX_MISSED_PINGS", defaults.max_missed_pings)?,
            queue_capacity: parse_or(&lookup, "TRACKING_QUEUE_CAPACITY", defaults.queue_capacity)?,
            handshake_timeout: secs_or(
                &lookup,
                "TRACKING_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout,
            )?,
            channel_idle_ttl: secs_or(&lookup, "TRACKING_IDLE_TTL_SECS", defaults.channel_idle_ttl)?,
            sweep_interval: secs_or(&lookup, "TRACKING_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            snapshot_rate_capacity: parse_or(
                &lookup,
                "TRACKING_RATE_CAPACITY",
                defaults.snapshot_rate_capacity,
            )?,
            snapshot_rate_refill: parse_or(
                &lookup,
                "TRACKING_RATE_REFILL_PER_SEC",
                defaults.snapshot_rate_refill,
            )?,
            internal_token: lookup("TRACKING_INTERNAL_TOKEN").filter(|token| !token.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("TRACKING_HEARTBEAT_SECS", self.heartbeat_interval.is_zero()),
            ("TRACKING_MAX_MISSED_PINGS", self.max_missed_pings == 0),
            ("TRACKING_QUEUE_CAPACITY", self.queue_capacity == 0),
            ("TRACKING_HANDSHAKE_TIMEOUT_SECS", self.handshake_timeout.is_zero()),
            ("TRACKING_IDLE_TTL_SECS", self.channel_idle_ttl.is_zero()),
            ("TRACKING_SWEEP_INTERVAL_SECS", self.sweep_interval.is_zero()),
            ("TRACKING_RATE_CAPACITY", self.snapshot_rate_capacity == 0),
            ("TRACKING_RATE_REFILL_PER_SEC", self.snapshot_rate_refill <= 0.0),
        ];
        match checks.into_iter().find(|(_, failed)| *failed) {
            Some((var, _)) => Err(ConfigError::Zero { var }),
            None => Ok(()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            queue_capacity: self.queue_capacity,
            idle_ttl: self.channel_idle_ttl,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, var, default.as_secs()).map(Duration::from_secs)
}
