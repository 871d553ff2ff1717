//! Configuration
//!
//! The program is configured only through environment variables, read through
//! [`Environment`] so tests can supply their own values instead of touching
//! the process environment. [`ClientConfig`] and [`LoopbackConfig`] carry
//! the defaults for everything that has no variable.

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::app::tsm::{DEFAULT_APDU_RETRIES, DEFAULT_APDU_TIMEOUT};

/// APDU timeout in milliseconds
pub const ENV_APDU_TIMEOUT: &str = "BACNET_APDU_TIMEOUT";
/// Number of APDU retries
pub const ENV_APDU_RETRIES: &str = "BACNET_APDU_RETRIES";

/// Result type for configuration
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while building the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but does not parse
    InvalidValue { key: String, value: String },
    /// Values parse but do not make a usable configuration
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value {:?} for {}", value, key)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for ConfigError {}

/// Source of configuration variables
pub struct Environment {
    lookup: Box<dyn Fn(&str) -> Option<String>>,
}

impl Environment {
    /// Read the process environment
    pub fn from_process() -> Self {
        Self::with_lookup(|key| std::env::var(key).ok())
    }

    /// Read variables through any lookup function
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Fixed set of variables
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let owned: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::with_lookup(move |key| {
            owned
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
    }

    /// Raw value; empty strings count as unset
    pub fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parse `key`, falling back to `default` when it is unset
    pub fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment").finish_non_exhaustive()
    }
}

/// Client session settings
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Wait for a confirmation before the TSM retransmits; also the poll loop budget
    pub apdu_timeout: Duration,
    pub apdu_retries: u8,
    /// Sleep between poll loop iterations
    pub poll_interval: Duration,
    /// Budget of one receive call
    pub receive_timeout: Duration,
    /// Instance of the Device object this program presents
    pub device_instance: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            apdu_timeout: DEFAULT_APDU_TIMEOUT,
            apdu_retries: DEFAULT_APDU_RETRIES,
            poll_interval: Duration::from_millis(1),
            receive_timeout: Duration::from_millis(100),
            device_instance: crate::BACNET_MAX_INSTANCE,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `BACNET_APDU_TIMEOUT` and `BACNET_APDU_RETRIES`
    pub fn from_environment(env: &Environment) -> Result<Self> {
        let defaults = Self::default();
        let timeout_ms: u64 =
            env.parse_or(ENV_APDU_TIMEOUT, defaults.apdu_timeout.as_millis() as u64)?;
        if timeout_ms == 0 {
            return Err(ConfigError::Invalid(format!(
                "{} must be greater than zero",
                ENV_APDU_TIMEOUT
            )));
        }
        let apdu_retries = env.parse_or(ENV_APDU_RETRIES, defaults.apdu_retries)?;

        Ok(Self {
            apdu_timeout: Duration::from_millis(timeout_ms),
            apdu_retries,
            ..defaults
        })
    }
}

/// What the loopback check talks to and how patiently
#[derive(Debug, Clone, PartialEq)]
pub struct LoopbackConfig {
    /// Who-Is rounds before giving up
    pub discovery_attempts: u32,
    /// Wait between writing the relay and reading the input
    pub settle_delay: Duration,
    /// Binary Output driving the relay
    pub output_instance: u32,
    /// Binary Input wired to the relay contacts
    pub input_instance: u32,
    /// Only bind this device; any device answers when unset
    pub target_device: Option<u32>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            discovery_attempts: 5,
            settle_delay: Duration::from_secs(1),
            output_instance: 1,
            input_instance: 1,
            target_device: None,
        }
    }
}
