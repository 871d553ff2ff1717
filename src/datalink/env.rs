//! MS/TP settings from the environment.
//!
//! | Variable                 | Default        |
//! |--------------------------|----------------|
//! | `BACNET_IFACE`           | `/dev/ttyUSB0` |
//! | `BACNET_MSTP_BAUD`       | 38400          |
//! | `BACNET_MSTP_MAC`        | 127            |
//! | `BACNET_MAX_MASTER`      | 127            |
//! | `BACNET_MAX_INFO_FRAMES` | 1              |

use crate::config::{ConfigError, Environment, Result};
use crate::datalink::mstp::MstpConfig;

pub const ENV_IFACE: &str = "BACNET_IFACE";
pub const ENV_MSTP_BAUD: &str = "BACNET_MSTP_BAUD";
pub const ENV_MSTP_MAC: &str = "BACNET_MSTP_MAC";
pub const ENV_MAX_MASTER: &str = "BACNET_MAX_MASTER";
pub const ENV_MAX_INFO_FRAMES: &str = "BACNET_MAX_INFO_FRAMES";

/// Build and validate the MS/TP configuration
pub fn mstp_config(env: &Environment) -> Result<MstpConfig> {
    let defaults = MstpConfig::default();
    let config = MstpConfig {
        port: env.get(ENV_IFACE).unwrap_or_else(|| defaults.port.clone()),
        baud_rate: env.parse_or(ENV_MSTP_BAUD, defaults.baud_rate)?,
        station_address: env.parse_or(ENV_MSTP_MAC, defaults.station_address)?,
        max_master: env.parse_or(ENV_MAX_MASTER, defaults.max_master)?,
        max_info_frames: env.parse_or(ENV_MAX_INFO_FRAMES, defaults.max_info_frames)?,
        ..defaults
    };

    config
        .validate()
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(config)
}
