//! Device discovery.
//!
//! Broadcast Who-Is until a device answers with an I-Am and can be bound, or
//! the configured number of rounds has passed without one.

use log::{debug, info};

use super::{Awaiting, Client, DeviceInfo, LoopbackError, PollOutcome, Result};
use crate::config::LoopbackConfig;
use crate::datalink::DataLink;

/// Find and bind the device the loopback check will talk to
pub fn locate_device<D: DataLink>(
    client: &mut Client<D>,
    config: &LoopbackConfig,
) -> Result<DeviceInfo> {
    client.session_mut().set_target(config.target_device);

    let mut failed_rounds = 0;
    loop {
        if let Some(device) = client.session_mut().bind_device() {
            info!("Bound device {} at {}", device.device_id, device.address);
            return Ok(device.clone());
        }

        if failed_rounds >= config.discovery_attempts {
            return Err(LoopbackError::DeviceNotFound);
        }

        client.send_who_is(config.target_device)?;
        match client.handler_loop(Awaiting::IAm)? {
            PollOutcome::Completed(_) => {}
            PollOutcome::TimedOut => {
                failed_rounds += 1;
                debug!("No I-Am after {} Who-Is round(s)", failed_rounds);
            }
        }
    }
}
