//! Relay loopback tester for a BACnet MS/TP device.
//!
//! Finds a device on the bus, toggles its Binary Output 1 and checks that
//! Binary Input 1 follows. Configured through the `BACNET_*` environment
//! variables; `RUST_LOG` controls diagnostics.

use std::process::ExitCode;

use bacnet_mstp_loopback::client::{locator, loopback, Client, LoopbackError};
use bacnet_mstp_loopback::config::{ClientConfig, Environment, LoopbackConfig};
use bacnet_mstp_loopback::datalink::{env, MstpDataLink};

fn run() -> Result<(), LoopbackError> {
    let environment = Environment::from_process();
    let mstp = env::mstp_config(&environment)?;
    let client_config = ClientConfig::from_environment(&environment)?;
    let config = LoopbackConfig::default();

    let link = MstpDataLink::open(mstp)?;
    let mut client = Client::new(link, client_config);

    let device = locator::locate_device(&mut client, &config)?;
    println!("Located and bound to ID {}", device.device_id);

    println!("Setting and clearing relay and checking loopback.");
    loopback::run_loopback(&mut client, &config)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}", e);
            ExitCode::FAILURE
        }
    }
}
