//! Relay loopback check.
//!
//! The device under test has its Binary Output 1 relay wired back to its
//! Binary Input 1. [`Sequencer`] drives the relay to 0 and then to 1, waits
//! for the contacts to settle and reads the input back each time.

use std::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use super::{Awaiting, Client, Event, PollOutcome, Result};
use crate::config::{ConfigError, LoopbackConfig};
use crate::datalink::{DataLink, DataLinkError};
use crate::encoding::EncodingError;
use crate::object::{ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue};

/// Values written to the relay, in order
pub const LOOPBACK_VALUES: [u32; 2] = [0, 1];

/// Everything that ends the program with a failure.
///
/// The messages are the lines printed to the user.
#[derive(Debug, Error)]
pub enum LoopbackError {
    #[error("Failed to locate a device on the network!")]
    DeviceNotFound,
    #[error("Failed to toggle relay!")]
    WriteFailed,
    #[error("Failed to read input!")]
    ReadFailed,
    #[error("ERROR! Input was not {expected}")]
    ValueMismatch { expected: u32, actual: Option<u32> },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Data link error: {0}")]
    DataLink(#[from] DataLinkError),
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
    #[error("No free invoke ID")]
    NoFreeInvokeId,
    #[error("Device {0} is not bound")]
    NotBound(u32),
    #[error("Request of {size} bytes exceeds the device limit of {max}")]
    ApduTooLarge { size: usize, max: u32 },
}

/// Progress through one write/read iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    WriteSent,
    WriteAcked,
    Settling,
    ReadSent,
    ReadAcked,
    ValueChecked,
    Failed,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Idle => "IDLE",
            Step::WriteSent => "WRITE_SENT",
            Step::WriteAcked => "WRITE_ACKED",
            Step::Settling => "SETTLING",
            Step::ReadSent => "READ_SENT",
            Step::ReadAcked => "READ_ACKED",
            Step::ValueChecked => "VALUE_CHECKED",
            Step::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Drives the write, settle, read and compare cycle
#[derive(Debug)]
pub struct Sequencer {
    config: LoopbackConfig,
    step: Step,
    /// Iterations that reached [`Step::ValueChecked`]
    passed: usize,
}

impl Sequencer {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            config,
            step: Step::Idle,
            passed: 0,
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn passed(&self) -> usize {
        self.passed
    }

    fn advance(&mut self, step: Step) {
        debug!("Loopback {} -> {}", self.step, step);
        self.step = step;
    }

    /// Run every iteration against the bound device
    pub fn run<D: DataLink>(&mut self, client: &mut Client<D>) -> Result<()> {
        for expected in LOOPBACK_VALUES {
            self.step = Step::Idle;
            if let Err(e) = self.iteration(client, expected) {
                self.advance(Step::Failed);
                return Err(e);
            }
            self.passed += 1;
        }
        Ok(())
    }

    fn iteration<D: DataLink>(&mut self, client: &mut Client<D>, expected: u32) -> Result<()> {
        let device_id = client
            .device()
            .map(|d| d.device_id)
            .ok_or(LoopbackError::DeviceNotFound)?;

        let output = ObjectIdentifier::new(ObjectType::BinaryOutput, self.config.output_instance);
        let invoke_id = client.send_write_property(
            device_id,
            output,
            PropertyIdentifier::PresentValue,
            PropertyValue::Enumerated(expected),
            None,
        )?;
        self.advance(Step::WriteSent);
        await_answer(client, invoke_id, Awaiting::WriteAck, LoopbackError::WriteFailed)?;
        self.advance(Step::WriteAcked);

        self.advance(Step::Settling);
        client.idle(self.config.settle_delay)?;

        let input = ObjectIdentifier::new(ObjectType::BinaryInput, self.config.input_instance);
        let invoke_id =
            client.send_read_property(device_id, input, PropertyIdentifier::PresentValue, None)?;
        self.advance(Step::ReadSent);
        await_answer(client, invoke_id, Awaiting::ReadAck, LoopbackError::ReadFailed)?;
        self.advance(Step::ReadAcked);

        let actual = client
            .device()
            .and_then(|d| d.last_value.as_ref())
            .and_then(PropertyValue::as_u32);
        if actual != Some(expected) {
            return Err(LoopbackError::ValueMismatch { expected, actual });
        }
        info!("Input reads {} as expected", expected);
        self.advance(Step::ValueChecked);
        Ok(())
    }
}

/// Poll for the answer to `invoke_id`.
///
/// A failure answer ends the request at once. A timeout only counts when
/// the request is still outstanding; its slot is released before failing.
fn await_answer<D: DataLink>(
    client: &mut Client<D>,
    invoke_id: u8,
    awaiting: Awaiting,
    failure: LoopbackError,
) -> Result<()> {
    match client.handler_loop(awaiting)? {
        PollOutcome::Completed(Event::Failed { .. }) => {
            client.free_invoke_id(invoke_id);
            Err(failure)
        }
        PollOutcome::Completed(_) => Ok(()),
        PollOutcome::TimedOut if !client.invoke_id_free(invoke_id) => {
            if client.invoke_id_failed(invoke_id) {
                warn!("Invoke ID {} ran out of retries", invoke_id);
            }
            client.free_invoke_id(invoke_id);
            Err(failure)
        }
        PollOutcome::TimedOut => Ok(()),
    }
}

/// Run the loopback check with a fresh [`Sequencer`]
pub fn run_loopback<D: DataLink>(client: &mut Client<D>, config: &LoopbackConfig) -> Result<()> {
    Sequencer::new(config.clone()).run(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            LoopbackError::DeviceNotFound.to_string(),
            "Failed to locate a device on the network!"
        );
        assert_eq!(LoopbackError::WriteFailed.to_string(), "Failed to toggle relay!");
        assert_eq!(LoopbackError::ReadFailed.to_string(), "Failed to read input!");
        assert_eq!(
            LoopbackError::ValueMismatch { expected: 1, actual: Some(0) }.to_string(),
            "ERROR! Input was not 1"
        );
    }

    #[test]
    fn test_lower_layer_errors_convert() {
        let err: LoopbackError = DataLinkError::CrcError.into();
        assert!(matches!(err, LoopbackError::DataLink(_)));
        let err: LoopbackError = ConfigError::Invalid("x".into()).into();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn test_step_names() {
        assert_eq!(Step::default(), Step::Idle);
        assert_eq!(Step::WriteAcked.to_string(), "WRITE_ACKED");
        assert_eq!(Sequencer::new(LoopbackConfig::default()).step(), Step::Idle);
    }
}
