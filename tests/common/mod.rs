//! Simulated BACnet device on the far side of a [`DataLink`].
//!
//! The device answers synchronously: whatever the client sends is handled
//! inside `send_frame` and the answers wait in an outbox until the next
//! `receive_frame`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use bacnet_mstp_loopback::app::Apdu;
use bacnet_mstp_loopback::client::Client;
use bacnet_mstp_loopback::config::{ClientConfig, LoopbackConfig};
use bacnet_mstp_loopback::datalink::{self, DataLink, DataLinkAddress};
use bacnet_mstp_loopback::network::Npdu;
use bacnet_mstp_loopback::object::{ObjectIdentifier, ObjectType, PropertyValue, Segmentation};
use bacnet_mstp_loopback::service::{
    IAmRequest, ReadPropertyAck, ReadPropertyRequest, WhoIsRequest, WritePropertyRequest,
};

pub const DEVICE_ID: u32 = 1234;
pub const DEVICE_STATION: u8 = 12;
pub const CLIENT_STATION: u8 = 127;

/// How the simulated device misbehaves
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Never answer anything
    pub silent: bool,
    /// Who-Is broadcasts ignored before the first I-Am
    pub ignore_who_is: usize,
    /// Swallow WriteProperty requests
    pub no_write_ack: bool,
    /// Answer WriteProperty with an Error PDU
    pub write_error: bool,
    /// Swallow ReadProperty requests
    pub no_read_ack: bool,
    /// Input stuck at this value regardless of the relay
    pub stuck_input: Option<u32>,
    /// Confirmed requests lost on the wire before the device hears one
    pub lose_requests: usize,
}

/// What the device saw
#[derive(Debug, Default)]
pub struct Log {
    pub who_is: usize,
    pub writes: Vec<WritePropertyRequest>,
    pub reads: Vec<ReadPropertyRequest>,
    pub invoke_ids: Vec<u8>,
    pub lost: usize,
}

#[derive(Debug)]
pub struct SimulatedDevice {
    pub device_id: u32,
    pub station: u8,
    pub behavior: Behavior,
    pub log: Log,
    relay: u32,
    outbox: VecDeque<Vec<u8>>,
}

impl SimulatedDevice {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            device_id: DEVICE_ID,
            station: DEVICE_STATION,
            behavior,
            log: Log::default(),
            relay: 0,
            outbox: VecDeque::new(),
        }
    }

    /// Queue an unsolicited I-Am
    pub fn announce(&mut self) {
        let pdu = self.i_am();
        self.outbox.push_back(pdu);
    }

    fn i_am(&self) -> Vec<u8> {
        let mut data = Vec::new();
        IAmRequest::new(
            ObjectIdentifier::new(ObjectType::Device, self.device_id),
            480,
            Segmentation::NoSegmentation,
            42,
        )
        .encode(&mut data)
        .unwrap();
        npdu(Apdu::UnconfirmedRequest {
            service_choice: 0,
            service_data: data,
        })
    }

    fn handle(&mut self, pdu: &[u8]) {
        let (_, offset) = Npdu::decode(pdu).unwrap();
        let apdu = Apdu::decode(&pdu[offset..]).unwrap();
        let confirmed = matches!(apdu, Apdu::ConfirmedRequest { .. });
        if confirmed && self.log.lost < self.behavior.lose_requests {
            self.log.lost += 1;
            return;
        }
        match apdu {
            Apdu::UnconfirmedRequest {
                service_choice: 8,
                service_data,
            } => {
                self.log.who_is += 1;
                let who_is = WhoIsRequest::decode(&service_data).unwrap();
                if self.log.who_is > self.behavior.ignore_who_is && who_is.matches(self.device_id) {
                    self.announce();
                }
            }
            Apdu::ConfirmedRequest {
                invoke_id,
                service_choice: 15,
                service_data,
                ..
            } => {
                self.log.invoke_ids.push(invoke_id);
                let request = WritePropertyRequest::decode(&service_data).unwrap();
                if let Some(value) = request.property_value.as_u32() {
                    self.relay = value;
                }
                self.log.writes.push(request);
                if self.behavior.write_error {
                    self.outbox.push_back(npdu(Apdu::Error {
                        invoke_id,
                        service_choice: 15,
                        error_class: 2,
                        error_code: 40,
                    }));
                } else if !self.behavior.no_write_ack {
                    self.outbox.push_back(npdu(Apdu::SimpleAck {
                        invoke_id,
                        service_choice: 15,
                    }));
                }
            }
            Apdu::ConfirmedRequest {
                invoke_id,
                service_choice: 12,
                service_data,
                ..
            } => {
                self.log.invoke_ids.push(invoke_id);
                let request = ReadPropertyRequest::decode(&service_data).unwrap();
                let input = self.behavior.stuck_input.unwrap_or(self.relay);
                let ack = ReadPropertyAck::new(
                    request.object_identifier,
                    request.property_identifier,
                    None,
                    PropertyValue::Enumerated(input),
                );
                self.log.reads.push(request);
                if !self.behavior.no_read_ack {
                    let mut data = Vec::new();
                    ack.encode(&mut data).unwrap();
                    self.outbox.push_back(npdu(Apdu::ComplexAck {
                        segmented: false,
                        more_follows: false,
                        invoke_id,
                        sequence_number: None,
                        proposed_window_size: None,
                        service_choice: 12,
                        service_data: data,
                    }));
                }
            }
            _ => {}
        }
    }
}

impl DataLink for SimulatedDevice {
    fn send_frame(
        &mut self,
        frame: &[u8],
        dest: &DataLinkAddress,
        _expecting_reply: bool,
    ) -> datalink::Result<()> {
        let for_us = dest.is_broadcast() || dest.mstp_station() == self.station;
        if for_us && !self.behavior.silent {
            self.handle(frame);
        }
        Ok(())
    }

    fn receive_frame(
        &mut self,
        buffer: &mut [u8],
        _timeout: Duration,
    ) -> datalink::Result<Option<(usize, DataLinkAddress)>> {
        Ok(self.outbox.pop_front().map(|pdu| {
            buffer[..pdu.len()].copy_from_slice(&pdu);
            (pdu.len(), DataLinkAddress::MsTP(self.station))
        }))
    }

    fn local_address(&self) -> DataLinkAddress {
        DataLinkAddress::MsTP(CLIENT_STATION)
    }
}

pub fn npdu(apdu: Apdu) -> Vec<u8> {
    let mut pdu = Npdu::application(false, None).encode();
    pdu.extend(apdu.encode());
    pdu
}

/// Short timeouts so failing paths finish quickly
pub fn client_config() -> ClientConfig {
    ClientConfig {
        apdu_timeout: Duration::from_millis(40),
        apdu_retries: 1,
        poll_interval: Duration::from_millis(1),
        receive_timeout: Duration::from_millis(1),
        ..ClientConfig::default()
    }
}

pub fn loopback_config() -> LoopbackConfig {
    LoopbackConfig {
        settle_delay: Duration::ZERO,
        ..LoopbackConfig::default()
    }
}

pub fn client(behavior: Behavior) -> Client<SimulatedDevice> {
    Client::new(SimulatedDevice::new(behavior), client_config())
}
