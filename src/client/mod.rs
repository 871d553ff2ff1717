//! BACnet Client
//!
//! The glue between the protocol layers and the loopback program. A
//! [`Client`] owns the data link, the receive buffer and a [`Session`]; the
//! session holds everything the protocol handlers need to remember between
//! frames: the bound device, the invoke ID of the request in flight, the
//! transaction state machine, the address table and the local Device object.
//!
//! Received NPDUs go through [`Session::dispatch`], which never performs I/O.
//! It returns a [`Dispatch`] holding a typed [`Event`] for the poll loop and,
//! when a peer asked us something, the reply to send back.
//!
//! # Example
//!
//! ```no_run
//! use bacnet_mstp_loopback::client::{locator, loopback, Client};
//! use bacnet_mstp_loopback::config::{ClientConfig, LoopbackConfig};
//! use bacnet_mstp_loopback::datalink::{MstpConfig, MstpDataLink};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let link = MstpDataLink::open(MstpConfig::default())?;
//! let mut client = Client::new(link, ClientConfig::default());
//! let config = LoopbackConfig::default();
//!
//! let device = locator::locate_device(&mut client, &config)?;
//! println!("Located and bound to ID {}", device.device_id);
//! loopback::run_loopback(&mut client, &config)?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::app::{Apdu, MaxApduSize, TransactionManager};
use crate::config::ClientConfig;
use crate::datalink::{DataLink, DataLinkAddress};
use crate::encoding::EncodingError;
use crate::network::Npdu;
use crate::object::{
    DeviceObject, DeviceObjectConfig, ObjectIdentifier, PropertyIdentifier, PropertyValue,
    Segmentation,
};
use crate::service::{
    error_for_object, AbortReason, ConfirmedServiceChoice, ErrorClass, ErrorCode, IAmRequest,
    ReadPropertyAck, ReadPropertyRequest, RejectReason, UnconfirmedServiceChoice, WhoIsRequest,
    WritePropertyRequest,
};

pub mod address;
pub mod locator;
pub mod loopback;

pub use address::{AddressBinding, AddressTable, BacnetAddress};
pub use loopback::{LoopbackError, Sequencer, Step};

/// Result type for client operations
pub type Result<T> = std::result::Result<T, LoopbackError>;

/// The device the program is bound to
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub address: BacnetAddress,
    /// Largest APDU the device accepts
    pub max_apdu: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
    /// Value returned by the last successful ReadProperty
    pub last_value: Option<PropertyValue>,
    /// Address learned from an I-Am rather than configured
    pub dynamic: bool,
}

impl From<AddressBinding> for DeviceInfo {
    fn from(binding: AddressBinding) -> Self {
        Self {
            device_id: binding.device_id,
            address: binding.address,
            max_apdu: binding.max_apdu,
            segmentation: binding.segmentation,
            vendor_id: binding.vendor_id,
            last_value: None,
            dynamic: true,
        }
    }
}

/// Why an outstanding request ended without the answer it asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Error { class: ErrorClass, code: ErrorCode },
    Reject(RejectReason),
    Abort(AbortReason),
    InvalidResponse(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Error { class, code } => write!(f, "error {} / {}", class, code),
            FailureReason::Reject(reason) => write!(f, "rejected: {:?}", reason),
            FailureReason::Abort(reason) => write!(f, "aborted: {:?}", reason),
            FailureReason::InvalidResponse(msg) => write!(f, "invalid response: {}", msg),
        }
    }
}

/// What a received NPDU meant to the session
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Event {
    #[default]
    None,
    /// A device announced itself and was added to the address table
    IAm(AddressBinding),
    /// The bound device acknowledged the pending WriteProperty
    WriteAcknowledged { invoke_id: u8 },
    /// The bound device returned the value for the pending ReadProperty
    ReadCompleted { invoke_id: u8, value: PropertyValue },
    /// The bound device answered the pending request with Error, Reject or Abort
    Failed { invoke_id: u8, reason: FailureReason },
}

/// NPDU to send back to the station a request came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub destination: DataLinkAddress,
    pub pdu: Vec<u8>,
}

/// Outcome of [`Session::dispatch`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dispatch {
    pub event: Event,
    pub reply: Option<Reply>,
}

impl Dispatch {
    fn event(event: Event) -> Self {
        Self { event, reply: None }
    }

    fn reply(destination: &BacnetAddress, apdu: &Apdu) -> Self {
        let mut pdu = Npdu::application(false, destination.network.clone()).encode();
        pdu.extend_from_slice(&apdu.encode());
        Self {
            event: Event::None,
            reply: Some(Reply {
                destination: destination.mac.clone(),
                pdu,
            }),
        }
    }
}

/// Completion the poll loop is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    IAm,
    WriteAck,
    ReadAck,
}

impl Awaiting {
    pub fn satisfied_by(&self, event: &Event) -> bool {
        matches!(
            (self, event),
            (Awaiting::IAm, Event::IAm(_))
                | (Awaiting::WriteAck, Event::WriteAcknowledged { .. })
                | (Awaiting::ReadAck, Event::ReadCompleted { .. })
        )
    }
}

/// How a [`Client::handler_loop`] run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The awaited event, or a failure of the pending request
    Completed(Event),
    TimedOut,
}

/// State shared by the protocol handlers
#[derive(Debug)]
pub struct Session {
    device: Option<DeviceInfo>,
    /// Invoke ID of the request whose answer is awaited
    pending: Option<u8>,
    /// Last device that answered a Who-Is
    discovered: Option<u32>,
    /// Only this device may be bound when set
    target: Option<u32>,
    tsm: TransactionManager,
    addresses: AddressTable,
    local_device: DeviceObject,
}

impl Session {
    pub fn new(local_device: DeviceObject, tsm: TransactionManager) -> Self {
        Self {
            device: None,
            pending: None,
            discovered: None,
            target: None,
            tsm,
            addresses: AddressTable::new(),
            local_device,
        }
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn pending(&self) -> Option<u8> {
        self.pending
    }

    pub fn target(&self) -> Option<u32> {
        self.target
    }

    pub fn set_target(&mut self, target: Option<u32>) {
        self.target = target;
    }

    pub fn addresses(&self) -> &AddressTable {
        &self.addresses
    }

    pub fn addresses_mut(&mut self) -> &mut AddressTable {
        &mut self.addresses
    }

    pub fn tsm(&self) -> &TransactionManager {
        &self.tsm
    }

    pub fn local_device(&self) -> &DeviceObject {
        &self.local_device
    }

    /// Bind the target device, or the last one that said I-Am, if the
    /// address table knows where it is
    pub fn bind_device(&mut self) -> Option<&DeviceInfo> {
        let candidate = self.target.or(self.discovered)?;
        let binding = self.addresses.bind_request(candidate)?.clone();
        self.device = Some(DeviceInfo::from(binding));
        self.device.as_ref()
    }

    /// Decode one NPDU received from `src` and run the matching handler
    pub fn dispatch(&mut self, src: &DataLinkAddress, pdu: &[u8]) -> Dispatch {
        let (npdu, offset) = match Npdu::decode(pdu) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!("Dropping NPDU from {}: {}", src, e);
                return Dispatch::default();
            }
        };

        if npdu.is_network_message() {
            debug!("Ignoring network layer message from {}", src);
            return Dispatch::default();
        }
        if let Some(destination) = &npdu.destination {
            if destination.network != 0xFFFF {
                trace!("NPDU from {} is for network {}", src, destination.network);
                return Dispatch::default();
            }
        }

        let source = BacnetAddress {
            mac: src.clone(),
            network: npdu.source.clone(),
        };

        let apdu = match Apdu::decode(&pdu[offset..]) {
            Ok(apdu) => apdu,
            Err(e) => {
                debug!("Dropping APDU from {}: {}", source, e);
                return Dispatch::default();
            }
        };

        match apdu {
            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => self.handle_unconfirmed(&source, service_choice, &service_data),
            Apdu::ConfirmedRequest {
                segmented,
                max_response_size,
                invoke_id,
                service_choice,
                service_data,
                ..
            } => {
                let response = if segmented {
                    Apdu::Abort {
                        server: true,
                        invoke_id,
                        abort_reason: AbortReason::SegmentationNotSupported as u8,
                    }
                } else {
                    self.serve(invoke_id, service_choice, &service_data, max_response_size)
                };
                Dispatch::reply(&source, &response)
            }
            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                if self.complete(&source, invoke_id)
                    && service_choice == ConfirmedServiceChoice::WriteProperty as u8
                {
                    Dispatch::event(Event::WriteAcknowledged { invoke_id })
                } else {
                    Dispatch::default()
                }
            }
            Apdu::ComplexAck {
                segmented,
                invoke_id,
                service_choice,
                service_data,
                ..
            } => {
                if !self.complete(&source, invoke_id) {
                    return Dispatch::default();
                }
                if segmented {
                    let abort = Apdu::Abort {
                        server: false,
                        invoke_id,
                        abort_reason: AbortReason::SegmentationNotSupported as u8,
                    };
                    let mut dispatch = Dispatch::reply(&source, &abort);
                    dispatch.event = Event::Failed {
                        invoke_id,
                        reason: FailureReason::Abort(AbortReason::SegmentationNotSupported),
                    };
                    return dispatch;
                }
                if service_choice != ConfirmedServiceChoice::ReadProperty as u8 {
                    return Dispatch::default();
                }
                Dispatch::event(self.read_property_ack(invoke_id, &service_data))
            }
            Apdu::Error {
                invoke_id,
                error_class,
                error_code,
                ..
            } => self.failed(
                &source,
                invoke_id,
                FailureReason::Error {
                    class: ErrorClass::from(error_class),
                    code: ErrorCode::from(error_code),
                },
            ),
            Apdu::Reject {
                invoke_id,
                reject_reason,
            } => self.failed(
                &source,
                invoke_id,
                FailureReason::Reject(RejectReason::from(reject_reason)),
            ),
            Apdu::Abort {
                server: true,
                invoke_id,
                abort_reason,
            } => self.failed(
                &source,
                invoke_id,
                FailureReason::Abort(AbortReason::from(abort_reason)),
            ),
            Apdu::Abort { server: false, .. } | Apdu::SegmentAck { .. } => Dispatch::default(),
        }
    }

    fn handle_unconfirmed(
        &mut self,
        source: &BacnetAddress,
        service_choice: u8,
        data: &[u8],
    ) -> Dispatch {
        match UnconfirmedServiceChoice::try_from(service_choice) {
            Ok(UnconfirmedServiceChoice::IAm) => self.handle_i_am(source, data),
            _ => {
                trace!("Ignoring unconfirmed service {} from {}", service_choice, source);
                Dispatch::default()
            }
        }
    }

    fn handle_i_am(&mut self, source: &BacnetAddress, data: &[u8]) -> Dispatch {
        let i_am = match IAmRequest::decode(data) {
            Ok(i_am) => i_am,
            Err(e) => {
                warn!("Received I-Am Request, but unable to decode it.");
                debug!("I-Am from {}: {}", source, e);
                return Dispatch::default();
            }
        };

        let device_id = i_am.device_identifier.instance;
        info!("Received I-Am Request from {}, MAC = {}", device_id, source);

        if self.target.is_some_and(|target| target != device_id) {
            debug!("Device {} is not the target, ignoring it", device_id);
            return Dispatch::default();
        }

        let binding = AddressBinding {
            device_id,
            address: source.clone(),
            max_apdu: i_am.max_apdu_length_accepted,
            segmentation: i_am.segmentation_supported,
            vendor_id: i_am.vendor_identifier,
        };
        if !self.addresses.add_binding(binding.clone()) {
            return Dispatch::default();
        }
        self.discovered = Some(device_id);
        Dispatch::event(Event::IAm(binding))
    }

    /// Answer a confirmed request addressed to the local device
    fn serve(
        &self,
        invoke_id: u8,
        service_choice: u8,
        data: &[u8],
        max_response: MaxApduSize,
    ) -> Apdu {
        if service_choice != ConfirmedServiceChoice::ReadProperty as u8 {
            debug!("Rejecting unrecognized confirmed service {}", service_choice);
            return Apdu::Reject {
                invoke_id,
                reject_reason: RejectReason::UnrecognizedService as u8,
            };
        }

        let request = match ReadPropertyRequest::decode(data) {
            Ok(request) => request,
            Err(e) => {
                return Apdu::Reject {
                    invoke_id,
                    reject_reason: reject_reason_for(&e) as u8,
                }
            }
        };

        let value = match self.local_device.read_property(
            request.object_identifier,
            request.property_identifier,
            request.property_array_index,
        ) {
            Ok(value) => value,
            Err(e) => {
                let (class, code) = error_for_object(&e);
                debug!("ReadProperty {:?} failed: {}", request.property_identifier, e);
                return Apdu::Error {
                    invoke_id,
                    service_choice,
                    error_class: class.into(),
                    error_code: code.into(),
                };
            }
        };

        let ack = ReadPropertyAck::new(
            request.object_identifier,
            request.property_identifier,
            request.property_array_index,
            value,
        );
        let mut service_data = Vec::new();
        if ack.encode(&mut service_data).is_err() {
            return Apdu::Abort {
                server: true,
                invoke_id,
                abort_reason: AbortReason::Other as u8,
            };
        }

        let response = Apdu::ComplexAck {
            segmented: false,
            more_follows: false,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        };
        if response.encode().len() > max_response.size() {
            return Apdu::Abort {
                server: true,
                invoke_id,
                abort_reason: AbortReason::SegmentationNotSupported as u8,
            };
        }
        response
    }

    fn read_property_ack(&mut self, invoke_id: u8, data: &[u8]) -> Event {
        match ReadPropertyAck::decode(data) {
            Ok(ack) => {
                if let Some(device) = self.device.as_mut() {
                    device.last_value = Some(ack.property_value.clone());
                }
                Event::ReadCompleted {
                    invoke_id,
                    value: ack.property_value,
                }
            }
            Err(e) => Event::Failed {
                invoke_id,
                reason: FailureReason::InvalidResponse(e.to_string()),
            },
        }
    }

    fn failed(&mut self, source: &BacnetAddress, invoke_id: u8, reason: FailureReason) -> Dispatch {
        if !self.complete(source, invoke_id) {
            return Dispatch::default();
        }
        warn!("Request {} to {} failed: {}", invoke_id, source, reason);
        Dispatch::event(Event::Failed { invoke_id, reason })
    }

    /// Release the transaction answered by `source` and tell whether the
    /// answer is the one the session is waiting for
    fn complete(&mut self, source: &BacnetAddress, invoke_id: u8) -> bool {
        if self.tsm.destination(invoke_id) == Some(&source.mac) {
            self.tsm.free_invoke_id(invoke_id);
        }

        let from_device = self.device.as_ref().is_some_and(|d| d.address == *source);
        if from_device && self.pending == Some(invoke_id) {
            self.pending = None;
            true
        } else {
            trace!("Unexpected answer for invoke ID {} from {}", invoke_id, source);
            false
        }
    }
}

fn reject_reason_for(error: &EncodingError) -> RejectReason {
    match error {
        EncodingError::InvalidTag => RejectReason::InvalidTag,
        EncodingError::BufferUnderflow => RejectReason::MissingRequiredParameter,
        EncodingError::ValueOutOfRange => RejectReason::ParameterOutOfRange,
        EncodingError::InvalidLength | EncodingError::InvalidFormat(_) => RejectReason::Other,
    }
}

/// Owns the data link and drives the session
pub struct Client<D> {
    link: D,
    session: Session,
    config: ClientConfig,
    rx_buf: Vec<u8>,
    last_tick: Instant,
}

impl<D: DataLink> Client<D> {
    pub fn new(link: D, config: ClientConfig) -> Self {
        let tsm = TransactionManager::new(config.apdu_timeout, config.apdu_retries);
        let local_device = DeviceObject::new(DeviceObjectConfig {
            instance: config.device_instance,
            apdu_timeout: tsm.apdu_timeout().as_millis().min(u32::MAX as u128) as u32,
            number_of_apdu_retries: tsm.apdu_retries(),
            ..Default::default()
        });

        Self {
            link,
            session: Session::new(local_device, tsm),
            config,
            rx_buf: vec![0; crate::BACNET_MAX_MPDU],
            last_tick: Instant::now(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn link(&self) -> &D {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut D {
        &mut self.link
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.session.device()
    }

    /// Broadcast a Who-Is to every network, limited to `device` when given
    pub fn send_who_is(&mut self, device: Option<u32>) -> Result<()> {
        let request = match device {
            Some(instance) => WhoIsRequest::for_device(instance),
            None => WhoIsRequest::new(),
        };
        let mut service_data = Vec::new();
        request.encode(&mut service_data)?;

        let apdu = Apdu::UnconfirmedRequest {
            service_choice: UnconfirmedServiceChoice::WhoIs as u8,
            service_data,
        };
        let mut pdu = Npdu::global_broadcast().encode();
        pdu.extend_from_slice(&apdu.encode());

        debug!("Sending Who-Is");
        self.link.send_frame(&pdu, &DataLinkAddress::Broadcast, false)?;
        Ok(())
    }

    /// Send a WriteProperty to a bound device; returns the invoke ID
    pub fn send_write_property(
        &mut self,
        device_id: u32,
        object: ObjectIdentifier,
        property: PropertyIdentifier,
        value: PropertyValue,
        priority: Option<u8>,
    ) -> Result<u8> {
        let request = match priority {
            Some(priority) => {
                WritePropertyRequest::with_priority(object, property, value, priority)
            }
            None => WritePropertyRequest::new(object, property, value),
        };
        let mut service_data = Vec::new();
        request.encode(&mut service_data)?;

        debug!("Sending WriteProperty {} {:?} to device {}", object, property, device_id);
        self.send_confirmed(device_id, ConfirmedServiceChoice::WriteProperty, service_data)
    }

    /// Send a ReadProperty to a bound device; returns the invoke ID
    pub fn send_read_property(
        &mut self,
        device_id: u32,
        object: ObjectIdentifier,
        property: PropertyIdentifier,
        array_index: Option<u32>,
    ) -> Result<u8> {
        let request = match array_index {
            Some(index) => ReadPropertyRequest::with_array_index(object, property, index),
            None => ReadPropertyRequest::new(object, property),
        };
        let mut service_data = Vec::new();
        request.encode(&mut service_data)?;

        debug!("Sending ReadProperty {} {:?} to device {}", object, property, device_id);
        self.send_confirmed(device_id, ConfirmedServiceChoice::ReadProperty, service_data)
    }

    fn send_confirmed(
        &mut self,
        device_id: u32,
        service: ConfirmedServiceChoice,
        service_data: Vec<u8>,
    ) -> Result<u8> {
        let binding = self
            .session
            .addresses
            .bind_request(device_id)
            .cloned()
            .ok_or(LoopbackError::NotBound(device_id))?;

        // Charge the time since the last poll to the requests already in
        // flight so the new one starts with a full timer
        self.tick()?;

        let invoke_id = self
            .session
            .tsm
            .next_free_invoke_id()
            .ok_or(LoopbackError::NoFreeInvokeId)?;

        let apdu = Apdu::confirmed(
            invoke_id,
            MaxApduSize::for_size(crate::BACNET_MAX_APDU),
            service as u8,
            service_data,
        )
        .encode();
        if apdu.len() > binding.max_apdu as usize {
            self.session.tsm.free_invoke_id(invoke_id);
            return Err(LoopbackError::ApduTooLarge {
                size: apdu.len(),
                max: binding.max_apdu,
            });
        }

        let mut pdu = Npdu::application(true, binding.address.network.clone()).encode();
        pdu.extend_from_slice(&apdu);

        if let Err(e) = self.link.send_frame(&pdu, &binding.address.mac, true) {
            self.session.tsm.free_invoke_id(invoke_id);
            return Err(e.into());
        }
        self.session
            .tsm
            .set_confirmed_unsegmented_transaction(invoke_id, binding.address.mac, pdu);
        self.session.pending = Some(invoke_id);
        Ok(invoke_id)
    }

    /// Advance the transaction timers by the time since the last tick and
    /// resend whatever timed out
    pub fn tick(&mut self) -> Result<()> {
        let elapsed = self.last_tick.elapsed().as_millis().min(u32::MAX as u128) as u32;
        if elapsed == 0 {
            return Ok(());
        }
        self.last_tick += Duration::from_millis(elapsed as u64);

        for retransmit in self.session.tsm.timer_milliseconds(elapsed) {
            self.link
                .send_frame(&retransmit.pdu, &retransmit.destination, true)?;
        }
        Ok(())
    }

    /// Receive one NPDU within the receive budget and dispatch it.
    ///
    /// Replies the session produces are sent before returning.
    pub fn receive(&mut self) -> Result<Event> {
        self.receive_within(self.config.receive_timeout)
    }

    fn receive_within(&mut self, timeout: Duration) -> Result<Event> {
        let received = self.link.receive_frame(&mut self.rx_buf, timeout)?;
        let Some((len, source)) = received else {
            return Ok(Event::None);
        };

        let dispatch = self.session.dispatch(&source, &self.rx_buf[..len]);
        if let Some(reply) = dispatch.reply {
            self.link.send_frame(&reply.pdu, &reply.destination, false)?;
        }
        Ok(dispatch.event)
    }

    /// Poll until `awaiting` is satisfied, the pending request fails, or the
    /// APDU timeout passes
    pub fn handler_loop(&mut self, awaiting: Awaiting) -> Result<PollOutcome> {
        let started = Instant::now();
        loop {
            thread::sleep(self.config.poll_interval);
            self.tick()?;

            let event = self.receive()?;
            if awaiting.satisfied_by(&event) || matches!(event, Event::Failed { .. }) {
                return Ok(PollOutcome::Completed(event));
            }

            if started.elapsed() >= self.config.apdu_timeout {
                debug!("Timed out waiting for {:?}", awaiting);
                return Ok(PollOutcome::TimedOut);
            }
        }
    }

    /// Keep the link and the transaction timers running for `duration`.
    ///
    /// Requests from peers are still answered; events are dropped.
    pub fn idle(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            thread::sleep(self.config.poll_interval.min(duration));
            self.tick()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            let event = self.receive_within(remaining.min(self.config.receive_timeout))?;
            if event != Event::None {
                trace!("Dropping {:?} while idle", event);
            }
        }
    }

    /// True when the request holding `invoke_id` is no longer outstanding
    pub fn invoke_id_free(&self, invoke_id: u8) -> bool {
        self.session.tsm.invoke_id_free(invoke_id)
    }

    /// True when the request holding `invoke_id` used up its retries
    pub fn invoke_id_failed(&self, invoke_id: u8) -> bool {
        self.session.tsm.invoke_id_failed(invoke_id)
    }

    pub fn free_invoke_id(&mut self, invoke_id: u8) {
        self.session.tsm.free_invoke_id(invoke_id);
        if self.session.pending == Some(invoke_id) {
            self.session.pending = None;
        }
    }
}
