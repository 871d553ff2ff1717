//! BACnet MS/TP (Master-Slave/Token-Passing) Data Link Implementation
//!
//! This module implements the MS/TP data link layer of ASHRAE 135 Clause 9 for
//! a master node on an EIA-485 segment.
//!
//! # Frame Format
//!
//! MS/TP Frame:
//! - Preamble (2 bytes): 0x55, 0xFF
//! - Frame Type (1 byte)
//! - Destination Address (1 byte)
//! - Source Address (1 byte)
//! - Data Length (2 bytes, most significant first)
//! - Header CRC (1 byte)
//! - Data (0-501 bytes)
//! - Data CRC (2 bytes, least significant first) - only if data length > 0
//!
//! # Master node
//!
//! [`MstpDataLink`] runs the master node state machine of clause 9.5.6. It has
//! no thread of its own: every call to [`DataLink::receive_frame`] reads what
//! the port has, feeds it through the [`FrameReceiver`] and then advances the
//! state machine on the silence, reply and usage timers. Outgoing NPDUs are
//! queued by [`DataLink::send_frame`] and only hit the wire while this node
//! holds the token, except for replies to a Data-Expecting-Reply request,
//! which go out as soon as the application hands them over.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use log::{debug, info, trace, warn};

use crate::datalink::{DataLink, DataLinkAddress, DataLinkError, Result};
use crate::util::{crc16_mstp_data, crc8_mstp_header, hex_preview};

/// MS/TP frame preamble bytes
pub const MSTP_PREAMBLE_55: u8 = 0x55;
pub const MSTP_PREAMBLE_FF: u8 = 0xFF;

/// Maximum MS/TP data length
pub const MSTP_MAX_DATA_LENGTH: usize = 501;

/// MS/TP header size (without data)
pub const MSTP_HEADER_SIZE: usize = 8;

/// MS/TP maximum frame size
pub const MSTP_MAX_FRAME_SIZE: usize = MSTP_HEADER_SIZE + MSTP_MAX_DATA_LENGTH + 2;

/// Destination address of a broadcast frame
pub const MSTP_BROADCAST_ADDRESS: u8 = 255;

/// Highest address a master node may use
pub const MSTP_MAX_MASTER: u8 = 127;

/// Baud rates permitted on an MS/TP segment
pub const MSTP_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 76800, 115200];

/// Token passes retried before a new successor is searched for (Nretry_token)
const N_RETRY_TOKEN: u8 = 1;

/// MS/TP frame types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MstpFrameType {
    Token = 0,
    PollForMaster = 1,
    ReplyToPollForMaster = 2,
    TestRequest = 3,
    TestResponse = 4,
    BacnetDataExpectingReply = 5,
    BacnetDataNotExpectingReply = 6,
    ReplyPostponed = 7,
}

impl MstpFrameType {
    /// Convert from u8. Proprietary frame types (128-255) are not supported.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Token),
            1 => Some(Self::PollForMaster),
            2 => Some(Self::ReplyToPollForMaster),
            3 => Some(Self::TestRequest),
            4 => Some(Self::TestResponse),
            5 => Some(Self::BacnetDataExpectingReply),
            6 => Some(Self::BacnetDataNotExpectingReply),
            7 => Some(Self::ReplyPostponed),
            _ => None,
        }
    }
}

/// MS/TP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MstpFrame {
    pub frame_type: MstpFrameType,
    pub destination: u8,
    pub source: u8,
    pub data: Vec<u8>,
}

impl MstpFrame {
    /// Create a new MS/TP frame
    pub fn new(
        frame_type: MstpFrameType,
        destination: u8,
        source: u8,
        data: Vec<u8>,
    ) -> Result<Self> {
        if data.len() > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge(data.len()));
        }
        Ok(Self {
            frame_type,
            destination,
            source,
            data,
        })
    }

    /// Frame without data (token, poll for master and friends)
    pub fn control(frame_type: MstpFrameType, destination: u8, source: u8) -> Self {
        Self {
            frame_type,
            destination,
            source,
            data: Vec::new(),
        }
    }

    pub fn token(destination: u8, source: u8) -> Self {
        Self::control(MstpFrameType::Token, destination, source)
    }

    pub fn poll_for_master(destination: u8, source: u8) -> Self {
        Self::control(MstpFrameType::PollForMaster, destination, source)
    }

    /// Create a BACnet data frame carrying an NPDU
    pub fn bacnet_data(
        destination: u8,
        source: u8,
        data: Vec<u8>,
        expecting_reply: bool,
    ) -> Result<Self> {
        let frame_type = if expecting_reply {
            MstpFrameType::BacnetDataExpectingReply
        } else {
            MstpFrameType::BacnetDataNotExpectingReply
        };
        Self::new(frame_type, destination, source, data)
    }

    /// Encode the frame for the wire
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(MSTP_HEADER_SIZE + self.data.len() + 2);
        let length = self.data.len() as u16;

        buffer.push(MSTP_PREAMBLE_55);
        buffer.push(MSTP_PREAMBLE_FF);
        buffer.push(self.frame_type as u8);
        buffer.push(self.destination);
        buffer.push(self.source);
        buffer.extend_from_slice(&length.to_be_bytes());
        let header_crc = crc8_mstp_header(&buffer[2..7]);
        buffer.push(header_crc);

        if !self.data.is_empty() {
            buffer.extend_from_slice(&self.data);
            buffer.extend_from_slice(&crc16_mstp_data(&self.data).to_le_bytes());
        }

        buffer
    }

    /// Decode exactly one frame.
    ///
    /// Unlike [`FrameReceiver`] this does not hunt for a preamble; it is meant
    /// for buffers known to hold a single frame.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MSTP_HEADER_SIZE {
            return Err(DataLinkError::InvalidFrame("frame too short".to_string()));
        }
        if data[0] != MSTP_PREAMBLE_55 || data[1] != MSTP_PREAMBLE_FF {
            return Err(DataLinkError::InvalidFrame("missing preamble".to_string()));
        }
        if crc8_mstp_header(&data[2..7]) != data[7] {
            return Err(DataLinkError::CrcError);
        }

        let frame_type = MstpFrameType::from_u8(data[2])
            .ok_or_else(|| DataLinkError::InvalidFrame(format!("unknown frame type {}", data[2])))?;
        let length = u16::from_be_bytes([data[5], data[6]]) as usize;
        if length > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge(length));
        }

        let payload = if length > 0 {
            let end = MSTP_HEADER_SIZE + length;
            if data.len() < end + 2 {
                return Err(DataLinkError::InvalidFrame("truncated data".to_string()));
            }
            let payload = &data[MSTP_HEADER_SIZE..end];
            if crc16_mstp_data(payload) != u16::from_le_bytes([data[end], data[end + 1]]) {
                return Err(DataLinkError::CrcError);
            }
            payload.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            frame_type,
            destination: data[3],
            source: data[4],
            data: payload,
        })
    }
}

/// Counters kept by the [`FrameReceiver`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub frames: u64,
    pub header_crc_errors: u64,
    pub data_crc_errors: u64,
    pub oversized_frames: u64,
    pub unknown_frame_types: u64,
    pub discarded_bytes: u64,
}

/// Receive state machine turning a raw octet stream into frames.
///
/// Bytes may arrive in any split. Noise before a preamble is skipped, a header
/// with a bad CRC or an impossible length restarts the preamble search right
/// after the bad preamble, and a frame whose data CRC fails is dropped whole.
#[derive(Debug)]
pub struct FrameReceiver {
    buffer: BytesMut,
    stats: ReceiverStats,
}

impl FrameReceiver {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(2 * MSTP_MAX_FRAME_SIZE),
            stats: ReceiverStats::default(),
        }
    }

    /// Append received octets
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Octets buffered but not yet part of a complete frame
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Pull the next valid frame out of the buffered octets
    pub fn next_frame(&mut self) -> Option<MstpFrame> {
        loop {
            let preamble = self
                .buffer
                .windows(2)
                .position(|w| w[0] == MSTP_PREAMBLE_55 && w[1] == MSTP_PREAMBLE_FF);

            match preamble {
                Some(0) => {}
                Some(pos) => self.discard(pos),
                None => {
                    // A trailing 0x55 may be the first half of the next preamble
                    let keep = usize::from(self.buffer.last() == Some(&MSTP_PREAMBLE_55));
                    let count = self.buffer.len() - keep;
                    self.discard(count);
                    return None;
                }
            }

            if self.buffer.len() < MSTP_HEADER_SIZE {
                return None;
            }

            let header_crc = crc8_mstp_header(&self.buffer[2..7]);
            if header_crc != self.buffer[7] {
                self.stats.header_crc_errors += 1;
                warn!(
                    "MS/TP header CRC error: calc=0x{:02X} recv=0x{:02X} header=[{}]",
                    header_crc,
                    self.buffer[7],
                    hex_preview(&self.buffer[..MSTP_HEADER_SIZE], MSTP_HEADER_SIZE)
                );
                self.buffer.advance(2);
                continue;
            }

            let length = u16::from_be_bytes([self.buffer[5], self.buffer[6]]) as usize;
            if length > MSTP_MAX_DATA_LENGTH {
                self.stats.oversized_frames += 1;
                warn!("MS/TP frame length {} exceeds {}", length, MSTP_MAX_DATA_LENGTH);
                self.buffer.advance(2);
                continue;
            }

            let total = if length > 0 {
                MSTP_HEADER_SIZE + length + 2
            } else {
                MSTP_HEADER_SIZE
            };
            if self.buffer.len() < total {
                return None;
            }

            let raw = self.buffer.split_to(total);
            let data = if length > 0 {
                let end = MSTP_HEADER_SIZE + length;
                let payload = &raw[MSTP_HEADER_SIZE..end];
                let received = u16::from_le_bytes([raw[end], raw[end + 1]]);
                let calculated = crc16_mstp_data(payload);
                if received != calculated {
                    self.stats.data_crc_errors += 1;
                    warn!(
                        "MS/TP data CRC error: calc=0x{:04X} recv=0x{:04X} src={} len={}",
                        calculated, received, raw[4], length
                    );
                    continue;
                }
                payload.to_vec()
            } else {
                Vec::new()
            };

            let Some(frame_type) = MstpFrameType::from_u8(raw[2]) else {
                self.stats.unknown_frame_types += 1;
                debug!("MS/TP frame type {} from {} ignored", raw[2], raw[4]);
                continue;
            };

            self.stats.frames += 1;
            return Some(MstpFrame {
                frame_type,
                destination: raw[3],
                source: raw[4],
                data,
            });
        }
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        trace!("MS/TP discarding {} octets: {}", count, hex_preview(&self.buffer[..count], 16));
        self.stats.discarded_bytes += count as u64;
        self.buffer.advance(count);
    }
}

impl Default for FrameReceiver {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte transport underneath the MS/TP node.
///
/// `read_bytes` returns `Ok(0)` when nothing arrived within the port's own
/// read timeout.
pub trait SerialLink {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)?;
        self.flush()
    }
}

/// MS/TP master node states (clause 9.5.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MstpState {
    Initialize,
    Idle,
    UseToken,
    WaitForReply,
    DoneWithToken,
    PassToken,
    NoToken,
    PollForMaster,
    AnswerDataRequest,
}

/// MS/TP master node configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MstpConfig {
    /// Serial device, e.g. `/dev/ttyUSB0`
    pub port: String,
    pub baud_rate: u32,
    /// This station's MAC address (0-127)
    pub station_address: u8,
    /// Highest master address polled for (Nmax_master)
    pub max_master: u8,
    /// Frames sent per token (Nmax_info_frames)
    pub max_info_frames: u8,
    /// Silence after which the token is considered lost (Tno_token)
    pub no_token_timeout: Duration,
    /// Wait for a reply to Data-Expecting-Reply (Treply_timeout)
    pub reply_timeout: Duration,
    /// Wait for the token successor or a polled master to use the bus (Tusage_timeout)
    pub usage_timeout: Duration,
    /// Time the application has to reply before Reply-Postponed goes out (Treply_delay)
    pub reply_delay: Duration,
    /// Per-station slot used to stagger token generation (Tslot)
    pub slot_time: Duration,
    /// Tokens between maintenance polls (Npoll)
    pub poll_interval: u8,
    /// How long one port read may block
    pub read_timeout: Duration,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            port: String::from("/dev/ttyUSB0"),
            baud_rate: 38400,
            station_address: 127,
            max_master: 127,
            max_info_frames: 1,
            no_token_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_millis(255),
            usage_timeout: Duration::from_millis(50),
            reply_delay: Duration::from_millis(250),
            slot_time: Duration::from_millis(10),
            poll_interval: 50,
            read_timeout: Duration::from_millis(5),
        }
    }
}

impl MstpConfig {
    /// Check the configuration describes a master node this module can run
    pub fn validate(&self) -> Result<()> {
        if self.max_master > MSTP_MAX_MASTER {
            return Err(DataLinkError::InvalidConfiguration(format!(
                "max master {} exceeds {}",
                self.max_master, MSTP_MAX_MASTER
            )));
        }
        if self.station_address > self.max_master {
            return Err(DataLinkError::AddressError(format!(
                "station {} is not a master address (max master {})",
                self.station_address, self.max_master
            )));
        }
        if self.max_info_frames == 0 {
            return Err(DataLinkError::InvalidConfiguration(
                "max info frames must be at least 1".to_string(),
            ));
        }
        if self.poll_interval == 0 {
            return Err(DataLinkError::InvalidConfiguration(
                "poll interval must be at least 1".to_string(),
            ));
        }
        if !MSTP_BAUD_RATES.contains(&self.baud_rate) {
            return Err(DataLinkError::InvalidConfiguration(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct OutgoingFrame {
    destination: u8,
    expecting_reply: bool,
    data: Vec<u8>,
}

/// MS/TP master node on a serial port
pub struct MstpDataLink<S = Box<dyn serialport::SerialPort>> {
    port: S,
    config: MstpConfig,
    state: MstpState,
    receiver: FrameReceiver,
    outgoing: VecDeque<OutgoingFrame>,
    incoming: VecDeque<(Vec<u8>, u8)>,
    /// NS: station the token is passed to
    next_station: u8,
    /// PS: last station polled for master
    poll_station: u8,
    token_count: u8,
    frame_count: u8,
    retry_count: u8,
    sole_master: bool,
    /// Reset on every octet sent or received
    silence: Instant,
    /// Started when a reply is awaited or owed
    reply_timer: Instant,
    reply_to: Option<u8>,
}

impl MstpDataLink<Box<dyn serialport::SerialPort>> {
    /// Open the configured serial port (8N1) and start as a master node
    pub fn open(config: MstpConfig) -> Result<Self> {
        config.validate()?;
        let port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| DataLinkError::IoError(e.into()))?;
        info!(
            "MS/TP: opened {} at {} baud as station {}",
            config.port, config.baud_rate, config.station_address
        );
        Ok(Self::with_port(port, config))
    }
}

impl<S: SerialLink> MstpDataLink<S> {
    /// Run a master node over any byte transport
    pub fn with_port(port: S, config: MstpConfig) -> Self {
        let now = Instant::now();
        Self {
            port,
            next_station: config.station_address,
            poll_station: config.station_address,
            token_count: config.poll_interval,
            config,
            state: MstpState::Initialize,
            receiver: FrameReceiver::new(),
            outgoing: VecDeque::new(),
            incoming: VecDeque::new(),
            frame_count: 0,
            retry_count: 0,
            sole_master: false,
            silence: now,
            reply_timer: now,
            reply_to: None,
        }
    }

    pub fn config(&self) -> &MstpConfig {
        &self.config
    }

    pub fn state(&self) -> MstpState {
        self.state
    }

    pub fn next_station(&self) -> u8 {
        self.next_station
    }

    pub fn is_sole_master(&self) -> bool {
        self.sole_master
    }

    /// NPDUs waiting for the token
    pub fn queued(&self) -> usize {
        self.outgoing.len()
    }

    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    pub fn port(&self) -> &S {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut S {
        &mut self.port
    }

    fn this_station(&self) -> u8 {
        self.config.station_address
    }

    /// Station after `station` in the master ring
    fn next_in_ring(&self, station: u8) -> u8 {
        ((station as u16 + 1) % (self.config.max_master as u16 + 1)) as u8
    }

    fn set_state(&mut self, state: MstpState) {
        if self.state != state {
            trace!("MS/TP: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn transmit(&mut self, frame: MstpFrame) -> Result<()> {
        let bytes = frame.encode();
        trace!(
            "MS/TP TX {:?} {} -> {}: {}",
            frame.frame_type,
            frame.source,
            frame.destination,
            hex_preview(&bytes, 32)
        );
        self.port.write_bytes(&bytes)?;
        self.silence = Instant::now();
        Ok(())
    }

    fn send_control(&mut self, frame_type: MstpFrameType, destination: u8) -> Result<()> {
        let frame = MstpFrame::control(frame_type, destination, self.this_station());
        self.transmit(frame)
    }

    fn pass_token(&mut self) -> Result<()> {
        self.send_control(MstpFrameType::Token, self.next_station)?;
        self.set_state(MstpState::PassToken);
        Ok(())
    }

    fn poll_for_master(&mut self, station: u8) -> Result<()> {
        self.poll_station = station;
        self.retry_count = 0;
        self.send_control(MstpFrameType::PollForMaster, station)?;
        self.set_state(MstpState::PollForMaster);
        Ok(())
    }

    fn deliver(&mut self, frame: MstpFrame) {
        if frame.data.is_empty() {
            return;
        }
        debug!(
            "MS/TP: {} octets from station {} for the network layer",
            frame.data.len(),
            frame.source
        );
        self.incoming.push_back((frame.data, frame.source));
    }

    /// Read whatever the port has, handle complete frames and run the timers
    fn run_once(&mut self) -> Result<()> {
        if self.state == MstpState::Initialize {
            self.run_timers()?;
        }

        let mut chunk = [0u8; 256];
        let n = self.port.read_bytes(&mut chunk)?;
        if n > 0 {
            self.silence = Instant::now();
            trace!("MS/TP RX {} octets: {}", n, hex_preview(&chunk[..n], 32));
            self.receiver.push(&chunk[..n]);
        }

        while let Some(frame) = self.receiver.next_frame() {
            self.handle_frame(frame)?;
            self.run_timers()?;
        }

        self.run_timers()
    }

    fn handle_frame(&mut self, frame: MstpFrame) -> Result<()> {
        trace!(
            "MS/TP RX {:?} {} -> {} len={} in {:?}",
            frame.frame_type,
            frame.source,
            frame.destination,
            frame.data.len(),
            self.state
        );

        // Half-duplex adapters echo what we send
        if frame.source == self.this_station() {
            return Ok(());
        }

        match self.state {
            MstpState::WaitForReply => self.frame_in_wait_for_reply(frame),
            MstpState::PollForMaster => self.frame_in_poll_for_master(frame),
            MstpState::NoToken | MstpState::PassToken => {
                // Someone else is using the bus, so the token is alive
                self.set_state(MstpState::Idle);
                self.frame_in_idle(frame)
            }
            _ => self.frame_in_idle(frame),
        }
    }

    fn frame_in_idle(&mut self, frame: MstpFrame) -> Result<()> {
        let this_station = self.this_station();
        let for_us = frame.destination == this_station;
        let broadcast = frame.destination == MSTP_BROADCAST_ADDRESS;

        match frame.frame_type {
            MstpFrameType::Token if for_us => {
                self.frame_count = 0;
                self.sole_master = false;
                self.set_state(MstpState::UseToken);
            }
            MstpFrameType::PollForMaster if for_us => {
                self.send_control(MstpFrameType::ReplyToPollForMaster, frame.source)?;
            }
            MstpFrameType::TestRequest if for_us => {
                let reply = MstpFrame::new(
                    MstpFrameType::TestResponse,
                    frame.source,
                    this_station,
                    frame.data,
                )?;
                self.transmit(reply)?;
            }
            MstpFrameType::BacnetDataExpectingReply if for_us => {
                self.reply_to = Some(frame.source);
                self.reply_timer = Instant::now();
                self.deliver(frame);
                self.set_state(MstpState::AnswerDataRequest);
            }
            MstpFrameType::BacnetDataNotExpectingReply | MstpFrameType::BacnetDataExpectingReply
                if for_us || broadcast =>
            {
                self.deliver(frame);
            }
            _ => {}
        }
        Ok(())
    }

    fn frame_in_wait_for_reply(&mut self, frame: MstpFrame) -> Result<()> {
        if frame.destination == self.this_station() {
            match frame.frame_type {
                MstpFrameType::BacnetDataNotExpectingReply | MstpFrameType::TestResponse => {
                    if frame.frame_type == MstpFrameType::BacnetDataNotExpectingReply {
                        self.deliver(frame);
                    }
                    self.set_state(MstpState::DoneWithToken);
                    return Ok(());
                }
                MstpFrameType::ReplyPostponed => {
                    debug!("MS/TP: reply from {} postponed", frame.source);
                    self.set_state(MstpState::DoneWithToken);
                    return Ok(());
                }
                _ => {}
            }
        }

        debug!("MS/TP: unexpected {:?} while waiting for a reply", frame.frame_type);
        self.set_state(MstpState::Idle);
        self.frame_in_idle(frame)
    }

    fn frame_in_poll_for_master(&mut self, frame: MstpFrame) -> Result<()> {
        if frame.destination == self.this_station()
            && frame.frame_type == MstpFrameType::ReplyToPollForMaster
        {
            info!("MS/TP: station {} answered, passing the token to it", frame.source);
            self.sole_master = false;
            self.next_station = frame.source;
            self.poll_station = self.this_station();
            self.token_count = 0;
            self.retry_count = 0;
            return self.pass_token();
        }

        self.set_state(MstpState::Idle);
        self.frame_in_idle(frame)
    }

    /// Advance the state machine until it settles in a state that waits for
    /// the wire or a timer
    fn run_timers(&mut self) -> Result<()> {
        loop {
            let before = self.state;
            match self.state {
                MstpState::Initialize => {
                    self.next_station = self.this_station();
                    self.poll_station = self.this_station();
                    self.token_count = self.config.poll_interval;
                    self.sole_master = false;
                    self.set_state(MstpState::Idle);
                }
                MstpState::Idle => {
                    if self.silence.elapsed() >= self.config.no_token_timeout {
                        debug!("MS/TP: token lost");
                        self.set_state(MstpState::NoToken);
                    }
                }
                MstpState::NoToken => {
                    let slot = self.config.slot_time * self.this_station() as u32;
                    if self.silence.elapsed() >= self.config.no_token_timeout + slot {
                        info!("MS/TP: generating a token");
                        self.next_station = self.this_station();
                        self.token_count = 0;
                        let first = self.next_in_ring(self.this_station());
                        self.poll_for_master(first)?;
                    }
                }
                MstpState::UseToken => self.use_token()?,
                MstpState::WaitForReply => {
                    if self.reply_timer.elapsed() >= self.config.reply_timeout {
                        warn!("MS/TP: no reply within {:?}", self.config.reply_timeout);
                        self.frame_count = self.config.max_info_frames;
                        self.set_state(MstpState::DoneWithToken);
                    }
                }
                MstpState::DoneWithToken => self.done_with_token()?,
                MstpState::PassToken => {
                    if self.silence.elapsed() >= self.config.usage_timeout {
                        if self.retry_count < N_RETRY_TOKEN {
                            self.retry_count += 1;
                            debug!("MS/TP: retrying token pass to {}", self.next_station);
                            self.send_control(MstpFrameType::Token, self.next_station)?;
                        } else {
                            warn!("MS/TP: station {} did not take the token", self.next_station);
                            let candidate = self.next_in_ring(self.next_station);
                            self.next_station = self.this_station();
                            self.token_count = 0;
                            self.poll_for_master(candidate)?;
                        }
                    }
                }
                MstpState::PollForMaster => {
                    if self.silence.elapsed() >= self.config.usage_timeout {
                        self.poll_for_master_timeout()?;
                    }
                }
                MstpState::AnswerDataRequest => {
                    if let Some(reply) = self.take_reply()? {
                        self.transmit(reply)?;
                        self.reply_to = None;
                        self.set_state(MstpState::Idle);
                    } else if self.reply_timer.elapsed() >= self.config.reply_delay {
                        if let Some(requester) = self.reply_to.take() {
                            debug!("MS/TP: postponing reply to {}", requester);
                            self.send_control(MstpFrameType::ReplyPostponed, requester)?;
                        }
                        self.set_state(MstpState::Idle);
                    }
                }
            }

            if self.state == before {
                return Ok(());
            }
        }
    }

    fn use_token(&mut self) -> Result<()> {
        let Some(outgoing) = self.outgoing.pop_front() else {
            self.frame_count = self.config.max_info_frames;
            self.set_state(MstpState::DoneWithToken);
            return Ok(());
        };

        let frame = MstpFrame::bacnet_data(
            outgoing.destination,
            self.this_station(),
            outgoing.data,
            outgoing.expecting_reply,
        )?;
        self.transmit(frame)?;
        self.frame_count += 1;

        if outgoing.expecting_reply && outgoing.destination != MSTP_BROADCAST_ADDRESS {
            self.reply_timer = Instant::now();
            self.set_state(MstpState::WaitForReply);
        } else {
            self.set_state(MstpState::DoneWithToken);
        }
        Ok(())
    }

    fn done_with_token(&mut self) -> Result<()> {
        if self.frame_count < self.config.max_info_frames && !self.outgoing.is_empty() {
            self.set_state(MstpState::UseToken);
            return Ok(());
        }

        if self.token_count < self.config.poll_interval.saturating_sub(1) {
            self.token_count += 1;
            if self.sole_master && self.next_station == self.this_station() {
                self.frame_count = 0;
                self.set_state(MstpState::UseToken);
                return Ok(());
            }
            self.retry_count = 0;
            return self.pass_token();
        }

        if self.next_in_ring(self.poll_station) == self.next_station {
            self.token_count = 1;
            if self.sole_master {
                // Every address up to ourselves has been polled; start over
                let first = self.next_in_ring(self.next_station);
                self.next_station = self.this_station();
                return self.poll_for_master(first);
            }
            self.poll_station = self.this_station();
            self.retry_count = 0;
            return self.pass_token();
        }

        let candidate = self.next_in_ring(self.poll_station);
        self.poll_for_master(candidate)
    }

    fn poll_for_master_timeout(&mut self) -> Result<()> {
        if self.sole_master {
            self.frame_count = 0;
            self.set_state(MstpState::UseToken);
        } else if self.next_station != self.this_station() {
            self.retry_count = 0;
            self.pass_token()?;
        } else {
            let candidate = self.next_in_ring(self.poll_station);
            if candidate != self.this_station() {
                self.poll_for_master(candidate)?;
            } else {
                info!(
                    "MS/TP: no other master answered, station {} is sole master",
                    self.this_station()
                );
                self.sole_master = true;
                self.frame_count = 0;
                self.set_state(MstpState::UseToken);
            }
        }
        Ok(())
    }

    /// First queued NPDU that answers the pending Data-Expecting-Reply request
    fn take_reply(&mut self) -> Result<Option<MstpFrame>> {
        let Some(requester) = self.reply_to else {
            return Ok(None);
        };
        let Some(index) = self
            .outgoing
            .iter()
            .position(|f| f.destination == requester && !f.expecting_reply)
        else {
            return Ok(None);
        };
        let Some(outgoing) = self.outgoing.remove(index) else {
            return Ok(None);
        };
        MstpFrame::bacnet_data(requester, self.this_station(), outgoing.data, false).map(Some)
    }
}

impl<S: SerialLink> DataLink for MstpDataLink<S> {
    fn send_frame(
        &mut self,
        frame: &[u8],
        dest: &DataLinkAddress,
        expecting_reply: bool,
    ) -> Result<()> {
        if frame.len() > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::FrameTooLarge(frame.len()));
        }

        self.outgoing.push_back(OutgoingFrame {
            destination: dest.mstp_station(),
            expecting_reply,
            data: frame.to_vec(),
        });

        if self.state == MstpState::AnswerDataRequest {
            self.run_timers()?;
        }
        Ok(())
    }

    fn receive_frame(
        &mut self,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, DataLinkAddress)>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some((data, source)) = self.incoming.pop_front() {
                if data.len() > buffer.len() {
                    return Err(DataLinkError::FrameTooLarge(data.len()));
                }
                buffer[..data.len()].copy_from_slice(&data);
                return Ok(Some((data.len(), DataLinkAddress::from(source))));
            }

            self.run_once()?;

            if self.incoming.is_empty() && Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn local_address(&self) -> DataLinkAddress {
        DataLinkAddress::MsTP(self.config.station_address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct MockPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl SerialLink for MockPort {
        fn read_bytes(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
            let n = buffer.len().min(self.rx.len());
            for (slot, byte) in buffer.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }

        fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
            self.tx.extend_from_slice(data);
            Ok(())
        }
    }

    fn fast_config(station: u8, max_master: u8) -> MstpConfig {
        MstpConfig {
            station_address: station,
            max_master,
            no_token_timeout: Duration::from_millis(200),
            reply_timeout: Duration::from_millis(10),
            usage_timeout: Duration::from_millis(5),
            reply_delay: Duration::from_millis(50),
            slot_time: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn link(station: u8, max_master: u8) -> MstpDataLink<MockPort> {
        MstpDataLink::with_port(MockPort::default(), fast_config(station, max_master))
    }

    fn feed(link: &mut MstpDataLink<MockPort>, frame: MstpFrame) {
        link.port_mut().rx.extend(frame.encode());
    }

    fn written(link: &mut MstpDataLink<MockPort>) -> Vec<MstpFrame> {
        let bytes = std::mem::take(&mut link.port_mut().tx);
        let mut receiver = FrameReceiver::new();
        receiver.push(&bytes);
        std::iter::from_fn(|| receiver.next_frame()).collect()
    }

    fn pump(link: &mut MstpDataLink<MockPort>, millis: u64) -> Option<(Vec<u8>, DataLinkAddress)> {
        let mut buffer = [0u8; MSTP_MAX_DATA_LENGTH];
        link.receive_frame(&mut buffer, Duration::from_millis(millis))
            .unwrap()
            .map(|(len, source)| (buffer[..len].to_vec(), source))
    }

    /// Put the node in Idle with a known successor, as if the ring were set up
    fn joined(station: u8, max_master: u8, successor: u8) -> MstpDataLink<MockPort> {
        let mut link = link(station, max_master);
        pump(&mut link, 0);
        link.next_station = successor;
        link.token_count = 0;
        link
    }

    #[test]
    fn test_frame_encoding() {
        assert_eq!(
            MstpFrame::token(5, 3).encode(),
            vec![0x55, 0xFF, 0x00, 0x05, 0x03, 0x00, 0x00, 0xFA]
        );

        let data = MstpFrame::bacnet_data(4, 3, vec![1, 2, 3], false).unwrap();
        let encoded = data.encode();
        assert_eq!(&encoded[2..7], &[0x06, 0x04, 0x03, 0x00, 0x03]);
        assert_eq!(&encoded[8..], &[1, 2, 3, 0x3B, 0x9D]);
        assert_eq!(MstpFrame::decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_frame_validation() {
        let mut bad = MstpFrame::token(5, 3).encode();
        bad[7] ^= 0x01;
        assert!(matches!(MstpFrame::decode(&bad), Err(DataLinkError::CrcError)));

        let mut bad = MstpFrame::bacnet_data(4, 3, vec![1, 2, 3], true).unwrap().encode();
        bad[9] ^= 0xFF;
        assert!(matches!(MstpFrame::decode(&bad), Err(DataLinkError::CrcError)));

        assert!(MstpFrame::decode(&[0x55, 0xFF, 0x00]).is_err());
        assert!(MstpFrame::decode(&[0x00, 0xFF, 0x00, 0x05, 0x03, 0x00, 0x00, 0xFA]).is_err());

        assert!(MstpFrame::bacnet_data(1, 2, vec![0; MSTP_MAX_DATA_LENGTH], false).is_ok());
        assert!(matches!(
            MstpFrame::bacnet_data(1, 2, vec![0; MSTP_MAX_DATA_LENGTH + 1], false),
            Err(DataLinkError::FrameTooLarge(502))
        ));
    }

    #[test]
    fn test_receiver_skips_noise_and_handles_split_reads() {
        let frame = MstpFrame::bacnet_data(3, 4, vec![0xAA, 0x55, 0xFF], false).unwrap();
        let mut stream = vec![0x00, 0x55, 0x13, 0xFF];
        stream.extend(frame.encode());

        let mut receiver = FrameReceiver::new();
        for byte in &stream[..stream.len() - 1] {
            receiver.push(&[*byte]);
            assert!(receiver.next_frame().is_none());
        }
        receiver.push(&stream[stream.len() - 1..]);
        assert_eq!(receiver.next_frame(), Some(frame));
        assert_eq!(receiver.pending(), 0);
        assert_eq!(receiver.stats().frames, 1);
        assert_eq!(receiver.stats().discarded_bytes, 4);
    }

    #[test]
    fn test_receiver_recovers_from_bad_frames() {
        let good = MstpFrame::token(3, 4);

        let mut bad_header = MstpFrame::token(3, 4).encode();
        bad_header[7] ^= 0x10;

        let mut oversized = vec![0x55, 0xFF, 0x06, 0x03, 0x04, 0x01, 0xF6];
        let crc = crc8_mstp_header(&oversized[2..7]);
        oversized.push(crc);

        let mut bad_data = MstpFrame::bacnet_data(3, 4, vec![9, 9], false).unwrap().encode();
        let last = bad_data.len() - 1;
        bad_data[last] ^= 0x01;

        let mut receiver = FrameReceiver::new();
        receiver.push(&bad_header);
        receiver.push(&oversized);
        receiver.push(&bad_data);
        receiver.push(&good.encode());

        assert_eq!(receiver.next_frame(), Some(good));
        assert!(receiver.next_frame().is_none());
        let stats = receiver.stats();
        assert_eq!(stats.header_crc_errors, 1);
        assert_eq!(stats.oversized_frames, 1);
        assert_eq!(stats.data_crc_errors, 1);
    }

    #[test]
    fn test_unknown_frame_type_is_dropped() {
        let mut raw = vec![0x55, 0xFF, 0x80, 0x03, 0x04, 0x00, 0x00];
        let crc = crc8_mstp_header(&raw[2..7]);
        raw.push(crc);

        let mut receiver = FrameReceiver::new();
        receiver.push(&raw);
        assert!(receiver.next_frame().is_none());
        assert_eq!(receiver.stats().unknown_frame_types, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(MstpConfig::default().validate().is_ok());
        let cases = [
            MstpConfig { station_address: 128, ..Default::default() },
            MstpConfig { station_address: 10, max_master: 5, ..Default::default() },
            MstpConfig { max_master: 128, ..Default::default() },
            MstpConfig { max_info_frames: 0, ..Default::default() },
            MstpConfig { baud_rate: 4800, ..Default::default() },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{:?}", config);
        }
    }

    #[test]
    fn test_answers_poll_for_master_and_test_request() {
        let mut link = link(3, 7);
        feed(&mut link, MstpFrame::poll_for_master(3, 1));
        feed(&mut link, MstpFrame::poll_for_master(2, 1));
        feed(&mut link, MstpFrame::new(MstpFrameType::TestRequest, 3, 1, vec![7, 8]).unwrap());
        assert!(pump(&mut link, 0).is_none());

        let frames = written(&mut link);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], MstpFrame::control(MstpFrameType::ReplyToPollForMaster, 1, 3));
        let response = MstpFrame::new(MstpFrameType::TestResponse, 1, 3, vec![7, 8]).unwrap();
        assert_eq!(frames[1], response);
        assert_eq!(link.state(), MstpState::Idle);
    }

    #[test]
    fn test_delivers_data_for_us_and_broadcast_only() {
        let mut link = link(3, 7);
        feed(&mut link, MstpFrame::bacnet_data(4, 1, vec![1], false).unwrap());
        feed(&mut link, MstpFrame::bacnet_data(255, 1, vec![2], false).unwrap());
        feed(&mut link, MstpFrame::bacnet_data(3, 1, vec![3], false).unwrap());
        feed(&mut link, MstpFrame::bacnet_data(3, 3, vec![4], false).unwrap());

        assert_eq!(pump(&mut link, 0), Some((vec![2], DataLinkAddress::MsTP(1))));
        assert_eq!(pump(&mut link, 0), Some((vec![3], DataLinkAddress::MsTP(1))));
        assert_eq!(pump(&mut link, 0), None);
        assert!(written(&mut link).is_empty());
    }

    #[test]
    fn test_first_token_polls_for_a_successor() {
        let mut link = link(3, 7);
        feed(&mut link, MstpFrame::token(3, 1));
        pump(&mut link, 0);
        assert_eq!(written(&mut link), vec![MstpFrame::poll_for_master(4, 3)]);
        assert_eq!(link.state(), MstpState::PollForMaster);

        feed(&mut link, MstpFrame::control(MstpFrameType::ReplyToPollForMaster, 3, 4));
        pump(&mut link, 0);
        assert_eq!(written(&mut link), vec![MstpFrame::token(4, 3)]);
        assert_eq!(link.state(), MstpState::PassToken);
        assert_eq!(link.next_station(), 4);

        // Station 4 using the token ends the pass
        feed(&mut link, MstpFrame::token(5, 4));
        pump(&mut link, 0);
        assert_eq!(link.state(), MstpState::Idle);
    }

    #[test]
    fn test_sends_queued_data_and_waits_for_reply() {
        let mut link = joined(3, 7, 5);
        link.send_frame(&[0x01, 0x04, 0xAA], &DataLinkAddress::MsTP(5), true).unwrap();
        assert_eq!(link.queued(), 1);
        assert!(written(&mut link).is_empty());

        feed(&mut link, MstpFrame::token(3, 5));
        pump(&mut link, 0);
        assert_eq!(
            written(&mut link),
            vec![MstpFrame::bacnet_data(5, 3, vec![0x01, 0x04, 0xAA], true).unwrap()]
        );
        assert_eq!(link.state(), MstpState::WaitForReply);

        feed(&mut link, MstpFrame::bacnet_data(3, 5, vec![0x01, 0x00, 0x30], false).unwrap());
        assert_eq!(pump(&mut link, 0), Some((vec![0x01, 0x00, 0x30], DataLinkAddress::MsTP(5))));
        assert_eq!(written(&mut link), vec![MstpFrame::token(5, 3)]);
        assert_eq!(link.state(), MstpState::PassToken);
    }

    #[test]
    fn test_reply_timeout_passes_token() {
        let mut link = joined(3, 7, 5);
        link.send_frame(&[0x01, 0x04], &DataLinkAddress::MsTP(6), true).unwrap();
        feed(&mut link, MstpFrame::token(3, 5));
        pump(&mut link, 0);
        assert_eq!(link.state(), MstpState::WaitForReply);

        assert!(pump(&mut link, 15).is_none());
        let frames = written(&mut link);
        assert_eq!(frames[0].frame_type, MstpFrameType::BacnetDataExpectingReply);
        assert_eq!(frames[1], MstpFrame::token(5, 3));
    }

    #[test]
    fn test_token_pass_retry_then_new_successor() {
        let mut link = joined(3, 7, 5);
        feed(&mut link, MstpFrame::token(3, 2));
        pump(&mut link, 0);
        assert_eq!(written(&mut link), vec![MstpFrame::token(5, 3)]);

        // One retry after the usage timeout, then a search past the silent station
        pump(&mut link, 12);
        let frames = written(&mut link);
        assert_eq!(&frames[..2], &[MstpFrame::token(5, 3), MstpFrame::poll_for_master(6, 3)]);
        assert_eq!(link.next_station(), 3);
    }

    #[test]
    fn test_answers_data_request_with_application_reply() {
        let mut link = link(3, 7);
        feed(&mut link, MstpFrame::bacnet_data(3, 5, vec![0x01, 0x04, 0x00], true).unwrap());
        assert_eq!(pump(&mut link, 0), Some((vec![0x01, 0x04, 0x00], DataLinkAddress::MsTP(5))));
        assert_eq!(link.state(), MstpState::AnswerDataRequest);

        link.send_frame(&[0x01, 0x00, 0x20], &DataLinkAddress::MsTP(5), false).unwrap();
        assert_eq!(
            written(&mut link),
            vec![MstpFrame::bacnet_data(5, 3, vec![0x01, 0x00, 0x20], false).unwrap()]
        );
        assert_eq!(link.state(), MstpState::Idle);
        assert_eq!(link.queued(), 0);
    }

    #[test]
    fn test_postpones_late_reply() {
        let mut link = link(3, 7);
        feed(&mut link, MstpFrame::bacnet_data(3, 5, vec![0x01, 0x04, 0x00], true).unwrap());
        assert!(pump(&mut link, 0).is_some());
        assert!(pump(&mut link, 70).is_none());

        assert_eq!(
            written(&mut link),
            vec![MstpFrame::control(MstpFrameType::ReplyPostponed, 5, 3)]
        );
        assert_eq!(link.state(), MstpState::Idle);

        // The late reply now waits for the token
        link.send_frame(&[0x01, 0x00], &DataLinkAddress::MsTP(5), false).unwrap();
        assert!(written(&mut link).is_empty());
        assert_eq!(link.queued(), 1);
    }

    #[test]
    fn test_silent_bus_makes_sole_master() {
        let config = MstpConfig {
            no_token_timeout: Duration::from_millis(20),
            ..fast_config(3, 4)
        };
        let mut link = MstpDataLink::with_port(MockPort::default(), config);
        link.send_frame(&[0x01, 0x00, 0x10, 0x08], &DataLinkAddress::Broadcast, false).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !link.is_sole_master() && Instant::now() < deadline {
            pump(&mut link, 5);
        }
        assert!(link.is_sole_master());

        let frames = written(&mut link);
        let polled: Vec<u8> = frames
            .iter()
            .filter(|f| f.frame_type == MstpFrameType::PollForMaster)
            .map(|f| f.destination)
            .take(4)
            .collect();
        assert_eq!(polled, vec![4, 0, 1, 2]);
        let npdu = vec![0x01, 0x00, 0x10, 0x08];
        let broadcast = MstpFrame::bacnet_data(255, 3, npdu, false).unwrap();
        assert!(frames.contains(&broadcast));
        assert_eq!(link.queued(), 0);
    }

    #[test]
    fn test_rejects_oversized_npdu() {
        let mut link = link(3, 7);
        let npdu = vec![0u8; MSTP_MAX_DATA_LENGTH + 1];
        assert!(link.send_frame(&npdu, &DataLinkAddress::MsTP(1), false).is_err());
        assert_eq!(link.local_address(), DataLinkAddress::MsTP(3));
    }
}
