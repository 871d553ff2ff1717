//! BACnet Network Layer Module
//!
//! Encoding and decoding of the Network Protocol Data Unit (NPDU) header that
//! precedes every APDU (ASHRAE 135 clause 6.2).
//!
//! The NPDU contains:
//! - Protocol version
//! - Control information (priority, data expecting reply, etc.)
//! - Destination network address (DNET, DADR) and hop count
//! - Source network address (SNET, SADR)
//!
//! This node is not a router. Network layer messages are decoded far enough to
//! be recognised and then dropped; source specifiers are kept so that replies
//! from devices behind a router can still be matched against their binding.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp_loopback::network::*;
//!
//! let npdu = Npdu::application(true, None);
//! assert_eq!(npdu.encode(), vec![0x01, 0x04]);
//!
//! let (decoded, consumed) = Npdu::decode(&[0x01, 0x04, 0x00]).unwrap();
//! assert!(decoded.control.expecting_reply);
//! assert_eq!(consumed, 2);
//! ```

use std::error::Error;
use std::fmt;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors that can occur in network operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Invalid NPDU format
    InvalidNpdu(String),
    /// Unsupported protocol version
    UnsupportedVersion(u8),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidNpdu(msg) => write!(f, "Invalid NPDU: {}", msg),
            NetworkError::UnsupportedVersion(v) => write!(f, "Invalid NPDU version: {}", v),
        }
    }
}

impl Error for NetworkError {}

/// Network layer message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NetworkMessageType {
    WhoIsRouterToNetwork = 0x00,
    IAmRouterToNetwork = 0x01,
    ICouldBeRouterToNetwork = 0x02,
    RejectMessageToNetwork = 0x03,
    RouterBusyToNetwork = 0x04,
    RouterAvailableToNetwork = 0x05,
    InitializeRoutingTable = 0x06,
    InitializeRoutingTableAck = 0x07,
    EstablishConnectionToNetwork = 0x08,
    DisconnectConnectionToNetwork = 0x09,
    WhatIsNetworkNumber = 0x12,
    NetworkNumberIs = 0x13,
}

impl TryFrom<u8> for NetworkMessageType {
    type Error = NetworkError;

    fn try_from(value: u8) -> Result<Self> {
        use NetworkMessageType::*;
        Ok(match value {
            0x00 => WhoIsRouterToNetwork,
            0x01 => IAmRouterToNetwork,
            0x02 => ICouldBeRouterToNetwork,
            0x03 => RejectMessageToNetwork,
            0x04 => RouterBusyToNetwork,
            0x05 => RouterAvailableToNetwork,
            0x06 => InitializeRoutingTable,
            0x07 => InitializeRoutingTableAck,
            0x08 => EstablishConnectionToNetwork,
            0x09 => DisconnectConnectionToNetwork,
            0x12 => WhatIsNetworkNumber,
            0x13 => NetworkNumberIs,
            other => {
                return Err(NetworkError::InvalidNpdu(format!(
                    "Unknown network message type 0x{:02X}",
                    other
                )))
            }
        })
    }
}

/// NPDU control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NpduControl {
    /// Network layer message
    pub network_message: bool,
    /// Destination specifier present
    pub destination_present: bool,
    /// Source specifier present
    pub source_present: bool,
    /// Data expecting reply
    pub expecting_reply: bool,
    /// Network priority (0-3)
    pub priority: u8,
}

impl NpduControl {
    /// Create control byte from flags
    pub fn to_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.network_message {
            byte |= 0x80;
        }
        if self.destination_present {
            byte |= 0x20;
        }
        if self.source_present {
            byte |= 0x08;
        }
        if self.expecting_reply {
            byte |= 0x04;
        }
        byte |= self.priority & 0x03;
        byte
    }

    /// Parse control byte into flags
    pub fn from_byte(byte: u8) -> Self {
        Self {
            network_message: (byte & 0x80) != 0,
            destination_present: (byte & 0x20) != 0,
            source_present: (byte & 0x08) != 0,
            expecting_reply: (byte & 0x04) != 0,
            priority: byte & 0x03,
        }
    }
}

/// Network address (network number + MAC address)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    /// Network number (0 = local network, 65535 = broadcast)
    pub network: u16,
    /// MAC address on that network, empty for a broadcast
    pub address: Vec<u8>,
}

impl NetworkAddress {
    /// Create a new network address
    pub fn new(network: u16, address: Vec<u8>) -> Self {
        Self { network, address }
    }

    /// Check if this is a broadcast address
    pub fn is_broadcast(&self) -> bool {
        self.network == 0xFFFF || self.address.is_empty()
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, hex::encode_upper(&self.address))
    }
}

/// Network Protocol Data Unit (NPDU) header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Npdu {
    /// Protocol version (always 1)
    pub version: u8,
    /// Control information
    pub control: NpduControl,
    /// Destination network address
    pub destination: Option<NetworkAddress>,
    /// Source network address
    pub source: Option<NetworkAddress>,
    /// Hop count (only present if destination is present)
    pub hop_count: Option<u8>,
    /// Message type of a network layer message
    pub message_type: Option<u8>,
}

impl Npdu {
    /// Create a new NPDU with default values
    pub fn new() -> Self {
        Self {
            version: crate::BACNET_PROTOCOL_VERSION,
            control: NpduControl::default(),
            destination: None,
            source: None,
            hop_count: None,
            message_type: None,
        }
    }

    /// Header for an APDU, optionally routed to a remote network.
    pub fn application(expecting_reply: bool, destination: Option<NetworkAddress>) -> Self {
        let hop_count = destination.as_ref().map(|_| 255);
        Self {
            control: NpduControl {
                destination_present: destination.is_some(),
                expecting_reply,
                ..Default::default()
            },
            destination,
            hop_count,
            ..Self::new()
        }
    }

    /// Header for an APDU broadcast to every network.
    pub fn global_broadcast() -> Self {
        Self::application(false, Some(NetworkAddress::new(0xFFFF, Vec::new())))
    }

    /// Check if this is a network layer message
    pub fn is_network_message(&self) -> bool {
        self.control.network_message
    }

    /// Encode NPDU to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(8);

        buffer.push(self.version);
        buffer.push(self.control.to_byte());

        if let Some(ref dest) = self.destination {
            buffer.extend_from_slice(&dest.network.to_be_bytes());
            buffer.push(dest.address.len() as u8);
            buffer.extend_from_slice(&dest.address);
        }

        if let Some(ref src) = self.source {
            buffer.extend_from_slice(&src.network.to_be_bytes());
            buffer.push(src.address.len() as u8);
            buffer.extend_from_slice(&src.address);
        }

        if self.destination.is_some() {
            buffer.push(self.hop_count.unwrap_or(255));
        }

        if let Some(message_type) = self.message_type {
            buffer.push(message_type);
        }

        buffer
    }

    /// Decode NPDU from bytes, returning the header and its length.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 2 {
            return Err(NetworkError::InvalidNpdu("NPDU too short".to_string()));
        }

        let version = data[0];
        if version != crate::BACNET_PROTOCOL_VERSION {
            return Err(NetworkError::UnsupportedVersion(version));
        }

        let control = NpduControl::from_byte(data[1]);
        let mut pos = 2;

        let destination = if control.destination_present {
            Some(decode_address(data, &mut pos, "destination")?)
        } else {
            None
        };

        let source = if control.source_present {
            let source = decode_address(data, &mut pos, "source")?;
            // SNET 0xFFFF and an empty SADR are not allowed in a source specifier
            if source.network == 0xFFFF || source.address.is_empty() {
                return Err(NetworkError::InvalidNpdu(
                    "Invalid source specifier".to_string(),
                ));
            }
            Some(source)
        } else {
            None
        };

        let hop_count = if destination.is_some() {
            let hc = *data
                .get(pos)
                .ok_or_else(|| NetworkError::InvalidNpdu("Missing hop count".to_string()))?;
            pos += 1;
            Some(hc)
        } else {
            None
        };

        let message_type = if control.network_message {
            let mt = *data
                .get(pos)
                .ok_or_else(|| NetworkError::InvalidNpdu("Missing message type".to_string()))?;
            pos += 1;
            // Proprietary network messages carry a vendor id
            if mt >= 0x80 {
                pos += 2;
            }
            Some(mt)
        } else {
            None
        };

        if pos > data.len() {
            return Err(NetworkError::InvalidNpdu("NPDU truncated".to_string()));
        }

        let npdu = Npdu {
            version,
            control,
            destination,
            source,
            hop_count,
            message_type,
        };

        Ok((npdu, pos))
    }
}

fn decode_address(data: &[u8], pos: &mut usize, which: &str) -> Result<NetworkAddress> {
    let header = data
        .get(*pos..*pos + 3)
        .ok_or_else(|| NetworkError::InvalidNpdu(format!("Invalid {} address", which)))?;
    let network = u16::from_be_bytes([header[0], header[1]]);
    let addr_len = header[2] as usize;
    *pos += 3;

    let address = data
        .get(*pos..*pos + addr_len)
        .ok_or_else(|| NetworkError::InvalidNpdu(format!("Invalid {} address length", which)))?
        .to_vec();
    *pos += addr_len;

    Ok(NetworkAddress::new(network, address))
}

impl Default for Npdu {
    fn default() -> Self {
        Self::new()
    }
}
