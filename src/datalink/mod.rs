//! BACnet Data Link Layer Module
//!
//! This module holds the data link layer: the part of the stack that moves a
//! complete NPDU between two stations on the same physical segment. Upper
//! layers only see the [`DataLink`] trait, so the client can be driven by a
//! real RS-485 port or by an in-memory peer in tests.
//!
//! # Overview
//!
//! The data link layer is responsible for:
//! - **Frame Assembly/Disassembly**: wrapping NPDUs in MS/TP frames and
//!   recovering them from the byte stream
//! - **Error Detection**: header and data CRC verification
//! - **Media Access Control**: token passing between the masters of the segment
//! - **Addressing**: one-octet MS/TP station addresses, 255 being broadcast
//!
//! # MS/TP (Master-Slave/Token-Passing, clause 9)
//!
//! - RS-485 serial communication, 9600 to 115200 baud
//! - Stations 0-127 may be masters, 128-254 are slaves
//! - A station may only transmit while it holds the token
//!
//! The MS/TP master node in [`mstp`] has no thread of its own. Its state
//! machine advances whenever [`DataLink::receive_frame`] is called, so the
//! caller must keep receiving for the node to take part in token passing.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use bacnet_mstp_loopback::datalink::{DataLink, DataLinkAddress};
//! use bacnet_mstp_loopback::datalink::mstp::{MstpConfig, MstpDataLink};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut link = MstpDataLink::open(MstpConfig::default())?;
//!
//! // Queue a broadcast; it goes out the next time this node holds the token
//! link.send_frame(&[0x01, 0x00, 0x10, 0x08], &DataLinkAddress::Broadcast, false)?;
//!
//! let mut buffer = [0u8; bacnet_mstp_loopback::BACNET_MAX_MPDU];
//! if let Some((len, source)) = link.receive_frame(&mut buffer, Duration::from_millis(100))? {
//!     println!("Received {} bytes from {}", len, source);
//! }
//! # Ok(())
//! # }
//! ```

use std::error::Error;
use std::fmt;
use std::time::Duration;

pub mod env;
pub mod mstp;

pub use mstp::{MstpConfig, MstpDataLink};

/// Result type for data link operations.
pub type Result<T> = std::result::Result<T, DataLinkError>;

/// Errors that can occur in data link operations.
#[derive(Debug)]
pub enum DataLinkError {
    /// I/O error on the underlying port
    IoError(std::io::Error),
    /// Invalid frame format or content
    InvalidFrame(String),
    /// Header or data CRC mismatch
    CrcError,
    /// Address outside the range the data link can reach
    AddressError(String),
    /// Frame data does not fit the data link or the caller's buffer
    FrameTooLarge(usize),
    /// Invalid data link configuration
    InvalidConfiguration(String),
}

impl fmt::Display for DataLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkError::IoError(e) => write!(f, "I/O error: {}", e),
            DataLinkError::InvalidFrame(msg) => write!(f, "Invalid frame: {}", msg),
            DataLinkError::CrcError => write!(f, "CRC error"),
            DataLinkError::AddressError(msg) => write!(f, "Address error: {}", msg),
            DataLinkError::FrameTooLarge(len) => write!(f, "Frame too large: {} bytes", len),
            DataLinkError::InvalidConfiguration(msg) => {
                write!(f, "Invalid data link configuration: {}", msg)
            }
        }
    }
}

impl Error for DataLinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataLinkError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DataLinkError {
    fn from(error: std::io::Error) -> Self {
        DataLinkError::IoError(error)
    }
}

/// Address of a station on the local segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataLinkAddress {
    /// MS/TP station address (0-254)
    MsTP(u8),
    /// Local broadcast
    Broadcast,
}

impl DataLinkAddress {
    /// MS/TP station address, 255 for broadcast
    pub fn mstp_station(&self) -> u8 {
        match self {
            DataLinkAddress::MsTP(station) => *station,
            DataLinkAddress::Broadcast => mstp::MSTP_BROADCAST_ADDRESS,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, DataLinkAddress::Broadcast)
    }
}

impl From<u8> for DataLinkAddress {
    fn from(station: u8) -> Self {
        if station == mstp::MSTP_BROADCAST_ADDRESS {
            DataLinkAddress::Broadcast
        } else {
            DataLinkAddress::MsTP(station)
        }
    }
}

impl fmt::Display for DataLinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkAddress::MsTP(station) => write!(f, "{:02X}", station),
            DataLinkAddress::Broadcast => write!(f, "FF"),
        }
    }
}

/// Common interface of every data link.
///
/// The network layer hands complete NPDUs to [`send_frame`](DataLink::send_frame)
/// and pulls them out of [`receive_frame`](DataLink::receive_frame). Framing,
/// CRCs and media access stay below this line.
pub trait DataLink {
    /// Queue an NPDU for `dest`.
    ///
    /// `expecting_reply` mirrors the NPDU control bit and selects the frame
    /// type on links that care (MS/TP Data-Expecting-Reply).
    fn send_frame(
        &mut self,
        frame: &[u8],
        dest: &DataLinkAddress,
        expecting_reply: bool,
    ) -> Result<()>;

    /// Wait up to `timeout` for the next NPDU addressed to this station or
    /// broadcast.
    ///
    /// The NPDU is copied into `buffer`; the length and sender are returned.
    /// `Ok(None)` means nothing arrived in time.
    fn receive_frame(
        &mut self,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, DataLinkAddress)>>;

    /// This station's own address
    fn local_address(&self) -> DataLinkAddress;
}

impl<T: DataLink + ?Sized> DataLink for Box<T> {
    fn send_frame(
        &mut self,
        frame: &[u8],
        dest: &DataLinkAddress,
        expecting_reply: bool,
    ) -> Result<()> {
        (**self).send_frame(frame, dest, expecting_reply)
    }

    fn receive_frame(
        &mut self,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<(usize, DataLinkAddress)>> {
        (**self).receive_frame(buffer, timeout)
    }

    fn local_address(&self) -> DataLinkAddress {
        (**self).local_address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_station() {
        assert_eq!(DataLinkAddress::from(5), DataLinkAddress::MsTP(5));
        assert_eq!(DataLinkAddress::from(255), DataLinkAddress::Broadcast);
        assert_eq!(DataLinkAddress::Broadcast.mstp_station(), 255);
        assert!(DataLinkAddress::Broadcast.is_broadcast());
        assert!(!DataLinkAddress::MsTP(0).is_broadcast());
    }

    #[test]
    fn test_address_display() {
        assert_eq!(DataLinkAddress::MsTP(0x0A).to_string(), "0A");
        assert_eq!(DataLinkAddress::Broadcast.to_string(), "FF");
    }

    #[test]
    fn test_io_error_source() {
        let error = DataLinkError::from(std::io::Error::new(std::io::ErrorKind::Other, "gone"));
        assert!(error.source().is_some());
        assert!(error.to_string().contains("gone"));
        assert!(DataLinkError::CrcError.source().is_none());
    }
}
