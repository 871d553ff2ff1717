//! BACnet Application Layer Module
//!
//! This module implements the application layer functionality for BACnet communication.
//! The application layer is responsible for forming and processing Application Protocol
//! Data Units (APDUs) that carry BACnet services.
//!
//! # Overview
//!
//! The application layer handles:
//! - APDU formation and parsing
//! - Transaction management for confirmed requests ([`tsm`])
//! - Error, reject and abort PDU processing
//!
//! Segmentation is not supported. Segmented PDUs are still decoded so that they
//! can be answered with an Abort.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp_loopback::app::*;
//!
//! let apdu = Apdu::UnconfirmedRequest {
//!     service_choice: 8,
//!     service_data: vec![],
//! };
//! assert_eq!(apdu.encode(), vec![0x10, 0x08]);
//! ```

use std::error::Error;
use std::fmt;

use crate::encoding::{decode_enumerated, encode_enumerated};

pub mod tsm;

pub use tsm::{Retransmit, TransactionManager, TransactionState};

/// Result type for application layer operations
pub type Result<T> = std::result::Result<T, ApplicationError>;

/// Errors that can occur in application layer operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    /// Invalid APDU format
    InvalidApdu(String),
    /// Unsupported APDU type
    UnsupportedApduType(u8),
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplicationError::InvalidApdu(msg) => write!(f, "Invalid APDU: {}", msg),
            ApplicationError::UnsupportedApduType(t) => write!(f, "Unsupported APDU type {}", t),
        }
    }
}

impl Error for ApplicationError {}

/// APDU types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApduType {
    ConfirmedRequest = 0,
    UnconfirmedRequest = 1,
    SimpleAck = 2,
    ComplexAck = 3,
    SegmentAck = 4,
    Error = 5,
    Reject = 6,
    Abort = 7,
}

impl TryFrom<u8> for ApduType {
    type Error = ApplicationError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApduType::ConfirmedRequest),
            1 => Ok(ApduType::UnconfirmedRequest),
            2 => Ok(ApduType::SimpleAck),
            3 => Ok(ApduType::ComplexAck),
            4 => Ok(ApduType::SegmentAck),
            5 => Ok(ApduType::Error),
            6 => Ok(ApduType::Reject),
            7 => Ok(ApduType::Abort),
            other => Err(ApplicationError::UnsupportedApduType(other)),
        }
    }
}

/// Application Protocol Data Unit
///
/// Service choices are kept as raw octets so that requests for services this
/// node does not know can still be answered with a Reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu {
    /// Confirmed service request
    ConfirmedRequest {
        segmented: bool,
        more_follows: bool,
        segmented_response_accepted: bool,
        max_segments: MaxSegments,
        max_response_size: MaxApduSize,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
        service_data: Vec<u8>,
    },

    /// Unconfirmed service request
    UnconfirmedRequest {
        service_choice: u8,
        service_data: Vec<u8>,
    },

    /// Simple acknowledgment
    SimpleAck { invoke_id: u8, service_choice: u8 },

    /// Complex acknowledgment
    ComplexAck {
        segmented: bool,
        more_follows: bool,
        invoke_id: u8,
        sequence_number: Option<u8>,
        proposed_window_size: Option<u8>,
        service_choice: u8,
        service_data: Vec<u8>,
    },

    /// Segment acknowledgment
    SegmentAck {
        negative: bool,
        server: bool,
        invoke_id: u8,
        sequence_number: u8,
        window_size: u8,
    },

    /// Error PDU; class and code are BACnetErrorClass / BACnetErrorCode values
    Error {
        invoke_id: u8,
        service_choice: u8,
        error_class: u32,
        error_code: u32,
    },

    /// Reject PDU
    Reject { invoke_id: u8, reject_reason: u8 },

    /// Abort PDU
    Abort {
        server: bool,
        invoke_id: u8,
        abort_reason: u8,
    },
}

/// Maximum segments that can be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSegments {
    Unspecified = 0,
    Two = 1,
    Four = 2,
    Eight = 3,
    Sixteen = 4,
    ThirtyTwo = 5,
    SixtyFour = 6,
    GreaterThan64 = 7,
}

impl From<u8> for MaxSegments {
    fn from(value: u8) -> Self {
        match value & 0x07 {
            1 => MaxSegments::Two,
            2 => MaxSegments::Four,
            3 => MaxSegments::Eight,
            4 => MaxSegments::Sixteen,
            5 => MaxSegments::ThirtyTwo,
            6 => MaxSegments::SixtyFour,
            7 => MaxSegments::GreaterThan64,
            _ => MaxSegments::Unspecified,
        }
    }
}

/// Maximum APDU size that can be accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxApduSize {
    Up50 = 0,
    Up128 = 1,
    Up206 = 2,
    Up480 = 3,
    Up1024 = 4,
    Up1476 = 5,
}

impl MaxApduSize {
    /// Get the actual size in bytes
    pub fn size(&self) -> usize {
        match self {
            MaxApduSize::Up50 => 50,
            MaxApduSize::Up128 => 128,
            MaxApduSize::Up206 => 206,
            MaxApduSize::Up480 => 480,
            MaxApduSize::Up1024 => 1024,
            MaxApduSize::Up1476 => 1476,
        }
    }

    /// Largest encoding that does not exceed `size` octets
    pub fn for_size(size: usize) -> Self {
        match size {
            0..=127 => MaxApduSize::Up50,
            128..=205 => MaxApduSize::Up128,
            206..=479 => MaxApduSize::Up206,
            480..=1023 => MaxApduSize::Up480,
            1024..=1475 => MaxApduSize::Up1024,
            _ => MaxApduSize::Up1476,
        }
    }
}

impl From<u8> for MaxApduSize {
    fn from(value: u8) -> Self {
        match value & 0x0F {
            1 => MaxApduSize::Up128,
            2 => MaxApduSize::Up206,
            3 => MaxApduSize::Up480,
            4 => MaxApduSize::Up1024,
            5 => MaxApduSize::Up1476,
            _ => MaxApduSize::Up50,
        }
    }
}

fn too_short(what: &str) -> ApplicationError {
    ApplicationError::InvalidApdu(format!("{} too short", what))
}

impl Apdu {
    /// Build an unsegmented confirmed request
    pub fn confirmed(
        invoke_id: u8,
        max_response_size: MaxApduSize,
        service_choice: u8,
        service_data: Vec<u8>,
    ) -> Self {
        Apdu::ConfirmedRequest {
            segmented: false,
            more_follows: false,
            segmented_response_accepted: false,
            max_segments: MaxSegments::Unspecified,
            max_response_size,
            invoke_id,
            sequence_number: None,
            proposed_window_size: None,
            service_choice,
            service_data,
        }
    }

    /// Invoke ID carried by every PDU type except unconfirmed requests
    pub fn invoke_id(&self) -> Option<u8> {
        match self {
            Apdu::ConfirmedRequest { invoke_id, .. }
            | Apdu::SimpleAck { invoke_id, .. }
            | Apdu::ComplexAck { invoke_id, .. }
            | Apdu::SegmentAck { invoke_id, .. }
            | Apdu::Error { invoke_id, .. }
            | Apdu::Reject { invoke_id, .. }
            | Apdu::Abort { invoke_id, .. } => Some(*invoke_id),
            Apdu::UnconfirmedRequest { .. } => None,
        }
    }

    /// Encode APDU to bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();

        match self {
            Apdu::ConfirmedRequest {
                segmented,
                more_follows,
                segmented_response_accepted,
                max_segments,
                max_response_size,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice,
                service_data,
            } => {
                let mut pdu_type = (ApduType::ConfirmedRequest as u8) << 4;
                if *segmented {
                    pdu_type |= 0x08;
                }
                if *more_follows {
                    pdu_type |= 0x04;
                }
                if *segmented_response_accepted {
                    pdu_type |= 0x02;
                }
                buffer.push(pdu_type);
                buffer.push(((*max_segments as u8) << 4) | (*max_response_size as u8));
                buffer.push(*invoke_id);

                if *segmented {
                    buffer.push(sequence_number.unwrap_or(0));
                    buffer.push(proposed_window_size.unwrap_or(1));
                }

                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }

            Apdu::UnconfirmedRequest {
                service_choice,
                service_data,
            } => {
                buffer.push((ApduType::UnconfirmedRequest as u8) << 4);
                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }

            Apdu::SimpleAck {
                invoke_id,
                service_choice,
            } => {
                buffer.push((ApduType::SimpleAck as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
            }

            Apdu::ComplexAck {
                segmented,
                more_follows,
                invoke_id,
                sequence_number,
                proposed_window_size,
                service_choice,
                service_data,
            } => {
                let mut pdu_type = (ApduType::ComplexAck as u8) << 4;
                if *segmented {
                    pdu_type |= 0x08;
                }
                if *more_follows {
                    pdu_type |= 0x04;
                }
                buffer.push(pdu_type);
                buffer.push(*invoke_id);

                if *segmented {
                    buffer.push(sequence_number.unwrap_or(0));
                    buffer.push(proposed_window_size.unwrap_or(1));
                }

                buffer.push(*service_choice);
                buffer.extend_from_slice(service_data);
            }

            Apdu::SegmentAck {
                negative,
                server,
                invoke_id,
                sequence_number,
                window_size,
            } => {
                let mut pdu_type = (ApduType::SegmentAck as u8) << 4;
                if *negative {
                    pdu_type |= 0x02;
                }
                if *server {
                    pdu_type |= 0x01;
                }
                buffer.push(pdu_type);
                buffer.push(*invoke_id);
                buffer.push(*sequence_number);
                buffer.push(*window_size);
            }

            Apdu::Error {
                invoke_id,
                service_choice,
                error_class,
                error_code,
            } => {
                buffer.push((ApduType::Error as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*service_choice);
                // Only fails on a tag number above 14, which never happens here
                let _ = encode_enumerated(&mut buffer, *error_class);
                let _ = encode_enumerated(&mut buffer, *error_code);
            }

            Apdu::Reject {
                invoke_id,
                reject_reason,
            } => {
                buffer.push((ApduType::Reject as u8) << 4);
                buffer.push(*invoke_id);
                buffer.push(*reject_reason);
            }

            Apdu::Abort {
                server,
                invoke_id,
                abort_reason,
            } => {
                let mut pdu_type = (ApduType::Abort as u8) << 4;
                if *server {
                    pdu_type |= 0x01;
                }
                buffer.push(pdu_type);
                buffer.push(*invoke_id);
                buffer.push(*abort_reason);
            }
        }

        buffer
    }

    /// Decode APDU from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        let pdu_type_byte = *data
            .first()
            .ok_or_else(|| ApplicationError::InvalidApdu("Empty APDU".to_string()))?;

        match ApduType::try_from(pdu_type_byte >> 4)? {
            ApduType::ConfirmedRequest => {
                if data.len() < 4 {
                    return Err(too_short("Confirmed request"));
                }

                let segmented = (pdu_type_byte & 0x08) != 0;
                let more_follows = (pdu_type_byte & 0x04) != 0;
                let segmented_response_accepted = (pdu_type_byte & 0x02) != 0;

                let max_info = data[1];
                let invoke_id = data[2];
                let mut pos = 3;

                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 6 {
                        return Err(too_short("Segmented confirmed request"));
                    }
                    pos += 2;
                    (Some(data[3]), Some(data[4]))
                } else {
                    (None, None)
                };

                let service_choice = data[pos];
                pos += 1;

                Ok(Apdu::ConfirmedRequest {
                    segmented,
                    more_follows,
                    segmented_response_accepted,
                    max_segments: MaxSegments::from(max_info >> 4),
                    max_response_size: MaxApduSize::from(max_info),
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                })
            }

            ApduType::UnconfirmedRequest => {
                if data.len() < 2 {
                    return Err(too_short("Unconfirmed request"));
                }

                Ok(Apdu::UnconfirmedRequest {
                    service_choice: data[1],
                    service_data: data[2..].to_vec(),
                })
            }

            ApduType::SimpleAck => {
                if data.len() < 3 {
                    return Err(too_short("SimpleAck"));
                }

                Ok(Apdu::SimpleAck {
                    invoke_id: data[1],
                    service_choice: data[2],
                })
            }

            ApduType::ComplexAck => {
                if data.len() < 3 {
                    return Err(too_short("ComplexAck"));
                }

                let segmented = (pdu_type_byte & 0x08) != 0;
                let more_follows = (pdu_type_byte & 0x04) != 0;
                let invoke_id = data[1];
                let mut pos = 2;

                let (sequence_number, proposed_window_size) = if segmented {
                    if data.len() < 5 {
                        return Err(too_short("Segmented ComplexAck"));
                    }
                    pos += 2;
                    (Some(data[2]), Some(data[3]))
                } else {
                    (None, None)
                };

                let service_choice = data[pos];
                pos += 1;

                Ok(Apdu::ComplexAck {
                    segmented,
                    more_follows,
                    invoke_id,
                    sequence_number,
                    proposed_window_size,
                    service_choice,
                    service_data: data[pos..].to_vec(),
                })
            }

            ApduType::SegmentAck => {
                if data.len() < 4 {
                    return Err(too_short("SegmentAck"));
                }

                Ok(Apdu::SegmentAck {
                    negative: (pdu_type_byte & 0x02) != 0,
                    server: (pdu_type_byte & 0x01) != 0,
                    invoke_id: data[1],
                    sequence_number: data[2],
                    window_size: data[3],
                })
            }

            ApduType::Error => {
                if data.len() < 3 {
                    return Err(too_short("Error PDU"));
                }

                let invoke_id = data[1];
                let service_choice = data[2];
                let (error_class, consumed) = decode_enumerated(&data[3..])
                    .map_err(|e| ApplicationError::InvalidApdu(format!("Error class: {}", e)))?;
                let (error_code, _) = decode_enumerated(&data[3 + consumed..])
                    .map_err(|e| ApplicationError::InvalidApdu(format!("Error code: {}", e)))?;

                Ok(Apdu::Error {
                    invoke_id,
                    service_choice,
                    error_class,
                    error_code,
                })
            }

            ApduType::Reject => {
                if data.len() < 3 {
                    return Err(too_short("Reject PDU"));
                }

                Ok(Apdu::Reject {
                    invoke_id: data[1],
                    reject_reason: data[2],
                })
            }

            ApduType::Abort => {
                if data.len() < 3 {
                    return Err(too_short("Abort PDU"));
                }

                Ok(Apdu::Abort {
                    server: (pdu_type_byte & 0x01) != 0,
                    invoke_id: data[1],
                    abort_reason: data[2],
                })
            }
        }
    }
}
