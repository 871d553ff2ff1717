//! BACnet Encoding/Decoding Module
//!
//! This module provides functionality for encoding and decoding BACnet protocol data.
//! It handles the serialization and deserialization of BACnet data types according
//! to ASHRAE 135 clause 20.2.
//!
//! # Overview
//!
//! The encoding module is responsible for:
//! - Converting BACnet primitive data types to/from wire format
//! - Application tags and context-specific tags
//! - Opening/closing tags of constructed data
//! - Decoding an arbitrary application-tagged value into a [`PropertyValue`]
//!
//! # Example
//!
//! ```
//! use bacnet_mstp_loopback::encoding::*;
//!
//! let mut buffer: Vec<u8> = Vec::new();
//! encode_enumerated(&mut buffer, 1).unwrap();
//! assert_eq!(buffer, vec![0x91, 0x01]);
//!
//! let (value, consumed) = decode_enumerated(&buffer).unwrap();
//! assert_eq!((value, consumed), (1, 2));
//! ```

use std::error::Error;
use std::fmt;

use crate::object::{Date, ObjectIdentifier, PropertyValue, Time};

/// Result type for encoding operations
pub type Result<T> = std::result::Result<T, EncodingError>;

/// Errors that can occur during encoding/decoding operations
#[derive(Debug, Clone, PartialEq)]
pub enum EncodingError {
    /// Buffer underflow during decoding
    BufferUnderflow,
    /// Invalid tag number encountered
    InvalidTag,
    /// Invalid length value
    InvalidLength,
    /// Invalid encoding format
    InvalidFormat(String),
    /// Value out of valid range
    ValueOutOfRange,
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::BufferUnderflow => write!(f, "Buffer underflow during decoding"),
            EncodingError::InvalidTag => write!(f, "Invalid tag number encountered"),
            EncodingError::InvalidLength => write!(f, "Invalid length value"),
            EncodingError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            EncodingError::ValueOutOfRange => write!(f, "Value out of valid range"),
        }
    }
}

impl Error for EncodingError {}

/// BACnet application tag numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApplicationTag {
    Null = 0,
    Boolean = 1,
    UnsignedInt = 2,
    SignedInt = 3,
    Real = 4,
    Double = 5,
    OctetString = 6,
    CharacterString = 7,
    BitString = 8,
    Enumerated = 9,
    Date = 10,
    Time = 11,
    ObjectIdentifier = 12,
}

impl TryFrom<u8> for ApplicationTag {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ApplicationTag::Null),
            1 => Ok(ApplicationTag::Boolean),
            2 => Ok(ApplicationTag::UnsignedInt),
            3 => Ok(ApplicationTag::SignedInt),
            4 => Ok(ApplicationTag::Real),
            5 => Ok(ApplicationTag::Double),
            6 => Ok(ApplicationTag::OctetString),
            7 => Ok(ApplicationTag::CharacterString),
            8 => Ok(ApplicationTag::BitString),
            9 => Ok(ApplicationTag::Enumerated),
            10 => Ok(ApplicationTag::Date),
            11 => Ok(ApplicationTag::Time),
            12 => Ok(ApplicationTag::ObjectIdentifier),
            _ => Err(EncodingError::InvalidTag),
        }
    }
}

/// Tag class bit (bit 3 of the initial octet)
const CONTEXT_SPECIFIC: u8 = 0x08;

/// What follows a decoded tag header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// Primitive data; for an application Boolean the length field is the value
    /// and no content octets follow.
    Primitive(usize),
    Opening,
    Closing,
}

/// A decoded tag header (clause 20.2.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub number: u8,
    pub context: bool,
    pub kind: TagKind,
}

impl TagHeader {
    /// Number of content octets following the header.
    pub fn content_length(&self) -> usize {
        match self.kind {
            TagKind::Primitive(_)
                if !self.context && self.number == ApplicationTag::Boolean as u8 =>
            {
                0
            }
            TagKind::Primitive(len) => len,
            TagKind::Opening | TagKind::Closing => 0,
        }
    }

    pub fn is_opening(&self, number: u8) -> bool {
        self.context && self.number == number && self.kind == TagKind::Opening
    }

    pub fn is_closing(&self, number: u8) -> bool {
        self.context && self.number == number && self.kind == TagKind::Closing
    }
}

/// Decode any tag header, returning it with the number of header octets.
pub fn decode_tag_header(data: &[u8]) -> Result<(TagHeader, usize)> {
    let first = *data.first().ok_or(EncodingError::BufferUnderflow)?;
    let context = first & CONTEXT_SPECIFIC != 0;
    let mut consumed = 1;

    let number = match first >> 4 {
        0x0F => {
            let extended = *data.get(1).ok_or(EncodingError::BufferUnderflow)?;
            consumed += 1;
            extended
        }
        n => n,
    };

    let lvt = first & 0x07;
    let kind = match lvt {
        6 if context => TagKind::Opening,
        7 if context => TagKind::Closing,
        5 => {
            let len_byte = *data.get(consumed).ok_or(EncodingError::BufferUnderflow)?;
            consumed += 1;
            let length = match len_byte {
                254 => {
                    let bytes = data
                        .get(consumed..consumed + 2)
                        .ok_or(EncodingError::BufferUnderflow)?;
                    consumed += 2;
                    u16::from_be_bytes([bytes[0], bytes[1]]) as usize
                }
                255 => {
                    let bytes = data
                        .get(consumed..consumed + 4)
                        .ok_or(EncodingError::BufferUnderflow)?;
                    consumed += 4;
                    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
                }
                n => n as usize,
            };
            TagKind::Primitive(length)
        }
        n => TagKind::Primitive(n as usize),
    };

    Ok((
        TagHeader {
            number,
            context,
            kind,
        },
        consumed,
    ))
}

fn encode_tag(buffer: &mut Vec<u8>, number: u8, context: bool, length: usize) -> Result<()> {
    if number > 14 {
        return Err(EncodingError::ValueOutOfRange);
    }

    let class = if context { CONTEXT_SPECIFIC } else { 0 };
    let lvt = if length < 5 { length as u8 } else { 5 };
    buffer.push((number << 4) | class | lvt);

    if length >= 5 {
        if length < 254 {
            buffer.push(length as u8);
        } else if length < 65536 {
            buffer.push(254);
            buffer.extend_from_slice(&(length as u16).to_be_bytes());
        } else {
            buffer.push(255);
            buffer.extend_from_slice(&(length as u32).to_be_bytes());
        }
    }

    Ok(())
}

/// Encode a BACnet application tag
pub fn encode_application_tag(
    buffer: &mut Vec<u8>,
    tag: ApplicationTag,
    length: usize,
) -> Result<()> {
    encode_tag(buffer, tag as u8, false, length)
}

/// Decode a BACnet application tag, returning (tag, length, header octets)
pub fn decode_application_tag(data: &[u8]) -> Result<(ApplicationTag, usize, usize)> {
    let (header, consumed) = decode_tag_header(data)?;
    if header.context {
        return Err(EncodingError::InvalidTag);
    }
    let length = match header.kind {
        TagKind::Primitive(len) => len,
        _ => return Err(EncodingError::InvalidTag),
    };
    Ok((ApplicationTag::try_from(header.number)?, length, consumed))
}

/// Encode a context-specific tag
pub fn encode_context_tag(buffer: &mut Vec<u8>, tag_number: u8, length: usize) -> Result<()> {
    encode_tag(buffer, tag_number, true, length)
}

/// Decode a context-specific tag with the expected number, returning (length, header octets)
pub fn decode_context_tag(data: &[u8], tag_number: u8) -> Result<(usize, usize)> {
    let (header, consumed) = decode_tag_header(data)?;
    match header.kind {
        TagKind::Primitive(len) if header.context && header.number == tag_number => {
            Ok((len, consumed))
        }
        _ => Err(EncodingError::InvalidTag),
    }
}

/// Encode opening tag for constructed data
pub fn encode_opening_tag(buffer: &mut Vec<u8>, tag_number: u8) -> Result<()> {
    if tag_number > 14 {
        return Err(EncodingError::ValueOutOfRange);
    }
    buffer.push((tag_number << 4) | 0x0E);
    Ok(())
}

/// Encode closing tag for constructed data
pub fn encode_closing_tag(buffer: &mut Vec<u8>, tag_number: u8) -> Result<()> {
    if tag_number > 14 {
        return Err(EncodingError::ValueOutOfRange);
    }
    buffer.push((tag_number << 4) | 0x0F);
    Ok(())
}

/// Check for an opening tag with the given number at the start of `data`
pub fn is_opening_tag(data: &[u8], tag_number: u8) -> bool {
    matches!(decode_tag_header(data), Ok((header, _)) if header.is_opening(tag_number))
}

/// Check for a closing tag with the given number at the start of `data`
pub fn is_closing_tag(data: &[u8], tag_number: u8) -> bool {
    matches!(decode_tag_header(data), Ok((header, _)) if header.is_closing(tag_number))
}

/// Split the content enclosed by opening/closing `tag_number` at the start of
/// `data`. Returns the enclosed octets and the total octets consumed including
/// both tags. Nested constructed data is skipped over.
pub fn decode_enclosed(data: &[u8], tag_number: u8) -> Result<(&[u8], usize)> {
    let (open, mut pos) = decode_tag_header(data)?;
    if !open.is_opening(tag_number) {
        return Err(EncodingError::InvalidTag);
    }

    let start = pos;
    let mut depth = 0usize;
    while pos < data.len() {
        let (header, consumed) = decode_tag_header(&data[pos..])?;
        match header.kind {
            TagKind::Opening => depth += 1,
            TagKind::Closing if depth == 0 => {
                if header.number != tag_number {
                    return Err(EncodingError::InvalidTag);
                }
                return Ok((&data[start..pos], pos + consumed));
            }
            TagKind::Closing => depth -= 1,
            TagKind::Primitive(_) => {}
        }
        pos += consumed + header.content_length();
    }

    Err(EncodingError::BufferUnderflow)
}

fn minimal_be_bytes(value: u32) -> Vec<u8> {
    if value <= 0xFF {
        vec![value as u8]
    } else if value <= 0xFFFF {
        (value as u16).to_be_bytes().to_vec()
    } else if value <= 0xFFFFFF {
        value.to_be_bytes()[1..].to_vec()
    } else {
        value.to_be_bytes().to_vec()
    }
}

fn decode_be_unsigned(content: &[u8]) -> Result<u32> {
    if content.is_empty() || content.len() > 4 {
        return Err(EncodingError::InvalidLength);
    }
    Ok(content.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

fn content<'a>(data: &'a [u8], consumed: usize, length: usize) -> Result<&'a [u8]> {
    data.get(consumed..consumed + length)
        .ok_or(EncodingError::BufferUnderflow)
}

/// Encode a BACnet null value
pub fn encode_null(buffer: &mut Vec<u8>) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Null, 0)
}

/// Encode a BACnet boolean value
pub fn encode_boolean(buffer: &mut Vec<u8>, value: bool) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Boolean, if value { 1 } else { 0 })
}

/// Decode a BACnet boolean value
pub fn decode_boolean(data: &[u8]) -> Result<(bool, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Boolean {
        return Err(EncodingError::InvalidTag);
    }

    let value = match length {
        0 => false,
        1 => true,
        _ => return Err(EncodingError::InvalidLength),
    };

    Ok((value, consumed))
}

/// Encode a BACnet unsigned integer
pub fn encode_unsigned(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    let bytes = minimal_be_bytes(value);
    encode_application_tag(buffer, ApplicationTag::UnsignedInt, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a BACnet unsigned integer
pub fn decode_unsigned(data: &[u8]) -> Result<(u32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::UnsignedInt {
        return Err(EncodingError::InvalidTag);
    }

    let value = decode_be_unsigned(content(data, consumed, length)?)?;
    Ok((value, consumed + length))
}

/// Encode a BACnet signed integer
pub fn encode_signed(buffer: &mut Vec<u8>, value: i32) -> Result<()> {
    let bytes = if (-128..=127).contains(&value) {
        vec![value as u8]
    } else if (-32768..=32767).contains(&value) {
        (value as i16).to_be_bytes().to_vec()
    } else if (-8388608..=8388607).contains(&value) {
        value.to_be_bytes()[1..].to_vec()
    } else {
        value.to_be_bytes().to_vec()
    };

    encode_application_tag(buffer, ApplicationTag::SignedInt, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a BACnet signed integer
pub fn decode_signed(data: &[u8]) -> Result<(i32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::SignedInt {
        return Err(EncodingError::InvalidTag);
    }

    let bytes = content(data, consumed, length)?;
    if bytes.is_empty() || bytes.len() > 4 {
        return Err(EncodingError::InvalidLength);
    }
    let sign = if bytes[0] & 0x80 != 0 { -1i32 } else { 0 };
    let value = bytes.iter().fold(sign, |acc, &b| (acc << 8) | b as i32);

    Ok((value, consumed + length))
}

/// Encode a BACnet real (float) value
pub fn encode_real(buffer: &mut Vec<u8>, value: f32) -> Result<()> {
    encode_application_tag(buffer, ApplicationTag::Real, 4)?;
    buffer.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Decode a BACnet real (float) value
pub fn decode_real(data: &[u8]) -> Result<(f32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Real {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }

    let b = content(data, consumed, 4)?;
    Ok((f32::from_be_bytes([b[0], b[1], b[2], b[3]]), consumed + 4))
}

/// Decode a BACnet double (64-bit float)
pub fn decode_double(data: &[u8]) -> Result<(f64, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Double {
        return Err(EncodingError::InvalidTag);
    }
    if length != 8 {
        return Err(EncodingError::InvalidLength);
    }

    let b = content(data, consumed, 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Ok((f64::from_be_bytes(raw), consumed + 8))
}

/// Decode a BACnet octet string
pub fn decode_octet_string(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::OctetString {
        return Err(EncodingError::InvalidTag);
    }

    let value = content(data, consumed, length)?.to_vec();
    Ok((value, consumed + length))
}

/// Character sets of clause 20.2.9
const CHARSET_UTF8: u8 = 0;
const CHARSET_UCS2: u8 = 4;
const CHARSET_ISO_8859_1: u8 = 5;

/// Encode a BACnet character string (UTF-8 character set)
pub fn encode_character_string(buffer: &mut Vec<u8>, value: &str) -> Result<()> {
    let string_bytes = value.as_bytes();
    encode_application_tag(buffer, ApplicationTag::CharacterString, string_bytes.len() + 1)?;
    buffer.push(CHARSET_UTF8);
    buffer.extend_from_slice(string_bytes);
    Ok(())
}

/// Decode a BACnet character string
pub fn decode_character_string(data: &[u8]) -> Result<(String, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::CharacterString {
        return Err(EncodingError::InvalidTag);
    }
    if length == 0 {
        return Err(EncodingError::InvalidLength);
    }

    let bytes = content(data, consumed, length)?;
    let (charset, text) = (bytes[0], &bytes[1..]);
    let value = match charset {
        CHARSET_UTF8 => String::from_utf8(text.to_vec())
            .map_err(|_| EncodingError::InvalidFormat("Invalid UTF-8 string".to_string()))?,
        CHARSET_UCS2 => {
            let (decoded, _, had_errors) = encoding_rs::UTF_16BE.decode(text);
            if had_errors {
                return Err(EncodingError::InvalidFormat("Invalid UCS-2 string".to_string()));
            }
            decoded.into_owned()
        }
        CHARSET_ISO_8859_1 => encoding_rs::WINDOWS_1252.decode(text).0.into_owned(),
        other => {
            return Err(EncodingError::InvalidFormat(format!(
                "Unsupported character set {}",
                other
            )))
        }
    };

    Ok((value, consumed + length))
}

/// Decode a BACnet bit string
pub fn decode_bit_string(data: &[u8]) -> Result<(Vec<bool>, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::BitString {
        return Err(EncodingError::InvalidTag);
    }
    if length == 0 {
        return Err(EncodingError::InvalidLength);
    }

    let bytes = content(data, consumed, length)?;
    let unused = bytes[0] as usize;
    if unused > 7 {
        return Err(EncodingError::InvalidFormat("Bit string unused bits > 7".to_string()));
    }
    let total = (length - 1) * 8;
    let bits = (0..total.saturating_sub(unused))
        .map(|i| bytes[1 + i / 8] & (0x80 >> (i % 8)) != 0)
        .collect();

    Ok((bits, consumed + length))
}

/// Encode a BACnet bit string
pub fn encode_bit_string(buffer: &mut Vec<u8>, bits: &[bool]) -> Result<()> {
    let octets = bits.len().div_ceil(8);
    let unused = (octets * 8 - bits.len()) as u8;
    encode_application_tag(buffer, ApplicationTag::BitString, octets + 1)?;
    buffer.push(unused);
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .fold(0u8, |acc, (i, _)| acc | (0x80 >> i));
        buffer.push(byte);
    }
    Ok(())
}

/// Encode a BACnet enumerated value
pub fn encode_enumerated(buffer: &mut Vec<u8>, value: u32) -> Result<()> {
    let bytes = minimal_be_bytes(value);
    encode_application_tag(buffer, ApplicationTag::Enumerated, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a BACnet enumerated value
pub fn decode_enumerated(data: &[u8]) -> Result<(u32, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Enumerated {
        return Err(EncodingError::InvalidTag);
    }

    let value = decode_be_unsigned(content(data, consumed, length)?)?;
    Ok((value, consumed + length))
}

/// Decode a BACnet date
pub fn decode_date(data: &[u8]) -> Result<(Date, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Date {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }

    let b = content(data, consumed, 4)?;
    let year = if b[0] == 255 { 255 } else { 1900 + b[0] as u16 };
    Ok((
        Date {
            year,
            month: b[1],
            day: b[2],
            weekday: b[3],
        },
        consumed + 4,
    ))
}

/// Decode a BACnet time
pub fn decode_time(data: &[u8]) -> Result<(Time, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::Time {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }

    let b = content(data, consumed, 4)?;
    Ok((
        Time {
            hour: b[0],
            minute: b[1],
            second: b[2],
            hundredths: b[3],
        },
        consumed + 4,
    ))
}

/// Encode a BACnet object identifier
pub fn encode_object_identifier(
    buffer: &mut Vec<u8>,
    object_type: u16,
    instance: u32,
) -> Result<()> {
    let object_id = crate::util::encode_object_id(object_type, instance)
        .ok_or(EncodingError::ValueOutOfRange)?;
    encode_application_tag(buffer, ApplicationTag::ObjectIdentifier, 4)?;
    buffer.extend_from_slice(&object_id.to_be_bytes());
    Ok(())
}

/// Decode a BACnet object identifier
pub fn decode_object_identifier(data: &[u8]) -> Result<((u16, u32), usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    if tag != ApplicationTag::ObjectIdentifier {
        return Err(EncodingError::InvalidTag);
    }
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }

    let b = content(data, consumed, 4)?;
    let object_id = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    Ok((crate::util::decode_object_id(object_id), consumed + 4))
}

/// Encode a context tagged unsigned integer
pub fn encode_context_unsigned(buffer: &mut Vec<u8>, tag_number: u8, value: u32) -> Result<()> {
    let bytes = minimal_be_bytes(value);
    encode_context_tag(buffer, tag_number, bytes.len())?;
    buffer.extend_from_slice(&bytes);
    Ok(())
}

/// Decode a context tagged unsigned integer
pub fn decode_context_unsigned(data: &[u8], tag_number: u8) -> Result<(u32, usize)> {
    let (length, consumed) = decode_context_tag(data, tag_number)?;
    let value = decode_be_unsigned(content(data, consumed, length)?)?;
    Ok((value, consumed + length))
}

/// Encode a context tagged enumerated value
pub fn encode_context_enumerated(buffer: &mut Vec<u8>, tag_number: u8, value: u32) -> Result<()> {
    encode_context_unsigned(buffer, tag_number, value)
}

/// Decode a context tagged enumerated value
pub fn decode_context_enumerated(data: &[u8], tag_number: u8) -> Result<(u32, usize)> {
    decode_context_unsigned(data, tag_number)
}

/// Encode a context tagged object identifier
pub fn encode_context_object_id(
    buffer: &mut Vec<u8>,
    tag_number: u8,
    object_type: u16,
    instance: u32,
) -> Result<()> {
    let object_id = crate::util::encode_object_id(object_type, instance)
        .ok_or(EncodingError::ValueOutOfRange)?;
    encode_context_tag(buffer, tag_number, 4)?;
    buffer.extend_from_slice(&object_id.to_be_bytes());
    Ok(())
}

/// Decode a context tagged object identifier
pub fn decode_context_object_id(data: &[u8], tag_number: u8) -> Result<((u16, u32), usize)> {
    let (length, consumed) = decode_context_tag(data, tag_number)?;
    if length != 4 {
        return Err(EncodingError::InvalidLength);
    }
    let b = content(data, consumed, 4)?;
    let object_id = u32::from_be_bytes([b[0], b[1], b[2], b[3]]);
    Ok((crate::util::decode_object_id(object_id), consumed + 4))
}

/// Decode one application tagged value of any type.
pub fn decode_application_value(data: &[u8]) -> Result<(PropertyValue, usize)> {
    let (tag, length, consumed) = decode_application_tag(data)?;

    match tag {
        ApplicationTag::Null => Ok((PropertyValue::Null, consumed)),
        ApplicationTag::Boolean => {
            decode_boolean(data).map(|(v, n)| (PropertyValue::Boolean(v), n))
        }
        ApplicationTag::UnsignedInt => {
            decode_unsigned(data).map(|(v, n)| (PropertyValue::UnsignedInteger(v), n))
        }
        ApplicationTag::SignedInt => {
            decode_signed(data).map(|(v, n)| (PropertyValue::SignedInt(v), n))
        }
        ApplicationTag::Real => decode_real(data).map(|(v, n)| (PropertyValue::Real(v), n)),
        ApplicationTag::Double => decode_double(data).map(|(v, n)| (PropertyValue::Double(v), n)),
        ApplicationTag::OctetString => {
            decode_octet_string(data).map(|(v, n)| (PropertyValue::OctetString(v), n))
        }
        ApplicationTag::CharacterString => {
            decode_character_string(data).map(|(v, n)| (PropertyValue::CharacterString(v), n))
        }
        ApplicationTag::BitString => {
            decode_bit_string(data).map(|(v, n)| (PropertyValue::BitString(v), n))
        }
        ApplicationTag::Enumerated => {
            decode_enumerated(data).map(|(v, n)| (PropertyValue::Enumerated(v), n))
        }
        ApplicationTag::Date => decode_date(data).map(|(v, n)| (PropertyValue::Date(v), n)),
        ApplicationTag::Time => decode_time(data).map(|(v, n)| (PropertyValue::Time(v), n)),
        ApplicationTag::ObjectIdentifier => {
            let ((object_type, instance), n) = decode_object_identifier(data)?;
            let id = ObjectIdentifier::new(object_type.into(), instance);
            debug_assert_eq!(n, consumed + length);
            Ok((PropertyValue::ObjectIdentifier(id), n))
        }
    }
}

/// Encode a property value with its application tag. Only the value kinds the
/// local device object produces are supported.
pub fn encode_application_value(buffer: &mut Vec<u8>, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Null => encode_null(buffer),
        PropertyValue::Boolean(v) => encode_boolean(buffer, *v),
        PropertyValue::UnsignedInteger(v) => encode_unsigned(buffer, *v),
        PropertyValue::SignedInt(v) => encode_signed(buffer, *v),
        PropertyValue::Real(v) => encode_real(buffer, *v),
        PropertyValue::CharacterString(v) => encode_character_string(buffer, v),
        PropertyValue::BitString(v) => encode_bit_string(buffer, v),
        PropertyValue::Enumerated(v) => encode_enumerated(buffer, *v),
        PropertyValue::ObjectIdentifier(id) => {
            encode_object_identifier(buffer, id.object_type.into(), id.instance)
        }
        PropertyValue::Array(items) => items
            .iter()
            .try_for_each(|item| encode_application_value(buffer, item)),
        other => Err(EncodingError::InvalidFormat(format!(
            "Encoding of {:?} is not supported",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;

    #[test]
    fn test_encode_decode_boolean() {
        let mut buffer = Vec::new();

        encode_boolean(&mut buffer, true).unwrap();
        assert_eq!(buffer, vec![0x11]);
        let (value, consumed) = decode_boolean(&buffer).unwrap();
        assert!(value);
        assert_eq!(consumed, 1);

        buffer.clear();
        encode_boolean(&mut buffer, false).unwrap();
        let (value, _) = decode_boolean(&buffer).unwrap();
        assert!(!value);
    }

    #[test]
    fn test_encode_decode_unsigned() {
        let mut buffer = Vec::new();
        let test_values = [0, 255, 256, 65535, 16777215, 4294967295];

        for &test_value in &test_values {
            buffer.clear();
            encode_unsigned(&mut buffer, test_value).unwrap();
            let (value, consumed) = decode_unsigned(&buffer).unwrap();
            assert_eq!(value, test_value);
            assert_eq!(consumed, buffer.len());
        }
    }

    #[test]
    fn test_encode_decode_signed() {
        let mut buffer = Vec::new();
        let test_values = [-128, -1, 0, 1, 127, -32768, 32767, -8388608, 8388607, i32::MIN];

        for &test_value in &test_values {
            buffer.clear();
            encode_signed(&mut buffer, test_value).unwrap();
            let (value, _) = decode_signed(&buffer).unwrap();
            assert_eq!(value, test_value);
        }
    }

    #[test]
    fn test_character_string_charsets() {
        let mut buffer = Vec::new();
        encode_character_string(&mut buffer, "Loopback Tester").unwrap();
        let (value, consumed) = decode_character_string(&buffer).unwrap();
        assert_eq!(value, "Loopback Tester");
        assert_eq!(consumed, buffer.len());

        // UCS-2 "AB"
        let ucs2 = [0x75, 0x05, 0x04, 0x00, 0x41, 0x00, 0x42];
        assert_eq!(decode_character_string(&ucs2).unwrap().0, "AB");

        // ISO 8859-1 "é"
        let latin = [0x73, 0x05, 0xE9];
        assert_eq!(decode_character_string(&latin).unwrap().0, "é");
    }

    #[test]
    fn test_extended_length_tag() {
        let mut buffer = Vec::new();
        let text = "x".repeat(300);
        encode_character_string(&mut buffer, &text).unwrap();
        assert_eq!(&buffer[..4], &[0x75, 254, 0x01, 0x2D]);
        assert_eq!(decode_character_string(&buffer).unwrap().0, text);
    }

    #[test]
    fn test_context_tags() {
        let mut buffer = Vec::new();
        encode_context_object_id(&mut buffer, 0, ObjectType::BinaryOutput.into(), 1).unwrap();
        assert_eq!(buffer, vec![0x0C, 0x01, 0x00, 0x00, 0x01]);

        buffer.clear();
        encode_context_enumerated(&mut buffer, 1, 85).unwrap();
        assert_eq!(buffer, vec![0x19, 0x55]);
        assert_eq!(decode_context_enumerated(&buffer, 1).unwrap(), (85, 2));
        assert_eq!(decode_context_enumerated(&buffer, 2), Err(EncodingError::InvalidTag));

        buffer.clear();
        encode_context_unsigned(&mut buffer, 2, 4194303).unwrap();
        assert_eq!(buffer, vec![0x2B, 0x3F, 0xFF, 0xFF]);
    }

    #[test]
    fn test_application_tag_rejects_context_class() {
        assert_eq!(decode_unsigned(&[0x19, 0x01]), Err(EncodingError::InvalidTag));
        assert_eq!(decode_enumerated(&[0x91]), Err(EncodingError::BufferUnderflow));
    }

    #[test]
    fn test_decode_enclosed_skips_nested_values() {
        // [3] { Enumerated 0x3F, [0] { } } followed by an unsigned
        let data = [0x3E, 0x91, 0x3F, 0x0E, 0x0F, 0x3F, 0x21, 0x05];
        let (inner, consumed) = decode_enclosed(&data, 3).unwrap();
        assert_eq!(inner, &[0x91, 0x3F, 0x0E, 0x0F]);
        assert_eq!(consumed, 6);
        assert!(is_opening_tag(&data, 3));
        assert!(is_closing_tag(&data[5..], 3));

        assert!(decode_enclosed(&data[..4], 3).is_err());
    }

    #[test]
    fn test_decode_application_value_variants() {
        let (value, n) = decode_application_value(&[0x91, 0x01]).unwrap();
        assert_eq!(value, PropertyValue::Enumerated(1));
        assert_eq!(n, 2);

        let (value, _) = decode_application_value(&[0x44, 0x42, 0x28, 0x00, 0x00]).unwrap();
        assert_eq!(value, PropertyValue::Real(42.0));

        let (value, _) = decode_application_value(&[0x82, 0x05, 0xA0]).unwrap();
        assert_eq!(value, PropertyValue::BitString(vec![true, false, true]));

        let (value, _) = decode_application_value(&[0xC4, 0x02, 0x00, 0x00, 0x07]).unwrap();
        assert_eq!(
            value,
            PropertyValue::ObjectIdentifier(ObjectIdentifier::new(ObjectType::Device, 7))
        );

        let (value, n) = decode_application_value(&[0x00]).unwrap();
        assert_eq!((value, n), (PropertyValue::Null, 1));
    }

    #[test]
    fn test_encode_application_value() {
        let mut buffer = Vec::new();
        encode_application_value(&mut buffer, &PropertyValue::Enumerated(1)).unwrap();
        encode_application_value(&mut buffer, &PropertyValue::UnsignedInteger(480)).unwrap();
        assert_eq!(buffer, vec![0x91, 0x01, 0x22, 0x01, 0xE0]);
        assert!(encode_application_value(&mut buffer, &PropertyValue::Double(1.0)).is_err());
    }

    #[test]
    fn test_bit_string() {
        let mut buffer = Vec::new();
        let bits = vec![true, false, true, false, false, false, false, false, true];
        encode_bit_string(&mut buffer, &bits).unwrap();
        assert_eq!(buffer, vec![0x83, 0x07, 0xA0, 0x80]);
        assert_eq!(decode_bit_string(&buffer).unwrap().0, bits);
    }
}
