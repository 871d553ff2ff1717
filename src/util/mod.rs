//! Utility Functions Module
//!
//! Helpers shared by the protocol layers: the two MS/TP frame check sequences,
//! object identifier packing and hex formatting for frame tracing.
//!
//! # Example
//!
//! ```
//! use bacnet_mstp_loopback::util::{crc8_mstp_header, crc16_mstp_data};
//!
//! assert_eq!(crc8_mstp_header(b"123456789"), 0x89);
//! assert_eq!(crc16_mstp_data(b"123456789"), 0x906E);
//! ```

use crc::{Algorithm, Crc, CRC_16_IBM_SDLC};

pub mod enum_macros;

/// Array index meaning "the whole array" in ReadProperty requests.
pub const BACNET_ARRAY_ALL: u32 = 0xFFFF_FFFF;

/// MS/TP header check sequence (ASHRAE 135 Annex G.1).
///
/// Polynomial x^8 + x^7 + 1, processed LSB first, preset to all ones and
/// complemented before transmission.
pub const MSTP_HEADER_CRC: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x81,
    init: 0xFF,
    refin: true,
    refout: true,
    xorout: 0xFF,
    check: 0x89,
    residue: 0x55,
};

const HEADER_CRC: Crc<u8> = Crc::<u8>::new(&MSTP_HEADER_CRC);

/// The data CRC of Annex G.2 is CRC-CCITT in its X.25 form.
const DATA_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Calculate the header CRC over frame type, destination, source and length.
pub fn crc8_mstp_header(header: &[u8]) -> u8 {
    HEADER_CRC.checksum(header)
}

/// Calculate the CRC-16 for MS/TP data. Transmitted least significant octet first.
pub fn crc16_mstp_data(data: &[u8]) -> u16 {
    DATA_CRC.checksum(data)
}

/// Validate object instance number (must be 0-4194303)
pub fn is_valid_instance_number(instance: u32) -> bool {
    instance <= 0x3FFFFF
}

/// Convert object type and instance to object identifier (32-bit)
pub fn encode_object_id(object_type: u16, instance: u32) -> Option<u32> {
    if object_type > 0x3FF || instance > 0x3FFFFF {
        return None;
    }
    Some(((object_type as u32) << 22) | instance)
}

/// Decode object identifier to object type and instance
pub fn decode_object_id(object_id: u32) -> (u16, u32) {
    let object_type = (object_id >> 22) as u16;
    let instance = object_id & 0x3FFFFF;
    (object_type, instance)
}

/// Format bytes as space separated upper-case hex, truncated to `limit` octets.
pub fn hex_preview(data: &[u8], limit: usize) -> String {
    let shown = &data[..data.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 3 + 4);
    for (i, chunk) in hex::encode_upper(shown).as_bytes().chunks(2).enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(std::str::from_utf8(chunk).unwrap_or("??"));
    }
    if data.len() > limit {
        out.push_str(" ..");
    }
    out
}
