#![doc = include_str!("../README.md")]

pub mod app;
pub mod client;
pub mod config;
pub mod datalink;
pub mod encoding;
pub mod network;
pub mod object;
pub mod service;
pub mod util;

// Re-export main types without glob imports to avoid conflicts
pub use client::{Client, DeviceInfo, Event, LoopbackError};
pub use config::{ClientConfig, Environment, LoopbackConfig};
pub use datalink::{DataLink, DataLinkAddress, MstpConfig, MstpDataLink};
pub use encoding::{ApplicationTag, EncodingError};
pub use object::{ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue};
pub use service::{ConfirmedServiceChoice, ServiceError, UnconfirmedServiceChoice};

#[doc(hidden)]
pub mod __private {
    pub use pastey;
}

pub const BACNET_PROTOCOL_VERSION: u8 = 1;
/// Largest APDU carried unsegmented in an MS/TP frame
pub const BACNET_MAX_APDU: usize = 480;
/// Largest NPDU an MS/TP frame carries
pub const BACNET_MAX_MPDU: usize = datalink::mstp::MSTP_MAX_DATA_LENGTH;
/// Highest device instance, also the wildcard for "this device"
pub const BACNET_MAX_INSTANCE: u32 = 0x3F_FFFF;
