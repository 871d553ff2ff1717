//! BACnet Object Types and Property Values
//!
//! The subset of the BACnet object model this crate works with: object
//! identifiers, the open object-type and property-identifier enumerations,
//! decoded property values and the enumerations the Device object reports.
//!
//! # Examples
//!
//! ```rust
//! use bacnet_mstp_loopback::object::{ObjectIdentifier, ObjectType, PropertyIdentifier};
//!
//! let relay = ObjectIdentifier::new(ObjectType::BinaryOutput, 1);
//! assert_eq!(u32::from(relay), 0x0100_0001);
//! assert_eq!(ObjectIdentifier::from(0x0100_0001), relay);
//!
//! assert_eq!(u32::from(PropertyIdentifier::PresentValue), 85);
//! ```

use bitflags::bitflags;
use std::error::Error;
use std::fmt;

/// Result type for object operations
pub type Result<T> = std::result::Result<T, ObjectError>;

/// Errors that can occur with object operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// No such object in this device
    UnknownObject,
    /// The object has no such property
    UnknownProperty,
    /// An array index was given for a property that is not an array
    PropertyIsNotAnArray,
    /// Array index beyond the end of the array
    InvalidArrayIndex,
    /// Invalid object configuration
    InvalidConfiguration(String),
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectError::UnknownObject => write!(f, "Unknown object"),
            ObjectError::UnknownProperty => write!(f, "Unknown property"),
            ObjectError::PropertyIsNotAnArray => write!(f, "Property is not an array"),
            ObjectError::InvalidArrayIndex => write!(f, "Invalid array index"),
            ObjectError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl Error for ObjectError {}

/// Object identifier (type + instance number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectIdentifier {
    pub object_type: ObjectType,
    pub instance: u32,
}

impl ObjectIdentifier {
    /// Create a new object identifier
    pub fn new(object_type: ObjectType, instance: u32) -> Self {
        Self {
            object_type,
            instance,
        }
    }

    /// Check if instance number is valid (0-4194303)
    pub fn is_valid(&self) -> bool {
        crate::util::is_valid_instance_number(self.instance)
    }
}

impl From<u32> for ObjectIdentifier {
    /// Convert from 32-bit object identifier.
    /// See clause 20.2.14 of the BACnet specification.
    fn from(value: u32) -> Self {
        let (object_type, instance) = crate::util::decode_object_id(value);
        Self::new(object_type.into(), instance)
    }
}

impl From<ObjectIdentifier> for u32 {
    /// Convert to 32-bit object identifier.
    /// See clause 20.2.14 of the BACnet specification.
    fn from(value: ObjectIdentifier) -> Self {
        let object_type: u16 = value.object_type.into();
        ((object_type as u32 & 0x3FF) << 22) | (value.instance & 0x3FFFFF)
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.instance)
    }
}

/// Property values can be of various types
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    UnsignedInteger(u32),
    SignedInt(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString(Vec<bool>),
    Enumerated(u32),
    Date(Date),
    Time(Time),
    ObjectIdentifier(ObjectIdentifier),
    Array(Vec<PropertyValue>),
}

impl PropertyValue {
    /// The numeric content of an Enumerated, Unsigned or Boolean value.
    ///
    /// Binary present values arrive as Enumerated but some devices answer
    /// with Unsigned or Boolean.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            PropertyValue::Enumerated(v) | PropertyValue::UnsignedInteger(v) => Some(*v),
            PropertyValue::Boolean(v) => Some(*v as u32),
            _ => None,
        }
    }
}

/// BACnet date representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: u16,   // 1900-2154, 255 = unspecified
    pub month: u8,   // 1-12, 13 = odd months, 14 = even months, 255 = unspecified
    pub day: u8,     // 1-31, 32 = last day of month, 255 = unspecified
    pub weekday: u8, // 1-7 (Mon-Sun), 255 = unspecified
}

/// BACnet time representation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub hour: u8,       // 0-23, 255 = unspecified
    pub minute: u8,     // 0-59, 255 = unspecified
    pub second: u8,     // 0-59, 255 = unspecified
    pub hundredths: u8, // 0-99, 255 = unspecified
}

/// Device status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DeviceStatus {
    Operational = 0,
    OperationalReadOnly = 1,
    DownloadRequired = 2,
    DownloadInProgress = 3,
    NonOperational = 4,
    BackupInProgress = 5,
}

/// Segmentation support enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Segmentation {
    Both = 0,
    Transmit = 1,
    Receive = 2,
    NoSegmentation = 3,
}

impl TryFrom<u32> for Segmentation {
    type Error = ObjectError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Both),
            1 => Ok(Self::Transmit),
            2 => Ok(Self::Receive),
            3 => Ok(Self::NoSegmentation),
            _ => Err(ObjectError::InvalidConfiguration(format!(
                "Unknown segmentation: {}",
                value
            ))),
        }
    }
}

impl fmt::Display for Segmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Both => write!(f, "Both"),
            Self::Transmit => write!(f, "Transmit"),
            Self::Receive => write!(f, "Receive"),
            Self::NoSegmentation => write!(f, "None"),
        }
    }
}

/// Binary present value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BinaryPV {
    Inactive = 0,
    Active = 1,
}

impl From<bool> for BinaryPV {
    fn from(value: bool) -> Self {
        if value {
            BinaryPV::Active
        } else {
            BinaryPV::Inactive
        }
    }
}

impl TryFrom<u32> for BinaryPV {
    type Error = ObjectError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(BinaryPV::Inactive),
            1 => Ok(BinaryPV::Active),
            _ => Err(ObjectError::InvalidConfiguration(format!(
                "Binary value out of range: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// Protocol services supported bitfield, bit numbers per clause 21
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct ProtocolServicesSupported: u64 {
        const ACKNOWLEDGE_ALARM = 1 << 0;
        const CONFIRMED_COV_NOTIFICATION = 1 << 1;
        const CONFIRMED_EVENT_NOTIFICATION = 1 << 2;
        const GET_ALARM_SUMMARY = 1 << 3;
        const GET_ENROLLMENT_SUMMARY = 1 << 4;
        const SUBSCRIBE_COV = 1 << 5;
        const ATOMIC_READ_FILE = 1 << 6;
        const ATOMIC_WRITE_FILE = 1 << 7;
        const ADD_LIST_ELEMENT = 1 << 8;
        const REMOVE_LIST_ELEMENT = 1 << 9;
        const CREATE_OBJECT = 1 << 10;
        const DELETE_OBJECT = 1 << 11;
        const READ_PROPERTY = 1 << 12;
        const READ_PROPERTY_CONDITIONAL = 1 << 13;
        const READ_PROPERTY_MULTIPLE = 1 << 14;
        const WRITE_PROPERTY = 1 << 15;
        const WRITE_PROPERTY_MULTIPLE = 1 << 16;
        const DEVICE_COMMUNICATION_CONTROL = 1 << 17;
        const CONFIRMED_PRIVATE_TRANSFER = 1 << 18;
        const CONFIRMED_TEXT_MESSAGE = 1 << 19;
        const REINITIALIZE_DEVICE = 1 << 20;
        const VT_OPEN = 1 << 21;
        const VT_CLOSE = 1 << 22;
        const VT_DATA = 1 << 23;
        const I_AM = 1 << 26;
        const I_HAVE = 1 << 27;
        const UNCONFIRMED_COV_NOTIFICATION = 1 << 28;
        const UNCONFIRMED_EVENT_NOTIFICATION = 1 << 29;
        const UNCONFIRMED_PRIVATE_TRANSFER = 1 << 30;
        const UNCONFIRMED_TEXT_MESSAGE = 1 << 31;
        const TIME_SYNCHRONIZATION = 1 << 32;
        const WHO_HAS = 1 << 33;
        const WHO_IS = 1 << 34;
        const READ_RANGE = 1 << 35;
        const UTC_TIME_SYNCHRONIZATION = 1 << 36;
        const LIFE_SAFETY_OPERATION = 1 << 37;
        const SUBSCRIBE_COV_PROPERTY = 1 << 38;
        const GET_EVENT_INFORMATION = 1 << 39;
        const WRITE_GROUP = 1 << 40;
    }
}

impl ProtocolServicesSupported {
    /// Number of services defined at protocol revision 14.
    pub const BIT_COUNT: usize = 41;

    pub fn to_bool_vec(&self) -> Vec<bool> {
        (0..Self::BIT_COUNT)
            .map(|i| (self.bits() & (1 << i)) != 0)
            .collect()
    }
}

impl From<&[bool]> for ProtocolServicesSupported {
    fn from(value: &[bool]) -> Self {
        let bits = value
            .iter()
            .take(64)
            .enumerate()
            .filter(|(_, set)| **set)
            .fold(0u64, |acc, (i, _)| acc | (1 << i));
        ProtocolServicesSupported::from_bits_truncate(bits)
    }
}

/// The Device object this program presents on the network
pub mod device;
pub mod object_type;
pub use object_type::ObjectType;
pub mod property_identifier;
pub use property_identifier::PropertyIdentifier;

pub use device::{DeviceObject, DeviceObjectConfig};
