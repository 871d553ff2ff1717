//! BACnet Application Layer Services
//!
//! Request and acknowledgement structures for the services this node uses,
//! plus the reason and error enumerations carried by Reject, Abort and Error
//! PDUs.
//!
//! ## Remote Device Discovery
//! - **WhoIs**: Discover devices on the network
//! - **IAm**: Announce a device, its maximum APDU and segmentation support
//!
//! ## Object Access Services
//! - **ReadProperty**: Read a single property value
//! - **WriteProperty**: Write a single property value
//!
//! # Example
//!
//! ```
//! use bacnet_mstp_loopback::object::{
//!     ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue,
//! };
//! use bacnet_mstp_loopback::service::WritePropertyRequest;
//!
//! let request = WritePropertyRequest::new(
//!     ObjectIdentifier::new(ObjectType::BinaryOutput, 1),
//!     PropertyIdentifier::PresentValue,
//!     PropertyValue::Enumerated(1),
//! );
//! let mut buffer = Vec::new();
//! request.encode(&mut buffer).unwrap();
//! assert_eq!(
//!     buffer,
//!     vec![0x0C, 0x01, 0x00, 0x00, 0x01, 0x19, 0x55, 0x3E, 0x91, 0x01, 0x3F]
//! );
//! ```

use std::error::Error;
use std::fmt;

use crate::encoding::{
    decode_application_value, decode_context_enumerated, decode_context_object_id,
    decode_context_tag, decode_context_unsigned, decode_enclosed, decode_enumerated,
    decode_object_identifier, decode_tag_header, decode_unsigned, encode_application_value,
    encode_closing_tag, encode_context_enumerated, encode_context_object_id,
    encode_context_unsigned, encode_enumerated, encode_object_identifier, encode_opening_tag,
    encode_unsigned, EncodingError, Result as EncodingResult, TagKind,
};
use crate::generate_custom_enum;
use crate::object::{ObjectError, ObjectIdentifier, PropertyIdentifier, PropertyValue, Segmentation};

pub type Result<T> = core::result::Result<T, ServiceError>;

/// Errors that can occur during service operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Invalid service parameters
    InvalidParameters(String),
    /// Unsupported service choice
    UnsupportedServiceChoice(u8),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ServiceError::UnsupportedServiceChoice(choice) => {
                write!(f, "Unsupported service choice: {}", choice)
            }
        }
    }
}

impl Error for ServiceError {}

/// Confirmed service choices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConfirmedServiceChoice {
    // Alarm and Event Services
    AcknowledgeAlarm = 0,
    ConfirmedCOVNotification = 1,
    ConfirmedEventNotification = 2,
    GetAlarmSummary = 3,
    GetEnrollmentSummary = 4,
    SubscribeCOV = 5,

    // File Access Services
    AtomicReadFile = 6,
    AtomicWriteFile = 7,

    // Object Access Services
    AddListElement = 8,
    RemoveListElement = 9,
    CreateObject = 10,
    DeleteObject = 11,
    ReadProperty = 12,
    ReadPropertyMultiple = 14,
    WriteProperty = 15,
    WritePropertyMultiple = 16,

    // Remote Device Management Services
    DeviceCommunicationControl = 17,
    ConfirmedPrivateTransfer = 18,
    ConfirmedTextMessage = 19,
    ReinitializeDevice = 20,

    // Other Services
    ReadRange = 26,
    GetEventInformation = 29,
}

impl TryFrom<u8> for ConfirmedServiceChoice {
    type Error = ServiceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::AcknowledgeAlarm),
            1 => Ok(Self::ConfirmedCOVNotification),
            2 => Ok(Self::ConfirmedEventNotification),
            3 => Ok(Self::GetAlarmSummary),
            4 => Ok(Self::GetEnrollmentSummary),
            5 => Ok(Self::SubscribeCOV),
            6 => Ok(Self::AtomicReadFile),
            7 => Ok(Self::AtomicWriteFile),
            8 => Ok(Self::AddListElement),
            9 => Ok(Self::RemoveListElement),
            10 => Ok(Self::CreateObject),
            11 => Ok(Self::DeleteObject),
            12 => Ok(Self::ReadProperty),
            14 => Ok(Self::ReadPropertyMultiple),
            15 => Ok(Self::WriteProperty),
            16 => Ok(Self::WritePropertyMultiple),
            17 => Ok(Self::DeviceCommunicationControl),
            18 => Ok(Self::ConfirmedPrivateTransfer),
            19 => Ok(Self::ConfirmedTextMessage),
            20 => Ok(Self::ReinitializeDevice),
            26 => Ok(Self::ReadRange),
            29 => Ok(Self::GetEventInformation),
            _ => Err(ServiceError::UnsupportedServiceChoice(value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnconfirmedServiceChoice {
    IAm = 0,
    IHave = 1,
    UnconfirmedCOVNotification = 2,
    UnconfirmedEventNotification = 3,
    UnconfirmedPrivateTransfer = 4,
    UnconfirmedTextMessage = 5,
    TimeSynchronization = 6,
    WhoHas = 7,
    WhoIs = 8,
    UtcTimeSynchronization = 9,
}

impl TryFrom<u8> for UnconfirmedServiceChoice {
    type Error = ServiceError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::IAm),
            1 => Ok(Self::IHave),
            2 => Ok(Self::UnconfirmedCOVNotification),
            3 => Ok(Self::UnconfirmedEventNotification),
            4 => Ok(Self::UnconfirmedPrivateTransfer),
            5 => Ok(Self::UnconfirmedTextMessage),
            6 => Ok(Self::TimeSynchronization),
            7 => Ok(Self::WhoHas),
            8 => Ok(Self::WhoIs),
            9 => Ok(Self::UtcTimeSynchronization),
            _ => Err(ServiceError::UnsupportedServiceChoice(value)),
        }
    }
}

/// Reject reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    Other = 0,
    BufferOverflow = 1,
    InconsistentParameters = 2,
    InvalidParameterDataType = 3,
    InvalidTag = 4,
    MissingRequiredParameter = 5,
    ParameterOutOfRange = 6,
    TooManyArguments = 7,
    UndefinedEnumeration = 8,
    UnrecognizedService = 9,
}

impl From<u8> for RejectReason {
    /// Reasons 10-63 are reserved and 64-255 proprietary; both map to `Other`.
    fn from(value: u8) -> Self {
        match value {
            1 => Self::BufferOverflow,
            2 => Self::InconsistentParameters,
            3 => Self::InvalidParameterDataType,
            4 => Self::InvalidTag,
            5 => Self::MissingRequiredParameter,
            6 => Self::ParameterOutOfRange,
            7 => Self::TooManyArguments,
            8 => Self::UndefinedEnumeration,
            9 => Self::UnrecognizedService,
            _ => Self::Other,
        }
    }
}

/// Abort reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AbortReason {
    Other = 0,
    BufferOverflow = 1,
    InvalidApduInThisState = 2,
    PreemptedByHigherPriorityTask = 3,
    SegmentationNotSupported = 4,
}

impl From<u8> for AbortReason {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::BufferOverflow,
            2 => Self::InvalidApduInThisState,
            3 => Self::PreemptedByHigherPriorityTask,
            4 => Self::SegmentationNotSupported,
            _ => Self::Other,
        }
    }
}

generate_custom_enum!(
    /// BACnetErrorClass
    ErrorClass {
        Device = 0,
        Object = 1,
        Property = 2,
        Resources = 3,
        Security = 4,
        Services = 5,
        Vt = 6,
        Communication = 7,
    },
    u32,
    64..=65535
);

generate_custom_enum!(
    /// BACnetErrorCode, the codes this node produces or is likely to receive
    ErrorCode {
        Other = 0,
        ConfigurationInProgress = 2,
        DeviceBusy = 3,
        InconsistentParameters = 7,
        InvalidDataType = 9,
        MissingRequiredParameter = 16,
        NoSpaceForObject = 18,
        OperationalProblem = 25,
        ServiceRequestDenied = 29,
        Timeout = 30,
        UnknownObject = 31,
        UnknownProperty = 32,
        ValueOutOfRange = 37,
        WriteAccessDenied = 40,
        InvalidArrayIndex = 42,
        PropertyIsNotAnArray = 50,
        UnsupportedObjectType = 63,
    },
    u32,
    256..=65535
);

/// Error class and code reported for a failed local property read
pub fn error_for_object(error: &ObjectError) -> (ErrorClass, ErrorCode) {
    match error {
        ObjectError::UnknownObject => (ErrorClass::Object, ErrorCode::UnknownObject),
        ObjectError::UnknownProperty => (ErrorClass::Property, ErrorCode::UnknownProperty),
        ObjectError::PropertyIsNotAnArray => {
            (ErrorClass::Property, ErrorCode::PropertyIsNotAnArray)
        }
        ObjectError::InvalidArrayIndex => (ErrorClass::Property, ErrorCode::InvalidArrayIndex),
        ObjectError::InvalidConfiguration(_) => (ErrorClass::Device, ErrorCode::OperationalProblem),
    }
}

/// Who-Is request (unconfirmed service)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WhoIsRequest {
    /// Low limit of device instance range (optional)
    pub device_instance_range_low_limit: Option<u32>,
    /// High limit of device instance range (optional)
    pub device_instance_range_high_limit: Option<u32>,
}

impl WhoIsRequest {
    /// Create a new Who-Is request for all devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new Who-Is request for a specific device
    pub fn for_device(device_instance: u32) -> Self {
        Self::for_range(device_instance, device_instance)
    }

    /// Create a new Who-Is request for a range of devices
    pub fn for_range(low: u32, high: u32) -> Self {
        Self {
            device_instance_range_low_limit: Some(low),
            device_instance_range_high_limit: Some(high),
        }
    }

    /// Encode the Who-Is request
    pub fn encode(&self, buffer: &mut Vec<u8>) -> EncodingResult<()> {
        // Both limits or neither; a lone limit is dropped and the request goes to everyone
        if let (Some(low), Some(high)) = (
            self.device_instance_range_low_limit,
            self.device_instance_range_high_limit,
        ) {
            encode_context_unsigned(buffer, 0, low)?;
            encode_context_unsigned(buffer, 1, high)?;
        }

        Ok(())
    }

    /// Decode a Who-Is request
    pub fn decode(data: &[u8]) -> EncodingResult<Self> {
        if data.is_empty() {
            return Ok(Self::new());
        }

        let (low, consumed) = decode_context_unsigned(data, 0)?;
        let (high, _) = decode_context_unsigned(&data[consumed..], 1).map_err(|_| {
            EncodingError::InvalidFormat(
                "Who-Is request has low limit without high limit".to_string(),
            )
        })?;

        if low > crate::BACNET_MAX_INSTANCE || high > crate::BACNET_MAX_INSTANCE {
            return Err(EncodingError::ValueOutOfRange);
        }

        Ok(Self::for_range(low, high))
    }

    /// Check if this request matches a device instance
    pub fn matches(&self, device_instance: u32) -> bool {
        match (
            self.device_instance_range_low_limit,
            self.device_instance_range_high_limit,
        ) {
            (Some(low), Some(high)) => (low..=high).contains(&device_instance),
            _ => true,
        }
    }
}

/// I-Am request (unconfirmed service)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IAmRequest {
    /// Device object identifier
    pub device_identifier: ObjectIdentifier,
    /// Maximum APDU length accepted
    pub max_apdu_length_accepted: u32,
    /// Segmentation supported
    pub segmentation_supported: Segmentation,
    /// Vendor identifier
    pub vendor_identifier: u16,
}

impl IAmRequest {
    /// Create a new I-Am request
    pub fn new(
        device_identifier: ObjectIdentifier,
        max_apdu_length_accepted: u32,
        segmentation_supported: Segmentation,
        vendor_identifier: u16,
    ) -> Self {
        Self {
            device_identifier,
            max_apdu_length_accepted,
            segmentation_supported,
            vendor_identifier,
        }
    }

    /// Encode the I-Am request
    pub fn encode(&self, buffer: &mut Vec<u8>) -> EncodingResult<()> {
        encode_object_identifier(
            buffer,
            self.device_identifier.object_type.into(),
            self.device_identifier.instance,
        )?;
        encode_unsigned(buffer, self.max_apdu_length_accepted)?;
        encode_enumerated(buffer, self.segmentation_supported as u32)?;
        encode_unsigned(buffer, self.vendor_identifier as u32)?;
        Ok(())
    }

    /// Decode an I-Am request.
    ///
    /// The identifier must name a Device object and every field must be in range.
    pub fn decode(data: &[u8]) -> EncodingResult<Self> {
        let mut pos = 0;

        let ((object_type, instance), consumed) = decode_object_identifier(data)?;
        let device_identifier = ObjectIdentifier::new(object_type.into(), instance);
        if device_identifier.object_type != crate::object::ObjectType::Device {
            return Err(EncodingError::InvalidFormat(
                "I-Am identifier is not a Device object".to_string(),
            ));
        }
        pos += consumed;

        let (max_apdu_length_accepted, consumed) = decode_unsigned(&data[pos..])?;
        pos += consumed;

        let (segmentation, consumed) = decode_enumerated(&data[pos..])?;
        let segmentation_supported =
            Segmentation::try_from(segmentation).map_err(|_| EncodingError::ValueOutOfRange)?;
        pos += consumed;

        let (vendor_identifier, _) = decode_unsigned(&data[pos..])?;
        let vendor_identifier =
            u16::try_from(vendor_identifier).map_err(|_| EncodingError::ValueOutOfRange)?;

        Ok(IAmRequest::new(
            device_identifier,
            max_apdu_length_accepted,
            segmentation_supported,
            vendor_identifier,
        ))
    }
}

/// Read Property request (confirmed service)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPropertyRequest {
    /// Object identifier to read from
    pub object_identifier: ObjectIdentifier,
    /// Property identifier to read
    pub property_identifier: PropertyIdentifier,
    /// Property array index (optional)
    pub property_array_index: Option<u32>,
}

impl ReadPropertyRequest {
    /// Create a new Read Property request
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index: None,
        }
    }

    /// Create a new Read Property request with array index
    pub fn with_array_index(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        array_index: u32,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index: Some(array_index),
        }
    }

    /// Encode the Read Property request
    pub fn encode(&self, buffer: &mut Vec<u8>) -> EncodingResult<()> {
        encode_object_property(
            buffer,
            self.object_identifier,
            self.property_identifier,
            self.property_array_index,
        )
    }

    /// Decode a Read Property request
    pub fn decode(data: &[u8]) -> EncodingResult<Self> {
        let (object_identifier, property_identifier, property_array_index, consumed) =
            decode_object_property(data)?;
        if consumed != data.len() {
            return Err(EncodingError::InvalidFormat(
                "Trailing data after ReadProperty request".to_string(),
            ));
        }

        Ok(Self {
            object_identifier,
            property_identifier,
            property_array_index,
        })
    }
}

/// Read Property acknowledgement (ComplexACK service data)
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPropertyAck {
    /// Object identifier that was read
    pub object_identifier: ObjectIdentifier,
    /// Property identifier that was read
    pub property_identifier: PropertyIdentifier,
    /// Property array index (optional)
    pub property_array_index: Option<u32>,
    /// Property value; several values come back as an `Array`
    pub property_value: PropertyValue,
}

impl ReadPropertyAck {
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        property_array_index: Option<u32>,
        property_value: PropertyValue,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index,
            property_value,
        }
    }

    pub fn encode(&self, buffer: &mut Vec<u8>) -> EncodingResult<()> {
        encode_object_property(
            buffer,
            self.object_identifier,
            self.property_identifier,
            self.property_array_index,
        )?;
        encode_opening_tag(buffer, 3)?;
        encode_application_value(buffer, &self.property_value)?;
        encode_closing_tag(buffer, 3)?;
        Ok(())
    }

    /// Decode a Read Property acknowledgement
    pub fn decode(data: &[u8]) -> EncodingResult<Self> {
        let (object_identifier, property_identifier, property_array_index, pos) =
            decode_object_property(data)?;

        let (enclosed, _) = decode_enclosed(&data[pos..], 3)?;
        let property_value = decode_value_list(enclosed)?;

        Ok(Self {
            object_identifier,
            property_identifier,
            property_array_index,
            property_value,
        })
    }
}

/// Write Property request (confirmed service)
#[derive(Debug, Clone, PartialEq)]
pub struct WritePropertyRequest {
    /// Object identifier to write to
    pub object_identifier: ObjectIdentifier,
    /// Property identifier to write
    pub property_identifier: PropertyIdentifier,
    /// Property array index (optional)
    pub property_array_index: Option<u32>,
    /// Property value to write
    pub property_value: PropertyValue,
    /// Priority (optional, 1-16)
    pub priority: Option<u8>,
}

impl WritePropertyRequest {
    /// Create a new Write Property request
    pub fn new(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        property_value: PropertyValue,
    ) -> Self {
        Self {
            object_identifier,
            property_identifier,
            property_array_index: None,
            property_value,
            priority: None,
        }
    }

    /// Create a new Write Property request with priority
    pub fn with_priority(
        object_identifier: ObjectIdentifier,
        property_identifier: PropertyIdentifier,
        property_value: PropertyValue,
        priority: u8,
    ) -> Self {
        Self {
            priority: Some(priority),
            ..Self::new(object_identifier, property_identifier, property_value)
        }
    }

    /// Encode the Write Property request
    pub fn encode(&self, buffer: &mut Vec<u8>) -> EncodingResult<()> {
        if let Some(priority) = self.priority {
            if !(1..=16).contains(&priority) {
                return Err(EncodingError::ValueOutOfRange);
            }
        }

        encode_object_property(
            buffer,
            self.object_identifier,
            self.property_identifier,
            self.property_array_index,
        )?;

        encode_opening_tag(buffer, 3)?;
        encode_application_value(buffer, &self.property_value)?;
        encode_closing_tag(buffer, 3)?;

        if let Some(priority) = self.priority {
            encode_context_unsigned(buffer, 4, priority as u32)?;
        }

        Ok(())
    }

    /// Decode a Write Property request
    pub fn decode(data: &[u8]) -> EncodingResult<Self> {
        let (object_identifier, property_identifier, property_array_index, mut pos) =
            decode_object_property(data)?;

        let (enclosed, consumed) = decode_enclosed(&data[pos..], 3)?;
        let property_value = decode_value_list(enclosed)?;
        pos += consumed;

        let priority = if pos < data.len() {
            let (priority, _) = decode_context_unsigned(&data[pos..], 4)?;
            if !(1..=16).contains(&priority) {
                return Err(EncodingError::ValueOutOfRange);
            }
            Some(priority as u8)
        } else {
            None
        };

        Ok(Self {
            object_identifier,
            property_identifier,
            property_array_index,
            property_value,
            priority,
        })
    }
}

/// Object identifier [0], property identifier [1] and optional array index [2],
/// shared by ReadProperty, its ACK and WriteProperty.
fn encode_object_property(
    buffer: &mut Vec<u8>,
    object: ObjectIdentifier,
    property: PropertyIdentifier,
    array_index: Option<u32>,
) -> EncodingResult<()> {
    encode_context_object_id(buffer, 0, object.object_type.into(), object.instance)?;
    encode_context_enumerated(buffer, 1, property.into())?;
    if let Some(array_index) = array_index {
        encode_context_unsigned(buffer, 2, array_index)?;
    }
    Ok(())
}

fn decode_object_property(
    data: &[u8],
) -> EncodingResult<(ObjectIdentifier, PropertyIdentifier, Option<u32>, usize)> {
    let ((object_type, instance), mut pos) = decode_context_object_id(data, 0)?;
    let object_identifier = ObjectIdentifier::new(object_type.into(), instance);

    let (property, consumed) = decode_context_enumerated(&data[pos..], 1)?;
    pos += consumed;

    let array_index = if has_context_tag(&data[pos..], 2) {
        let (index, consumed) = decode_context_unsigned(&data[pos..], 2)?;
        pos += consumed;
        Some(index)
    } else {
        None
    };

    Ok((object_identifier, property.into(), array_index, pos))
}

fn has_context_tag(data: &[u8], tag_number: u8) -> bool {
    decode_context_tag(data, tag_number).is_ok()
}

/// Decode every application tagged value in `data`. A single value is returned
/// as is, more than one as an `Array`.
fn decode_value_list(data: &[u8]) -> EncodingResult<PropertyValue> {
    let mut values = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let (header, _) = decode_tag_header(&data[pos..])?;
        if header.context || !matches!(header.kind, TagKind::Primitive(_)) {
            return Err(EncodingError::InvalidFormat(
                "Constructed property values are not supported".to_string(),
            ));
        }
        let (value, consumed) = decode_application_value(&data[pos..])?;
        values.push(value);
        pos += consumed;
    }

    match values.len() {
        0 => Err(EncodingError::InvalidFormat("Empty property value".to_string())),
        1 => Ok(values.remove(0)),
        _ => Ok(PropertyValue::Array(values)),
    }
}
