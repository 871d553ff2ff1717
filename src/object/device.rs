//! Device Object
//!
//! The read-only Device object this program presents on the network. Confirmed
//! ReadProperty requests addressed to us are answered from it.

use crate::object::{
    DeviceStatus, ObjectError, ObjectIdentifier, ObjectType, PropertyIdentifier, PropertyValue,
    ProtocolServicesSupported, Result, Segmentation,
};
use crate::util::BACNET_ARRAY_ALL;

/// Static description of the local device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceObjectConfig {
    pub instance: u32,
    pub object_name: String,
    pub vendor_name: String,
    pub vendor_identifier: u16,
    pub model_name: String,
    pub firmware_revision: String,
    pub application_software_version: String,
    pub max_apdu_length_accepted: u16,
    pub apdu_timeout: u32,
    pub number_of_apdu_retries: u8,
}

impl Default for DeviceObjectConfig {
    fn default() -> Self {
        Self {
            instance: crate::BACNET_MAX_INSTANCE,
            object_name: String::from("MS/TP Loopback Tester"),
            vendor_name: String::from("bacnet-mstp-loopback"),
            vendor_identifier: 260,
            model_name: String::from("Loopback Tester"),
            firmware_revision: String::from("1.0"),
            application_software_version: String::from(env!("CARGO_PKG_VERSION")),
            max_apdu_length_accepted: crate::BACNET_MAX_APDU as u16,
            apdu_timeout: 3000,
            number_of_apdu_retries: 3,
        }
    }
}

/// Device object
#[derive(Debug, Clone)]
pub struct DeviceObject {
    identifier: ObjectIdentifier,
    config: DeviceObjectConfig,
    system_status: DeviceStatus,
    protocol_version: u8,
    protocol_revision: u8,
    services_supported: ProtocolServicesSupported,
    database_revision: u32,
}

impl DeviceObject {
    pub fn new(config: DeviceObjectConfig) -> Self {
        Self {
            identifier: ObjectIdentifier::new(ObjectType::Device, config.instance),
            config,
            system_status: DeviceStatus::Operational,
            protocol_version: 1,
            protocol_revision: 14,
            services_supported: ProtocolServicesSupported::READ_PROPERTY
                | ProtocolServicesSupported::I_AM
                | ProtocolServicesSupported::WHO_IS,
            database_revision: 0,
        }
    }

    pub fn identifier(&self) -> ObjectIdentifier {
        self.identifier
    }

    pub fn instance(&self) -> u32 {
        self.identifier.instance
    }

    pub fn max_apdu_length_accepted(&self) -> u16 {
        self.config.max_apdu_length_accepted
    }

    pub fn vendor_identifier(&self) -> u16 {
        self.config.vendor_identifier
    }

    /// Does a Who-Is with these limits cover this device?
    pub fn matches_who_is(&self, low: Option<u32>, high: Option<u32>) -> bool {
        match (low, high) {
            (Some(low), Some(high)) => (low..=high).contains(&self.instance()),
            _ => true,
        }
    }

    /// Read a property of an object hosted by this device.
    ///
    /// The device instance 4194303 in a request is the wildcard for "this device"
    /// (clause 15.5.2), so it always resolves here.
    pub fn read_property(
        &self,
        object: ObjectIdentifier,
        property: PropertyIdentifier,
        array_index: Option<u32>,
    ) -> Result<PropertyValue> {
        let addressed_to_us = object.object_type == ObjectType::Device
            && (object.instance == self.instance()
                || object.instance == crate::BACNET_MAX_INSTANCE);
        if !addressed_to_us {
            return Err(ObjectError::UnknownObject);
        }

        if property == PropertyIdentifier::ObjectList {
            let list = vec![PropertyValue::ObjectIdentifier(self.identifier)];
            return match array_index {
                None | Some(BACNET_ARRAY_ALL) => Ok(PropertyValue::Array(list)),
                Some(0) => Ok(PropertyValue::UnsignedInteger(list.len() as u32)),
                Some(i) => list
                    .into_iter()
                    .nth(i as usize - 1)
                    .ok_or(ObjectError::InvalidArrayIndex),
            };
        }

        if array_index.is_some() {
            // Every other supported property is scalar. Still report an
            // unknown property before complaining about the index.
            self.scalar_property(property)?;
            return Err(ObjectError::PropertyIsNotAnArray);
        }

        self.scalar_property(property)
    }

    fn scalar_property(&self, property: PropertyIdentifier) -> Result<PropertyValue> {
        let cfg = &self.config;
        let value = match property {
            PropertyIdentifier::ObjectIdentifier => {
                PropertyValue::ObjectIdentifier(self.identifier)
            }
            PropertyIdentifier::ObjectName => {
                PropertyValue::CharacterString(cfg.object_name.clone())
            }
            PropertyIdentifier::ObjectType => {
                PropertyValue::Enumerated(u16::from(ObjectType::Device) as u32)
            }
            PropertyIdentifier::SystemStatus => {
                PropertyValue::Enumerated(self.system_status as u32)
            }
            PropertyIdentifier::VendorName => {
                PropertyValue::CharacterString(cfg.vendor_name.clone())
            }
            PropertyIdentifier::VendorIdentifier => {
                PropertyValue::UnsignedInteger(cfg.vendor_identifier as u32)
            }
            PropertyIdentifier::ModelName => PropertyValue::CharacterString(cfg.model_name.clone()),
            PropertyIdentifier::FirmwareRevision => {
                PropertyValue::CharacterString(cfg.firmware_revision.clone())
            }
            PropertyIdentifier::ApplicationSoftwareVersion => {
                PropertyValue::CharacterString(cfg.application_software_version.clone())
            }
            PropertyIdentifier::ProtocolVersion => {
                PropertyValue::UnsignedInteger(self.protocol_version as u32)
            }
            PropertyIdentifier::ProtocolRevision => {
                PropertyValue::UnsignedInteger(self.protocol_revision as u32)
            }
            PropertyIdentifier::ProtocolServicesSupported => {
                PropertyValue::BitString(self.services_supported.to_bool_vec())
            }
            PropertyIdentifier::MaxApduLengthAccepted => {
                PropertyValue::UnsignedInteger(cfg.max_apdu_length_accepted as u32)
            }
            PropertyIdentifier::SegmentationSupported => {
                PropertyValue::Enumerated(Segmentation::NoSegmentation as u32)
            }
            PropertyIdentifier::ApduTimeout => PropertyValue::UnsignedInteger(cfg.apdu_timeout),
            PropertyIdentifier::NumberOfApduRetries => {
                PropertyValue::UnsignedInteger(cfg.number_of_apdu_retries as u32)
            }
            PropertyIdentifier::DatabaseRevision => {
                PropertyValue::UnsignedInteger(self.database_revision)
            }
            _ => return Err(ObjectError::UnknownProperty),
        };
        Ok(value)
    }
}

impl Default for DeviceObject {
    fn default() -> Self {
        Self::new(DeviceObjectConfig::default())
    }
}
