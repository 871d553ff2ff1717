//! Address binding table.
//!
//! Maps device instances to where they live: the MS/TP station, the remote
//! network when the device sits behind a router, and what the device said
//! about itself in its I-Am.

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};

use crate::datalink::DataLinkAddress;
use crate::network::NetworkAddress;
use crate::object::Segmentation;

/// Bindings kept at most
pub const MAX_ADDRESS_CACHE: usize = 255;

/// Full BACnet address: the station on the local segment that sent the
/// frame, plus the NPDU source network when the frame was routed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BacnetAddress {
    pub mac: DataLinkAddress,
    pub network: Option<NetworkAddress>,
}

impl BacnetAddress {
    pub fn local(mac: DataLinkAddress) -> Self {
        Self { mac, network: None }
    }

    pub fn routed(mac: DataLinkAddress, network: NetworkAddress) -> Self {
        Self {
            mac,
            network: Some(network),
        }
    }
}

impl fmt::Display for BacnetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.network {
            Some(network) => write!(f, "{} via {}", network, self.mac),
            None => write!(f, "{}", self.mac),
        }
    }
}

/// What an I-Am told us about a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBinding {
    pub device_id: u32,
    pub address: BacnetAddress,
    pub max_apdu: u32,
    pub segmentation: Segmentation,
    pub vendor_id: u16,
}

/// Device instance to address bindings
#[derive(Debug, Default)]
pub struct AddressTable {
    bindings: HashMap<u32, AddressBinding>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh a binding.
    ///
    /// Returns false when the table is full and the device is not already in it.
    pub fn add_binding(&mut self, binding: AddressBinding) -> bool {
        let known = self.bindings.contains_key(&binding.device_id);
        if !known && self.bindings.len() >= MAX_ADDRESS_CACHE {
            warn!("Address table full, dropping binding for device {}", binding.device_id);
            return false;
        }
        debug!("Bound device {} to {}", binding.device_id, binding.address);
        self.bindings.insert(binding.device_id, binding);
        true
    }

    /// Binding for `device_id`, if one is known
    pub fn bind_request(&self, device_id: u32) -> Option<&AddressBinding> {
        self.bindings.get(&device_id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
