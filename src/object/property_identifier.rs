use crate::generate_custom_enum;

generate_custom_enum!(
    /// BACnet property identifiers (clause 21, BACnetPropertyIdentifier).
    ///
    /// Only the properties of the objects this crate reads or serves are named;
    /// everything else decodes as `Custom` (512 and up) or `Reserved`.
    PropertyIdentifier {
        ActiveText = 4,
        All = 8,
        ApduSegmentTimeout = 10,
        ApduTimeout = 11,
        ApplicationSoftwareVersion = 12,
        ChangeOfStateCount = 15,
        ChangeOfStateTime = 16,
        Description = 28,
        DeviceAddressBinding = 30,
        DeviceType = 31,
        EventState = 36,
        FirmwareRevision = 44,
        InactiveText = 46,
        Location = 58,
        MaxApduLengthAccepted = 62,
        MaxInfoFrames = 63,
        MaxMaster = 64,
        ModelName = 70,
        NumberOfApduRetries = 73,
        ObjectIdentifier = 75,
        ObjectList = 76,
        ObjectName = 77,
        ObjectType = 79,
        OutOfService = 81,
        Polarity = 84,
        PresentValue = 85,
        PriorityArray = 87,
        ProtocolObjectTypesSupported = 96,
        ProtocolServicesSupported = 97,
        ProtocolVersion = 98,
        Reliability = 103,
        RelinquishDefault = 104,
        SegmentationSupported = 107,
        StatusFlags = 111,
        SystemStatus = 112,
        VendorIdentifier = 120,
        VendorName = 121,
        ProtocolRevision = 139,
        DatabaseRevision = 155,
        PropertyList = 371,
    },
    u32,
    512..=4194303
);
