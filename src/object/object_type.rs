use crate::generate_custom_enum;

generate_custom_enum!(
    /// BACnet object types (clause 21, BACnetObjectType).
    ///
    /// Values 128-1023 are reserved for proprietary object types.
    ObjectType {
        AnalogInput = 0,
        AnalogOutput = 1,
        AnalogValue = 2,
        BinaryInput = 3,
        BinaryOutput = 4,
        BinaryValue = 5,
        Calendar = 6,
        Command = 7,
        Device = 8,
        EventEnrollment = 9,
        File = 10,
        Group = 11,
        Loop = 12,
        MultiStateInput = 13,
        MultiStateOutput = 14,
        NotificationClass = 15,
        Program = 16,
        Schedule = 17,
        Averaging = 18,
        MultiStateValue = 19,
        TrendLog = 20,
        LifeSafetyPoint = 21,
        LifeSafetyZone = 22,
        Accumulator = 23,
        PulseConverter = 24,
        EventLog = 25,
        GlobalGroup = 26,
        TrendLogMultiple = 27,
        LoadControl = 28,
        StructuredView = 29,
        AccessDoor = 30,
    },
    u16,
    128..=1023
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_type_values() {
        assert_eq!(u16::from(ObjectType::BinaryInput), 3);
        assert_eq!(u16::from(ObjectType::BinaryOutput), 4);
        assert_eq!(ObjectType::from(8u16), ObjectType::Device);
        assert!(matches!(ObjectType::from(64u16), ObjectType::Reserved(_)));
        assert_eq!(ObjectType::from(200u16).to_string(), "Custom(200)");
    }
}
