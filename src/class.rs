// Class of device codec
//
// Layout of the 24-bit value: service bits 13..=23, major class 8..=12,
// minor class and format type 0..=7. Only the computer major class is
// interpreted.

use std::fmt;

use thiserror::Error;

/// Service-class labels for bits 16..=23, lowest bit first.
pub const SERVICE_CLASSES: [&str; 8] = [
    "positioning",
    "networking",
    "rendering",
    "capturing",
    "object transfer",
    "audio",
    "telephony",
    "information",
];

/// Minor-class labels of the computer major class, indexed by `byte0 >> 2`.
pub const COMPUTER_MINOR_CLASSES: [&str; 7] = [
    "uncategorized",
    "desktop",
    "server",
    "laptop",
    "handheld",
    "palm",
    "wearable",
];

pub const MAJOR_COMPUTER: u8 = 0x01;
pub const MAJOR_COMPUTER_LABEL: &str = "computer";

const MAJOR_MASK: u32 = 0x00_1f00;
const SERVICE_MASK: u32 = 0xff_e000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassError {
    #[error("unsupported major class 0x{0:02x}")]
    UnsupportedMajorClass(u8),

    #[error("unknown computer minor class {0}")]
    UnknownMinorClass(u8),

    #[error("'{0}' is not a computer minor class")]
    InvalidLabel(String),
}

/// A 24-bit class of device value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceClass(u32);

impl DeviceClass {
    pub fn new(raw: u32) -> Self {
        Self(raw & 0xff_ffff)
    }

    /// Builds the value from the three bytes the controller reports, least
    /// significant first.
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from(bytes[0]) | u32::from(bytes[1]) << 8 | u32::from(bytes[2]) << 16)
    }

    pub fn to_bytes(self) -> [u8; 3] {
        [self.0 as u8, (self.0 >> 8) as u8, (self.0 >> 16) as u8]
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn major(self) -> u8 {
        ((self.0 & MAJOR_MASK) >> 8) as u8
    }

    pub fn minor_index(self) -> u8 {
        (self.0 as u8) >> 2
    }

    /// The eleven service bits, shifted down to bit 0.
    pub fn service_bits(self) -> u16 {
        (self.0 >> 13) as u16
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06x}", self.0)
    }
}

/// Returns `(major label, minor label)` for a computer-class value.
pub fn decode_minor_class(class: DeviceClass) -> Result<(&'static str, &'static str), ClassError> {
    let major = class.major();
    if major != MAJOR_COMPUTER {
        return Err(ClassError::UnsupportedMajorClass(major));
    }

    let index = class.minor_index();
    COMPUTER_MINOR_CLASSES
        .get(usize::from(index))
        .map(|minor| (MAJOR_COMPUTER_LABEL, *minor))
        .ok_or(ClassError::UnknownMinorClass(index))
}

/// Position of `label` in the computer minor-class table, ignoring case.
pub fn minor_class_index(label: &str) -> Option<usize> {
    COMPUTER_MINOR_CLASSES
        .iter()
        .position(|minor| minor.eq_ignore_ascii_case(label))
}

/// Merges the minor class named by `label` into the freshly read `current`
/// value. Service bits survive, the major class becomes computer and the
/// format type bits are cleared.
pub fn encode_minor_class(label: &str, current: DeviceClass) -> Result<DeviceClass, ClassError> {
    let index =
        minor_class_index(label).ok_or_else(|| ClassError::InvalidLabel(label.to_string()))?;

    let merged = (current.raw() & SERVICE_MASK)
        | u32::from(MAJOR_COMPUTER) << 8
        | (index as u32) << 2;
    Ok(DeviceClass::new(merged))
}

/// Labels of the set service bits, in table order.
pub fn decode_service_classes(class: DeviceClass) -> Vec<&'static str> {
    let services = class.to_bytes()[2];
    SERVICE_CLASSES
        .iter()
        .enumerate()
        .filter(|(bit, _)| services & (1 << bit) != 0)
        .map(|(_, label)| *label)
        .collect()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn computer(minor_index: u32) -> DeviceClass {
        DeviceClass::new(0x0100 | minor_index << 2)
    }

    #[test]
    fn every_minor_label_round_trips() {
        for label in COMPUTER_MINOR_CLASSES {
            let encoded = encode_minor_class(label, DeviceClass::default()).expect("encode");
            assert_eq!(decode_minor_class(encoded), Ok(("computer", label)));
        }
    }

    #[rstest]
    #[case("SERVER", 2)]
    #[case("Laptop", 3)]
    #[case("wearable", 6)]
    fn encode_ignores_case(#[case] label: &str, #[case] index: u8) {
        let encoded = encode_minor_class(label, DeviceClass::default()).expect("encode");
        assert_eq!(encoded.minor_index(), index);
        assert_eq!(encoded.major(), MAJOR_COMPUTER);
    }

    #[test]
    fn encode_rejects_unknown_label() {
        assert_eq!(
            encode_minor_class("toaster", DeviceClass::default()),
            Err(ClassError::InvalidLabel("toaster".into()))
        );
    }

    #[test]
    fn encode_keeps_service_bits_and_forces_computer() {
        // service bits 0b101, phone major class, smartphone minor class
        let current = DeviceClass::new(0b101 << 13 | 0x0200 | 0x0c);
        let encoded = encode_minor_class("server", current).expect("encode");
        assert_eq!(encoded.service_bits(), 0b101);
        assert_eq!(encoded.major(), MAJOR_COMPUTER);
        assert_eq!(encoded.raw() & 0xff, 2 << 2);
    }

    #[test]
    fn decode_rejects_other_major_classes() {
        let phone = DeviceClass::new(0x0204);
        assert_eq!(
            decode_minor_class(phone),
            Err(ClassError::UnsupportedMajorClass(0x02))
        );
    }

    #[rstest]
    #[case(7)]
    #[case(63)]
    fn decode_rejects_indexes_past_the_table(#[case] index: u32) {
        assert_eq!(
            decode_minor_class(computer(index)),
            Err(ClassError::UnknownMinorClass(index as u8))
        );
    }

    #[test]
    fn decode_ignores_format_bits() {
        let class = DeviceClass::new(0x0100 | 3 << 2 | 0b11);
        assert_eq!(decode_minor_class(class), Ok(("computer", "laptop")));
    }

    #[test]
    fn service_classes_follow_table_order() {
        let class = DeviceClass::from_bytes([0x0c, 0x01, 0b1010_0010]);
        assert_eq!(
            decode_service_classes(class),
            vec!["networking", "audio", "information"]
        );
        assert!(decode_service_classes(computer(1)).is_empty());
    }

    #[test]
    fn bytes_are_little_endian() {
        let class = DeviceClass::from_bytes([0x0c, 0x01, 0x5a]);
        assert_eq!(class.raw(), 0x5a010c);
        assert_eq!(class.to_bytes(), [0x0c, 0x01, 0x5a]);
        assert_eq!(class.to_string(), "0x5a010c");
    }
}
