use std::fmt;

use serde::{Deserialize, Serialize};

/// Decode/convert strategy of an open session.
///
/// Variants are ordered from fastest to slowest. A session only ever moves
/// rightward: see [`DecodePath::demote_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodePath {
    HardwareDecodeHardwareConvert,
    HardwareDecodeSoftwareConvert,
    SoftwareDecodeSoftwareConvert,
}

impl DecodePath {
    pub fn hardware_decode(self) -> bool {
        self != DecodePath::SoftwareDecodeSoftwareConvert
    }

    pub fn hardware_convert(self) -> bool {
        self == DecodePath::HardwareDecodeHardwareConvert
    }

    /// Move to `target` if it is slower than the current path.
    ///
    /// Returns true when the path changed. Requests to move back toward
    /// hardware are ignored.
    pub fn demote_to(&mut self, target: DecodePath) -> bool {
        if target > *self {
            *self = target;
            true
        } else {
            false
        }
    }
}

impl Default for DecodePath {
    fn default() -> Self {
        DecodePath::HardwareDecodeHardwareConvert
    }
}

impl fmt::Display for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodePath::HardwareDecodeHardwareConvert => "hardware decode + hardware convert",
            DecodePath::HardwareDecodeSoftwareConvert => "hardware decode + software convert",
            DecodePath::SoftwareDecodeSoftwareConvert => "software decode + software convert",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demotion_is_one_way() {
        let mut path = DecodePath::default();
        assert!(path.hardware_decode() && path.hardware_convert());

        assert!(path.demote_to(DecodePath::HardwareDecodeSoftwareConvert));
        assert!(path.hardware_decode());
        assert!(!path.hardware_convert());

        assert!(!path.demote_to(DecodePath::HardwareDecodeHardwareConvert));
        assert_eq!(path, DecodePath::HardwareDecodeSoftwareConvert);

        assert!(path.demote_to(DecodePath::SoftwareDecodeSoftwareConvert));
        assert!(!path.demote_to(DecodePath::HardwareDecodeSoftwareConvert));
        assert!(!path.demote_to(DecodePath::SoftwareDecodeSoftwareConvert));
        assert!(!path.hardware_decode());
    }

    #[test]
    fn test_display_and_serde() {
        assert_eq!(
            DecodePath::SoftwareDecodeSoftwareConvert.to_string(),
            "software decode + software convert"
        );
        let json = serde_json::to_string(&DecodePath::HardwareDecodeSoftwareConvert).unwrap();
        assert_eq!(json, "\"hardware_decode_software_convert\"");
    }
}
