//! Hearing Aid Features value

use std::fmt;

/// Hearing aid type, carried in bits 0-1 of the features value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HearingAidType {
    /// Part of a binaural set
    #[default]
    Binaural,
    /// Single device
    Monaural,
    /// Banded (one device serving both ears)
    Banded,
}

impl HearingAidType {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & HasFeatures::TYPE_MASK.bits() {
            0x00 => Some(HearingAidType::Binaural),
            0x01 => Some(HearingAidType::Monaural),
            0x02 => Some(HearingAidType::Banded),
            _ => None,
        }
    }

    pub fn bits(&self) -> u8 {
        match self {
            HearingAidType::Binaural => 0x00,
            HearingAidType::Monaural => 0x01,
            HearingAidType::Banded => 0x02,
        }
    }
}

impl fmt::Display for HearingAidType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HearingAidType::Binaural => write!(f, "binaural"),
            HearingAidType::Monaural => write!(f, "monaural"),
            HearingAidType::Banded => write!(f, "banded"),
        }
    }
}

bitflags::bitflags! {
    /// Hearing Aid Features characteristic value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HasFeatures: u8 {
        /// Hearing aid type field
        const TYPE_MASK = 0x03;
        /// Preset synchronization across a binaural set is supported
        const PRESET_SYNC = 0x04;
        /// The preset records differ between the devices of a set
        const INDEPENDENT_PRESETS = 0x08;
        /// The list of preset records may change
        const DYNAMIC_PRESETS = 0x10;
        /// At least one preset name can be written
        const WRITABLE_PRESETS = 0x20;
    }
}

impl HasFeatures {
    /// Features value for a hearing aid of the given type
    pub fn with_type(hearing_aid_type: HearingAidType) -> Self {
        Self::from_bits_retain(hearing_aid_type.bits())
    }

    pub fn hearing_aid_type(&self) -> Option<HearingAidType> {
        HearingAidType::from_bits(self.bits())
    }

    /// Whether Control Point requests should use the synchronized opcodes
    pub fn uses_preset_sync(&self) -> bool {
        self.hearing_aid_type() == Some(HearingAidType::Binaural)
            && self.contains(HasFeatures::PRESET_SYNC)
            && !self.contains(HasFeatures::INDEPENDENT_PRESETS)
    }
}
