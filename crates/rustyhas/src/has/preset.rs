//! Preset records and the ordered preset store
//!
//! The store keeps its records sorted by index for the lifetime of the
//! server. Records are never removed once registered: deleting a preset
//! hides it, so the position of a record (its slot) can be used as a stable
//! bit position in per-peer bitmaps.

use super::constants::*;
use crate::att::AttErrorCode;
use crate::error::{HasError, HasResult};

bitflags::bitflags! {
    /// Preset properties as carried on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PresetProperties: u8 {
        /// The preset name can be written by a peer
        const WRITABLE = 0x01;
        /// The preset can be selected as active
        const AVAILABLE = 0x02;
    }
}

/// A preset record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    /// Preset index, unique within the store
    pub index: u8,
    /// Preset properties
    pub properties: PresetProperties,
    /// Preset name
    pub name: String,
    /// Hidden presets are not exposed to peers
    pub hidden: bool,
}

impl Preset {
    /// Create a visible preset
    pub fn new(index: u8, properties: PresetProperties, name: impl Into<String>) -> Self {
        Self {
            index,
            properties,
            name: name.into(),
            hidden: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.properties.contains(PresetProperties::AVAILABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.properties.contains(PresetProperties::WRITABLE)
    }

    pub fn is_visible(&self) -> bool {
        !self.hidden
    }

    /// Whether the preset can become the active preset
    pub fn is_selectable(&self) -> bool {
        self.is_visible() && self.is_available()
    }
}

/// Check a preset name against the length bounds
pub fn validate_name(name: &str) -> HasResult<()> {
    if !(PRESET_NAME_MIN..=PRESET_NAME_MAX).contains(&name.len()) {
        return Err(HasError::Att(AttErrorCode::InvalidParameterLength));
    }

    Ok(())
}

/// Ordered collection of preset records
#[derive(Debug, Clone, Default)]
pub struct PresetStore {
    presets: Vec<Preset>,
    capacity: usize,
}

impl PresetStore {
    /// Create an empty store holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            presets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a preset by index
    pub fn lookup(&self, index: u8) -> HasResult<&Preset> {
        self.slot_of(index)
            .map(|slot| &self.presets[slot])
            .ok_or(HasError::NotFound)
    }

    /// Position of the preset with the given index
    pub fn slot_of(&self, index: u8) -> Option<usize> {
        self.presets.binary_search_by_key(&index, |p| p.index).ok()
    }

    /// Preset stored at the given slot
    pub fn get(&self, slot: usize) -> Option<&Preset> {
        self.presets.get(slot)
    }

    /// Insert a preset keeping ascending index order. Used at registration.
    pub fn insert_sorted(&mut self, preset: Preset) -> HasResult<usize> {
        if preset.index == PRESET_INDEX_NONE {
            return Err(HasError::InvalidArgument(
                "preset index 0x00 is reserved".to_string(),
            ));
        }

        if validate_name(&preset.name).is_err() {
            return Err(HasError::InvalidArgument(format!(
                "preset {} name length {} out of bounds",
                preset.index,
                preset.name.len()
            )));
        }

        if self.presets.len() >= self.capacity {
            return Err(HasError::InvalidArgument(format!(
                "too many presets, at most {} supported",
                self.capacity
            )));
        }

        match self.presets.binary_search_by_key(&preset.index, |p| p.index) {
            Ok(_) => Err(HasError::InvalidArgument(format!(
                "duplicate preset index {}",
                preset.index
            ))),
            Err(slot) => {
                self.presets.insert(slot, preset);
                Ok(slot)
            }
        }
    }

    /// First preset in `[start, end]` (ascending) matching `pred`
    pub fn find_in_range<P>(&self, start: u8, end: u8, mut pred: P) -> Option<&Preset>
    where
        P: FnMut(&Preset) -> bool,
    {
        self.presets
            .iter()
            .filter(|p| p.index >= start && p.index <= end)
            .find(|p| pred(p))
    }

    /// Last preset in `[start, end]` (descending) matching `pred`
    pub fn rfind_in_range<P>(&self, start: u8, end: u8, mut pred: P) -> Option<&Preset>
    where
        P: FnMut(&Preset) -> bool,
    {
        self.presets
            .iter()
            .rev()
            .filter(|p| p.index >= start && p.index <= end)
            .find(|p| pred(p))
    }

    /// Indices of presets in `[start, end]` matching `pred`, stopping after
    /// `limit` matches. A limit of 0 means no limit.
    pub fn foreach_in_range<P>(&self, start: u8, end: u8, limit: usize, mut pred: P) -> Vec<u8>
    where
        P: FnMut(&Preset) -> bool,
    {
        let mut matches = Vec::new();

        for preset in self.presets.iter() {
            if preset.index < start {
                continue;
            }
            if preset.index > end {
                break;
            }
            if !pred(preset) {
                continue;
            }

            matches.push(preset.index);
            if limit != 0 && matches.len() >= limit {
                break;
            }
        }

        matches
    }

    /// Next selectable preset after `from`, wrapping around once.
    ///
    /// Never returns the preset at `from` itself. With `from` set to
    /// `PRESET_INDEX_NONE` this yields the lowest selectable preset.
    pub fn next_available(&self, from: u8) -> Option<&Preset> {
        let upper = if from < PRESET_INDEX_MAX {
            self.find_in_range(from + 1, PRESET_INDEX_MAX, Preset::is_selectable)
        } else {
            None
        };

        upper.or_else(|| {
            if from > 1 {
                self.find_in_range(1, from - 1, Preset::is_selectable)
            } else {
                None
            }
        })
    }

    /// Previous selectable preset before `from`, wrapping around once.
    ///
    /// With `from` set to `PRESET_INDEX_NONE` this yields the highest
    /// selectable preset.
    pub fn prev_available(&self, from: u8) -> Option<&Preset> {
        let lower = if from > 1 {
            self.rfind_in_range(1, from - 1, Preset::is_selectable)
        } else {
            None
        };

        lower.or_else(|| {
            if from < PRESET_INDEX_MAX {
                self.rfind_in_range(from + 1, PRESET_INDEX_MAX, Preset::is_selectable)
            } else {
                None
            }
        })
    }

    /// Set a preset name. Returns whether the name changed.
    pub fn set_name(&mut self, index: u8, name: &str) -> HasResult<bool> {
        validate_name(name)?;

        let slot = self
            .slot_of(index)
            .ok_or(HasError::Att(AttErrorCode::OutOfRange))?;
        let preset = &mut self.presets[slot];

        if !preset.is_writable() {
            return Err(HasError::Att(AttErrorCode::WriteNameNotAllowed));
        }

        if preset.name == name {
            return Ok(false);
        }

        preset.name = name.to_string();
        Ok(true)
    }

    /// Show or hide a preset. Returns whether the visibility changed.
    pub fn set_visibility(&mut self, index: u8, visible: bool) -> HasResult<bool> {
        let slot = self.slot_of(index).ok_or(HasError::NotFound)?;
        let preset = &mut self.presets[slot];

        if preset.is_visible() == visible {
            return Ok(false);
        }

        preset.hidden = !visible;
        Ok(true)
    }

    /// Set or clear the AVAILABLE property. Returns whether it changed.
    pub fn set_availability(&mut self, index: u8, available: bool) -> HasResult<bool> {
        let slot = self.slot_of(index).ok_or(HasError::NotFound)?;
        let preset = &mut self.presets[slot];

        if preset.is_available() == available {
            return Ok(false);
        }

        preset.properties.set(PresetProperties::AVAILABLE, available);
        Ok(true)
    }

    /// All presets in ascending index order
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }
}
