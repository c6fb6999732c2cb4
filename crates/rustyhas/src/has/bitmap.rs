//! Atomic bit sets shared between the receive path and the work context

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

const WORD_BITS: usize = 32;

/// Fixed size bitmap with atomic bit operations
#[derive(Debug)]
pub struct AtomicBitmap {
    words: Box<[AtomicU32]>,
    bits: usize,
}

impl AtomicBitmap {
    /// Create a cleared bitmap holding `bits` bits
    pub fn new(bits: usize) -> Self {
        let words = (0..bits.div_ceil(WORD_BITS))
            .map(|_| AtomicU32::new(0))
            .collect();

        Self { words, bits }
    }

    /// Number of bits in the bitmap
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    fn locate(&self, bit: usize) -> Option<(&AtomicU32, u32)> {
        if bit >= self.bits {
            return None;
        }

        Some((&self.words[bit / WORD_BITS], 1 << (bit % WORD_BITS)))
    }

    pub fn set(&self, bit: usize) {
        self.test_and_set(bit);
    }

    pub fn clear(&self, bit: usize) {
        self.test_and_clear(bit);
    }

    pub fn test(&self, bit: usize) -> bool {
        self.locate(bit)
            .map(|(word, mask)| word.load(Ordering::Acquire) & mask != 0)
            .unwrap_or(false)
    }

    /// Set a bit, returning its previous value
    pub fn test_and_set(&self, bit: usize) -> bool {
        self.locate(bit)
            .map(|(word, mask)| word.fetch_or(mask, Ordering::AcqRel) & mask != 0)
            .unwrap_or(false)
    }

    /// Clear a bit, returning its previous value
    pub fn test_and_clear(&self, bit: usize) -> bool {
        self.locate(bit)
            .map(|(word, mask)| word.fetch_and(!mask, Ordering::AcqRel) & mask != 0)
            .unwrap_or(false)
    }

    pub fn clear_all(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Release);
        }
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|word| word.load(Ordering::Acquire) != 0)
    }

    /// Lowest set bit
    pub fn first_set(&self) -> Option<usize> {
        self.words.iter().enumerate().find_map(|(i, word)| {
            let value = word.load(Ordering::Acquire);
            (value != 0).then(|| i * WORD_BITS + value.trailing_zeros() as usize)
        })
    }
}

bitflags::bitflags! {
    /// Per-peer state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PeerFlag: u8 {
        /// The link is encrypted
        const ENCRYPTED = 0x01;
        /// The ATT MTU is large enough for Control Point messages
        const MTU_VALID = 0x02;
        /// Control Point indications are enabled
        const CP_IND_ENABLED = 0x04;
        /// Control Point notifications are enabled
        const CP_NTF_ENABLED = 0x08;
        /// A Control Point message is scheduled or in flight
        const CP_BUSY = 0x10;
    }
}

/// Atomic set of [`PeerFlag`]s
#[derive(Debug, Default)]
pub struct PeerFlags(AtomicU8);

impl PeerFlags {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn get(&self) -> PeerFlag {
        PeerFlag::from_bits_truncate(self.0.load(Ordering::Acquire))
    }

    pub fn contains(&self, flag: PeerFlag) -> bool {
        self.get().contains(flag)
    }

    pub fn intersects(&self, flag: PeerFlag) -> bool {
        self.get().intersects(flag)
    }

    pub fn insert(&self, flag: PeerFlag) {
        self.0.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn remove(&self, flag: PeerFlag) {
        self.0.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    pub fn set(&self, flag: PeerFlag, value: bool) {
        if value {
            self.insert(flag);
        } else {
            self.remove(flag);
        }
    }

    /// Insert `flag`, returning whether all of it was already set
    pub fn test_and_insert(&self, flag: PeerFlag) -> bool {
        let prev = self.0.fetch_or(flag.bits(), Ordering::AcqRel);
        PeerFlag::from_bits_truncate(prev).contains(flag)
    }

    /// Remove `flag`, returning whether any of it was set
    pub fn test_and_remove(&self, flag: PeerFlag) -> bool {
        let prev = self.0.fetch_and(!flag.bits(), Ordering::AcqRel);
        PeerFlag::from_bits_truncate(prev).intersects(flag)
    }

    pub fn clear(&self) {
        self.0.store(0, Ordering::Release);
    }
}
