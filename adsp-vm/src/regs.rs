//! Word-addressed register blocks.
//!
//! A `RegisterFile` backs one hardware unit (SHIM, IPC, IRQ controller, MU).
//! Storage is a vector of 32-bit words indexed by `offset >> 2`. Registers that
//! need more than a raw store carry a `RegisterDesc` keyed by exact byte offset:
//! the storage half (`StoreMode`) is applied here, the behavioural half
//! (`RegisterEffect`) is handed back to the owning device so it can drive
//! doorbells, interrupt levels or the message channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Register access errors reported by the strict accessors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("{block}: offset {offset:#x} is out of range")]
    OutOfRange { block: String, offset: u64 },

    #[error("{block}: unsupported access width {width}")]
    UnsupportedWidth { block: String, width: usize },

    #[error("{block}: misaligned access at {offset:#x}")]
    Misaligned { block: String, offset: u64 },
}

/// How a CPU write reaches the backing word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMode {
    /// Store the written value verbatim.
    Raw,
    /// Written 1-bits inside the mask clear the stored bits; everything else is untouched.
    WriteOneToClear(u32),
    /// Stored verbatim; a read returns the current value and then zeroes it.
    ClearOnRead,
    /// Computed by the device, CPU writes are dropped.
    ReadOnly,
    /// Store `value & !strip`, then clear `clear` bits if the write carried them.
    Acknowledge { strip: u32, clear: u32 },
}

/// Device-level behaviour attached to a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterEffect {
    None,
    /// Command register of doorbell `n`.
    Doorbell(u8),
    /// Interrupt mask register guarding inbound doorbell `n`.
    DoorbellMask(u8),
    /// Status register of inbound doorbell `n`, cleared by the receiver.
    DoorbellStatus(u8),
    /// Aggregator mask-set register for a level.
    MaskSet(u8),
    /// Aggregator mask-clear register for a level.
    MaskClear(u8),
    /// Mirror the stored value to the peer verbatim.
    EchoToPeer,
    /// Firmware status word, watched for the panic signature.
    FirmwareStatus,
    /// Power-management command doorbell.
    PowerCommand,
    /// Power-management interrupt mask.
    PowerMask,
    /// Platform timer status/mask.
    TimerStatus,
    TimerMask,
}

/// Static description of one register with non-trivial behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDesc {
    pub name: String,
    pub offset: u32,
    pub store: StoreMode,
    pub effect: RegisterEffect,
}

impl RegisterDesc {
    pub fn new(name: &str, offset: u32, store: StoreMode, effect: RegisterEffect) -> Self {
        Self {
            name: name.to_string(),
            offset,
            store,
            effect,
        }
    }

    /// Plain storage, device behaviour only.
    pub fn effect(name: &str, offset: u32, effect: RegisterEffect) -> Self {
        Self::new(name, offset, StoreMode::Raw, effect)
    }
}

/// Layout of a register block: name, size and per-offset descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    pub name: String,
    pub base: u64,
    pub size: u32,
    pub registers: Vec<RegisterDesc>,
}

impl BlockLayout {
    pub fn new(name: &str, base: u64, size: u32) -> Self {
        Self {
            name: name.to_string(),
            base,
            size,
            registers: Vec::new(),
        }
    }

    pub fn with(mut self, desc: RegisterDesc) -> Self {
        self.registers.push(desc);
        self
    }
}

/// A register write whose descriptor asks the device to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEffect {
    pub offset: u32,
    /// The 32-bit value the CPU wrote to this word.
    pub written: u32,
    pub effect: RegisterEffect,
}

pub struct RegisterFile {
    name: String,
    base: u64,
    words: Vec<u32>,
    descs: BTreeMap<u32, RegisterDesc>,
}

impl RegisterFile {
    /// Create a zeroed block. `size` is rounded down to whole words.
    pub fn new(name: &str, base: u64, size: u32) -> Self {
        if size % 4 != 0 {
            log::warn!("[REG] {}: size {:#x} is not a whole number of words, truncated to {:#x}", name, size, size & !3);
        }
        Self {
            name: name.to_string(),
            base,
            words: vec![0; (size / 4) as usize],
            descs: BTreeMap::new(),
        }
    }

    pub fn from_layout(layout: &BlockLayout) -> Self {
        let mut file = Self::new(&layout.name, layout.base, layout.size);
        for desc in &layout.registers {
            file.describe(desc.clone());
        }
        file
    }

    pub fn describe(&mut self, desc: RegisterDesc) {
        self.descs.insert(desc.offset, desc);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    /// Whether an absolute address falls inside this block.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.base + self.size()
    }

    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn desc(&self, offset: u32) -> Option<&RegisterDesc> {
        self.descs.get(&offset)
    }

    /// Offset of the first register carrying `effect`.
    pub fn offset_of(&self, effect: RegisterEffect) -> Option<u32> {
        self.descs
            .values()
            .find(|d| d.effect == effect)
            .map(|d| d.offset)
    }

    // ====================================================================
    // Device-side word access (no side effects)
    // ====================================================================

    #[inline]
    pub fn word(&self, offset: u32) -> u32 {
        self.words.get((offset >> 2) as usize).copied().unwrap_or(0)
    }

    #[inline]
    pub fn set_word(&mut self, offset: u32, value: u32) {
        if let Some(w) = self.words.get_mut((offset >> 2) as usize) {
            *w = value;
        }
    }

    #[inline]
    pub fn set_bits(&mut self, offset: u32, bits: u32) {
        let v = self.word(offset) | bits;
        self.set_word(offset, v);
    }

    #[inline]
    pub fn clear_bits(&mut self, offset: u32, bits: u32) {
        let v = self.word(offset) & !bits;
        self.set_word(offset, v);
    }

    // ====================================================================
    // CPU-side access
    // ====================================================================

    fn check(&self, offset: u64, width: usize) -> Result<usize, RegisterError> {
        if width != 4 && width != 8 {
            return Err(RegisterError::UnsupportedWidth {
                block: self.name.clone(),
                width,
            });
        }
        if offset % 4 != 0 {
            return Err(RegisterError::Misaligned {
                block: self.name.clone(),
                offset,
            });
        }
        let idx = (offset >> 2) as usize;
        let words = width / 4;
        if idx.checked_add(words).is_none_or(|end| end > self.words.len()) {
            return Err(RegisterError::OutOfRange {
                block: self.name.clone(),
                offset,
            });
        }
        Ok(idx)
    }

    /// Strict read. 8-byte reads concatenate the word at `offset` (low) with
    /// the next one (high).
    pub fn try_read(&mut self, offset: u64, width: usize) -> Result<u64, RegisterError> {
        let idx = self.check(offset, width)?;
        let lo = self.load_word(idx) as u64;
        if width == 8 {
            let hi = self.load_word(idx + 1) as u64;
            Ok(lo | (hi << 32))
        } else {
            Ok(lo)
        }
    }

    fn load_word(&mut self, idx: usize) -> u32 {
        let value = self.words[idx];
        let offset = (idx as u32) << 2;
        if let Some(StoreMode::ClearOnRead) = self.descs.get(&offset).map(|d| d.store) {
            self.words[idx] = 0;
        }
        value
    }

    /// Strict write. Returns the device effects triggered by the written words.
    pub fn try_write(
        &mut self,
        offset: u64,
        width: usize,
        value: u64,
    ) -> Result<Vec<WriteEffect>, RegisterError> {
        let idx = self.check(offset, width)?;
        let mut effects = Vec::new();
        for i in 0..width / 4 {
            let word = (value >> (32 * i)) as u32;
            if let Some(effect) = self.store_word(idx + i, word) {
                effects.push(effect);
            }
        }
        Ok(effects)
    }

    fn store_word(&mut self, idx: usize, value: u32) -> Option<WriteEffect> {
        let offset = (idx as u32) << 2;
        let (store, effect) = match self.descs.get(&offset) {
            Some(d) => (d.store, d.effect),
            None => (StoreMode::Raw, RegisterEffect::None),
        };
        let slot = &mut self.words[idx];
        match store {
            StoreMode::Raw | StoreMode::ClearOnRead => *slot = value,
            StoreMode::WriteOneToClear(mask) => *slot &= !(value & mask),
            StoreMode::ReadOnly => {
                log::debug!("[{}] write to read-only register {:#x} dropped", self.name, offset);
            }
            StoreMode::Acknowledge { strip, clear } => {
                *slot = value & !strip;
                if value & clear != 0 {
                    *slot &= !clear;
                }
            }
        }
        match effect {
            RegisterEffect::None => None,
            effect => Some(WriteEffect {
                offset,
                written: value,
                effect,
            }),
        }
    }

    /// Permissive read: errors are logged and read as zero.
    pub fn read(&mut self, offset: u64, width: usize) -> u64 {
        match self.try_read(offset, width) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("[REG] read ignored: {}", e);
                0
            }
        }
    }

    /// Permissive write: errors are logged and the write is dropped.
    pub fn write(&mut self, offset: u64, width: usize, value: u64) -> Vec<WriteEffect> {
        match self.try_write(offset, width, value) {
            Ok(effects) => effects,
            Err(e) => {
                log::warn!("[REG] write ignored: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> RegisterFile {
        let layout = BlockLayout::new("shim", 0x1000, 0x40)
            .with(RegisterDesc::new("PISR", 0x08, StoreMode::WriteOneToClear(u32::MAX), RegisterEffect::TimerStatus))
            .with(RegisterDesc::new("STAT", 0x0c, StoreMode::ClearOnRead, RegisterEffect::None))
            .with(RegisterDesc::effect("IPCXH", 0x14, RegisterEffect::Doorbell(0)))
            .with(RegisterDesc::new("RO", 0x18, StoreMode::ReadOnly, RegisterEffect::None))
            .with(RegisterDesc::new(
                "IPCIE",
                0x1c,
                StoreMode::Acknowledge { strip: 1 << 31, clear: 1 << 30 },
                RegisterEffect::None,
            ));
        RegisterFile::from_layout(&layout)
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut regs = block();
        for offset in [0x00u64, 0x04, 0x10, 0x20, 0x3c] {
            regs.write(offset, 4, 0xdead_0000 | offset);
            assert_eq!(regs.read(offset, 4), 0xdead_0000 | offset);
        }
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let mut regs = block();
        assert!(regs.write(0x40, 4, 0x1234).is_empty());
        assert_eq!(regs.read(0x40, 4), 0);
        assert!(matches!(
            regs.try_read(0x40, 4),
            Err(RegisterError::OutOfRange { .. })
        ));
        // 8-byte access straddling the end
        assert!(regs.try_read(0x3c, 8).is_err());
    }

    #[test]
    fn test_partial_trailing_word_is_dropped() {
        let mut regs = RegisterFile::new("odd", 0, 10);
        assert_eq!(regs.size(), 8);
        regs.write(4, 4, 0x55);
        assert_eq!(regs.read(4, 4), 0x55);
        assert!(matches!(regs.try_read(8, 4), Err(RegisterError::OutOfRange { .. })));
    }

    #[test]
    fn test_unsupported_width() {
        let mut regs = block();
        assert!(matches!(
            regs.try_write(0x0, 2, 0xffff),
            Err(RegisterError::UnsupportedWidth { width: 2, .. })
        ));
        assert_eq!(regs.read(0x0, 1), 0);
        assert!(matches!(
            regs.try_read(0x2, 4),
            Err(RegisterError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_eight_byte_access_concatenates_words() {
        let mut regs = block();
        regs.write(0x20, 4, 0x1111_2222);
        regs.write(0x24, 4, 0x3333_4444);
        assert_eq!(regs.read(0x20, 8), 0x3333_4444_1111_2222);

        let effects = regs.write(0x10, 8, 0x8000_0000_0000_0001);
        assert_eq!(regs.word(0x10), 1);
        assert_eq!(regs.word(0x14), 0x8000_0000);
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].effect, RegisterEffect::Doorbell(0));
        assert_eq!(effects[0].written, 0x8000_0000);
    }

    #[test]
    fn test_write_one_to_clear() {
        let mut regs = block();
        regs.set_word(0x08, 0b1011);
        let effects = regs.write(0x08, 4, 0b0010);
        assert_eq!(regs.read(0x08, 4), 0b1001);
        assert_eq!(effects[0].effect, RegisterEffect::TimerStatus);
    }

    #[test]
    fn test_clear_on_read() {
        let mut regs = block();
        regs.write(0x0c, 4, 0x55);
        assert_eq!(regs.read(0x0c, 4), 0x55);
        assert_eq!(regs.read(0x0c, 4), 0);
    }

    #[test]
    fn test_read_only_and_acknowledge() {
        let mut regs = block();
        regs.write(0x18, 4, 0xffff);
        assert_eq!(regs.read(0x18, 4), 0);

        regs.set_word(0x1c, 1 << 30);
        regs.write(0x1c, 4, (1 << 31) | (1 << 30) | 0x5);
        assert_eq!(regs.word(0x1c), 0x5);
    }

    #[test]
    fn test_reset_zeroes_storage() {
        let mut regs = block();
        regs.write(0x00, 4, 0xffff_ffff);
        regs.write(0x3c, 4, 0x1);
        regs.reset();
        assert_eq!(regs.read(0x00, 4), 0);
        assert_eq!(regs.read(0x3c, 4), 0);
    }

    #[test]
    fn test_contains_and_lookup() {
        let regs = block();
        assert!(regs.contains(0x1000));
        assert!(regs.contains(0x103f));
        assert!(!regs.contains(0x1040));
        assert_eq!(regs.offset_of(RegisterEffect::Doorbell(0)), Some(0x14));
        assert_eq!(regs.desc(0x08).map(|d| d.name.as_str()), Some("PISR"));
    }
}
