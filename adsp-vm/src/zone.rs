//! Named DSP memory regions and their backing storage.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ZoneError {
    #[error("Out-of-bounds zone access at {addr:#x} (+{len:#x})")]
    OutOfBounds { addr: u64, len: usize },

    #[error("No memory zone at {0:#x}")]
    Unmapped(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneType {
    Iram,
    Dram,
    Sram,
    Imr,
    Rom,
}

/// Static description of one memory zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDesc {
    pub name: String,
    pub zone_type: ZoneType,
    pub base: u64,
    pub size: u64,
    /// Subtracted from firmware block offsets targeting this zone type.
    pub host_offset: u64,
}

impl ZoneDesc {
    pub fn new(name: &str, zone_type: ZoneType, base: u64, size: u64, host_offset: u64) -> Self {
        Self {
            name: name.to_string(),
            zone_type,
            base,
            size,
            host_offset,
        }
    }

    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

pub struct MemoryZone {
    desc: ZoneDesc,
    data: Vec<u8>,
}

impl MemoryZone {
    pub fn new(desc: ZoneDesc) -> Self {
        let data = vec![0; desc.size as usize];
        Self { desc, data }
    }

    pub fn desc(&self) -> &ZoneDesc {
        &self.desc
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn base(&self) -> u64 {
        self.desc.base
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, addr: u64, len: usize) -> Result<std::ops::Range<usize>, ZoneError> {
        let err = ZoneError::OutOfBounds { addr, len };
        if !self.desc.contains(addr) {
            return Err(err);
        }
        let start = (addr - self.desc.base) as usize;
        let end = start.checked_add(len).ok_or(err.clone())?;
        if end > self.data.len() {
            return Err(err);
        }
        Ok(start..end)
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), ZoneError> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], ZoneError> {
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }

    pub fn load32(&self, addr: u64) -> Result<u32, ZoneError> {
        let bytes = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn store32(&mut self, addr: u64, value: u32) -> Result<(), ZoneError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// SHA-256 of the zone contents, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }

    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    pub fn clear(&mut self) {
        self.data.iter_mut().for_each(|b| *b = 0);
    }
}

/// The memory zones of one chip variant.
pub struct MemoryZoneMap {
    zones: Vec<MemoryZone>,
}

impl MemoryZoneMap {
    pub fn new(descs: &[ZoneDesc]) -> Self {
        Self {
            zones: descs.iter().cloned().map(MemoryZone::new).collect(),
        }
    }

    pub fn zones(&self) -> &[MemoryZone] {
        &self.zones
    }

    /// Zone containing `addr`, if any.
    pub fn zone_for(&self, addr: u64) -> Option<&MemoryZone> {
        self.zones.iter().find(|z| z.desc.contains(addr))
    }

    pub fn zone_for_mut(&mut self, addr: u64) -> Option<&mut MemoryZone> {
        self.zones.iter_mut().find(|z| z.desc.contains(addr))
    }

    /// First zone declared for a type; its base and host offset anchor
    /// firmware placement for that type.
    pub fn zone_of_type(&self, zone_type: ZoneType) -> Option<&MemoryZone> {
        self.zones.iter().find(|z| z.desc.zone_type == zone_type)
    }

    pub fn by_name(&self, name: &str) -> Option<&MemoryZone> {
        self.zones.iter().find(|z| z.desc.name == name)
    }

    /// Copy `bytes` to `addr`. The whole range must sit in one zone.
    pub fn write(&mut self, addr: u64, bytes: &[u8]) -> Result<(), ZoneError> {
        self.zone_for_mut(addr)
            .ok_or(ZoneError::Unmapped(addr))?
            .write_bytes(addr, bytes)
    }

    pub fn read(&self, addr: u64, len: usize) -> Result<&[u8], ZoneError> {
        self.zone_for(addr)
            .ok_or(ZoneError::Unmapped(addr))?
            .read_bytes(addr, len)
    }

    /// Check that a write of `len` bytes at `addr` would succeed.
    pub fn check(&self, addr: u64, len: usize) -> Result<(), ZoneError> {
        self.read(addr, len).map(|_| ())
    }

    pub fn is_blank(&self) -> bool {
        self.zones.iter().all(MemoryZone::is_blank)
    }

    pub fn clear(&mut self) {
        self.zones.iter_mut().for_each(MemoryZone::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> MemoryZoneMap {
        MemoryZoneMap::new(&[
            ZoneDesc::new("iram", ZoneType::Iram, 0x1000, 0x100, 0x8000),
            ZoneDesc::new("dram0", ZoneType::Dram, 0x2000, 0x100, 0),
            ZoneDesc::new("dram1", ZoneType::Dram, 0x2100, 0x100, 0),
        ])
    }

    #[test]
    fn test_zone_for_containment() {
        let zones = map();
        assert_eq!(zones.zone_for(0x1000).map(|z| z.name()), Some("iram"));
        assert_eq!(zones.zone_for(0x10ff).map(|z| z.name()), Some("iram"));
        assert!(zones.zone_for(0x1100).is_none());
        assert_eq!(zones.zone_for(0x2100).map(|z| z.name()), Some("dram1"));
        assert!(zones.zone_for(0).is_none());
    }

    #[test]
    fn test_zone_of_type_picks_first() {
        let zones = map();
        assert_eq!(zones.zone_of_type(ZoneType::Dram).map(|z| z.name()), Some("dram0"));
        assert!(zones.zone_of_type(ZoneType::Sram).is_none());
    }

    #[test]
    fn test_write_read() {
        let mut zones = map();
        zones.write(0x1010, &[1, 2, 3, 4]).unwrap();
        assert_eq!(zones.read(0x1010, 4).unwrap(), &[1, 2, 3, 4]);
        let iram = zones.zone_for(0x1000).unwrap();
        assert_eq!(iram.load32(0x1010).unwrap(), 0x0403_0201);
    }

    #[test]
    fn test_writes_do_not_straddle_zones() {
        let mut zones = map();
        assert_eq!(
            zones.write(0x20fe, &[0; 4]),
            Err(ZoneError::OutOfBounds { addr: 0x20fe, len: 4 })
        );
        assert_eq!(zones.write(0x5000, &[0; 4]), Err(ZoneError::Unmapped(0x5000)));
        assert!(zones.is_blank());
    }

    #[test]
    fn test_digest_changes_with_content() {
        let mut zones = map();
        let before = zones.zone_for(0x1000).unwrap().digest();
        assert_eq!(before.len(), 64);
        zones.write(0x1000, &[0xaa]).unwrap();
        assert_ne!(zones.zone_for(0x1000).unwrap().digest(), before);
        zones.clear();
        assert_eq!(zones.zone_for(0x1000).unwrap().digest(), before);
    }
}
