//! Firmware image loading.
//!
//! Loading is split in two phases. `FirmwareImage::parse` validates the whole
//! image (signature, exact size, every module and block header, block types)
//! without touching memory. `FirmwareLoader::load` then plans each copy
//! against the `MemoryZoneMap` and only writes once the plan is complete, so
//! a rejected image leaves every zone untouched.

pub mod manifest;
pub mod sof;
pub mod sst;

use crate::zone::{MemoryZoneMap, ZoneError, ZoneType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First word of an extended manifest ("XMan").
pub const EXT_MANIFEST_MAGIC: u32 = 0x6e61_4d58;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    #[error("image truncated reading {what} at {offset:#x}")]
    Truncated { what: &'static str, offset: usize },

    #[error("invalid firmware signature")]
    InvalidSignature,

    #[error("invalid filesize mismatch: got {actual:#x} expected {declared:#x}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("module {module} block {block}: bad type {kind:#x}")]
    UnknownBlockType { module: usize, block: usize, kind: u32 },

    #[error("module {module} block {block} overruns its module")]
    BlockOverrun { module: usize, block: usize },

    #[error("failed to find firmware manifest header $AM1")]
    ManifestNotFound,

    #[error("manifest copy failed: {0}")]
    ManifestCopy(ZoneError),

    #[error("no {0:?} zone for manifest copy")]
    NoZone(ZoneType),
}

// ============================================================================
// Little-endian field access
// ============================================================================

pub(crate) fn bytes_at<'a>(
    buf: &'a [u8],
    offset: usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], FirmwareError> {
    offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
        .ok_or(FirmwareError::Truncated { what, offset })
}

pub(crate) fn u32_at(buf: &[u8], offset: usize, what: &'static str) -> Result<u32, FirmwareError> {
    let b = bytes_at(buf, offset, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn u16_at(buf: &[u8], offset: usize, what: &'static str) -> Result<u16, FirmwareError> {
    let b = bytes_at(buf, offset, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

pub(crate) fn sig_at(buf: &[u8], offset: usize) -> Result<[u8; 4], FirmwareError> {
    let b = bytes_at(buf, offset, 4, "signature")?;
    Ok([b[0], b[1], b[2], b[3]])
}

/// Bytes to skip for an extended manifest prefix, zero when absent.
pub fn ext_manifest_size(image: &[u8]) -> usize {
    match (u32_at(image, 0, "magic"), u32_at(image, 4, "size")) {
        (Ok(EXT_MANIFEST_MAGIC), Ok(size)) => size as usize,
        _ => 0,
    }
}

// ============================================================================
// Parsed image
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    /// "Reef" module/block images.
    Modern,
    /// "$SST" module/block images.
    Legacy,
}

/// Destination type of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Iram,
    Dram,
    Sram,
    Rom,
    Imr,
    /// Register writes in legacy images, never copied.
    Regs,
    Reserved(u32),
}

impl BlockKind {
    /// Zone type the loader copies this block into, `None` for blocks it does
    /// not own.
    pub fn zone_type(&self) -> Option<ZoneType> {
        match self {
            BlockKind::Iram => Some(ZoneType::Iram),
            BlockKind::Dram => Some(ZoneType::Dram),
            BlockKind::Sram => Some(ZoneType::Sram),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub signature: [u8; 4],
    pub file_size: u32,
    pub module_count: u32,
    /// ABI version for modern images, file format for legacy ones.
    pub format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<'a> {
    pub kind: BlockKind,
    pub offset: u32,
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module<'a> {
    /// Legacy module signature, zero for modern modules.
    pub signature: [u8; 4],
    pub module_type: u32,
    pub size: u32,
    pub entry_point: u32,
    pub blocks: Vec<Block<'a>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage<'a> {
    pub ext_manifest_size: usize,
    pub dialect: Dialect,
    pub header: ImageHeader,
    pub modules: Vec<Module<'a>>,
}

impl<'a> FirmwareImage<'a> {
    /// Validate and parse a complete image.
    pub fn parse(image: &'a [u8]) -> Result<Self, FirmwareError> {
        let skip = ext_manifest_size(image);
        if skip > 0 {
            log::debug!("[FW] extended manifest of {:#x} bytes", skip);
        }
        let body = image
            .get(skip..)
            .ok_or(FirmwareError::Truncated { what: "extended manifest", offset: 0 })?;

        let (dialect, header, modules) = match sig_at(body, 0)? {
            sof::SIGNATURE => {
                let (header, modules) = sof::parse(body)?;
                (Dialect::Modern, header, modules)
            }
            sst::SIGNATURE => {
                let (header, modules) = sst::parse(body)?;
                (Dialect::Legacy, header, modules)
            }
            _ => return Err(FirmwareError::InvalidSignature),
        };
        log::info!(
            "[FW] {:?} image: size={:#x} modules={} format={:#x}",
            dialect,
            header.file_size,
            header.module_count,
            header.format_version
        );
        Ok(Self {
            ext_manifest_size: skip,
            dialect,
            header,
            modules,
        })
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.modules.iter().map(|m| m.entry_point).find(|&e| e != 0)
    }
}

/// Require `file_size + header_size == actual` exactly.
pub(crate) fn check_size(file_size: u32, header_size: usize, actual: usize) -> Result<(), FirmwareError> {
    let declared = file_size as usize + header_size;
    if declared != actual {
        return Err(FirmwareError::SizeMismatch { declared, actual });
    }
    Ok(())
}

// ============================================================================
// Loader
// ============================================================================

/// Whether block offsets are corrected by the zone's host offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostOffsetMode {
    Subtract,
    Ignore,
}

/// How firmware reaches DSP memory. Chosen by the platform, never detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootMode {
    /// Per-block copy from "Reef"/"$SST" images.
    Blocks,
    /// Copy each loadable "$AM1" module segment to its virtual address.
    ManifestModules,
    /// Copy the preloaded part of the "$AM1" manifest into IMR for the boot ROM.
    ManifestToImr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub boot_mode: BootMode,
    pub modern_offsets: HostOffsetMode,
    pub legacy_offsets: HostOffsetMode,
    /// Offset inside the IMR zone receiving the manifest.
    pub imr_boot_ldr_offset: u64,
    /// Distance from the image start to the manifest the segment file offsets count from.
    pub file_offset: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            boot_mode: BootMode::Blocks,
            modern_offsets: HostOffsetMode::Subtract,
            legacy_offsets: HostOffsetMode::Subtract,
            imr_boot_ldr_offset: 0,
            file_offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ZeroSize,
    NotOwned(BlockKind),
    NoZone(ZoneType),
    Unmapped(u64),
    OutOfBounds(u64),
    NotLoadable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub module: usize,
    pub block: usize,
    pub zone: String,
    pub addr: u64,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub module: usize,
    pub block: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub dialect: Option<Dialect>,
    pub entry_point: Option<u32>,
    pub copied: Vec<Placement>,
    pub skipped: Vec<Skipped>,
}

impl LoadReport {
    pub fn bytes_copied(&self) -> usize {
        self.copied.iter().map(|p| p.len).sum()
    }
}

/// A copy decided during planning.
pub(crate) struct PlannedCopy<'a> {
    pub placement: Placement,
    pub bytes: &'a [u8],
}

/// Resolve a zone-relative failure into a skip reason.
pub(crate) fn skip_reason(err: ZoneError) -> SkipReason {
    match err {
        ZoneError::Unmapped(addr) => SkipReason::Unmapped(addr),
        ZoneError::OutOfBounds { addr, .. } => SkipReason::OutOfBounds(addr),
    }
}

/// Write a finished plan. Every copy was checked while planning.
pub(crate) fn apply(zones: &mut MemoryZoneMap, plan: &[PlannedCopy<'_>]) {
    for c in plan {
        if let Err(e) = zones.write(c.placement.addr, c.bytes) {
            log::error!("[FW] planned copy failed: {}", e);
        }
    }
}

pub struct FirmwareLoader {
    config: LoaderConfig,
}

impl FirmwareLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load `image` into `zones` using the configured boot mode.
    pub fn load(&self, image: &[u8], zones: &mut MemoryZoneMap) -> Result<LoadReport, FirmwareError> {
        match self.config.boot_mode {
            BootMode::Blocks => self.load_blocks(image, zones),
            BootMode::ManifestModules => manifest::copy_modules(image, zones, self.config.file_offset),
            BootMode::ManifestToImr => manifest::copy_to_imr(image, zones, self.config.imr_boot_ldr_offset),
        }
    }

    /// Destination address of a block, or why it is skipped.
    fn place(&self, zones: &MemoryZoneMap, dialect: Dialect, block: &Block<'_>) -> Result<(String, u64), SkipReason> {
        if block.payload.is_empty() {
            return Err(SkipReason::ZeroSize);
        }
        let zone_type = block.kind.zone_type().ok_or(SkipReason::NotOwned(block.kind))?;
        let anchor = zones.zone_of_type(zone_type).ok_or(SkipReason::NoZone(zone_type))?;
        let mode = match dialect {
            Dialect::Modern => self.config.modern_offsets,
            Dialect::Legacy => self.config.legacy_offsets,
        };
        let host_offset = match mode {
            HostOffsetMode::Subtract => anchor.desc().host_offset,
            HostOffsetMode::Ignore => 0,
        };
        let unshifted = anchor.base() + block.offset as u64;
        let addr = unshifted
            .checked_sub(host_offset)
            .ok_or(SkipReason::Unmapped(unshifted))?;
        let zone = zones
            .zone_for(addr)
            .ok_or(SkipReason::Unmapped(addr))?
            .name()
            .to_string();
        zones.check(addr, block.payload.len()).map_err(skip_reason)?;
        Ok((zone, addr))
    }

    fn load_blocks(&self, image: &[u8], zones: &mut MemoryZoneMap) -> Result<LoadReport, FirmwareError> {
        let fw = FirmwareImage::parse(image)?;
        let mut report = LoadReport {
            dialect: Some(fw.dialect),
            entry_point: fw.entry_point(),
            ..Default::default()
        };
        let mut plan = Vec::new();

        for (m, module) in fw.modules.iter().enumerate() {
            log::debug!(
                "[FW] module {} size={:#x} blocks={} type={:#x}",
                m,
                module.size,
                module.blocks.len(),
                module.module_type
            );
            for (b, block) in module.blocks.iter().enumerate() {
                match self.place(zones, fw.dialect, block) {
                    Ok((zone, addr)) => {
                        log::debug!(
                            "[FW] block {} type {:?} size {:#x} ==> {} {:#x}",
                            b,
                            block.kind,
                            block.payload.len(),
                            zone,
                            addr
                        );
                        plan.push(PlannedCopy {
                            placement: Placement {
                                module: m,
                                block: b,
                                zone,
                                addr,
                                len: block.payload.len(),
                            },
                            bytes: block.payload,
                        });
                    }
                    Err(reason) => {
                        match &reason {
                            SkipReason::ZeroSize => {
                                log::warn!("[FW] module {} block {} size zero, offset {:#x}", m, b, block.offset)
                            }
                            SkipReason::NotOwned(kind) => {
                                log::debug!("[FW] module {} block {} type {:?} not loaded", m, b, kind)
                            }
                            other => log::warn!("[FW] module {} block {} skipped: {:?}", m, b, other),
                        }
                        report.skipped.push(Skipped { module: m, block: b, reason });
                    }
                }
            }
        }

        apply(zones, &plan);
        report.copied = plan.into_iter().map(|c| c.placement).collect();
        log::info!(
            "[FW] loaded {} blocks ({:#x} bytes), skipped {}",
            report.copied.len(),
            report.bytes_copied(),
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
pub(crate) mod testimg {
    //! Byte-level image builders shared by the firmware tests.

    pub fn push32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Modern image: modules of `(type, offset, payload)` blocks.
    pub fn modern(modules: &[Vec<(u32, u32, Vec<u8>)>]) -> Vec<u8> {
        let mut body = Vec::new();
        for blocks in modules {
            let mut mbody = Vec::new();
            for (kind, offset, payload) in blocks {
                push32(&mut mbody, *kind);
                push32(&mut mbody, payload.len() as u32);
                push32(&mut mbody, *offset);
                mbody.extend_from_slice(payload);
            }
            push32(&mut body, 0);
            push32(&mut body, mbody.len() as u32);
            push32(&mut body, blocks.len() as u32);
            body.extend_from_slice(&mbody);
        }
        let mut image = b"Reef".to_vec();
        push32(&mut image, body.len() as u32);
        push32(&mut image, modules.len() as u32);
        push32(&mut image, 1);
        image.extend_from_slice(&body);
        image
    }

    /// Legacy image with one module of `(type, offset, payload)` blocks.
    pub fn legacy(blocks: &[(u32, u32, Vec<u8>)], entry: u32) -> Vec<u8> {
        let mut mbody = Vec::new();
        for (kind, offset, payload) in blocks {
            push32(&mut mbody, *kind);
            push32(&mut mbody, payload.len() as u32);
            push32(&mut mbody, *offset);
            push32(&mut mbody, 0);
            mbody.extend_from_slice(payload);
        }
        let mut module = b"$SST".to_vec();
        push32(&mut module, mbody.len() as u32);
        push32(&mut module, blocks.len() as u32);
        push16(&mut module, 0);
        push16(&mut module, 0);
        push32(&mut module, entry);
        push32(&mut module, 0);
        push32(&mut module, 0);
        module.extend_from_slice(&mbody);

        let mut image = b"$SST".to_vec();
        push32(&mut image, module.len() as u32);
        push32(&mut image, 1);
        push32(&mut image, 0);
        for _ in 0..4 {
            push32(&mut image, 0);
        }
        image.extend_from_slice(&module);
        image
    }

    pub fn with_ext_manifest(image: &[u8], size: u32) -> Vec<u8> {
        let mut out = Vec::new();
        push32(&mut out, super::EXT_MANIFEST_MAGIC);
        push32(&mut out, size);
        out.resize(size as usize, 0xee);
        out.extend_from_slice(image);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::testimg::*;
    use super::*;
    use crate::zone::ZoneDesc;

    const IRAM_BASE: u64 = 0xff2c_0000;
    const DRAM_BASE: u64 = 0xff30_0000;
    const IRAM_HOST: u64 = 0xc_0000;
    const DRAM_HOST: u64 = 0x10_0000;

    fn zones() -> MemoryZoneMap {
        MemoryZoneMap::new(&[
            ZoneDesc::new("iram", ZoneType::Iram, IRAM_BASE, 0x1000, IRAM_HOST),
            ZoneDesc::new("dram", ZoneType::Dram, DRAM_BASE, 0x1000, DRAM_HOST),
        ])
    }

    fn loader(legacy: HostOffsetMode) -> FirmwareLoader {
        FirmwareLoader::new(LoaderConfig {
            legacy_offsets: legacy,
            ..LoaderConfig::default()
        })
    }

    fn payload(seed: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_modern_round_trip() {
        let iram = payload(0x10, 32);
        let dram = payload(0x80, 20);
        let image = modern(&[
            vec![(1, IRAM_HOST as u32 + 0x40, iram.clone()), (4, 0, payload(1, 8))],
            vec![(2, DRAM_HOST as u32 + 0x100, dram.clone()), (5, 0x10, payload(2, 8)), (9, 0, payload(3, 4))],
        ]);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();

        assert_eq!(report.dialect, Some(Dialect::Modern));
        assert_eq!(zones.read(IRAM_BASE + 0x40, 32).unwrap(), iram.as_slice());
        assert_eq!(zones.read(DRAM_BASE + 0x100, 20).unwrap(), dram.as_slice());
        assert_eq!(report.copied.len(), 2);
        assert_eq!(report.bytes_copied(), 52);
        // ROM, IMR and reserved payloads are nowhere in memory
        let nonzero: usize = zones
            .zones()
            .iter()
            .map(|z| z.data().iter().filter(|&&b| b != 0).count())
            .sum();
        let expected = iram.iter().chain(dram.iter()).filter(|&&b| b != 0).count();
        assert_eq!(nonzero, expected);
        assert_eq!(report.skipped.len(), 3);
    }

    #[test]
    fn test_size_off_by_one_rejected() {
        let mut image = modern(&[vec![(1, IRAM_HOST as u32, payload(1, 16))]]);
        image.push(0);
        let mut zones = zones();
        let err = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap_err();
        assert!(matches!(err, FirmwareError::SizeMismatch { .. }));
        assert!(zones.is_blank());

        image.truncate(image.len() - 2);
        let err = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap_err();
        assert!(matches!(err, FirmwareError::SizeMismatch { .. }));
        assert!(zones.is_blank());
    }

    #[test]
    fn test_unknown_signature_rejected() {
        let mut image = modern(&[vec![]]);
        image[0..4].copy_from_slice(b"ELF\x7f");
        let mut zones = zones();
        assert_eq!(
            loader(HostOffsetMode::Subtract).load(&image, &mut zones),
            Err(FirmwareError::InvalidSignature)
        );
    }

    #[test]
    fn test_sram_block_without_sram_zone_is_skipped() {
        let image = modern(&[vec![
            (3, 0x200, payload(7, 16)),
            (1, IRAM_HOST as u32, payload(9, 4)),
        ]]);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert_eq!(report.skipped[0].reason, SkipReason::NoZone(ZoneType::Sram));
        assert_eq!(zones.read(IRAM_BASE, 4).unwrap(), payload(9, 4).as_slice());
    }

    #[test]
    fn test_unmapped_block_is_skipped() {
        // lands past the end of IRAM
        let image = modern(&[vec![(1, IRAM_HOST as u32 + 0x2000, payload(1, 8))]]);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert!(matches!(report.skipped[0].reason, SkipReason::Unmapped(_)));
        assert!(zones.is_blank());

        // straddles the end of IRAM
        let image = modern(&[vec![(1, IRAM_HOST as u32 + 0xffc, payload(1, 8))]]);
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert!(matches!(report.skipped[0].reason, SkipReason::OutOfBounds(_)));
        assert!(zones.is_blank());
    }

    #[test]
    fn test_zero_size_block_warns_and_continues() {
        let image = modern(&[vec![(1, 0, vec![]), (2, DRAM_HOST as u32, payload(5, 4))]]);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert_eq!(report.skipped[0].reason, SkipReason::ZeroSize);
        assert_eq!(zones.read(DRAM_BASE, 4).unwrap(), payload(5, 4).as_slice());
    }

    #[test]
    fn test_legacy_iram_block_lands_at_base() {
        let bytes = payload(0x42, 16);
        let image = legacy(&[(1, 0, bytes.clone())], 0xff2c_0400);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Ignore).load(&image, &mut zones).unwrap();
        assert_eq!(report.dialect, Some(Dialect::Legacy));
        assert_eq!(report.entry_point, Some(0xff2c_0400));
        assert_eq!(zones.read(IRAM_BASE, 16).unwrap(), bytes.as_slice());
    }

    #[test]
    fn test_legacy_host_offset_mode() {
        // Subtracting IRAM's host offset from a zero offset leaves the zone.
        let image = legacy(&[(1, 0, payload(1, 16))], 0);
        let mut zones = zones();
        let report = loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert!(matches!(report.skipped[0].reason, SkipReason::Unmapped(_)));
        assert!(zones.is_blank());
    }

    #[test]
    fn test_ext_manifest_is_skipped() {
        let inner = modern(&[vec![(1, IRAM_HOST as u32 + 8, payload(3, 8))]]);
        let image = with_ext_manifest(&inner, 0x40);
        assert_eq!(ext_manifest_size(&image), 0x40);
        let mut zones = zones();
        loader(HostOffsetMode::Subtract).load(&image, &mut zones).unwrap();
        assert_eq!(zones.read(IRAM_BASE + 8, 8).unwrap(), payload(3, 8).as_slice());
    }

    #[test]
    fn test_unknown_block_type_is_fatal_before_any_copy() {
        let image = modern(&[vec![
            (1, IRAM_HOST as u32, payload(1, 8)),
            (15, 0, payload(2, 8)),
        ]]);
        let mut zones = zones();
        assert_eq!(
            loader(HostOffsetMode::Subtract).load(&image, &mut zones),
            Err(FirmwareError::UnknownBlockType { module: 0, block: 1, kind: 15 })
        );
        assert!(zones.is_blank());
    }
}
