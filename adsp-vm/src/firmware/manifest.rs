//! cAVS "$AM1" firmware manifests.
//!
//! The manifest header is followed by one 116-byte entry per module, each
//! with three segment descriptors. Segment lengths are counted in 4 KiB pages.

use super::{
    apply, bytes_at, ext_manifest_size, sig_at, skip_reason, u16_at, u32_at, FirmwareError, LoadReport, Placement,
    PlannedCopy, SkipReason, Skipped,
};
use crate::zone::{MemoryZoneMap, ZoneType};

/// "$AM1" read as a little-endian word.
pub const HEADER_MAGIC: u32 = 0x314d_4124;
pub const MODULE_MAGIC: [u8; 4] = *b"$AME";
pub const HEADER_SIZE: usize = 52;
pub const MODULE_ENTRY_SIZE: usize = 116;
pub const SEGMENT_COUNT: usize = 3;
pub const PAGE_SIZE: usize = 4096;

/// Offset of the segment table inside a module entry.
const SEGMENTS_OFFSET: usize = 80;

// segment flag bits
pub const SEGMENT_LOAD: u32 = 1 << 2;
pub const SEGMENT_READONLY: u32 = 1 << 3;
pub const SEGMENT_CODE: u32 = 1 << 4;
pub const SEGMENT_DATA: u32 = 1 << 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestHeader {
    pub header_len: u32,
    pub name: [u8; 8],
    pub preload_page_count: u32,
    pub fw_image_flags: u32,
    pub feature_mask: u32,
    pub version: [u16; 4],
    pub num_module_entries: u32,
    pub hw_buf_base_addr: u32,
    pub hw_buf_length: u32,
    pub load_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDesc {
    pub flags: u32,
    pub v_base_addr: u32,
    pub file_offset: u32,
}

impl SegmentDesc {
    #[inline]
    pub fn is_loadable(&self) -> bool {
        self.flags & SEGMENT_LOAD != 0
    }

    /// Segment type (text, rodata, bss).
    #[inline]
    pub fn kind(&self) -> u32 {
        (self.flags >> 8) & 0xf
    }

    #[inline]
    pub fn length_bytes(&self) -> usize {
        (self.flags >> 16) as usize * PAGE_SIZE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub name: [u8; 8],
    pub entry_point: u32,
    pub segments: [SegmentDesc; SEGMENT_COUNT],
}

impl ModuleEntry {
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Offset of the header inside the image.
    pub offset: usize,
    pub header: ManifestHeader,
    pub modules: Vec<ModuleEntry>,
}

/// Locate "$AM1", scanning word by word after any extended manifest.
pub fn find_manifest(image: &[u8]) -> Result<usize, FirmwareError> {
    let mut offset = ext_manifest_size(image);
    while offset + 4 <= image.len() {
        if u32_at(image, offset, "manifest id")? == HEADER_MAGIC {
            log::info!("[FW] header $AM1 found at offset {:#x}", offset);
            return Ok(offset);
        }
        offset += 4;
    }
    Err(FirmwareError::ManifestNotFound)
}

fn name_at(buf: &[u8], offset: usize) -> Result<[u8; 8], FirmwareError> {
    let b = bytes_at(buf, offset, 8, "name")?;
    let mut name = [0u8; 8];
    name.copy_from_slice(b);
    Ok(name)
}

impl Manifest {
    pub fn parse(image: &[u8], offset: usize) -> Result<Self, FirmwareError> {
        let h = |rel: usize, what| u32_at(image, offset + rel, what);
        let header = ManifestHeader {
            header_len: h(4, "header length")?,
            name: name_at(image, offset + 8)?,
            preload_page_count: h(16, "preload page count")?,
            fw_image_flags: h(20, "image flags")?,
            feature_mask: h(24, "feature mask")?,
            version: [
                u16_at(image, offset + 28, "major")?,
                u16_at(image, offset + 30, "minor")?,
                u16_at(image, offset + 32, "hotfix")?,
                u16_at(image, offset + 34, "build")?,
            ],
            num_module_entries: h(36, "module entries")?,
            hw_buf_base_addr: h(40, "hw buffer base")?,
            hw_buf_length: h(44, "hw buffer length")?,
            load_offset: h(48, "load offset")?,
        };

        let mut modules = Vec::new();
        for i in 0..header.num_module_entries as usize {
            let m = offset + HEADER_SIZE + i * MODULE_ENTRY_SIZE;
            if sig_at(image, m)? != MODULE_MAGIC {
                log::warn!("[FW] module entry {} has no $AME id", i);
            }
            let mut segments = [SegmentDesc { flags: 0, v_base_addr: 0, file_offset: 0 }; SEGMENT_COUNT];
            for (j, seg) in segments.iter_mut().enumerate() {
                let s = m + SEGMENTS_OFFSET + j * 12;
                *seg = SegmentDesc {
                    flags: u32_at(image, s, "segment flags")?,
                    v_base_addr: u32_at(image, s + 4, "segment address")?,
                    file_offset: u32_at(image, s + 8, "segment file offset")?,
                };
            }
            modules.push(ModuleEntry {
                name: name_at(image, m + 4)?,
                entry_point: u32_at(image, m + 64, "entry point")?,
                segments,
            });
        }
        Ok(Self { offset, header, modules })
    }

    pub fn locate(image: &[u8]) -> Result<Self, FirmwareError> {
        Self::parse(image, find_manifest(image)?)
    }
}

/// Copy every loadable segment to the zone holding its virtual address.
/// Segment file offsets count from `manifest - file_offset`.
pub fn copy_modules(image: &[u8], zones: &mut MemoryZoneMap, file_offset: u64) -> Result<LoadReport, FirmwareError> {
    let manifest = Manifest::locate(image)?;
    let base = manifest
        .offset
        .checked_sub(file_offset as usize)
        .ok_or(FirmwareError::Truncated { what: "file offset", offset: manifest.offset })?;
    log::info!(
        "[FW] found {} modules, using file offset {:#x}",
        manifest.header.num_module_entries,
        file_offset
    );

    let mut report = LoadReport {
        entry_point: manifest.modules.first().map(|m| m.entry_point),
        ..Default::default()
    };
    let mut plan = Vec::new();

    for (i, module) in manifest.modules.iter().enumerate() {
        log::debug!("[FW] checking module {} : {}", i, module.name());
        for (j, seg) in module.segments.iter().enumerate() {
            if !seg.is_loadable() {
                report.skipped.push(Skipped { module: i, block: j, reason: SkipReason::NotLoadable });
                continue;
            }
            let len = seg.length_bytes();
            let bytes = bytes_at(image, base + seg.file_offset as usize, len, "segment")?;
            let addr = seg.v_base_addr as u64;
            let zone = match zones.zone_for(addr) {
                Some(zone) => zone.name().to_string(),
                None => {
                    log::warn!(
                        "[FW] unmatched segment {} file offset {:#x} addr {:#x} size {:#x}",
                        j,
                        seg.file_offset,
                        addr,
                        len
                    );
                    report.skipped.push(Skipped { module: i, block: j, reason: SkipReason::Unmapped(addr) });
                    continue;
                }
            };
            if let Err(e) = zones.check(addr, len) {
                log::warn!("[FW] segment {} of module {} does not fit: {}", j, i, e);
                report.skipped.push(Skipped { module: i, block: j, reason: skip_reason(e) });
                continue;
            }
            log::debug!(
                "[FW] {} segment {} file offset {:#x} addr {:#x} size {:#x}",
                zone,
                j,
                seg.file_offset,
                addr,
                len
            );
            plan.push(PlannedCopy {
                placement: Placement { module: i, block: j, zone, addr, len },
                bytes,
            });
        }
    }

    apply(zones, &plan);
    report.copied = plan.into_iter().map(|c| c.placement).collect();
    Ok(report)
}

/// Copy the first `preload_page_count` pages starting at the manifest header
/// into the IMR zone at `imr_offset`, for the boot ROM to pick up.
pub fn copy_to_imr(image: &[u8], zones: &mut MemoryZoneMap, imr_offset: u64) -> Result<LoadReport, FirmwareError> {
    let manifest = Manifest::locate(image)?;
    let len = manifest.header.preload_page_count as usize * PAGE_SIZE;
    let bytes = bytes_at(image, manifest.offset, len, "preload pages")?;

    let imr = zones.zone_of_type(ZoneType::Imr).ok_or(FirmwareError::NoZone(ZoneType::Imr))?;
    let zone = imr.name().to_string();
    let addr = imr.base() + imr_offset;
    zones.check(addr, len).map_err(FirmwareError::ManifestCopy)?;
    zones.write(addr, bytes).map_err(FirmwareError::ManifestCopy)?;
    log::info!(
        "[FW] ROM loader: copy {} kernel pages to {} at {:#x}",
        manifest.header.preload_page_count,
        zone,
        addr
    );

    Ok(LoadReport {
        dialect: None,
        entry_point: manifest.modules.first().map(|m| m.entry_point),
        copied: vec![Placement { module: 0, block: 0, zone, addr, len }],
        skipped: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::testimg::{push16, push32};
    use crate::firmware::{BootMode, FirmwareLoader, LoaderConfig};
    use crate::zone::ZoneDesc;

    const SRAM: u64 = 0xbe00_0000;
    const IMR: u64 = 0xb000_0000;

    fn seg(flags: u32, addr: u32, off: u32) -> (u32, u32, u32) {
        (flags, addr, off)
    }

    /// `prefix` zero bytes, then a manifest with the given modules, then `tail`.
    fn image(prefix: usize, preload: u32, modules: &[[(u32, u32, u32); 3]], tail: &[u8]) -> Vec<u8> {
        let mut img = vec![0u8; prefix];
        push32(&mut img, HEADER_MAGIC);
        push32(&mut img, HEADER_SIZE as u32);
        img.extend_from_slice(b"ADSPFW\0\0");
        push32(&mut img, preload);
        push32(&mut img, 0);
        push32(&mut img, 0x1f);
        for v in [0xa, 0x246e, 0, 0x940] {
            push16(&mut img, v);
        }
        push32(&mut img, modules.len() as u32);
        push32(&mut img, 0);
        push32(&mut img, 0);
        push32(&mut img, 0);
        for segs in modules {
            let start = img.len();
            img.extend_from_slice(&MODULE_MAGIC);
            img.extend_from_slice(b"BASEFW\0\0");
            img.extend_from_slice(&[0; 16]);
            push32(&mut img, 0x21);
            img.extend_from_slice(&[0; 32]);
            push32(&mut img, 0xbe00_a000);
            push16(&mut img, 0);
            push16(&mut img, 0);
            push32(&mut img, 0x3);
            push16(&mut img, 1);
            push16(&mut img, 0x23);
            for (flags, addr, off) in segs {
                push32(&mut img, *flags);
                push32(&mut img, *addr);
                push32(&mut img, *off);
            }
            assert_eq!(img.len() - start, MODULE_ENTRY_SIZE);
        }
        img.extend_from_slice(tail);
        img
    }

    fn zones() -> MemoryZoneMap {
        MemoryZoneMap::new(&[
            ZoneDesc::new("hp-sram", ZoneType::Sram, SRAM, 0x4000, 0),
            ZoneDesc::new("imr", ZoneType::Imr, IMR, 0x4000, 0),
        ])
    }

    #[test]
    fn test_find_manifest_after_padding() {
        let img = image(0x20, 0, &[], &[]);
        assert_eq!(find_manifest(&img), Ok(0x20));
        let m = Manifest::locate(&img).unwrap();
        assert_eq!(m.header.version, [0xa, 0x246e, 0, 0x940]);
        assert_eq!(&m.header.name[..6], b"ADSPFW");
        assert!(matches!(find_manifest(&[0u8; 64]), Err(FirmwareError::ManifestNotFound)));
    }

    #[test]
    fn test_copy_modules() {
        // one text page loaded to SRAM + 0x1000, a non-loaded bss and a
        // segment aimed outside every zone
        let text_off = (HEADER_SIZE + MODULE_ENTRY_SIZE) as u32;
        let load_1p = SEGMENT_LOAD | SEGMENT_CODE | (1 << 16);
        let mut text = vec![0u8; PAGE_SIZE];
        text[0] = 0x5a;
        text[PAGE_SIZE - 1] = 0xa5;
        let img = image(
            0,
            1,
            &[[
                seg(load_1p, SRAM as u32 + 0x1000, text_off),
                seg(SEGMENT_DATA | (2 << 8) | (1 << 16), SRAM as u32, 0),
                seg(load_1p, 0x1000_0000, text_off),
            ]],
            &text,
        );
        let mut zones = zones();
        let report = copy_modules(&img, &mut zones, 0).unwrap();
        assert_eq!(report.copied.len(), 1);
        assert_eq!(report.copied[0].zone, "hp-sram");
        assert_eq!(zones.read(SRAM + 0x1000, PAGE_SIZE).unwrap(), text.as_slice());
        assert_eq!(report.skipped[0].reason, SkipReason::NotLoadable);
        assert_eq!(report.skipped[1].reason, SkipReason::Unmapped(0x1000_0000));
        assert_eq!(report.entry_point, Some(0xbe00_a000));
    }

    #[test]
    fn test_copy_modules_segment_past_image_is_fatal() {
        let img = image(0, 1, &[[seg(SEGMENT_LOAD | (4 << 16), SRAM as u32, 0), seg(0, 0, 0), seg(0, 0, 0)]], &[]);
        let mut zones = zones();
        assert!(matches!(
            copy_modules(&img, &mut zones, 0),
            Err(FirmwareError::Truncated { .. })
        ));
        assert!(zones.is_blank());
    }

    #[test]
    fn test_copy_to_imr() {
        let img = image(0x10, 1, &[], &vec![0x77; PAGE_SIZE]);
        let mut zones = zones();
        let loader = FirmwareLoader::new(LoaderConfig {
            boot_mode: BootMode::ManifestToImr,
            imr_boot_ldr_offset: 0x1000,
            ..LoaderConfig::default()
        });
        let report = loader.load(&img, &mut zones).unwrap();
        assert_eq!(report.bytes_copied(), PAGE_SIZE);
        assert_eq!(zones.read(IMR + 0x1000, 4).unwrap(), &HEADER_MAGIC.to_le_bytes());
        assert_eq!(zones.read(IMR + 0x1000, PAGE_SIZE).unwrap(), &img[0x10..0x10 + PAGE_SIZE]);
        assert!(zones.by_name("hp-sram").unwrap().is_blank());
    }

    #[test]
    fn test_copy_to_imr_out_of_bounds_writes_nothing() {
        let img = image(0, 2, &[], &vec![0x77; 2 * PAGE_SIZE]);
        let mut zones = zones();
        let err = copy_to_imr(&img, &mut zones, 0x3000).unwrap_err();
        assert!(matches!(err, FirmwareError::ManifestCopy(_)));
        assert!(zones.is_blank());
    }
}
