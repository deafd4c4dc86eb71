//! "$SST" images: 32-byte file header, 28-byte module headers carrying an
//! entry point, 16-byte block records.

use super::{check_size, sig_at, u16_at, u32_at, Block, BlockKind, FirmwareError, ImageHeader, Module};

pub const SIGNATURE: [u8; 4] = *b"$SST";
pub const HEADER_SIZE: usize = 32;
pub const MODULE_HEADER_SIZE: usize = 28;
pub const BLOCK_HEADER_SIZE: usize = 16;

fn block_kind(kind: u32) -> Option<BlockKind> {
    match kind {
        1 => Some(BlockKind::Iram),
        2 => Some(BlockKind::Dram),
        3 => Some(BlockKind::Regs),
        _ => None,
    }
}

pub(crate) fn parse(body: &[u8]) -> Result<(ImageHeader, Vec<Module<'_>>), FirmwareError> {
    let header = ImageHeader {
        signature: sig_at(body, 0)?,
        file_size: u32_at(body, 4, "file size")?,
        module_count: u32_at(body, 8, "module count")?,
        format_version: u32_at(body, 12, "file format")?,
    };
    check_size(header.file_size, HEADER_SIZE, body.len())?;

    let mut modules = Vec::new();
    let mut cursor = HEADER_SIZE;
    for m in 0..header.module_count as usize {
        let signature = sig_at(body, cursor)?;
        let size = u32_at(body, cursor + 4, "module size")?;
        let num_blocks = u32_at(body, cursor + 8, "module block count")?;
        let module_type = u16_at(body, cursor + 14, "module type")? as u32;
        let entry_point = u32_at(body, cursor + 16, "entry point")?;
        let start = cursor + MODULE_HEADER_SIZE;
        let end = start
            .checked_add(size as usize)
            .filter(|&end| end <= body.len())
            .ok_or(FirmwareError::Truncated { what: "module", offset: cursor })?;

        let mut blocks = Vec::new();
        let mut bcursor = start;
        for b in 0..num_blocks as usize {
            let kind = u32_at(body, bcursor, "block type")?;
            let bsize = u32_at(body, bcursor + 4, "block size")? as usize;
            let offset = u32_at(body, bcursor + 8, "block offset")?;
            let payload_start = bcursor + BLOCK_HEADER_SIZE;
            let payload_end = payload_start
                .checked_add(bsize)
                .filter(|&e| e <= end)
                .ok_or(FirmwareError::BlockOverrun { module: m, block: b })?;
            // zero-sized records are tolerated whatever their type
            let kind = match block_kind(kind) {
                Some(kind) => kind,
                None if bsize == 0 => BlockKind::Reserved(kind),
                None => return Err(FirmwareError::UnknownBlockType { module: m, block: b, kind }),
            };
            blocks.push(Block {
                kind,
                offset,
                payload: &body[payload_start..payload_end],
            });
            bcursor = payload_end;
        }

        modules.push(Module {
            signature,
            module_type,
            size,
            entry_point,
            blocks,
        });
        cursor = end;
    }
    Ok((header, modules))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::testimg::legacy;

    #[test]
    fn test_parse_legacy_module() {
        let image = legacy(&[(1, 0, vec![0xaa; 16]), (3, 0x40, vec![1, 2, 3, 4])], 0x1234);
        assert_eq!(image.len(), HEADER_SIZE + MODULE_HEADER_SIZE + 2 * BLOCK_HEADER_SIZE + 20);
        let (header, modules) = parse(&image).unwrap();
        assert_eq!(header.module_count, 1);
        assert_eq!(modules[0].signature, SIGNATURE);
        assert_eq!(modules[0].entry_point, 0x1234);
        assert_eq!(modules[0].blocks[0].kind, BlockKind::Iram);
        assert_eq!(modules[0].blocks[0].payload, &[0xaa; 16]);
        assert_eq!(modules[0].blocks[1].kind, BlockKind::Regs);
    }

    #[test]
    fn test_bad_legacy_block_type() {
        let image = legacy(&[(4, 0, vec![1])], 0);
        assert_eq!(
            parse(&image),
            Err(FirmwareError::UnknownBlockType { module: 0, block: 0, kind: 4 })
        );
    }

    #[test]
    fn test_legacy_size_mismatch() {
        let mut image = legacy(&[(1, 0, vec![1; 4])], 0);
        image.pop();
        assert!(matches!(parse(&image), Err(FirmwareError::SizeMismatch { .. })));
    }
}
