//! "Reef" images: 16-byte file header, 12-byte module headers, 12-byte block
//! headers, all little-endian and packed back to back.

use super::{check_size, sig_at, u32_at, Block, BlockKind, FirmwareError, ImageHeader, Module};

pub const SIGNATURE: [u8; 4] = *b"Reef";
pub const HEADER_SIZE: usize = 16;
pub const MODULE_HEADER_SIZE: usize = 12;
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Number of block type codes; anything at or above is malformed.
pub const BLOCK_TYPE_COUNT: u32 = 15;

fn block_kind(kind: u32) -> Option<BlockKind> {
    match kind {
        1 => Some(BlockKind::Iram),
        2 => Some(BlockKind::Dram),
        3 => Some(BlockKind::Sram),
        4 => Some(BlockKind::Rom),
        5 => Some(BlockKind::Imr),
        0 | 6..BLOCK_TYPE_COUNT => Some(BlockKind::Reserved(kind)),
        _ => None,
    }
}

pub(crate) fn parse(body: &[u8]) -> Result<(ImageHeader, Vec<Module<'_>>), FirmwareError> {
    let header = ImageHeader {
        signature: sig_at(body, 0)?,
        file_size: u32_at(body, 4, "file size")?,
        module_count: u32_at(body, 8, "module count")?,
        format_version: u32_at(body, 12, "abi")?,
    };
    check_size(header.file_size, HEADER_SIZE, body.len())?;

    let mut modules = Vec::new();
    let mut cursor = HEADER_SIZE;
    for m in 0..header.module_count as usize {
        let module_type = u32_at(body, cursor, "module type")?;
        let size = u32_at(body, cursor + 4, "module size")?;
        let num_blocks = u32_at(body, cursor + 8, "module block count")?;
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
            signature: [0; 4],
            module_type,
            size,
            entry_point: 0,
            blocks,
        });
        cursor = end;
    }
    Ok((header, modules))
}
