//! CPU interrupt lines and the multi-level interrupt aggregator.
//!
//! Each aggregator level keeps three words in its register block: raw source
//! status, mask and consolidated status (`raw & !mask`). The CPU line mapped to
//! a level is driven only when the consolidated status crosses zero.

use crate::regs::{BlockLayout, RegisterDesc, RegisterEffect, RegisterFile, StoreMode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Highest CPU interrupt number tracked by `IrqLines`.
pub const MAX_IRQ_LINES: u32 = 64;

/// Level changes kept by `IrqLines`; older entries are dropped first.
pub const TRANSITION_HISTORY: usize = 64;

/// CPU-visible interrupt inputs of one simulated processor.
///
/// The CPU model polls `pending()`; the most recent `TRANSITION_HISTORY` level
/// changes are also kept so the edge behaviour of the devices can be inspected.
#[derive(Debug, Default, Clone)]
pub struct IrqLines {
    pending: u64,
    transitions: VecDeque<(u32, bool)>,
}

impl IrqLines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `line` to `level`.
    pub fn set(&mut self, line: u32, level: bool) {
        if line >= MAX_IRQ_LINES {
            log::warn!("[IRQ] line {} out of range", line);
            return;
        }
        log::debug!("[IRQ] line {} -> {}", line, if level { "high" } else { "low" });
        if level {
            self.pending |= 1 << line;
        } else {
            self.pending &= !(1 << line);
        }
        if self.transitions.len() == TRANSITION_HISTORY {
            self.transitions.pop_front();
        }
        self.transitions.push_back((line, level));
    }

    #[inline]
    pub fn is_asserted(&self, line: u32) -> bool {
        line < MAX_IRQ_LINES && self.pending & (1 << line) != 0
    }

    #[inline]
    pub fn pending(&self) -> u64 {
        self.pending
    }

    /// Recent `set` calls since creation or the last `take_transitions`, oldest first.
    pub fn transitions(&self) -> Vec<(u32, bool)> {
        self.transitions.iter().copied().collect()
    }

    pub fn take_transitions(&mut self) -> Vec<(u32, bool)> {
        self.transitions.drain(..).collect()
    }

    pub fn reset(&mut self) {
        self.pending = 0;
        self.transitions.clear();
    }
}

// ============================================================================
// Routing tables
// ============================================================================

/// Named interrupt sources feeding the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrqSource {
    HpGpDma,
    Dwct1,
    Dwct0,
    L2Me,
    Dts,
    Idc,
    Ipc,
    DspGcl,
    DspGhos,
    HpGpDma0,
    DspGhis,
    LpGpDma,
    LpGpDma1,
    DspGlos,
    LpGpDma0,
    DspGlis,
    Dmic0,
    Sndw,
    Ssp(u8),
}

/// Where a source lands: a level and a bit field within it.
///
/// Without `shift` the whole `mask` is raised. With `shift`, the source value
/// is shifted into the field (e.g. one bit per DMA channel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrqRoute {
    pub source: IrqSource,
    pub level: u8,
    pub mask: u32,
    pub shift: Option<u8>,
}

impl IrqRoute {
    pub const fn bit(source: IrqSource, level: u8, mask: u32) -> Self {
        Self { source, level, mask, shift: None }
    }

    pub const fn field(source: IrqSource, level: u8, mask: u32, shift: u8) -> Self {
        Self { source, level, mask, shift: Some(shift) }
    }

    /// Bits of the level touched by `value` from this source.
    #[inline]
    pub fn bits(&self, value: u32) -> u32 {
        match self.shift {
            Some(shift) => value.checked_shl(shift as u32).unwrap_or(0) & self.mask,
            None => self.mask,
        }
    }
}

fn ssp_routes(level: u8) -> impl Iterator<Item = IrqRoute> {
    (0..6u8).rev().map(move |n| IrqRoute::bit(IrqSource::Ssp(n), level, 1 << n))
}

/// cAVS 1.5 (Skylake/Apollolake class) routing.
pub fn cavs_1_5_routes() -> Vec<IrqRoute> {
    use IrqSource::*;
    let mut routes = vec![
        IrqRoute::field(HpGpDma, 2, 0xff00_0000, 24),
        IrqRoute::bit(Dwct1, 2, 0x0080_0000),
        IrqRoute::bit(Dwct0, 2, 0x0040_0000),
        IrqRoute::bit(L2Me, 2, 0x0020_0000),
        IrqRoute::bit(Dts, 2, 0x0010_0000),
        IrqRoute::bit(Idc, 2, 0x80),
        IrqRoute::bit(Ipc, 2, 0x40),
        IrqRoute::bit(DspGcl, 3, 0x8000_0000),
        IrqRoute::field(DspGhos, 3, 0x7fff_0000, 16),
        IrqRoute::bit(HpGpDma0, 3, 0x8000),
        IrqRoute::bit(DspGhis, 3, 0x7fff),
        IrqRoute::bit(LpGpDma1, 4, 0x8000_0000),
        IrqRoute::field(DspGlos, 4, 0x7fff_0000, 16),
        IrqRoute::bit(LpGpDma0, 4, 0x8000),
        IrqRoute::bit(DspGlis, 4, 0x7fff),
        IrqRoute::field(LpGpDma1, 5, 0xff00_0000, 24),
        IrqRoute::field(LpGpDma0, 5, 0x00ff_0000, 16),
        IrqRoute::bit(Dmic0, 5, 0x40),
    ];
    routes.extend(ssp_routes(5));
    routes
}

/// cAVS 1.8 (Cannonlake class) routing.
pub fn cavs_1_8_routes() -> Vec<IrqRoute> {
    use IrqSource::*;
    let mut routes = vec![
        IrqRoute::field(HpGpDma, 2, 0xff00_0000, 24),
        IrqRoute::bit(Dwct1, 2, 0x0080_0000),
        IrqRoute::bit(Dwct0, 2, 0x0040_0000),
        IrqRoute::bit(L2Me, 2, 0x0020_0000),
        IrqRoute::bit(Dts, 2, 0x0010_0000),
        IrqRoute::bit(Idc, 2, 0x80),
        IrqRoute::bit(Ipc, 2, 0x40),
        IrqRoute::bit(DspGcl, 3, 0x8000_0000),
        IrqRoute::field(DspGhos, 3, 0x7fff_0000, 16),
        IrqRoute::bit(HpGpDma0, 3, 0x8000),
        IrqRoute::bit(DspGhis, 3, 0x7fff),
        IrqRoute::bit(LpGpDma1, 4, 0x8000_0000),
        IrqRoute::field(DspGlos, 4, 0x7fff_0000, 16),
        IrqRoute::bit(LpGpDma0, 4, 0x8000),
        IrqRoute::bit(DspGlis, 4, 0x7fff),
        IrqRoute::bit(LpGpDma, 5, 0x0001_0000),
        IrqRoute::bit(Dwct1, 5, 0x8000),
        IrqRoute::bit(Dwct0, 5, 0x4000),
        IrqRoute::bit(Sndw, 5, 0x800),
        IrqRoute::bit(Dmic0, 5, 0x80),
    ];
    routes.extend(ssp_routes(5));
    routes
}

// ============================================================================
// Aggregator layout
// ============================================================================

/// Register offsets and CPU line of one aggregation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelDesc {
    pub level: u8,
    pub line: u32,
    pub mask_set: u32,
    pub mask_clear: u32,
    pub mask: u32,
    pub status: u32,
    pub raw: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorLayout {
    pub base: u64,
    pub levels: Vec<LevelDesc>,
    pub routes: Vec<IrqRoute>,
}

/// Bytes between consecutive level register groups in the cAVS layout.
pub const CAVS_LEVEL_STRIDE: u32 = 0x20;

impl AggregatorLayout {
    /// cAVS style layout: one register group per level starting at level 2,
    /// `lines[i]` being the CPU input for level `2 + i`.
    pub fn cavs(base: u64, lines: &[u32], routes: Vec<IrqRoute>) -> Self {
        let levels = lines
            .iter()
            .enumerate()
            .map(|(i, &line)| {
                let group = i as u32 * CAVS_LEVEL_STRIDE;
                LevelDesc {
                    level: 2 + i as u8,
                    line,
                    mask_set: group,
                    mask_clear: group + 0x4,
                    mask: group + 0x8,
                    status: group + 0xc,
                    raw: group + 0x10,
                }
            })
            .collect();
        Self { base, levels, routes }
    }

    pub fn block(&self) -> BlockLayout {
        let size = self.levels.len() as u32 * CAVS_LEVEL_STRIDE;
        let mut block = BlockLayout::new("irq", self.base, size.max(4));
        for l in &self.levels {
            block = block
                .with(RegisterDesc::effect(&format!("IL{}MSD", l.level), l.mask_set, RegisterEffect::MaskSet(l.level)))
                .with(RegisterDesc::effect(&format!("IL{}MCD", l.level), l.mask_clear, RegisterEffect::MaskClear(l.level)))
                .with(RegisterDesc::new(&format!("IL{}MD", l.level), l.mask, StoreMode::ReadOnly, RegisterEffect::None))
                .with(RegisterDesc::new(&format!("IL{}SD", l.level), l.status, StoreMode::ReadOnly, RegisterEffect::None))
                .with(RegisterDesc::new(&format!("IL{}RSD", l.level), l.raw, StoreMode::ReadOnly, RegisterEffect::None));
        }
        block
    }
}

// ============================================================================
// Aggregator
// ============================================================================

pub struct InterruptAggregator {
    regs: RegisterFile,
    levels: Vec<LevelDesc>,
    routes: Vec<IrqRoute>,
}

impl InterruptAggregator {
    pub fn new(layout: &AggregatorLayout) -> Self {
        Self {
            regs: RegisterFile::from_layout(&layout.block()),
            levels: layout.levels.clone(),
            routes: layout.routes.clone(),
        }
    }

    pub fn regs(&self) -> &RegisterFile {
        &self.regs
    }

    fn level(&self, level: u8) -> Option<LevelDesc> {
        self.levels.iter().find(|l| l.level == level).copied()
    }

    pub fn raw(&self, level: u8) -> u32 {
        self.level(level).map_or(0, |l| self.regs.word(l.raw))
    }

    pub fn mask(&self, level: u8) -> u32 {
        self.level(level).map_or(0, |l| self.regs.word(l.mask))
    }

    pub fn status(&self, level: u8) -> u32 {
        self.level(level).map_or(0, |l| self.regs.word(l.status))
    }

    pub fn line(&self, level: u8) -> Option<u32> {
        self.level(level).map(|l| l.line)
    }

    /// Recompute the consolidated status of `desc` and drive its line on a
    /// zero crossing.
    fn update(&mut self, desc: LevelDesc, lines: &mut IrqLines) {
        let before = self.regs.word(desc.status);
        let after = self.regs.word(desc.raw) & !self.regs.word(desc.mask);
        self.regs.set_word(desc.status, after);
        match (before != 0, after != 0) {
            (false, true) => {
                log::debug!("[IRQ] level {} asserted status={:#x}", desc.level, after);
                lines.set(desc.line, true);
            }
            (true, false) => {
                log::debug!("[IRQ] level {} cleared", desc.level);
                lines.set(desc.line, false);
            }
            _ => {}
        }
    }

    fn with_level(&mut self, level: u8, lines: &mut IrqLines, f: impl FnOnce(&mut RegisterFile, LevelDesc)) {
        match self.level(level) {
            Some(desc) => {
                f(&mut self.regs, desc);
                self.update(desc, lines);
            }
            None => log::warn!("[IRQ] no aggregation level {}", level),
        }
    }

    /// A source asserts `bits` at `level`.
    pub fn set_source(&mut self, level: u8, bits: u32, lines: &mut IrqLines) {
        self.with_level(level, lines, |regs, d| regs.set_bits(d.raw, bits));
    }

    /// A source drops `bits` at `level`.
    pub fn clear_source(&mut self, level: u8, bits: u32, lines: &mut IrqLines) {
        self.with_level(level, lines, |regs, d| regs.clear_bits(d.raw, bits));
    }

    pub fn mask_set(&mut self, level: u8, bits: u32, lines: &mut IrqLines) {
        self.with_level(level, lines, |regs, d| regs.set_bits(d.mask, bits));
    }

    /// Unmasking a bit whose raw status is already set raises the line.
    pub fn mask_clear(&mut self, level: u8, bits: u32, lines: &mut IrqLines) {
        self.with_level(level, lines, |regs, d| regs.clear_bits(d.mask, bits));
    }

    fn routes_for(&self, source: IrqSource) -> Vec<IrqRoute> {
        self.routes.iter().filter(|r| r.source == source).copied().collect()
    }

    /// Raise a named source through every route it has on this variant.
    /// Returns false if the source is not routed at all.
    pub fn raise(&mut self, source: IrqSource, value: u32, lines: &mut IrqLines) -> bool {
        let routes = self.routes_for(source);
        if routes.is_empty() {
            log::warn!("[IRQ] source {:?} not routed", source);
            return false;
        }
        for route in routes {
            self.set_source(route.level, route.bits(value), lines);
        }
        true
    }

    pub fn lower(&mut self, source: IrqSource, value: u32, lines: &mut IrqLines) -> bool {
        let routes = self.routes_for(source);
        for route in &routes {
            self.clear_source(route.level, route.bits(value), lines);
        }
        !routes.is_empty()
    }

    // ====================================================================
    // MMIO
    // ====================================================================

    pub fn read(&mut self, offset: u64, width: usize) -> u64 {
        self.regs.read(offset, width)
    }

    pub fn write(&mut self, offset: u64, width: usize, value: u64, lines: &mut IrqLines) {
        for w in self.regs.write(offset, width, value) {
            match w.effect {
                RegisterEffect::MaskSet(level) => self.mask_set(level, w.written, lines),
                RegisterEffect::MaskClear(level) => self.mask_clear(level, w.written, lines),
                _ => {}
            }
        }
    }

    pub fn reset(&mut self, lines: &mut IrqLines) {
        let levels = self.levels.clone();
        for desc in levels {
            let was = self.regs.word(desc.status) != 0;
            if was {
                lines.set(desc.line, false);
            }
        }
        self.regs.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const L2: u32 = 16;
    const L5: u32 = 19;

    fn aggregator() -> InterruptAggregator {
        InterruptAggregator::new(&AggregatorLayout::cavs(0x7800, &[16, 17, 18, 19], cavs_1_5_routes()))
    }

    fn check_invariant(agg: &InterruptAggregator, lines: &IrqLines) {
        for level in 2..=5u8 {
            let expected = agg.raw(level) & !agg.mask(level) != 0;
            let line = agg.line(level).unwrap();
            assert_eq!(lines.is_asserted(line), expected, "level {}", level);
            assert_eq!(agg.status(level), agg.raw(level) & !agg.mask(level));
        }
    }

    #[test]
    fn test_line_tracks_consolidated_status() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        // Small deterministic walk over set/clear/mask/unmask on two levels.
        let ops: [(u8, u8, u32); 14] = [
            (0, 2, 0x40),
            (2, 2, 0x40),
            (0, 2, 0x80),
            (1, 2, 0x40),
            (3, 2, 0x40),
            (2, 5, 0x3),
            (0, 5, 0x1),
            (3, 5, 0x2),
            (0, 5, 0x2),
            (1, 5, 0x1),
            (2, 2, 0x80),
            (1, 5, 0x2),
            (3, 2, 0xffff_ffff),
            (1, 2, 0xffff_ffff),
        ];
        for (op, level, bits) in ops {
            match op {
                0 => agg.set_source(level, bits, &mut lines),
                1 => agg.clear_source(level, bits, &mut lines),
                2 => agg.mask_set(level, bits, &mut lines),
                _ => agg.mask_clear(level, bits, &mut lines),
            }
            check_invariant(&agg, &lines);
        }
    }

    #[test]
    fn test_line_follows_every_short_sequence() {
        // all sequences of four set/clear/mask/unmask steps over two sources of level 2
        const BITS: [u32; 3] = [0x40, 0x80, 0xc0];
        const STEPS: u32 = 4;
        let choices = 4 * BITS.len() as u32;
        for seq in 0..choices.pow(STEPS) {
            let mut agg = aggregator();
            let mut lines = IrqLines::new();
            let mut code = seq;
            for _ in 0..STEPS {
                let (op, bits) = (code % 4, BITS[(code / 4 % BITS.len() as u32) as usize]);
                code /= choices;
                let before = lines.is_asserted(L2);
                match op {
                    0 => agg.set_source(2, bits, &mut lines),
                    1 => agg.clear_source(2, bits, &mut lines),
                    2 => agg.mask_set(2, bits, &mut lines),
                    _ => agg.mask_clear(2, bits, &mut lines),
                }
                check_invariant(&agg, &lines);
                let edges = lines.take_transitions();
                if lines.is_asserted(L2) == before {
                    assert!(edges.is_empty(), "sequence {:#x}", seq);
                } else {
                    assert_eq!(edges, [(L2, !before)], "sequence {:#x}", seq);
                }
            }
        }
    }

    #[test]
    fn test_transition_history_is_bounded() {
        let mut lines = IrqLines::new();
        for i in 0..(TRANSITION_HISTORY as u32 * 3) {
            lines.set(L2, i % 2 == 0);
        }
        lines.set(L5, true);
        let history = lines.transitions();
        assert_eq!(history.len(), TRANSITION_HISTORY);
        assert_eq!(history.last(), Some(&(L5, true)));
        assert_eq!(lines.take_transitions().len(), TRANSITION_HISTORY);
        assert!(lines.transitions().is_empty());
        assert!(lines.is_asserted(L5));
    }

    #[test]
    fn test_unmask_reasserts_line() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        agg.mask_set(2, 0x40, &mut lines);
        agg.set_source(2, 0x40, &mut lines);
        assert!(!lines.is_asserted(L2));
        assert!(lines.transitions().is_empty());

        agg.mask_clear(2, 0x40, &mut lines);
        assert!(lines.is_asserted(L2));
        assert_eq!(lines.transitions(), &[(L2, true)]);
    }

    #[test]
    fn test_edge_triggered_driving() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        agg.set_source(5, 0x1, &mut lines);
        agg.set_source(5, 0x2, &mut lines);
        agg.clear_source(5, 0x1, &mut lines);
        assert_eq!(lines.transitions(), &[(L5, true)]);
        agg.clear_source(5, 0x2, &mut lines);
        assert_eq!(lines.transitions(), &[(L5, true), (L5, false)]);
    }

    #[test]
    fn test_mask_registers_over_mmio() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        agg.set_source(2, 0x40, &mut lines);
        assert!(lines.is_asserted(L2));

        // IL2MSD then IL2MCD
        agg.write(0x0, 4, 0x40, &mut lines);
        assert!(!lines.is_asserted(L2));
        assert_eq!(agg.read(0x8, 4), 0x40);
        assert_eq!(agg.read(0x10, 4), 0x40);
        assert_eq!(agg.read(0xc, 4), 0);

        agg.write(0x4, 4, 0x40, &mut lines);
        assert!(lines.is_asserted(L2));
        assert_eq!(agg.read(0xc, 4), 0x40);

        // status/raw words are not CPU writable
        agg.write(0x10, 4, 0, &mut lines);
        assert_eq!(agg.raw(2), 0x40);
    }

    #[test]
    fn test_routing_table() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        assert!(agg.raise(IrqSource::Ipc, 1, &mut lines));
        assert_eq!(agg.raw(2), 0x40);

        // LP-GPDMA0 has a summary bit on level 4 and a per-channel field on level 5.
        assert!(agg.raise(IrqSource::LpGpDma0, 1 << 3, &mut lines));
        assert_eq!(agg.raw(4), 0x8000);
        assert_eq!(agg.raw(5), 0x0008_0000);
        assert!(lines.is_asserted(18));
        assert!(agg.lower(IrqSource::LpGpDma0, 1 << 3, &mut lines));
        assert!(!lines.is_asserted(L5));

        assert!(agg.raise(IrqSource::Ssp(2), 1, &mut lines));
        assert_eq!(agg.raw(5), 0x4);
        assert!(agg.lower(IrqSource::Ssp(2), 1, &mut lines));
        assert!(!lines.is_asserted(L5));

        assert!(!agg.raise(IrqSource::Sndw, 1, &mut lines));
    }

    #[test]
    fn test_field_route_bits() {
        let route = IrqRoute::field(IrqSource::LpGpDma0, 5, 0x00ff_0000, 16);
        assert_eq!(route.bits(1 << 3), 0x0008_0000);
        assert_eq!(route.bits(0x100), 0);
        let route = IrqRoute::bit(IrqSource::Dmic0, 5, 0x40);
        assert_eq!(route.bits(0), 0x40);
    }

    #[test]
    fn test_cavs_1_8_level5_sources() {
        let mut agg = InterruptAggregator::new(&AggregatorLayout::cavs(0, &[16, 17, 18, 19], cavs_1_8_routes()));
        let mut lines = IrqLines::new();
        assert!(agg.raise(IrqSource::Sndw, 0, &mut lines));
        assert!(agg.raise(IrqSource::LpGpDma, 1, &mut lines));
        assert_eq!(agg.raw(5), 0x0001_0800);
    }

    #[test]
    fn test_reset_drops_lines() {
        let mut agg = aggregator();
        let mut lines = IrqLines::new();
        agg.set_source(3, 0x8000, &mut lines);
        agg.reset(&mut lines);
        assert_eq!(lines.pending(), 0);
        assert_eq!(agg.raw(3), 0);
    }
}
