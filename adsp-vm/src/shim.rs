//! DSP-side and host-side endpoints.
//!
//! Each endpoint owns its own register files and interrupt lines. The only
//! path from one to the other is the `MessageChannel`: register effects on one
//! side produce messages, `handle_message` on the other side folds them back
//! into register state.

use crate::channel::{DoorbellFlags, Message, MessageChannel};
use crate::doorbell::{DoorbellReceiver, DoorbellSender, MaskReg};
use crate::firmware::{BootMode, FirmwareError, FirmwareLoader, LoadReport, LoaderConfig};
use crate::irq::{InterruptAggregator, IrqLines};
use crate::platform::{CoreControl, DmaRoute, PlatformDescriptor, PowerLayout, SideDesc, TimerLayout, HOST_IRQ};
use crate::regs::{RegisterEffect, RegisterFile, WriteEffect};
use crate::zone::MemoryZoneMap;
use serde::{Deserialize, Serialize};

/// Upper half written to the firmware status word on a firmware panic.
pub const FIRMWARE_DEAD: u32 = 0xdead_0000;

/// Execution state of the DSP core as driven by the host's CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreState {
    Running,
    /// Held in reset by the host or halted after a firmware panic.
    Reset,
    /// Out of reset but still stalled.
    Stalled,
}

/// Anything that consumes messages arriving from the peer processor.
pub trait Endpoint: Send {
    fn name(&self) -> &str;
    fn handle_message(&mut self, msg: Message);
}

// ============================================================================
// Register blocks and doorbells shared by both sides
// ============================================================================

struct Side {
    shim: RegisterFile,
    extra: Vec<RegisterFile>,
    senders: Vec<DoorbellSender>,
    receivers: Vec<DoorbellReceiver>,
}

impl Side {
    fn new(desc: &SideDesc) -> Self {
        Self {
            shim: RegisterFile::from_layout(&desc.shim),
            extra: desc.extra.iter().map(RegisterFile::from_layout).collect(),
            senders: desc.senders.clone(),
            receivers: desc.receivers.clone(),
        }
    }

    fn extra_for(&mut self, addr: u64) -> Option<&mut RegisterFile> {
        self.extra.iter_mut().find(|b| b.contains(addr))
    }

    fn sender(&self, id: u8) -> Option<DoorbellSender> {
        self.senders.iter().find(|s| s.id == id).copied()
    }

    fn command_write(&mut self, id: u8, value: u32, channel: &dyn MessageChannel) -> Option<DoorbellFlags> {
        match self.sender(id) {
            Some(sender) => Some(sender.on_command_write(&mut self.shim, value, channel)),
            None => {
                log::warn!("[SHIM] {}: no doorbell {}", self.shim.name(), id);
                None
            }
        }
    }

    fn notify(
        &mut self,
        line: u32,
        value: u32,
        flags: DoorbellFlags,
        lines: &mut IrqLines,
        mut agg: Option<&mut InterruptAggregator>,
    ) {
        let mut matched = false;
        for rx in self.receivers.iter().filter(|r| r.line == line) {
            rx.on_notify(&mut self.shim, value, flags, lines, agg.as_deref_mut());
            matched = true;
        }
        if !matched {
            log::warn!("[SHIM] {}: notify on unwired line {}", self.shim.name(), line);
        }
    }

    /// Re-evaluate inbound doorbell `id` after a mask or status write.
    fn refresh(&self, id: u8, lines: &mut IrqLines, mut agg: Option<&mut InterruptAggregator>) {
        for rx in self.receivers.iter().filter(|r| r.id == id) {
            rx.refresh(&self.shim, lines, agg.as_deref_mut());
        }
    }

    /// Re-evaluate inbound doorbells masked by the register at `offset`.
    fn refresh_masked_by(&self, offset: u32, lines: &mut IrqLines, mut agg: Option<&mut InterruptAggregator>) {
        for rx in &self.receivers {
            if matches!(rx.mask, MaskReg::Mask(m) | MaskReg::Enable(m) if m == offset) {
                rx.refresh(&self.shim, lines, agg.as_deref_mut());
            }
        }
    }

    fn reset(&mut self) {
        self.shim.reset();
        self.extra.iter_mut().for_each(RegisterFile::reset);
    }
}

fn zone_read(zones: &MemoryZoneMap, addr: u64, width: usize) -> Option<u64> {
    if width == 0 || width > 8 {
        log::warn!("[MEM] unsupported width {} at {:#x}", width, addr);
        return None;
    }
    let bytes = zones.read(addr, width).ok()?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(bytes);
    Some(u64::from_le_bytes(buf))
}

fn zone_write(zones: &mut MemoryZoneMap, addr: u64, width: usize, value: u64) -> bool {
    if width == 0 || width > 8 {
        log::warn!("[MEM] unsupported width {} at {:#x}", width, addr);
        return true;
    }
    if zones.zone_for(addr).is_none() {
        return false;
    }
    if let Err(e) = zones.write(addr, &value.to_le_bytes()[..width]) {
        log::warn!("[MEM] write ignored: {}", e);
    }
    true
}

// ============================================================================
// DSP endpoint
// ============================================================================

pub struct DspEndpoint {
    name: String,
    side: Side,
    agg: Option<InterruptAggregator>,
    zones: MemoryZoneMap,
    lines: IrqLines,
    core: CoreState,
    core_ctl: Option<CoreControl>,
    firmware_status: Option<u32>,
    power: Option<PowerLayout>,
    pmc_cmd: Option<u32>,
    timer: Option<TimerLayout>,
    dma: Vec<DmaRoute>,
    loader: LoaderConfig,
    entry_point: u32,
    channel: Box<dyn MessageChannel>,
}

impl DspEndpoint {
    pub fn new(desc: &PlatformDescriptor, channel: Box<dyn MessageChannel>) -> Self {
        Self {
            name: format!("{}-dsp", desc.name),
            side: Side::new(&desc.dsp),
            agg: desc.aggregator.as_ref().map(InterruptAggregator::new),
            zones: MemoryZoneMap::new(&desc.zones),
            lines: IrqLines::new(),
            core: CoreState::Running,
            core_ctl: desc.core,
            firmware_status: desc.firmware_status,
            power: desc.power,
            pmc_cmd: None,
            timer: desc.timer,
            dma: desc.dma.clone(),
            loader: desc.loader,
            entry_point: desc.entry_point,
            channel,
        }
    }

    pub fn shim(&self) -> &RegisterFile {
        &self.side.shim
    }

    pub fn aggregator(&self) -> Option<&InterruptAggregator> {
        self.agg.as_ref()
    }

    pub fn zones(&self) -> &MemoryZoneMap {
        &self.zones
    }

    pub fn lines(&self) -> &IrqLines {
        &self.lines
    }

    pub fn lines_mut(&mut self) -> &mut IrqLines {
        &mut self.lines
    }

    pub fn core_state(&self) -> CoreState {
        self.core
    }

    /// Fixed per variant; loading firmware never moves it.
    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    /// PMC command latched by the last BUSY write, until completed.
    pub fn pending_power_command(&self) -> Option<u32> {
        self.pmc_cmd
    }

    pub fn set_boot_mode(&mut self, mode: BootMode) {
        self.loader.boot_mode = mode;
    }

    pub fn loader_config(&self) -> &LoaderConfig {
        &self.loader
    }

    /// Copy a firmware image into the DSP memory zones. Runs before the core
    /// starts; a rejected image leaves every zone untouched.
    pub fn load_firmware(&mut self, image: &[u8]) -> Result<LoadReport, FirmwareError> {
        let report = FirmwareLoader::new(self.loader).load(image, &mut self.zones)?;
        log::info!(
            "[SHIM] {}: firmware loaded ({} bytes), entry {:#x}",
            self.name,
            report.bytes_copied(),
            self.entry_point
        );
        Ok(report)
    }

    /// Device reset: registers and interrupt state zeroed, memory kept.
    pub fn reset(&mut self) {
        self.side.reset();
        if let Some(agg) = self.agg.as_mut() {
            agg.reset(&mut self.lines);
        }
        self.lines.reset();
        self.pmc_cmd = None;
    }

    // ====================================================================
    // MMIO
    // ====================================================================

    pub fn read(&mut self, addr: u64, width: usize) -> u64 {
        if self.side.shim.contains(addr) {
            let base = self.side.shim.base();
            return self.side.shim.read(addr - base, width);
        }
        if let Some(agg) = self.agg.as_mut() {
            if agg.regs().contains(addr) {
                let base = agg.regs().base();
                return agg.read(addr - base, width);
            }
        }
        if let Some(block) = self.side.extra_for(addr) {
            let base = block.base();
            return block.read(addr - base, width);
        }
        match zone_read(&self.zones, addr, width) {
            Some(v) => v,
            None => {
                log::warn!("[SHIM] {}: read of unmapped {:#x}", self.name, addr);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u64, width: usize, value: u64) {
        if self.side.shim.contains(addr) {
            let base = self.side.shim.base();
            for effect in self.side.shim.write(addr - base, width, value) {
                self.apply(effect);
            }
            return;
        }
        if let Some(agg) = self.agg.as_mut() {
            if agg.regs().contains(addr) {
                let base = agg.regs().base();
                agg.write(addr - base, width, value, &mut self.lines);
                return;
            }
        }
        if let Some(block) = self.side.extra_for(addr) {
            let base = block.base();
            block.write(addr - base, width, value);
            return;
        }
        if !zone_write(&mut self.zones, addr, width, value) {
            log::warn!("[SHIM] {}: write of unmapped {:#x} = {:#x}", self.name, addr, value);
        }
    }

    fn apply(&mut self, e: WriteEffect) {
        match e.effect {
            RegisterEffect::Doorbell(id) => {
                self.side.command_write(id, e.written, &*self.channel);
                self.side.refresh_masked_by(e.offset, &mut self.lines, self.agg.as_mut());
            }
            RegisterEffect::DoorbellMask(id) | RegisterEffect::DoorbellStatus(id) => {
                self.side.refresh(id, &mut self.lines, self.agg.as_mut());
            }
            RegisterEffect::EchoToPeer => {
                log::debug!("[SHIM] {}: echo {:#x} = {:#x}", self.name, e.offset, e.written);
                self.channel.send(Message::RegisterWriteEcho {
                    address: e.offset,
                    value: e.written,
                });
            }
            RegisterEffect::FirmwareStatus => self.firmware_status_write(e.written),
            RegisterEffect::PowerCommand => self.power_command(e.written),
            RegisterEffect::PowerMask => self.power_refresh(),
            RegisterEffect::TimerStatus | RegisterEffect::TimerMask => self.timer_refresh(),
            RegisterEffect::MaskSet(_) | RegisterEffect::MaskClear(_) | RegisterEffect::None => {}
        }
    }

    fn firmware_status_write(&mut self, value: u32) {
        if self.firmware_status.is_some() && value & 0xffff_0000 == FIRMWARE_DEAD {
            log::error!("[SHIM] {}: firmware panic {:#x}, core halted", self.name, value);
            self.core = CoreState::Reset;
        }
    }

    // ====================================================================
    // Power management controller handshake
    // ====================================================================

    fn power_command(&mut self, value: u32) {
        let Some(p) = self.power else { return };
        let regs = &mut self.side.shim;
        let mut status = regs.word(p.status) & !(p.status_busy | p.status_done);
        if value & p.busy != 0 {
            status |= p.status_busy;
        }
        if value & p.done != 0 {
            status |= p.status_done;
        }
        regs.set_word(p.status, status);

        if value & p.busy == 0 {
            return;
        }
        let cmd = value & 0xff;
        if cmd == p.set_lpe_clk {
            regs.set_bits(p.clkctl, p.clk_go);
            regs.clear_bits(p.clkctl, p.clk_ack);
        }
        log::debug!("[SHIM] {}: PMC command {:#x}", self.name, cmd);
        self.pmc_cmd = Some(cmd);
        self.channel.send(Message::PowerEvent { command: cmd });
    }

    /// The PMC finished the latched command: update the clock, flip
    /// BUSY to DONE and interrupt the DSP. Returns false with nothing pending.
    pub fn complete_power_command(&mut self) -> bool {
        let (Some(p), Some(cmd)) = (self.power, self.pmc_cmd.take()) else {
            log::debug!("[SHIM] {}: no PMC command pending", self.name);
            return false;
        };
        let regs = &mut self.side.shim;
        if cmd == p.set_lpe_clk {
            let lat = regs.word(p.lat_req) & p.lat_mask;
            let clk = (regs.word(p.clkctl) & !p.lat_mask & !p.clk_go) | lat | p.clk_ack;
            regs.set_word(p.clkctl, clk);
        }
        regs.clear_bits(p.command, p.busy);
        regs.set_bits(p.command, p.done);
        regs.clear_bits(p.status, p.status_busy);
        regs.set_bits(p.status, p.status_done);

        log::debug!("[SHIM] {}: PMC command {:#x} complete", self.name, cmd);
        self.lines.set(p.line, true);
        true
    }

    fn power_refresh(&mut self) {
        if let Some(p) = self.power {
            let active = self.side.shim.word(p.status) & !self.side.shim.word(p.mask);
            if active == 0 {
                log::debug!("[SHIM] {}: de-assert PMC IRQ", self.name);
                self.lines.set(p.line, false);
            }
        }
    }

    // ====================================================================
    // Timer, core control, DMA
    // ====================================================================

    /// Called by the external timer source when it reaches its wake value;
    /// the counter registers themselves are not modelled.
    pub fn timer_expired(&mut self) {
        if let Some(t) = self.timer {
            self.side.shim.set_bits(t.status, t.bit);
            self.lines.set(t.line, true);
        }
    }

    /// Drop the timer line once its status bit is clear or masked.
    fn timer_refresh(&mut self) {
        if let Some(t) = self.timer {
            let active = self.side.shim.word(t.status) & !self.side.shim.word(t.mask);
            if active & t.bit == 0 {
                log::debug!("[SHIM] {}: de-assert ext timer IRQ", self.name);
                self.lines.set(t.line, false);
            }
        }
    }

    fn core_control(&mut self, csr: u32) {
        let Some(c) = self.core_ctl else { return };
        let next = match self.core {
            CoreState::Running if csr & c.reset != 0 => CoreState::Reset,
            CoreState::Reset | CoreState::Stalled if csr & c.stall == 0 => CoreState::Running,
            CoreState::Reset if csr & c.reset == 0 => CoreState::Stalled,
            state => state,
        };
        if next != self.core {
            log::info!("[SHIM] {}: core {:?} -> {:?}", self.name, self.core, next);
            self.core = next;
        }
    }

    fn dma_event(&mut self, controller: u8, channel: u8, raised: bool) {
        match self.dma.get(controller as usize).copied() {
            Some(DmaRoute::Line(line)) => self.lines.set(line, raised),
            Some(DmaRoute::Source(source)) => match self.agg.as_mut() {
                Some(agg) => {
                    let value = 1u32.checked_shl(channel as u32).unwrap_or(0);
                    if raised {
                        agg.raise(source, value, &mut self.lines);
                    } else {
                        agg.lower(source, value, &mut self.lines);
                    }
                }
                None => log::warn!("[SHIM] {}: no aggregator for DMA {}", self.name, controller),
            },
            None => log::debug!("[SHIM] {}: DMA controller {} not routed", self.name, controller),
        }
    }
}

impl Endpoint for DspEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::IrqNotify { line, value, flags, .. } => {
                self.side.notify(line, value, flags, &mut self.lines, self.agg.as_mut());
            }
            Message::RegisterWriteEcho { address, value } => {
                self.side.shim.set_word(address, value);
                if self.core_ctl.is_some_and(|c| c.csr == address) {
                    self.core_control(value);
                }
            }
            Message::DmaEvent { controller, channel, raised } => self.dma_event(controller, channel, raised),
            Message::PowerEvent { command } => {
                if self.pmc_cmd.is_some_and(|c| c != command) {
                    log::warn!("[SHIM] {}: PMC completion {:#x} does not match", self.name, command);
                }
                self.complete_power_command();
            }
        }
    }
}

// ============================================================================
// Host endpoint
// ============================================================================

pub struct HostEndpoint {
    name: String,
    side: Side,
    lines: IrqLines,
    channel: Box<dyn MessageChannel>,
    power_requests: Vec<u32>,
}

impl HostEndpoint {
    pub fn new(desc: &PlatformDescriptor, channel: Box<dyn MessageChannel>) -> Self {
        Self {
            name: format!("{}-host", desc.name),
            side: Side::new(&desc.host),
            lines: IrqLines::new(),
            channel,
            power_requests: Vec::new(),
        }
    }

    pub fn shim(&self) -> &RegisterFile {
        &self.side.shim
    }

    pub fn lines(&self) -> &IrqLines {
        &self.lines
    }

    /// Whether the DSP interrupt towards the host is pending.
    pub fn irq_pending(&self) -> bool {
        self.lines.is_asserted(HOST_IRQ)
    }

    /// PMC commands serviced so far.
    pub fn power_requests(&self) -> &[u32] {
        &self.power_requests
    }

    pub fn reset(&mut self) {
        self.side.reset();
        self.lines.reset();
    }

    pub fn read(&mut self, addr: u64, width: usize) -> u64 {
        if self.side.shim.contains(addr) {
            let base = self.side.shim.base();
            return self.side.shim.read(addr - base, width);
        }
        match self.side.extra_for(addr) {
            Some(block) => {
                let base = block.base();
                block.read(addr - base, width)
            }
            None => {
                log::warn!("[SHIM] {}: read of unmapped {:#x}", self.name, addr);
                0
            }
        }
    }

    pub fn write(&mut self, addr: u64, width: usize, value: u64) {
        if self.side.shim.contains(addr) {
            let base = self.side.shim.base();
            for e in self.side.shim.write(addr - base, width, value) {
                self.apply(e);
            }
            return;
        }
        match self.side.extra_for(addr) {
            Some(block) => {
                let base = block.base();
                block.write(addr - base, width, value);
            }
            None => log::warn!("[SHIM] {}: write of unmapped {:#x} = {:#x}", self.name, addr, value),
        }
    }

    fn apply(&mut self, e: WriteEffect) {
        match e.effect {
            RegisterEffect::Doorbell(id) => {
                self.side.command_write(id, e.written, &*self.channel);
                self.side.refresh_masked_by(e.offset, &mut self.lines, None);
            }
            RegisterEffect::DoorbellMask(id) | RegisterEffect::DoorbellStatus(id) => {
                self.side.refresh(id, &mut self.lines, None);
            }
            RegisterEffect::EchoToPeer => {
                log::debug!("[SHIM] {}: echo {:#x} = {:#x}", self.name, e.offset, e.written);
                self.channel.send(Message::RegisterWriteEcho {
                    address: e.offset,
                    value: e.written,
                });
            }
            _ => {}
        }
    }
}

impl Endpoint for HostEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_message(&mut self, msg: Message) {
        match msg {
            Message::IrqNotify { line, value, flags, .. } => {
                self.side.notify(line, value, flags, &mut self.lines, None);
            }
            Message::RegisterWriteEcho { address, value } => self.side.shim.set_word(address, value),
            Message::DmaEvent { controller, channel, .. } => {
                log::debug!("[SHIM] {}: DMA {}:{} event ignored", self.name, controller, channel);
            }
            Message::PowerEvent { command } => {
                // virtual PMC: acknowledge straight away
                log::debug!("[SHIM] {}: PMC request {:#x}", self.name, command);
                self.power_requests.push(command);
                self.channel.send(Message::PowerEvent { command });
            }
        }
    }
}
