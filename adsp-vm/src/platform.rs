//! Chip variant descriptions.
//!
//! Every supported variant is a `PlatformDescriptor` value: register layouts,
//! doorbell wiring, interrupt lines, memory zones and loader settings. The
//! endpoints in `shim` are built from a descriptor and never hard-code a chip.

use crate::doorbell::{DoorbellReceiver, DoorbellSender, IrqTarget, MaskReg};
use crate::firmware::{BootMode, HostOffsetMode, LoaderConfig};
use crate::irq::{cavs_1_5_routes, cavs_1_8_routes, AggregatorLayout, IrqSource};
use crate::regs::{BlockLayout, RegisterDesc, RegisterEffect, StoreMode};
use crate::zone::{ZoneDesc, ZoneType};
use serde::{Deserialize, Serialize};

// ============================================================================
// Baytrail / Cherrytrail SHIM
// ============================================================================

pub const BYT_SHIM_SIZE: u32 = 0x100;
pub const BYT_DSP_SHIM_BASE: u64 = 0xff34_0000;
pub const BYT_DSP_MAILBOX_BASE: u64 = 0xff34_4000;
pub const BYT_HOST_SHIM_BASE: u64 = 0x0014_0000;
pub const BYT_HOST_MAILBOX_BASE: u64 = 0x0014_4000;
pub const MAILBOX_SIZE: u32 = 0x1000;

pub const BYT_IRAM_BASE: u64 = 0xff2c_0000;
pub const BYT_IRAM_SIZE: u64 = 0x14000;
pub const BYT_IRAM_HOST_OFFSET: u64 = 0xc_0000;
pub const BYT_DRAM_BASE: u64 = 0xff30_0000;
pub const BYT_DRAM_SIZE: u64 = 0x28000;
pub const BYT_DRAM_HOST_OFFSET: u64 = 0x10_0000;

pub mod byt {
    //! SHIM register offsets and bits.

    pub const CSR: u32 = 0x00;
    pub const PISR: u32 = 0x08;
    pub const PIMR: u32 = 0x10;
    pub const ISRX: u32 = 0x18;
    pub const ISRD: u32 = 0x20;
    pub const IMRX: u32 = 0x28;
    pub const IMRD: u32 = 0x30;
    pub const IPCXL: u32 = 0x38;
    pub const IPCXH: u32 = 0x3c;
    pub const IPCDL: u32 = 0x40;
    pub const IPCDH: u32 = 0x44;
    pub const ISRLPESC: u32 = 0x50;
    pub const IMRLPESC: u32 = 0x60;
    pub const IPCLPESCL: u32 = 0x70;
    pub const IPCLPESCH: u32 = 0x74;
    pub const CLKCTL: u32 = 0x78;
    pub const FR_LAT_REQ: u32 = 0x80;

    pub const CSR_RST: u32 = 1 << 1;
    pub const CSR_STALL: u32 = 1 << 10;

    /// BUSY/DONE in the high words of IPCX, IPCD and IPCLPESC.
    pub const IPC_BUSY: u32 = 1 << 31;
    pub const IPC_DONE: u32 = 1 << 30;

    /// BUSY/DONE in ISRX, ISRD, IMRX, IMRD and ISRLPESC.
    pub const ISR_BUSY: u32 = 1 << 1;
    pub const ISR_DONE: u32 = 1 << 0;

    pub const PISR_EXTT: u32 = 1 << 10;

    pub const CLKCTL_FRCHNGGO: u32 = 1 << 19;
    pub const CLKCTL_FRCHNGACK: u32 = 1 << 18;
    pub const FR_LAT_CLK_MASK: u32 = 0x7;

    pub const PMC_SET_LPECLK: u32 = 0xc4;

    // DSP interrupt inputs
    pub const IRQ_EXT_IA: u32 = 10;
    pub const IRQ_EXT_PMC: u32 = 11;
    pub const IRQ_EXT_DMAC0: u32 = 13;
    pub const IRQ_EXT_DMAC1: u32 = 14;
    pub const IRQ_EXT_TIMER: u32 = 15;
    pub const IRQ_EXT_DMAC2: u32 = 19;
}

// ============================================================================
// cAVS IPC
// ============================================================================

pub mod cavs {
    //! DSP-side IPC registers (DIPC*) and the host view (HIPC*).

    pub const DIPCT: u32 = 0x00;
    pub const DIPCTE: u32 = 0x04;
    pub const DIPCI: u32 = 0x08;
    pub const DIPCIE: u32 = 0x0c;
    pub const DIPCCTL: u32 = 0x10;

    pub const HIPCT: u32 = 0x40;
    pub const HIPCTE: u32 = 0x44;
    pub const HIPCI: u32 = 0x48;
    pub const HIPCIE: u32 = 0x4c;
    pub const HIPCCTL: u32 = 0x50;

    pub const IPC_BUSY: u32 = 1 << 31;
    pub const IPC_DONE: u32 = 1 << 30;

    pub const IPC_SIZE: u32 = 0x100;
    pub const HOST_IPC_SIZE: u32 = 0x100;
    pub const SHIM_SIZE: u32 = 0x100;

    pub const ROM_BASE: u64 = 0xbefe_0000;
    pub const ROM_SIZE: u64 = 0x2000;
    pub const IMR_BASE: u64 = 0xb000_0000;
    pub const IMR_SIZE: u64 = 0x0010_0000;
    pub const IMR_MAN_OFFSET: u64 = 0x32000;
    pub const HP_SRAM_BASE: u64 = 0xbe00_0000;
    pub const LP_SRAM_BASE: u64 = 0xbe80_0000;

    /// CPU inputs of aggregation levels 2 to 5.
    pub const LEVEL_LINES: [u32; 4] = [16, 17, 18, 19];
}

// ============================================================================
// i.MX8 messaging unit
// ============================================================================

pub mod mu {
    pub const fn tr(x: u32) -> u32 {
        4 * x
    }
    pub const fn rr(x: u32) -> u32 {
        0x10 + 4 * x
    }
    pub const XSR: u32 = 0x20;
    pub const XCR: u32 = 0x24;

    pub const fn gip(x: u32) -> u32 {
        1 << (28 + (3 - x))
    }
    pub const fn rf(x: u32) -> u32 {
        1 << (24 + (3 - x))
    }
    pub const fn te(x: u32) -> u32 {
        1 << (20 + (3 - x))
    }
    pub const fn gie(x: u32) -> u32 {
        1 << (28 + (3 - x))
    }
    pub const fn gir(x: u32) -> u32 {
        1 << (16 + (3 - x))
    }

    pub const GIP_MASK: u32 = 0xf000_0000;
    /// GIRn self-clear once the request reached the peer.
    pub const GIR_MASK: u32 = 0x000f_0000;
    pub const SIZE: u32 = 0x10000;
}

pub mod irqsteer {
    pub const CHAN_CTL: u32 = 0x00;
    pub const CHAN_MASK: u32 = 0x04;
    pub const CHAN_SET: u32 = 0x44;
    pub const CHAN_STATUS: u32 = 0x84;
    pub const MASTER_DISABLE: u32 = 0xc4;
    pub const MASTER_STATUS: u32 = 0xc8;
    pub const SIZE: u32 = 0xcc;
}

pub const IMX8M_IRAM_BASE: u64 = 0x3b6f_8000;
pub const IMX8M_DRAM0_BASE: u64 = 0x3b6e_8000;
pub const IMX8M_DRAM1_BASE: u64 = 0x3b6f_0000;
pub const IMX8M_LOCAL_SIZE: u64 = 0x8000;
/// Image offsets of IRAM blocks are relative to this, not to the zone base.
pub const IMX8M_IRAM_HOST_OFFSET: u64 = 0x1_0000;
pub const IMX8M_SDRAM0_BASE: u64 = 0x9240_0000;
pub const IMX8M_SDRAM1_BASE: u64 = 0x92c0_0000;
pub const IMX8M_SDRAM_SIZE: u64 = 0x80_0000;
pub const IMX8M_MU_BASE: u64 = 0x30ab_0000;
pub const IMX8M_IRQSTR_BASE: u64 = 0x30a8_0000;
pub const IMX8M_HOST_MU_BASE: u64 = 0x30aa_0000;
pub const IMX8M_IRQ_MU: u32 = 7;

// ============================================================================
// Descriptor types
// ============================================================================

/// CSR bits interpreted when the host's CSR write is echoed to the DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreControl {
    pub csr: u32,
    pub reset: u32,
    pub stall: u32,
}

/// DSP to power-management-controller doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerLayout {
    pub command: u32,
    pub busy: u32,
    pub done: u32,
    pub status: u32,
    pub status_busy: u32,
    pub status_done: u32,
    pub mask: u32,
    pub clkctl: u32,
    pub clk_go: u32,
    pub clk_ack: u32,
    pub lat_req: u32,
    pub lat_mask: u32,
    pub set_lpe_clk: u32,
    pub line: u32,
}

/// Platform timer status/mask pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerLayout {
    pub status: u32,
    pub mask: u32,
    pub bit: u32,
    pub line: u32,
}

/// Where a DMA controller's channel interrupts land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmaRoute {
    /// One CPU line for the whole controller.
    Line(u32),
    /// Aggregator source, one bit per channel.
    Source(IrqSource),
}

/// One processor's view: doorbell register block, plain storage blocks and
/// doorbell wiring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideDesc {
    pub shim: BlockLayout,
    pub extra: Vec<BlockLayout>,
    pub senders: Vec<DoorbellSender>,
    pub receivers: Vec<DoorbellReceiver>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub name: String,
    pub dsp: SideDesc,
    pub host: SideDesc,
    pub zones: Vec<ZoneDesc>,
    pub aggregator: Option<AggregatorLayout>,
    pub core: Option<CoreControl>,
    /// Word whose `0xdead` upper half reports a firmware panic.
    pub firmware_status: Option<u32>,
    pub power: Option<PowerLayout>,
    pub timer: Option<TimerLayout>,
    /// Indexed by DMA controller number.
    pub dma: Vec<DmaRoute>,
    pub loader: LoaderConfig,
    pub entry_point: u32,
}

pub const PLATFORMS: &[&str] = &["byt", "cht", "cavs1.5", "cavs1.8", "imx8m"];

impl PlatformDescriptor {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "byt" => Some(Self::byt()),
            "cht" => Some(Self::cht()),
            "cavs1.5" | "skl" | "kbl" | "apl" => Some(Self::cavs_1_5()),
            "cavs1.8" | "cnl" | "icl" => Some(Self::cavs_1_8()),
            "imx8m" => Some(Self::imx8m()),
            _ => None,
        }
    }

    /// Baytrail: SHIM doorbells, PMC handshake, legacy "$SST" images.
    pub fn byt() -> Self {
        Self::baytrail_class(
            "byt",
            vec![DmaRoute::Line(byt::IRQ_EXT_DMAC0), DmaRoute::Line(byt::IRQ_EXT_DMAC1)],
        )
    }

    /// Cherrytrail: Baytrail SHIM with a third DMA controller.
    pub fn cht() -> Self {
        Self::baytrail_class(
            "cht",
            vec![
                DmaRoute::Line(byt::IRQ_EXT_DMAC0),
                DmaRoute::Line(byt::IRQ_EXT_DMAC1),
                DmaRoute::Line(byt::IRQ_EXT_DMAC2),
            ],
        )
    }

    fn baytrail_class(name: &str, dma: Vec<DmaRoute>) -> Self {
        use byt::*;

        let isr = |name: &str, off, effect| RegisterDesc::new(name, off, StoreMode::WriteOneToClear(ISR_BUSY | ISR_DONE), effect);
        let dsp_shim = BlockLayout::new("dsp-shim", BYT_DSP_SHIM_BASE, BYT_SHIM_SIZE)
            .with(RegisterDesc::effect("CSR", CSR, RegisterEffect::EchoToPeer))
            .with(RegisterDesc::new("PISR", PISR, StoreMode::WriteOneToClear(u32::MAX), RegisterEffect::TimerStatus))
            .with(RegisterDesc::effect("PIMR", PIMR, RegisterEffect::TimerMask))
            .with(isr("ISRD", ISRD, RegisterEffect::DoorbellStatus(0)))
            .with(RegisterDesc::effect("IMRD", IMRD, RegisterEffect::DoorbellMask(0)))
            .with(RegisterDesc::effect("IPCXH", IPCXH, RegisterEffect::Doorbell(1)))
            .with(RegisterDesc::effect("IPCDL", IPCDL, RegisterEffect::FirmwareStatus))
            .with(RegisterDesc::effect("IPCDH", IPCDH, RegisterEffect::Doorbell(0)))
            .with(isr("ISRLPESC", ISRLPESC, RegisterEffect::PowerMask))
            .with(RegisterDesc::effect("IMRLPESC", IMRLPESC, RegisterEffect::PowerMask))
            .with(RegisterDesc::effect("IPCLPESCH", IPCLPESCH, RegisterEffect::PowerCommand));

        let host_shim = BlockLayout::new("host-shim", BYT_HOST_SHIM_BASE, BYT_SHIM_SIZE)
            .with(RegisterDesc::effect("CSR", CSR, RegisterEffect::EchoToPeer))
            .with(isr("ISRX", ISRX, RegisterEffect::DoorbellStatus(0)))
            .with(RegisterDesc::effect("IMRX", IMRX, RegisterEffect::DoorbellMask(0)))
            .with(RegisterDesc::effect("IPCXH", IPCXH, RegisterEffect::Doorbell(0)))
            .with(RegisterDesc::effect("IPCDH", IPCDH, RegisterEffect::Doorbell(1)));

        let sender = |id, line, status| DoorbellSender {
            id,
            line,
            busy: IPC_BUSY,
            done: IPC_DONE,
            status,
            status_busy: ISR_BUSY,
            status_done: ISR_DONE,
        };
        let receiver = |line, command, status, mask, target| DoorbellReceiver {
            id: 0,
            line,
            command: Some(command),
            status,
            status_busy: ISR_BUSY,
            status_done: ISR_DONE,
            mask: MaskReg::Mask(mask),
            target: IrqTarget::Line(target),
            sticky: false,
        };

        // DSP to host: line 0 carries IPCD (new message), line 1 IPCX (reply).
        // Host to DSP: line 0 carries IPCX (new message), line 1 IPCD (reply).
        let dsp = SideDesc {
            shim: dsp_shim,
            extra: vec![BlockLayout::new("dsp-mailbox", BYT_DSP_MAILBOX_BASE, MAILBOX_SIZE)],
            senders: vec![sender(0, 0, ISRX), sender(1, 1, ISRX)],
            receivers: vec![
                receiver(0, IPCXH, ISRD, IMRD, IRQ_EXT_IA),
                receiver(1, IPCDH, ISRD, IMRD, IRQ_EXT_IA),
            ],
        };
        let host = SideDesc {
            shim: host_shim,
            extra: vec![BlockLayout::new("host-mailbox", BYT_HOST_MAILBOX_BASE, MAILBOX_SIZE)],
            senders: vec![sender(0, 0, ISRD), sender(1, 1, ISRD)],
            receivers: vec![
                receiver(0, IPCDH, ISRX, IMRX, HOST_IRQ),
                receiver(1, IPCXH, ISRX, IMRX, HOST_IRQ),
            ],
        };

        Self {
            name: name.to_string(),
            dsp,
            host,
            zones: vec![
                ZoneDesc::new("iram", ZoneType::Iram, BYT_IRAM_BASE, BYT_IRAM_SIZE, BYT_IRAM_HOST_OFFSET),
                ZoneDesc::new("dram", ZoneType::Dram, BYT_DRAM_BASE, BYT_DRAM_SIZE, BYT_DRAM_HOST_OFFSET),
            ],
            aggregator: None,
            core: Some(CoreControl { csr: CSR, reset: CSR_RST, stall: CSR_STALL }),
            firmware_status: Some(IPCDL),
            power: Some(PowerLayout {
                command: IPCLPESCH,
                busy: IPC_BUSY,
                done: IPC_DONE,
                status: ISRLPESC,
                status_busy: ISR_BUSY,
                status_done: ISR_DONE,
                mask: IMRLPESC,
                clkctl: CLKCTL,
                clk_go: CLKCTL_FRCHNGGO,
                clk_ack: CLKCTL_FRCHNGACK,
                lat_req: FR_LAT_REQ,
                lat_mask: FR_LAT_CLK_MASK,
                set_lpe_clk: PMC_SET_LPECLK,
                line: IRQ_EXT_PMC,
            }),
            timer: Some(TimerLayout { status: PISR, mask: PIMR, bit: PISR_EXTT, line: IRQ_EXT_TIMER }),
            dma,
            loader: LoaderConfig {
                boot_mode: BootMode::Blocks,
                modern_offsets: HostOffsetMode::Subtract,
                legacy_offsets: HostOffsetMode::Ignore,
                ..LoaderConfig::default()
            },
            entry_point: BYT_IRAM_BASE as u32,
        }
    }

    /// cAVS 1.5 (Skylake, Kabylake, Apollolake).
    pub fn cavs_1_5() -> Self {
        Self::cavs_class(
            "cavs1.5",
            cavs_1_5_routes(),
            0x0007_8800,
            vec![
                ZoneDesc::new("hp-sram", ZoneType::Sram, cavs::HP_SRAM_BASE, 0x8_0000, 0),
                ZoneDesc::new("lp-sram", ZoneType::Sram, cavs::LP_SRAM_BASE, 0x2_0000, 0),
                ZoneDesc::new("imr", ZoneType::Imr, cavs::IMR_BASE, cavs::IMR_SIZE, 0),
                ZoneDesc::new("rom", ZoneType::Rom, cavs::ROM_BASE, cavs::ROM_SIZE, 0),
            ],
        )
    }

    /// cAVS 1.8 (Cannonlake, Icelake).
    pub fn cavs_1_8() -> Self {
        Self::cavs_class(
            "cavs1.8",
            cavs_1_8_routes(),
            0x0007_8800,
            vec![
                ZoneDesc::new("hp-sram", ZoneType::Sram, cavs::HP_SRAM_BASE, 0x30_0000, 0),
                ZoneDesc::new("lp-sram", ZoneType::Sram, cavs::LP_SRAM_BASE, 0x1_0000, 0),
                ZoneDesc::new("imr", ZoneType::Imr, cavs::IMR_BASE, cavs::IMR_SIZE, 0),
                ZoneDesc::new("rom", ZoneType::Rom, cavs::ROM_BASE, cavs::ROM_SIZE, 0),
            ],
        )
    }

    fn cavs_class(name: &str, routes: Vec<crate::irq::IrqRoute>, irq_base: u64, zones: Vec<ZoneDesc>) -> Self {
        use cavs::*;

        let ack = StoreMode::Acknowledge { strip: 0, clear: IPC_BUSY };
        let dsp_ipc = BlockLayout::new("dsp-ipc", 0x0007_1e00, IPC_SIZE)
            .with(RegisterDesc::new("DIPCT", DIPCT, ack, RegisterEffect::DoorbellStatus(0)))
            .with(RegisterDesc::effect("DIPCI", DIPCI, RegisterEffect::Doorbell(0)))
            .with(RegisterDesc::new(
                "DIPCIE",
                DIPCIE,
                StoreMode::Acknowledge { strip: IPC_BUSY, clear: IPC_DONE },
                RegisterEffect::None,
            ));
        let host_ipc = BlockLayout::new("host-ipc", 0x0000_0000, HOST_IPC_SIZE)
            .with(RegisterDesc::new("HIPCT", HIPCT, ack, RegisterEffect::DoorbellStatus(0)))
            .with(RegisterDesc::effect("HIPCI", HIPCI, RegisterEffect::Doorbell(0)))
            .with(RegisterDesc::new(
                "HIPCIE",
                HIPCIE,
                StoreMode::Acknowledge { strip: IPC_BUSY, clear: IPC_DONE },
                RegisterEffect::None,
            ));

        // Initiator registers carry no separate status word.
        let sender = |command| DoorbellSender {
            id: 0,
            line: 0,
            busy: IPC_BUSY,
            done: 0,
            status: command,
            status_busy: 0,
            status_done: 0,
        };
        let receiver = |target, target_reg| DoorbellReceiver {
            id: 0,
            line: 0,
            command: Some(target_reg),
            status: target_reg,
            status_busy: IPC_BUSY,
            status_done: 0,
            mask: MaskReg::None,
            target,
            sticky: false,
        };

        Self {
            name: name.to_string(),
            dsp: SideDesc {
                shim: dsp_ipc,
                extra: vec![BlockLayout::new("dsp-shim", 0x0007_1f00, SHIM_SIZE)],
                senders: vec![sender(DIPCI)],
                receivers: vec![receiver(IrqTarget::Source(IrqSource::Ipc), DIPCT)],
            },
            host: SideDesc {
                shim: host_ipc,
                extra: Vec::new(),
                senders: vec![sender(HIPCI)],
                receivers: vec![receiver(IrqTarget::Line(HOST_IRQ), HIPCT)],
            },
            zones,
            aggregator: Some(AggregatorLayout::cavs(irq_base, &LEVEL_LINES, routes)),
            core: None,
            firmware_status: None,
            power: None,
            timer: None,
            dma: vec![DmaRoute::Source(IrqSource::LpGpDma0), DmaRoute::Source(IrqSource::HpGpDma)],
            loader: LoaderConfig {
                boot_mode: BootMode::ManifestToImr,
                imr_boot_ldr_offset: IMR_MAN_OFFSET,
                ..LoaderConfig::default()
            },
            entry_point: ROM_BASE as u32,
        }
    }

    /// i.MX8M: messaging unit doorbells, IRQSTEER storage.
    pub fn imx8m() -> Self {
        let xsr = |name: &str| {
            RegisterDesc::new(name, mu::XSR, StoreMode::WriteOneToClear(mu::GIP_MASK), RegisterEffect::DoorbellStatus(0))
        };
        let mu_block = |name: &str, base| {
            BlockLayout::new(name, base, mu::SIZE)
                .with(xsr("xSR"))
                .with(RegisterDesc::new(
                    "xCR",
                    mu::XCR,
                    StoreMode::Acknowledge { strip: mu::GIR_MASK, clear: 0 },
                    RegisterEffect::Doorbell(0),
                ))
        };

        // GIR1 raises GIP1 (new message), GIR0 raises GIP0 (reply) on the peer.
        let sender = DoorbellSender {
            id: 0,
            line: 0,
            busy: mu::gir(1),
            done: mu::gir(0),
            status: mu::XSR,
            status_busy: 0,
            status_done: 0,
        };
        let receiver = |line| DoorbellReceiver {
            id: 0,
            line: 0,
            command: None,
            status: mu::XSR,
            status_busy: mu::gip(1),
            status_done: mu::gip(0),
            mask: MaskReg::Enable(mu::XCR),
            target: IrqTarget::Line(line),
            sticky: true,
        };

        Self {
            name: "imx8m".to_string(),
            dsp: SideDesc {
                shim: mu_block("mu-b", IMX8M_MU_BASE),
                extra: vec![BlockLayout::new("irqsteer", IMX8M_IRQSTR_BASE, irqsteer::SIZE)],
                senders: vec![sender],
                receivers: vec![receiver(IMX8M_IRQ_MU)],
            },
            host: SideDesc {
                shim: mu_block("mu-a", IMX8M_HOST_MU_BASE),
                extra: Vec::new(),
                senders: vec![sender],
                receivers: vec![receiver(HOST_IRQ)],
            },
            zones: vec![
                ZoneDesc::new("iram", ZoneType::Iram, IMX8M_IRAM_BASE, IMX8M_LOCAL_SIZE, IMX8M_IRAM_HOST_OFFSET),
                ZoneDesc::new("dram0", ZoneType::Dram, IMX8M_DRAM0_BASE, IMX8M_LOCAL_SIZE, 0),
                ZoneDesc::new("dram1", ZoneType::Dram, IMX8M_DRAM1_BASE, IMX8M_LOCAL_SIZE, 0),
                ZoneDesc::new("sram0", ZoneType::Sram, IMX8M_SDRAM0_BASE, IMX8M_SDRAM_SIZE, 0),
                ZoneDesc::new("sram1", ZoneType::Sram, IMX8M_SDRAM1_BASE, IMX8M_SDRAM_SIZE, 0),
            ],
            aggregator: None,
            core: None,
            firmware_status: None,
            power: None,
            timer: None,
            dma: Vec::new(),
            loader: LoaderConfig::default(),
            entry_point: IMX8M_IRAM_BASE as u32,
        }
    }
}

/// Host CPU interrupt raised by inbound doorbells (the PCI INTx line).
pub const HOST_IRQ: u32 = 0;
