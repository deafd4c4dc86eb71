use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use adsp_vm::bridge::Bridge;
use adsp_vm::doorbell::MaskReg;
use adsp_vm::firmware::{BootMode, LoadReport};
use adsp_vm::platform::{PlatformDescriptor, SideDesc, PLATFORMS};
use adsp_vm::regs::RegisterEffect;
use adsp_vm::shim::DspEndpoint;
use adsp_vm::NullChannel;

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio DSP shim/IPC emulator and firmware loader", long_about = None)]
struct Args {
    /// Chip variant: byt, cht, cavs1.5 (skl/kbl/apl), cavs1.8 (cnl/icl), imx8m
    #[arg(short, long, default_value = "byt")]
    platform: String,

    /// Firmware image to load into the DSP memory zones
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Override the platform's boot mode
    #[arg(long, value_enum)]
    boot_mode: Option<BootModeArg>,

    /// Print every memory zone with its SHA-256 after loading
    #[arg(long)]
    dump_zones: bool,

    /// Ring one doorbell in each direction over the threaded bridge
    #[arg(long)]
    self_test: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BootModeArg {
    Blocks,
    ManifestModules,
    ManifestImr,
}

impl From<BootModeArg> for BootMode {
    fn from(arg: BootModeArg) -> Self {
        match arg {
            BootModeArg::Blocks => BootMode::Blocks,
            BootModeArg::ManifestModules => BootMode::ManifestModules,
            BootModeArg::ManifestImr => BootMode::ManifestToImr,
        }
    }
}

fn print_section(title: &str) {
    println!("\n\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
    println!("\x1b[1;33m  ▸ {}\x1b[0m", title);
    println!("\x1b[1;36m━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\x1b[0m");
}

fn print_status(component: &str, status: &str, ok: bool) {
    let status_color = if ok { "\x1b[1;32m" } else { "\x1b[1;31m" };
    let check = if ok { "✓" } else { "✗" };
    println!("    \x1b[0;37m{:<40}\x1b[0m {}[{}] {}\x1b[0m", component, status_color, check, status);
}

fn print_info(key: &str, value: &str) {
    println!("    \x1b[0;90m├─\x1b[0m \x1b[0;37m{:<20}\x1b[0m \x1b[1;97m{}\x1b[0m", key, value);
}

fn print_report(report: &LoadReport) {
    if let Some(dialect) = report.dialect {
        print_info("Dialect", &format!("{:?}", dialect));
    }
    if let Some(entry) = report.entry_point {
        print_info("Image entry", &format!("0x{:08X}", entry));
    }
    for p in &report.copied {
        print_info(
            &format!("m{} b{}", p.module, p.block),
            &format!("{:#x} bytes -> {} 0x{:08X}", p.len, p.zone, p.addr),
        );
    }
    for s in &report.skipped {
        print_info(&format!("m{} b{}", s.module, s.block), &format!("skipped: {:?}", s.reason));
    }
}

/// Mask/enable writes that let every inbound doorbell of `side` interrupt.
fn unmask_writes(side: &SideDesc) -> Vec<(u64, u64)> {
    side.receivers
        .iter()
        .filter_map(|rx| match rx.mask {
            MaskReg::Enable(off) => Some((side.shim.base + off as u64, (rx.status_busy | rx.status_done) as u64)),
            MaskReg::Mask(off) => Some((side.shim.base + off as u64, 0)),
            MaskReg::None => None,
        })
        .collect()
}

/// Address and BUSY value of the first outbound doorbell of `side`.
fn first_doorbell(side: &SideDesc) -> Option<(u64, u64)> {
    let sender = side.senders.first()?;
    let reg = side
        .shim
        .registers
        .iter()
        .find(|r| r.effect == RegisterEffect::Doorbell(sender.id))?;
    Some((side.shim.base + reg.offset as u64, sender.busy as u64))
}

fn self_test(desc: &PlatformDescriptor) -> Result<bool, Box<dyn std::error::Error>> {
    const WAIT: Duration = Duration::from_secs(1);
    let bridge = Bridge::new(desc)?;

    for (addr, value) in unmask_writes(&desc.dsp) {
        bridge.dsp().write(addr, 4, value);
    }
    for (addr, value) in unmask_writes(&desc.host) {
        bridge.host().write(addr, 4, value);
    }

    let mut ok = true;
    if let Some((addr, busy)) = first_doorbell(&desc.dsp) {
        let current = bridge.dsp().read(addr, 4);
        bridge.dsp().write(addr, 4, current | busy);
        let raised = bridge.wait_for(WAIT, |_, host| host.irq_pending());
        print_status("Doorbell DSP -> host", if raised { "DELIVERED" } else { "TIMEOUT" }, raised);
        ok &= raised;
    }
    if let Some((addr, busy)) = first_doorbell(&desc.host) {
        let current = bridge.host().read(addr, 4);
        bridge.host().write(addr, 4, current | busy);
        let raised = bridge.wait_for(WAIT, |dsp, _| dsp.lines().pending() != 0);
        print_status("Doorbell host -> DSP", if raised { "DELIVERED" } else { "TIMEOUT" }, raised);
        ok &= raised;
    }
    bridge.shutdown();
    Ok(ok)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut desc = PlatformDescriptor::by_name(&args.platform)
        .ok_or_else(|| format!("unknown platform '{}' (known: {})", args.platform, PLATFORMS.join(", ")))?;
    if let Some(mode) = args.boot_mode {
        desc.loader.boot_mode = mode.into();
    }

    // ─── PLATFORM ─────────────────────────────────────────────────────────────
    print_section("PLATFORM");
    print_info("Variant", &desc.name);
    print_info("Boot mode", &format!("{:?}", desc.loader.boot_mode));
    print_info("Entry point", &format!("0x{:08X}", desc.entry_point));
    print_info("DSP registers", &format!("{} @ 0x{:08X}", desc.dsp.shim.name, desc.dsp.shim.base));
    print_info("Host registers", &format!("{} @ 0x{:08X}", desc.host.shim.name, desc.host.shim.base));
    if let Some(agg) = &desc.aggregator {
        print_info("IRQ aggregator", &format!("{} levels @ 0x{:08X}", agg.levels.len(), agg.base));
    }

    let mut dsp = DspEndpoint::new(&desc, Box::new(NullChannel));

    // ─── FIRMWARE ─────────────────────────────────────────────────────────────
    if let Some(path) = &args.firmware {
        print_section("FIRMWARE");
        let image = std::fs::read(path)?;
        print_info("Image", &path.display().to_string());
        print_info("Size", &format!("{} bytes", image.len()));
        match dsp.load_firmware(&image) {
            Ok(report) => {
                print_report(&report);
                print_status("Firmware", &format!("LOADED ({:#x} bytes)", report.bytes_copied()), true);
            }
            Err(e) => {
                log::error!("[FW] {}: {}", path.display(), e);
                print_status("Firmware", "REJECTED", false);
                return Err(e.into());
            }
        }
    }

    // ─── MEMORY ZONES ─────────────────────────────────────────────────────────
    if args.dump_zones {
        print_section("MEMORY ZONES");
        for zone in dsp.zones().zones() {
            let range = format!("0x{:08X} +{:#x}", zone.base(), zone.size());
            let contents = if zone.is_blank() { "blank".to_string() } else { zone.digest() };
            print_info(zone.name(), &format!("{} {:?} {}", range, zone.desc().zone_type, contents));
        }
    }

    // ─── SELF TEST ────────────────────────────────────────────────────────────
    if args.self_test {
        print_section("SELF TEST");
        if !self_test(&desc)? {
            return Err("doorbell self-test failed".into());
        }
    }

    Ok(())
}
