//! Emulated audio DSP doorbell/IPC registers, interrupt aggregation and
//! firmware loading, split into a DSP-side and a host-side endpoint that only
//! talk through messages.

pub mod bridge;
pub mod channel;
pub mod doorbell;
pub mod firmware;
pub mod irq;
pub mod platform;
pub mod regs;
pub mod shim;
pub mod zone;

pub use channel::{Message, MessageChannel, NullChannel, QueueChannel, RecordingChannel};
pub use firmware::{BootMode, FirmwareError, FirmwareLoader, LoadReport};
pub use irq::{InterruptAggregator, IrqLines, IrqSource};
pub use platform::PlatformDescriptor;
pub use regs::{RegisterError, RegisterFile};
pub use shim::{CoreState, DspEndpoint, Endpoint, HostEndpoint};
pub use zone::{MemoryZoneMap, ZoneError, ZoneType};
