//! Busy/done doorbell handshake.
//!
//! A `DoorbellSender` watches a command register on the local side: every
//! write is mirrored into the local status word and produces one
//! `IrqNotify` per handshake flag set. The matching `DoorbellReceiver` on the
//! peer side folds the notification into its own status word and drives its
//! interrupt when the unmasked status is non-zero.

use crate::channel::{DoorbellFlags, Message, MessageChannel, NotifyReason};
use crate::irq::{InterruptAggregator, IrqLines, IrqSource};
use crate::regs::RegisterFile;
use serde::{Deserialize, Serialize};

/// Sending half of one doorbell, bound to a command register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorbellSender {
    /// Matches `RegisterEffect::Doorbell(id)` on the command register.
    pub id: u8,
    /// Wire line carried by the notification, selects the peer receiver.
    pub line: u32,
    /// BUSY flag in the command word.
    pub busy: u32,
    /// DONE flag in the command word, zero if the register has none.
    pub done: u32,
    /// Local status register and its tracking bits.
    pub status: u32,
    pub status_busy: u32,
    pub status_done: u32,
}

impl DoorbellSender {
    #[inline]
    pub fn flags(&self, value: u32) -> DoorbellFlags {
        DoorbellFlags {
            busy: self.busy != 0 && value & self.busy != 0,
            done: self.done != 0 && value & self.done != 0,
        }
    }

    /// Handle a CPU write of `value` to the command register. The register
    /// itself already holds the verbatim value.
    pub fn on_command_write(
        &self,
        regs: &mut RegisterFile,
        value: u32,
        channel: &dyn MessageChannel,
    ) -> DoorbellFlags {
        let flags = self.flags(value);

        let mut status = regs.word(self.status) & !(self.status_busy | self.status_done);
        if flags.busy {
            status |= self.status_busy;
        }
        if flags.done {
            status |= self.status_done;
        }
        regs.set_word(self.status, status);

        if flags.busy {
            log::debug!("[Doorbell] {}: send BUSY to peer value={:#x}", regs.name(), value);
            channel.send(Message::IrqNotify {
                line: self.line,
                reason: NotifyReason::Busy,
                value,
                flags,
            });
        }
        if flags.done {
            log::debug!("[Doorbell] {}: send DONE to peer value={:#x}", regs.name(), value);
            channel.send(Message::IrqNotify {
                line: self.line,
                reason: NotifyReason::Done,
                value,
                flags,
            });
        }
        flags
    }
}

/// How an inbound doorbell masks its interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskReg {
    None,
    /// Set bits suppress the matching status bits.
    Mask(u32),
    /// Set bits enable the matching status bits.
    Enable(u32),
}

/// Where an inbound doorbell signals the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrqTarget {
    /// A CPU line driven directly.
    Line(u32),
    /// A source of the interrupt aggregator.
    Source(IrqSource),
}

/// Receiving half of one doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorbellReceiver {
    /// Matches `RegisterEffect::DoorbellMask(id)` / `DoorbellStatus(id)`.
    pub id: u8,
    /// Wire line this receiver answers to.
    pub line: u32,
    /// Local copy of the peer's command word, if mirrored.
    pub command: Option<u32>,
    pub status: u32,
    pub status_busy: u32,
    pub status_done: u32,
    pub mask: MaskReg,
    pub target: IrqTarget,
    /// Pending bits accumulate until acknowledged instead of tracking the
    /// latest notification (messaging-unit style).
    pub sticky: bool,
}

impl DoorbellReceiver {
    /// Unmasked handshake bits of the status word.
    pub fn active(&self, regs: &RegisterFile) -> u32 {
        let status = regs.word(self.status) & (self.status_busy | self.status_done);
        match self.mask {
            MaskReg::None => status,
            MaskReg::Mask(off) => status & !regs.word(off),
            MaskReg::Enable(off) => status & regs.word(off),
        }
    }

    fn drive(&self, level: bool, lines: &mut IrqLines, agg: Option<&mut InterruptAggregator>) {
        match self.target {
            IrqTarget::Line(line) => lines.set(line, level),
            IrqTarget::Source(source) => match agg {
                Some(agg) => {
                    if level {
                        agg.raise(source, 1, lines);
                    } else {
                        agg.lower(source, 1, lines);
                    }
                }
                None => log::warn!("[Doorbell] no aggregator for {:?}", source),
            },
        }
    }

    /// A notification from the peer arrived. Returns whether the interrupt was
    /// asserted.
    pub fn on_notify(
        &self,
        regs: &mut RegisterFile,
        value: u32,
        flags: DoorbellFlags,
        lines: &mut IrqLines,
        agg: Option<&mut InterruptAggregator>,
    ) -> bool {
        if let Some(command) = self.command {
            regs.set_word(command, value);
        }
        let mut status = regs.word(self.status);
        if !self.sticky {
            status &= !(self.status_busy | self.status_done);
        }
        if flags.busy {
            status |= self.status_busy;
        }
        if flags.done {
            status |= self.status_done;
        }
        regs.set_word(self.status, status);

        let active = self.active(regs);
        log::debug!(
            "[Doorbell] {}: notify line={} status={:#x} active={:#x}",
            regs.name(),
            self.line,
            status,
            active
        );
        if active != 0 {
            self.drive(true, lines, agg);
            true
        } else {
            false
        }
    }

    /// Mask or status changed locally: drop the interrupt once nothing
    /// unmasked is left. Never asserts.
    pub fn refresh(
        &self,
        regs: &RegisterFile,
        lines: &mut IrqLines,
        agg: Option<&mut InterruptAggregator>,
    ) {
        if self.active(regs) == 0 {
            log::debug!("[Doorbell] {}: de-assert line={}", regs.name(), self.line);
            self.drive(false, lines, agg);
        }
    }
}
