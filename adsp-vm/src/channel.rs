//! Inter-processor message channel.
//!
//! Register side effects on one simulated processor reach the other only as
//! `Message`s. Sending is best-effort and never blocks: a closed peer drops
//! the message, the way a doorbell line nobody listens to is simply lost.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Largest frame accepted by `read_frame`.
pub const MAX_FRAME_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("peer channel closed")]
    Closed,

    #[error("frame codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds limit")]
    Oversized(usize),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a doorbell fired. Only used for tracing, the receiver treats both alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotifyReason {
    Busy,
    Done,
}

/// Handshake bits carried with a doorbell notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorbellFlags {
    pub busy: bool,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Doorbell `line` fired with command word `value`.
    IrqNotify {
        line: u32,
        reason: NotifyReason,
        value: u32,
        flags: DoorbellFlags,
    },
    /// Verbatim mirror of a register write, `address` being the block offset.
    RegisterWriteEcho { address: u32, value: u32 },
    /// A DMA channel raised or dropped its interrupt.
    DmaEvent { controller: u8, channel: u8, raised: bool },
    /// Power-management command request (DSP to host) or completion (host to DSP).
    PowerEvent { command: u32 },
}

/// Outbound half of a channel as seen by the devices.
pub trait MessageChannel: Send {
    /// Fire-and-forget send. Undeliverable messages are dropped.
    fn send(&self, msg: Message) {
        if let Err(e) = self.try_send(msg) {
            log::debug!("[Channel] message dropped: {}", e);
        }
    }

    fn try_send(&self, msg: Message) -> Result<(), ChannelError>;
}

/// Channel that drops everything. Used when no peer is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChannel;

impl MessageChannel for NullChannel {
    fn try_send(&self, _msg: Message) -> Result<(), ChannelError> {
        Err(ChannelError::Closed)
    }
}

/// Records every message sent. Clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct RecordingChannel {
    sent: Arc<Mutex<Vec<Message>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageChannel for RecordingChannel {
    fn try_send(&self, msg: Message) -> Result<(), ChannelError> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(msg);
        Ok(())
    }
}

/// One end of an in-process FIFO link between the two processors.
pub struct QueueChannel {
    tx: Sender<Message>,
    rx: Receiver<Message>,
}

impl QueueChannel {
    /// Two connected ends: what one sends the other receives, in order.
    pub fn pair() -> (QueueChannel, QueueChannel) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            QueueChannel { tx: a_tx, rx: a_rx },
            QueueChannel { tx: b_tx, rx: b_rx },
        )
    }

    /// Split into an outbound sender and the inbound receiver.
    pub fn split(self) -> (QueueSender, Receiver<Message>) {
        (QueueSender { tx: self.tx }, self.rx)
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Result<Option<Message>, ChannelError> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }
}

impl MessageChannel for QueueChannel {
    fn try_send(&self, msg: Message) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Closed)
    }
}

/// Outbound half of a split `QueueChannel`.
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<Message>,
}

impl MessageChannel for QueueSender {
    fn try_send(&self, msg: Message) -> Result<(), ChannelError> {
        self.tx.send(msg).map_err(|_| ChannelError::Closed)
    }
}

// ============================================================================
// Frame codec for transports crossing a process boundary
// ============================================================================

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, ChannelError> {
    Ok(bincode::serialize(msg)?)
}

pub fn decode_frame(buf: &[u8]) -> Result<Message, ChannelError> {
    Ok(bincode::deserialize(buf)?)
}

/// Write one length-prefixed (u32 LE) frame.
pub fn write_frame<W: Write>(w: &mut W, msg: &Message) -> Result<(), ChannelError> {
    let body = encode_frame(msg)?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(&body)?;
    w.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Message>, ChannelError> {
    let mut len = [0u8; 4];
    match r.read_exact(&mut len) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChannelError::Oversized(len));
    }
    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;
    decode_frame(&body).map(Some)
}

/// Channel writing frames to a byte stream (socket, pipe).
pub struct StreamChannel<W: Write + Send> {
    stream: Mutex<W>,
}

impl<W: Write + Send> StreamChannel<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    pub fn into_inner(self) -> W {
        self.stream.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> MessageChannel for StreamChannel<W> {
    fn try_send(&self, msg: Message) -> Result<(), ChannelError> {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        write_frame(&mut *stream, &msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify() -> Message {
        Message::IrqNotify {
            line: 0,
            reason: NotifyReason::Busy,
            value: 0x8000_0001,
            flags: DoorbellFlags { busy: true, done: false },
        }
    }

    #[test]
    fn test_queue_pair_is_fifo() {
        let (dsp, host) = QueueChannel::pair();
        dsp.send(notify());
        dsp.send(Message::RegisterWriteEcho { address: 0, value: 2 });
        assert_eq!(host.try_recv().unwrap(), Some(notify()));
        assert_eq!(
            host.try_recv().unwrap(),
            Some(Message::RegisterWriteEcho { address: 0, value: 2 })
        );
        assert_eq!(host.try_recv().unwrap(), None);
        assert_eq!(dsp.try_recv().unwrap(), None);
    }

    #[test]
    fn test_send_to_closed_peer_is_dropped() {
        let (dsp, host) = QueueChannel::pair();
        drop(host);
        assert!(matches!(dsp.try_send(notify()), Err(ChannelError::Closed)));
        // must not panic
        dsp.send(notify());
        assert!(matches!(dsp.try_recv(), Err(ChannelError::Closed)));
    }

    #[test]
    fn test_recording_channel_shares_log() {
        let chan = RecordingChannel::new();
        let clone = chan.clone();
        clone.send(Message::PowerEvent { command: 4 });
        assert_eq!(chan.messages(), vec![Message::PowerEvent { command: 4 }]);
        assert_eq!(chan.take().len(), 1);
        assert!(chan.is_empty());
    }

    #[test]
    fn test_stream_frames() {
        let chan = StreamChannel::new(Vec::new());
        chan.send(notify());
        chan.send(Message::DmaEvent { controller: 1, channel: 3, raised: true });
        let bytes = chan.into_inner();

        let mut cursor = std::io::Cursor::new(bytes);
        assert_eq!(read_frame(&mut cursor).unwrap(), Some(notify()));
        assert_eq!(
            read_frame(&mut cursor).unwrap(),
            Some(Message::DmaEvent { controller: 1, channel: 3, raised: true })
        );
        assert_eq!(read_frame(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut bytes = (MAX_FRAME_SIZE as u32 + 1).to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 8]);
        let mut cursor = std::io::Cursor::new(bytes);
        assert!(matches!(read_frame(&mut cursor), Err(ChannelError::Oversized(_))));
    }

    #[test]
    fn test_garbage_frame_is_codec_error() {
        assert!(matches!(decode_frame(&[0xff, 0xff, 0xff, 0xff, 0xff]), Err(ChannelError::Codec(_))));
    }
}
