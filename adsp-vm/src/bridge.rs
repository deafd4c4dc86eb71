//! Runs both endpoints on their own dispatcher threads, connected by an
//! in-process queue pair.
//!
//! The CPU side of each endpoint (MMIO reads and writes) goes through the
//! shared lock; inbound messages are applied by the dispatcher as they arrive,
//! so a notification and the peer's register update are never observed torn.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::channel::{Message, QueueChannel};
use crate::platform::PlatformDescriptor;
use crate::shim::{DspEndpoint, Endpoint, HostEndpoint};

/// How long a dispatcher blocks before re-checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<E>(m: &Mutex<E>) -> MutexGuard<'_, E> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Bridge {
    dsp: Arc<Mutex<DspEndpoint>>,
    host: Arc<Mutex<HostEndpoint>>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Bridge {
    pub fn new(desc: &PlatformDescriptor) -> io::Result<Self> {
        let (dsp_end, host_end) = QueueChannel::pair();
        let (dsp_tx, dsp_rx) = dsp_end.split();
        let (host_tx, host_rx) = host_end.split();

        let dsp = Arc::new(Mutex::new(DspEndpoint::new(desc, Box::new(dsp_tx))));
        let host = Arc::new(Mutex::new(HostEndpoint::new(desc, Box::new(host_tx))));
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = vec![
            spawn_dispatcher("adsp-dsp", Arc::clone(&dsp), dsp_rx, Arc::clone(&shutdown))?,
            spawn_dispatcher("adsp-host", Arc::clone(&host), host_rx, Arc::clone(&shutdown))?,
        ];
        log::info!("[Bridge] {} endpoints running", desc.name);

        Ok(Self {
            dsp,
            host,
            shutdown,
            workers,
        })
    }

    pub fn dsp(&self) -> MutexGuard<'_, DspEndpoint> {
        lock(&self.dsp)
    }

    pub fn host(&self) -> MutexGuard<'_, HostEndpoint> {
        lock(&self.host)
    }

    /// Poll `cond` against both endpoints until it holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, mut cond: impl FnMut(&DspEndpoint, &HostEndpoint) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let dsp = self.dsp();
                let host = self.host();
                if cond(&dsp, &host) {
                    return true;
                }
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Stop both dispatchers and wait for them to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("[Bridge] dispatcher panicked");
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_dispatcher<E: Endpoint + 'static>(
    name: &str,
    endpoint: Arc<Mutex<E>>,
    rx: Receiver<Message>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || dispatch(endpoint, rx, shutdown))
}

fn dispatch<E: Endpoint>(endpoint: Arc<Mutex<E>>, rx: Receiver<Message>, shutdown: Arc<AtomicBool>) {
    let name = lock(&endpoint).name().to_string();
    log::debug!("[Bridge] {} dispatcher started", name);

    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(msg) => {
                log::trace!("[Bridge] {} <- {:?}", name, msg);
                lock(&endpoint).handle_message(msg);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("[Bridge] {} peer gone", name);
                break;
            }
        }
    }
    log::debug!("[Bridge] {} dispatcher stopped", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{byt, BYT_DSP_SHIM_BASE, BYT_HOST_SHIM_BASE};
    use crate::shim::CoreState;

    const WAIT: Duration = Duration::from_secs(2);

    #[test]
    fn test_doorbell_crosses_threads() {
        let bridge = Bridge::new(&PlatformDescriptor::byt()).unwrap();
        bridge.dsp().write(BYT_DSP_SHIM_BASE + byt::IPCDH as u64, 4, (byt::IPC_BUSY | 0x7) as u64);
        assert!(bridge.wait_for(WAIT, |_, host| host.irq_pending()));
        assert_eq!(bridge.host().shim().word(byt::IPCDH), byt::IPC_BUSY | 0x7);

        bridge.host().write(BYT_HOST_SHIM_BASE + byt::IPCXH as u64, 4, byt::IPC_BUSY as u64);
        assert!(bridge.wait_for(WAIT, |dsp, _| dsp.lines().is_asserted(byt::IRQ_EXT_IA)));
        bridge.shutdown();
    }

    #[test]
    fn test_power_handshake_and_reset_over_threads() {
        let bridge = Bridge::new(&PlatformDescriptor::byt()).unwrap();
        bridge
            .dsp()
            .write(BYT_DSP_SHIM_BASE + byt::IPCLPESCH as u64, 4, (byt::IPC_BUSY | byt::PMC_SET_LPECLK) as u64);
        assert!(bridge.wait_for(WAIT, |dsp, _| dsp.lines().is_asserted(byt::IRQ_EXT_PMC)));
        assert_eq!(bridge.host().power_requests(), &[byt::PMC_SET_LPECLK]);

        bridge.host().write(BYT_HOST_SHIM_BASE + byt::CSR as u64, 4, byt::CSR_RST as u64);
        assert!(bridge.wait_for(WAIT, |dsp, _| dsp.core_state() == CoreState::Reset));
    }
}
