//! Cross-core USB bridge.
//!
//! The USB core owns the CDC endpoint outright and runs [`BridgeEnd::service`]
//! in a tight loop; the control core talks to the link only through
//! [`HostPort`]. The two byte rings are the sole shared memory between the
//! cores.

use crate::config::{USB_RX_RING_SIZE, USB_TX_RING_SIZE};
use crate::hw::SerialPipe;
use crate::ring::{Consumer, Producer, Ring};

/// CDC endpoints move data in packets of this size; the service loop shuttles
/// bytes in matching chunks.
const CHUNK: usize = 64;

/// The pair of rings backing the link. Allocate one as a `static`, split once
/// at startup, and hand each half to its core.
pub struct UsbLink {
    /// Control core → USB host.
    tx: Ring<USB_TX_RING_SIZE>,
    /// USB host → control core.
    rx: Ring<USB_RX_RING_SIZE>,
}

impl UsbLink {
    pub const fn new() -> Self {
        Self {
            tx: Ring::new(),
            rx: Ring::new(),
        }
    }

    /// Splits the link into the control-core port and the USB-core end.
    /// Single use, like the rings underneath.
    pub fn split(&self) -> Option<(HostPort<'_>, BridgeEnd<'_>)> {
        let (tx_prod, tx_cons) = self.tx.split()?;
        let (rx_prod, rx_cons) = self.rx.split()?;
        Some((
            HostPort {
                link: self,
                tx: tx_prod,
                rx: rx_cons,
            },
            BridgeEnd {
                tx: tx_cons,
                rx: rx_prod,
            },
        ))
    }

    /// Bytes dropped on the outbound ring because the USB core fell behind.
    pub fn tx_overflow(&self) -> u32 {
        self.tx.overflow_count()
    }

    /// Bytes dropped on the inbound ring because the control core fell behind.
    pub fn rx_overflow(&self) -> u32 {
        self.rx.overflow_count()
    }
}

impl Default for UsbLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-core side of the link.
pub struct HostPort<'a> {
    link: &'a UsbLink,
    tx: Producer<'a, USB_TX_RING_SIZE>,
    rx: Consumer<'a, USB_RX_RING_SIZE>,
}

impl<'a> HostPort<'a> {
    /// Queues bytes for the host. Returns the number accepted; the rest is
    /// dropped and counted in the tx overflow statistic.
    pub fn send(&mut self, data: &[u8]) -> usize {
        self.tx.write(data)
    }

    /// Pulls received bytes. Never blocks.
    pub fn recv(&mut self, buf: &mut [u8]) -> usize {
        self.rx.read(buf)
    }

    pub fn rx_pending(&self) -> usize {
        self.rx.used_space()
    }

    pub fn rx_overflow(&self) -> u32 {
        self.link.rx_overflow()
    }

    pub fn tx_overflow(&self) -> u32 {
        self.link.tx_overflow()
    }

    /// Polls until the outbound ring drains or `timeout_ms` passes on the
    /// supplied millisecond clock. Returns true when drained.
    pub fn flush(&self, mut now_ms: impl FnMut() -> u32, timeout_ms: u32) -> bool {
        let deadline = now_ms().wrapping_add(timeout_ms);
        loop {
            if self.link.tx.is_empty() {
                return true;
            }
            if now_ms().wrapping_sub(deadline) as i32 >= 0 {
                return false;
            }
        }
    }
}

/// USB-core side of the link.
pub struct BridgeEnd<'a> {
    tx: Consumer<'a, USB_TX_RING_SIZE>,
    rx: Producer<'a, USB_RX_RING_SIZE>,
}

impl<'a> BridgeEnd<'a> {
    /// One pass of the bridge loop: drain the tx ring into the endpoint, then
    /// soak up everything the endpoint has received. Call from the USB core's
    /// main loop; never blocks on either side.
    pub fn service(&mut self, pipe: &mut impl SerialPipe) {
        let mut chunk = [0u8; CHUNK];

        loop {
            let n = self.tx.read(&mut chunk);
            if n == 0 {
                break;
            }
            let mut off = 0;
            while off < n {
                let written = pipe.write(&chunk[off..n]);
                if written == 0 {
                    break;
                }
                off += written;
            }
            if off < n {
                // Endpoint stalled mid-chunk; the host stopped draining.
                // Dropping beats blocking the whole bridge loop here.
                break;
            }
        }

        loop {
            let n = pipe.read(&mut chunk);
            if n == 0 {
                break;
            }
            // Ring overflow accounting covers a slow control core.
            self.rx.write(&chunk[..n]);
        }
    }
}
