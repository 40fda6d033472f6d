//! Sender API.
//!
//! [`StreamSender`] pairs a packetizer with a connected [`UdpTransport`].
//! The packetizer sits behind a mutex so several threads may submit frames;
//! each call packetizes and transmits under the lock, which keeps sequence
//! numbers contiguous on the wire.
//!
//! Sending is fire-and-forget. A datagram is handed to the socket once and
//! never retried.

use std::net::ToSocketAddrs;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::Packetizer;
use crate::media::h265::H265Packetizer;
use crate::transport::UdpTransport;

/// Totals for one send call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub packets: usize,
    pub bytes: usize,
}

pub struct StreamSender<P: Packetizer> {
    packetizer: Mutex<P>,
    transport: UdpTransport,
}

impl<P: Packetizer> StreamSender<P> {
    /// `transport` must already be connected to the peer.
    pub fn new(packetizer: P, transport: UdpTransport) -> Self {
        Self {
            packetizer: Mutex::new(packetizer),
            transport,
        }
    }

    /// Bind `local`, connect to `peer` and wrap `packetizer`.
    pub fn connect(
        packetizer: P,
        local: impl ToSocketAddrs,
        peer: impl ToSocketAddrs,
    ) -> Result<Self> {
        let transport = UdpTransport::bind(local)?;
        transport.connect(peer)?;
        tracing::debug!(
            local = %transport.local_addr()?,
            codec = packetizer.codec_name(),
            payload_type = packetizer.payload_type(),
            "stream sender connected"
        );
        Ok(Self::new(packetizer, transport))
    }

    /// Packetize one Annex B frame and send every packet.
    ///
    /// Returns the first send error; packets after it are not sent.
    pub fn send_frame(&self, encoded_data: &[u8], frame_rate: u32) -> Result<SendReport> {
        let mut packetizer = self.packetizer.lock();
        let packets = packetizer.packetize_frame(encoded_data, frame_rate)?;
        self.transmit(&packets)
    }

    pub fn reset_sequence_number(&self) {
        self.packetizer.lock().reset_sequence_number();
    }

    /// Run `f` with the packetizer locked, e.g. to read SDP attributes.
    pub fn with_packetizer<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.packetizer.lock())
    }

    pub fn transport(&self) -> &UdpTransport {
        &self.transport
    }

    fn transmit(&self, packets: &[Vec<u8>]) -> Result<SendReport> {
        let mut report = SendReport::default();
        for packet in packets {
            report.bytes += self.transport.send(packet)?;
            report.packets += 1;
        }
        tracing::trace!(packets = report.packets, bytes = report.bytes, "packets sent");
        Ok(report)
    }
}

impl StreamSender<H265Packetizer> {
    /// Packetize and send a single NAL unit at an explicit timestamp.
    ///
    /// The running frame timestamp is left untouched.
    pub fn send_nal(
        &self,
        nal_unit: &[u8],
        timestamp: u32,
        is_last_nal_in_access_unit: bool,
    ) -> Result<SendReport> {
        let mut packetizer = self.packetizer.lock();
        let packets = packetizer.packetize(nal_unit, timestamp, is_last_nal_in_access_unit)?;
        self.transmit(&packets)
    }
}

impl<P: Packetizer> std::fmt::Debug for StreamSender<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSender")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}
