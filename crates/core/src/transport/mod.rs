//! Network transport for RTP media.
//!
//! RTP runs over plain UDP ([`udp`]): one datagram per packet, no
//! retransmission. The receive side is a blocking loop on its own thread
//! ([`receive_loop`]) that checks a `running` flag between reads so the
//! caller can stop it promptly.

pub mod udp;

use std::io::ErrorKind;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::RtpError;
use crate::receiver::Receiver;
use crate::sink::AccessUnitSink;
pub use udp::UdpTransport;

/// Largest datagram the receive loop accepts.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Read timeout used to poll the `running` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Blocking receive loop.
///
/// Reads datagrams from `transport` and feeds each one to the shared
/// `receiver` until `running` is cleared. Socket errors other than the poll
/// timeout are logged and the loop carries on. The socket's read timeout is
/// overwritten.
pub fn receive_loop<S: AccessUnitSink>(
    transport: UdpTransport,
    receiver: Arc<Mutex<Receiver<S>>>,
    running: Arc<AtomicBool>,
) {
    if let Err(e) = transport.set_read_timeout(Some(POLL_INTERVAL)) {
        tracing::warn!(error = %e, "failed to set UDP read timeout");
    }

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    while running.load(Ordering::SeqCst) {
        match transport.recv_from(&mut buf) {
            Ok((len, _peer)) => receiver.lock().on_packet_received(&buf[..len]),
            Err(RtpError::Io(ref e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "UDP receive error");
                }
            }
        }
    }
    tracing::debug!("receive loop exited");
}
