//! SDP session description for a sent stream (RFC 8866).
//!
//! Lets a player (ffplay, VLC, GStreamer `sdpdemux`) open the RTP stream
//! without any signaling:
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 <addr>
//! s=<session-name>
//! c=IN IP4 <addr>
//! t=0 0
//! a=tool:h265-rtp
//! a=recvonly
//! m=video <port> RTP/AVP 98
//! a=rtpmap:98 H265/90000
//! a=fmtp:98 sprop-vps=...; sprop-sps=...; sprop-pps=...
//! a=control:track1
//! ```
//!
//! The document describes the stream from the receiver's side, so the
//! direction is `recvonly` and the media port is the one packets are sent to.

use std::net::IpAddr;

use crate::media::Packetizer;

/// Render an SDP document for a stream sent to `dest_ip:port`.
pub fn session_description(
    packetizer: &dyn Packetizer,
    dest_ip: IpAddr,
    port: u16,
    session_name: &str,
) -> String {
    let addr_type = match dest_ip {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };

    let mut sdp: Vec<String> = Vec::new();
    sdp.push("v=0".to_string());
    sdp.push(format!("o=- 0 0 IN {} {}", addr_type, dest_ip));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("c=IN {} {}", addr_type, dest_ip));
    sdp.push("t=0 0".to_string());
    sdp.push("a=tool:h265-rtp".to_string());
    sdp.push("a=recvonly".to_string());
    sdp.push(format!("m=video {} RTP/AVP {}", port, packetizer.payload_type()));
    sdp.extend(packetizer.sdp_attributes());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
