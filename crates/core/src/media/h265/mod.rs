//! H.265 (HEVC) RTP payload format, RFC 7798.
//!
//! Differences from H.264 (RFC 6184) that matter here:
//!
//! - **2-byte NAL unit header**. The NAL type sits in bits 1..6 of the
//!   first byte, followed by a 6-bit layer id and 3-bit temporal id.
//! - **FU payload header** is a full 2-byte PayloadHdr with type 49 plus a
//!   1-byte FU header carrying S/E and the 6-bit original type.
//! - **SDP** carries VPS as well as SPS and PPS:
//!   ```text
//!   a=rtpmap:98 H265/90000
//!   a=fmtp:98 sprop-vps=...; sprop-sps=...; sprop-pps=...
//!   ```
//!
//! Only Single NAL Unit and FU packets are produced or accepted.
//! Aggregation packets (type 48) and PACI (type 50) are rejected on
//! receive.

pub mod depacketizer;
pub mod fu;
pub mod packetizer;

pub use depacketizer::{DropCounters, H265Depacketizer};
pub use packetizer::{H265Packetizer, PacketizerConfig};
