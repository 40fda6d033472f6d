//! Media model and RTP (de)packetization.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded H.265 frame (access unit) is split into one or more RTP
//! packets. Every packet carries a 12-byte fixed header
//! ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping), for loss detection.
//! - **Timestamp** (32-bit), the 90 kHz media clock shared by every packet
//!   of one access unit.
//! - **SSRC** (32-bit), randomly chosen to identify the sender.
//! - **Marker bit**, set on the last packet of an access unit.
//!
//! ## Layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`nal`] | NAL header, NAL unit, Annex B splitting |
//! | [`rtp`] | RTP header codec and packet view |
//! | [`h265`] | RFC 7798 packetizer, FU codec and depacketizer |
//! | [`sequence`] | Sequence-number loss tracking |
//! | [`access_unit`] | Reassembled access units |

pub mod access_unit;
pub mod h265;
pub mod nal;
pub mod rtp;
pub mod sequence;

use crate::error::Result;

/// Codec-specific RTP packetizer.
///
/// Implementations provide:
/// - **Packetization**: splitting encoded frames into RTP-sized packets
/// - **SDP attributes**: codec parameters for the session description
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpHeaderWriter`];
/// packetizers compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one Annex B encoded frame into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload. All packets
    /// share one timestamp and the last one carries the marker bit. The
    /// running timestamp then advances by `clock_rate / frame_rate`.
    fn packetize_frame(&mut self, encoded_data: &[u8], frame_rate: u32) -> Result<Vec<Vec<u8>>>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"H265"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number. Dynamic types use 96..=127.
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines, each including the `a=` prefix.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number the next packet will carry.
    fn next_sequence(&self) -> u16;

    /// Timestamp the next frame will carry.
    fn next_rtp_timestamp(&self) -> u32;

    /// Restart sequence numbering at 0.
    fn reset_sequence_number(&mut self);
}
