use rand::RngExt;

use crate::error::{Result, RtpError};

/// Size of the fixed RTP header in bytes.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP protocol version carried in every packet.
pub const RTP_VERSION: u8 = 2;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the fields this stack sends are represented. [`encode`](Self::encode)
/// always writes version 2 with padding, extension and CSRC count zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Set on the last packet of an access unit (RFC 7798 §4.1).
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence: u16,
    /// Media timestamp, 90 kHz for video.
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize to the 12-byte wire form (big-endian multi-byte fields).
    pub fn encode(&self) -> [u8; RTP_HEADER_LEN] {
        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = RTP_VERSION << 6;
        header[1] = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    /// Parse the first 12 bytes of `data`.
    ///
    /// Padding, extension and CSRC count are ignored here; use
    /// [`RtpPacket::parse`] to locate the payload of a received datagram.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < RTP_HEADER_LEN {
            return Err(RtpError::TruncatedHeader {
                needed: RTP_HEADER_LEN,
                actual: data.len(),
            });
        }
        if data[0] >> 6 != RTP_VERSION {
            return Err(RtpError::MalformedHeader("RTP version is not 2"));
        }

        Ok(Self {
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }
}

/// A received RTP packet borrowing its payload from the datagram.
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
    /// Length of the whole datagram.
    pub size: usize,
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram, skipping any CSRC list and header extension and
    /// removing trailing padding (RFC 3550 §5.1, §5.3.1).
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let header = RtpHeader::decode(data)?;

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        let truncated = |needed: usize| RtpError::TruncatedHeader {
            needed,
            actual: data.len(),
        };

        if has_extension {
            if data.len() < offset + 4 {
                return Err(truncated(offset + 4));
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }
        if data.len() < offset {
            return Err(truncated(offset));
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(RtpError::MalformedHeader("RTP padding exceeds payload"));
            }
            end -= pad;
        }

        Ok(Self {
            header,
            payload: &data[offset..end],
            size: data.len(),
        })
    }
}

/// Sender-side RTP header state.
///
/// Manages the per-stream fields that persist across packets:
/// - **Sequence number**: 16-bit, wrapping, consumed by every
///   [`write`](Self::write).
/// - **Timestamp**: the running frame clock, kept as u64; headers carry the
///   low 32 bits.
/// - **SSRC**: fixed for the lifetime of the writer.
#[derive(Debug)]
pub struct RtpHeaderWriter {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeaderWriter {
    /// Create a new RTP header state with explicit SSRC.
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
    /// the probability of collisions between independent sessions.
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next [`write`](Self::write) call will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Running timestamp (internal u64 representation).
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Serialize a header for one packet and consume one sequence number.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        let header = RtpHeader {
            marker,
            payload_type: self.pt,
            sequence: self.sequence,
            timestamp,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        header.encode()
    }

    /// Advance the running timestamp by the given number of clock ticks.
    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }

    /// Restart sequence numbering at 0.
    pub fn reset_sequence(&mut self) {
        tracing::debug!(ssrc = format_args!("{:#010X}", self.ssrc), "sequence number reset");
        self.sequence = 0;
    }
}
