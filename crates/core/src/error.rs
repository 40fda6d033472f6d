//! Error types for the H.265 RTP library.

/// Errors produced while packetizing or reassembling an H.265 RTP stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Sender**: [`InvalidNalUnit`](Self::InvalidNalUnit) and
///   [`InvalidConfig`](Self::InvalidConfig) are returned to the caller.
/// - **Receiver**: [`MalformedHeader`](Self::MalformedHeader),
///   [`TruncatedHeader`](Self::TruncatedHeader),
///   [`OrphanFragment`](Self::OrphanFragment),
///   [`UnknownPayloadType`](Self::UnknownPayloadType),
///   [`FragmentAbandoned`](Self::FragmentAbandoned) and
///   [`StalePacket`](Self::StalePacket) are recovered locally and only show
///   up in [`ReceiverStats`](crate::ReceiverStats).
/// - **Transport**: [`Io`](Self::Io) for socket failures.
#[derive(Debug, thiserror::Error)]
pub enum RtpError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Too few bytes to read a NAL unit header, or a header field holds an
    /// impossible value (e.g. RTP version other than 2).
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    /// The datagram ends before the RTP header (including any CSRC list or
    /// header extension it declares) is complete.
    #[error("truncated RTP header: need {needed} bytes, got {actual}")]
    TruncatedHeader { needed: usize, actual: usize },

    /// A NAL unit handed to the packetizer is too short to carry its 2-byte header.
    #[error("invalid NAL unit: {len} bytes")]
    InvalidNalUnit { len: usize },

    /// Continuation or end fragment with no fragment run in progress.
    #[error("orphan fragment (seq {seq})")]
    OrphanFragment { seq: u16 },

    /// Payload NAL type the reassembler does not handle.
    #[error("unknown payload NAL type {nal_type}")]
    UnknownPayloadType { nal_type: u8 },

    /// A fragment run was discarded before its end fragment arrived.
    #[error("fragment run abandoned: {reason}")]
    FragmentAbandoned { reason: &'static str },

    /// Packet belongs to an access unit that was already handed off.
    #[error("stale packet (timestamp {timestamp})")]
    StalePacket { timestamp: u32 },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience alias for `Result<T, RtpError>`.
pub type Result<T> = std::result::Result<T, RtpError>;
