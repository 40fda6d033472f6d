//! Fragmentation Unit payload structure (RFC 7798 §4.4.3).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    PayloadHdr (Type=49)       |   FU header   |               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+               |
//! |                         FU payload                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!
//! FU header:  |S|E|  FuType   |
//! ```

use crate::error::{Result, RtpError};
use crate::media::nal::{NAL_HEADER_LEN, NalHeader, NalUnitType};

/// PayloadHdr plus FU header.
pub const FU_OVERHEAD: usize = NAL_HEADER_LEN + 1;

/// The 1-byte FU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuHeader {
    pub start: bool,
    pub end: bool,
    /// Type of the NAL unit being fragmented.
    pub nal_type: NalUnitType,
}

impl FuHeader {
    pub fn to_byte(self) -> u8 {
        ((self.start as u8) << 7) | ((self.end as u8) << 6) | (self.nal_type.as_u8() & 0x3F)
    }

    pub fn from_byte(b: u8) -> Self {
        Self {
            start: b & 0x80 != 0,
            end: b & 0x40 != 0,
            nal_type: NalUnitType::from(b & 0x3F),
        }
    }
}

/// A parsed FU payload borrowing its fragment data.
#[derive(Debug, Clone, Copy)]
pub struct FragmentationUnit<'a> {
    pub payload_header: NalHeader,
    pub fu_header: FuHeader,
    pub data: &'a [u8],
}

impl<'a> FragmentationUnit<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < FU_OVERHEAD {
            return Err(RtpError::MalformedHeader("FU payload shorter than 3 bytes"));
        }
        Ok(Self {
            payload_header: NalHeader::parse(payload)?,
            fu_header: FuHeader::from_byte(payload[NAL_HEADER_LEN]),
            data: &payload[FU_OVERHEAD..],
        })
    }

    /// Header of the fragmented NAL unit: PayloadHdr ids with the FU type.
    pub fn original_header(&self) -> NalHeader {
        self.payload_header.with_type(self.fu_header.nal_type)
    }

    /// Append one FU payload for a fragment of the NAL unit with `original` header.
    pub fn write(original: NalHeader, start: bool, end: bool, chunk: &[u8], out: &mut Vec<u8>) {
        let payload_header = original.with_type(NalUnitType::FragmentationUnit);
        let fu_header = FuHeader {
            start,
            end,
            nal_type: original.nal_type,
        };
        out.extend_from_slice(&payload_header.to_bytes());
        out.push(fu_header.to_byte());
        out.extend_from_slice(chunk);
    }
}
