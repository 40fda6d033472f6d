//! H.265 NAL unit model (ITU-T H.265 §7.3.1.2).
//!
//! Every H.265 NAL unit starts with a 2-byte header:
//!
//! ```text
//! +---------------+---------------+
//! |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|   Type    |  LayerId  | TID |
//! +-------------+-----------------+
//! ```
//!
//! The layer id straddles the byte boundary: its top bit is the last bit of
//! byte 0 and its low five bits are the top of byte 1.

use std::mem;

use crate::error::{Result, RtpError};

/// Length of the H.265 NAL unit header in bytes.
pub const NAL_HEADER_LEN: usize = 2;

/// 4-byte Annex B start code, re-added in front of NAL units handed to a decoder.
pub const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

/// H.265 NAL unit type (6-bit field, Table 7-1 of H.265 and RFC 7798 §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalUnitType {
    /// Non-reference trailing picture (0).
    TrailN,
    /// Reference trailing picture (1).
    TrailR,
    /// IDR picture with RADL pictures (19).
    IdrWRadl,
    /// IDR picture without leading pictures (20).
    IdrNLp,
    /// Clean random access picture (21).
    Cra,
    /// Video parameter set (32).
    Vps,
    /// Sequence parameter set (33).
    Sps,
    /// Picture parameter set (34).
    Pps,
    /// Access unit delimiter (35).
    Aud,
    /// Prefix SEI (39).
    PrefixSei,
    /// Suffix SEI (40).
    SuffixSei,
    /// RTP aggregation packet (48, RFC 7798 §4.4.2).
    AggregationPacket,
    /// RTP fragmentation unit (49, RFC 7798 §4.4.3).
    FragmentationUnit,
    /// Any other value.
    Other(u8),
}

impl NalUnitType {
    pub const FU: u8 = 49;

    pub fn as_u8(self) -> u8 {
        match self {
            Self::TrailN => 0,
            Self::TrailR => 1,
            Self::IdrWRadl => 19,
            Self::IdrNLp => 20,
            Self::Cra => 21,
            Self::Vps => 32,
            Self::Sps => 33,
            Self::Pps => 34,
            Self::Aud => 35,
            Self::PrefixSei => 39,
            Self::SuffixSei => 40,
            Self::AggregationPacket => 48,
            Self::FragmentationUnit => Self::FU,
            Self::Other(v) => v,
        }
    }

    /// Video coding layer types (slice data) occupy 0..=31.
    pub fn is_vcl(self) -> bool {
        self.as_u8() < 32
    }

    /// Intra random access point pictures (16..=23).
    pub fn is_irap(self) -> bool {
        (16..=23).contains(&self.as_u8())
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Vps | Self::Sps | Self::Pps)
    }

    /// Non-VCL types that open a new access unit when they follow slice data
    /// (H.265 §7.4.2.4.4).
    fn opens_access_unit(self) -> bool {
        matches!(
            self,
            Self::Vps | Self::Sps | Self::Pps | Self::Aud | Self::PrefixSei
        ) || (41..=44).contains(&self.as_u8())
    }

    /// Short human-readable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::TrailN => "TRAIL_N",
            Self::TrailR => "TRAIL_R",
            Self::IdrWRadl => "IDR_W_RADL",
            Self::IdrNLp => "IDR_N_LP",
            Self::Cra => "CRA_NUT",
            Self::Vps => "VPS",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
            Self::Aud => "AUD",
            Self::PrefixSei => "PREFIX_SEI",
            Self::SuffixSei => "SUFFIX_SEI",
            Self::AggregationPacket => "AP",
            Self::FragmentationUnit => "FU",
            Self::Other(_) => "OTHER",
        }
    }
}

impl From<u8> for NalUnitType {
    fn from(value: u8) -> Self {
        match value & 0x3F {
            0 => Self::TrailN,
            1 => Self::TrailR,
            19 => Self::IdrWRadl,
            20 => Self::IdrNLp,
            21 => Self::Cra,
            32 => Self::Vps,
            33 => Self::Sps,
            34 => Self::Pps,
            35 => Self::Aud,
            39 => Self::PrefixSei,
            40 => Self::SuffixSei,
            48 => Self::AggregationPacket,
            Self::FU => Self::FragmentationUnit,
            v => Self::Other(v),
        }
    }
}

/// Decoded 2-byte NAL unit header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// `forbidden_zero_bit`; kept so the header re-encodes bit-exactly.
    pub forbidden: bool,
    pub nal_type: NalUnitType,
    /// `nuh_layer_id` (6 bits).
    pub layer_id: u8,
    /// Raw `nuh_temporal_id_plus1` field (3 bits).
    pub temporal_id: u8,
}

impl NalHeader {
    /// Decode the header from the first two bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let [b0, b1] = match bytes {
            [b0, b1, ..] => [*b0, *b1],
            _ => return Err(RtpError::MalformedHeader("NAL header needs 2 bytes")),
        };
        Ok(Self {
            forbidden: b0 & 0x80 != 0,
            nal_type: NalUnitType::from((b0 >> 1) & 0x3F),
            layer_id: ((b0 & 0x01) << 5) | ((b1 & 0xF8) >> 3),
            temporal_id: b1 & 0x07,
        })
    }

    pub fn to_bytes(&self) -> [u8; NAL_HEADER_LEN] {
        let b0 = ((self.forbidden as u8) << 7)
            | ((self.nal_type.as_u8() & 0x3F) << 1)
            | ((self.layer_id >> 5) & 0x01);
        let b1 = ((self.layer_id & 0x1F) << 3) | (self.temporal_id & 0x07);
        [b0, b1]
    }

    /// Same layer/temporal id, different type. Used to build FU PayloadHdrs
    /// and to restore the original header on reassembly.
    pub fn with_type(self, nal_type: NalUnitType) -> Self {
        Self { nal_type, ..self }
    }
}

/// Classify a NAL unit from its header bytes.
pub fn classify(bytes: &[u8]) -> Result<NalHeader> {
    NalHeader::parse(bytes)
}

/// An H.265 NAL unit without Annex B start code.
///
/// The header is decoded once at construction and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    header: NalHeader,
    data: Vec<u8>,
}

impl NalUnit {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        let header = NalHeader::parse(&data)?;
        Ok(Self { header, data })
    }

    pub fn header(&self) -> NalHeader {
        self.header
    }

    pub fn nal_type(&self) -> NalUnitType {
        self.header.nal_type
    }

    /// Full NAL unit bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bytes after the 2-byte header.
    pub fn payload(&self) -> &[u8] {
        &self.data[NAL_HEADER_LEN..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: a NAL unit carries at least its header.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// `first_slice_segment_in_pic_flag`, the first bit after a VCL header.
    pub fn first_slice_segment_in_pic(&self) -> bool {
        self.nal_type().is_vcl() && self.data.get(NAL_HEADER_LEN).is_some_and(|b| b & 0x80 != 0)
    }
}

impl AsRef<[u8]> for NalUnit {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Split an Annex B byte stream into NAL units.
///
/// Scans for start codes (both 4-byte `00 00 00 01` and 3-byte `00 00 01`)
/// and returns the NAL data between them, excluding the start codes
/// themselves. Bytes before the first start code are ignored.
pub fn split_annex_b(data: &[u8]) -> Vec<&[u8]> {
    // (nal_data_start_index, start_code_length)
    let mut starts: Vec<(usize, usize)> = Vec::new();
    let mut i = 0usize;

    while i < data.len() {
        if i + 3 < data.len() && data[i..i + 4] == ANNEX_B_START_CODE {
            starts.push((i + 4, 4));
            i += 4;
        } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
            starts.push((i + 3, 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    starts
        .iter()
        .enumerate()
        .filter_map(|(idx, &(start, _))| {
            let end = match starts.get(idx + 1) {
                Some(&(next_start, next_sc_len)) => next_start - next_sc_len,
                None => data.len(),
            };
            (start < end).then(|| &data[start..end])
        })
        .collect()
}

/// Group a NAL unit sequence read from an elementary stream into access units.
///
/// A new unit begins at a VPS/SPS/PPS/AUD/prefix SEI that follows slice data
/// of the current unit, or at a slice with `first_slice_segment_in_pic_flag`
/// set when the current unit already holds a slice (H.265 §7.4.2.4.4).
pub fn group_access_units(nals: impl IntoIterator<Item = NalUnit>) -> Vec<Vec<NalUnit>> {
    let mut units = Vec::new();
    let mut current: Vec<NalUnit> = Vec::new();
    let mut has_vcl = false;

    for nal in nals {
        let nal_type = nal.nal_type();
        let opens = if nal_type.is_vcl() {
            nal.first_slice_segment_in_pic()
        } else {
            nal_type.opens_access_unit()
        };

        if has_vcl && opens {
            units.push(mem::take(&mut current));
            has_vcl = false;
        }
        has_vcl |= nal_type.is_vcl();
        current.push(nal);
    }

    if !current.is_empty() {
        units.push(current);
    }
    units
}
