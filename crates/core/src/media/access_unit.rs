use crate::media::nal::{ANNEX_B_START_CODE, NalUnit};

/// NAL units sharing one RTP timestamp, ready for a decoder.
///
/// NAL units are kept in arrival order. `complete` is true when the unit was
/// closed by the RTP marker bit and false when a newer timestamp forced it
/// out early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub ssrc: u32,
    pub timestamp: u32,
    nal_units: Vec<NalUnit>,
    complete: bool,
}

impl AccessUnit {
    pub fn new(ssrc: u32, timestamp: u32, nal_units: Vec<NalUnit>, complete: bool) -> Self {
        Self {
            ssrc,
            timestamp,
            nal_units,
            complete,
        }
    }

    pub fn nal_units(&self) -> &[NalUnit] {
        &self.nal_units
    }

    pub fn into_nal_units(self) -> Vec<NalUnit> {
        self.nal_units
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Total NAL bytes, start codes excluded.
    pub fn byte_len(&self) -> usize {
        self.nal_units.iter().map(NalUnit::len).sum()
    }

    /// Whether the unit carries a random access picture (IDR/CRA/BLA).
    pub fn is_keyframe(&self) -> bool {
        self.nal_units.iter().any(|n| n.nal_type().is_irap())
    }

    pub fn has_parameter_sets(&self) -> bool {
        self.nal_units.iter().any(|n| n.nal_type().is_parameter_set())
    }

    /// Serialize as an Annex B byte stream, a 4-byte start code before
    /// every NAL unit.
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len() + ANNEX_B_START_CODE.len() * self.nal_units.len());
        for nal in &self.nal_units {
            out.extend_from_slice(&ANNEX_B_START_CODE);
            out.extend_from_slice(nal.as_bytes());
        }
        out
    }
}
