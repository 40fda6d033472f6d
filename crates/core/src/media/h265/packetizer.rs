use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::fu::{FU_OVERHEAD, FragmentationUnit};
use crate::error::{Result, RtpError};
use crate::media::Packetizer;
use crate::media::nal::{self, NAL_HEADER_LEN, NalHeader, NalUnitType};
use crate::media::rtp::{RTP_HEADER_LEN, RtpHeaderWriter};

/// Dynamic payload type conventionally used for H.265 by this stack.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 98;

/// Largest RTP payload emitted by default. Keeps a 1200-byte payload plus
/// RTP/UDP/IP headers under common path MTUs.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1200;

/// 90 kHz video clock (RFC 7798 §7.1).
pub const DEFAULT_CLOCK_RATE: u32 = 90_000;

pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Packetizer settings.
#[derive(Debug, Clone)]
pub struct PacketizerConfig {
    /// RTP payload type written into every header (0..=127).
    pub payload_type: u8,
    /// Maximum RTP payload size in bytes (header excluded). Must exceed the
    /// 3-byte FU overhead.
    pub max_payload_size: usize,
    /// RTP clock rate in Hz.
    pub clock_rate: u32,
    /// Nominal frame rate of the stream, used to pace frames and to advance
    /// the timestamp in [`Packetizer::packetize_frame`].
    pub frame_rate: u32,
}

impl Default for PacketizerConfig {
    fn default() -> Self {
        Self {
            payload_type: DEFAULT_PAYLOAD_TYPE,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            clock_rate: DEFAULT_CLOCK_RATE,
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }
}

impl PacketizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.payload_type > 127 {
            return Err(RtpError::InvalidConfig(format!(
                "payload type {} exceeds 7 bits",
                self.payload_type
            )));
        }
        if self.max_payload_size <= FU_OVERHEAD {
            return Err(RtpError::InvalidConfig(format!(
                "max payload size {} leaves no room for FU data",
                self.max_payload_size
            )));
        }
        if self.clock_rate == 0 || self.frame_rate == 0 {
            return Err(RtpError::InvalidConfig(
                "clock rate and frame rate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// H.265 RTP packetizer (RFC 7798).
///
/// Converts NAL units (without Annex B start codes) into RTP packets using
/// two of the RFC 7798 payload structures:
///
/// - **Single NAL Unit** (§4.4.1): NAL units that fit within
///   `max_payload_size` are sent as-is in one packet.
///
/// - **Fragmentation Unit** (§4.4.3): larger NAL units are split across
///   packets. Each fragment carries a 2-byte PayloadHdr (original header
///   with type 49) and a 1-byte FU header before its slice of the NAL
///   payload:
///
///   ```text
///   PayloadHdr:    [F|Type=49|LayerId|TID]   (2 bytes)
///   FU header:     [S|E|FuType]              (1 byte)
///   Fragment data: [...]                     (up to max_payload_size - 3 bytes)
///   ```
///
/// Every packet consumes exactly one sequence number. The SSRC is chosen
/// at construction and never changes. The running timestamp only moves
/// through [`update_timestamp`](Self::update_timestamp), once per frame.
///
/// A packetizer is single-stream state: share it across threads only
/// behind a lock (see [`StreamSender`](crate::StreamSender)).
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeaderWriter,
    max_payload_size: usize,
    clock_rate: u32,
    frame_rate: u32,
    vps: Option<Vec<u8>>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

impl H265Packetizer {
    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn new(config: PacketizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_writer(
            RtpHeaderWriter::with_random_ssrc(config.payload_type),
            &config,
        ))
    }

    /// Create with an explicit SSRC.
    pub fn with_ssrc(config: PacketizerConfig, ssrc: u32) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_writer(
            RtpHeaderWriter::new(config.payload_type, ssrc),
            &config,
        ))
    }

    fn from_writer(header: RtpHeaderWriter, config: &PacketizerConfig) -> Self {
        Self {
            header,
            max_payload_size: config.max_payload_size,
            clock_rate: config.clock_rate,
            frame_rate: config.frame_rate,
            vps: None,
            sps: None,
            pps: None,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.header.ssrc()
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Configured nominal frame rate.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Running RTP timestamp (wire representation).
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp() as u32
    }

    /// Packetize a single NAL unit into one or more RTP packets.
    ///
    /// If the NAL fits within `max_payload_size`, it is sent as a Single NAL
    /// Unit packet whose marker equals `is_last_nal_in_access_unit`.
    /// Otherwise FU fragmentation is used and only the final fragment may
    /// carry the marker.
    ///
    /// Fails with [`RtpError::InvalidNalUnit`] when `nal_unit` is shorter
    /// than its 2-byte header; no sequence number is consumed in that case.
    pub fn packetize(
        &mut self,
        nal_unit: &[u8],
        timestamp: u32,
        is_last_nal_in_access_unit: bool,
    ) -> Result<Vec<Vec<u8>>> {
        let nal_header = NalHeader::parse(nal_unit).map_err(|_| RtpError::InvalidNalUnit {
            len: nal_unit.len(),
        })?;
        self.capture_parameter_set(nal_header.nal_type, nal_unit);

        if nal_unit.len() <= self.max_payload_size {
            let hdr = self.header.write(is_last_nal_in_access_unit, timestamp);
            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + nal_unit.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(nal_unit);
            return Ok(vec![packet]);
        }

        let payload = &nal_unit[NAL_HEADER_LEN..];
        let max_fragment = self.max_payload_size - FU_OVERHEAD;
        let count = payload.len().div_ceil(max_fragment);
        let mut packets = Vec::with_capacity(count);

        for (i, chunk) in payload.chunks(max_fragment).enumerate() {
            let first = i == 0;
            let last = i + 1 == count;

            let marker = is_last_nal_in_access_unit && last;
            let hdr = self.header.write(marker, timestamp);

            let mut packet = Vec::with_capacity(RTP_HEADER_LEN + FU_OVERHEAD + chunk.len());
            packet.extend_from_slice(&hdr);
            FragmentationUnit::write(nal_header, first, last, chunk, &mut packet);
            packets.push(packet);
        }

        tracing::trace!(
            nal_type = nal_header.nal_type.name(),
            nal_size = nal_unit.len(),
            fragments = packets.len(),
            "FU fragmented NAL unit"
        );

        Ok(packets)
    }

    /// Advance the running timestamp by `clock_rate / frame_rate` ticks.
    ///
    /// Called once per encoded frame, however many packets it produced.
    pub fn update_timestamp(&mut self, frame_rate: u32) {
        if frame_rate == 0 {
            tracing::warn!("ignoring timestamp update with zero frame rate");
            return;
        }
        self.header.advance_timestamp(self.clock_rate / frame_rate);
    }

    /// Restart sequence numbering at 0.
    pub fn reset_sequence_number(&mut self) {
        self.header.reset_sequence();
    }

    /// Remember the first VPS/SPS/PPS seen, for the SDP `sprop-*` parameters.
    fn capture_parameter_set(&mut self, nal_type: NalUnitType, nal_unit: &[u8]) {
        let slot = match nal_type {
            NalUnitType::Vps => &mut self.vps,
            NalUnitType::Sps => &mut self.sps,
            NalUnitType::Pps => &mut self.pps,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(nal_unit.to_vec());
            tracing::debug!(
                "H.265 {} captured from bitstream ({} bytes)",
                nal_type.name(),
                nal_unit.len()
            );
        }
    }

    fn sprop_parameters(&self) -> Option<String> {
        let params: Vec<String> = [("vps", &self.vps), ("sps", &self.sps), ("pps", &self.pps)]
            .into_iter()
            .filter_map(|(name, nal)| {
                nal.as_deref()
                    .map(|n| format!("sprop-{}={}", name, BASE64_STANDARD.encode(n)))
            })
            .collect();
        (!params.is_empty()).then(|| params.join("; "))
    }
}

impl Packetizer for H265Packetizer {
    fn packetize_frame(&mut self, encoded_data: &[u8], frame_rate: u32) -> Result<Vec<Vec<u8>>> {
        let nal_units = nal::split_annex_b(encoded_data);
        if let Some(short) = nal_units.iter().find(|n| n.len() < NAL_HEADER_LEN) {
            return Err(RtpError::InvalidNalUnit { len: short.len() });
        }

        let timestamp = self.timestamp();
        let mut packets = Vec::new();
        for (i, nal) in nal_units.iter().enumerate() {
            let is_last = i + 1 == nal_units.len();
            packets.append(&mut self.packetize(nal, timestamp, is_last)?);
        }

        self.update_timestamp(frame_rate);

        tracing::trace!(
            nal_count = nal_units.len(),
            rtp_packets = packets.len(),
            frame_bytes = encoded_data.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "frame packetized"
        );

        Ok(packets)
    }

    fn codec_name(&self) -> &'static str {
        "H265"
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// SDP attributes per RFC 7798 §7.2.
    ///
    /// `a=rtpmap` defines the payload type and must precede the `a=fmtp`
    /// line that references it. The fmtp line is only present once at least
    /// one parameter set has been seen.
    fn sdp_attributes(&self) -> Vec<String> {
        let mut attrs = vec![format!(
            "a=rtpmap:{} {}/{}",
            self.payload_type(),
            self.codec_name(),
            self.clock_rate()
        )];
        if let Some(sprop) = self.sprop_parameters() {
            attrs.push(format!("a=fmtp:{} {}", self.payload_type(), sprop));
        }
        attrs.push("a=control:track1".to_string());
        attrs
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.timestamp()
    }

    fn reset_sequence_number(&mut self) {
        H265Packetizer::reset_sequence_number(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::h265::fu::FuHeader;
    use crate::media::rtp::RtpHeader;

    fn make_packetizer() -> H265Packetizer {
        H265Packetizer::with_ssrc(PacketizerConfig::default(), 0xAABBCCDD).unwrap()
    }

    fn idr(len: usize) -> Vec<u8> {
        let mut nal = vec![0x26, 0x01];
        nal.extend((0..len - 2).map(|i| (i % 251) as u8));
        nal
    }

    fn seq(packet: &[u8]) -> u16 {
        RtpHeader::decode(packet).unwrap().sequence
    }

    fn marker(packet: &[u8]) -> bool {
        RtpHeader::decode(packet).unwrap().marker
    }

    #[test]
    fn small_nal_single_packet() {
        let mut p = make_packetizer();
        let nal = vec![0x40, 0x01, 0x0C, 0x01];
        for last in [false, true] {
            let packets = p.packetize(&nal, 9000, last).unwrap();
            assert_eq!(packets.len(), 1);
            assert_eq!(&packets[0][RTP_HEADER_LEN..], &nal[..]);
            assert_eq!(marker(&packets[0]), last);
            let h = RtpHeader::decode(&packets[0]).unwrap();
            assert_eq!(h.timestamp, 9000);
            assert_eq!(h.payload_type, DEFAULT_PAYLOAD_TYPE);
            assert_eq!(h.ssrc, 0xAABBCCDD);
        }
    }

    #[test]
    fn nal_at_budget_is_not_fragmented() {
        let mut p = make_packetizer();
        let packets = p.packetize(&idr(DEFAULT_MAX_PAYLOAD_SIZE), 0, true).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].len(), RTP_HEADER_LEN + DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = make_packetizer();
        let nal = idr(3600);
        let packets = p.packetize(&nal, 0, true).unwrap();
        // 3598 payload bytes in chunks of 1197
        assert_eq!(packets.len(), 4);

        let mut rebuilt = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            assert!(packet.len() - RTP_HEADER_LEN <= DEFAULT_MAX_PAYLOAD_SIZE);
            let payload = &packet[RTP_HEADER_LEN..];
            assert_eq!(&payload[..2], &[0x62, 0x01], "PayloadHdr type 49");
            let fu = FuHeader::from_byte(payload[2]);
            assert_eq!(fu.start, i == 0);
            assert_eq!(fu.end, i == packets.len() - 1);
            assert_eq!(fu.nal_type, NalUnitType::IdrWRadl);
            assert_eq!(marker(packet), i == packets.len() - 1);
            rebuilt.extend_from_slice(&payload[FU_OVERHEAD..]);
        }
        assert_eq!(rebuilt, &nal[NAL_HEADER_LEN..]);
    }

    #[test]
    fn fragment_marker_follows_last_flag() {
        let mut p = make_packetizer();
        let packets = p.packetize(&idr(2500), 0, false).unwrap();
        assert!(packets.len() > 1);
        assert!(packets.iter().all(|pk| !marker(pk)));
    }

    #[test]
    fn sequence_strictly_increases_across_calls() {
        let mut p = make_packetizer();
        let mut all = Vec::new();
        all.extend(p.packetize(&idr(3000), 0, false).unwrap());
        all.extend(p.packetize(&[0x44, 0x01, 0xC1], 0, false).unwrap());
        all.extend(p.packetize(&idr(5000), 0, true).unwrap());
        for pair in all.windows(2) {
            assert_eq!(seq(&pair[1]), seq(&pair[0]).wrapping_add(1));
        }
        assert_eq!(seq(&all[0]), 0);
        assert_eq!(p.next_sequence(), all.len() as u16);
    }

    #[test]
    fn short_nal_rejected_without_consuming_sequence() {
        let mut p = make_packetizer();
        assert!(matches!(
            p.packetize(&[0x26], 0, true),
            Err(RtpError::InvalidNalUnit { len: 1 })
        ));
        assert!(p.packetize(&[], 0, true).is_err());
        assert_eq!(p.next_sequence(), 0);
    }

    #[test]
    fn reset_sequence_number_restarts_at_zero() {
        let mut p = make_packetizer();
        p.packetize(&idr(4000), 0, true).unwrap();
        p.reset_sequence_number();
        let packets = p.packetize(&[0x40, 0x01], 0, true).unwrap();
        assert_eq!(seq(&packets[0]), 0);
    }

    #[test]
    fn update_timestamp_per_frame() {
        let mut p = make_packetizer();
        p.update_timestamp(30);
        assert_eq!(p.timestamp(), 3000);
        p.update_timestamp(25);
        assert_eq!(p.timestamp(), 6600);
        p.update_timestamp(0);
        assert_eq!(p.timestamp(), 6600);
    }

    #[test]
    fn packetize_frame_marks_last_nal_and_advances() {
        let mut p = make_packetizer();
        let frame = [
            &[0u8, 0, 0, 1, 0x40, 0x01, 0x0C][..],
            &[0, 0, 0, 1, 0x42, 0x01, 0x01][..],
            &[0, 0, 1, 0x44, 0x01, 0xC1][..],
            &[0, 0, 0, 1, 0x26, 0x01, 0xAF][..],
        ]
        .concat();
        let packets = p.packetize_frame(&frame, 30).unwrap();
        assert_eq!(packets.len(), 4);
        let markers: Vec<bool> = packets.iter().map(|pk| marker(pk)).collect();
        assert_eq!(markers, vec![false, false, false, true]);
        assert!(
            packets
                .iter()
                .all(|pk| RtpHeader::decode(pk).unwrap().timestamp == 0)
        );
        assert_eq!(p.next_rtp_timestamp(), 3000);

        let next = p.packetize_frame(&[0, 0, 0, 1, 0x02, 0x01, 0x80], 30).unwrap();
        assert_eq!(RtpHeader::decode(&next[0]).unwrap().timestamp, 3000);
    }

    #[test]
    fn packetize_frame_rejects_short_nal_up_front() {
        let mut p = make_packetizer();
        let frame = [0, 0, 0, 1, 0x40, 0x01, 0, 0, 0, 1, 0x26];
        assert!(p.packetize_frame(&frame, 30).is_err());
        assert_eq!(p.next_sequence(), 0);
    }

    #[test]
    fn sdp_attributes_include_parameter_sets() {
        let mut p = make_packetizer();
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:98 H265/90000");
        assert!(!attrs.iter().any(|a| a.starts_with("a=fmtp")));

        p.packetize(&[0x40, 0x01, 0x0C], 0, false).unwrap();
        p.packetize(&[0x42, 0x01, 0x01], 0, false).unwrap();
        p.packetize(&[0x44, 0x01, 0xC1], 0, true).unwrap();
        let attrs = p.sdp_attributes();
        let fmtp = attrs
            .iter()
            .find(|a| a.starts_with("a=fmtp:98 "))
            .expect("fmtp line");
        assert!(fmtp.contains("sprop-vps=QAEM"));
        assert!(fmtp.contains("sprop-sps=QgEB"));
        assert!(fmtp.contains("sprop-pps=RAHB"));
        assert!(attrs.contains(&"a=control:track1".to_string()));
    }

    #[test]
    fn config_validation() {
        let bad = PacketizerConfig {
            max_payload_size: 3,
            ..Default::default()
        };
        assert!(matches!(
            H265Packetizer::new(bad),
            Err(RtpError::InvalidConfig(_))
        ));
        let bad_pt = PacketizerConfig {
            payload_type: 200,
            ..Default::default()
        };
        assert!(bad_pt.validate().is_err());
        assert!(PacketizerConfig::default().validate().is_ok());
    }

    #[test]
    fn codec_metadata() {
        let p = make_packetizer();
        assert_eq!(p.codec_name(), "H265");
        assert_eq!(p.clock_rate(), 90000);
        assert_eq!(p.payload_type(), 98);
        assert_eq!(p.frame_rate(), DEFAULT_FRAME_RATE);
    }
}
