//! H.265 RTP depacketizer (RFC 7798 receiver side).
//!
//! Rebuilds NAL units and access units from the packets of one SSRC.
//!
//! ## State machine
//!
//! ```text
//! Idle ──packet(ts)──> Accumulating(ts)
//! Accumulating(ts) ──marker──────────> Idle            (emit, complete)
//! Accumulating(ts) ──packet(ts' > ts)─> Accumulating(ts') (emit ts, incomplete)
//! any ──STALE_RESYNC_THRESHOLD stale packets in a row──> Accumulating(ts') (re-anchored)
//!
//! within Accumulating:
//!   Fragment::Idle ──FU S=1──> Fragment::Assembling
//!   Fragment::Assembling ──FU E=1, seq = last + 1──> Fragment::Idle (NAL appended)
//!   Fragment::Assembling ──gap / type change / new S=1 / AU closed──> abandoned
//! ```
//!
//! ## Loss handling
//!
//! There is no reordering buffer. NAL units are appended to the access unit
//! in arrival order, and a fragment that does not directly follow the
//! previous fragment of its run abandons the run. Every per-packet fault is
//! counted in [`DropCounters`] and the stream carries on.
//!
//! A packet older than the clock is stale. A run of stale packets means the
//! clock itself is wrong, e.g. a stray packet far in the future became the
//! reference, or the sender restarted its timestamps. After
//! [`STALE_RESYNC_THRESHOLD`] stale packets in a row the depacketizer
//! re-anchors on the incoming timestamp.

use std::mem;

use super::fu::FragmentationUnit;
use crate::error::{Result, RtpError};
use crate::media::access_unit::AccessUnit;
use crate::media::nal::{NalHeader, NalUnit, NalUnitType};
use crate::media::rtp::RtpPacket;
use crate::media::sequence::SequenceTracker;

/// Highest NAL type carried as a Single NAL Unit packet.
const MAX_SINGLE_NAL_TYPE: u8 = 40;

/// Consecutive stale packets that re-anchor the timestamp clock.
pub const STALE_RESYNC_THRESHOLD: u32 = 8;

/// Packets the depacketizer could not use, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounters {
    pub malformed_headers: u64,
    pub truncated_headers: u64,
    pub orphan_fragments: u64,
    pub unknown_payload_types: u64,
    pub fragments_abandoned: u64,
    pub stale_packets: u64,
}

impl DropCounters {
    /// Count one receiver-side fault. Errors that cannot come from a
    /// single packet are ignored.
    pub fn record(&mut self, err: &RtpError) {
        let counter = match err {
            RtpError::MalformedHeader(_) | RtpError::InvalidNalUnit { .. } => {
                &mut self.malformed_headers
            }
            RtpError::TruncatedHeader { .. } => &mut self.truncated_headers,
            RtpError::OrphanFragment { .. } => &mut self.orphan_fragments,
            RtpError::UnknownPayloadType { .. } => &mut self.unknown_payload_types,
            RtpError::FragmentAbandoned { .. } => &mut self.fragments_abandoned,
            RtpError::StalePacket { .. } => &mut self.stale_packets,
            RtpError::Io(_) | RtpError::InvalidConfig(_) => return,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.malformed_headers
            + self.truncated_headers
            + self.orphan_fragments
            + self.unknown_payload_types
            + self.fragments_abandoned
            + self.stale_packets
    }

    pub(crate) fn merge(&mut self, other: &DropCounters) {
        self.malformed_headers = self.malformed_headers.saturating_add(other.malformed_headers);
        self.truncated_headers = self.truncated_headers.saturating_add(other.truncated_headers);
        self.orphan_fragments = self.orphan_fragments.saturating_add(other.orphan_fragments);
        self.unknown_payload_types = self
            .unknown_payload_types
            .saturating_add(other.unknown_payload_types);
        self.fragments_abandoned = self
            .fragments_abandoned
            .saturating_add(other.fragments_abandoned);
        self.stale_packets = self.stale_packets.saturating_add(other.stale_packets);
    }
}

/// One NAL unit being rebuilt from FU packets.
#[derive(Debug)]
struct FragmentRun {
    header: NalHeader,
    last_seq: u16,
    buffer: Vec<u8>,
}

#[derive(Debug, Default)]
enum Fragment {
    #[default]
    Idle,
    Assembling(FragmentRun),
}

#[derive(Debug)]
struct PendingAccessUnit {
    timestamp: u32,
    nal_units: Vec<NalUnit>,
    fragment: Fragment,
}

impl PendingAccessUnit {
    fn new(timestamp: u32) -> Self {
        Self {
            timestamp,
            nal_units: Vec::new(),
            fragment: Fragment::Idle,
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    Accumulating(PendingAccessUnit),
}

/// `a` is strictly after `b` on the wrapping 32-bit RTP clock.
fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Reassembler for a single SSRC.
#[derive(Debug)]
pub struct H265Depacketizer {
    ssrc: u32,
    state: State,
    /// Timestamp of the last access unit closed, emitted or not.
    last_closed: Option<u32>,
    consecutive_stale: u32,
    resyncs: u64,
    tracker: SequenceTracker,
    drops: DropCounters,
    access_units_emitted: u64,
    incomplete_access_units: u64,
}

impl H265Depacketizer {
    pub fn new(ssrc: u32) -> Self {
        Self {
            ssrc,
            state: State::Idle,
            last_closed: None,
            consecutive_stale: 0,
            resyncs: 0,
            tracker: SequenceTracker::new(),
            drops: DropCounters::default(),
            access_units_emitted: 0,
            incomplete_access_units: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    pub fn drops(&self) -> &DropCounters {
        &self.drops
    }

    pub fn access_units_emitted(&self) -> u64 {
        self.access_units_emitted
    }

    pub fn incomplete_access_units(&self) -> u64 {
        self.incomplete_access_units
    }

    /// Times the timestamp clock was re-anchored after a run of stale packets.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Whether an access unit is currently open.
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, State::Accumulating(_))
    }

    /// Feed one parsed packet. Returns the access units it completed: none,
    /// one, or two when a newer timestamp flushes the open unit and the
    /// packet itself carries the marker.
    pub fn process(&mut self, packet: &RtpPacket<'_>) -> Vec<AccessUnit> {
        self.tracker.observe(packet.header.sequence);
        self.tracker.record_bytes(packet.size);

        let mut out = Vec::new();
        if let Err(err) = self.handle(packet, &mut out) {
            tracing::trace!(
                ssrc = format_args!("{:#010X}", self.ssrc),
                seq = packet.header.sequence,
                error = %err,
                "packet dropped"
            );
            self.drops.record(&err);
        }
        out
    }

    /// Emit whatever is open as an incomplete access unit.
    pub fn flush(&mut self) -> Option<AccessUnit> {
        let mut out = Vec::new();
        if let State::Accumulating(pending) = mem::take(&mut self.state) {
            self.close(pending, false, &mut out);
        }
        out.pop()
    }

    /// Explicit stream restart: drop all state and counters.
    pub fn reset(&mut self) {
        *self = Self::new(self.ssrc);
    }

    fn handle(&mut self, packet: &RtpPacket<'_>, out: &mut Vec<AccessUnit>) -> Result<()> {
        let mut pending = self.take_pending(packet.header.timestamp, out)?;
        let result = self.apply(&mut pending, packet);

        if packet.header.marker {
            self.close(pending, true, out);
        } else {
            self.state = State::Accumulating(pending);
        }
        result
    }

    /// Route a packet timestamp to an access unit, flushing the open one when
    /// the packet is newer. The state is left `Idle`; the caller puts the
    /// returned unit back.
    fn take_pending(
        &mut self,
        timestamp: u32,
        out: &mut Vec<AccessUnit>,
    ) -> Result<PendingAccessUnit> {
        let open = match mem::take(&mut self.state) {
            State::Accumulating(pending) if pending.timestamp == timestamp => {
                self.consecutive_stale = 0;
                return Ok(pending);
            }
            State::Accumulating(pending) if is_newer(timestamp, pending.timestamp) => {
                self.close(pending, false, out);
                self.consecutive_stale = 0;
                return Ok(PendingAccessUnit::new(timestamp));
            }
            State::Accumulating(pending) => Some(pending),
            State::Idle
                if self
                    .last_closed
                    .is_some_and(|last| !is_newer(timestamp, last)) =>
            {
                None
            }
            State::Idle => {
                self.consecutive_stale = 0;
                return Ok(PendingAccessUnit::new(timestamp));
            }
        };

        self.consecutive_stale += 1;
        if self.consecutive_stale < STALE_RESYNC_THRESHOLD {
            if let Some(pending) = open {
                self.state = State::Accumulating(pending);
            }
            return Err(RtpError::StalePacket { timestamp });
        }

        tracing::debug!(
            ssrc = format_args!("{:#010X}", self.ssrc),
            timestamp,
            last_closed = ?self.last_closed,
            "timestamp discontinuity, re-anchoring"
        );
        if let Some(pending) = open {
            self.close(pending, false, out);
        }
        self.last_closed = None;
        self.consecutive_stale = 0;
        self.resyncs += 1;
        Ok(PendingAccessUnit::new(timestamp))
    }

    fn apply(&mut self, pending: &mut PendingAccessUnit, packet: &RtpPacket<'_>) -> Result<()> {
        let payload = packet.payload;
        let header = NalHeader::parse(payload)?;

        match header.nal_type.as_u8() {
            0..=MAX_SINGLE_NAL_TYPE => {
                pending.nal_units.push(NalUnit::new(payload.to_vec())?);
                Ok(())
            }
            NalUnitType::FU => self.apply_fragment(pending, packet.header.sequence, payload),
            nal_type => Err(RtpError::UnknownPayloadType { nal_type }),
        }
    }

    fn apply_fragment(
        &mut self,
        pending: &mut PendingAccessUnit,
        seq: u16,
        payload: &[u8],
    ) -> Result<()> {
        let fu = FragmentationUnit::parse(payload)?;

        if fu.fu_header.start {
            if let Fragment::Assembling(run) = mem::take(&mut pending.fragment) {
                self.abandon(run, "new fragment run started");
            }

            let header = fu.original_header();
            let mut buffer = Vec::with_capacity(payload.len() * 4);
            buffer.extend_from_slice(&header.to_bytes());
            buffer.extend_from_slice(fu.data);

            if fu.fu_header.end {
                pending.nal_units.push(NalUnit::new(buffer)?);
            } else {
                pending.fragment = Fragment::Assembling(FragmentRun {
                    header,
                    last_seq: seq,
                    buffer,
                });
            }
            return Ok(());
        }

        let mut run = match mem::take(&mut pending.fragment) {
            Fragment::Idle => return Err(RtpError::OrphanFragment { seq }),
            Fragment::Assembling(run) => run,
        };

        if seq != run.last_seq.wrapping_add(1) {
            return Err(RtpError::FragmentAbandoned {
                reason: "sequence gap inside fragment run",
            });
        }
        if fu.fu_header.nal_type != run.header.nal_type {
            return Err(RtpError::FragmentAbandoned {
                reason: "fragment NAL type changed",
            });
        }

        run.buffer.extend_from_slice(fu.data);
        run.last_seq = seq;

        if fu.fu_header.end {
            tracing::trace!(
                nal_type = run.header.nal_type.name(),
                nal_size = run.buffer.len(),
                "fragmented NAL unit reassembled"
            );
            pending.nal_units.push(NalUnit::new(run.buffer)?);
        } else {
            pending.fragment = Fragment::Assembling(run);
        }
        Ok(())
    }

    fn abandon(&mut self, run: FragmentRun, reason: &'static str) {
        tracing::debug!(
            ssrc = format_args!("{:#010X}", self.ssrc),
            nal_type = run.header.nal_type.name(),
            buffered = run.buffer.len(),
            reason,
            "fragment run abandoned"
        );
        self.drops.record(&RtpError::FragmentAbandoned { reason });
    }

    fn close(&mut self, pending: PendingAccessUnit, complete: bool, out: &mut Vec<AccessUnit>) {
        if let Fragment::Assembling(run) = pending.fragment {
            self.abandon(run, "access unit closed mid-fragment");
        }
        self.last_closed = Some(pending.timestamp);

        if pending.nal_units.is_empty() {
            tracing::trace!(timestamp = pending.timestamp, "empty access unit discarded");
            return;
        }

        self.access_units_emitted += 1;
        if !complete {
            self.incomplete_access_units += 1;
        }
        tracing::trace!(
            timestamp = pending.timestamp,
            nal_units = pending.nal_units.len(),
            complete,
            "access unit emitted"
        );
        out.push(AccessUnit::new(
            self.ssrc,
            pending.timestamp,
            pending.nal_units,
            complete,
        ));
    }
}
