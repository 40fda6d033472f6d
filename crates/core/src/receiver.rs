//! Receiver API: datagrams in, access units out.
//!
//! [`Receiver::on_packet_received`] is called once per datagram. It parses
//! the RTP header, routes the packet to the [`H265Depacketizer`] of its SSRC
//! and delivers every access unit that completes to the configured
//! [`AccessUnitSink`]. Faults never escape: they are counted and show up in
//! [`ReceiverStats`].
//!
//! The receiver is not internally synchronized. Feed it from one thread, or
//! wrap it in a mutex as [`receive_loop`](crate::transport::receive_loop)
//! does.

use std::collections::HashMap;

use crate::media::h265::{DropCounters, H265Depacketizer};
use crate::media::rtp::RtpPacket;
use crate::media::sequence::SequenceStats;
use crate::sink::{AccessUnitQueue, AccessUnitSink, Backpressure, DEFAULT_QUEUE_CAPACITY};

pub const DEFAULT_MAX_SOURCES: usize = 8;

/// Receiver settings.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Depth of the queue built by [`Receiver::with_queue`].
    pub queue_capacity: usize,
    /// Policy of that queue when the consumer falls behind.
    pub backpressure: Backpressure,
    /// SSRCs tracked at once. A new SSRC beyond this evicts the source
    /// heard from least recently.
    pub max_sources: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::default(),
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }
}

/// Point-in-time counters, summed over every tracked SSRC.
///
/// `packets_received`, `packets_lost` and `bytes_received` only cover
/// packets whose RTP header parsed; the others are counted in `drops`.
/// Counters of evicted sources are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_received: u64,
    pub access_units_emitted: u64,
    pub incomplete_access_units: u64,
    pub drops: DropCounters,
    /// Timestamp clock re-anchors after runs of stale packets.
    pub resyncs: u64,
    /// Sources evicted to make room for a new SSRC.
    pub evicted_sources: u64,
    pub active_sources: usize,
    /// Access units the sink discarded.
    pub sink_dropped: u64,
}

impl ReceiverStats {
    pub fn loss_rate(&self) -> f64 {
        SequenceStats {
            packets_received: self.packets_received,
            packets_lost: self.packets_lost,
            bytes_received: self.bytes_received,
        }
        .loss_rate()
    }
}

#[derive(Debug)]
struct Source {
    depacketizer: H265Depacketizer,
    /// Value of `Receiver::packets_seen` at the last packet.
    last_seen: u64,
}

/// Counters summed over evicted sources.
#[derive(Debug, Clone, Default)]
struct RetiredTotals {
    sequence: SequenceStats,
    drops: DropCounters,
    access_units_emitted: u64,
    incomplete_access_units: u64,
    resyncs: u64,
}

impl RetiredTotals {
    fn absorb(&mut self, depacketizer: &H265Depacketizer) {
        self.sequence.merge(&depacketizer.tracker().stats());
        self.drops.merge(depacketizer.drops());
        self.access_units_emitted += depacketizer.access_units_emitted();
        self.incomplete_access_units += depacketizer.incomplete_access_units();
        self.resyncs += depacketizer.resyncs();
    }
}

#[derive(Debug)]
pub struct Receiver<S: AccessUnitSink> {
    config: ReceiverConfig,
    sources: HashMap<u32, Source>,
    /// Faults detected before a packet could be routed to its source.
    header_drops: DropCounters,
    packets_seen: u64,
    retired: RetiredTotals,
    evicted_sources: u64,
    sink: S,
}

impl Receiver<AccessUnitQueue> {
    /// Receiver delivering into a fresh [`AccessUnitQueue`] sized by the
    /// config. The returned handle is the consumer end.
    pub fn with_queue(config: ReceiverConfig) -> (Self, AccessUnitQueue) {
        let queue = AccessUnitQueue::new(config.queue_capacity, config.backpressure);
        (Self::new(config, queue.clone()), queue)
    }
}

impl<S: AccessUnitSink> Receiver<S> {
    pub fn new(config: ReceiverConfig, sink: S) -> Self {
        Self {
            config,
            sources: HashMap::new(),
            header_drops: DropCounters::default(),
            packets_seen: 0,
            retired: RetiredTotals::default(),
            evicted_sources: 0,
            sink,
        }
    }

    /// Process one datagram.
    pub fn on_packet_received(&mut self, datagram: &[u8]) {
        let packet = match RtpPacket::parse(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::trace!(len = datagram.len(), error = %err, "invalid RTP packet");
                self.header_drops.record(&err);
                return;
            }
        };

        self.packets_seen += 1;
        let ssrc = packet.header.ssrc;
        if !self.sources.contains_key(&ssrc) {
            if self.sources.len() >= self.config.max_sources {
                self.evict_least_recent();
            }
            tracing::debug!(
                ssrc = format_args!("{:#010X}", ssrc),
                payload_type = packet.header.payload_type,
                "new RTP source"
            );
        }

        let source = self.sources.entry(ssrc).or_insert_with(|| Source {
            depacketizer: H265Depacketizer::new(ssrc),
            last_seen: 0,
        });
        source.last_seen = self.packets_seen;
        for access_unit in source.depacketizer.process(&packet) {
            self.sink.deliver(access_unit);
        }
    }

    /// Drop the source heard from least recently. Its open access unit is
    /// delivered incomplete and its counters are kept.
    fn evict_least_recent(&mut self) {
        let Some(ssrc) = self
            .sources
            .iter()
            .min_by_key(|(_, source)| source.last_seen)
            .map(|(ssrc, _)| *ssrc)
        else {
            return;
        };
        let Some(mut source) = self.sources.remove(&ssrc) else {
            return;
        };

        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            idle_packets = self.packets_seen - source.last_seen,
            "source limit reached, evicting least recent source"
        );
        if let Some(access_unit) = source.depacketizer.flush() {
            self.sink.deliver(access_unit);
        }
        self.retired.absorb(&source.depacketizer);
        self.evicted_sources += 1;
    }

    /// Deliver every access unit still being accumulated, marked incomplete.
    pub fn flush(&mut self) {
        for source in self.sources.values_mut() {
            if let Some(access_unit) = source.depacketizer.flush() {
                self.sink.deliver(access_unit);
            }
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        let mut totals = self.retired.clone();
        totals.drops.merge(&self.header_drops);
        for source in self.sources.values() {
            totals.absorb(&source.depacketizer);
        }

        ReceiverStats {
            packets_received: totals.sequence.packets_received,
            packets_lost: totals.sequence.packets_lost,
            bytes_received: totals.sequence.bytes_received,
            access_units_emitted: totals.access_units_emitted,
            incomplete_access_units: totals.incomplete_access_units,
            drops: totals.drops,
            resyncs: totals.resyncs,
            evicted_sources: self.evicted_sources,
            active_sources: self.sources.len(),
            sink_dropped: self.sink.dropped(),
        }
    }

    /// Explicit stream restart: forget every source and zero all counters.
    /// The sink is kept.
    pub fn reset(&mut self) {
        tracing::debug!(sources = self.sources.len(), "receiver reset");
        self.sources.clear();
        self.header_drops = DropCounters::default();
        self.packets_seen = 0;
        self.retired = RetiredTotals::default();
        self.evicted_sources = 0;
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::access_unit::AccessUnit;
    use crate::media::rtp::RtpHeader;

    fn datagram(ssrc: u32, seq: u16, ts: u32, marker: bool, payload: &[u8]) -> Vec<u8> {
        let mut d = RtpHeader {
            marker,
            payload_type: 98,
            sequence: seq,
            timestamp: ts,
            ssrc,
        }
        .encode()
        .to_vec();
        d.extend_from_slice(payload);
        d
    }

    fn receiver() -> Receiver<Vec<AccessUnit>> {
        Receiver::new(ReceiverConfig::default(), Vec::new())
    }

    #[test]
    fn delivers_to_sink_and_counts_bytes() {
        let mut r = receiver();
        let d = datagram(1, 0, 0, true, &[0x26, 0x01, 0xAF]);
        r.on_packet_received(&d);

        assert_eq!(r.sink().len(), 1);
        let stats = r.stats();
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.bytes_received, d.len() as u64);
        assert_eq!(stats.access_units_emitted, 1);
        assert_eq!(stats.active_sources, 1);
    }

    #[test]
    fn header_faults_are_counted_not_raised() {
        let mut r = receiver();
        r.on_packet_received(&[0x80, 0x60, 0x00]);
        let mut bad_version = datagram(1, 0, 0, true, &[0x02, 0x01]);
        bad_version[0] = 0x40;
        r.on_packet_received(&bad_version);

        let stats = r.stats();
        assert_eq!(stats.drops.truncated_headers, 1);
        assert_eq!(stats.drops.malformed_headers, 1);
        assert_eq!(stats.packets_received, 0);
        assert!(r.sink().is_empty());
    }

    #[test]
    fn sources_are_tracked_independently() {
        let mut r = receiver();
        r.on_packet_received(&datagram(1, 100, 0, false, &[0x02, 0x01, 0x11]));
        r.on_packet_received(&datagram(2, 7, 9000, true, &[0x02, 0x01, 0x22]));
        r.on_packet_received(&datagram(1, 101, 0, true, &[0x02, 0x01, 0x33]));

        let aus = r.sink();
        assert_eq!(aus.len(), 2);
        assert_eq!(aus[0].ssrc, 2);
        assert_eq!(aus[1].ssrc, 1);
        assert_eq!(aus[1].nal_units().len(), 2);
        assert_eq!(r.stats().packets_lost, 0);
    }

    #[test]
    fn source_limit_evicts_least_recent() {
        let config = ReceiverConfig {
            max_sources: 2,
            ..ReceiverConfig::default()
        };
        let mut r = Receiver::new(config, Vec::<AccessUnit>::new());
        r.on_packet_received(&datagram(1, 0, 0, true, &[0x02, 0x01]));
        // open unit on source 2, flushed when it is evicted
        r.on_packet_received(&datagram(2, 0, 0, false, &[0x02, 0x01]));
        r.on_packet_received(&datagram(1, 1, 3000, true, &[0x02, 0x01]));
        r.on_packet_received(&datagram(3, 0, 0, true, &[0x02, 0x01]));

        let stats = r.stats();
        assert_eq!(stats.evicted_sources, 1);
        assert_eq!(stats.active_sources, 2);
        assert_eq!(stats.packets_received, 4, "evicted source still counted");
        assert_eq!(stats.incomplete_access_units, 1);

        let ssrcs: Vec<u32> = r.into_sink().iter().map(|a| a.ssrc).collect();
        assert_eq!(ssrcs, vec![1, 1, 2, 3]);
    }

    #[test]
    fn live_source_survives_one_shot_ssrcs() {
        let mut r = receiver();
        for ssrc in 0..DEFAULT_MAX_SOURCES as u32 {
            r.on_packet_received(&datagram(0x100 + ssrc, 0, 0, true, &[0x02, 0x01]));
        }
        for k in 0..50u16 {
            r.on_packet_received(&datagram(0xABCD, k, 3000 * k as u32, true, &[0x02, 0x01]));
        }

        let stats = r.stats();
        assert_eq!(stats.evicted_sources, 1);
        assert_eq!(stats.access_units_emitted, DEFAULT_MAX_SOURCES as u64 + 50);
        let live = r.sink().iter().filter(|a| a.ssrc == 0xABCD).count();
        assert_eq!(live, 50);
    }

    #[test]
    fn flush_delivers_incomplete_units() {
        let mut r = receiver();
        r.on_packet_received(&datagram(1, 0, 0, false, &[0x02, 0x01]));
        assert!(r.sink().is_empty());
        r.flush();
        assert_eq!(r.sink().len(), 1);
        assert!(!r.sink()[0].is_complete());
        assert_eq!(r.stats().incomplete_access_units, 1);
    }

    #[test]
    fn queue_sink_reports_drops() {
        let config = ReceiverConfig {
            queue_capacity: 1,
            ..ReceiverConfig::default()
        };
        let (mut r, queue) = Receiver::with_queue(config);
        r.on_packet_received(&datagram(1, 0, 0, true, &[0x02, 0x01]));
        r.on_packet_received(&datagram(1, 1, 3000, true, &[0x02, 0x01]));

        assert_eq!(queue.len(), 1);
        assert_eq!(r.stats().sink_dropped, 1);
        assert_eq!(queue.try_pop().map(|a| a.timestamp), Some(0));
    }

    #[test]
    fn reset_clears_counters_and_sources() {
        let mut r = receiver();
        r.on_packet_received(&datagram(1, 0, 0, true, &[0x02, 0x01]));
        r.on_packet_received(&[0u8; 4]);
        r.reset();

        let stats = r.stats();
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.drops.total(), 0);
        assert_eq!(stats.active_sources, 0);
        assert_eq!(r.sink().len(), 1, "sink contents survive a reset");
    }

    #[test]
    fn loss_rate_over_sources() {
        let mut r = receiver();
        for seq in [0u16, 1, 3] {
            r.on_packet_received(&datagram(1, seq, seq as u32 * 3000, true, &[0x02, 0x01]));
        }
        let stats = r.stats();
        assert_eq!(stats.packets_lost, 1);
        assert_eq!(stats.loss_rate(), 0.25);
    }
}
