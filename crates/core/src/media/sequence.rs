//! Sequence-number based loss accounting (RFC 3550 §A.1, simplified).
//!
//! Sequence numbers are compared with signed 16-bit wrapping arithmetic,
//! so a stream crossing `65535 -> 0` is not mistaken for loss. A packet
//! behind `expected_next` (late, duplicated or reordered) is counted as
//! received but never moves the expectation backwards or touches the loss
//! counter.

/// Cumulative counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceStats {
    pub packets_received: u64,
    /// Saturating count of sequence numbers skipped over.
    pub packets_lost: u64,
    pub bytes_received: u64,
}

impl SequenceStats {
    /// `packets_lost / (packets_received + packets_lost)`, or 0 before any traffic.
    pub fn loss_rate(&self) -> f64 {
        let total = self.packets_received.saturating_add(self.packets_lost);
        if total == 0 {
            return 0.0;
        }
        self.packets_lost as f64 / total as f64
    }

    pub(crate) fn merge(&mut self, other: &SequenceStats) {
        self.packets_received = self.packets_received.saturating_add(other.packets_received);
        self.packets_lost = self.packets_lost.saturating_add(other.packets_lost);
        self.bytes_received = self.bytes_received.saturating_add(other.bytes_received);
    }
}

/// Result of feeding one sequence number to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceObservation {
    /// Packets skipped between the expected and the observed number.
    pub gap: u32,
    /// The packet was behind `expected_next`.
    pub late: bool,
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected_next: Option<u16>,
    stats: SequenceStats,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, seq: u16) -> SequenceObservation {
        self.stats.packets_received = self.stats.packets_received.saturating_add(1);

        let Some(expected) = self.expected_next else {
            self.expected_next = Some(seq.wrapping_add(1));
            return SequenceObservation {
                gap: 0,
                late: false,
            };
        };

        let diff = seq.wrapping_sub(expected) as i16;
        if diff < 0 {
            tracing::trace!(seq, expected, "late or duplicate packet");
            return SequenceObservation {
                gap: 0,
                late: true,
            };
        }

        let gap = diff as u32;
        if gap > 0 {
            self.stats.packets_lost = self.stats.packets_lost.saturating_add(gap as u64);
            tracing::debug!(seq, expected, gap, "sequence gap");
        }
        self.expected_next = Some(seq.wrapping_add(1));
        SequenceObservation { gap, late: false }
    }

    pub fn record_bytes(&mut self, len: usize) {
        self.stats.bytes_received = self.stats.bytes_received.saturating_add(len as u64);
    }

    /// `None` until the first packet has been observed.
    pub fn expected_next(&self) -> Option<u16> {
        self.expected_next
    }

    pub fn packets_received(&self) -> u64 {
        self.stats.packets_received
    }

    pub fn packets_lost(&self) -> u64 {
        self.stats.packets_lost
    }

    pub fn bytes_received(&self) -> u64 {
        self.stats.bytes_received
    }

    pub fn loss_rate(&self) -> f64 {
        self.stats.loss_rate()
    }

    pub fn stats(&self) -> SequenceStats {
        self.stats
    }

    /// Explicit stream restart: forget the expectation and all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
