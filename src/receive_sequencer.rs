use std::collections::{BTreeMap, BTreeSet};
use bytes::Bytes;
use tracing::{debug, trace};
use crate::frame::Ack;
use crate::segment::{reassemble, Segment, SequenceNumber};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Arrival {
    /// the segment is the one the receiver was waiting for
    InOrder,
    /// the segment is ahead of a gap - it is buffered until the gap is closed
    OutOfOrder,
    /// the segment was already delivered; this is a retransmission
    Duplicate,
}

/// Receiver state for a single connection: tracks which segments arrived, buffers them for
///  reassembly, and decides what each arrival is acknowledged with.
///
/// An instance must not be shared between connections - create one per connection.
///
/// The acknowledgement is always the highest contiguous sequence number received so far. For a
///  segment that arrives ahead of a gap, this repeats the previous acknowledgement and is the only
///  signal the sender gets about the gap; the sender repairs it by its timeout-driven resend of
///  the whole window.
#[derive(Debug, Default)]
pub struct ReceiveSequencer {
    /// the first sequence number that is not received yet
    next_expected: SequenceNumber,
    received: BTreeSet<SequenceNumber>,
    reassembly_buffer: BTreeMap<SequenceNumber, Bytes>,
}

impl ReceiveSequencer {
    pub fn new() -> ReceiveSequencer {
        ReceiveSequencer::default()
    }

    pub fn next_expected(&self) -> SequenceNumber {
        self.next_expected
    }

    /// `None` if segment 0 was not received yet
    pub fn last_contiguous(&self) -> Option<SequenceNumber> {
        self.next_expected.prev()
    }

    /// number of buffered segments that can not be delivered because of a gap before them
    pub fn out_of_order_pending(&self) -> usize {
        self.received.range(self.next_expected..).count()
    }

    /// Returns the classification of the arrival and the acknowledgement to send for it
    pub fn on_segment(&mut self, segment: Segment) -> (Arrival, Ack) {
        let sequence = segment.sequence;
        let prev_next_expected = self.next_expected;

        let is_new = self.received.insert(sequence);
        if is_new {
            self.reassembly_buffer.insert(sequence, segment.payload);
        }

        while self.received.contains(&self.next_expected) {
            self.next_expected = self.next_expected.next();
        }

        let arrival = if sequence == prev_next_expected {
            if self.next_expected > sequence.next() {
                debug!("segment #{} closes a gap - contiguous up to #{} now", sequence, self.next_expected.to_raw() - 1);
            }
            Arrival::InOrder
        }
        else if sequence > prev_next_expected {
            debug!("segment #{} arrived ahead of missing segment #{}", sequence, prev_next_expected);
            Arrival::OutOfOrder
        }
        else {
            trace!("segment #{} was received before", sequence);
            Arrival::Duplicate
        };

        (arrival, Ack::new(self.last_contiguous()))
    }

    /// the message as far as it is contiguously received
    pub fn reassembled(&self) -> Bytes {
        reassemble(self.reassembly_buffer.range(..self.next_expected).map(|(_, payload)| payload))
    }
}
