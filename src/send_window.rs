use std::collections::VecDeque;
use tracing::{debug, trace, warn};
use crate::frame::Ack;
use crate::segment::SequenceNumber;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SenderState {
    Sending,
    WaitingForAck,
    Retransmitting,
    Done,
    Aborted,
}

#[derive(Debug, Eq, PartialEq)]
pub enum TimeoutAction {
    /// resend these segments, unchanged and in this order
    Retransmit(Vec<SequenceNumber>),
    Abort,
}

/// The sender's sliding window, without any I/O: the caller transmits what [SendWindow::fill] and
///  [SendWindow::on_timeout] tell it to, and feeds acknowledgements and timeouts back in.
///
/// Sequence number layout:
///
/// ```ascii
///   highest_acknowledged       next_to_send
///            |                      |
///  ----------+----------------------+------------------> seq
///   confirmed | <-- window (in flight) --> | not sent yet
/// ```
///
/// Acknowledgements are cumulative in intent: an ack for `n` confirms everything up to and
///  including `n`. Only acks beyond `highest_acknowledged` change anything, so a lost ack is
///  covered by any later, higher one.
///
/// NB: The receiver reports gaps only implicitly by repeating its last contiguous sequence
///      number. There is no selective repair - the whole window is resent on timeout.
#[derive(Debug)]
pub struct SendWindow {
    window_size: usize,
    max_timeouts: u32,
    total_segments: u64,

    next_to_send: SequenceNumber,
    highest_acknowledged: Option<SequenceNumber>,
    /// in-flight sequence numbers in ascending order
    window: VecDeque<SequenceNumber>,
    /// consecutive timeouts since the last acknowledgement progress
    timeout_count: u32,
    state: SenderState,
}

impl SendWindow {
    pub fn new(window_size: usize, max_timeouts: u32, total_segments: usize) -> SendWindow {
        SendWindow {
            window_size,
            max_timeouts,
            total_segments: total_segments as u64,
            next_to_send: SequenceNumber::ZERO,
            highest_acknowledged: None,
            window: VecDeque::with_capacity(window_size),
            timeout_count: 0,
            state: SenderState::Sending,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn highest_acknowledged(&self) -> Option<SequenceNumber> {
        self.highest_acknowledged
    }

    pub fn next_to_send(&self) -> SequenceNumber {
        self.next_to_send
    }

    pub fn in_flight(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.window.iter().cloned()
    }

    pub fn in_flight_len(&self) -> usize {
        self.window.len()
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    /// all segments are acknowledged; trivially true for an empty message
    pub fn is_done(&self) -> bool {
        match SequenceNumber::from_raw(self.total_segments).prev() {
            None => true,
            Some(last) => self.highest_acknowledged == Some(last),
        }
    }

    /// Admits new segments while the window has room, returning the sequence numbers that are
    ///  to be transmitted now (in that order).
    pub fn fill(&mut self) -> Vec<SequenceNumber> {
        if matches!(self.state, SenderState::Done | SenderState::Aborted) {
            return Vec::new();
        }
        self.state = SenderState::Sending;

        let mut result = Vec::new();
        while self.window.len() < self.window_size && self.next_to_send.to_raw() < self.total_segments {
            trace!("admitting segment #{} to the send window", self.next_to_send);
            self.window.push_back(self.next_to_send);
            result.push(self.next_to_send);
            self.next_to_send = self.next_to_send.next();
        }

        self.state = if self.is_done() {
            SenderState::Done
        }
        else {
            SenderState::WaitingForAck
        };
        result
    }

    /// returns `true` if the acknowledgement advanced the window
    pub fn on_ack(&mut self, ack: Ack) -> bool {
        let Some(ack_sequence) = ack.sequence else {
            trace!("received ack that confirms nothing - ignoring");
            return false;
        };

        if ack_sequence >= self.next_to_send {
            warn!("received ack for segment #{} which was not sent yet - ignoring", ack_sequence);
            return false;
        }

        if Some(ack_sequence) <= self.highest_acknowledged {
            trace!("received stale or duplicate ack for segment #{} - ignoring", ack_sequence);
            return false;
        }

        debug!("segments up to #{} are acknowledged", ack_sequence);
        self.highest_acknowledged = Some(ack_sequence);
        while self.window.front().is_some_and(|&s| s <= ack_sequence) {
            self.window.pop_front();
        }
        self.timeout_count = 0;

        if self.is_done() {
            self.state = SenderState::Done;
        }
        true
    }

    pub fn on_timeout(&mut self) -> TimeoutAction {
        self.timeout_count += 1;

        if self.timeout_count > self.max_timeouts {
            warn!("{} consecutive timeouts without progress - giving up", self.timeout_count);
            self.state = SenderState::Aborted;
            return TimeoutAction::Abort;
        }

        debug!("timeout #{} - resending {} segment(s) in the window", self.timeout_count, self.window.len());
        self.state = SenderState::Retransmitting;
        TimeoutAction::Retransmit(self.window.iter().cloned().collect())
    }
}
