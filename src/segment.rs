use std::fmt::{Display, Formatter};
use bytes::{Bytes, BytesMut};
use crate::error::{ArqError, ArqResult};

/// Sequence numbers are assigned contiguously starting at 0 for each message, and they are never
///  reused within a message.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SequenceNumber(u64);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }

    pub fn prev(&self) -> Option<SequenceNumber> {
        self.0.checked_sub(1).map(SequenceNumber)
    }

    /// 'usize' is the natural type for indexing into segment lists
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}


#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Segment {
    pub sequence: SequenceNumber,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(sequence: u64, payload: impl Into<Bytes>) -> Segment {
        Segment {
            sequence: SequenceNumber::from_raw(sequence),
            payload: payload.into(),
        }
    }
}

/// Splits a message into segments of `max_segment_size` bytes each - the last segment may be
///  shorter. The payloads share the message's buffer, nothing is copied.
pub fn segment_message(message: &Bytes, max_segment_size: usize) -> ArqResult<Vec<Segment>> {
    if max_segment_size == 0 {
        return Err(ArqError::InvalidConfiguration("maximum segment size must be positive".to_string()));
    }

    let result = (0..message.len())
        .step_by(max_segment_size)
        .enumerate()
        .map(|(idx, offs)| {
            let end = message.len().min(offs + max_segment_size);
            Segment::new(idx as u64, message.slice(offs..end))
        })
        .collect();
    Ok(result)
}

/// concatenates the payloads in the order they are passed in
pub fn reassemble<'a>(payloads: impl IntoIterator<Item = &'a Bytes>) -> Bytes {
    let mut buf = BytesMut::new();
    for payload in payloads {
        buf.extend_from_slice(payload);
    }
    buf.freeze()
}
