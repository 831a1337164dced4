//! Frames are line-oriented UTF-8 text, each terminated by a single newline:
//!
//! ```ascii
//! segment:          M<seq>: <payload>
//! acknowledgement:   ACK: Message received: M<seq>     (note the leading space)
//! size request:     MAX_MESSAGE_SIZE
//! size response:    <decimal maximum segment size>
//! disconnect:       q
//! ```
//!
//! An acknowledgement that confirms nothing (segment 0 was not received yet) carries `M-1`.
//!
//! The transport is a byte stream, so a single read can contain several frames and end with a
//!  partial one. [FrameBuffer] keeps the unterminated remainder until the next read completes it.
//!
//! Payloads must not contain the terminator - there is no escaping.

use std::fmt::{Debug, Display, Formatter};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;
use crate::error::{ArqError, ArqResult};
use crate::segment::{Segment, SequenceNumber};

pub const TERMINATOR: u8 = b'\n';

const ACK_PREFIX: &[u8] = b"ACK:";
const ACK_TEXT: &[u8] = b"Message received:";
const MAX_SIZE_REQUEST: &[u8] = b"MAX_MESSAGE_SIZE";
const DISCONNECT: &[u8] = b"q";

/// Upper bound for everything in a frame except the segment payload: the longest acknowledgement,
///  or a segment header with a 20 digit sequence number
pub const MAX_FRAME_OVERHEAD: usize = 64;

/// This is the frame length limit until a maximum segment size is known, e.g. during the
///  handshake
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

pub fn max_frame_len(max_segment_size: usize) -> usize {
    max_segment_size.saturating_add(MAX_FRAME_OVERHEAD)
}


/// Confirms delivery of everything up to and including `sequence`, i.e. the highest contiguous
///  sequence number the receiver has. `None` means that not even segment 0 is confirmed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Ack {
    pub sequence: Option<SequenceNumber>,
}

impl Ack {
    pub fn new(sequence: Option<SequenceNumber>) -> Ack {
        Ack { sequence }
    }
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Frame {
    Segment(Segment),
    Ack(Ack),
    MaxSizeRequest,
    MaxSize(usize),
    Disconnect,
}

impl Frame {
    /// writes the frame including its terminator
    pub fn ser(&self, buf: &mut BytesMut) {
        match self {
            Frame::Segment(segment) => {
                if segment.payload.contains(&TERMINATOR) {
                    warn!("payload of segment #{} contains the frame terminator - the peer will not be able to parse it", segment.sequence);
                }
                buf.put_slice(format!("M{}: ", segment.sequence).as_bytes());
                buf.put_slice(&segment.payload);
            }
            Frame::Ack(ack) => {
                buf.put_slice(format!(" ACK: Message received: {}", SequenceMarker(ack.sequence)).as_bytes());
            }
            Frame::MaxSizeRequest => buf.put_slice(MAX_SIZE_REQUEST),
            Frame::MaxSize(size) => buf.put_slice(size.to_string().as_bytes()),
            Frame::Disconnect => buf.put_slice(DISCONNECT),
        }
        buf.put_u8(TERMINATOR);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    /// `M<seq>: <payload>` - the single space after the colon is optional
    pub fn parse_segment(frame: &Bytes) -> ArqResult<Segment> {
        let mut parser = FrameParser::new(frame);
        let sequence = match parser.sequence_marker()? {
            Some(sequence) => sequence,
            None => return Err(parser.malformed("negative sequence number in segment")),
        };
        parser.literal(b":")?;
        parser.optional(b" ");

        Ok(Segment {
            sequence,
            payload: frame.slice(parser.pos..),
        })
    }

    /// ` ACK: Message received: M<seq>` - leading and trailing whitespace is tolerated
    pub fn parse_ack(frame: &[u8]) -> ArqResult<Ack> {
        let mut parser = FrameParser::new(frame);
        parser.skip_whitespace();
        parser.literal(ACK_PREFIX)?;
        parser.skip_whitespace();
        parser.literal(ACK_TEXT)?;
        parser.skip_whitespace();
        let sequence = parser.sequence_marker()?;
        parser.end()?;
        Ok(Ack { sequence })
    }

    /// Control frames are exchanged before the segmented transfer starts.
    pub fn parse_control(frame: &[u8]) -> ArqResult<Frame> {
        let trimmed = frame.trim_ascii();
        if trimmed == MAX_SIZE_REQUEST {
            return Ok(Frame::MaxSizeRequest);
        }
        if trimmed == DISCONNECT {
            return Ok(Frame::Disconnect);
        }

        let mut parser = FrameParser::new(trimmed);
        let size = parser.number()?;
        parser.end()?;
        usize::try_from(size)
            .map(Frame::MaxSize)
            .map_err(|_| parser.malformed("maximum segment size out of range"))
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Segment(segment) => write!(f, "M{}: {}", segment.sequence, String::from_utf8_lossy(&segment.payload)),
            Frame::Ack(ack) => write!(f, "ACK: {}", SequenceMarker(ack.sequence)),
            Frame::MaxSizeRequest => write!(f, "MAX_MESSAGE_SIZE"),
            Frame::MaxSize(size) => write!(f, "{}", size),
            Frame::Disconnect => write!(f, "q"),
        }
    }
}

struct SequenceMarker(Option<SequenceNumber>);
impl Display for SequenceMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(sequence) => write!(f, "M{}", sequence),
            None => write!(f, "M-1"),
        }
    }
}


/// a cursor over a single frame (without its terminator)
struct FrameParser<'a> {
    frame: &'a [u8],
    pos: usize,
}
impl <'a> FrameParser<'a> {
    fn new(frame: &'a [u8]) -> FrameParser<'a> {
        FrameParser { frame, pos: 0 }
    }

    fn malformed(&self, reason: &str) -> ArqError {
        ArqError::MalformedFrame(format!("{} at offset {} in {:?}", reason, self.pos, String::from_utf8_lossy(self.frame)))
    }

    fn remaining(&self) -> &'a [u8] {
        &self.frame[self.pos..]
    }

    fn literal(&mut self, expected: &[u8]) -> ArqResult<()> {
        if !self.remaining().starts_with(expected) {
            return Err(self.malformed(&format!("expected {:?}", String::from_utf8_lossy(expected))));
        }
        self.pos += expected.len();
        Ok(())
    }

    fn optional(&mut self, expected: &[u8]) {
        if self.remaining().starts_with(expected) {
            self.pos += expected.len();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.remaining().first().is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn number(&mut self) -> ArqResult<u64> {
        let num_digits = self.remaining().iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if num_digits == 0 {
            return Err(self.malformed("expected a decimal number"));
        }

        let mut result: u64 = 0;
        for &digit in &self.remaining()[..num_digits] {
            result = result.checked_mul(10)
                .and_then(|n| n.checked_add((digit - b'0') as u64))
                .ok_or_else(|| self.malformed("number out of range"))?;
        }
        self.pos += num_digits;
        Ok(result)
    }

    /// `M<digits>` or `M-1`
    fn sequence_marker(&mut self) -> ArqResult<Option<SequenceNumber>> {
        self.literal(b"M")?;
        if self.remaining().starts_with(b"-1") {
            self.pos += 2;
            return Ok(None);
        }
        Ok(Some(SequenceNumber::from_raw(self.number()?)))
    }

    fn end(&mut self) -> ArqResult<()> {
        self.skip_whitespace();
        if self.pos != self.frame.len() {
            return Err(self.malformed("unexpected trailing data"));
        }
        Ok(())
    }
}


/// Accumulates raw reads and splits them into frames. The terminator is not part of the frames
///  that are returned.
///
/// The unterminated remainder is bounded by `max_frame_len`: if it grows beyond that, it is
///  discarded along with everything up to the next terminator, and parsing resumes after it.
pub struct FrameBuffer {
    pending: BytesMut,
    max_frame_len: usize,
    /// an oversized frame was dropped, its tail is skipped until the next terminator
    is_discarding: bool,
}

impl Debug for FrameBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrameBuffer{{pending:{}, max_frame_len:{}, is_discarding:{}}}", self.pending.len(), self.max_frame_len, self.is_discarding)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        FrameBuffer::new()
    }
}

impl FrameBuffer {
    pub fn new() -> FrameBuffer {
        FrameBuffer::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> FrameBuffer {
        FrameBuffer {
            pending: BytesMut::new(),
            max_frame_len,
            is_discarding: false,
        }
    }

    pub fn set_max_frame_len(&mut self, max_frame_len: usize) {
        self.max_frame_len = max_frame_len;
    }

    /// Fails with `MalformedFrame` if this read makes the unterminated remainder exceed the frame
    ///  length limit. The buffer stays usable: complete frames are kept, the oversized one is
    ///  dropped.
    pub fn extend(&mut self, data: &[u8]) -> ArqResult<()> {
        let mut data = data;
        if self.is_discarding {
            match data.iter().position(|&b| b == TERMINATOR) {
                None => return Ok(()),
                Some(end) => {
                    self.is_discarding = false;
                    data = &data[end+1..];
                }
            }
        }

        self.pending.extend_from_slice(data);

        let complete_len = self.pending.iter().rposition(|&b| b == TERMINATOR)
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let unterminated_len = self.pending.len() - complete_len;
        if unterminated_len > self.max_frame_len {
            self.pending.truncate(complete_len);
            self.is_discarding = true;
            return Err(ArqError::MalformedFrame(format!("unterminated frame exceeds the maximum frame length of {} bytes - discarding it", self.max_frame_len)));
        }
        Ok(())
    }

    pub fn has_complete_frame(&self) -> bool {
        self.pending.contains(&TERMINATOR)
    }

    /// number of buffered bytes that do not form a complete frame yet
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_frame(&mut self) -> Option<Bytes> {
        let end = self.pending.iter().position(|&b| b == TERMINATOR)?;
        let mut frame = self.pending.split_to(end + 1);
        frame.truncate(end);
        Some(frame.freeze())
    }

    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        let mut result = Vec::new();
        while let Some(frame) = self.next_frame() {
            result.push(frame);
        }
        result
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::segment(Frame::Segment(Segment::new(0, &b"HELL"[..])), b"M0: HELL\n")]
    #[case::segment_with_spaces(Frame::Segment(Segment::new(12, &b" a b "[..])), b"M12:  a b \n")]
    #[case::ack(Frame::Ack(Ack::new(Some(SequenceNumber::from_raw(7)))), b" ACK: Message received: M7\n")]
    #[case::ack_nothing(Frame::Ack(Ack::new(None)), b" ACK: Message received: M-1\n")]
    #[case::max_size_request(Frame::MaxSizeRequest, b"MAX_MESSAGE_SIZE\n")]
    #[case::max_size(Frame::MaxSize(20), b"20\n")]
    #[case::disconnect(Frame::Disconnect, b"q\n")]
    fn test_ser(#[case] frame: Frame, #[case] expected: &[u8]) {
        assert_eq!(frame.to_bytes().as_ref(), expected);
    }

    #[rstest]
    #[case::regular("M0: HELL", 0, "HELL")]
    #[case::big_sequence("M123456: x", 123456, "x")]
    #[case::no_space("M3:abc", 3, "abc")]
    #[case::leading_spaces_in_payload("M3:   abc", 3, "  abc")]
    #[case::colon_in_payload("M4: a: b", 4, "a: b")]
    #[case::empty_payload("M5: ", 5, "")]
    fn test_parse_segment(#[case] frame: &'static str, #[case] expected_sequence: u64, #[case] expected_payload: &str) {
        let segment = Frame::parse_segment(&Bytes::from_static(frame.as_bytes())).unwrap();
        assert_eq!(segment.sequence, SequenceNumber::from_raw(expected_sequence));
        assert_eq!(segment.payload.as_ref(), expected_payload.as_bytes());
    }

    #[rstest]
    #[case::empty("")]
    #[case::no_marker("hello world")]
    #[case::no_digits("M: abc")]
    #[case::no_colon("M3 abc")]
    #[case::negative("M-1: abc")]
    #[case::overflow("M99999999999999999999999: abc")]
    #[case::ack(" ACK: Message received: M3")]
    fn test_parse_segment_malformed(#[case] frame: &'static str) {
        assert!(matches!(
            Frame::parse_segment(&Bytes::from_static(frame.as_bytes())),
            Err(ArqError::MalformedFrame(_))
        ));
    }

    #[rstest]
    #[case::regular(" ACK: Message received: M3", Some(3))]
    #[case::no_leading_space("ACK: Message received: M0", Some(0))]
    #[case::trailing_cr(" ACK: Message received: M12\r", Some(12))]
    #[case::nothing_confirmed(" ACK: Message received: M-1", None)]
    fn test_parse_ack(#[case] frame: &str, #[case] expected: Option<u64>) {
        let ack = Frame::parse_ack(frame.as_bytes()).unwrap();
        assert_eq!(ack.sequence, expected.map(SequenceNumber::from_raw));
    }

    #[rstest]
    #[case::empty("")]
    #[case::segment("M3: abc")]
    #[case::missing_marker(" ACK: Message received: ")]
    #[case::missing_text(" ACK: M3")]
    #[case::trailing_garbage(" ACK: Message received: M3 and more")]
    fn test_parse_ack_malformed(#[case] frame: &str) {
        assert!(matches!(Frame::parse_ack(frame.as_bytes()), Err(ArqError::MalformedFrame(_))));
    }

    #[rstest]
    #[case::request("MAX_MESSAGE_SIZE", Frame::MaxSizeRequest)]
    #[case::disconnect("q", Frame::Disconnect)]
    #[case::size("20", Frame::MaxSize(20))]
    #[case::size_with_whitespace(" 1024\r", Frame::MaxSize(1024))]
    fn test_parse_control(#[case] frame: &str, #[case] expected: Frame) {
        assert_eq!(Frame::parse_control(frame.as_bytes()).unwrap(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::text("hello")]
    #[case::negative("-3")]
    #[case::trailing("12 bytes")]
    fn test_parse_control_malformed(#[case] frame: &str) {
        assert!(matches!(Frame::parse_control(frame.as_bytes()), Err(ArqError::MalformedFrame(_))));
    }

    #[rstest]
    #[case::single(vec!["M0: a\n"], vec!["M0: a"], 0)]
    #[case::concatenated(vec!["M0: a\nM1: b\nM2: c\n"], vec!["M0: a", "M1: b", "M2: c"], 0)]
    #[case::trailing_partial(vec!["M0: a\nM1: b"], vec!["M0: a"], 5)]
    #[case::completed_by_next_read(vec!["M0: a\nM1: ", "b\nM2"], vec!["M0: a", "M1: b"], 2)]
    #[case::split_terminator(vec!["M0: a", "\n"], vec!["M0: a"], 0)]
    #[case::empty_frame(vec!["\n"], vec![""], 0)]
    #[case::no_frame(vec!["M0: abc"], vec![], 7)]
    fn test_frame_buffer(#[case] reads: Vec<&str>, #[case] expected: Vec<&str>, #[case] expected_pending: usize) {
        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for read in reads {
            buffer.extend(read.as_bytes()).unwrap();
            frames.extend(buffer.drain_frames());
        }

        let frames = frames.iter()
            .map(|f| String::from_utf8(f.to_vec()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(frames, expected);
        assert_eq!(buffer.pending_len(), expected_pending);
        assert!(!buffer.has_complete_frame());
    }

    #[test]
    fn test_frame_buffer_caps_unterminated_frame() {
        let mut buffer = FrameBuffer::with_max_frame_len(8);

        buffer.extend(b"M0: a\nM1: bc").unwrap();
        assert!(matches!(buffer.extend(b"defghijk"), Err(ArqError::MalformedFrame(_))));
        // complete frames survive, the oversized remainder does not
        assert_eq!(buffer.pending_len(), 6);

        // the tail of the oversized frame is skipped up to its terminator
        buffer.extend(&[b'x'; 100]).unwrap();
        buffer.extend(b"xyz\nM2: ").unwrap();
        buffer.extend(b"d\n").unwrap();
        assert_eq!(buffer.drain_frames(), vec![Bytes::from_static(b"M0: a"), Bytes::from_static(b"M2: d")]);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[rstest]
    #[case::exactly_at_limit(b"12345678", true)]
    #[case::above_limit(b"123456789", false)]
    #[case::long_but_terminated(b"123456789\n", true)]
    fn test_frame_buffer_limit(#[case] data: &[u8], #[case] expected_ok: bool) {
        let mut buffer = FrameBuffer::with_max_frame_len(8);
        assert_eq!(buffer.extend(data).is_ok(), expected_ok);
    }
}
