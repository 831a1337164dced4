use std::time::Duration;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use crate::frame::{Frame, FrameBuffer};
use crate::transport::{ReceiveOutcome, Transport};

#[derive(Debug, Eq, PartialEq)]
pub enum FramesOutcome {
    /// one or more complete frames, in the order they arrived
    Frames(Vec<Bytes>),
    Timeout,
    Closed,
}

/// Frame-level view of a [Transport]: bytes that arrive after the last complete frame of a read
///  are kept and prefixed to the next read.
pub struct FramedTransport<T: Transport> {
    transport: T,
    frame_buffer: FrameBuffer,
}

impl <T: Transport> FramedTransport<T> {
    pub fn new(transport: T) -> FramedTransport<T> {
        FramedTransport {
            transport,
            frame_buffer: FrameBuffer::new(),
        }
    }

    /// Limits the unterminated part of the receive buffer. Longer frames are dropped.
    pub fn set_max_frame_len(&mut self, max_frame_len: usize) {
        self.frame_buffer.set_max_frame_len(max_frame_len);
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> anyhow::Result<()> {
        let mut buf = BytesMut::new();
        frame.ser(&mut buf);
        self.transport.send(&buf).await
    }

    /// Returns all complete frames that are available, reading from the transport only if there
    ///  is no complete frame buffered. A read that does not complete a frame does not end the
    ///  wait: the deadline applies to the call as a whole.
    pub async fn receive_frames(&mut self, timeout: Duration) -> anyhow::Result<FramesOutcome> {
        if let Some(outcome) = self.await_complete_frame(timeout).await? {
            return Ok(outcome);
        }
        Ok(FramesOutcome::Frames(self.frame_buffer.drain_frames()))
    }

    /// Like [FramedTransport::receive_frames], but returns at most one frame and leaves the rest
    ///  buffered. This is for control frames that change how subsequent frames are interpreted.
    pub async fn receive_frame(&mut self, timeout: Duration) -> anyhow::Result<FramesOutcome> {
        if let Some(outcome) = self.await_complete_frame(timeout).await? {
            return Ok(outcome);
        }
        Ok(FramesOutcome::Frames(self.frame_buffer.next_frame().into_iter().collect()))
    }

    /// returns `None` if there is a complete frame in the buffer
    async fn await_complete_frame(&mut self, timeout: Duration) -> anyhow::Result<Option<FramesOutcome>> {
        let deadline = Instant::now() + timeout;

        while !self.frame_buffer.has_complete_frame() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Some(FramesOutcome::Timeout));
            }

            match self.transport.receive(remaining).await? {
                ReceiveOutcome::Data(data) => {
                    trace!("received {:?}", String::from_utf8_lossy(&data));
                    if let Err(e) = self.frame_buffer.extend(&data) {
                        warn!("{}", e);
                    }
                }
                ReceiveOutcome::Timeout => return Ok(Some(FramesOutcome::Timeout)),
                ReceiveOutcome::Closed => {
                    if self.frame_buffer.pending_len() > 0 {
                        debug!("peer closed the connection with {} bytes of an incomplete frame pending - discarding", self.frame_buffer.pending_len());
                    }
                    return Ok(Some(FramesOutcome::Closed));
                }
            }
        }
        Ok(None)
    }

    pub async fn close(&mut self) {
        self.transport.close().await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::Segment;
    use crate::transport::MockTransport;
    use mockall::Sequence;
    use tokio::time;

    fn frames(frames: &[&'static str]) -> FramesOutcome {
        FramesOutcome::Frames(frames.iter().map(|f| Bytes::from_static(f.as_bytes())).collect())
    }

    fn mock_reads(reads: Vec<ReceiveOutcome>) -> MockTransport {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        for read in reads {
            transport.expect_receive()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(read.clone()));
        }
        transport
    }

    #[tokio::test]
    async fn test_send_frame() {
        let mut transport = MockTransport::new();
        transport.expect_send()
            .once()
            .withf(|buf| buf == b"M3: abc\n")
            .returning(|_| Ok(()));

        let mut framed = FramedTransport::new(transport);
        framed.send_frame(&Frame::Segment(Segment::new(3, &b"abc"[..]))).await.unwrap();
    }

    #[tokio::test]
    async fn test_concatenated_frames_in_one_read() {
        let mut framed = FramedTransport::new(mock_reads(vec![
            ReceiveOutcome::Data(Bytes::from_static(b"a\nb\nc")),
            ReceiveOutcome::Data(Bytes::from_static(b"d\n")),
        ]));

        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["a", "b"]));
        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["cd"]));
    }

    #[tokio::test]
    async fn test_partial_read_keeps_waiting() {
        let mut framed = FramedTransport::new(mock_reads(vec![
            ReceiveOutcome::Data(Bytes::from_static(b"M0: ab")),
            ReceiveOutcome::Data(Bytes::from_static(b"c\nM1")),
        ]));

        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["M0: abc"]));
    }

    #[tokio::test]
    async fn test_buffered_frames_need_no_read() {
        let mut framed = FramedTransport::new(MockTransport::new());
        framed.frame_buffer.extend(b"x\ny\n").unwrap();

        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["x", "y"]));
    }

    #[tokio::test]
    async fn test_receive_single_frame() {
        let mut framed = FramedTransport::new(mock_reads(vec![
            ReceiveOutcome::Data(Bytes::from_static(b"20\nM0: a\n")),
        ]));

        assert_eq!(framed.receive_frame(Duration::from_secs(1)).await.unwrap(), frames(&["20"]));
        assert_eq!(framed.receive_frame(Duration::from_secs(1)).await.unwrap(), frames(&["M0: a"]));
    }

    #[tokio::test]
    async fn test_timeout_and_closed() {
        let mut framed = FramedTransport::new(mock_reads(vec![
            ReceiveOutcome::Timeout,
            ReceiveOutcome::Data(Bytes::from_static(b"incomplete")),
            ReceiveOutcome::Closed,
        ]));

        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), FramesOutcome::Timeout);
        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), FramesOutcome::Closed);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_dropped() {
        let mut reads = vec![ReceiveOutcome::Data(Bytes::from_static(b"M0: a\nM1: "))];
        for _ in 0..10 {
            reads.push(ReceiveOutcome::Data(Bytes::from_static(&[b'x'; 1024])));
        }
        reads.push(ReceiveOutcome::Data(Bytes::from_static(b"x\nM2: b\n")));

        let mut framed = FramedTransport::new(mock_reads(reads));
        framed.set_max_frame_len(100);

        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["M0: a"]));
        assert_eq!(framed.receive_frames(Duration::from_secs(1)).await.unwrap(), frames(&["M2: b"]));
        assert_eq!(framed.frame_buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_deadline_covers_partial_reads() {
        time::pause();

        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|timeout| *timeout == Duration::from_secs(2))
            .returning(|_| Ok(ReceiveOutcome::Data(Bytes::from_static(b"partial"))));
        transport.expect_receive()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|timeout| *timeout <= Duration::from_secs(2))
            .returning(|_| Ok(ReceiveOutcome::Timeout));

        let mut framed = FramedTransport::new(transport);
        assert_eq!(framed.receive_frames(Duration::from_secs(2)).await.unwrap(), FramesOutcome::Timeout);
        assert_eq!(framed.frame_buffer.pending_len(), 7);
    }
}
