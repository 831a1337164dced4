use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, info, instrument, trace, warn};
use crate::config::ArqConfig;
use crate::error::ArqResult;
use crate::frame::{max_frame_len, Frame};
use crate::framed_transport::{FramedTransport, FramesOutcome};
use crate::receive_sequencer::ReceiveSequencer;
use crate::transport::Transport;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReceiveReport {
    /// the contiguously received prefix of the message
    pub message: Bytes,
    pub segments_delivered: u64,
    /// segments that arrived after a gap that was never closed
    pub out_of_order_pending: usize,
    /// the peer ended the session with `q` instead of just closing the connection
    pub disconnected: bool,
}

/// Processes one connection end to end: every segment is acknowledged as it arrives, and the
///  session ends when the peer closes the connection or sends `q`.
///
/// The receiver's state outlives [Receiver::run], so the acknowledged prefix is still available
///  through [Receiver::report] if the connection fails.
pub struct Receiver<T: Transport> {
    config: Arc<ArqConfig>,
    transport: FramedTransport<T>,
    sequencer: ReceiveSequencer,
    disconnected: bool,
}

impl <T: Transport> Receiver<T> {
    pub fn new(config: Arc<ArqConfig>, mut transport: FramedTransport<T>) -> Receiver<T> {
        transport.set_max_frame_len(max_frame_len(config.max_segment_size));
        Receiver {
            config,
            transport,
            sequencer: ReceiveSequencer::new(),
            disconnected: false,
        }
    }

    /// The transport is closed when this returns, regardless of the outcome.
    #[instrument(skip_all)]
    pub async fn run(&mut self) -> ArqResult<ReceiveReport> {
        let result = self.receive_segments().await;
        self.transport.close().await;

        if let Err(e) = result {
            warn!("connection failed after {} segment(s): {}", self.sequencer.next_expected(), e);
            return Err(e);
        }

        let report = self.report();
        if report.out_of_order_pending > 0 {
            warn!("session ended mid-transfer: segment #{} is missing, {} later segment(s) can not be delivered", self.sequencer.next_expected(), report.out_of_order_pending);
        }
        else {
            info!("session ended after {} segment(s)", report.segments_delivered);
        }
        Ok(report)
    }

    /// the state of the session so far
    pub fn report(&self) -> ReceiveReport {
        ReceiveReport {
            message: self.sequencer.reassembled(),
            segments_delivered: self.sequencer.next_expected().to_raw(),
            out_of_order_pending: self.sequencer.out_of_order_pending(),
            disconnected: self.disconnected,
        }
    }

    async fn receive_segments(&mut self) -> ArqResult<()> {
        loop {
            match self.transport.receive_frames(self.config.timeout).await? {
                FramesOutcome::Frames(frames) => {
                    for frame in frames {
                        self.on_frame(frame).await?;
                        if self.disconnected {
                            return Ok(());
                        }
                    }
                }
                FramesOutcome::Timeout => {
                    trace!("no segments for {:?} - still waiting", self.config.timeout);
                }
                FramesOutcome::Closed => {
                    debug!("peer closed the connection");
                    return Ok(());
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Bytes) -> ArqResult<()> {
        if matches!(Frame::parse_control(&frame), Ok(Frame::Disconnect)) {
            info!("peer sent disconnect - ending the session");
            self.disconnected = true;
            return Ok(());
        }

        let segment = match Frame::parse_segment(&frame) {
            Ok(segment) => segment,
            Err(e) => {
                warn!("dropping frame without a valid sequence number, not acknowledging it: {}", e);
                return Ok(());
            }
        };

        let sequence = segment.sequence;
        let (arrival, ack) = self.sequencer.on_segment(segment);
        let ack_frame = Frame::Ack(ack);
        debug!("received segment #{} ({:?}) - sending {}", sequence, arrival, ack_frame);

        self.transport.send_frame(&ack_frame).await?;
        Ok(())
    }
}
