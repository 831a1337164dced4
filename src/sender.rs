use std::sync::Arc;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};
use crate::config::ArqConfig;
use crate::error::{ArqError, ArqResult};
use crate::frame::{max_frame_len, Frame};
use crate::framed_transport::{FramedTransport, FramesOutcome};
use crate::segment::{segment_message, Segment};
use crate::send_window::{SendWindow, TimeoutAction};
use crate::transport::Transport;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SendReport {
    pub segments: usize,
    /// every segment frame written to the transport, retransmissions included
    pub transmissions: usize,
    pub retransmissions: usize,
}

/// Drives a [SendWindow] over a transport until the message is fully acknowledged, or until the
///  sender gives up.
///
/// Completion is inferred from acknowledgements alone: there is no 'done' frame.
pub struct Sender<T: Transport> {
    config: Arc<ArqConfig>,
    transport: FramedTransport<T>,
}

impl <T: Transport> Sender<T> {
    pub fn new(config: Arc<ArqConfig>, mut transport: FramedTransport<T>) -> Sender<T> {
        transport.set_max_frame_len(max_frame_len(config.max_segment_size));
        Sender {
            config,
            transport,
        }
    }

    pub fn into_transport(self) -> FramedTransport<T> {
        self.transport
    }

    /// NB: If the retransmission limit is exceeded, the transport is closed before the error is
    ///      returned
    #[instrument(skip_all, fields(message_len = message.len()))]
    pub async fn send_message(&mut self, message: &[u8]) -> ArqResult<SendReport> {
        self.config.validate()?;

        let segments = segment_message(&Bytes::copy_from_slice(message), self.config.max_segment_size)?;
        let mut window = SendWindow::new(self.config.window_size, self.config.max_timeouts, segments.len());
        let mut report = SendReport {
            segments: segments.len(),
            ..Default::default()
        };

        debug!("sending message as {} segment(s) with window size {}", segments.len(), self.config.window_size);

        loop {
            for sequence in window.fill() {
                self.transmit(&segments[sequence.as_index()]).await?;
                report.transmissions += 1;
            }

            if window.is_done() {
                info!("all {} segment(s) sent and acknowledged", segments.len());
                return Ok(report);
            }

            match self.transport.receive_frames(self.config.timeout).await? {
                FramesOutcome::Frames(frames) => {
                    for frame in frames {
                        match Frame::parse_ack(&frame) {
                            Ok(ack) => {
                                debug!("received {}", Frame::Ack(ack));
                                window.on_ack(ack);
                            }
                            Err(e) => {
                                warn!("dropping unparseable acknowledgement: {}", e);
                            }
                        }
                    }
                }
                FramesOutcome::Timeout => {
                    match window.on_timeout() {
                        TimeoutAction::Retransmit(sequences) => {
                            for sequence in sequences {
                                debug!("resending segment #{}", sequence);
                                self.transmit(&segments[sequence.as_index()]).await?;
                                report.transmissions += 1;
                                report.retransmissions += 1;
                            }
                        }
                        TimeoutAction::Abort => {
                            self.transport.close().await;
                            return Err(ArqError::RetransmissionLimitExceeded { timeouts: window.timeout_count() });
                        }
                    }
                }
                FramesOutcome::Closed => {
                    warn!("peer closed the connection with segments up to {:?} acknowledged", window.highest_acknowledged());
                    return Err(ArqError::PeerClosed);
                }
            }
        }
    }

    async fn transmit(&mut self, segment: &Segment) -> ArqResult<()> {
        let frame = Frame::Segment(segment.clone());
        debug!("sending {}", frame);
        self.transport.send_frame(&frame).await?;
        Ok(())
    }
}
