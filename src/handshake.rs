//! Control exchange before the segmented transfer: the client asks the server for its maximum
//!  segment size, and either side can end the session cleanly with `q`.
//!
//! ```ascii
//! client                      server
//!   | --- MAX_MESSAGE_SIZE ---> |
//!   | <-------- 20 ------------ |      (or 'q' to refuse the session)
//!   | --- M0: ... ------------> |
//! ```

use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use crate::error::{ArqError, ArqResult};
use crate::frame::Frame;
use crate::framed_transport::{FramedTransport, FramesOutcome};
use crate::transport::Transport;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HandshakeOutcome {
    /// segmented transfer follows, with this maximum segment size
    Proceed(usize),
    /// the peer ended the session
    Disconnect,
}

#[instrument(skip_all)]
pub async fn request_max_segment_size<T: Transport>(transport: &mut FramedTransport<T>, timeout: Duration) -> ArqResult<HandshakeOutcome> {
    transport.send_frame(&Frame::MaxSizeRequest).await?;

    match receive_control(transport, timeout).await? {
        Frame::MaxSize(0) => Err(ArqError::InvalidConfiguration("peer announced a maximum segment size of 0".to_string())),
        Frame::MaxSize(max_segment_size) => {
            debug!("peer accepts segments of up to {} bytes", max_segment_size);
            Ok(HandshakeOutcome::Proceed(max_segment_size))
        }
        Frame::Disconnect => {
            info!("peer refused the session");
            Ok(HandshakeOutcome::Disconnect)
        }
        other => Err(ArqError::MalformedFrame(format!("expected a maximum segment size, got {}", other))),
    }
}

/// Server side of [request_max_segment_size]. Waits for the request and answers it with
///  `max_segment_size`; a client that sends `q` instead ends the session.
#[instrument(skip_all)]
pub async fn serve_max_segment_size<T: Transport>(transport: &mut FramedTransport<T>, max_segment_size: usize, timeout: Duration) -> ArqResult<HandshakeOutcome> {
    if max_segment_size == 0 {
        return Err(ArqError::InvalidConfiguration("maximum segment size must be positive".to_string()));
    }

    match receive_control(transport, timeout).await? {
        Frame::MaxSizeRequest => {
            debug!("announcing maximum segment size {}", max_segment_size);
            transport.send_frame(&Frame::MaxSize(max_segment_size)).await?;
            Ok(HandshakeOutcome::Proceed(max_segment_size))
        }
        Frame::Disconnect => {
            info!("client disconnected before the transfer");
            Ok(HandshakeOutcome::Disconnect)
        }
        other => Err(ArqError::MalformedFrame(format!("expected {}, got {}", Frame::MaxSizeRequest, other))),
    }
}

/// Server side of [request_max_segment_size] for a server that does not accept the session: the
///  request is answered with `q`, and the transport is closed.
#[instrument(skip_all)]
pub async fn refuse_session<T: Transport>(transport: &mut FramedTransport<T>, timeout: Duration) -> ArqResult<()> {
    let request = receive_control(transport, timeout).await;
    match request {
        Ok(Frame::MaxSizeRequest) => {
            info!("refusing the session");
            send_disconnect(transport).await
        }
        Ok(Frame::Disconnect) => {
            info!("client disconnected before the transfer");
            transport.close().await;
            Ok(())
        }
        Ok(other) => {
            transport.close().await;
            Err(ArqError::MalformedFrame(format!("expected {}, got {}", Frame::MaxSizeRequest, other)))
        }
        Err(e) => {
            transport.close().await;
            Err(e)
        }
    }
}

/// sends `q` and closes the transport
pub async fn send_disconnect<T: Transport>(transport: &mut FramedTransport<T>) -> ArqResult<()> {
    debug!("sending disconnect");
    let result = transport.send_frame(&Frame::Disconnect).await;
    transport.close().await;
    result?;
    Ok(())
}

/// Reads exactly one control frame. Anything that follows it stays buffered for the segmented
///  transfer.
async fn receive_control<T: Transport>(transport: &mut FramedTransport<T>, timeout: Duration) -> ArqResult<Frame> {
    match transport.receive_frame(timeout).await? {
        FramesOutcome::Frames(frames) => {
            let Some(frame) = frames.into_iter().next() else {
                return Err(ArqError::MalformedFrame("no control frame".to_string()));
            };
            Frame::parse_control(&frame)
                .inspect_err(|e| warn!("unexpected frame during handshake: {}", e))
        }
        FramesOutcome::Timeout => Err(ArqError::Timeout),
        FramesOutcome::Closed => Err(ArqError::PeerClosed),
    }
}
