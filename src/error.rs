use thiserror::Error;

/// Terminal and recoverable failures of an ARQ session.
///
/// Only `RetransmissionLimitExceeded`, `PeerClosed` and `Transport` end a session; the drivers
///  recover from `MalformedFrame` (the frame is dropped) and `Timeout` (the window is resent)
///  locally.
#[derive(Debug, Error)]
pub enum ArqError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("timed out waiting for the peer")]
    Timeout,

    #[error("giving up after {timeouts} consecutive timeouts without acknowledgement progress")]
    RetransmissionLimitExceeded { timeouts: u32 },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type ArqResult<T> = Result<T, ArqError>;
