use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace, warn};

/// This is the maximum number of bytes a single receive call returns
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

#[derive(Clone, Eq, PartialEq)]
pub enum ReceiveOutcome {
    Data(Bytes),
    Timeout,
    /// the peer closed the connection - no more data will arrive
    Closed,
}

impl Debug for ReceiveOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiveOutcome::Data(data) => write!(f, "Data({:?})", String::from_utf8_lossy(data)),
            ReceiveOutcome::Timeout => write!(f, "Timeout"),
            ReceiveOutcome::Closed => write!(f, "Closed"),
        }
    }
}

/// The ordered, reliable-but-untimed byte stream the protocol runs on. Sending is best effort,
///  there is no delivery confirmation at this level.
///
/// This abstraction exists to decouple the protocol engines from actual I/O, and to mock I/O away
///  for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<()>;

    /// Waits at most `timeout` for data. Timeout and peer closure are reported as regular
    ///  outcomes, `Err` is reserved for actual I/O failures.
    async fn receive(&mut self, timeout: Duration) -> anyhow::Result<ReceiveOutcome>;

    async fn close(&mut self);
}


/// [Transport] implementation on top of a tokio byte stream, typically a [TcpStream]
pub struct StreamTransport<S> {
    stream: S,
    is_closed: bool,
}

impl StreamTransport<TcpStream> {
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<StreamTransport<TcpStream>> {
        let stream = TcpStream::connect(addr).await?;
        debug!("connected to {:?}", addr);
        Ok(StreamTransport::new(stream))
    }

    /// accepts a single connection
    pub async fn accept_one(listener: &TcpListener) -> anyhow::Result<(StreamTransport<TcpStream>, SocketAddr)> {
        let (stream, peer_addr) = listener.accept().await?;
        debug!("accepted connection from {:?}", peer_addr);
        Ok((StreamTransport::new(stream), peer_addr))
    }
}

impl <S: AsyncRead + AsyncWrite + Unpin + Send> StreamTransport<S> {
    pub fn new(stream: S) -> StreamTransport<S> {
        StreamTransport {
            stream,
            is_closed: false,
        }
    }
}

#[async_trait]
impl <S: AsyncRead + AsyncWrite + Unpin + Send> Transport for StreamTransport<S> {
    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        trace!("sending {} bytes", buf.len());
        self.stream.write_all(buf).await?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> anyhow::Result<ReceiveOutcome> {
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Err(_) => Ok(ReceiveOutcome::Timeout),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(0)) => Ok(ReceiveOutcome::Closed),
            Ok(Ok(len)) => {
                buf.truncate(len);
                trace!("received {} bytes", len);
                Ok(ReceiveOutcome::Data(buf.into()))
            }
        }
    }

    async fn close(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;

        if let Err(e) = self.stream.shutdown().await {
            warn!("error shutting down the connection: {}", e);
        }
    }
}
