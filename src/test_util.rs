//! Fault injection for exercising the retransmission machinery without depending on actual
//!  network conditions. This is regular (non-#[cfg(test)]) code so that the demos can simulate a
//!  lossy link as well.

use std::collections::BTreeSet;
use std::time::Duration;
use anyhow::bail;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;
use crate::transport::{ReceiveOutcome, Transport};

enum LossModel {
    /// zero-based indices of the `send` calls to drop
    Scripted(BTreeSet<usize>),
    Random { loss_rate: f64, rng: StdRng },
}

/// Wraps a [Transport] and silently drops some of the outgoing writes, reporting them as sent.
///  Receiving and closing are passed through unchanged.
///
/// Every `send` call of the protocol drivers writes exactly one frame, so dropping a write drops
///  a frame.
pub struct LossyTransport<T: Transport> {
    inner: T,
    loss_model: LossModel,
    num_sent: usize,
    num_dropped: usize,
}

impl <T: Transport> LossyTransport<T> {
    /// Drops the writes with the given indices, e.g. `[0, 3]` drops the first and the fourth
    ///  frame sent through this transport.
    pub fn dropping(inner: T, indices: impl IntoIterator<Item = usize>) -> LossyTransport<T> {
        Self::with_model(inner, LossModel::Scripted(indices.into_iter().collect()))
    }

    /// Drops each write with probability `loss_rate`, which must be in `[0.0, 1.0]`. The seed
    ///  makes a run reproducible.
    pub fn random(inner: T, loss_rate: f64, seed: u64) -> anyhow::Result<LossyTransport<T>> {
        if !(0.0..=1.0).contains(&loss_rate) {
            bail!("loss rate must be between 0 and 1, was {}", loss_rate);
        }
        Ok(Self::with_model(inner, LossModel::Random {
            loss_rate,
            rng: StdRng::seed_from_u64(seed),
        }))
    }

    fn with_model(inner: T, loss_model: LossModel) -> LossyTransport<T> {
        LossyTransport {
            inner,
            loss_model,
            num_sent: 0,
            num_dropped: 0,
        }
    }

    pub fn num_dropped(&self) -> usize {
        self.num_dropped
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn should_drop(&mut self, idx: usize) -> bool {
        match &mut self.loss_model {
            LossModel::Scripted(indices) => indices.contains(&idx),
            LossModel::Random { loss_rate, rng } => rng.gen_bool(*loss_rate),
        }
    }
}

#[async_trait]
impl <T: Transport> Transport for LossyTransport<T> {
    async fn send(&mut self, buf: &[u8]) -> anyhow::Result<()> {
        let idx = self.num_sent;
        self.num_sent += 1;

        if self.should_drop(idx) {
            debug!("simulated loss of write #{}: {:?}", idx, String::from_utf8_lossy(buf));
            self.num_dropped += 1;
            return Ok(());
        }
        self.inner.send(buf).await
    }

    async fn receive(&mut self, timeout: Duration) -> anyhow::Result<ReceiveOutcome> {
        self.inner.receive(timeout).await
    }

    async fn close(&mut self) {
        self.inner.close().await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::io::duplex;
    use tokio::time;
    use crate::config::ArqConfig;
    use crate::framed_transport::FramedTransport;
    use crate::receiver::Receiver;
    use crate::sender::Sender;
    use crate::transport::{MockTransport, StreamTransport};

    #[tokio::test]
    async fn test_scripted_loss() {
        let mut inner = MockTransport::new();
        inner.expect_send()
            .times(2)
            .withf(|buf| buf != b"dropped")
            .returning(|_| Ok(()));

        let mut transport = LossyTransport::dropping(inner, [1]);
        transport.send(b"a").await.unwrap();
        transport.send(b"dropped").await.unwrap();
        transport.send(b"b").await.unwrap();
        assert_eq!(transport.num_dropped(), 1);
    }

    #[tokio::test]
    async fn test_random_loss_extremes() {
        let mut inner = MockTransport::new();
        inner.expect_send()
            .times(10)
            .returning(|_| Ok(()));

        let mut never = LossyTransport::random(inner, 0.0, 1).unwrap();
        for _ in 0..10 {
            never.send(b"x").await.unwrap();
        }
        assert_eq!(never.num_dropped(), 0);

        let mut inner = MockTransport::new();
        inner.expect_send().never();
        let mut always = LossyTransport::random(inner, 1.0, 1).unwrap();
        for _ in 0..10 {
            always.send(b"x").await.unwrap();
        }
        assert_eq!(always.num_dropped(), 10);
    }

    #[rstest]
    #[case::nan(f64::NAN)]
    #[case::negative(-0.1)]
    #[case::above_one(1.5)]
    #[case::infinite(f64::INFINITY)]
    fn test_random_loss_rate_out_of_range(#[case] loss_rate: f64) {
        assert!(LossyTransport::random(MockTransport::new(), loss_rate, 1).is_err());
    }

    #[tokio::test]
    async fn test_message_survives_random_loss() {
        time::pause();

        let message = Bytes::from_static(b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor");
        let config = Arc::new(ArqConfig::new(4, Duration::from_secs(1), 6));

        let (client, server) = duplex(64 * 1024);
        let mut receiver = Receiver::new(config.clone(), FramedTransport::new(StreamTransport::new(server)));
        let receiver_handle = tokio::spawn(async move { receiver.run().await });

        let client = LossyTransport::random(StreamTransport::new(client), 0.2, 4711).unwrap();
        let mut sender = Sender::new(config, FramedTransport::new(client));
        let send_report = sender.send_message(&message).await.unwrap();

        let mut client = sender.into_transport().into_inner();
        assert_eq!(send_report.transmissions - send_report.segments, send_report.retransmissions);
        assert!(client.num_dropped() <= send_report.transmissions);
        client.close().await;

        let receive_report = receiver_handle.await.unwrap().unwrap();
        assert_eq!(receive_report.message, message);
    }
}
