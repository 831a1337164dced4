use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use rustarq::config::{parse_seconds, ArqConfig, SessionSettings};
use rustarq::framed_transport::FramedTransport;
use rustarq::handshake::{request_max_segment_size, send_disconnect, HandshakeOutcome};
use rustarq::sender::Sender;
use rustarq::test_util::LossyTransport;
use rustarq::transport::StreamTransport;
use tracing::{info, Level};

/// Connects to an ARQ server, asks for its maximum segment size and sends one message.
#[derive(Parser)]
struct Args {
    #[clap(default_value = "127.0.0.1:13002")]
    server_address: String,

    #[clap(long)]
    message: Option<String>,

    #[clap(long)]
    window_size: Option<usize>,

    /// seconds, fractions allowed
    #[clap(long)]
    timeout: Option<String>,

    /// settings file with `key: value` lines; command line flags take precedence
    #[clap(long)]
    settings: Option<String>,

    /// only do the size handshake, then disconnect with `q`
    #[clap(long, default_value_t = false)]
    disconnect: bool,

    /// probability of dropping an outgoing frame, for watching retransmissions at work
    #[clap(long, default_value_t = 0.0)]
    loss_rate: f64,

    #[clap(long, default_value_t = 0)]
    loss_seed: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let settings = match &args.settings {
        Some(path) => SessionSettings::from_file(path).await?,
        None => SessionSettings::default(),
    };

    let message = args.message.or(settings.message)
        .ok_or_else(|| anyhow!("no message - pass --message or a settings file"))?;
    let window_size = args.window_size.or(settings.window_size)
        .ok_or_else(|| anyhow!("no window size - pass --window-size or a settings file"))?;
    let timeout = match &args.timeout {
        Some(s) => parse_seconds(s)?,
        None => settings.timeout
            .ok_or_else(|| anyhow!("no timeout - pass --timeout or a settings file"))?,
    };

    let server_address: SocketAddr = args.server_address.parse()?;
    let mut transport = FramedTransport::new(StreamTransport::connect(server_address).await?);

    let max_segment_size = match request_max_segment_size(&mut transport, timeout).await? {
        HandshakeOutcome::Proceed(max_segment_size) => max_segment_size,
        HandshakeOutcome::Disconnect => {
            info!("server refused the session");
            transport.close().await;
            return Ok(());
        }
    };
    info!("server accepts segments of up to {} bytes", max_segment_size);

    if args.disconnect {
        send_disconnect(&mut transport).await?;
        return Ok(());
    }

    // the server sends nothing after its answer, so there is no buffered input to carry over
    let transport = LossyTransport::random(transport.into_inner(), args.loss_rate, args.loss_seed)?;

    let config = Arc::new(ArqConfig::new(window_size, timeout, max_segment_size));
    let mut sender = Sender::new(config, FramedTransport::new(transport));
    let report = sender.send_message(message.as_bytes()).await?;
    info!("sent {} segment(s) in {} transmission(s), {} of them retransmissions", report.segments, report.transmissions, report.retransmissions);

    let mut transport = sender.into_transport();
    let num_dropped = transport.transport_mut().num_dropped();
    if num_dropped > 0 {
        info!("{} frame(s) were dropped by the simulated loss", num_dropped);
    }
    transport.close().await;
    Ok(())
}
