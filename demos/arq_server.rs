use std::net::SocketAddr;
use std::sync::Arc;
use clap::Parser;
use clap_derive::Parser;
use rustarq::config::{parse_seconds, ArqConfig, SessionSettings};
use rustarq::framed_transport::FramedTransport;
use rustarq::handshake::{refuse_session, serve_max_segment_size, HandshakeOutcome};
use rustarq::receiver::Receiver;
use rustarq::transport::StreamTransport;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};

/// Accepts a single connection, announces the maximum segment size and receives one message.
#[derive(Parser)]
struct Args {
    #[clap(default_value = "127.0.0.1:13002")]
    listen_address: String,

    #[clap(long, default_value_t = 20)]
    max_segment_size: usize,

    /// seconds, fractions allowed
    #[clap(long, default_value = "5")]
    timeout: String,

    /// settings file with `key: value` lines; `maximum_msg_size` and `timeout` override the flags
    #[clap(long)]
    settings: Option<String>,

    /// answer the client's size request with `q` instead of receiving a message
    #[clap(long, default_value_t = false)]
    refuse: bool,

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

    let mut max_segment_size = args.max_segment_size;
    let mut timeout = parse_seconds(&args.timeout)?;
    if let Some(path) = &args.settings {
        let settings = SessionSettings::from_file(path).await?;
        max_segment_size = settings.maximum_msg_size.unwrap_or(max_segment_size);
        timeout = settings.timeout.unwrap_or(timeout);
    }

    let listen_address: SocketAddr = args.listen_address.parse()?;
    let listener = TcpListener::bind(listen_address).await?;
    info!("listening on {:?}", listen_address);

    let (transport, peer_addr) = StreamTransport::accept_one(&listener).await?;
    info!("connection established with {:?}", peer_addr);
    let mut transport = FramedTransport::new(transport);

    if args.refuse {
        refuse_session(&mut transport, timeout).await?;
        return Ok(());
    }

    match serve_max_segment_size(&mut transport, max_segment_size, timeout).await? {
        HandshakeOutcome::Proceed(_) => {}
        HandshakeOutcome::Disconnect => {
            info!("client disconnected");
            transport.close().await;
            return Ok(());
        }
    }

    // the window size is the sender's business, the receiver acknowledges segment by segment
    let config = Arc::new(ArqConfig::new(1, timeout, max_segment_size));
    let mut receiver = Receiver::new(config, transport);
    let report = match receiver.run().await {
        Ok(report) => report,
        Err(e) => {
            let report = receiver.report();
            if !report.message.is_empty() {
                println!("{}", String::from_utf8_lossy(&report.message));
            }
            return Err(e.into());
        }
    };

    if report.out_of_order_pending > 0 {
        warn!("message is incomplete: {} segment(s) after a gap were discarded", report.out_of_order_pending);
    }
    if report.disconnected {
        info!("client ended the session with 'q'");
    }
    info!("received {} segment(s)", report.segments_delivered);
    println!("{}", String::from_utf8_lossy(&report.message));
    Ok(())
}
