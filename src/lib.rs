pub mod error;
pub mod config;
pub mod segment;
pub mod frame;
pub mod transport;
pub mod framed_transport;
pub mod send_window;
pub mod sender;
pub mod receive_sequencer;
pub mod receiver;
pub mod handshake;
pub mod test_util;
