//! # Volume Protocol
//!
//! Client side of the volume control server's line protocol.
//!
//! This crate provides:
//! - Command encoding and status line parsing
//! - A [`Transport`] contract with TCP ([`StreamTransport`]) and UDP
//!   ([`DatagramTransport`]) implementations
//!
//! The UDP transport emulates a connection on top of datagrams: commands are
//! sequence numbered and retransmitted until acked, and a `status` keepalive
//! detects a dead server.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use volume_protocol::{open_transport, Command, TransportConfig, TransportEvent, TransportKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (events_tx, events) = crossbeam_channel::unbounded();
//! let mut transport = open_transport(TransportKind::Udp, &TransportConfig::default(), events_tx)?;
//!
//! transport.connect("127.0.0.1", 4000)?;
//! transport.send_command(&Command::set("F", 40))?;
//!
//! // Drive timers and inbound traffic
//! transport.poll()?;
//! for event in events.try_iter() {
//!     if let TransportEvent::StatusUpdate(status) = event {
//!         println!("master at {}", status.master);
//!     }
//! }
//!
//! transport.disconnect()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod datagram;
pub mod error;
pub mod sequence;
pub mod socket;
pub mod status;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use command::{Command, CommandError, Verb, MAX_COMMAND_LEN};
pub use config::{DatagramConfig, StreamConfig, TransportConfig};
pub use datagram::DatagramTransport;
pub use error::{ErrorKind, TransportError};
pub use socket::{DatagramSocket, UdpDatagramSocket};
pub use status::{ParseError, Reply, ServerStatus};
pub use stream::StreamTransport;
pub use transport::{open_transport, ConnectionState, Transport, TransportEvent, TransportKind};
