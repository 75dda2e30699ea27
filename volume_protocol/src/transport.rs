use crate::command::Command;
use crate::config::TransportConfig;
use crate::datagram::DatagramTransport;
use crate::error::{ErrorKind, TransportError};
use crate::status::ServerStatus;
use crate::stream::StreamTransport;
use crossbeam_channel::Sender;
use log::{debug, error};
use std::time::Instant;
use strum::{Display, EnumString};

/// Notifications raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error { kind: ErrorKind, message: String },
    StatusUpdate(ServerStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Which transport to talk to the server over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Udp,
}

/// Client side of the volume server protocol.
///
/// Every error is raised as a [`TransportEvent::Error`]; operations started by
/// the caller also return it. Implementations are single-owner and are only
/// driven from the thread that owns them.
pub trait Transport {
    /// Connect to the server. Fails if already connected.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;

    fn send_command(&mut self, command: &Command) -> Result<(), TransportError>;

    /// Handle pending inbound data and fire due timers.
    ///
    /// Returns an error only when the connection was dropped as a result.
    fn poll(&mut self) -> Result<(), TransportError>;

    /// Earliest time `poll` has timer work to do, if any
    fn next_wakeup(&self) -> Option<Instant>;

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Build the transport selected by `kind`
pub fn open_transport(
    kind: TransportKind,
    config: &TransportConfig,
    events: Sender<TransportEvent>,
) -> Result<Box<dyn Transport>, TransportError> {
    let transport: Box<dyn Transport> = match kind {
        TransportKind::Tcp => Box::new(StreamTransport::new(config.stream.clone(), events)),
        TransportKind::Udp => Box::new(DatagramTransport::bind(config.datagram.clone(), events)?),
    };
    Ok(transport)
}

/// Delivers notifications to whoever holds the receiving end
#[derive(Debug, Clone)]
pub(crate) struct Notifier {
    events: Sender<TransportEvent>,
}

impl Notifier {
    pub(crate) fn new(events: Sender<TransportEvent>) -> Self {
        Self { events }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped, notification discarded");
        }
    }

    /// Raise `err` as an error notification and hand it back for returning
    pub(crate) fn report(&self, err: TransportError) -> TransportError {
        error!("❌ {}", err);
        self.emit(TransportEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_kind_names() {
        assert_eq!(TransportKind::from_str("tcp").unwrap(), TransportKind::Tcp);
        assert_eq!(TransportKind::from_str("udp").unwrap(), TransportKind::Udp);
        assert!(TransportKind::from_str("sctp").is_err());
        assert_eq!(TransportKind::Udp.to_string(), "udp");
    }

    #[test]
    fn test_report_emits_error_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let notifier = Notifier::new(tx);

        let err = notifier.report(TransportError::AlreadyConnected);
        assert!(matches!(err, TransportError::AlreadyConnected));

        assert_eq!(
            rx.try_recv().unwrap(),
            TransportEvent::Error {
                kind: ErrorKind::State,
                message: "Trying to connect, but already connected".to_string(),
            }
        );
    }

    #[test]
    fn test_emit_without_receiver_is_harmless() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        Notifier::new(tx).emit(TransportEvent::Connected);
    }

    #[test]
    fn test_open_transport_starts_disconnected() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let config = TransportConfig::default();

        let tcp = open_transport(TransportKind::Tcp, &config, tx.clone()).unwrap();
        assert_eq!(tcp.state(), ConnectionState::Disconnected);

        let udp = open_transport(TransportKind::Udp, &config, tx).unwrap();
        assert!(!udp.is_connected());
        assert_eq!(udp.next_wakeup(), None);
    }
}
