//! Volume protocol over UDP.
//!
//! UDP has no connection, so one is emulated: `connect` pings the server
//! with a `status` probe and only reports success once the server answers.
//! While connected, a keepalive probe goes out every `update_interval`; when
//! more than `ping_misses_before_disconnect` probes in a row go unanswered the
//! link is declared dead. Any status reply counts as an answer.
//!
//! Commands other than `status` carry a sequence number and are retransmitted
//! until the server acks them. Only the most recent command is ever retried:
//! once a newer command has been sent, older ones are abandoned, since a newer
//! setting makes them irrelevant. Running out of retries is not reported.

use crate::command::Command;
use crate::config::DatagramConfig;
use crate::error::TransportError;
use crate::sequence::{PendingRetransmission, RetransmitDecision, RetransmitSchedule, SequenceState};
use crate::socket::{DatagramSocket, UdpDatagramSocket};
use crate::status::{datagram_line, Reply, ServerStatus};
use crate::transport::{ConnectionState, Notifier, Transport, TransportEvent};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Instant;

pub struct DatagramTransport<S: DatagramSocket = UdpDatagramSocket> {
    socket: S,
    config: DatagramConfig,
    notifier: Notifier,
    state: ConnectionState,
    peer: Option<SocketAddrV4>,
    sequence: SequenceState,
    retransmits: RetransmitSchedule,
    next_ping: Option<Instant>,
    /// Probes sent since the last status reply
    outstanding_pings: u32,
}

impl DatagramTransport<UdpDatagramSocket> {
    /// Create a transport on a fresh ephemeral UDP socket
    pub fn bind(
        config: DatagramConfig,
        events: Sender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let socket = UdpDatagramSocket::bind()?;
        Ok(Self::with_socket(socket, config, events))
    }
}

impl<S: DatagramSocket> DatagramTransport<S> {
    pub fn with_socket(socket: S, config: DatagramConfig, events: Sender<TransportEvent>) -> Self {
        if config.retransmit_delay >= config.update_interval {
            warn!(
                "⚠️ Retransmit delay {:?} is not shorter than the update interval {:?}",
                config.retransmit_delay, config.update_interval
            );
        }

        Self {
            socket,
            config,
            notifier: Notifier::new(events),
            state: ConnectionState::Disconnected,
            peer: None,
            sequence: SequenceState::default(),
            retransmits: RetransmitSchedule::default(),
            next_ping: None,
            outstanding_pings: 0,
        }
    }

    pub fn sequence(&self) -> &SequenceState {
        &self.sequence
    }

    pub fn outstanding_pings(&self) -> u32 {
        self.outstanding_pings
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    pub fn pending_retransmits(&self) -> usize {
        self.retransmits.len()
    }

    /// Resolve `host`, ping it and wait up to `connect_timeout` for the
    /// server to answer. Only a datagram from the resolved address counts.
    pub fn connect_at(
        &mut self,
        host: &str,
        port: u16,
        now: Instant,
    ) -> Result<(), TransportError> {
        if self.state == ConnectionState::Connected {
            return Err(self.notifier.report(TransportError::AlreadyConnected));
        }

        let peer = match resolve_ipv4(host, port) {
            Some(peer) => peer,
            None => {
                return Err(self
                    .notifier
                    .report(TransportError::Resolution(host.to_string())))
            }
        };
        self.peer = Some(peer);

        // Late replies to an earlier probe must not answer this one
        if let Err(e) = self.discard_queued() {
            self.reset_link();
            return Err(self.notifier.report(TransportError::Read(e)));
        }

        info!("📡 Pinging volume server at {}", peer);
        if let Err(e) = self.send_probe(&Command::status()) {
            self.reset_link();
            return Err(e);
        }

        let answer = match self.await_answer(peer) {
            Ok(Some(answer)) => answer,
            Ok(None) => {
                warn!("⚠️ UDP \"connection\" to {} failed", peer);
                self.reset_link();
                return Err(self
                    .notifier
                    .report(TransportError::Timeout(format!("pinging server at {}", peer))));
            }
            Err(e) => {
                self.reset_link();
                return Err(self.notifier.report(e));
            }
        };

        self.state = ConnectionState::Connected;
        self.outstanding_pings = 0;
        self.next_ping = Some(now + self.config.update_interval);
        info!(
            "✅ UDP \"connection\" to {} established (dropped after {:?} without status)",
            peer,
            self.config.link_timeout()
        );
        self.notifier.emit(TransportEvent::Connected);

        let line = datagram_line(&answer);
        debug!("📥 Got response (size: {}): {}", answer.len(), line);
        self.handle_line(&line);
        self.drain_inbound()
    }

    /// Send `command`, tagged with its sequence number.
    ///
    /// Non-probe commands get a retransmission check `retransmit_delay` after `now`.
    pub fn send_command_at(
        &mut self,
        command: &Command,
        now: Instant,
    ) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(self.notifier.report(TransportError::NotConnected));
        }

        if command.is_probe() {
            return self.send_probe(command);
        }

        // Validate before a sequence number is spent on it
        if let Err(e) = command.text() {
            return Err(self.notifier.report(e.into()));
        }

        let seq = self.sequence.next_command();
        let payload = command
            .encode_sequenced(seq)
            .map_err(|e| self.notifier.report(e.into()))?;

        self.retransmits.schedule(
            now + self.config.retransmit_delay,
            PendingRetransmission::new(seq, payload.clone()),
        );
        self.transmit(&payload)
    }

    /// Drain inbound datagrams, then fire due retransmission checks and keepalive
    pub fn poll_at(&mut self, now: Instant) -> Result<(), TransportError> {
        self.drain_inbound()?;
        self.fire_retransmits(now);
        self.fire_keepalive(now)
    }

    fn send_probe(&mut self, command: &Command) -> Result<(), TransportError> {
        let seq = self.sequence.next_probe();
        let payload = match command.encode_sequenced(seq) {
            Ok(payload) => payload,
            Err(e) => return Err(self.notifier.report(e.into())),
        };
        self.transmit(&payload)
    }

    fn transmit(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let peer = match self.peer {
            Some(peer) => peer,
            None => return Err(self.notifier.report(TransportError::NotConnected)),
        };

        debug!(
            "📤 ({}) UDP send: {}",
            peer,
            String::from_utf8_lossy(payload).trim_end()
        );
        self.socket
            .send_to(payload, peer)
            .map_err(|e| self.notifier.report(TransportError::Io(e)))
    }

    fn discard_queued(&mut self) -> io::Result<()> {
        while let Some((payload, from)) = self.socket.try_recv()? {
            debug!(
                "Discarding stale datagram from {}: {}",
                from,
                datagram_line(&payload)
            );
        }
        Ok(())
    }

    /// Wait up to `connect_timeout` for a datagram from `peer`.
    /// Anything from another source is dropped on the way.
    fn await_answer(&mut self, peer: SocketAddrV4) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            match self.socket.try_recv().map_err(TransportError::Read)? {
                Some((payload, from)) if from == SocketAddr::V4(peer) => {
                    return Ok(Some(payload))
                }
                Some((_, from)) => {
                    warn!("⚠️ Dropping datagram from unexpected peer {}", from);
                    continue;
                }
                None => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.socket.wait_readable(remaining)? {
                return Ok(None);
            }
        }
    }

    /// Handle every datagram currently queued, not just the first
    fn drain_inbound(&mut self) -> Result<(), TransportError> {
        loop {
            let (payload, from) = match self.socket.try_recv() {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let err = self.notifier.report(TransportError::Read(e));
                    self.drop_connection();
                    return Err(err);
                }
            };

            if self.peer.map(SocketAddr::V4) != Some(from) {
                warn!("⚠️ Dropping datagram from unexpected peer {}", from);
                continue;
            }

            let line = datagram_line(&payload);
            debug!("📥 Got response (size: {}): {}", payload.len(), line);
            self.handle_line(&line);
        }
    }

    fn handle_line(&mut self, line: &str) {
        match Reply::classify(line) {
            Reply::Error(rest) => {
                self.notifier.report(TransportError::Server(rest.to_string()));
            }
            Reply::Ack(seq) => {
                if self.sequence.record_ack(seq) {
                    debug!("ACK {}", seq);
                } else {
                    debug!("Ignoring stale ACK {}", seq);
                }
            }
            Reply::Status(text) => {
                self.outstanding_pings = 0;
                match ServerStatus::parse(text) {
                    Ok(status) => self.notifier.emit(TransportEvent::StatusUpdate(status)),
                    Err(e) => {
                        self.notifier.report(e.into());
                    }
                }
            }
            Reply::Unknown(text) => {
                self.notifier
                    .report(TransportError::UnknownReply(text.to_string()));
            }
        }
    }

    fn fire_retransmits(&mut self, now: Instant) {
        while let Some(mut pending) = self.retransmits.pop_due(now) {
            let text = String::from_utf8_lossy(&pending.payload).trim_end().to_string();

            match pending.decide(&self.sequence, self.config.max_retransmits) {
                RetransmitDecision::Acked => {
                    debug!("✅ Command acknowledged: {}", text);
                }
                RetransmitDecision::Superseded => {
                    debug!("Not retrying because newer command sent: {}", text);
                }
                RetransmitDecision::Exhausted => {
                    warn!("⚠️ Reached maximum retries for command: {}", text);
                }
                RetransmitDecision::Retry => {
                    pending.retries += 1;
                    debug!("🔁 RETRY {} for command: {}", pending.retries, text);
                    // Failures are already reported; the next check retries again
                    let _ = self.transmit(&pending.payload);
                    self.retransmits
                        .schedule(now + self.config.retransmit_delay, pending);
                }
            }
        }
    }

    fn fire_keepalive(&mut self, now: Instant) -> Result<(), TransportError> {
        match self.next_ping {
            Some(due) if due <= now => {}
            _ => return Ok(()),
        }

        if self.outstanding_pings > self.config.ping_misses_before_disconnect {
            warn!(
                "⚠️ {} status probes unanswered, giving up on server",
                self.outstanding_pings
            );
            self.outstanding_pings = 0;
            self.drop_connection();
            return Err(self.notifier.report(TransportError::ConnectionLost));
        }

        if self.outstanding_pings > 0 {
            warn!("⚠️ {} status probe(s) unanswered", self.outstanding_pings);
        }
        self.outstanding_pings += 1;
        self.next_ping = Some(now + self.config.update_interval);

        // Send failures are already reported and count as a miss
        let _ = self.send_probe(&Command::status());
        Ok(())
    }

    /// Forget the peer and stop all timers
    fn reset_link(&mut self) {
        self.peer = None;
        self.next_ping = None;
        self.retransmits.clear();
        self.outstanding_pings = 0;
    }

    fn drop_connection(&mut self) {
        self.reset_link();
        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Disconnected;
            info!("🔌 UDP \"connection\" closed");
            self.notifier.emit(TransportEvent::Disconnected);
        }
    }
}

impl<S: DatagramSocket> Transport for DatagramTransport<S> {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.connect_at(host, port, Instant::now())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.state != ConnectionState::Connected {
            return Err(self.notifier.report(TransportError::AlreadyDisconnected));
        }
        self.drop_connection();
        Ok(())
    }

    fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
        self.send_command_at(command, Instant::now())
    }

    fn poll(&mut self) -> Result<(), TransportError> {
        self.poll_at(Instant::now())
    }

    fn next_wakeup(&self) -> Option<Instant> {
        match (self.next_ping, self.retransmits.next_due()) {
            (Some(ping), Some(check)) => Some(ping.min(check)),
            (ping, check) => ping.or(check),
        }
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}

/// First IPv4 address `host` resolves to
fn resolve_ipv4(host: &str, port: u16) -> Option<SocketAddrV4> {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!("Lookup of {} failed: {}", host, e);
            return None;
        }
    };

    addrs.into_iter().find_map(|addr| match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    })
}
