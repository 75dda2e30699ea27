use crate::command::{Command, Verb};
use crate::config::StreamConfig;
use crate::error::TransportError;
use crate::status::{Reply, ServerStatus};
use crate::transport::{ConnectionState, Notifier, Transport, TransportEvent};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Instant;

/// Longest reply line accepted, terminator excluded
pub const MAX_LINE_LEN: usize = 512;

/// Newline-delimited text over a TCP stream
pub struct LineConnection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    /// Bytes of a line that has not been terminated yet
    pending: Vec<u8>,
}

impl LineConnection {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let reader_stream = stream.try_clone()?;
        let reader = BufReader::new(reader_stream);
        let writer = BufWriter::new(stream);

        Ok(LineConnection {
            reader,
            writer,
            pending: Vec::new(),
        })
    }

    /// Write one line and wait for it to be flushed
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read the next complete line, blocking up to the socket read timeout.
    /// The line is returned without its terminator. A line longer than
    /// [`MAX_LINE_LEN`] fails with `InvalidData` and is discarded.
    pub fn read_line(&mut self) -> io::Result<String> {
        let limit = (MAX_LINE_LEN + 1).saturating_sub(self.pending.len()) as u64;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.pending)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ));
        }

        if self.pending.last() != Some(&b'\n') && self.pending.len() > MAX_LINE_LEN {
            self.pending.clear();
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line longer than {} bytes", MAX_LINE_LEN),
            ));
        }
        Ok(self.take_line())
    }

    /// Read a line only if one is already available
    pub fn try_read_line(&mut self) -> io::Result<Option<String>> {
        self.reader.get_ref().set_nonblocking(true)?;
        let result = self.read_line();
        self.reader.get_ref().set_nonblocking(false)?;

        match result {
            Ok(line) => Ok(Some(line)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        line
    }

    pub fn shutdown(&self) {
        if let Err(e) = self.writer.get_ref().shutdown(Shutdown::Both) {
            debug!("Shutdown of TCP stream failed: {}", e);
        }
    }
}

/// Volume protocol over TCP.
///
/// Strictly request/reply: every command blocks until it is flushed and one
/// reply line has been read, each bounded by `io_timeout`. The protocol does
/// not tag replies, so a reply is only parsed as status when the command that
/// caused it was `status`.
///
/// The first successful connect sends a `status` command on its own so the
/// caller gets the initial mixer state. Later reconnects do not.
pub struct StreamTransport {
    config: StreamConfig,
    notifier: Notifier,
    connection: Option<LineConnection>,
    last_command: Option<Verb>,
    initial_status_pending: bool,
}

impl StreamTransport {
    pub fn new(config: StreamConfig, events: Sender<TransportEvent>) -> Self {
        Self {
            config,
            notifier: Notifier::new(events),
            connection: None,
            last_command: None,
            initial_status_pending: true,
        }
    }

    fn open(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let addrs: Vec<_> = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("Lookup of {} failed: {}", host, e);
                Vec::new()
            }
        };
        if addrs.is_empty() {
            return Err(TransportError::Resolution(host.to_string()));
        }

        let mut last_err = None;
        for addr in addrs {
            debug!("Trying {}", addr);
            match TcpStream::connect_timeout(&addr, self.config.io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.config.io_timeout))?;
                    stream.set_write_timeout(Some(self.config.io_timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) if TransportError::is_timeout(&e) => {
                TransportError::Timeout(format!("connecting to {}:{}", host, port))
            }
            Some(e) => TransportError::Io(e),
            None => TransportError::Resolution(host.to_string()),
        })
    }

    fn request_initial_status(&mut self) -> Result<(), TransportError> {
        if !std::mem::take(&mut self.initial_status_pending) {
            return Ok(());
        }
        debug!("Requesting initial status");
        self.send_command(&Command::status())
    }

    fn handle_line(&mut self, line: &str) {
        debug!("📥 Got response: {}", line);

        if let Reply::Error(rest) = Reply::classify(line) {
            self.notifier.report(TransportError::Server(rest.to_string()));
            return;
        }

        if self.last_command != Some(Verb::Status) {
            debug!("Discarding reply to {:?}", self.last_command);
            return;
        }

        match ServerStatus::parse(line) {
            Ok(status) => self.notifier.emit(TransportEvent::StatusUpdate(status)),
            Err(e) => {
                self.notifier.report(e.into());
            }
        }
    }

    /// Close the stream without saying goodbye
    fn abort(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
            info!("🔌 TCP connection closed");
            self.notifier.emit(TransportEvent::Disconnected);
        }
    }

    /// Report `err`, drop the connection and hand the error back
    fn fail(&mut self, err: TransportError) -> TransportError {
        let err = self.notifier.report(err);
        self.abort();
        err
    }
}

impl Transport for StreamTransport {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.connection.is_some() {
            return Err(self.notifier.report(TransportError::AlreadyConnected));
        }

        info!("📡 Connecting to volume server at {}:{}", host, port);
        let stream = self
            .open(host, port)
            .map_err(|e| self.notifier.report(e))?;
        let connection = LineConnection::new(stream)
            .map_err(|e| self.notifier.report(TransportError::Io(e)))?;

        self.connection = Some(connection);
        self.last_command = None;
        info!("✅ Connected to volume server");
        self.notifier.emit(TransportEvent::Connected);

        self.request_initial_status()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.connection.is_none() {
            debug!("Disconnect requested while not connected, ignoring");
            return Ok(());
        }

        // Best effort; a failed goodbye already aborted the connection
        if self.send_command(&Command::byebye()).is_err() {
            warn!("⚠️ Server did not take byebye cleanly");
        }
        self.abort();
        Ok(())
    }

    fn send_command(&mut self, command: &Command) -> Result<(), TransportError> {
        let line = command
            .encode()
            .map_err(|e| self.notifier.report(e.into()))?;

        let connection = match self.connection.as_mut() {
            Some(connection) => connection,
            None => return Err(self.notifier.report(TransportError::NotConnected)),
        };

        self.last_command = Some(command.verb());
        debug!("📤 TCP send: {}", line.trim_end());

        if let Err(e) = connection.write_line(&line) {
            let err = if TransportError::is_timeout(&e) {
                TransportError::Timeout("sending command to server".to_string())
            } else {
                TransportError::Io(e)
            };
            return Err(self.fail(err));
        }

        match connection.read_line() {
            Ok(reply) => {
                self.handle_line(&reply);
                Ok(())
            }
            Err(e) if TransportError::is_timeout(&e) => Err(self.fail(TransportError::Timeout(
                "waiting for reply from server".to_string(),
            ))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(self.fail(TransportError::ConnectionLost))
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                Err(self.fail(TransportError::LineTooLong(MAX_LINE_LEN)))
            }
            Err(e) => Err(self.fail(TransportError::Read(e))),
        }
    }

    /// Handle lines that arrived outside a request/reply exchange
    fn poll(&mut self) -> Result<(), TransportError> {
        loop {
            let connection = match self.connection.as_mut() {
                Some(connection) => connection,
                None => return Ok(()),
            };

            match connection.try_read_line() {
                Ok(Some(line)) => self.handle_line(&line),
                Ok(None) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(self.fail(TransportError::ConnectionLost))
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(self.fail(TransportError::LineTooLong(MAX_LINE_LEN)))
                }
                Err(e) => return Err(self.fail(TransportError::Read(e))),
            }
        }
    }

    fn next_wakeup(&self) -> Option<Instant> {
        None
    }

    fn state(&self) -> ConnectionState {
        if self.connection.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }
}
