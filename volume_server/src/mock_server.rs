use crate::mixer::Mixer;
use log::{debug, error, info, warn};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use volume_protocol::Verb;

/// How often server threads check whether they should stop
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

fn leading_verb(line: &str) -> Option<Verb> {
    line.split_whitespace()
        .next()
        .and_then(|token| Verb::from_str(&token.to_ascii_lowercase()).ok())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Mixer state shared by every front end of one server
#[derive(Debug, Clone, Default)]
pub struct SharedMixer(Arc<Mutex<Mixer>>);

impl SharedMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the mixer. A panicked holder cannot leave it half-updated, so
    /// poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Mixer> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply one command line and produce the reply line
    fn reply_to(&self, line: &str) -> Result<String, String> {
        let mut mixer = self.lock();
        match mixer.apply(line) {
            Ok(_) => Ok(mixer.status().to_wire()),
            Err(e) => Err(format!("ERROR {}", e)),
        }
    }
}

/// Mock TCP volume server.
///
/// Answers every command with the full status line, `byebye` with `CYA`, and
/// bad commands with `ERROR <reason>`. Clients are served one thread each.
pub struct MockTcpServer {
    mixer: SharedMixer,
    should_stop: Arc<AtomicBool>,
}

impl MockTcpServer {
    pub fn new(mixer: SharedMixer) -> Self {
        Self {
            mixer,
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start serving in background threads and return a handle for testing
    pub fn start_background(self, bind_address: &str) -> io::Result<MockServerHandle> {
        let listener = TcpListener::bind(bind_address)?;
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        info!("🎚️ Mock TCP volume server listening on {}", listener.local_addr()?);

        let mixer = self.mixer.clone();
        let should_stop = self.should_stop.clone();
        thread::spawn(move || {
            while !should_stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        info!("📡 Client connected from {}", addr);
                        let mixer = mixer.clone();
                        let should_stop = should_stop.clone();
                        thread::spawn(move || {
                            if let Err(e) = Self::handle_client(stream, &mixer, &should_stop) {
                                error!("Client {} error: {}", addr, e);
                            }
                            info!("👋 Client {} disconnected", addr);
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(STOP_POLL_INTERVAL);
                    }
                    Err(e) => {
                        error!("Connection error: {}", e);
                    }
                }
            }
            debug!("TCP accept loop stopped");
        });

        Ok(MockServerHandle {
            port,
            mixer: self.mixer,
            should_stop: self.should_stop,
            udp: None,
        })
    }

    fn handle_client(
        stream: TcpStream,
        mixer: &SharedMixer,
        should_stop: &AtomicBool,
    ) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(STOP_POLL_INTERVAL))?;
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        let mut pending = Vec::new();

        loop {
            if should_stop.load(Ordering::Relaxed) {
                return Ok(());
            }

            match reader.read_until(b'\n', &mut pending) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if is_timeout(&e) => continue,
                Err(e) => return Err(e),
            }

            let line = String::from_utf8_lossy(&pending).trim().to_string();
            pending.clear();
            debug!("Got cmd '{}'", line);

            // A blank line ends the session like the hardware server does
            if line.is_empty() {
                return Ok(());
            }
            if leading_verb(&line) == Some(Verb::Byebye) {
                writer.write_all(b"CYA\n")?;
                return Ok(());
            }

            let reply = match mixer.reply_to(&line) {
                Ok(status) => status,
                Err(error) => {
                    warn!("⚠️ Refused '{}': {}", line, error);
                    error
                }
            };
            writer.write_all(format!("{}\n", reply).as_bytes())?;
        }
    }
}

/// Switches the UDP front end's behaviour at runtime
#[derive(Debug, Default)]
struct UdpControl {
    silent: AtomicBool,
    drop_acks: AtomicBool,
    received: Mutex<Vec<String>>,
}

/// Mock UDP volume server.
///
/// Expects `<seq> <command>` datagrams. `status` is answered with the status
/// line, every other accepted command with `ACK <seq>`. Replies are NUL
/// terminated.
pub struct MockUdpServer {
    mixer: SharedMixer,
    should_stop: Arc<AtomicBool>,
    control: Arc<UdpControl>,
}

impl MockUdpServer {
    pub fn new(mixer: SharedMixer) -> Self {
        Self {
            mixer,
            should_stop: Arc::new(AtomicBool::new(false)),
            control: Arc::new(UdpControl::default()),
        }
    }

    pub fn start_background(self, bind_address: &str) -> io::Result<MockServerHandle> {
        let socket = UdpSocket::bind(bind_address)?;
        socket.set_read_timeout(Some(STOP_POLL_INTERVAL))?;
        let port = socket.local_addr()?.port();
        info!("🎚️ Mock UDP volume server listening on {}", socket.local_addr()?);

        let mixer = self.mixer.clone();
        let should_stop = self.should_stop.clone();
        let control = self.control.clone();
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while !should_stop.load(Ordering::Relaxed) {
                match socket.recv_from(&mut buf) {
                    Ok((size, from)) => {
                        let line = String::from_utf8_lossy(&buf[..size]).trim().to_string();
                        if let Some(reply) = Self::handle_datagram(&line, &mixer, &control) {
                            Self::send_reply(&socket, &reply, from);
                        }
                    }
                    Err(e) if is_timeout(&e) => {}
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                    }
                }
            }
            debug!("UDP loop stopped");
        });

        Ok(MockServerHandle {
            port,
            mixer: self.mixer,
            should_stop: self.should_stop,
            udp: Some(self.control),
        })
    }

    fn handle_datagram(line: &str, mixer: &SharedMixer, control: &UdpControl) -> Option<String> {
        debug!("UDP got '{}'", line);
        match control.received.lock() {
            Ok(mut received) => received.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }

        if control.silent.load(Ordering::Relaxed) {
            return None;
        }

        let (seq, command) = match line.split_once(' ') {
            Some((seq, command)) if seq.parse::<u64>().is_ok() => (seq, command),
            _ => return Some("ERROR bad sequence number".to_string()),
        };

        let is_status = leading_verb(command) == Some(Verb::Status);
        match mixer.reply_to(command) {
            Ok(status) if is_status => Some(status),
            Ok(_) if control.drop_acks.load(Ordering::Relaxed) => None,
            Ok(_) => Some(format!("ACK {}", seq)),
            Err(error) => Some(error),
        }
    }

    fn send_reply(socket: &UdpSocket, reply: &str, to: SocketAddr) {
        let mut payload = reply.as_bytes().to_vec();
        payload.push(0);
        if let Err(e) = socket.send_to(&payload, to) {
            warn!("⚠️ Failed to answer {}: {}", to, e);
        }
    }
}

/// Handle to a running mock server. The server stops when it is dropped.
pub struct MockServerHandle {
    pub port: u16,
    mixer: SharedMixer,
    should_stop: Arc<AtomicBool>,
    udp: Option<Arc<UdpControl>>,
}

impl MockServerHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn mixer(&self) -> &SharedMixer {
        &self.mixer
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }

    /// UDP only: stop answering anything, as if the server went away
    pub fn set_silent(&self, silent: bool) {
        if let Some(control) = &self.udp {
            control.silent.store(silent, Ordering::Relaxed);
        }
    }

    /// UDP only: keep applying commands but stop acking them
    pub fn set_drop_acks(&self, drop_acks: bool) {
        if let Some(control) = &self.udp {
            control.drop_acks.store(drop_acks, Ordering::Relaxed);
        }
    }

    /// UDP only: every datagram received so far, trimmed
    pub fn received(&self) -> Vec<String> {
        match &self.udp {
            Some(control) => match control.received.lock() {
                Ok(received) => received.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            },
            None => Vec::new(),
        }
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
