use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{select, Receiver};
use log::{debug, info, warn};
use std::io::{self, BufRead};
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use volume_protocol::{
    open_transport, Command, ServerStatus, Transport, TransportEvent, TransportKind,
};

mod config;

use config::ClientConfig;

/// How long to wait for a status reply before giving up
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Transport to use: tcp or udp [env: VOLCTL_TRANSPORT]
    #[arg(short, long)]
    transport: Option<TransportKind>,

    /// Volume server host [env: VOLCTL_HOST]
    #[arg(long)]
    host: Option<String>,

    /// Volume server port [env: VOLCTL_PORT]
    #[arg(short, long)]
    port: Option<u16>,

    /// Print status as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Print the current mixer status
    Status,
    /// Set a channel or group (F, R, CENSUB, FL, ...) to a level 0-99
    Set { channel: String, level: i32 },
    /// Mute (1) or unmute (0) all outputs
    Mute {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        state: u8,
    },
    /// Mute (1) or unmute (0) a channel or group
    Mutechan {
        channel: String,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        state: u8,
    },
    /// Set the master level 0-99
    Setmaster { level: i32 },
    /// Step a channel up by one
    Inc { channel: String },
    /// Step a channel down by one
    Dec { channel: String },
    /// Reset the mixer
    Reset,
    /// Print every status change until the link drops or stdin closes
    Watch,
    /// Read commands from stdin, one per line
    Shell,
}

impl CliCommand {
    /// The protocol command for one-shot subcommands
    fn to_command(&self) -> Option<Command> {
        match self {
            CliCommand::Set { channel, level } => Some(Command::set(channel, *level)),
            CliCommand::Mute { state } => Some(Command::mute(*state != 0)),
            CliCommand::Mutechan { channel, state } => {
                Some(Command::mute_channel(channel, *state != 0))
            }
            CliCommand::Setmaster { level } => Some(Command::set_master(*level)),
            CliCommand::Inc { channel } => Some(Command::inc(channel)),
            CliCommand::Dec { channel } => Some(Command::dec(channel)),
            CliCommand::Reset => Some(Command::reset()),
            CliCommand::Status | CliCommand::Watch | CliCommand::Shell => None,
        }
    }
}

enum Input {
    Event(TransportEvent),
    Line(String),
    InputClosed,
    Tick,
}

/// A connected transport plus the receiving end of its notifications
struct Session {
    transport: Box<dyn Transport>,
    events: Receiver<TransportEvent>,
    kind: TransportKind,
    json: bool,
    update_interval: Duration,
    retransmit_delay: Duration,
    last_status: Option<ServerStatus>,
}

impl Session {
    fn open(config: &ClientConfig, json: bool) -> Result<Self> {
        let (events_tx, events) = crossbeam_channel::unbounded();
        let mut transport = open_transport(config.transport, &config.transport_config, events_tx)
            .context("Failed to create transport")?;

        transport
            .connect(&config.host, config.port)
            .with_context(|| {
                format!(
                    "Could not connect to volume control server (host: {}, port: {}, transport: {})",
                    config.host, config.port, config.transport
                )
            })?;
        info!("🎚️ Connected to {}:{} over {}", config.host, config.port, config.transport);

        let mut session = Self {
            transport,
            events,
            kind: config.transport,
            json,
            update_interval: config.transport_config.datagram.update_interval,
            retransmit_delay: config.transport_config.datagram.retransmit_delay,
            last_status: None,
        };

        // Connect queues the initial status
        let queued: Vec<_> = session.events.try_iter().collect();
        for event in queued {
            session.handle_event(event)?;
        }
        Ok(session)
    }

    /// Returns an error only when the link went down
    fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Connected => debug!("Connected event"),
            TransportEvent::Disconnected => bail!("Connection to server lost"),
            TransportEvent::Error { kind, message } => {
                eprintln!("error ({}): {}", kind, message);
            }
            TransportEvent::StatusUpdate(status) => self.last_status = Some(status),
        }
        Ok(())
    }

    fn next_input(&self, lines: &Receiver<String>, limit: Instant) -> Input {
        let wake = match self.transport.next_wakeup() {
            Some(wakeup) => wakeup.min(limit),
            None => limit,
        };
        let timeout = wake.saturating_duration_since(Instant::now());

        select! {
            recv(self.events) -> event => match event {
                Ok(event) => Input::Event(event),
                Err(_) => Input::Tick,
            },
            recv(lines) -> line => match line {
                Ok(line) => Input::Line(line),
                Err(_) => Input::InputClosed,
            },
            default(timeout) => Input::Tick,
        }
    }

    fn poll(&mut self) -> Result<()> {
        if let Err(e) = self.transport.poll() {
            if !self.transport.is_connected() {
                return Err(anyhow!(e).context("Connection to server lost"));
            }
        }
        Ok(())
    }

    /// Drive the transport until `limit`, stopping early once a status
    /// update arrives if `until_status` is set
    fn run_until(&mut self, limit: Instant, until_status: bool) -> Result<Option<ServerStatus>> {
        let no_input = crossbeam_channel::never();

        while Instant::now() < limit {
            match self.next_input(&no_input, limit) {
                Input::Event(TransportEvent::StatusUpdate(status)) => {
                    self.last_status = Some(status);
                    if until_status {
                        return Ok(Some(status));
                    }
                }
                Input::Event(event) => self.handle_event(event)?,
                Input::Tick => self.poll()?,
                Input::Line(_) | Input::InputClosed => {}
            }
        }
        Ok(None)
    }

    fn request_status(&mut self) -> Result<ServerStatus> {
        self.transport
            .send_command(&Command::status())
            .context("Failed to request status")?;
        self.run_until(Instant::now() + STATUS_TIMEOUT, true)?
            .ok_or_else(|| anyhow!("No status received from server"))
    }

    fn print_status(&self, status: &ServerStatus) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string(status)?);
        } else {
            println!("{}", status);
        }
        Ok(())
    }

    /// Print `status` unless it equals the last one printed
    fn print_if_changed(
        &self,
        status: &ServerStatus,
        printed: &mut Option<ServerStatus>,
    ) -> Result<()> {
        if printed.as_ref() != Some(status) {
            self.print_status(status)?;
            *printed = Some(*status);
        }
        Ok(())
    }

    fn close(mut self) {
        if self.transport.is_connected() {
            if let Err(e) = self.transport.disconnect() {
                warn!("⚠️ Disconnect failed: {}", e);
            }
        }
    }
}

fn run_status(mut session: Session) -> Result<()> {
    let status = match session.last_status.take() {
        Some(status) => status,
        None => session.request_status()?,
    };
    session.print_status(&status)?;
    session.close();
    Ok(())
}

fn run_command(mut session: Session, command: &Command) -> Result<()> {
    session
        .transport
        .send_command(command)
        .with_context(|| format!("Failed to send '{}'", command))?;

    // Give the datagram transport a chance to see the ack or retry once
    if session.kind == TransportKind::Udp {
        let settle = session.retransmit_delay * 2;
        session.run_until(Instant::now() + settle, false)?;
    }

    let status = session.request_status()?;
    session.print_status(&status)?;
    session.close();
    Ok(())
}

/// Forward stdin lines to a channel. The channel disconnects at EOF.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("⚠️ Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn run_watch(mut session: Session) -> Result<()> {
    let lines = spawn_stdin_reader();
    let mut printed = None;
    if let Some(status) = session.last_status {
        session.print_if_changed(&status, &mut printed)?;
    }

    // The stream transport has no keepalive, so refresh explicitly
    let mut next_refresh = Instant::now() + session.update_interval;

    loop {
        let limit = match session.kind {
            TransportKind::Tcp => next_refresh,
            TransportKind::Udp => Instant::now() + session.update_interval,
        };

        match session.next_input(&lines, limit) {
            Input::Event(TransportEvent::StatusUpdate(status)) => {
                session.last_status = Some(status);
                session.print_if_changed(&status, &mut printed)?;
            }
            Input::Event(event) => session.handle_event(event)?,
            Input::Line(_) => {}
            Input::InputClosed => break,
            Input::Tick => {
                session.poll()?;
                if session.kind == TransportKind::Tcp && Instant::now() >= next_refresh {
                    session
                        .transport
                        .send_command(&Command::status())
                        .context("Failed to refresh status")?;
                    next_refresh = Instant::now() + session.update_interval;
                }
            }
        }
    }

    session.close();
    Ok(())
}

fn run_shell(mut session: Session) -> Result<()> {
    let lines = spawn_stdin_reader();
    if let Some(status) = session.last_status {
        session.print_status(&status)?;
    }

    loop {
        let limit = Instant::now() + session.update_interval;
        match session.next_input(&lines, limit) {
            Input::Event(TransportEvent::StatusUpdate(status)) => {
                // Keepalive replies are not worth printing unless something changed
                if session.last_status != Some(status) {
                    session.print_status(&status)?;
                }
                session.last_status = Some(status);
            }
            Input::Event(event) => session.handle_event(event)?,
            Input::Line(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                match Command::from_str(line) {
                    Ok(command) => {
                        // Failures are reported as error events
                        if session.transport.send_command(&command).is_err()
                            && !session.transport.is_connected()
                        {
                            bail!("Connection to server lost");
                        }
                    }
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            Input::InputClosed => break,
            Input::Tick => session.poll()?,
        }
    }

    session.close();
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("Starting volctl with args: {:?}", args);

    let mut config = ClientConfig::load().context("Failed to load configuration")?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(transport) = args.transport {
        config.transport = transport;
    }

    let session = Session::open(&config, args.json)?;

    match &args.command {
        CliCommand::Status => run_status(session),
        CliCommand::Watch => run_watch(session),
        CliCommand::Shell => run_shell(session),
        other => match other.to_command() {
            Some(command) => run_command(session, &command),
            None => bail!("Nothing to send for {:?}", other),
        },
    }
}
