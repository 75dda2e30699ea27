use std::time::Duration;

/// Keepalive defaults
pub const DEFAULT_UPDATE_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PING_MISSES_BEFORE_DISCONNECT: u32 = 5;

/// Retransmission defaults
pub const DEFAULT_RETRANSMIT_DELAY_MS: u64 = 300;
pub const DEFAULT_MAX_RETRANSMITS: u32 = 5;

/// How long the datagram transport waits for the connect probe to be answered
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Bound on every blocking wait of the stream transport
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 10;

/// Datagram transport timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatagramConfig {
    /// How often the server is pinged with a status probe
    pub update_interval: Duration,
    /// Unanswered probes tolerated before the link is declared dead
    pub ping_misses_before_disconnect: u32,
    /// Delay between a command and its retransmission check.
    /// Should be shorter than `update_interval`.
    pub retransmit_delay: Duration,
    /// Retransmissions attempted for a command before giving up silently
    pub max_retransmits: u32,
    pub connect_timeout: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(DEFAULT_UPDATE_INTERVAL_MS),
            ping_misses_before_disconnect: DEFAULT_PING_MISSES_BEFORE_DISCONNECT,
            retransmit_delay: Duration::from_millis(DEFAULT_RETRANSMIT_DELAY_MS),
            max_retransmits: DEFAULT_MAX_RETRANSMITS,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl DatagramConfig {
    /// Time from the last status reply until the link is dropped. The first
    /// probe goes out one interval in, and the check that gives up runs one
    /// interval after the last tolerated miss.
    pub fn link_timeout(&self) -> Duration {
        self.update_interval * (self.ping_misses_before_disconnect + 2)
    }
}

/// Stream transport timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Bound for connecting, flushing a command and waiting for its reply
    pub io_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
        }
    }
}

/// Settings for both transport variants
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub stream: StreamConfig,
    pub datagram: DatagramConfig,
}
