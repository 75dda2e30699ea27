use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Longest command text the server accepts: verb, channel and level joined by
/// single spaces, without the trailing newline or the datagram sequence prefix.
pub const MAX_COMMAND_LEN: usize = 127;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("Unknown command: {0}")]
    UnknownVerb(String),

    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    #[error("Too many arguments in command: {0}")]
    TooManyArguments(String),

    #[error("Empty command")]
    Empty,
}

/// Commands understood by the volume server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Verb {
    /// Request the full mixer status. Doubles as the keepalive probe.
    Status,
    /// `set <chan> <0-99>`
    Set,
    /// `mutechan <chan> <0/1>`
    Mutechan,
    /// `mute <0/1>`
    Mute,
    /// `setmaster <0-99>`
    Setmaster,
    /// Ends a stream session, the server answers `CYA`
    Byebye,
    /// `inc <chan>`
    Inc,
    /// `dec <chan>`
    Dec,
    /// `reset`
    Reset,
}

/// A single command to send to the server.
///
/// Pure value: it is encoded to text when sent and never decoded back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: Verb,
    channel: Option<String>,
    level: Option<i32>,
}

impl Command {
    pub fn new(verb: Verb, channel: Option<&str>, level: Option<i32>) -> Self {
        Self {
            verb,
            channel: channel.map(str::to_string),
            level,
        }
    }

    pub fn status() -> Self {
        Self::new(Verb::Status, None, None)
    }

    pub fn set(channel: &str, level: i32) -> Self {
        Self::new(Verb::Set, Some(channel), Some(level))
    }

    pub fn set_master(level: i32) -> Self {
        Self::new(Verb::Setmaster, None, Some(level))
    }

    pub fn mute(muted: bool) -> Self {
        Self::new(Verb::Mute, None, Some(muted as i32))
    }

    pub fn mute_channel(channel: &str, muted: bool) -> Self {
        Self::new(Verb::Mutechan, Some(channel), Some(muted as i32))
    }

    pub fn inc(channel: &str) -> Self {
        Self::new(Verb::Inc, Some(channel), None)
    }

    pub fn dec(channel: &str) -> Self {
        Self::new(Verb::Dec, Some(channel), None)
    }

    pub fn reset() -> Self {
        Self::new(Verb::Reset, None, None)
    }

    pub fn byebye() -> Self {
        Self::new(Verb::Byebye, None, None)
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn level(&self) -> Option<i32> {
        self.level
    }

    /// Probes (`status`) are sequenced separately and never retransmitted
    pub fn is_probe(&self) -> bool {
        self.verb == Verb::Status
    }

    /// Command text without the trailing newline: `<verb>[ <channel>][ <level>]`
    pub fn text(&self) -> Result<String, CommandError> {
        let mut text = String::from(self.verb.as_ref());

        if let Some(channel) = &self.channel {
            if channel.is_empty() || channel.chars().any(char::is_whitespace) {
                return Err(CommandError::InvalidChannel(channel.clone()));
            }
            text.push(' ');
            text.push_str(channel);
        }

        if let Some(level) = self.level {
            text.push(' ');
            text.push_str(&level.to_string());
        }

        if text.len() > MAX_COMMAND_LEN {
            return Err(CommandError::TooLong {
                len: text.len(),
                max: MAX_COMMAND_LEN,
            });
        }

        Ok(text)
    }

    /// Encode as a stream line: `<verb>[ <channel>][ <level>]\n`
    pub fn encode(&self) -> Result<String, CommandError> {
        let mut line = self.text()?;
        line.push('\n');
        Ok(line)
    }

    /// Encode as a datagram payload: `<seq> <verb>[ <channel>][ <level>]\n`
    pub fn encode_sequenced(&self, seq: u64) -> Result<Vec<u8>, CommandError> {
        let line = self.encode()?;
        Ok(format!("{} {}", seq, line).into_bytes())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;
        if let Some(channel) = &self.channel {
            write!(f, " {}", channel)?;
        }
        if let Some(level) = self.level {
            write!(f, " {}", level)?;
        }
        Ok(())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    /// Parse a user-entered line such as `set F 40`, `mute 1` or `status`.
    ///
    /// A lone integer argument is taken as the level, anything else as the channel.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let verb_token = tokens.next().ok_or(CommandError::Empty)?;
        let verb = Verb::from_str(&verb_token.to_ascii_lowercase())
            .map_err(|_| CommandError::UnknownVerb(verb_token.to_string()))?;

        let args: Vec<&str> = tokens.collect();
        let (channel, level) = match args.as_slice() {
            [] => (None, None),
            [only] => match only.parse::<i32>() {
                Ok(level) => (None, Some(level)),
                Err(_) => (Some(*only), None),
            },
            [channel, level] => {
                let level = level
                    .parse::<i32>()
                    .map_err(|_| CommandError::InvalidLevel(level.to_string()))?;
                (Some(*channel), Some(level))
            }
            _ => return Err(CommandError::TooManyArguments(line.trim().to_string())),
        };

        let command = Command::new(verb, channel, level);
        // Reject over-long input up front rather than at send time
        command.text()?;
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_encode_token_order() {
        assert_eq!(Command::status().encode().unwrap(), "status\n");
        assert_eq!(Command::set("F", 40).encode().unwrap(), "set F 40\n");
        assert_eq!(Command::set_master(99).encode().unwrap(), "setmaster 99\n");
        assert_eq!(Command::mute(true).encode().unwrap(), "mute 1\n");
        assert_eq!(
            Command::mute_channel("CENSUB", false).encode().unwrap(),
            "mutechan CENSUB 0\n"
        );
        assert_eq!(Command::inc("RL").encode().unwrap(), "inc RL\n");
        assert_eq!(Command::byebye().encode().unwrap(), "byebye\n");
    }

    #[test]
    fn test_encode_sequenced_prefix() {
        let payload = Command::set("R", 7).encode_sequenced(42).unwrap();
        assert_eq!(payload, b"42 set R 7\n");

        let probe = Command::status().encode_sequenced(1).unwrap();
        assert_eq!(probe, b"1 status\n");
    }

    #[test]
    fn test_verb_names_are_lowercase_wire_tokens() {
        let names: Vec<String> = Verb::iter().map(|v| v.to_string()).collect();
        assert_eq!(
            names,
            vec!["status", "set", "mutechan", "mute", "setmaster", "byebye", "inc", "dec", "reset"]
        );
    }

    #[test]
    fn test_rejects_long_commands() {
        let channel = "X".repeat(MAX_COMMAND_LEN);
        let err = Command::set(&channel, 1).encode().unwrap_err();
        assert!(matches!(err, CommandError::TooLong { max: MAX_COMMAND_LEN, .. }));

        // Exactly at the limit is fine: "set " + channel + " 1"
        let channel = "X".repeat(MAX_COMMAND_LEN - "set  1".len());
        let text = Command::set(&channel, 1).text().unwrap();
        assert_eq!(text.len(), MAX_COMMAND_LEN);
    }

    #[test]
    fn test_rejects_bad_channel_names() {
        assert_eq!(
            Command::set("F L", 10).text(),
            Err(CommandError::InvalidChannel("F L".to_string()))
        );
        assert!(Command::set("", 10).text().is_err());
    }

    #[test]
    fn test_parse_user_lines() {
        assert_eq!("status".parse::<Command>().unwrap(), Command::status());
        assert_eq!("set F 40".parse::<Command>().unwrap(), Command::set("F", 40));
        assert_eq!("  MUTE 1 ".parse::<Command>().unwrap(), Command::mute(true));
        assert_eq!("inc SUB".parse::<Command>().unwrap(), Command::inc("SUB"));
        assert_eq!(
            "setmaster 12".parse::<Command>().unwrap(),
            Command::set_master(12)
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!(
            "louder F".parse::<Command>(),
            Err(CommandError::UnknownVerb("louder".to_string()))
        );
        assert_eq!(
            "set F loud".parse::<Command>(),
            Err(CommandError::InvalidLevel("loud".to_string()))
        );
        assert!(matches!(
            "set F 1 2".parse::<Command>(),
            Err(CommandError::TooManyArguments(_))
        ));
    }

    #[test]
    fn test_probe_detection() {
        assert!(Command::status().is_probe());
        assert!(!Command::set("F", 1).is_probe());
        assert!(!Command::byebye().is_probe());
    }
}
