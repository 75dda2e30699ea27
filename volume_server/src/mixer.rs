use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;
use volume_protocol::{Command, CommandError, ServerStatus, Verb};

pub const MIN_LEVEL: i32 = 0;
pub const MAX_LEVEL: i32 = 99;

/// Reasons a command is refused. The message is sent back after `ERROR `.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MixerError {
    #[error("no such command: {0}")]
    UnknownCommand(String),

    #[error("wrong amount of args")]
    WrongArgCount,

    #[error("bad argument: unknown channel {0}")]
    UnknownChannel(String),

    #[error("bad argument: level {0} out of range 0-99")]
    LevelOutOfRange(i32),

    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl From<CommandError> for MixerError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::UnknownVerb(verb) => MixerError::UnknownCommand(verb),
            CommandError::Empty => MixerError::UnknownCommand(String::new()),
            CommandError::TooManyArguments(_) => MixerError::WrongArgCount,
            CommandError::InvalidLevel(level) => MixerError::BadArgument(level),
            other => MixerError::BadArgument(other.to_string()),
        }
    }
}

/// Physical output channels, in the order the hardware chains them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Channel {
    Fl,
    Fr,
    Sub,
    Cen,
    Rl,
    Rr,
}

impl Channel {
    fn index(self) -> usize {
        self as usize
    }

    /// Resolve a channel or group name (`F`, `R`, `CENSUB`) to its members
    pub fn resolve(name: &str) -> Result<Vec<Channel>, MixerError> {
        match name.to_ascii_uppercase().as_str() {
            "F" => Ok(vec![Channel::Fl, Channel::Fr]),
            "R" => Ok(vec![Channel::Rl, Channel::Rr]),
            "CENSUB" => Ok(vec![Channel::Sub, Channel::Cen]),
            _ => Channel::from_str(name)
                .map(|channel| vec![channel])
                .map_err(|_| MixerError::UnknownChannel(name.to_string())),
        }
    }
}

const CHANNEL_COUNT: usize = 6;

/// Six channel volume controller with a master level and global mute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mixer {
    levels: [i32; CHANNEL_COUNT],
    mutes: [bool; CHANNEL_COUNT],
    master: i32,
    muted: bool,
}

fn check_level(level: i32) -> Result<i32, MixerError> {
    if (MIN_LEVEL..=MAX_LEVEL).contains(&level) {
        Ok(level)
    } else {
        Err(MixerError::LevelOutOfRange(level))
    }
}

fn parse_flag(value: i32) -> Result<bool, MixerError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(MixerError::BadArgument(format!("expected 0 or 1, got {}", other))),
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, channel: Channel) -> i32 {
        self.levels[channel.index()]
    }

    pub fn is_channel_muted(&self, channel: Channel) -> bool {
        self.mutes[channel.index()]
    }

    pub fn master(&self) -> i32 {
        self.master
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_level(&mut self, name: &str, level: i32) -> Result<(), MixerError> {
        let level = check_level(level)?;
        for channel in Channel::resolve(name)? {
            self.levels[channel.index()] = level;
        }
        Ok(())
    }

    pub fn set_channel_mute(&mut self, name: &str, muted: bool) -> Result<(), MixerError> {
        for channel in Channel::resolve(name)? {
            self.mutes[channel.index()] = muted;
        }
        Ok(())
    }

    pub fn set_master(&mut self, level: i32) -> Result<(), MixerError> {
        self.master = check_level(level)?;
        Ok(())
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Step each channel of `name` up by one, stopping at the maximum
    pub fn inc(&mut self, name: &str) -> Result<(), MixerError> {
        for channel in Channel::resolve(name)? {
            let level = &mut self.levels[channel.index()];
            *level = (*level + 1).min(MAX_LEVEL);
        }
        Ok(())
    }

    pub fn dec(&mut self, name: &str) -> Result<(), MixerError> {
        for channel in Channel::resolve(name)? {
            let level = &mut self.levels[channel.index()];
            *level = (*level - 1).max(MIN_LEVEL);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current state as reported on the wire. The sub/cen group is reported
    /// sub first, in the slot the other pairs use for their left channel.
    pub fn status(&self) -> ServerStatus {
        let mute = |channel: Channel| self.is_channel_muted(channel) as i32;
        ServerStatus {
            fl_level: self.level(Channel::Fl),
            fr_level: self.level(Channel::Fr),
            fl_mute: mute(Channel::Fl),
            fr_mute: mute(Channel::Fr),
            sub_level: self.level(Channel::Sub),
            cen_level: self.level(Channel::Cen),
            sub_mute: mute(Channel::Sub),
            cen_mute: mute(Channel::Cen),
            rl_level: self.level(Channel::Rl),
            rr_level: self.level(Channel::Rr),
            rl_mute: mute(Channel::Rl),
            rr_mute: mute(Channel::Rr),
            master: self.master,
            global_mute: self.muted as i32,
        }
    }

    /// Parse and execute one command line. `status` and `byebye` change nothing.
    pub fn apply(&mut self, line: &str) -> Result<Verb, MixerError> {
        let command = Command::from_str(line)?;
        let verb = command.verb();

        match (verb, command.channel(), command.level()) {
            (Verb::Status, None, None) | (Verb::Byebye, None, None) => {}
            (Verb::Set, Some(channel), Some(level)) => self.set_level(channel, level)?,
            (Verb::Mutechan, Some(channel), Some(flag)) => {
                self.set_channel_mute(channel, parse_flag(flag)?)?
            }
            (Verb::Mute, None, Some(flag)) => self.set_mute(parse_flag(flag)?),
            (Verb::Setmaster, None, Some(level)) => self.set_master(level)?,
            (Verb::Inc, Some(channel), None) => self.inc(channel)?,
            (Verb::Dec, Some(channel), None) => self.dec(channel)?,
            (Verb::Reset, None, None) => self.reset(),
            _ => return Err(MixerError::WrongArgCount),
        }

        Ok(verb)
    }
}
