use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A status line that did not match the fixed grammar.
///
/// Carries the offending line with its whitespace normalised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Couldn't parse server message: {line}")]
pub struct ParseError {
    pub line: String,
}

impl ParseError {
    fn new(raw: &str) -> Self {
        Self {
            line: raw.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }
}

/// Mixer state reported by the server.
///
/// Levels are 0-99, mutes are 0/1 as echoed by the server. The server reports
/// the sub/cen pair as (sub, cen) in the position other pairs use for (left,
/// right), so group 1 of the status line maps to sub first. That ordering is
/// part of the protocol and is kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct ServerStatus {
    pub fl_level: i32,
    pub fr_level: i32,
    pub fl_mute: i32,
    pub fr_mute: i32,
    pub sub_level: i32,
    pub cen_level: i32,
    pub sub_mute: i32,
    pub cen_mute: i32,
    pub rl_level: i32,
    pub rr_level: i32,
    pub rl_mute: i32,
    pub rr_mute: i32,
    pub master: i32,
    pub global_mute: i32,
}

/// Number of integers carried by a status line
pub const STATUS_FIELD_COUNT: usize = 14;

enum Token {
    Lit(&'static str),
    Int,
}

use Token::{Int, Lit};

/// `OK 0: ( a , b , c , d ) ; 1: ( e , f , g , h ) ; 2: ( i , j , k , l ) ; Master: m Mute: n`
#[rustfmt::skip]
const STATUS_GRAMMAR: &[Token] = &[
    Lit("OK"),
    Lit("0:"), Lit("("), Int, Lit(","), Int, Lit(","), Int, Lit(","), Int, Lit(")"), Lit(";"),
    Lit("1:"), Lit("("), Int, Lit(","), Int, Lit(","), Int, Lit(","), Int, Lit(")"), Lit(";"),
    Lit("2:"), Lit("("), Int, Lit(","), Int, Lit(","), Int, Lit(","), Int, Lit(")"), Lit(";"),
    Lit("Master:"), Int,
    Lit("Mute:"), Int,
];

impl ServerStatus {
    /// Build from the 14 integers in wire order
    pub fn from_fields(f: [i32; STATUS_FIELD_COUNT]) -> Self {
        Self {
            fl_level: f[0],
            fr_level: f[1],
            fl_mute: f[2],
            fr_mute: f[3],
            sub_level: f[4],
            cen_level: f[5],
            sub_mute: f[6],
            cen_mute: f[7],
            rl_level: f[8],
            rr_level: f[9],
            rl_mute: f[10],
            rr_mute: f[11],
            master: f[12],
            global_mute: f[13],
        }
    }

    /// The 14 integers in wire order
    pub fn fields(&self) -> [i32; STATUS_FIELD_COUNT] {
        [
            self.fl_level,
            self.fr_level,
            self.fl_mute,
            self.fr_mute,
            self.sub_level,
            self.cen_level,
            self.sub_mute,
            self.cen_mute,
            self.rl_level,
            self.rr_level,
            self.rl_mute,
            self.rr_mute,
            self.master,
            self.global_mute,
        ]
    }

    /// Parse a status line. Fails without side effects on any deviation.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != STATUS_GRAMMAR.len() {
            return Err(ParseError::new(line));
        }

        let mut fields = [0i32; STATUS_FIELD_COUNT];
        let mut next_field = 0;

        for (token, expected) in tokens.iter().zip(STATUS_GRAMMAR) {
            match expected {
                Lit(literal) if token == literal => {}
                Lit(_) => return Err(ParseError::new(line)),
                Int => {
                    fields[next_field] = token.parse().map_err(|_| ParseError::new(line))?;
                    next_field += 1;
                }
            }
        }

        Ok(Self::from_fields(fields))
    }

    /// Render in the exact wire grammar, without a trailing newline
    pub fn to_wire(&self) -> String {
        let f = self.fields();
        format!(
            "OK 0: ( {} , {} , {} , {} ) ; 1: ( {} , {} , {} , {} ) ; 2: ( {} , {} , {} , {} ) ; Master: {} Mute: {}",
            f[0], f[1], f[2], f[3], f[4], f[5], f[6], f[7], f[8], f[9], f[10], f[11], f[12], f[13]
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |muted: i32| if muted != 0 { " (muted)" } else { "" };
        writeln!(
            f,
            "front   L {:>2}{}  R {:>2}{}",
            self.fl_level,
            mark(self.fl_mute),
            self.fr_level,
            mark(self.fr_mute)
        )?;
        writeln!(
            f,
            "sub/cen S {:>2}{}  C {:>2}{}",
            self.sub_level,
            mark(self.sub_mute),
            self.cen_level,
            mark(self.cen_mute)
        )?;
        writeln!(
            f,
            "rear    L {:>2}{}  R {:>2}{}",
            self.rl_level,
            mark(self.rl_mute),
            self.rr_level,
            mark(self.rr_mute)
        )?;
        write!(f, "master    {:>2}{}", self.master, mark(self.global_mute))
    }
}

/// Classification of a single inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<'a> {
    /// `ERROR<rest>`, carries everything after the literal token
    Error(&'a str),
    /// `ACK<seq>` (datagram transport only)
    Ack(u64),
    /// Line starting with `OK`, still to be parsed
    Status(&'a str),
    /// Anything else
    Unknown(&'a str),
}

impl<'a> Reply<'a> {
    pub fn classify(line: &'a str) -> Self {
        if let Some(rest) = line.strip_prefix("ERROR") {
            Reply::Error(rest)
        } else if let Some(rest) = line.strip_prefix("ACK") {
            match rest.trim().parse::<u64>() {
                Ok(seq) => Reply::Ack(seq),
                Err(_) => Reply::Unknown(line),
            }
        } else if line.starts_with("OK") {
            Reply::Status(line)
        } else {
            Reply::Unknown(line)
        }
    }
}

/// Turn a raw datagram into a line: cut at the first NUL, strip trailing whitespace
pub fn datagram_line(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str =
        "OK 0: ( 10 , 20 , 0 , 1 ) ; 1: ( 5 , 6 , 0 , 0 ) ; 2: ( 7 , 8 , 1 , 0 ) ; Master: 99 Mute: 0";

    #[test]
    fn test_parse_example_line() {
        let status = ServerStatus::parse(EXAMPLE).unwrap();

        assert_eq!((status.fl_level, status.fr_level), (10, 20));
        assert_eq!((status.fl_mute, status.fr_mute), (0, 1));
        assert_eq!((status.sub_level, status.cen_level), (5, 6));
        assert_eq!((status.sub_mute, status.cen_mute), (0, 0));
        assert_eq!((status.rl_level, status.rr_level), (7, 8));
        assert_eq!((status.rl_mute, status.rr_mute), (1, 0));
        assert_eq!(status.master, 99);
        assert_eq!(status.global_mute, 0);
    }

    #[test]
    fn test_wire_round_trip_keeps_sub_cen_order() {
        let samples = [
            [0; STATUS_FIELD_COUNT],
            [99, 98, 1, 0, 11, 22, 1, 0, 33, 44, 0, 1, 55, 1],
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14],
        ];

        for fields in samples {
            let status = ServerStatus::from_fields(fields);
            let parsed = ServerStatus::parse(&status.to_wire()).unwrap();
            assert_eq!(parsed, status);
            assert_eq!(parsed.sub_level, fields[4]);
            assert_eq!(parsed.cen_level, fields[5]);
        }
    }

    #[test]
    fn test_parse_tolerates_trailing_newline() {
        let line = format!("{}\r\n", EXAMPLE);
        assert!(ServerStatus::parse(&line).is_ok());
    }

    #[test]
    fn test_wrong_integer_count_fails() {
        let line =
            "OK 0: ( 10 , 20 , 0 ) ; 1: ( 5 , 6 , 0 , 0 ) ; 2: ( 7 , 8 , 1 , 0 ) ; Master: 99 Mute: 0";
        let err = ServerStatus::parse(line).unwrap_err();
        assert_eq!(err.line, line);

        let line = format!("{} 5", EXAMPLE);
        assert!(ServerStatus::parse(&line).is_err());
    }

    #[test]
    fn test_wrong_token_shape_fails() {
        let cases = [
            EXAMPLE.replace("Master:", "Main:"),
            EXAMPLE.replace("( 10 ,", "(10 ,"),
            EXAMPLE.replace("99", "loud"),
            EXAMPLE.replace(" ; 2:", " , 2:"),
            EXAMPLE.replace("OK", "KO"),
        ];
        for line in cases {
            assert!(ServerStatus::parse(&line).is_err(), "accepted: {}", line);
        }
    }

    #[test]
    fn test_parse_error_normalises_whitespace() {
        let err = ServerStatus::parse("OK   garbage\n\there ").unwrap_err();
        assert_eq!(err.line, "OK garbage here");
        assert_eq!(err.to_string(), "Couldn't parse server message: OK garbage here");
    }

    #[test]
    fn test_classify_lines() {
        assert_eq!(Reply::classify("ERROR no such command"), Reply::Error(" no such command"));
        assert_eq!(Reply::classify("ERRORx"), Reply::Error("x"));
        assert_eq!(Reply::classify("ACK 17"), Reply::Ack(17));
        assert_eq!(Reply::classify("ACK17"), Reply::Ack(17));
        assert_eq!(Reply::classify("ACK what"), Reply::Unknown("ACK what"));
        assert_eq!(Reply::classify(EXAMPLE), Reply::Status(EXAMPLE));
        assert_eq!(Reply::classify("CYA"), Reply::Unknown("CYA"));
    }

    #[test]
    fn test_datagram_line_stops_at_nul() {
        assert_eq!(datagram_line(b"ACK 3\n\0garbage"), "ACK 3");
        assert_eq!(datagram_line(b"ERROR bad\r\n"), "ERROR bad");
        assert_eq!(datagram_line(b""), "");
    }

    #[test]
    fn test_status_serializes_to_json() {
        let status = ServerStatus::parse(EXAMPLE).unwrap();
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["master"], 99);
        assert_eq!(json["sub_level"], 5);
    }
}
