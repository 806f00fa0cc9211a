use lazy_static::lazy_static;
use regex::Regex;

use crate::error::AckError;
use crate::MpdError;

// Helper module for parsing MPD's string values
pub mod mpd_parse {
    pub fn parse_float(s: &str) -> f64 {
        s.trim().parse::<f64>().unwrap_or(0.0)
    }

    pub fn parse_int(s: &str) -> i64 {
        s.trim().parse::<i64>().unwrap_or(0)
    }

    /// Parses a non-negative index, `None` for anything else (MPD reports -1 or
    /// omits the key when there is no current song).
    pub fn parse_index(s: &str) -> Option<usize> {
        s.trim().parse::<usize>().ok()
    }

    /// MPD flags are "0"/"1"
    pub fn parse_bool(s: &str) -> bool {
        s.trim() == "1"
    }

    pub fn format_bool(value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }
}

lazy_static! {
    static ref ACK_RE: Regex = Regex::new(r"^ACK \[(\d+)@(\d+)\] \{([^}]*)\} ?(.*)$").unwrap();
    static ref GREETING_RE: Regex = Regex::new(r"^OK MPD (\S+)$").unwrap();
}

/// Parses an `ACK [code@index] {command} message` line.
pub fn parse_ack(line: &str) -> Result<AckError, MpdError> {
    let caps = ACK_RE
        .captures(line)
        .ok_or_else(|| MpdError::InvalidResponse(format!("Malformed ACK line: {}", line)))?;
    Ok(AckError {
        code: caps[1].parse()?,
        command_index: caps[2].parse()?,
        command: caps[3].to_string(),
        message: caps[4].to_string(),
    })
}

/// Extracts the protocol version from the `OK MPD <version>` greeting.
pub fn parse_greeting(line: &str) -> Result<String, MpdError> {
    GREETING_RE
        .captures(line)
        .map(|cap| cap[1].to_string())
        .ok_or_else(|| MpdError::InvalidResponse(format!("Unexpected greeting: {}", line)))
}

/// Splits a `key: value` response line.
pub fn split_pair(line: &str) -> Result<(String, String), MpdError> {
    line.split_once(": ")
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| MpdError::InvalidResponse(format!("Expected 'key: value', got: {}", line)))
}

/// Quotes a command argument, escaping backslashes and double quotes.
pub fn quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
