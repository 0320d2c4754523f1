/* This file is part of ringwatch
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Line protocol.
//!
//! One command per line, tokens separated by whitespace. Replies starting
//! with `+OK` report success, `-ERR` report failure.
//!
//! | command                       | before auth | reply                          |
//! |-------------------------------|-------------|--------------------------------|
//! | `ping`                        | yes         | `pong`                         |
//! | `export vector\|master`       | yes         | `+OK ack vector\|master <json>` |
//! | `quit` / `exit`               | yes         | `+OK bye`, then close          |
//! | `auth <code>`                 | yes         | `+OK ack auth` / `-ERR auth`   |
//! | `get whoami\|hostname\|version` | no        | `+OK ack <field> <value>`      |
//! | `set host <name>`             | no          | `+OK ack host <name>`          |
//! | `set vector <hostname> <json>`| no          | `+OK ack set`                  |
//! | `help`                        | no          | command list, then `+OK`       |

use crate::{Error, Result};

pub const PONG: &str = "pong";
pub const BYE: &str = "+OK bye";
pub const OK: &str = "+OK";
pub const ACK_AUTH: &str = "+OK ack auth";
pub const ACK_SET: &str = "+OK ack set";
pub const ERR_AUTH: &str = "-ERR auth";
pub const ERR_AUTH_REQUIRED: &str = "-ERR auth required";
pub const ERR_SET: &str = "-ERR set";
pub const ERR_SYNTAX: &str = "-ERR syntax";

/// Command grammar as sent in reply to `help`
pub const HELP: &[&str] = &[
    "ping",
    "export {vector|master}",
    "auth {code}",
    "get {whoami|hostname|version}",
    "set host {hostname}",
    "set vector {hostname} {json}",
    "help",
    "quit",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportTarget {
    Vector,
    Master,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    Ping,
    Export(ExportTarget),
    Quit,
    Auth(String),
    GetWhoami,
    GetHostname,
    GetVersion,
    SetHost(String),
    SetVector { hostname: String, payload: String },
    Help,
    /// Known verb with wrong arguments
    Malformed(String),
    Unknown(String),
}

/// Split off the first whitespace-separated token.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None
    }

    match s.find(char::is_whitespace) {
        Some(i) => Some((&s[..i], s[i..].trim_start())),
        None => Some((s, "")),
    }
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let Some((verb, rest)) = next_token(line) else { return Self::Empty };
        let arg = next_token(rest);

        match (verb, arg) {
            ("ping", None) => Self::Ping,
            ("quit" | "exit", None) => Self::Quit,
            ("help", None) => Self::Help,

            ("export", Some(("vector", ""))) => Self::Export(ExportTarget::Vector),
            ("export", Some(("master", ""))) => Self::Export(ExportTarget::Master),

            // The code is the rest of the line and may contain spaces
            ("auth", Some(_)) => Self::Auth(rest.trim_end().to_string()),

            ("get", Some(("whoami", ""))) => Self::GetWhoami,
            ("get", Some(("hostname", ""))) => Self::GetHostname,
            ("get", Some(("version", ""))) => Self::GetVersion,

            ("set", Some(("host", rest))) => match next_token(rest) {
                Some((name, "")) => Self::SetHost(name.to_string()),
                _ => Self::Malformed(line.trim().to_string()),
            },

            ("set", Some(("vector", rest))) => match next_token(rest) {
                Some((hostname, payload)) if !payload.is_empty() => Self::SetVector {
                    hostname: hostname.to_string(),
                    payload: payload.trim_end().to_string(),
                },
                _ => Self::Malformed(line.trim().to_string()),
            },

            ("ping" | "quit" | "exit" | "help" | "export" | "auth" | "get" | "set", _) => {
                Self::Malformed(line.trim().to_string())
            }

            _ => Self::Unknown(line.trim().to_string()),
        }
    }

    /// Commands that are refused until the session has authenticated.
    pub fn requires_auth(&self) -> bool {
        match self {
            Self::GetWhoami |
            Self::GetHostname |
            Self::GetVersion |
            Self::SetHost(_) |
            Self::SetVector { .. } |
            Self::Help => true,
            Self::Malformed(line) => matches!(next_token(line), Some(("get" | "set" | "help", _))),
            _ => false,
        }
    }
}

pub fn auth(code: &str) -> String {
    format!("auth {}", code)
}

pub fn set_host(hostname: &str) -> String {
    format!("set host {}", hostname)
}

pub fn set_vector(hostname: &str, json: &str) -> String {
    format!("set vector {} {}", hostname, json)
}

pub fn ack(field: &str, value: &str) -> String {
    format!("+OK ack {} {}", field, value)
}

/// Extract the value of a `+OK ack <field> [value]` reply.
pub fn parse_ack<'a>(line: &'a str, field: &str) -> Result<&'a str> {
    let unexpected = || Error::UnexpectedReply(line.to_string());

    let rest = line.trim().strip_prefix("+OK ack").ok_or_else(unexpected)?;
    match next_token(rest) {
        Some((f, value)) if f == field => Ok(value),
        _ => Err(unexpected()),
    }
}

/// Check the reply to `auth <code>`.
pub fn expect_auth(line: &str) -> Result<()> {
    match line.trim() {
        ACK_AUTH => Ok(()),
        ERR_AUTH => Err(Error::AuthRejected),
        _ => Err(Error::UnexpectedReply(line.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_commands() {
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("ping"), Command::Ping);
        assert_eq!(Command::parse("exit"), Command::Quit);
        assert_eq!(Command::parse("export master"), Command::Export(ExportTarget::Master));
        assert_eq!(Command::parse("auth  secret "), Command::Auth("secret".into()));
        assert_eq!(Command::parse("auth open sesame"), Command::Auth("open sesame".into()));
        assert_eq!(Command::parse("get version"), Command::GetVersion);
        assert_eq!(Command::parse("set host node-a"), Command::SetHost("node-a".into()));
        assert_eq!(
            Command::parse("set vector node-a [{\"sectors\": [\"a b\"]}]"),
            Command::SetVector {
                hostname: "node-a".into(),
                payload: "[{\"sectors\": [\"a b\"]}]".into()
            }
        );
        assert_eq!(Command::parse("dance"), Command::Unknown("dance".into()));
    }

    #[test]
    fn malformed_commands() {
        for line in ["set host", "set vector node-a", "export", "export all", "auth", "get", "ping x"] {
            assert!(matches!(Command::parse(line), Command::Malformed(_)), "{}", line);
        }
    }

    #[test]
    fn auth_requirements() {
        assert!(!Command::parse("ping").requires_auth());
        assert!(!Command::parse("export vector").requires_auth());
        assert!(!Command::parse("auth x").requires_auth());
        assert!(!Command::parse("quit").requires_auth());
        assert!(!Command::parse("export").requires_auth());
        assert!(!Command::parse("dance").requires_auth());
        assert!(Command::parse("help").requires_auth());
        assert!(Command::parse("get whoami").requires_auth());
        assert!(Command::parse("set host").requires_auth());
        assert!(Command::parse("set vector a []").requires_auth());
    }

    #[test]
    fn ack_replies() {
        assert_eq!(parse_ack(&ack("hostname", "node-b"), "hostname").unwrap(), "node-b");
        assert_eq!(parse_ack("+OK ack set", "set").unwrap(), "");
        assert!(parse_ack("+OK ack host x", "hostname").is_err());
        assert!(parse_ack("-ERR auth required", "host").is_err());

        assert!(expect_auth(ACK_AUTH).is_ok());
        assert!(matches!(expect_auth(ERR_AUTH), Err(Error::AuthRejected)));
        assert!(matches!(expect_auth("pong"), Err(Error::UnexpectedReply(_))));
    }
}
