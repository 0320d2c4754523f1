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

/// Result type used throughout the codebase
pub type Result<T> = std::result::Result<T, Error>;

/// General library errors used throughout the codebase
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    // ==============
    // Parsing errors
    // ==============
    #[error("serde_json error: {0}")]
    SerdeJsonError(String),

    #[error("TOML error: {0}")]
    TomlDeserializeError(String),

    #[error(transparent)]
    Utf8Error(#[from] std::string::FromUtf8Error),

    // ======================
    // Network-related errors
    // ======================
    #[error("Unsupported network transport: {0}")]
    UnsupportedTransport(String),

    #[error("Connection timed out")]
    ConnectTimeout,

    #[error("Timed out waiting for a reply")]
    ReplyTimeout,

    #[error("Create listener bound to {0} failed")]
    BindFailed(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Mail delivery failed: {0}")]
    MailError(String),

    // ===============
    // Protocol errors
    // ===============
    #[error("Line exceeds the maximum allowed length")]
    LineTooLong,

    #[error("Too many consecutive empty lines")]
    TooManyEmptyLines,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Authentication rejected by peer")]
    AuthRejected,

    #[error("Peer acknowledged a different hostname: {0}")]
    HostnameMismatch(String),

    #[error("No master server is reachable")]
    MasterUnreachable,

    #[error("No master servers configured")]
    NoMasterServers,

    // ====================
    // Configuration errors
    // ====================
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // =============
    // System errors
    // =============
    #[error("IO error: {0:?}")]
    Io(std::io::ErrorKind),

    #[error("Detached task stopped")]
    DetachedTaskStopped,

    #[error("Agent is already running")]
    AgentAlreadyRunning,

    #[error("Logger initialization failed")]
    SetLoggerError,

    #[error("async_channel receiver error: {0}")]
    AsyncChannelRecvError(String),

    #[error("async_channel sender error: {0}")]
    AsyncChannelSendError(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeJsonError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::TomlDeserializeError(err.to_string())
    }
}

impl From<log::SetLoggerError> for Error {
    fn from(_err: log::SetLoggerError) -> Self {
        Self::SetLoggerError
    }
}

impl From<smol::channel::RecvError> for Error {
    fn from(err: smol::channel::RecvError) -> Self {
        Self::AsyncChannelRecvError(err.to_string())
    }
}

impl<T> From<smol::channel::SendError<T>> for Error {
    fn from(err: smol::channel::SendError<T>) -> Self {
        Self::AsyncChannelSendError(err.to_string())
    }
}
