// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::borrow::Cow;
use std::fmt;
use std::io::{self, ErrorKind};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(Cow<'static, str>),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    /// buffer errors
    #[error("buffer underflow: requested {requested} bytes, {readable} readable")]
    Underflow { requested: usize, readable: usize },

    /// frame errors
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("checksum mismatch: expected {expected}, actual {actual}")]
    ChecksumMismatch { expected: i32, actual: i32 },

    /// marker error
    #[error("incomplete frame")]
    Incomplete,

    /// connection errors, terminal for the current session
    #[error("{kind}: {source}")]
    Connection {
        kind: ConnectionErrorKind,
        #[source]
        source: io::Error,
    },
}

impl AppError {
    /// Wraps an I/O failure observed on a session, classifying it for the error callback.
    pub fn connection(source: io::Error) -> Self {
        AppError::Connection {
            kind: ConnectionErrorKind::classify(&source),
            source,
        }
    }

    pub fn connection_with(kind: ConnectionErrorKind, message: &'static str) -> Self {
        AppError::Connection {
            kind,
            source: io::Error::new(kind.io_kind(), message),
        }
    }

    /// Human readable category used as the `message` argument of `on_error`.
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Connection { kind, .. } => kind.category(),
            AppError::Underflow { .. } => "buffer underflow",
            AppError::InvalidFrame(_) | AppError::ChecksumMismatch { .. } => "invalid frame",
            AppError::ConfigFileError(_) | AppError::InvalidValue(_) => "bad configuration",
            AppError::IllegalStateError(_) => "illegal state",
            AppError::IoError(e) => ConnectionErrorKind::classify(e).category(),
            AppError::Incomplete => "incomplete frame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// a write was attempted before the session reached `Connected`
    NotYetConnected,
    ConnectRefused,
    ClosedByPeer,
    /// the session was interrupted by `stop_connect`
    ClosedByInterrupt,
    ChannelClosed,
    /// the connect attempt finished without producing a connection
    NoPendingConnection,
    /// the session was cancelled by the heartbeat staleness check
    CancelledRegistration,
    Other,
}

impl ConnectionErrorKind {
    pub fn classify(error: &io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotConnected => ConnectionErrorKind::NotYetConnected,
            ErrorKind::ConnectionRefused => ConnectionErrorKind::ConnectRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => {
                ConnectionErrorKind::ClosedByPeer
            }
            ErrorKind::Interrupted => ConnectionErrorKind::ClosedByInterrupt,
            ErrorKind::BrokenPipe => ConnectionErrorKind::ChannelClosed,
            ErrorKind::TimedOut | ErrorKind::AddrNotAvailable => {
                ConnectionErrorKind::NoPendingConnection
            }
            _ => ConnectionErrorKind::Other,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            ConnectionErrorKind::NotYetConnected => "not yet connected, request issued too early",
            ConnectionErrorKind::ConnectRefused => "connect refused",
            ConnectionErrorKind::ClosedByPeer => "connection closed by peer",
            ConnectionErrorKind::ClosedByInterrupt => "connection interrupted",
            ConnectionErrorKind::ChannelClosed => "connection channel closed",
            ConnectionErrorKind::NoPendingConnection => {
                "no pending connection, operation not allowed before connect"
            }
            ConnectionErrorKind::CancelledRegistration => "registration cancelled",
            ConnectionErrorKind::Other => "unknown connection error",
        }
    }

    fn io_kind(&self) -> ErrorKind {
        match self {
            ConnectionErrorKind::NotYetConnected => ErrorKind::NotConnected,
            ConnectionErrorKind::ConnectRefused => ErrorKind::ConnectionRefused,
            ConnectionErrorKind::ClosedByPeer => ErrorKind::UnexpectedEof,
            ConnectionErrorKind::ClosedByInterrupt => ErrorKind::Interrupted,
            ConnectionErrorKind::ChannelClosed => ErrorKind::BrokenPipe,
            ConnectionErrorKind::NoPendingConnection => ErrorKind::TimedOut,
            ConnectionErrorKind::CancelledRegistration | ConnectionErrorKind::Other => {
                ErrorKind::Other
            }
        }
    }
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.category())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let refused = io::Error::new(ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            ConnectionErrorKind::classify(&refused),
            ConnectionErrorKind::ConnectRefused
        );
        let reset = io::Error::new(ErrorKind::ConnectionReset, "reset");
        assert_eq!(
            ConnectionErrorKind::classify(&reset),
            ConnectionErrorKind::ClosedByPeer
        );
        let not_connected = io::Error::new(ErrorKind::NotConnected, "early");
        assert_eq!(
            ConnectionErrorKind::classify(&not_connected),
            ConnectionErrorKind::NotYetConnected
        );
        let weird = io::Error::new(ErrorKind::InvalidData, "?");
        assert_eq!(ConnectionErrorKind::classify(&weird), ConnectionErrorKind::Other);
    }

    #[test]
    fn test_constructed_kind_round_trips_through_classify() {
        for kind in [
            ConnectionErrorKind::NotYetConnected,
            ConnectionErrorKind::ConnectRefused,
            ConnectionErrorKind::ClosedByPeer,
            ConnectionErrorKind::ClosedByInterrupt,
            ConnectionErrorKind::ChannelClosed,
            ConnectionErrorKind::NoPendingConnection,
        ] {
            let err = AppError::connection_with(kind, "test");
            match &err {
                AppError::Connection { kind: k, source } => {
                    assert_eq!(*k, kind);
                    assert_eq!(ConnectionErrorKind::classify(source), kind);
                }
                other => panic!("unexpected error {other:?}"),
            }
            assert_eq!(err.category(), kind.category());
        }
    }
}
