// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client error kinds.
//!
//! Errors raised during the conductor's duty cycle are recorded on the
//! affected registration or on the conductor itself and surface on the next
//! user-facing call; errors from user-facing calls are returned immediately.
//! `DriverDead`, `BroadcastLoss`, and `ClientTimeout` are sticky: once set,
//! every subsequent operation fails with that error until the client closes.

use std::fmt;
use std::io;

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug)]
pub enum ClientError {
    /// Bad argument from the caller: malformed channel URI, undersized term
    /// length, oversized default frame header.
    InvalidArgument(String),

    /// The to-driver command ring has no space for the command.
    InsufficientSpace,

    /// The driver did not answer a request within the configured deadline.
    DriverTimeout(String),

    /// The driver's liveness heartbeat lapsed; the client is unusable.
    DriverDead(String),

    /// This client fell behind the to-clients broadcast producer; driver and
    /// client state have diverged.
    BroadcastLoss,

    /// The driver rejected a command.
    DriverError { code: i32, message: String },

    /// The driver expired this client for missing keepalives.
    ClientTimeout,

    /// Operation on a closed client or resource.
    Closed,

    /// Log buffer or command-and-control file I/O failed.
    Io(io::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            Self::InsufficientSpace => write!(f, "Insufficient space in to-driver ring buffer"),
            Self::DriverTimeout(msg) => write!(f, "Driver timeout: {msg}"),
            Self::DriverDead(msg) => write!(f, "Driver is dead: {msg}"),
            Self::BroadcastLoss => {
                write!(f, "Client fell behind the to-clients broadcast buffer")
            }
            Self::DriverError { code, message } => {
                write!(f, "Driver error {code}: {message}")
            }
            Self::ClientTimeout => write!(f, "Client timed out by driver"),
            Self::Closed => write!(f, "Client or resource is closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<crate::concurrent::RingBufferError> for ClientError {
    fn from(e: crate::concurrent::RingBufferError) -> Self {
        use crate::concurrent::RingBufferError;
        match e {
            RingBufferError::InsufficientSpace => Self::InsufficientSpace,
            other => Self::InvalidArgument(other.to_string()),
        }
    }
}
