// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire frames exchanged with the driver.
//!
//! Commands travel client -> driver on the ring buffer; events travel
//! driver -> clients on the broadcast buffer. Frames are native-endian, fields in
//! declaration order; strings and byte blobs are 32-bit-length-prefixed and
//! 4-byte aligned. The type ids are the wire contract and must not change.

use crate::error::{ClientError, Result};
use crate::util::bit::align;

/// Command type ids (to-driver ring buffer).
pub mod command_type {
    pub const ADD_PUBLICATION: i32 = 0x01;
    pub const REMOVE_PUBLICATION: i32 = 0x02;
    pub const ADD_SUBSCRIPTION: i32 = 0x04;
    pub const REMOVE_SUBSCRIPTION: i32 = 0x05;
    pub const CLIENT_KEEPALIVE: i32 = 0x06;
    pub const ADD_EXCLUSIVE_PUBLICATION: i32 = 0x09;
    pub const ADD_COUNTER: i32 = 0x0D;
    pub const REMOVE_COUNTER: i32 = 0x0E;
}

/// Event type ids (to-clients broadcast buffer).
pub mod response_type {
    pub const ON_ERROR: i32 = 0x0F01;
    pub const ON_AVAILABLE_IMAGE: i32 = 0x0F02;
    pub const ON_PUBLICATION_READY: i32 = 0x0F03;
    pub const ON_OPERATION_SUCCESS: i32 = 0x0F04;
    pub const ON_UNAVAILABLE_IMAGE: i32 = 0x0F05;
    pub const ON_EXCLUSIVE_PUBLICATION_READY: i32 = 0x0F06;
    pub const ON_SUBSCRIPTION_READY: i32 = 0x0F07;
    pub const ON_COUNTER_READY: i32 = 0x0F08;
    pub const ON_UNAVAILABLE_COUNTER: i32 = 0x0F09;
    pub const ON_CLIENT_TIMEOUT: i32 = 0x0F0A;
}

/// Error codes carried by `ON_ERROR` events.
pub mod error_code {
    pub const GENERIC_ERROR: i32 = 0;
    pub const INVALID_CHANNEL: i32 = 1;
    pub const UNKNOWN_SUBSCRIPTION: i32 = 2;
    pub const UNKNOWN_PUBLICATION: i32 = 3;
}

fn truncated(what: &str) -> ClientError {
    ClientError::InvalidArgument(format!("Truncated {what} frame"))
}

fn read_i32(buf: &[u8], offset: usize, what: &str) -> Result<i32> {
    let bytes = buf.get(offset..offset + 4).ok_or_else(|| truncated(what))?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    Ok(i32::from_ne_bytes(raw))
}

fn read_i64(buf: &[u8], offset: usize, what: &str) -> Result<i64> {
    let bytes = buf.get(offset..offset + 8).ok_or_else(|| truncated(what))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_ne_bytes(raw))
}

/// Read a 32-bit-length-prefixed string, returning it and the offset of the
/// next field (4-byte aligned).
fn read_string(buf: &[u8], offset: usize, what: &str) -> Result<(String, usize)> {
    let length = read_i32(buf, offset, what)?;
    if length < 0 {
        return Err(truncated(what));
    }
    let start = offset + 4;
    let end = start + length as usize;
    let bytes = buf.get(start..end).ok_or_else(|| truncated(what))?;
    Ok((
        String::from_utf8_lossy(bytes).into_owned(),
        align(end, 4),
    ))
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn put_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    put_i32(out, bytes.len() as i32);
    out.extend_from_slice(bytes);
    while out.len() % 4 != 0 {
        out.push(0);
    }
}

/// Fixed header shared by every command: the issuing client and the
/// correlation id linking the command to its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatedCommand {
    pub client_id: i64,
    pub correlation_id: i64,
}

impl CorrelatedCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.client_id);
        put_i64(out, self.correlation_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            client_id: read_i64(buf, 0, "correlated command")?,
            correlation_id: read_i64(buf, 8, "correlated command")?,
        })
    }
}

/// `ADD_PUBLICATION` / `ADD_EXCLUSIVE_PUBLICATION` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationCommand {
    pub correlated: CorrelatedCommand,
    pub stream_id: i32,
    pub channel: String,
}

impl PublicationCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.correlated.encode(out);
        put_i32(out, self.stream_id);
        put_blob(out, self.channel.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let correlated = CorrelatedCommand::decode(buf)?;
        let stream_id = read_i32(buf, 16, "publication command")?;
        let (channel, _) = read_string(buf, 20, "publication command")?;
        Ok(Self {
            correlated,
            stream_id,
            channel,
        })
    }
}

/// `ADD_SUBSCRIPTION` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCommand {
    pub correlated: CorrelatedCommand,
    /// Registration id of a publication to attach to, or -1.
    pub registration_correlation_id: i64,
    pub stream_id: i32,
    pub channel: String,
}

impl SubscriptionCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.correlated.encode(out);
        put_i64(out, self.registration_correlation_id);
        put_i32(out, self.stream_id);
        put_blob(out, self.channel.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let correlated = CorrelatedCommand::decode(buf)?;
        let registration_correlation_id = read_i64(buf, 16, "subscription command")?;
        let stream_id = read_i32(buf, 24, "subscription command")?;
        let (channel, _) = read_string(buf, 28, "subscription command")?;
        Ok(Self {
            correlated,
            registration_correlation_id,
            stream_id,
            channel,
        })
    }
}

/// `REMOVE_PUBLICATION` / `REMOVE_SUBSCRIPTION` / `REMOVE_COUNTER` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveCommand {
    pub correlated: CorrelatedCommand,
    pub registration_id: i64,
}

impl RemoveCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.correlated.encode(out);
        put_i64(out, self.registration_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            correlated: CorrelatedCommand::decode(buf)?,
            registration_id: read_i64(buf, 16, "remove command")?,
        })
    }
}

/// `ADD_COUNTER` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterCommand {
    pub correlated: CorrelatedCommand,
    pub type_id: i32,
    pub key: Vec<u8>,
    pub label: String,
}

impl CounterCommand {
    pub fn encode(&self, out: &mut Vec<u8>) {
        self.correlated.encode(out);
        put_i32(out, self.type_id);
        put_blob(out, &self.key);
        put_blob(out, self.label.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let correlated = CorrelatedCommand::decode(buf)?;
        let type_id = read_i32(buf, 16, "counter command")?;
        let key_length = read_i32(buf, 20, "counter command")?;
        if key_length < 0 {
            return Err(truncated("counter command"));
        }
        let key_end = 24 + key_length as usize;
        let key = buf
            .get(24..key_end)
            .ok_or_else(|| truncated("counter command"))?
            .to_vec();
        let (label, _) = read_string(buf, align(key_end, 4), "counter command")?;
        Ok(Self {
            correlated,
            type_id,
            key,
            label,
        })
    }
}

/// `ON_PUBLICATION_READY` / `ON_EXCLUSIVE_PUBLICATION_READY` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationReadyEvent {
    pub correlation_id: i64,
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub position_limit_counter_id: i32,
    pub channel_status_indicator_id: i32,
    pub log_file: String,
}

impl PublicationReadyEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.correlation_id);
        put_i64(out, self.registration_id);
        put_i32(out, self.session_id);
        put_i32(out, self.stream_id);
        put_i32(out, self.position_limit_counter_id);
        put_i32(out, self.channel_status_indicator_id);
        put_blob(out, self.log_file.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (log_file, _) = read_string(buf, 32, "publication ready")?;
        Ok(Self {
            correlation_id: read_i64(buf, 0, "publication ready")?,
            registration_id: read_i64(buf, 8, "publication ready")?,
            session_id: read_i32(buf, 16, "publication ready")?,
            stream_id: read_i32(buf, 20, "publication ready")?,
            position_limit_counter_id: read_i32(buf, 24, "publication ready")?,
            channel_status_indicator_id: read_i32(buf, 28, "publication ready")?,
            log_file,
        })
    }
}

/// `ON_SUBSCRIPTION_READY` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionReadyEvent {
    pub correlation_id: i64,
    pub channel_status_indicator_id: i32,
}

impl SubscriptionReadyEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.correlation_id);
        put_i32(out, self.channel_status_indicator_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            correlation_id: read_i64(buf, 0, "subscription ready")?,
            channel_status_indicator_id: read_i32(buf, 8, "subscription ready")?,
        })
    }
}

/// `ON_AVAILABLE_IMAGE` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAvailableEvent {
    /// Correlation id assigned to the image itself.
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub subscription_registration_id: i64,
    pub log_file: String,
    pub source_identity: String,
}

impl ImageAvailableEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.correlation_id);
        put_i32(out, self.session_id);
        put_i32(out, self.stream_id);
        put_i64(out, self.subscription_registration_id);
        put_blob(out, self.log_file.as_bytes());
        put_blob(out, self.source_identity.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (log_file, next) = read_string(buf, 24, "image available")?;
        let (source_identity, _) = read_string(buf, next, "image available")?;
        Ok(Self {
            correlation_id: read_i64(buf, 0, "image available")?,
            session_id: read_i32(buf, 8, "image available")?,
            stream_id: read_i32(buf, 12, "image available")?,
            subscription_registration_id: read_i64(buf, 16, "image available")?,
            log_file,
            source_identity,
        })
    }
}

/// `ON_UNAVAILABLE_IMAGE` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUnavailableEvent {
    pub image_correlation_id: i64,
    pub subscription_registration_id: i64,
}

impl ImageUnavailableEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.image_correlation_id);
        put_i64(out, self.subscription_registration_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            image_correlation_id: read_i64(buf, 0, "image unavailable")?,
            subscription_registration_id: read_i64(buf, 8, "image unavailable")?,
        })
    }
}

/// `ON_COUNTER_READY` / `ON_UNAVAILABLE_COUNTER` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterUpdateEvent {
    pub correlation_id: i64,
    pub counter_id: i32,
}

impl CounterUpdateEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.correlation_id);
        put_i32(out, self.counter_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            correlation_id: read_i64(buf, 0, "counter update")?,
            counter_id: read_i32(buf, 8, "counter update")?,
        })
    }
}

/// `ON_OPERATION_SUCCESS` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSucceededEvent {
    pub correlation_id: i64,
}

impl OperationSucceededEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.correlation_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            correlation_id: read_i64(buf, 0, "operation success")?,
        })
    }
}

/// `ON_ERROR` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponseEvent {
    pub offending_command_correlation_id: i64,
    pub error_code: i32,
    pub error_message: String,
}

impl ErrorResponseEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.offending_command_correlation_id);
        put_i32(out, self.error_code);
        put_blob(out, self.error_message.as_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (error_message, _) = read_string(buf, 12, "error response")?;
        Ok(Self {
            offending_command_correlation_id: read_i64(buf, 0, "error response")?,
            error_code: read_i32(buf, 8, "error response")?,
            error_message,
        })
    }
}

/// `ON_CLIENT_TIMEOUT` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeoutEvent {
    pub client_id: i64,
}

impl ClientTimeoutEvent {
    pub fn encode(&self, out: &mut Vec<u8>) {
        put_i64(out, self.client_id);
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Ok(Self {
            client_id: read_i64(buf, 0, "client timeout")?,
        })
    }
}
