// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serializes commands into the to-driver ring buffer.
//!
//! Each command gets a fresh correlation id from the ring's shared counter;
//! the id is returned to the caller and later links the driver's response
//! back to the originating request. A full ring is reported as
//! `InsufficientSpace` and nothing is written.

use crate::command::{
    command_type, CorrelatedCommand, CounterCommand, PublicationCommand, RemoveCommand,
    SubscriptionCommand,
};
use crate::concurrent::ManyToOneRingBuffer;
use crate::error::Result;

pub struct DriverProxy {
    to_driver: ManyToOneRingBuffer,
    client_id: i64,
}

impl DriverProxy {
    /// Create a proxy, allocating this client's id from the ring's
    /// correlation counter.
    #[must_use]
    pub fn new(to_driver: ManyToOneRingBuffer) -> Self {
        let client_id = to_driver.next_correlation_id();
        Self {
            to_driver,
            client_id,
        }
    }

    /// Id identifying this client to the driver.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Time the driver last consumed from the ring, per its heartbeat stamp.
    #[inline]
    #[must_use]
    pub fn driver_heartbeat_ms(&self) -> i64 {
        self.to_driver.consumer_heartbeat_time_value()
    }

    pub fn add_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.publication_command(command_type::ADD_PUBLICATION, channel, stream_id)
    }

    pub fn add_exclusive_publication(&self, channel: &str, stream_id: i32) -> Result<i64> {
        self.publication_command(command_type::ADD_EXCLUSIVE_PUBLICATION, channel, stream_id)
    }

    pub fn remove_publication(&self, registration_id: i64) -> Result<i64> {
        self.remove_command(command_type::REMOVE_PUBLICATION, registration_id)
    }

    pub fn add_subscription(&self, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let command = SubscriptionCommand {
            correlated: CorrelatedCommand {
                client_id: self.client_id,
                correlation_id,
            },
            registration_correlation_id: -1,
            stream_id,
            channel: channel.to_string(),
        };

        let mut frame = Vec::with_capacity(32 + channel.len());
        command.encode(&mut frame);
        self.to_driver
            .write(command_type::ADD_SUBSCRIPTION, &frame)?;
        Ok(correlation_id)
    }

    pub fn remove_subscription(&self, registration_id: i64) -> Result<i64> {
        self.remove_command(command_type::REMOVE_SUBSCRIPTION, registration_id)
    }

    pub fn add_counter(&self, type_id: i32, key: &[u8], label: &str) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let command = CounterCommand {
            correlated: CorrelatedCommand {
                client_id: self.client_id,
                correlation_id,
            },
            type_id,
            key: key.to_vec(),
            label: label.to_string(),
        };

        let mut frame = Vec::with_capacity(32 + key.len() + label.len());
        command.encode(&mut frame);
        self.to_driver.write(command_type::ADD_COUNTER, &frame)?;
        Ok(correlation_id)
    }

    pub fn remove_counter(&self, registration_id: i64) -> Result<i64> {
        self.remove_command(command_type::REMOVE_COUNTER, registration_id)
    }

    /// Heartbeat telling the driver this client is alive. Consumes no
    /// correlation id; the driver keys liveness on the client id.
    pub fn client_keepalive(&self) -> Result<()> {
        let command = CorrelatedCommand {
            client_id: self.client_id,
            correlation_id: 0,
        };

        let mut frame = Vec::with_capacity(16);
        command.encode(&mut frame);
        self.to_driver
            .write(command_type::CLIENT_KEEPALIVE, &frame)?;
        Ok(())
    }

    fn publication_command(&self, msg_type_id: i32, channel: &str, stream_id: i32) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let command = PublicationCommand {
            correlated: CorrelatedCommand {
                client_id: self.client_id,
                correlation_id,
            },
            stream_id,
            channel: channel.to_string(),
        };

        let mut frame = Vec::with_capacity(24 + channel.len());
        command.encode(&mut frame);
        self.to_driver.write(msg_type_id, &frame)?;
        Ok(correlation_id)
    }

    fn remove_command(&self, msg_type_id: i32, registration_id: i64) -> Result<i64> {
        let correlation_id = self.to_driver.next_correlation_id();
        let command = RemoveCommand {
            correlated: CorrelatedCommand {
                client_id: self.client_id,
                correlation_id,
            },
            registration_id,
        };

        let mut frame = Vec::with_capacity(24);
        command.encode(&mut frame);
        self.to_driver.write(msg_type_id, &frame)?;
        Ok(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PublicationCommand;
    use crate::concurrent::{ring_buffer::TRAILER_LENGTH, AtomicBuffer};
    use crate::error::ClientError;
    use crate::util::AlignedBuffer;

    fn proxy() -> (AlignedBuffer, ManyToOneRingBuffer, DriverProxy) {
        let backing = AlignedBuffer::zeroed(1024 + TRAILER_LENGTH);
        // SAFETY: backing outlives the ring in each test.
        let buffer = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        let ring = ManyToOneRingBuffer::new(buffer).expect("Failed to create ring");
        let proxy = DriverProxy::new(ring.clone());
        (backing, ring, proxy)
    }

    #[test]
    fn test_client_id_allocated_first() {
        let (_backing, ring, proxy) = proxy();
        assert_eq!(proxy.client_id(), 0);
        assert_eq!(ring.next_correlation_id(), 1);
    }

    #[test]
    fn test_add_publication_frames_command() {
        let (_backing, ring, proxy) = proxy();

        let correlation_id = proxy
            .add_publication("aeron:udp?endpoint=localhost:24567", 101)
            .expect("Failed to add publication");

        let mut seen = Vec::new();
        ring.read(
            |type_id, frame| seen.push((type_id, frame.to_vec())),
            10,
        );

        assert_eq!(seen.len(), 1);
        let (type_id, frame) = &seen[0];
        assert_eq!(*type_id, command_type::ADD_PUBLICATION);

        let decoded = PublicationCommand::decode(frame).expect("decode failed");
        assert_eq!(decoded.correlated.client_id, proxy.client_id());
        assert_eq!(decoded.correlated.correlation_id, correlation_id);
        assert_eq!(decoded.stream_id, 101);
        assert_eq!(decoded.channel, "aeron:udp?endpoint=localhost:24567");
    }

    #[test]
    fn test_correlation_ids_increase_per_command() {
        let (_backing, _ring, proxy) = proxy();

        let a = proxy.add_publication("aeron:ipc", 1).expect("add failed");
        let b = proxy.add_subscription("aeron:ipc", 1).expect("add failed");
        let c = proxy.remove_publication(a).expect("remove failed");

        assert!(a < b && b < c);
    }

    #[test]
    fn test_full_ring_reports_insufficient_space() {
        let (_backing, _ring, proxy) = proxy();

        let mut result = Ok(0);
        for _ in 0..200 {
            result = proxy.add_publication("aeron:udp?endpoint=localhost:24567", 101);
            if result.is_err() {
                break;
            }
        }

        assert!(matches!(result, Err(ClientError::InsufficientSpace)));
    }
}
