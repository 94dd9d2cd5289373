// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Many-producer single-consumer ring buffer: the to-driver command channel.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | Record region (capacity bytes, power of 2)                  |
//! +-------------------------------------------------------------+
//! | Tail counter            (cache line 0 of trailer)           |
//! | Head counter            (cache line 1)                      |
//! | Correlation counter     (cache line 2)                      |
//! | Consumer heartbeat      (cache line 3)                      |
//! +-------------------------------------------------------------+
//! ```
//!
//! # Synchronization Protocol
//!
//! Producer write:
//! 1. Read head (Acquire) and tail (Acquire); fail if the record cannot fit
//! 2. Reserve space with a CAS on the tail, inserting a padding record when
//!    the claim would straddle the end of the region
//! 3. Write the record header with the length negated (claim marker, Release)
//! 4. Copy the payload
//! 5. Publish by storing the positive length (Release)
//!
//! Consumer read:
//! 1. From the head, walk records until an unpublished (non-positive length)
//!    header or the message limit is reached, skipping padding
//! 2. Zero the consumed range and advance the head (Release)
//!
//! Record frames are length-prefixed with a 32-bit type id and aligned to
//! 8 bytes. The correlation counter doubles as the id allocator for the
//! request/response protocol riding on this ring.

use std::fmt;

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::util::bit::{align, is_power_of_two, CACHE_LINE_LENGTH};

/// Offset of the producer tail counter within the trailer.
pub const TAIL_POSITION_OFFSET: usize = 0;

/// Offset of the consumer head counter within the trailer.
pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH;

/// Offset of the correlation id counter within the trailer.
pub const CORRELATION_COUNTER_OFFSET: usize = 2 * CACHE_LINE_LENGTH;

/// Offset of the consumer liveness heartbeat within the trailer.
pub const CONSUMER_HEARTBEAT_OFFSET: usize = 3 * CACHE_LINE_LENGTH;

/// Total trailer length appended to the record region.
pub const TRAILER_LENGTH: usize = 4 * CACHE_LINE_LENGTH;

/// Length of a record header: 32-bit length then 32-bit type id.
pub const RECORD_HEADER_LENGTH: usize = 8;

/// Alignment of record frames within the ring.
pub const RECORD_ALIGNMENT: usize = 8;

/// Type id of a padding record inserted to keep frames contiguous.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

#[inline]
const fn length_offset(record_offset: usize) -> usize {
    record_offset
}

#[inline]
const fn type_offset(record_offset: usize) -> usize {
    record_offset + 4
}

#[inline]
const fn encoded_msg_offset(record_offset: usize) -> usize {
    record_offset + RECORD_HEADER_LENGTH
}

#[inline]
const fn make_header(length: i32, msg_type_id: i32) -> i64 {
    ((msg_type_id as i64) << 32) | (length as i64 & 0xFFFF_FFFF)
}

#[inline]
const fn record_length(header: i64) -> i32 {
    header as i32
}

#[inline]
const fn message_type_id(header: i64) -> i32 {
    (header >> 32) as i32
}

/// Errors from ring buffer construction and writes.
#[derive(Debug)]
pub enum RingBufferError {
    /// Record region length is not a power of two.
    CapacityNotPowerOfTwo(usize),
    /// Message exceeds the maximum record payload.
    MessageTooLong { length: usize, max: usize },
    /// Type id outside the valid application range.
    InvalidMsgTypeId(i32),
    /// Not enough free space between head and tail for the record.
    InsufficientSpace,
}

impl fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityNotPowerOfTwo(capacity) => {
                write!(f, "Ring capacity not a power of 2: {capacity}")
            }
            Self::MessageTooLong { length, max } => {
                write!(f, "Message of {length} bytes exceeds max of {max}")
            }
            Self::InvalidMsgTypeId(id) => write!(f, "Invalid message type id: {id}"),
            Self::InsufficientSpace => write!(f, "Insufficient space in ring buffer"),
        }
    }
}

impl std::error::Error for RingBufferError {}

/// The many-producer single-consumer command ring.
///
/// Cheap to clone: clones share the same backing region and counters.
#[derive(Clone)]
pub struct ManyToOneRingBuffer {
    buffer: AtomicBuffer,
    capacity: usize,
    max_msg_length: usize,
}

impl ManyToOneRingBuffer {
    /// Wrap a region of `capacity + TRAILER_LENGTH` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record region length is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self, RingBufferError> {
        let capacity = buffer.capacity() - TRAILER_LENGTH;

        if !is_power_of_two(capacity) {
            return Err(RingBufferError::CapacityNotPowerOfTwo(capacity));
        }

        Ok(Self {
            buffer,
            capacity,
            max_msg_length: capacity / 8,
        })
    }

    /// Record region capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Maximum payload length accepted by [`write`](Self::write).
    #[inline]
    #[must_use]
    pub fn max_msg_length(&self) -> usize {
        self.max_msg_length
    }

    /// Write one record into the ring.
    ///
    /// Safe to call from any number of threads or processes concurrently.
    ///
    /// # Errors
    ///
    /// `InsufficientSpace` when the record does not fit between head and
    /// tail; nothing is written in that case.
    pub fn write(&self, msg_type_id: i32, src: &[u8]) -> Result<(), RingBufferError> {
        if msg_type_id < 1 {
            return Err(RingBufferError::InvalidMsgTypeId(msg_type_id));
        }
        if src.len() > self.max_msg_length {
            return Err(RingBufferError::MessageTooLong {
                length: src.len(),
                max: self.max_msg_length,
            });
        }

        let record_length = src.len() + RECORD_HEADER_LENGTH;
        let required = align(record_length, RECORD_ALIGNMENT);
        let record_offset = self.claim_capacity(required)?;

        // Claim marker: negative length tells the consumer the record is
        // still being written.
        self.buffer.put_i64_ordered(
            length_offset(record_offset),
            make_header(-(record_length as i32), msg_type_id),
        );
        self.buffer.put_bytes(encoded_msg_offset(record_offset), src);
        self.buffer
            .put_i32_ordered(length_offset(record_offset), record_length as i32);

        Ok(())
    }

    /// Reserve `required` bytes, returning the record offset.
    fn claim_capacity(&self, required: usize) -> Result<usize, RingBufferError> {
        let mask = self.capacity - 1;

        loop {
            let head = self.buffer.get_i64_volatile(HEAD_POSITION_OFFSET);
            let tail = self.buffer.get_i64_volatile(TAIL_POSITION_OFFSET);
            let available = self.capacity - (tail - head) as usize;

            if required > available {
                return Err(RingBufferError::InsufficientSpace);
            }

            let tail_index = (tail as usize) & mask;
            let to_buffer_end = self.capacity - tail_index;
            let mut padding = 0usize;

            if required > to_buffer_end {
                // Claim straddles the end of the region: pad the remainder
                // and restart the record at offset 0.
                let head_index = (head as usize) & mask;
                if required > head_index || required + to_buffer_end > available {
                    return Err(RingBufferError::InsufficientSpace);
                }
                padding = to_buffer_end;
            }

            if self.buffer.compare_and_set_i64(
                TAIL_POSITION_OFFSET,
                tail,
                tail + (required + padding) as i64,
            ) {
                if padding > 0 {
                    self.buffer.put_i64_ordered(
                        length_offset(tail_index),
                        make_header(padding as i32, PADDING_MSG_TYPE_ID),
                    );
                    return Ok(0);
                }
                return Ok(tail_index);
            }
            // CAS lost to another producer: retry with fresh counters.
        }
    }

    /// Consume up to `message_count_limit` records, invoking `handler` with
    /// the type id and payload of each. Single-consumer only.
    ///
    /// Consumed bytes are zeroed and the head advanced with release
    /// semantics once the pass completes. Returns the number of records
    /// handled.
    pub fn read<F>(&self, mut handler: F, message_count_limit: usize) -> usize
    where
        F: FnMut(i32, &[u8]),
    {
        let mask = self.capacity - 1;
        let head = self.buffer.get_i64(HEAD_POSITION_OFFSET);
        let head_index = (head as usize) & mask;
        let contiguous = self.capacity - head_index;

        let mut bytes_read = 0usize;
        let mut messages_read = 0usize;

        while bytes_read < contiguous && messages_read < message_count_limit {
            let record_offset = head_index + bytes_read;
            let header = self.buffer.get_i64_volatile(length_offset(record_offset));
            let length = record_length(header);

            if length <= 0 {
                // Unpublished claim: stop before it.
                break;
            }

            bytes_read += align(length as usize, RECORD_ALIGNMENT);

            let msg_type_id = message_type_id(header);
            if msg_type_id == PADDING_MSG_TYPE_ID {
                continue;
            }

            messages_read += 1;
            let payload = self.buffer.as_slice(
                encoded_msg_offset(record_offset),
                length as usize - RECORD_HEADER_LENGTH,
            );
            handler(msg_type_id, payload);
        }

        if bytes_read > 0 {
            self.buffer.set_memory(head_index, bytes_read, 0);
            self.buffer
                .put_i64_ordered(HEAD_POSITION_OFFSET, head + bytes_read as i64);
        }

        messages_read
    }

    /// Allocate the next correlation id. Sequentially consistent so ids are
    /// totally ordered across producers.
    #[inline]
    pub fn next_correlation_id(&self) -> i64 {
        self.buffer.get_and_add_i64(CORRELATION_COUNTER_OFFSET, 1)
    }

    /// Stamp the consumer liveness heartbeat (written by the consumer side,
    /// read by producers to detect a dead peer).
    #[inline]
    pub fn consumer_heartbeat_time(&self, now_ms: i64) {
        self.buffer
            .put_i64_ordered(CONSUMER_HEARTBEAT_OFFSET, now_ms);
    }

    /// Read the consumer liveness heartbeat.
    #[inline]
    #[must_use]
    pub fn consumer_heartbeat_time_value(&self) -> i64 {
        self.buffer.get_i64_volatile(CONSUMER_HEARTBEAT_OFFSET)
    }
}
