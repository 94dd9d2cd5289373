// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-producer many-consumer broadcast buffer: the to-clients event plane.
//!
//! # Memory Layout
//!
//! ```text
//! +-------------------------------------------------------------+
//! | Record region (capacity bytes, power of 2)                  |
//! +-------------------------------------------------------------+
//! | Tail intent counter  (8 bytes)                              |
//! | Tail counter         (8 bytes)                              |
//! | Latest record        (8 bytes)                              |
//! | Padding to 2 cache lines                                    |
//! +-------------------------------------------------------------+
//! ```
//!
//! The producer (the driver) writes length-prefixed records and publishes a
//! monotonically increasing tail. Each consumer keeps its own cursor and
//! snapshots the tail; the tail-intent counter is raised before a record is
//! overwritten so a consumer can detect that its cursor fell more than one
//! capacity behind and its current record may be torn. On loss the consumer
//! jumps to the latest safe record and reports the skip.
//!
//! Record frames mirror the ring buffer layout (i32 length, i32 type id,
//! 8-byte alignment) but need no CAS: there is exactly one producer.

use std::fmt;
use std::sync::atomic::{fence, Ordering};

use crate::concurrent::atomic_buffer::AtomicBuffer;
use crate::util::bit::{align, is_power_of_two, CACHE_LINE_LENGTH};

/// Offset of the tail-intent counter within the trailer.
pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;

/// Offset of the published tail counter within the trailer.
pub const TAIL_COUNTER_OFFSET: usize = 8;

/// Offset of the latest-record counter within the trailer.
pub const LATEST_COUNTER_OFFSET: usize = 16;

/// Total trailer length appended to the record region.
pub const TRAILER_LENGTH: usize = 2 * CACHE_LINE_LENGTH;

/// Length of a record header: 32-bit length then 32-bit type id.
pub const RECORD_HEADER_LENGTH: usize = 8;

/// Alignment of record frames.
pub const RECORD_ALIGNMENT: usize = 8;

/// Type id of a padding record at the end of the region.
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
const fn msg_offset(record_offset: usize) -> usize {
    record_offset + RECORD_HEADER_LENGTH
}

/// Errors from broadcast buffer construction, transmits, and receives.
#[derive(Debug)]
pub enum BroadcastError {
    /// Record region length is not a power of two.
    CapacityNotPowerOfTwo(usize),
    /// Message exceeds the maximum record payload.
    MessageTooLong { length: usize, max: usize },
    /// Type id outside the valid application range.
    InvalidMsgTypeId(i32),
    /// The consumer fell behind the producer and records were lost.
    Loss,
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityNotPowerOfTwo(capacity) => {
                write!(f, "Broadcast capacity not a power of 2: {capacity}")
            }
            Self::MessageTooLong { length, max } => {
                write!(f, "Message of {length} bytes exceeds max of {max}")
            }
            Self::InvalidMsgTypeId(id) => write!(f, "Invalid message type id: {id}"),
            Self::Loss => write!(f, "Consumer fell behind broadcast producer"),
        }
    }
}

impl std::error::Error for BroadcastError {}

/// The single producer side of the broadcast buffer.
///
/// In production only the driver transmits; the client carries this half for
/// symmetry and to stand in for the driver when the conductor is exercised
/// in process.
pub struct BroadcastTransmitter {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    max_msg_length: usize,
}

impl BroadcastTransmitter {
    /// Wrap a region of `capacity + TRAILER_LENGTH` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record region length is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self, BroadcastError> {
        let capacity = buffer.capacity() - TRAILER_LENGTH;

        if !is_power_of_two(capacity) {
            return Err(BroadcastError::CapacityNotPowerOfTwo(capacity));
        }

        Ok(Self {
            buffer,
            capacity,
            mask: capacity - 1,
            max_msg_length: capacity / 8,
        })
    }

    /// Record region capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transmit one record to all consumers.
    ///
    /// Never blocks and never fails for lack of space: slow consumers lose
    /// records instead.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid type id or an oversized payload.
    pub fn transmit(&mut self, msg_type_id: i32, src: &[u8]) -> Result<(), BroadcastError> {
        if msg_type_id < 1 {
            return Err(BroadcastError::InvalidMsgTypeId(msg_type_id));
        }
        if src.len() > self.max_msg_length {
            return Err(BroadcastError::MessageTooLong {
                length: src.len(),
                max: self.max_msg_length,
            });
        }

        let mut tail = self.buffer.get_i64(TAIL_COUNTER_OFFSET);
        let record_length = src.len() + RECORD_HEADER_LENGTH;
        let aligned_length = align(record_length, RECORD_ALIGNMENT);
        let mut record_offset = (tail as usize) & self.mask;
        let to_end = self.capacity - record_offset;
        let mut new_tail = tail + aligned_length as i64;

        if to_end < aligned_length {
            // Pad out the end of the region and wrap the record to offset 0.
            self.signal_tail_intent(new_tail + to_end as i64);
            self.buffer
                .put_i32(length_offset(record_offset), to_end as i32);
            self.buffer
                .put_i32(type_offset(record_offset), PADDING_MSG_TYPE_ID);
            tail += to_end as i64;
            new_tail += to_end as i64;
            record_offset = 0;
        } else {
            self.signal_tail_intent(new_tail);
        }

        self.buffer
            .put_i32(length_offset(record_offset), record_length as i32);
        self.buffer.put_i32(type_offset(record_offset), msg_type_id);
        self.buffer.put_bytes(msg_offset(record_offset), src);

        self.buffer.put_i64(LATEST_COUNTER_OFFSET, tail);
        self.buffer.put_i64_ordered(TAIL_COUNTER_OFFSET, new_tail);

        Ok(())
    }

    fn signal_tail_intent(&self, new_tail: i64) {
        self.buffer
            .put_i64_ordered(TAIL_INTENT_COUNTER_OFFSET, new_tail);
        // The record body stores below must not be reordered before the
        // intent store, or a consumer could miss that its record is being
        // overwritten.
        fence(Ordering::SeqCst);
    }
}

/// One consumer's view of the broadcast buffer.
///
/// Tracks its own cursor; multiple receivers over the same region are
/// independent and each observes a prefix of the transmitted sequence.
pub struct BroadcastReceiver {
    buffer: AtomicBuffer,
    capacity: usize,
    mask: usize,
    cursor: i64,
    next_record: i64,
    record_offset: usize,
    lapped_count: u64,
}

impl BroadcastReceiver {
    /// Wrap a region of `capacity + TRAILER_LENGTH` bytes and join at the
    /// current tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the record region length is not a power of two.
    pub fn new(buffer: AtomicBuffer) -> Result<Self, BroadcastError> {
        let capacity = buffer.capacity() - TRAILER_LENGTH;

        if !is_power_of_two(capacity) {
            return Err(BroadcastError::CapacityNotPowerOfTwo(capacity));
        }

        let cursor = buffer.get_i64_volatile(TAIL_COUNTER_OFFSET);

        Ok(Self {
            buffer,
            capacity,
            mask: capacity - 1,
            cursor,
            next_record: cursor,
            record_offset: (cursor as usize) & (capacity - 1),
            lapped_count: 0,
        })
    }

    /// Number of times this receiver fell behind and jumped forward.
    #[inline]
    #[must_use]
    pub fn lapped_count(&self) -> u64 {
        self.lapped_count
    }

    /// Advance to the next available record. Returns `true` when a record is
    /// ready for inspection via [`msg_type_id`](Self::msg_type_id),
    /// [`offset`](Self::offset), and [`length`](Self::length).
    pub fn receive_next(&mut self) -> bool {
        let tail = self.buffer.get_i64_volatile(TAIL_COUNTER_OFFSET);
        let mut cursor = self.next_record;

        if tail <= cursor {
            return false;
        }

        let mut record_offset = (cursor as usize) & self.mask;

        if !self.validate_at(cursor) {
            // Lapped by the producer: jump to the latest safe record.
            self.lapped_count += 1;
            cursor = self.buffer.get_i64(LATEST_COUNTER_OFFSET);
            record_offset = (cursor as usize) & self.mask;
        }

        self.cursor = cursor;
        self.next_record = cursor
            + align(
                self.buffer.get_i32(length_offset(record_offset)) as usize,
                RECORD_ALIGNMENT,
            ) as i64;

        if self.buffer.get_i32(type_offset(record_offset)) == PADDING_MSG_TYPE_ID {
            record_offset = 0;
            self.cursor = self.next_record;
            self.next_record += align(
                self.buffer.get_i32(length_offset(record_offset)) as usize,
                RECORD_ALIGNMENT,
            ) as i64;
        }

        self.record_offset = record_offset;
        true
    }

    /// Type id of the current record.
    #[inline]
    #[must_use]
    pub fn msg_type_id(&self) -> i32 {
        self.buffer.get_i32(type_offset(self.record_offset))
    }

    /// Offset of the current record's payload within the region.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> usize {
        msg_offset(self.record_offset)
    }

    /// Payload length of the current record.
    #[inline]
    #[must_use]
    pub fn length(&self) -> usize {
        self.buffer.get_i32(length_offset(self.record_offset)) as usize - RECORD_HEADER_LENGTH
    }

    /// Copy `dst.len()` payload bytes of the current record.
    #[inline]
    pub fn copy_msg(&self, dst: &mut [u8]) {
        self.buffer.get_bytes(self.offset(), dst);
    }

    /// Confirm the current record was not overwritten while it was read.
    ///
    /// Must be called after the payload has been copied out; a `false`
    /// return means the copy may be torn and must be discarded.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.validate_at(self.cursor)
    }

    fn validate_at(&self, cursor: i64) -> bool {
        fence(Ordering::Acquire);
        cursor + self.capacity as i64
            > self.buffer.get_i64_volatile(TAIL_INTENT_COUNTER_OFFSET)
    }
}

/// A receiver that hands out stable copies of each record.
///
/// Wraps [`BroadcastReceiver`], copying every record into a scratch buffer
/// and validating afterwards, so callers never see torn payloads.
pub struct CopyBroadcastReceiver {
    receiver: BroadcastReceiver,
}

impl CopyBroadcastReceiver {
    /// Wrap an underlying receiver.
    #[must_use]
    pub fn new(receiver: BroadcastReceiver) -> Self {
        Self { receiver }
    }

    /// Receive at most one record, copying its payload into `scratch`.
    ///
    /// Returns `Ok(Some(type_id))` with the payload in `scratch`,
    /// `Ok(None)` when no record is available.
    ///
    /// # Errors
    ///
    /// `Loss` when this receiver was lapped by the producer. The cursor has
    /// already been resnapped to the latest record, but intervening records
    /// are gone and the caller must treat the stream as diverged.
    pub fn receive(&mut self, scratch: &mut Vec<u8>) -> Result<Option<i32>, BroadcastError> {
        let lapped_before = self.receiver.lapped_count();

        if !self.receiver.receive_next() {
            return Ok(None);
        }

        if self.receiver.lapped_count() != lapped_before {
            return Err(BroadcastError::Loss);
        }

        let length = self.receiver.length();
        let msg_type_id = self.receiver.msg_type_id();
        scratch.resize(length, 0);
        self.receiver.copy_msg(scratch);

        if !self.receiver.validate() {
            return Err(BroadcastError::Loss);
        }

        Ok(Some(msg_type_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::AlignedBuffer;

    const CAPACITY: usize = 1024;

    fn plane() -> (AlignedBuffer, BroadcastTransmitter, BroadcastReceiver) {
        let backing = AlignedBuffer::zeroed(CAPACITY + TRAILER_LENGTH);
        // SAFETY: backing outlives both views in each test.
        let buffer = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        let tx = BroadcastTransmitter::new(buffer).expect("Failed to create transmitter");
        let rx = BroadcastReceiver::new(buffer).expect("Failed to create receiver");
        (backing, tx, rx)
    }

    #[test]
    fn test_capacity_must_be_power_of_two() {
        let backing = AlignedBuffer::zeroed(1000 + TRAILER_LENGTH);
        // SAFETY: backing outlives the view.
        let buffer = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        assert!(matches!(
            BroadcastTransmitter::new(buffer),
            Err(BroadcastError::CapacityNotPowerOfTwo(1000))
        ));
    }

    #[test]
    fn test_transmit_receive_roundtrip() {
        let (_backing, mut tx, mut rx) = plane();

        tx.transmit(9, b"an event").expect("Transmit failed");

        assert!(rx.receive_next());
        assert_eq!(rx.msg_type_id(), 9);
        assert_eq!(rx.length(), 8);
        let mut payload = vec![0u8; rx.length()];
        rx.copy_msg(&mut payload);
        assert!(rx.validate());
        assert_eq!(payload, b"an event");

        assert!(!rx.receive_next());
    }

    #[test]
    fn test_multiple_records_in_order() {
        let (_backing, mut tx, mut rx) = plane();

        for i in 0..10u8 {
            tx.transmit(1, &[i]).expect("Transmit failed");
        }

        for i in 0..10u8 {
            assert!(rx.receive_next());
            let mut payload = vec![0u8; rx.length()];
            rx.copy_msg(&mut payload);
            assert!(rx.validate());
            assert_eq!(payload, [i]);
        }
        assert!(!rx.receive_next());
    }

    #[test]
    fn test_wrap_with_padding() {
        let (_backing, mut tx, mut rx) = plane();
        let payload = [0x5Au8; 100];

        // Enough records to wrap the region several times, receiving each
        // immediately so nothing is lost.
        for round in 0..100u32 {
            tx.transmit(2, &payload).expect("Transmit failed");
            assert!(rx.receive_next(), "round {round}");
            assert_eq!(rx.msg_type_id(), 2);
            let mut out = vec![0u8; rx.length()];
            rx.copy_msg(&mut out);
            assert!(rx.validate());
            assert_eq!(out, payload);
        }
    }

    #[test]
    fn test_receiver_joins_at_tail() {
        let backing = AlignedBuffer::zeroed(CAPACITY + TRAILER_LENGTH);
        // SAFETY: backing outlives the views.
        let buffer = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        let mut tx = BroadcastTransmitter::new(buffer).expect("Failed to create transmitter");

        tx.transmit(1, b"before join").expect("Transmit failed");

        let mut rx = BroadcastReceiver::new(buffer).expect("Failed to create receiver");
        assert!(!rx.receive_next(), "must not see records from before join");

        tx.transmit(1, b"after join").expect("Transmit failed");
        assert!(rx.receive_next());
    }

    #[test]
    fn test_loss_detection_after_lap() {
        let (_backing, mut tx, rx) = plane();
        let mut copy_rx = CopyBroadcastReceiver::new(rx);
        let payload = [0u8; 120];

        // Overrun the receiver by more than one full capacity.
        for _ in 0..20 {
            tx.transmit(1, &payload).expect("Transmit failed");
        }

        let mut scratch = Vec::new();
        assert!(matches!(
            copy_rx.receive(&mut scratch),
            Err(BroadcastError::Loss)
        ));

        // After the loss the cursor is resnapped and the stream drains again.
        tx.transmit(1, &payload).expect("Transmit failed");
        let mut received = 0;
        while let Ok(Some(type_id)) = copy_rx.receive(&mut scratch) {
            assert_eq!(type_id, 1);
            received += 1;
        }
        assert!(received >= 1);
    }
}
