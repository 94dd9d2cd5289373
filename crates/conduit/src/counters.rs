// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader over the driver's counters plane.
//!
//! Two parallel regions: a dense values array of cache-padded 64-bit
//! counters indexed by counter id, and a metadata region of typed records
//! (state, type id, key bytes, label). The driver allocates and reclaims
//! counters; clients only resolve ids handed to them in ready events and
//! read the values.
//!
//! # Metadata Record Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       4     state (UNUSED / ALLOCATED / RECLAIMED)
//! 4       4     type id
//! 8       8     free-for-reuse deadline (ms)
//! 16      112   key bytes
//! 128     4     label length
//! 132     380   label bytes
//! ```

use crate::concurrent::AtomicBuffer;
use crate::util::bit::CACHE_LINE_LENGTH;

/// Length of one slot in the values region; the counter value occupies the
/// first 8 bytes, the rest pads out false sharing.
pub const COUNTER_VALUE_LENGTH: usize = 2 * CACHE_LINE_LENGTH;

/// Length of one record in the metadata region.
pub const COUNTER_METADATA_LENGTH: usize = 4 * COUNTER_VALUE_LENGTH;

/// Metadata region length required for a values region length.
#[inline]
#[must_use]
pub const fn counters_metadata_buffer_length(values_buffer_length: usize) -> usize {
    (values_buffer_length / COUNTER_VALUE_LENGTH) * COUNTER_METADATA_LENGTH
}

/// Record state: slot has never been used.
pub const RECORD_UNUSED: i32 = 0;

/// Record state: counter is live.
pub const RECORD_ALLOCATED: i32 = 1;

/// Record state: counter freed, slot awaiting reuse.
pub const RECORD_RECLAIMED: i32 = -1;

const STATE_OFFSET: usize = 0;
const TYPE_ID_OFFSET: usize = 4;
const KEY_OFFSET: usize = 16;
const LABEL_LENGTH_OFFSET: usize = 128;
const LABEL_OFFSET: usize = 132;

/// Maximum length of a counter's key bytes.
pub const MAX_KEY_LENGTH: usize = LABEL_LENGTH_OFFSET - KEY_OFFSET;

/// Maximum length of a counter's label.
pub const MAX_LABEL_LENGTH: usize = COUNTER_METADATA_LENGTH - LABEL_OFFSET;

/// Read-only view over the counters plane.
#[derive(Clone, Debug)]
pub struct CountersReader {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
}

impl CountersReader {
    /// Wrap the metadata and values regions carved from the
    /// command-and-control file.
    #[must_use]
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        Self { metadata, values }
    }

    /// Highest counter id representable by the values region.
    #[inline]
    #[must_use]
    pub fn max_counter_id(&self) -> i32 {
        (self.values.capacity() / COUNTER_VALUE_LENGTH) as i32 - 1
    }

    /// Offset of a counter's value within the values region.
    #[inline]
    #[must_use]
    pub fn counter_offset(counter_id: i32) -> usize {
        counter_id as usize * COUNTER_VALUE_LENGTH
    }

    /// Offset of a counter's metadata record.
    #[inline]
    #[must_use]
    pub fn metadata_offset(counter_id: i32) -> usize {
        counter_id as usize * COUNTER_METADATA_LENGTH
    }

    /// Current value of a counter, acquire semantics.
    #[inline]
    #[must_use]
    pub fn counter_value(&self, counter_id: i32) -> i64 {
        self.values.get_i64_volatile(Self::counter_offset(counter_id))
    }

    /// Record state of a counter, acquire semantics.
    #[inline]
    #[must_use]
    pub fn counter_state(&self, counter_id: i32) -> i32 {
        self.metadata
            .get_i32_volatile(Self::metadata_offset(counter_id) + STATE_OFFSET)
    }

    /// Type id of a counter.
    #[inline]
    #[must_use]
    pub fn counter_type_id(&self, counter_id: i32) -> i32 {
        self.metadata
            .get_i32(Self::metadata_offset(counter_id) + TYPE_ID_OFFSET)
    }

    /// Label of a counter.
    #[must_use]
    pub fn counter_label(&self, counter_id: i32) -> String {
        let record = Self::metadata_offset(counter_id);
        let length = (self.metadata.get_i32(record + LABEL_LENGTH_OFFSET) as usize)
            .min(MAX_LABEL_LENGTH);
        let mut raw = vec![0u8; length];
        self.metadata.get_bytes(record + LABEL_OFFSET, &mut raw);
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Key bytes of a counter.
    #[must_use]
    pub fn counter_key(&self, counter_id: i32) -> Vec<u8> {
        let mut raw = vec![0u8; MAX_KEY_LENGTH];
        self.metadata
            .get_bytes(Self::metadata_offset(counter_id) + KEY_OFFSET, &mut raw);
        raw
    }
}
