// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log buffer layout and position algebra.
//!
//! A log comprises three equal-length term buffers (partitions) followed by a
//! metadata trailer. Stream positions are computed from the term id and term
//! offset packed into each partition's 64-bit raw tail.
//!
//! # Metadata Layout
//!
//! ```text
//!  +---------------------------------------------------------------+
//!  |                       Tail Counter 0                          |
//!  +---------------------------------------------------------------+
//!  |                       Tail Counter 1                          |
//!  +---------------------------------------------------------------+
//!  |                       Tail Counter 2                          |
//!  +---------------------------------------------------------------+
//!  |                   Active Partition Index                      |
//!  +---------------------------------------------------------------+
//!  |                      Cache Line Padding                      ...
//!  +---------------------------------------------------------------+
//!  |                 Time of Last Status Message                   |
//!  +---------------------------------------------------------------+
//!  |                      Cache Line Padding                      ...
//!  +---------------------------------------------------------------+
//!  |                 Registration / Correlation ID                 |
//!  +---------------------------------------------------------------+
//!  |                        Initial Term Id                        |
//!  +---------------------------------------------------------------+
//!  |                  Default Frame Header Length                  |
//!  +---------------------------------------------------------------+
//!  |                          MTU Length                           |
//!  +---------------------------------------------------------------+
//!  |                      Cache Line Padding                      ...
//!  +---------------------------------------------------------------+
//!  |                    Default Frame Header                      ...
//!  +---------------------------------------------------------------+
//! ```
//!
//! The active partition index is published with release semantics and read
//! with acquire; the raw tails and time-of-last-status-message likewise. A
//! term offset read from a raw tail is clamped to the term length: a racing
//! writer may have reserved past the end just before rotating.

use std::path::Path;
use std::sync::Arc;

use crate::concurrent::AtomicBuffer;
use crate::error::{ClientError, Result};
use crate::util::bit::{is_power_of_two, number_of_trailing_zeros, CACHE_LINE_LENGTH};
use crate::util::MappedFile;

/// Number of partitions in a log.
pub const PARTITION_COUNT: usize = 3;

/// Minimum length of a term buffer.
pub const TERM_MIN_LENGTH: usize = 64 * 1024;

/// Alignment of frames within a term.
pub const FRAME_ALIGNMENT: usize = 32;

/// Length of the default data frame header.
pub const DATA_FRAME_HEADER_LENGTH: usize = 32;

/// Offset of the three packed raw tails within the metadata.
pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;

/// Offset of the active partition index within the metadata.
pub const LOG_ACTIVE_PARTITION_INDEX_OFFSET: usize = PARTITION_COUNT * 8;

/// Offset of the time of the last status message within the metadata.
pub const LOG_TIME_OF_LAST_SM_OFFSET: usize = CACHE_LINE_LENGTH * 2;

/// Offset of the registration / correlation id within the metadata.
pub const LOG_CORRELATION_ID_OFFSET: usize = LOG_TIME_OF_LAST_SM_OFFSET + CACHE_LINE_LENGTH * 2;

/// Offset of the initial term id within the metadata.
pub const LOG_INITIAL_TERM_ID_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + 8;

/// Offset of the default frame header length field within the metadata.
pub const LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET: usize = LOG_INITIAL_TERM_ID_OFFSET + 4;

/// Offset of the MTU length within the metadata.
pub const LOG_MTU_LENGTH_OFFSET: usize = LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET + 4;

/// Maximum length of the stored default frame header.
pub const LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH: usize = CACHE_LINE_LENGTH * 2;

/// Offset at which the default frame header bytes begin.
pub const LOG_DEFAULT_FRAME_HEADER_OFFSET: usize = LOG_CORRELATION_ID_OFFSET + CACHE_LINE_LENGTH;

/// Total length of the metadata trailer.
pub const LOG_META_DATA_LENGTH: usize =
    LOG_DEFAULT_FRAME_HEADER_OFFSET + LOG_DEFAULT_FRAME_HEADER_MAX_LENGTH;

/// Validate a term length: at least the minimum and a power of two so that
/// position arithmetic reduces to shifts and masks.
///
/// # Errors
///
/// `InvalidArgument` describing the violated constraint.
pub fn check_term_length(term_length: usize) -> Result<()> {
    if term_length < TERM_MIN_LENGTH {
        return Err(ClientError::InvalidArgument(format!(
            "Term length less than min length of {TERM_MIN_LENGTH}: length={term_length}"
        )));
    }

    if !is_power_of_two(term_length) {
        return Err(ClientError::InvalidArgument(format!(
            "Term length not a power of 2: length={term_length}"
        )));
    }

    Ok(())
}

/// Number of bits to shift between a position and a term count for the given
/// term length.
#[inline]
#[must_use]
pub fn position_bits_to_shift(term_length: usize) -> u32 {
    number_of_trailing_zeros(term_length)
}

/// Total log file length for a term length.
#[inline]
#[must_use]
pub const fn compute_log_length(term_length: usize) -> usize {
    term_length * PARTITION_COUNT + LOG_META_DATA_LENGTH
}

/// Term length recovered from a total log file length.
#[inline]
#[must_use]
pub const fn compute_term_length(log_length: usize) -> usize {
    (log_length - LOG_META_DATA_LENGTH) / PARTITION_COUNT
}

/// Term id packed into the high 32 bits of a raw tail.
#[inline]
#[must_use]
pub const fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Term offset from a raw tail, clamped to the term length.
#[inline]
#[must_use]
pub fn term_offset(raw_tail: i64, term_length: i64) -> i32 {
    let tail = raw_tail & 0xFFFF_FFFF;
    tail.min(term_length) as i32
}

/// Pack a term id into a raw tail with a zero offset.
#[inline]
#[must_use]
pub const fn pack_tail(term_id: i32) -> i64 {
    (term_id as i64) << 32
}

/// Partition index for an active term id relative to the initial term id.
///
/// Term ids are 32-bit and subtract with wrap-around so rollover is handled;
/// the result is always in `[0, PARTITION_COUNT)`.
#[inline]
#[must_use]
pub fn index_by_term(initial_term_id: i32, active_term_id: i32) -> usize {
    active_term_id
        .wrapping_sub(initial_term_id)
        .rem_euclid(PARTITION_COUNT as i32) as usize
}

/// Partition index for a number of terms that have passed.
#[inline]
#[must_use]
pub fn index_by_term_count(term_count: i64) -> usize {
    term_count.rem_euclid(PARTITION_COUNT as i64) as usize
}

/// Partition index for an absolute stream position.
#[inline]
#[must_use]
pub fn index_by_position(position: i64, position_bits_to_shift: u32) -> usize {
    (((position as u64) >> position_bits_to_shift) % PARTITION_COUNT as u64) as usize
}

/// The partition index following `current_index`.
#[inline]
#[must_use]
pub const fn next_partition_index(current_index: usize) -> usize {
    (current_index + 1) % PARTITION_COUNT
}

/// Absolute stream position for a term id and offset.
#[inline]
#[must_use]
pub fn compute_position(
    active_term_id: i32,
    term_offset: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = i64::from(active_term_id.wrapping_sub(initial_term_id));
    (term_count << position_bits_to_shift) + i64::from(term_offset)
}

/// Absolute stream position of the beginning of a term.
#[inline]
#[must_use]
pub fn compute_term_begin_position(
    active_term_id: i32,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = i64::from(active_term_id.wrapping_sub(initial_term_id));
    term_count << position_bits_to_shift
}

/// Term id for an absolute stream position.
#[inline]
#[must_use]
pub fn compute_term_id_from_position(
    position: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i32 {
    (((position as u64) >> position_bits_to_shift) as i32).wrapping_add(initial_term_id)
}

/// Term offset for an absolute stream position.
#[inline]
#[must_use]
pub fn compute_term_offset_from_position(position: i64, position_bits_to_shift: u32) -> i32 {
    let mask = (1i64 << position_bits_to_shift) - 1;
    (position & mask) as i32
}

/// Initial term id of the log.
#[inline]
#[must_use]
pub fn initial_term_id(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_INITIAL_TERM_ID_OFFSET)
}

/// Set the initial term id of the log.
#[inline]
pub fn set_initial_term_id(meta: &AtomicBuffer, value: i32) {
    meta.put_i32(LOG_INITIAL_TERM_ID_OFFSET, value);
}

/// MTU length used for this log.
#[inline]
#[must_use]
pub fn mtu_length(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_MTU_LENGTH_OFFSET)
}

/// Set the MTU length used for this log.
#[inline]
pub fn set_mtu_length(meta: &AtomicBuffer, value: i32) {
    meta.put_i32(LOG_MTU_LENGTH_OFFSET, value);
}

/// Registration / correlation id of the command that created the log.
#[inline]
#[must_use]
pub fn correlation_id(meta: &AtomicBuffer) -> i64 {
    meta.get_i64(LOG_CORRELATION_ID_OFFSET)
}

/// Set the registration / correlation id of the log.
#[inline]
pub fn set_correlation_id(meta: &AtomicBuffer, value: i64) {
    meta.put_i64(LOG_CORRELATION_ID_OFFSET, value);
}

/// Time of the last status message, milliseconds, acquire semantics.
#[inline]
#[must_use]
pub fn time_of_last_status_message(meta: &AtomicBuffer) -> i64 {
    meta.get_i64_volatile(LOG_TIME_OF_LAST_SM_OFFSET)
}

/// Store the time of the last status message with release semantics.
#[inline]
pub fn set_time_of_last_status_message(meta: &AtomicBuffer, time_ms: i64) {
    meta.put_i64_ordered(LOG_TIME_OF_LAST_SM_OFFSET, time_ms);
}

/// Active partition index, acquire semantics. A consumer running behind the
/// producer may observe an older index.
#[inline]
#[must_use]
pub fn active_partition_index(meta: &AtomicBuffer) -> usize {
    meta.get_i32_volatile(LOG_ACTIVE_PARTITION_INDEX_OFFSET) as usize
}

/// Publish the active partition index with release semantics.
#[inline]
pub fn set_active_partition_index(meta: &AtomicBuffer, index: usize) {
    meta.put_i32_ordered(LOG_ACTIVE_PARTITION_INDEX_OFFSET, index as i32);
}

/// Raw tail of the given partition, acquire semantics.
#[inline]
#[must_use]
pub fn raw_tail_volatile(meta: &AtomicBuffer, partition_index: usize) -> i64 {
    meta.get_i64_volatile(TERM_TAIL_COUNTERS_OFFSET + partition_index * 8)
}

/// Seed a partition's raw tail with a term id and zero offset.
#[inline]
pub fn initialise_tail_with_term_id(meta: &AtomicBuffer, partition_index: usize, term_id: i32) {
    meta.put_i64(TERM_TAIL_COUNTERS_OFFSET + partition_index * 8, pack_tail(term_id));
}

/// Rotate the log to the next partition for `term_id`.
///
/// Seeds the next partition's raw tail, then publishes the new active index
/// with release semantics. The outgoing partition is left untouched; it is
/// reused a full cycle later.
pub fn rotate_log(meta: &AtomicBuffer, active_partition_index: usize, term_id: i32) {
    let next_index = next_partition_index(active_partition_index);
    initialise_tail_with_term_id(meta, next_index, term_id);
    set_active_partition_index(meta, next_index);
}

/// Store the default frame header into the metadata.
///
/// # Errors
///
/// `InvalidArgument` if the header is not exactly
/// [`DATA_FRAME_HEADER_LENGTH`] bytes.
pub fn store_default_frame_header(meta: &AtomicBuffer, default_header: &[u8]) -> Result<()> {
    if default_header.len() != DATA_FRAME_HEADER_LENGTH {
        return Err(ClientError::InvalidArgument(format!(
            "Default header of {} not equal to {DATA_FRAME_HEADER_LENGTH}",
            default_header.len()
        )));
    }

    meta.put_i32(
        LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET,
        DATA_FRAME_HEADER_LENGTH as i32,
    );
    meta.put_bytes(LOG_DEFAULT_FRAME_HEADER_OFFSET, default_header);
    Ok(())
}

/// Stored length of the default frame header.
#[inline]
#[must_use]
pub fn default_frame_header_length(meta: &AtomicBuffer) -> i32 {
    meta.get_i32(LOG_DEFAULT_FRAME_HEADER_LENGTH_OFFSET)
}

/// Copy the default frame header into a term buffer at `term_offset`.
#[inline]
pub fn apply_default_header(meta: &AtomicBuffer, term_buffer: &AtomicBuffer, term_offset: usize) {
    term_buffer.put_bytes_from(
        term_offset,
        meta,
        LOG_DEFAULT_FRAME_HEADER_OFFSET,
        DATA_FRAME_HEADER_LENGTH,
    );
}

/// A mapped log file: three term buffers and the metadata trailer.
///
/// A publication owns its mapping exclusively; each image of a subscription
/// owns its own. The mapping is released when the last `Arc` drops, which
/// the conductor delays by the configured linger so in-flight callbacks can
/// quiesce.
#[derive(Debug)]
pub struct LogBuffers {
    mapping: MappedFile,
    term_length: usize,
}

impl LogBuffers {
    /// Map an existing log file laid out by the driver.
    ///
    /// # Errors
    ///
    /// `Io` if the file cannot be mapped; `InvalidArgument` if its length
    /// does not describe a valid three-partition log.
    pub fn map_existing(path: &Path) -> Result<Arc<Self>> {
        let mapping = MappedFile::map_existing(path)?;
        let log_length = mapping.len();

        if log_length <= LOG_META_DATA_LENGTH {
            return Err(ClientError::InvalidArgument(format!(
                "Log file too short: length={log_length}"
            )));
        }

        let term_length = compute_term_length(log_length);
        check_term_length(term_length)?;

        log::debug!(
            "[LogBuffers] mapped {} ({} bytes, term length {})",
            path.display(),
            log_length,
            term_length
        );

        Ok(Arc::new(Self {
            mapping,
            term_length,
        }))
    }

    /// Create and map a new zeroed log file for the given term length.
    ///
    /// The driver lays out log files in production; this mirrors its sizing
    /// for embedders and harnesses that stand in for it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad term length, `Io` on file errors.
    pub fn create_new(path: &Path, term_length: usize) -> Result<Arc<Self>> {
        check_term_length(term_length)?;
        let mapping = MappedFile::map_new(path, compute_log_length(term_length))?;

        Ok(Arc::new(Self {
            mapping,
            term_length,
        }))
    }

    /// Term length of each partition.
    #[inline]
    #[must_use]
    pub fn term_length(&self) -> usize {
        self.term_length
    }

    /// View over the term buffer of `partition_index`.
    ///
    /// # Panics
    ///
    /// Panics if `partition_index >= PARTITION_COUNT`.
    #[must_use]
    pub fn term_buffer(&self, partition_index: usize) -> AtomicBuffer {
        assert!(partition_index < PARTITION_COUNT);
        // SAFETY: the mapping is term_length * 3 + metadata bytes long and
        // lives as long as self; the sub-range is within the term region.
        unsafe {
            AtomicBuffer::wrap(
                self.mapping
                    .as_ptr()
                    .add(partition_index * self.term_length),
                self.term_length,
            )
        }
    }

    /// View over the metadata trailer.
    #[must_use]
    pub fn meta_data_buffer(&self) -> AtomicBuffer {
        let meta_offset = self.mapping.len() - LOG_META_DATA_LENGTH;
        // SAFETY: the trailer is the final LOG_META_DATA_LENGTH bytes of the
        // mapping, which lives as long as self.
        unsafe {
            AtomicBuffer::wrap(self.mapping.as_ptr().add(meta_offset), LOG_META_DATA_LENGTH)
        }
    }
}
