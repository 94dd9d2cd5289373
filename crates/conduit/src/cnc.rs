// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command-and-control (CnC) file layout.
//!
//! The driver creates and sizes the CnC file; clients map it read-write and
//! carve out the shared buffers. The metadata slab is written last by the
//! driver and gated by a volatile version field which clients spin-read
//! until it matches [`CNC_VERSION`].
//!
//! # File Layout
//!
//! ```text
//! +-------------------------------+
//! | Metadata (version, lengths, liveness timeout, start ts, pid)
//! +-------------------------------+
//! | To-driver ring buffer         |
//! +-------------------------------+
//! | To-clients broadcast buffer   |
//! +-------------------------------+
//! | Counters metadata             |
//! +-------------------------------+
//! | Counters values               |
//! +-------------------------------+
//! | Error log                     |
//! +-------------------------------+
//! ```

use crate::concurrent::AtomicBuffer;
use crate::error::{ClientError, Result};
use crate::util::bit::{align, CACHE_LINE_LENGTH};

/// Expected value of the version field. A mismatch means the driver and
/// client builds disagree on the file layout.
pub const CNC_VERSION: i32 = 16;

/// Name of the CnC file within the driver directory.
pub const CNC_FILE: &str = "cnc.dat";

/// Offset of the version field.
pub const VERSION_FIELD_OFFSET: usize = 0;

/// Offset of the to-driver buffer length field.
pub const TO_DRIVER_BUFFER_LENGTH_OFFSET: usize = 4;

/// Offset of the to-clients buffer length field.
pub const TO_CLIENTS_BUFFER_LENGTH_OFFSET: usize = 8;

/// Offset of the counters metadata buffer length field.
pub const COUNTER_METADATA_BUFFER_LENGTH_OFFSET: usize = 12;

/// Offset of the counters values buffer length field.
pub const COUNTER_VALUES_BUFFER_LENGTH_OFFSET: usize = 16;

/// Offset of the error log buffer length field.
pub const ERROR_LOG_BUFFER_LENGTH_OFFSET: usize = 20;

/// Offset of the client liveness timeout field (nanoseconds).
pub const CLIENT_LIVENESS_TIMEOUT_OFFSET: usize = 24;

/// Offset of the driver start timestamp field (epoch milliseconds).
pub const START_TIMESTAMP_OFFSET: usize = 32;

/// Offset of the driver process id field.
pub const PID_OFFSET: usize = 40;

/// Length of the metadata slab; the buffers begin immediately after.
pub const META_DATA_LENGTH: usize = align(PID_OFFSET + 8, 2 * CACHE_LINE_LENGTH);

/// Total CnC file length for the given buffer lengths.
#[inline]
#[must_use]
pub const fn computed_length(total_length_of_buffers: usize) -> usize {
    META_DATA_LENGTH + total_length_of_buffers
}

/// Read the version field with acquire semantics.
#[inline]
#[must_use]
pub fn version(cnc: &AtomicBuffer) -> i32 {
    cnc.get_i32_volatile(VERSION_FIELD_OFFSET)
}

/// The buffers and settings carved out of a mapped CnC region.
///
/// Plain views: the owner of the backing mapping must outlive them.
#[derive(Clone, Copy)]
pub struct CncBuffers {
    pub to_driver: AtomicBuffer,
    pub to_clients: AtomicBuffer,
    pub counters_metadata: AtomicBuffer,
    pub counters_values: AtomicBuffer,
    pub error_log: AtomicBuffer,
    pub client_liveness_timeout_ns: i64,
    pub start_timestamp_ms: i64,
    pub pid: i64,
}

impl CncBuffers {
    /// Carve the buffers from a mapped CnC region whose version has already
    /// been observed as [`CNC_VERSION`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the version mismatches or the recorded buffer
    /// lengths exceed the region.
    pub fn carve(cnc: &AtomicBuffer) -> Result<Self> {
        let observed = version(cnc);
        if observed != CNC_VERSION {
            return Err(ClientError::InvalidArgument(format!(
                "CnC version {observed} does not match {CNC_VERSION}"
            )));
        }

        let to_driver_length = cnc.get_i32(TO_DRIVER_BUFFER_LENGTH_OFFSET) as usize;
        let to_clients_length = cnc.get_i32(TO_CLIENTS_BUFFER_LENGTH_OFFSET) as usize;
        let counters_metadata_length = cnc.get_i32(COUNTER_METADATA_BUFFER_LENGTH_OFFSET) as usize;
        let counters_values_length = cnc.get_i32(COUNTER_VALUES_BUFFER_LENGTH_OFFSET) as usize;
        let error_log_length = cnc.get_i32(ERROR_LOG_BUFFER_LENGTH_OFFSET) as usize;

        let total = META_DATA_LENGTH
            + to_driver_length
            + to_clients_length
            + counters_metadata_length
            + counters_values_length
            + error_log_length;
        if total > cnc.capacity() {
            return Err(ClientError::InvalidArgument(format!(
                "CnC buffer lengths ({total}) exceed mapped region ({})",
                cnc.capacity()
            )));
        }

        let mut offset = META_DATA_LENGTH;
        let to_driver = cnc.view(offset, to_driver_length);
        offset += to_driver_length;
        let to_clients = cnc.view(offset, to_clients_length);
        offset += to_clients_length;
        let counters_metadata = cnc.view(offset, counters_metadata_length);
        offset += counters_metadata_length;
        let counters_values = cnc.view(offset, counters_values_length);
        offset += counters_values_length;
        let error_log = cnc.view(offset, error_log_length);

        Ok(Self {
            to_driver,
            to_clients,
            counters_metadata,
            counters_values,
            error_log,
            client_liveness_timeout_ns: cnc.get_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET),
            start_timestamp_ms: cnc.get_i64(START_TIMESTAMP_OFFSET),
            pid: cnc.get_i64(PID_OFFSET),
        })
    }
}

/// Write the metadata slab the way the driver does, publishing the version
/// last with release semantics. Used by harnesses standing in for a driver.
#[allow(clippy::too_many_arguments)]
pub fn fill_metadata(
    cnc: &AtomicBuffer,
    to_driver_length: usize,
    to_clients_length: usize,
    counters_metadata_length: usize,
    counters_values_length: usize,
    error_log_length: usize,
    client_liveness_timeout_ns: i64,
    start_timestamp_ms: i64,
    pid: i64,
) {
    cnc.put_i32(TO_DRIVER_BUFFER_LENGTH_OFFSET, to_driver_length as i32);
    cnc.put_i32(TO_CLIENTS_BUFFER_LENGTH_OFFSET, to_clients_length as i32);
    cnc.put_i32(
        COUNTER_METADATA_BUFFER_LENGTH_OFFSET,
        counters_metadata_length as i32,
    );
    cnc.put_i32(
        COUNTER_VALUES_BUFFER_LENGTH_OFFSET,
        counters_values_length as i32,
    );
    cnc.put_i32(ERROR_LOG_BUFFER_LENGTH_OFFSET, error_log_length as i32);
    cnc.put_i64(CLIENT_LIVENESS_TIMEOUT_OFFSET, client_liveness_timeout_ns);
    cnc.put_i64(START_TIMESTAMP_OFFSET, start_timestamp_ms);
    cnc.put_i64(PID_OFFSET, pid);
    cnc.put_i32_ordered(VERSION_FIELD_OFFSET, CNC_VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrent::broadcast;
    use crate::concurrent::ring_buffer;
    use crate::util::AlignedBuffer;

    const TO_DRIVER_LENGTH: usize = 1024 + ring_buffer::TRAILER_LENGTH;
    const TO_CLIENTS_LENGTH: usize = 1024 + broadcast::TRAILER_LENGTH;
    const COUNTERS_VALUES_LENGTH: usize = 16 * 128;
    const COUNTERS_METADATA_LENGTH: usize = 4 * COUNTERS_VALUES_LENGTH;
    const ERROR_LOG_LENGTH: usize = 1024;

    fn total_buffers() -> usize {
        TO_DRIVER_LENGTH
            + TO_CLIENTS_LENGTH
            + COUNTERS_METADATA_LENGTH
            + COUNTERS_VALUES_LENGTH
            + ERROR_LOG_LENGTH
    }

    fn filled_region() -> (AlignedBuffer, AtomicBuffer) {
        let backing = AlignedBuffer::zeroed(computed_length(total_buffers()));
        // SAFETY: backing outlives the view in each test.
        let cnc = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        fill_metadata(
            &cnc,
            TO_DRIVER_LENGTH,
            TO_CLIENTS_LENGTH,
            COUNTERS_METADATA_LENGTH,
            COUNTERS_VALUES_LENGTH,
            ERROR_LOG_LENGTH,
            5_000_000_000,
            1_234,
            101,
        );
        (backing, cnc)
    }

    #[test]
    fn test_metadata_length_is_cache_aligned() {
        assert_eq!(META_DATA_LENGTH, 128);
        assert_eq!(META_DATA_LENGTH % (2 * CACHE_LINE_LENGTH), 0);
    }

    #[test]
    fn test_carve_buffers() {
        let (_backing, cnc) = filled_region();
        let buffers = CncBuffers::carve(&cnc).expect("Failed to carve");

        assert_eq!(buffers.to_driver.capacity(), TO_DRIVER_LENGTH);
        assert_eq!(buffers.to_clients.capacity(), TO_CLIENTS_LENGTH);
        assert_eq!(buffers.counters_metadata.capacity(), COUNTERS_METADATA_LENGTH);
        assert_eq!(buffers.counters_values.capacity(), COUNTERS_VALUES_LENGTH);
        assert_eq!(buffers.error_log.capacity(), ERROR_LOG_LENGTH);
        assert_eq!(buffers.client_liveness_timeout_ns, 5_000_000_000);
        assert_eq!(buffers.start_timestamp_ms, 1_234);
        assert_eq!(buffers.pid, 101);
    }

    #[test]
    fn test_carve_rejects_version_mismatch() {
        let (_backing, cnc) = filled_region();
        cnc.put_i32_ordered(VERSION_FIELD_OFFSET, CNC_VERSION + 1);

        assert!(matches!(
            CncBuffers::carve(&cnc),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_carve_rejects_oversized_lengths() {
        let (_backing, cnc) = filled_region();
        cnc.put_i32(TO_DRIVER_BUFFER_LENGTH_OFFSET, i32::MAX / 2);

        assert!(matches!(
            CncBuffers::carve(&cnc),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_version_gates_unwritten_region() {
        let backing = AlignedBuffer::zeroed(computed_length(total_buffers()));
        // SAFETY: backing outlives the view.
        let cnc = unsafe { AtomicBuffer::wrap(backing.as_ptr(), backing.len()) };
        assert_eq!(version(&cnc), 0);
        assert!(CncBuffers::carve(&cnc).is_err());
    }
}
