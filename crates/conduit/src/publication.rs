// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publication resource handles.
//!
//! A publication materializes when the driver answers `ADD_PUBLICATION` with
//! a ready event naming the log file. The handle owns its log mapping
//! exclusively and resolves its status and position-limit counters against
//! the shared counters plane. All mutation happens on the conductor thread;
//! user threads only read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::counters::CountersReader;
use crate::error::{ClientError, Result};
use crate::logbuffer::{self, LogBuffers};

/// Channel status for a resource with no status indicator allocated.
pub const CHANNEL_STATUS_ACTIVE: i64 = 1;

/// Counter id meaning no counter was allocated.
pub const NO_COUNTER_ID: i32 = -1;

/// A publication shared by all writers of a session on a channel/stream.
#[derive(Debug)]
pub struct Publication {
    channel: String,
    registration_id: i64,
    original_registration_id: i64,
    stream_id: i32,
    session_id: i32,
    initial_term_id: i32,
    position_bits_to_shift: u32,
    position_limit_counter_id: i32,
    channel_status_indicator_id: i32,
    log_buffers: Arc<LogBuffers>,
    counters: CountersReader,
    is_closed: AtomicBool,
}

impl Publication {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: String,
        registration_id: i64,
        original_registration_id: i64,
        stream_id: i32,
        session_id: i32,
        position_limit_counter_id: i32,
        channel_status_indicator_id: i32,
        log_buffers: Arc<LogBuffers>,
        counters: CountersReader,
    ) -> Self {
        let meta = log_buffers.meta_data_buffer();
        Self {
            channel,
            registration_id,
            original_registration_id,
            stream_id,
            session_id,
            initial_term_id: logbuffer::initial_term_id(&meta),
            position_bits_to_shift: logbuffer::position_bits_to_shift(log_buffers.term_length()),
            position_limit_counter_id,
            channel_status_indicator_id,
            log_buffers,
            counters,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Channel URI this publication was added with.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registration id answered by the driver for this handle.
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Registration id of the first add of this channel/stream; differs from
    /// [`registration_id`](Self::registration_id) when the driver reused an
    /// existing publication.
    #[inline]
    #[must_use]
    pub fn original_registration_id(&self) -> i64 {
        self.original_registration_id
    }

    #[inline]
    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Term length of the underlying log.
    #[inline]
    #[must_use]
    pub fn term_length(&self) -> usize {
        self.log_buffers.term_length()
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    /// Current stream position: the raw tail of the active partition
    /// resolved through the position algebra.
    ///
    /// # Errors
    ///
    /// `Closed` once the publication has been closed.
    pub fn position(&self) -> Result<i64> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }

        let meta = self.log_buffers.meta_data_buffer();
        let index = logbuffer::active_partition_index(&meta);
        let raw_tail = logbuffer::raw_tail_volatile(&meta, index);
        let term_offset = logbuffer::term_offset(raw_tail, self.term_length() as i64);

        Ok(logbuffer::compute_position(
            logbuffer::term_id(raw_tail),
            term_offset,
            self.position_bits_to_shift,
            self.initial_term_id,
        ))
    }

    /// Position limit imposed by flow control, from the driver-maintained
    /// counter.
    ///
    /// # Errors
    ///
    /// `Closed` once the publication has been closed.
    pub fn position_limit(&self) -> Result<i64> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(self.counters.counter_value(self.position_limit_counter_id))
    }

    /// Channel endpoint status from the indicator counter, or
    /// [`CHANNEL_STATUS_ACTIVE`] when no indicator was allocated.
    #[must_use]
    pub fn channel_status(&self) -> i64 {
        if self.channel_status_indicator_id == NO_COUNTER_ID {
            return CHANNEL_STATUS_ACTIVE;
        }
        self.counters.counter_value(self.channel_status_indicator_id)
    }

    #[inline]
    #[must_use]
    pub fn channel_status_indicator_id(&self) -> i32 {
        self.channel_status_indicator_id
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        Arc::clone(&self.log_buffers)
    }
}

/// A publication with a sole writer: the driver never offers an existing log
/// to a second adder, so the session is exclusive to this handle.
pub struct ExclusivePublication {
    inner: Publication,
}

impl ExclusivePublication {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        channel: String,
        registration_id: i64,
        original_registration_id: i64,
        stream_id: i32,
        session_id: i32,
        position_limit_counter_id: i32,
        channel_status_indicator_id: i32,
        log_buffers: Arc<LogBuffers>,
        counters: CountersReader,
    ) -> Self {
        Self {
            inner: Publication::new(
                channel,
                registration_id,
                original_registration_id,
                stream_id,
                session_id,
                position_limit_counter_id,
                channel_status_indicator_id,
                log_buffers,
                counters,
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        self.inner.channel()
    }

    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.inner.registration_id()
    }

    #[inline]
    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.inner.stream_id()
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.inner.session_id()
    }

    #[inline]
    #[must_use]
    pub fn term_length(&self) -> usize {
        self.inner.term_length()
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// See [`Publication::position`].
    pub fn position(&self) -> Result<i64> {
        self.inner.position()
    }

    /// See [`Publication::position_limit`].
    pub fn position_limit(&self) -> Result<i64> {
        self.inner.position_limit()
    }

    #[must_use]
    pub fn channel_status(&self) -> i64 {
        self.inner.channel_status()
    }

    pub(crate) fn close(&self) {
        self.inner.close();
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        self.inner.log_buffers()
    }
}
