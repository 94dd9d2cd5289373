// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Counter resource handle.
//!
//! Materializes on `ON_COUNTER_READY`: the driver allocates the slot and
//! hands back its id; the client resolves the id against the shared values
//! region and only ever reads through this handle.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::counters::CountersReader;
use crate::error::{ClientError, Result};

#[derive(Debug)]
pub struct Counter {
    registration_id: i64,
    counter_id: i32,
    counters: CountersReader,
    is_closed: AtomicBool,
}

impl Counter {
    pub(crate) fn new(registration_id: i64, counter_id: i32, counters: CountersReader) -> Self {
        Self {
            registration_id,
            counter_id,
            counters,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Registration id answered by the driver for this handle.
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    /// Id of the slot in the counters values region.
    #[inline]
    #[must_use]
    pub fn counter_id(&self) -> i32 {
        self.counter_id
    }

    /// Current value, acquire semantics.
    ///
    /// # Errors
    ///
    /// `Closed` once the counter has been closed.
    pub fn value(&self) -> Result<i64> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(self.counters.counter_value(self.counter_id))
    }

    /// Label recorded in the counter's metadata.
    #[must_use]
    pub fn label(&self) -> String {
        self.counters.counter_label(self.counter_id)
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
