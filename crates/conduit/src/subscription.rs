// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription and image resource handles.
//!
//! A subscription materializes on `ON_SUBSCRIPTION_READY`; its images come
//! and go afterwards as the driver announces per-source streams. Each image
//! owns its own log mapping. Images are mutated only by the conductor
//! thread; user threads read a snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::counters::CountersReader;
use crate::logbuffer::{self, LogBuffers};
use crate::publication::{CHANNEL_STATUS_ACTIVE, NO_COUNTER_ID};

/// Callback invoked on the conductor thread when an image joins.
pub type AvailableImageHandler = Arc<dyn Fn(&Image) + Send + Sync>;

/// Callback invoked on the conductor thread when an image leaves.
pub type UnavailableImageHandler = Arc<dyn Fn(&Image) + Send + Sync>;

/// A per-source view of a subscribed stream.
pub struct Image {
    correlation_id: i64,
    session_id: i32,
    subscription_registration_id: i64,
    source_identity: String,
    log_buffers: Arc<LogBuffers>,
    is_closed: AtomicBool,
}

impl Image {
    pub(crate) fn new(
        correlation_id: i64,
        session_id: i32,
        subscription_registration_id: i64,
        source_identity: String,
        log_buffers: Arc<LogBuffers>,
    ) -> Self {
        Self {
            correlation_id,
            session_id,
            subscription_registration_id,
            source_identity,
            log_buffers,
            is_closed: AtomicBool::new(false),
        }
    }

    /// Correlation id the driver assigned to this image.
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> i64 {
        self.correlation_id
    }

    #[inline]
    #[must_use]
    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    /// Registration id of the owning subscription.
    #[inline]
    #[must_use]
    pub fn subscription_registration_id(&self) -> i64 {
        self.subscription_registration_id
    }

    /// Transport address of the source, as reported by the driver.
    #[inline]
    #[must_use]
    pub fn source_identity(&self) -> &str {
        &self.source_identity
    }

    /// Term length of the image's log.
    #[inline]
    #[must_use]
    pub fn term_length(&self) -> usize {
        self.log_buffers.term_length()
    }

    /// Initial term id recorded in the image's log metadata.
    #[must_use]
    pub fn initial_term_id(&self) -> i32 {
        logbuffer::initial_term_id(&self.log_buffers.meta_data_buffer())
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }

    pub(crate) fn log_buffers(&self) -> Arc<LogBuffers> {
        Arc::clone(&self.log_buffers)
    }
}

/// A subscription to a channel/stream pair.
pub struct Subscription {
    channel: String,
    registration_id: i64,
    stream_id: i32,
    channel_status_indicator_id: i32,
    on_available_image: Option<AvailableImageHandler>,
    on_unavailable_image: Option<UnavailableImageHandler>,
    images: Mutex<Vec<Arc<Image>>>,
    counters: CountersReader,
    is_closed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        channel: String,
        registration_id: i64,
        stream_id: i32,
        channel_status_indicator_id: i32,
        on_available_image: Option<AvailableImageHandler>,
        on_unavailable_image: Option<UnavailableImageHandler>,
        counters: CountersReader,
    ) -> Self {
        Self {
            channel,
            registration_id,
            stream_id,
            channel_status_indicator_id,
            on_available_image,
            on_unavailable_image,
            images: Mutex::new(Vec::new()),
            counters,
            is_closed: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }

    #[inline]
    #[must_use]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
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

    /// Number of images currently connected.
    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.lock().len()
    }

    /// Whether any source is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.image_count() > 0
    }

    /// Snapshot of the current images.
    #[must_use]
    pub fn images(&self) -> Vec<Arc<Image>> {
        self.images.lock().clone()
    }

    /// The image for `session_id`, if connected.
    #[must_use]
    pub fn image_by_session_id(&self, session_id: i32) -> Option<Arc<Image>> {
        self.images
            .lock()
            .iter()
            .find(|image| image.session_id() == session_id)
            .cloned()
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn add_image(&self, image: Arc<Image>) {
        self.images.lock().push(Arc::clone(&image));
        if let Some(ref handler) = self.on_available_image {
            handler(&image);
        }
    }

    pub(crate) fn remove_image(&self, image_correlation_id: i64) -> Option<Arc<Image>> {
        let removed = {
            let mut images = self.images.lock();
            let index = images
                .iter()
                .position(|image| image.correlation_id() == image_correlation_id)?;
            images.swap_remove(index)
        };

        removed.close();
        if let Some(ref handler) = self.on_unavailable_image {
            handler(&removed);
        }
        Some(removed)
    }

    pub(crate) fn close_all_images(&self) -> Vec<Arc<Image>> {
        let drained: Vec<Arc<Image>> = self.images.lock().drain(..).collect();
        for image in &drained {
            image.close();
            if let Some(ref handler) = self.on_unavailable_image {
                handler(image);
            }
        }
        drained
    }

    pub(crate) fn close(&self) {
        self.is_closed.store(true, Ordering::Release);
    }
}
