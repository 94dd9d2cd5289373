// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The correlation registry.
//!
//! Every async add records a pending registration keyed by the correlation
//! id its command carried. The registry owns each registration until the
//! caller polls it in a terminal state or the conductor closes; callers hold
//! only an opaque id, so a stale handle is caught by the lookup rather than
//! dereferencing freed state.
//!
//! State machine per registration, transitions one-way:
//!
//! ```text
//! Pending -> Ready | Errored | TimedOut | Closed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::counter::Counter;
use crate::error::ClientError;
use crate::publication::{ExclusivePublication, Publication};
use crate::subscription::{AvailableImageHandler, Subscription, UnavailableImageHandler};

/// Kind of resource a registration resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Publication,
    ExclusivePublication,
    Subscription,
    Counter,
}

/// Lifecycle state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Pending,
    Ready,
    Errored,
    TimedOut,
    Closed,
}

/// A materialized resource held until the caller polls for it.
pub(crate) enum Resource {
    Publication(Arc<Publication>),
    ExclusivePublication(Arc<ExclusivePublication>),
    Subscription(Arc<Subscription>),
    Counter(Arc<Counter>),
}

/// One in-flight async request.
pub(crate) struct Registration {
    pub correlation_id: i64,
    pub kind: ResourceKind,
    pub state: RegistrationState,
    pub deadline_ns: i64,
    /// Channel and stream the request was made with; used to materialize
    /// the resource when the ready event arrives.
    pub channel: String,
    pub stream_id: i32,
    /// Terminal error, delivered to the caller exactly once on poll.
    pub error: Option<ClientError>,
    pub resource: Option<Resource>,
    pub on_available_image: Option<AvailableImageHandler>,
    pub on_unavailable_image: Option<UnavailableImageHandler>,
}

impl Registration {
    pub fn new(
        correlation_id: i64,
        kind: ResourceKind,
        deadline_ns: i64,
        channel: String,
        stream_id: i32,
    ) -> Self {
        Self {
            correlation_id,
            kind,
            state: RegistrationState::Pending,
            deadline_ns,
            channel,
            stream_id,
            error: None,
            resource: None,
            on_available_image: None,
            on_unavailable_image: None,
        }
    }
}

/// Registry of in-flight registrations keyed by correlation id.
///
/// Cardinality is small (at most the number of resources a client adds
/// concurrently), so a plain hash map indexed by id is the whole structure.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<i64, Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, registration: Registration) {
        self.entries
            .insert(registration.correlation_id, registration);
    }

    pub fn get_mut(&mut self, correlation_id: i64) -> Option<&mut Registration> {
        self.entries.get_mut(&correlation_id)
    }

    pub fn remove(&mut self, correlation_id: i64) -> Option<Registration> {
        self.entries.remove(&correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Visit every pending registration whose deadline has passed.
    pub fn for_each_expired<F>(&mut self, now_ns: i64, mut f: F) -> usize
    where
        F: FnMut(&mut Registration),
    {
        let mut expired = 0;
        for registration in self.entries.values_mut() {
            if registration.state == RegistrationState::Pending
                && registration.deadline_ns <= now_ns
            {
                f(registration);
                expired += 1;
            }
        }
        expired
    }

    /// Move every non-terminal registration to `Closed`.
    pub fn close_all(&mut self) {
        for registration in self.entries.values_mut() {
            if registration.state == RegistrationState::Pending {
                registration.state = RegistrationState::Closed;
                registration.error = Some(ClientError::Closed);
            }
        }
    }
}

/// Opaque handle returned by an async publication add.
#[derive(Debug, Clone, Copy)]
pub struct AsyncAddPublication {
    pub(crate) registration_id: i64,
}

/// Opaque handle returned by an async exclusive publication add.
#[derive(Debug, Clone, Copy)]
pub struct AsyncAddExclusivePublication {
    pub(crate) registration_id: i64,
}

/// Opaque handle returned by an async subscription add.
#[derive(Debug, Clone, Copy)]
pub struct AsyncAddSubscription {
    pub(crate) registration_id: i64,
}

/// Opaque handle returned by an async counter add.
#[derive(Debug, Clone, Copy)]
pub struct AsyncAddCounter {
    pub(crate) registration_id: i64,
}

impl AsyncAddPublication {
    /// Correlation id the driver will answer with.
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }
}

impl AsyncAddExclusivePublication {
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }
}

impl AsyncAddSubscription {
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }
}

impl AsyncAddCounter {
    #[inline]
    #[must_use]
    pub fn registration_id(&self) -> i64 {
        self.registration_id
    }
}
