// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The client conductor: the single-threaded agent owning all protocol state
//! with the driver.
//!
//! # Duty Cycle
//!
//! Each `do_work` pass, in order:
//! 1. Drain the to-clients broadcast buffer up to a message budget,
//!    dispatching each event by type id and correlation id
//! 2. Sweep the registry for pending requests past their deadline
//! 3. Emit a keepalive command when the cadence is due
//! 4. Check the driver's liveness heartbeat
//!
//! Nothing blocks; idling between passes is the embedder's concern. All
//! registry and resource mutation happens on the thread invoking `do_work`,
//! with async adds, polls, and closes serialized by the client's surface
//! mutex.
//!
//! Fatal conditions (driver heartbeat lapsed, broadcast loss, driver-side
//! client timeout) are sticky: every subsequent operation fails with the
//! same error until the conductor closes.

pub mod registration;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::cnc::CncBuffers;
use crate::clock::{EpochClock, NanoClock};
use crate::command::{
    response_type, ClientTimeoutEvent, CounterUpdateEvent, ErrorResponseEvent,
    ImageAvailableEvent, ImageUnavailableEvent, OperationSucceededEvent, PublicationReadyEvent,
    SubscriptionReadyEvent,
};
use crate::concurrent::{
    BroadcastError, BroadcastReceiver, CopyBroadcastReceiver, ManyToOneRingBuffer,
};
use crate::context::Context;
use crate::counter::Counter;
use crate::counters::CountersReader;
use crate::driver_proxy::DriverProxy;
use crate::error::{ClientError, Result};
use crate::logbuffer::LogBuffers;
use crate::publication::{ExclusivePublication, Publication};
use crate::subscription::{
    AvailableImageHandler, Image, Subscription, UnavailableImageHandler,
};

use registration::{
    AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication, AsyncAddSubscription,
    Registration, RegistrationState, Registry, Resource, ResourceKind,
};

/// Maximum events dispatched from the broadcast buffer per duty cycle.
const COMMAND_DRAIN_LIMIT: usize = 10;

/// Fatal condition latched on the conductor.
enum StickyError {
    DriverDead(String),
    BroadcastLoss,
    ClientTimeout,
}

impl StickyError {
    fn to_error(&self) -> ClientError {
        match self {
            Self::DriverDead(msg) => ClientError::DriverDead(msg.clone()),
            Self::BroadcastLoss => ClientError::BroadcastLoss,
            Self::ClientTimeout => ClientError::ClientTimeout,
        }
    }
}

pub struct ClientConductor {
    driver_proxy: DriverProxy,
    to_clients: CopyBroadcastReceiver,
    scratch: Vec<u8>,
    counters: CountersReader,
    registry: Registry,
    active_publications: HashMap<i64, Arc<Publication>>,
    active_exclusive_publications: HashMap<i64, Arc<ExclusivePublication>>,
    active_subscriptions: HashMap<i64, Arc<Subscription>>,
    active_counters: HashMap<i64, Arc<Counter>>,
    /// Closed resources' log mappings held until their linger deadline.
    lingering_log_buffers: Vec<(i64, Arc<LogBuffers>)>,
    epoch_clock: Arc<dyn EpochClock>,
    nano_clock: Arc<dyn NanoClock>,
    driver_timeout_ms: i64,
    keepalive_interval_ms: i64,
    resource_linger_ns: i64,
    last_keepalive_ms: i64,
    sticky: Option<StickyError>,
    is_closed: bool,
}

impl ClientConductor {
    /// Build a conductor over the buffers carved from the CnC file.
    ///
    /// Allocates this client's id from the ring's correlation counter.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the carved buffer lengths are not valid ring /
    /// broadcast layouts.
    pub fn new(context: &Context, cnc: CncBuffers) -> Result<Self> {
        let to_driver = ManyToOneRingBuffer::new(cnc.to_driver)?;
        let receiver = BroadcastReceiver::new(cnc.to_clients)
            .map_err(|e| ClientError::InvalidArgument(e.to_string()))?;
        let counters = CountersReader::new(cnc.counters_metadata, cnc.counters_values);
        let driver_proxy = DriverProxy::new(to_driver);
        let epoch_clock = context.epoch_clock();
        let last_keepalive_ms = epoch_clock.time_ms();

        log::debug!(
            "[Conductor] initialized: client_id={} driver_timeout_ms={}",
            driver_proxy.client_id(),
            context.driver_timeout_ms()
        );

        Ok(Self {
            driver_proxy,
            to_clients: CopyBroadcastReceiver::new(receiver),
            scratch: Vec::with_capacity(1024),
            counters,
            registry: Registry::new(),
            active_publications: HashMap::new(),
            active_exclusive_publications: HashMap::new(),
            active_subscriptions: HashMap::new(),
            active_counters: HashMap::new(),
            lingering_log_buffers: Vec::new(),
            epoch_clock,
            nano_clock: context.nano_clock(),
            driver_timeout_ms: context.driver_timeout_ms(),
            keepalive_interval_ms: context.keepalive_interval_ms(),
            resource_linger_ns: context.resource_linger_duration_ns(),
            last_keepalive_ms,
            sticky: None,
            is_closed: false,
        })
    }

    /// Id identifying this client to the driver.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.driver_proxy.client_id()
    }

    /// Shared view over the counters plane.
    #[must_use]
    pub fn counters_reader(&self) -> CountersReader {
        self.counters.clone()
    }

    fn check_usable(&self) -> Result<()> {
        if self.is_closed {
            return Err(ClientError::Closed);
        }
        if let Some(ref sticky) = self.sticky {
            return Err(sticky.to_error());
        }
        Ok(())
    }

    fn validate_channel(channel: &str) -> Result<()> {
        if channel.is_empty() || !channel.starts_with("aeron:") {
            return Err(ClientError::InvalidArgument(format!(
                "Invalid channel URI: {channel}"
            )));
        }
        Ok(())
    }

    fn request_deadline_ns(&self) -> i64 {
        self.nano_clock.time_ns() + self.driver_timeout_ms * 1_000_000
    }

    /// Request a publication. Poll the returned handle for the resource.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad channel, `InsufficientSpace` when the
    /// command ring is full (no registration is recorded), or the sticky
    /// conductor error.
    pub fn async_add_publication(
        &mut self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddPublication> {
        self.check_usable()?;
        Self::validate_channel(channel)?;

        let correlation_id = self.driver_proxy.add_publication(channel, stream_id)?;
        self.registry.insert(Registration::new(
            correlation_id,
            ResourceKind::Publication,
            self.request_deadline_ns(),
            channel.to_string(),
            stream_id,
        ));

        log::debug!("[Conductor] add publication: correlation_id={correlation_id} channel={channel} stream_id={stream_id}");
        Ok(AsyncAddPublication {
            registration_id: correlation_id,
        })
    }

    /// Poll a publication add: `Ok(None)` while pending, `Ok(Some)` exactly
    /// once when ready, `Err` with the terminal error otherwise.
    pub fn async_add_publication_poll(
        &mut self,
        handle: &AsyncAddPublication,
    ) -> Result<Option<Arc<Publication>>> {
        match self.poll_registration(handle.registration_id, ResourceKind::Publication)? {
            Some(Resource::Publication(publication)) => Ok(Some(publication)),
            Some(_) => Err(ClientError::InvalidArgument(
                "registration resolved to a different resource kind".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Request an exclusive publication. Poll the returned handle for the
    /// resource.
    pub fn async_add_exclusive_publication(
        &mut self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddExclusivePublication> {
        self.check_usable()?;
        Self::validate_channel(channel)?;

        let correlation_id = self
            .driver_proxy
            .add_exclusive_publication(channel, stream_id)?;
        self.registry.insert(Registration::new(
            correlation_id,
            ResourceKind::ExclusivePublication,
            self.request_deadline_ns(),
            channel.to_string(),
            stream_id,
        ));

        log::debug!("[Conductor] add exclusive publication: correlation_id={correlation_id} channel={channel} stream_id={stream_id}");
        Ok(AsyncAddExclusivePublication {
            registration_id: correlation_id,
        })
    }

    /// Poll an exclusive publication add.
    pub fn async_add_exclusive_publication_poll(
        &mut self,
        handle: &AsyncAddExclusivePublication,
    ) -> Result<Option<Arc<ExclusivePublication>>> {
        match self.poll_registration(handle.registration_id, ResourceKind::ExclusivePublication)? {
            Some(Resource::ExclusivePublication(publication)) => Ok(Some(publication)),
            Some(_) => Err(ClientError::InvalidArgument(
                "registration resolved to a different resource kind".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Request a subscription. The image handlers, if given, run on the
    /// conductor thread as the driver announces sources.
    pub fn async_add_subscription(
        &mut self,
        channel: &str,
        stream_id: i32,
        on_available_image: Option<AvailableImageHandler>,
        on_unavailable_image: Option<UnavailableImageHandler>,
    ) -> Result<AsyncAddSubscription> {
        self.check_usable()?;
        Self::validate_channel(channel)?;

        let correlation_id = self.driver_proxy.add_subscription(channel, stream_id)?;
        let mut registration = Registration::new(
            correlation_id,
            ResourceKind::Subscription,
            self.request_deadline_ns(),
            channel.to_string(),
            stream_id,
        );
        registration.on_available_image = on_available_image;
        registration.on_unavailable_image = on_unavailable_image;
        self.registry.insert(registration);

        log::debug!("[Conductor] add subscription: correlation_id={correlation_id} channel={channel} stream_id={stream_id}");
        Ok(AsyncAddSubscription {
            registration_id: correlation_id,
        })
    }

    /// Poll a subscription add.
    pub fn async_add_subscription_poll(
        &mut self,
        handle: &AsyncAddSubscription,
    ) -> Result<Option<Arc<Subscription>>> {
        match self.poll_registration(handle.registration_id, ResourceKind::Subscription)? {
            Some(Resource::Subscription(subscription)) => Ok(Some(subscription)),
            Some(_) => Err(ClientError::InvalidArgument(
                "registration resolved to a different resource kind".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Request a counter with the given type id, key, and label.
    pub fn async_add_counter(
        &mut self,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<AsyncAddCounter> {
        self.check_usable()?;

        let correlation_id = self.driver_proxy.add_counter(type_id, key, label)?;
        self.registry.insert(Registration::new(
            correlation_id,
            ResourceKind::Counter,
            self.request_deadline_ns(),
            String::new(),
            type_id,
        ));

        log::debug!("[Conductor] add counter: correlation_id={correlation_id} type_id={type_id}");
        Ok(AsyncAddCounter {
            registration_id: correlation_id,
        })
    }

    /// Poll a counter add.
    pub fn async_add_counter_poll(
        &mut self,
        handle: &AsyncAddCounter,
    ) -> Result<Option<Arc<Counter>>> {
        match self.poll_registration(handle.registration_id, ResourceKind::Counter)? {
            Some(Resource::Counter(counter)) => Ok(Some(counter)),
            Some(_) => Err(ClientError::InvalidArgument(
                "registration resolved to a different resource kind".to_string(),
            )),
            None => Ok(None),
        }
    }

    fn poll_registration(&mut self, correlation_id: i64, kind: ResourceKind) -> Result<Option<Resource>> {
        let state = match self.registry.get_mut(correlation_id) {
            None => return Ok(None),
            Some(registration) => {
                if registration.kind != kind {
                    return Err(ClientError::InvalidArgument(format!(
                        "handle kind mismatch for correlation_id={correlation_id}"
                    )));
                }
                registration.state
            }
        };

        match state {
            RegistrationState::Pending => Ok(None),
            RegistrationState::Ready => {
                let mut registration = self
                    .registry
                    .remove(correlation_id)
                    .ok_or(ClientError::Closed)?;
                Ok(registration.resource.take())
            }
            RegistrationState::Errored
            | RegistrationState::TimedOut
            | RegistrationState::Closed => {
                let mut registration = self
                    .registry
                    .remove(correlation_id)
                    .ok_or(ClientError::Closed)?;
                Err(registration.error.take().unwrap_or(ClientError::Closed))
            }
        }
    }

    /// Close a publication: send `REMOVE_PUBLICATION` and free local state.
    /// The log mapping lingers before it is released.
    pub fn close_publication(&mut self, publication: &Publication) -> Result<()> {
        if self.is_closed {
            return Err(ClientError::Closed);
        }
        if publication.is_closed() {
            return Ok(());
        }

        self.active_publications
            .remove(&publication.registration_id());
        publication.close();
        self.linger(publication.log_buffers());

        if let Err(e) = self
            .driver_proxy
            .remove_publication(publication.registration_id())
        {
            log::warn!(
                "[Conductor] failed to send remove publication for registration_id={}: {e}",
                publication.registration_id()
            );
        }
        Ok(())
    }

    /// Close an exclusive publication. See [`close_publication`](Self::close_publication).
    pub fn close_exclusive_publication(
        &mut self,
        publication: &ExclusivePublication,
    ) -> Result<()> {
        if self.is_closed {
            return Err(ClientError::Closed);
        }
        if publication.is_closed() {
            return Ok(());
        }

        self.active_exclusive_publications
            .remove(&publication.registration_id());
        publication.close();
        self.linger(publication.log_buffers());

        if let Err(e) = self
            .driver_proxy
            .remove_publication(publication.registration_id())
        {
            log::warn!(
                "[Conductor] failed to send remove publication for registration_id={}: {e}",
                publication.registration_id()
            );
        }
        Ok(())
    }

    /// Close a subscription: images become unavailable, then
    /// `REMOVE_SUBSCRIPTION` is sent and local state freed.
    pub fn close_subscription(&mut self, subscription: &Subscription) -> Result<()> {
        if self.is_closed {
            return Err(ClientError::Closed);
        }
        if subscription.is_closed() {
            return Ok(());
        }

        self.active_subscriptions
            .remove(&subscription.registration_id());
        for image in subscription.close_all_images() {
            let log_buffers = image.log_buffers();
            self.linger(log_buffers);
        }
        subscription.close();

        if let Err(e) = self
            .driver_proxy
            .remove_subscription(subscription.registration_id())
        {
            log::warn!(
                "[Conductor] failed to send remove subscription for registration_id={}: {e}",
                subscription.registration_id()
            );
        }
        Ok(())
    }

    /// Close a counter: send `REMOVE_COUNTER` and free local state.
    pub fn close_counter(&mut self, counter: &Counter) -> Result<()> {
        if self.is_closed {
            return Err(ClientError::Closed);
        }
        if counter.is_closed() {
            return Ok(());
        }

        self.active_counters.remove(&counter.registration_id());
        counter.close();

        if let Err(e) = self.driver_proxy.remove_counter(counter.registration_id()) {
            log::warn!(
                "[Conductor] failed to send remove counter for registration_id={}: {e}",
                counter.registration_id()
            );
        }
        Ok(())
    }

    /// One non-blocking duty cycle. Returns the count of events, timeouts,
    /// and commands processed.
    pub fn do_work(&mut self) -> Result<usize> {
        if self.is_closed {
            return Ok(0);
        }

        let mut work_count = 0;

        work_count += self.drain_to_clients();
        work_count += self.sweep_deadlines();
        work_count += self.heartbeat_and_liveness();
        self.reclaim_lingering();

        Ok(work_count)
    }

    fn drain_to_clients(&mut self) -> usize {
        let mut work_count = 0;

        for _ in 0..COMMAND_DRAIN_LIMIT {
            let mut scratch = std::mem::take(&mut self.scratch);
            let received = self.to_clients.receive(&mut scratch);

            match received {
                Ok(Some(msg_type_id)) => {
                    self.dispatch(msg_type_id, &scratch);
                    work_count += 1;
                    self.scratch = scratch;
                }
                Ok(None) => {
                    self.scratch = scratch;
                    break;
                }
                Err(BroadcastError::Loss) => {
                    self.scratch = scratch;
                    log::error!("[Conductor] lost events from the to-clients broadcast buffer");
                    if self.sticky.is_none() {
                        self.sticky = Some(StickyError::BroadcastLoss);
                    }
                    work_count += 1;
                    break;
                }
                Err(e) => {
                    self.scratch = scratch;
                    log::warn!("[Conductor] broadcast receive failed: {e}");
                    break;
                }
            }
        }

        work_count
    }

    fn sweep_deadlines(&mut self) -> usize {
        let now_ns = self.nano_clock.time_ns();
        let driver_timeout_ms = self.driver_timeout_ms;

        self.registry.for_each_expired(now_ns, |registration| {
            registration.state = RegistrationState::TimedOut;
            registration.error = Some(ClientError::DriverTimeout(format!(
                "no response from driver within {driver_timeout_ms} ms: correlation_id={}",
                registration.correlation_id
            )));
            log::warn!(
                "[Conductor] request timed out: correlation_id={}",
                registration.correlation_id
            );
        })
    }

    fn heartbeat_and_liveness(&mut self) -> usize {
        let mut work_count = 0;
        let now_ms = self.epoch_clock.time_ms();

        if now_ms - self.last_keepalive_ms >= self.keepalive_interval_ms {
            match self.driver_proxy.client_keepalive() {
                Ok(()) => work_count += 1,
                Err(e) => log::warn!("[Conductor] failed to send keepalive: {e}"),
            }
            self.last_keepalive_ms = now_ms;
        }

        let heartbeat_ms = self.driver_proxy.driver_heartbeat_ms();
        if now_ms > heartbeat_ms + self.driver_timeout_ms && self.sticky.is_none() {
            let msg = format!(
                "driver heartbeat is {} ms old (timeout {} ms)",
                now_ms - heartbeat_ms,
                self.driver_timeout_ms
            );
            log::error!("[Conductor] {msg}");
            self.sticky = Some(StickyError::DriverDead(msg));
            work_count += 1;
        }

        work_count
    }

    fn reclaim_lingering(&mut self) {
        let now_ns = self.nano_clock.time_ns();
        self.lingering_log_buffers
            .retain(|(deadline_ns, _)| *deadline_ns > now_ns);
    }

    fn linger(&mut self, log_buffers: Arc<LogBuffers>) {
        let deadline_ns = self.nano_clock.time_ns() + self.resource_linger_ns;
        self.lingering_log_buffers.push((deadline_ns, log_buffers));
    }

    fn dispatch(&mut self, msg_type_id: i32, frame: &[u8]) {
        let outcome = match msg_type_id {
            response_type::ON_PUBLICATION_READY => {
                PublicationReadyEvent::decode(frame).map(|e| self.on_publication_ready(e, false))
            }
            response_type::ON_EXCLUSIVE_PUBLICATION_READY => {
                PublicationReadyEvent::decode(frame).map(|e| self.on_publication_ready(e, true))
            }
            response_type::ON_SUBSCRIPTION_READY => {
                SubscriptionReadyEvent::decode(frame).map(|e| self.on_subscription_ready(e))
            }
            response_type::ON_COUNTER_READY => {
                CounterUpdateEvent::decode(frame).map(|e| self.on_counter_ready(e))
            }
            response_type::ON_ERROR => {
                ErrorResponseEvent::decode(frame).map(|e| self.on_error(e))
            }
            response_type::ON_AVAILABLE_IMAGE => {
                ImageAvailableEvent::decode(frame).map(|e| self.on_available_image(e))
            }
            response_type::ON_UNAVAILABLE_IMAGE => {
                ImageUnavailableEvent::decode(frame).map(|e| self.on_unavailable_image(e))
            }
            response_type::ON_OPERATION_SUCCESS => OperationSucceededEvent::decode(frame).map(|e| {
                log::debug!(
                    "[Conductor] operation success: correlation_id={}",
                    e.correlation_id
                );
            }),
            response_type::ON_UNAVAILABLE_COUNTER => CounterUpdateEvent::decode(frame).map(|e| {
                log::debug!(
                    "[Conductor] counter unavailable: correlation_id={} counter_id={}",
                    e.correlation_id,
                    e.counter_id
                );
            }),
            response_type::ON_CLIENT_TIMEOUT => {
                ClientTimeoutEvent::decode(frame).map(|e| self.on_client_timeout(e))
            }
            unknown => {
                log::debug!("[Conductor] ignoring unknown event type: {unknown:#x}");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            log::warn!("[Conductor] failed to decode event type {msg_type_id:#x}: {e}");
        }
    }

    fn on_publication_ready(&mut self, event: PublicationReadyEvent, exclusive: bool) {
        let expected_kind = if exclusive {
            ResourceKind::ExclusivePublication
        } else {
            ResourceKind::Publication
        };

        let Some(registration) = self.registry.get_mut(event.correlation_id) else {
            // The caller abandoned the request.
            log::debug!(
                "[Conductor] publication ready for unknown correlation_id={}",
                event.correlation_id
            );
            return;
        };
        if registration.kind != expected_kind || registration.state != RegistrationState::Pending {
            return;
        }

        match LogBuffers::map_existing(Path::new(&event.log_file)) {
            Err(e) => {
                log::warn!(
                    "[Conductor] failed to map log file {}: {e}",
                    event.log_file
                );
                registration.state = RegistrationState::Errored;
                registration.error = Some(e);
            }
            Ok(log_buffers) => {
                let channel = registration.channel.clone();
                if exclusive {
                    let publication = Arc::new(ExclusivePublication::new(
                        channel,
                        event.correlation_id,
                        event.registration_id,
                        event.stream_id,
                        event.session_id,
                        event.position_limit_counter_id,
                        event.channel_status_indicator_id,
                        log_buffers,
                        self.counters.clone(),
                    ));
                    self.active_exclusive_publications
                        .insert(event.correlation_id, Arc::clone(&publication));
                    registration.resource = Some(Resource::ExclusivePublication(publication));
                } else {
                    let publication = Arc::new(Publication::new(
                        channel,
                        event.correlation_id,
                        event.registration_id,
                        event.stream_id,
                        event.session_id,
                        event.position_limit_counter_id,
                        event.channel_status_indicator_id,
                        log_buffers,
                        self.counters.clone(),
                    ));
                    self.active_publications
                        .insert(event.correlation_id, Arc::clone(&publication));
                    registration.resource = Some(Resource::Publication(publication));
                }
                registration.state = RegistrationState::Ready;
                log::debug!(
                    "[Conductor] publication ready: correlation_id={} session_id={}",
                    event.correlation_id,
                    event.session_id
                );
            }
        }
    }

    fn on_subscription_ready(&mut self, event: SubscriptionReadyEvent) {
        let Some(registration) = self.registry.get_mut(event.correlation_id) else {
            log::debug!(
                "[Conductor] subscription ready for unknown correlation_id={}",
                event.correlation_id
            );
            return;
        };
        if registration.kind != ResourceKind::Subscription
            || registration.state != RegistrationState::Pending
        {
            return;
        }

        let subscription = Arc::new(Subscription::new(
            registration.channel.clone(),
            event.correlation_id,
            registration.stream_id,
            event.channel_status_indicator_id,
            registration.on_available_image.take(),
            registration.on_unavailable_image.take(),
            self.counters.clone(),
        ));
        self.active_subscriptions
            .insert(event.correlation_id, Arc::clone(&subscription));
        registration.resource = Some(Resource::Subscription(subscription));
        registration.state = RegistrationState::Ready;
        log::debug!(
            "[Conductor] subscription ready: correlation_id={}",
            event.correlation_id
        );
    }

    fn on_counter_ready(&mut self, event: CounterUpdateEvent) {
        let Some(registration) = self.registry.get_mut(event.correlation_id) else {
            log::debug!(
                "[Conductor] counter ready for unknown correlation_id={}",
                event.correlation_id
            );
            return;
        };
        if registration.kind != ResourceKind::Counter
            || registration.state != RegistrationState::Pending
        {
            return;
        }

        let counter = Arc::new(Counter::new(
            event.correlation_id,
            event.counter_id,
            self.counters.clone(),
        ));
        self.active_counters
            .insert(event.correlation_id, Arc::clone(&counter));
        registration.resource = Some(Resource::Counter(counter));
        registration.state = RegistrationState::Ready;
        log::debug!(
            "[Conductor] counter ready: correlation_id={} counter_id={}",
            event.correlation_id,
            event.counter_id
        );
    }

    fn on_error(&mut self, event: ErrorResponseEvent) {
        let Some(registration) = self
            .registry
            .get_mut(event.offending_command_correlation_id)
        else {
            log::debug!(
                "[Conductor] driver error for unknown correlation_id={}",
                event.offending_command_correlation_id
            );
            return;
        };
        if registration.state != RegistrationState::Pending {
            return;
        }

        log::warn!(
            "[Conductor] driver error {}: {} (correlation_id={})",
            event.error_code,
            event.error_message,
            event.offending_command_correlation_id
        );
        registration.state = RegistrationState::Errored;
        registration.error = Some(ClientError::DriverError {
            code: event.error_code,
            message: event.error_message,
        });
    }

    fn on_available_image(&mut self, event: ImageAvailableEvent) {
        let Some(subscription) = self
            .active_subscriptions
            .get(&event.subscription_registration_id)
            .cloned()
        else {
            log::debug!(
                "[Conductor] image for unknown subscription registration_id={}",
                event.subscription_registration_id
            );
            return;
        };

        match LogBuffers::map_existing(Path::new(&event.log_file)) {
            Err(e) => {
                log::warn!(
                    "[Conductor] failed to map image log file {}: {e}",
                    event.log_file
                );
            }
            Ok(log_buffers) => {
                let image = Arc::new(Image::new(
                    event.correlation_id,
                    event.session_id,
                    event.subscription_registration_id,
                    event.source_identity,
                    log_buffers,
                ));
                subscription.add_image(image);
                log::debug!(
                    "[Conductor] image available: correlation_id={} session_id={}",
                    event.correlation_id,
                    event.session_id
                );
            }
        }
    }

    fn on_unavailable_image(&mut self, event: ImageUnavailableEvent) {
        let Some(subscription) = self
            .active_subscriptions
            .get(&event.subscription_registration_id)
            .cloned()
        else {
            return;
        };

        if let Some(image) = subscription.remove_image(event.image_correlation_id) {
            let log_buffers = image.log_buffers();
            self.linger(log_buffers);
            log::debug!(
                "[Conductor] image unavailable: correlation_id={}",
                event.image_correlation_id
            );
        }
    }

    fn on_client_timeout(&mut self, event: ClientTimeoutEvent) {
        if event.client_id == self.driver_proxy.client_id() && self.sticky.is_none() {
            log::error!("[Conductor] client timed out by driver");
            self.sticky = Some(StickyError::ClientTimeout);
        }
    }

    /// Tear down: outstanding registrations become `Closed`, resources are
    /// closed, lingering mappings released.
    pub fn on_close(&mut self) {
        if self.is_closed {
            return;
        }
        self.is_closed = true;

        self.registry.close_all();

        for (_, publication) in self.active_publications.drain() {
            publication.close();
        }
        for (_, publication) in self.active_exclusive_publications.drain() {
            publication.close();
        }
        for (_, subscription) in self.active_subscriptions.drain() {
            subscription.close_all_images();
            subscription.close();
        }
        for (_, counter) in self.active_counters.drain() {
            counter.close();
        }
        self.lingering_log_buffers.clear();

        log::debug!("[Conductor] closed: client_id={}", self.client_id());
    }
}

impl Drop for ClientConductor {
    fn drop(&mut self) {
        self.on_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cnc::{self, CncBuffers};
    use crate::command::{command_type, error_code};
    use crate::concurrent::{broadcast, ring_buffer, AtomicBuffer, BroadcastTransmitter};
    use crate::counters::{CountersReader, COUNTER_VALUE_LENGTH};
    use crate::logbuffer::{LogBuffers, TERM_MIN_LENGTH};
    use crate::util::AlignedBuffer;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PUB_URI: &str = "aeron:udp?endpoint=localhost:24567";
    const SUB_URI: &str = "aeron:udp?endpoint=localhost:24567";
    const STREAM_ID: i32 = 101;
    const SESSION_ID: i32 = 110;
    const COUNTER_TYPE_ID: i32 = 102;
    const DRIVER_TIMEOUT_MS: i64 = 10_000;

    const CAPACITY: usize = 1024;
    const TO_DRIVER_LENGTH: usize = CAPACITY + ring_buffer::TRAILER_LENGTH;
    const TO_CLIENTS_LENGTH: usize = CAPACITY + broadcast::TRAILER_LENGTH;
    const COUNTERS_VALUES_LENGTH: usize = 64 * COUNTER_VALUE_LENGTH;
    const COUNTERS_METADATA_LENGTH: usize = 4 * COUNTERS_VALUES_LENGTH;
    const ERROR_LOG_LENGTH: usize = CAPACITY;

    /// Stands in for the driver: owns the CnC region, reads the command
    /// ring, and transmits events on the broadcast buffer.
    struct DriverHarness {
        conductor: ClientConductor,
        clock: Arc<ManualClock>,
        to_driver: ManyToOneRingBuffer,
        to_clients: BroadcastTransmitter,
        counters_values: AtomicBuffer,
        log_file: PathBuf,
        _region: AlignedBuffer,
        _temp_dir: tempfile::TempDir,
    }

    impl DriverHarness {
        fn new() -> Self {
            let total = TO_DRIVER_LENGTH
                + TO_CLIENTS_LENGTH
                + COUNTERS_METADATA_LENGTH
                + COUNTERS_VALUES_LENGTH
                + ERROR_LOG_LENGTH;
            let region = AlignedBuffer::zeroed(cnc::computed_length(total));
            // SAFETY: region lives in the harness alongside every view.
            let cnc_buffer = unsafe { AtomicBuffer::wrap(region.as_ptr(), region.len()) };

            cnc::fill_metadata(
                &cnc_buffer,
                TO_DRIVER_LENGTH,
                TO_CLIENTS_LENGTH,
                COUNTERS_METADATA_LENGTH,
                COUNTERS_VALUES_LENGTH,
                ERROR_LOG_LENGTH,
                5_000_000_000,
                0,
                101,
            );

            let buffers = CncBuffers::carve(&cnc_buffer).expect("Failed to carve CnC");
            let to_driver =
                ManyToOneRingBuffer::new(buffers.to_driver).expect("Failed to create ring");
            let to_clients = BroadcastTransmitter::new(buffers.to_clients)
                .expect("Failed to create transmitter");

            let clock = Arc::new(ManualClock::new());
            let context = Context::new()
                .with_driver_timeout_ms(DRIVER_TIMEOUT_MS)
                .with_epoch_clock(Arc::clone(&clock) as Arc<dyn crate::clock::EpochClock>)
                .with_nano_clock(Arc::clone(&clock) as Arc<dyn crate::clock::NanoClock>)
                .with_conductor_agent_invoker(true);

            let conductor =
                ClientConductor::new(&context, buffers).expect("Failed to create conductor");

            let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
            let log_file = temp_dir.path().join("stream.logbuffer");

            Self {
                _region: region,
                _temp_dir: temp_dir,
                clock,
                to_driver,
                to_clients,
                counters_values: buffers.counters_values,
                conductor,
                log_file,
            }
        }

        fn do_work(&mut self) -> usize {
            // The driver consumes the ring and stamps its heartbeat.
            self.to_driver.consumer_heartbeat_time(self.clock.time_ms());
            self.conductor.do_work().expect("do_work failed")
        }

        /// Advance simulated time in 1 ms steps, invoking `do_work` each step.
        fn do_work_for_ms(&mut self, interval_ms: i64, update_heartbeat: bool) {
            for _ in 0..interval_ms {
                self.clock.advance_ms(1);
                if update_heartbeat {
                    self.to_driver.consumer_heartbeat_time(self.clock.time_ms());
                }
                self.conductor.do_work().expect("do_work failed");
            }
        }

        fn create_log_file(&self, path: &PathBuf) {
            LogBuffers::create_new(path, TERM_MIN_LENGTH).expect("Failed to create log file");
        }

        fn read_to_driver(&self) -> Vec<(i32, Vec<u8>)> {
            let mut frames = Vec::new();
            self.to_driver.read(
                |type_id, frame| frames.push((type_id, frame.to_vec())),
                usize::MAX,
            );
            frames
        }

        fn transmit(&mut self, msg_type_id: i32, frame: &[u8]) {
            self.to_clients
                .transmit(msg_type_id, frame)
                .expect("Failed to transmit event");
        }

        fn transmit_publication_ready(&mut self, correlation_id: i64, exclusive: bool) {
            let event = PublicationReadyEvent {
                correlation_id,
                registration_id: correlation_id,
                session_id: SESSION_ID,
                stream_id: STREAM_ID,
                position_limit_counter_id: 10,
                channel_status_indicator_id: 11,
                log_file: self.log_file.to_string_lossy().into_owned(),
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            let msg_type_id = if exclusive {
                response_type::ON_EXCLUSIVE_PUBLICATION_READY
            } else {
                response_type::ON_PUBLICATION_READY
            };
            self.transmit(msg_type_id, &frame);
        }

        fn transmit_error(&mut self, correlation_id: i64, code: i32, message: &str) {
            let event = ErrorResponseEvent {
                offending_command_correlation_id: correlation_id,
                error_code: code,
                error_message: message.to_string(),
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            self.transmit(response_type::ON_ERROR, &frame);
        }

        fn transmit_subscription_ready(&mut self, correlation_id: i64) {
            let event = SubscriptionReadyEvent {
                correlation_id,
                channel_status_indicator_id: 11,
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            self.transmit(response_type::ON_SUBSCRIPTION_READY, &frame);
        }

        fn transmit_counter_ready(&mut self, correlation_id: i64, counter_id: i32) {
            let event = CounterUpdateEvent {
                correlation_id,
                counter_id,
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            self.transmit(response_type::ON_COUNTER_READY, &frame);
        }

        fn transmit_image_available(
            &mut self,
            image_correlation_id: i64,
            subscription_registration_id: i64,
            log_file: &PathBuf,
        ) {
            let event = ImageAvailableEvent {
                correlation_id: image_correlation_id,
                session_id: SESSION_ID,
                stream_id: STREAM_ID,
                subscription_registration_id,
                log_file: log_file.to_string_lossy().into_owned(),
                source_identity: "127.0.0.1:24567".to_string(),
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            self.transmit(response_type::ON_AVAILABLE_IMAGE, &frame);
        }

        fn transmit_image_unavailable(
            &mut self,
            image_correlation_id: i64,
            subscription_registration_id: i64,
        ) {
            let event = ImageUnavailableEvent {
                image_correlation_id,
                subscription_registration_id,
            };
            let mut frame = Vec::new();
            event.encode(&mut frame);
            self.transmit(response_type::ON_UNAVAILABLE_IMAGE, &frame);
        }
    }

    #[test]
    fn test_init_and_close() {
        let mut harness = DriverHarness::new();
        assert_eq!(harness.do_work(), 0);
        harness.conductor.on_close();
        assert_eq!(harness.conductor.do_work().expect("do_work failed"), 0);
    }

    #[test]
    fn test_add_publication_success() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        harness.do_work();

        // Not ready yet.
        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness.create_log_file(&harness.log_file.clone());
        harness.transmit_publication_ready(handle.registration_id(), false);
        harness.do_work();

        let publication = harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .expect("publication not ready");
        assert_eq!(publication.session_id(), SESSION_ID);
        assert_eq!(publication.stream_id(), STREAM_ID);
        assert_eq!(publication.channel(), PUB_URI);
        assert_eq!(publication.term_length(), TERM_MIN_LENGTH);
        assert_eq!(publication.position().expect("position failed"), 0);

        // The resource is delivered exactly once.
        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness
            .conductor
            .close_publication(&publication)
            .expect("close failed");
        assert!(publication.is_closed());
        harness.do_work();

        let frames = harness.read_to_driver();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, command_type::ADD_PUBLICATION);
        assert_eq!(frames[1].0, command_type::REMOVE_PUBLICATION);
    }

    #[test]
    fn test_add_publication_driver_error() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness.transmit_error(
            handle.registration_id(),
            error_code::INVALID_CHANNEL,
            "invalid channel",
        );
        harness.do_work();

        match harness.conductor.async_add_publication_poll(&handle) {
            Err(ClientError::DriverError { code, message }) => {
                assert_eq!(code, error_code::INVALID_CHANNEL);
                assert_eq!(message, "invalid channel");
            }
            other => panic!("expected driver error, got {other:?}"),
        }
    }

    #[test]
    fn test_add_publication_driver_timeout() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness.do_work_for_ms(DRIVER_TIMEOUT_MS + 1_000, true);

        assert!(matches!(
            harness.conductor.async_add_publication_poll(&handle),
            Err(ClientError::DriverTimeout(_))
        ));
    }

    #[test]
    fn test_add_exclusive_publication_success() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_exclusive_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add exclusive publication");
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_exclusive_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness.create_log_file(&harness.log_file.clone());
        harness.transmit_publication_ready(handle.registration_id(), true);
        harness.do_work();

        let publication = harness
            .conductor
            .async_add_exclusive_publication_poll(&handle)
            .expect("poll failed")
            .expect("publication not ready");
        assert_eq!(publication.session_id(), SESSION_ID);

        harness
            .conductor
            .close_exclusive_publication(&publication)
            .expect("close failed");
        harness.do_work();

        let frames = harness.read_to_driver();
        assert_eq!(frames[0].0, command_type::ADD_EXCLUSIVE_PUBLICATION);
        assert_eq!(frames[1].0, command_type::REMOVE_PUBLICATION);
    }

    #[test]
    fn test_add_exclusive_publication_driver_error() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_exclusive_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add exclusive publication");
        harness.do_work();

        harness.transmit_error(
            handle.registration_id(),
            error_code::INVALID_CHANNEL,
            "invalid channel",
        );
        harness.do_work();

        assert!(matches!(
            harness
                .conductor
                .async_add_exclusive_publication_poll(&handle),
            Err(ClientError::DriverError { .. })
        ));
    }

    #[test]
    fn test_add_exclusive_publication_driver_timeout() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_exclusive_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add exclusive publication");
        harness.do_work();

        harness.do_work_for_ms(DRIVER_TIMEOUT_MS + 1_000, true);

        assert!(matches!(
            harness
                .conductor
                .async_add_exclusive_publication_poll(&handle),
            Err(ClientError::DriverTimeout(_))
        ));
    }

    #[test]
    fn test_add_subscription_success() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_subscription(SUB_URI, STREAM_ID, None, None)
            .expect("Failed to add subscription");
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_subscription_poll(&handle)
            .expect("poll failed")
            .is_none());

        harness.transmit_subscription_ready(handle.registration_id());
        harness.do_work();

        let subscription = harness
            .conductor
            .async_add_subscription_poll(&handle)
            .expect("poll failed")
            .expect("subscription not ready");
        assert_eq!(subscription.channel(), SUB_URI);
        assert_eq!(subscription.stream_id(), STREAM_ID);
        assert_eq!(subscription.channel_status_indicator_id(), 11);
        assert!(!subscription.is_connected());

        harness
            .conductor
            .close_subscription(&subscription)
            .expect("close failed");
        harness.do_work();

        let frames = harness.read_to_driver();
        assert_eq!(frames[0].0, command_type::ADD_SUBSCRIPTION);
        assert_eq!(frames[1].0, command_type::REMOVE_SUBSCRIPTION);
    }

    #[test]
    fn test_add_subscription_driver_error() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_subscription(SUB_URI, STREAM_ID, None, None)
            .expect("Failed to add subscription");
        harness.do_work();

        harness.transmit_error(
            handle.registration_id(),
            error_code::INVALID_CHANNEL,
            "invalid channel",
        );
        harness.do_work();

        assert!(matches!(
            harness.conductor.async_add_subscription_poll(&handle),
            Err(ClientError::DriverError { .. })
        ));
    }

    #[test]
    fn test_add_subscription_driver_timeout() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_subscription(SUB_URI, STREAM_ID, None, None)
            .expect("Failed to add subscription");
        harness.do_work();

        harness.do_work_for_ms(DRIVER_TIMEOUT_MS + 1_000, true);

        assert!(matches!(
            harness.conductor.async_add_subscription_poll(&handle),
            Err(ClientError::DriverTimeout(_))
        ));
    }

    #[test]
    fn test_subscription_image_lifecycle() {
        let mut harness = DriverHarness::new();

        let available_calls = Arc::new(AtomicUsize::new(0));
        let unavailable_calls = Arc::new(AtomicUsize::new(0));
        let on_available = {
            let calls = Arc::clone(&available_calls);
            Arc::new(move |_image: &Image| {
                calls.fetch_add(1, Ordering::SeqCst);
            }) as AvailableImageHandler
        };
        let on_unavailable = {
            let calls = Arc::clone(&unavailable_calls);
            Arc::new(move |_image: &Image| {
                calls.fetch_add(1, Ordering::SeqCst);
            }) as UnavailableImageHandler
        };

        let handle = harness
            .conductor
            .async_add_subscription(SUB_URI, STREAM_ID, Some(on_available), Some(on_unavailable))
            .expect("Failed to add subscription");
        harness.do_work();
        harness.transmit_subscription_ready(handle.registration_id());
        harness.do_work();

        let subscription = harness
            .conductor
            .async_add_subscription_poll(&handle)
            .expect("poll failed")
            .expect("subscription not ready");

        let image_log = harness._temp_dir.path().join("image.logbuffer");
        harness.create_log_file(&image_log);
        let image_correlation_id = 9_000;
        harness.transmit_image_available(
            image_correlation_id,
            handle.registration_id(),
            &image_log,
        );
        harness.do_work();

        assert_eq!(available_calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscription.image_count(), 1);
        let image = subscription
            .image_by_session_id(SESSION_ID)
            .expect("image missing");
        assert_eq!(image.correlation_id(), image_correlation_id);
        assert_eq!(image.source_identity(), "127.0.0.1:24567");

        harness.transmit_image_unavailable(image_correlation_id, handle.registration_id());
        harness.do_work();

        assert_eq!(unavailable_calls.load(Ordering::SeqCst), 1);
        assert_eq!(subscription.image_count(), 0);
        assert!(image.is_closed());
    }

    #[test]
    fn test_add_counter_success() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_counter(COUNTER_TYPE_ID, &[], "")
            .expect("Failed to add counter");
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_counter_poll(&handle)
            .expect("poll failed")
            .is_none());

        let counter_id = 11;
        harness.transmit_counter_ready(handle.registration_id(), counter_id);
        harness.do_work();

        let counter = harness
            .conductor
            .async_add_counter_poll(&handle)
            .expect("poll failed")
            .expect("counter not ready");
        assert_eq!(counter.counter_id(), counter_id);

        // The driver updates the slot; the handle reads through it.
        harness.counters_values.put_i64_ordered(
            CountersReader::counter_offset(counter_id),
            777,
        );
        assert_eq!(counter.value().expect("value failed"), 777);

        harness
            .conductor
            .close_counter(&counter)
            .expect("close failed");
        harness.do_work();

        let frames = harness.read_to_driver();
        assert_eq!(frames[0].0, command_type::ADD_COUNTER);
        assert_eq!(frames[1].0, command_type::REMOVE_COUNTER);
    }

    #[test]
    fn test_add_counter_driver_error() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_counter(COUNTER_TYPE_ID, &[], "")
            .expect("Failed to add counter");
        harness.do_work();

        harness.transmit_error(
            handle.registration_id(),
            error_code::GENERIC_ERROR,
            "can not add counter",
        );
        harness.do_work();

        match harness.conductor.async_add_counter_poll(&handle) {
            Err(ClientError::DriverError { code, message }) => {
                assert_eq!(code, error_code::GENERIC_ERROR);
                assert_eq!(message, "can not add counter");
            }
            other => panic!("expected driver error, got {other:?}"),
        }
    }

    #[test]
    fn test_add_counter_driver_timeout() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_counter(COUNTER_TYPE_ID, &[], "")
            .expect("Failed to add counter");
        harness.do_work();

        harness.do_work_for_ms(DRIVER_TIMEOUT_MS + 1_000, true);

        assert!(matches!(
            harness.conductor.async_add_counter_poll(&handle),
            Err(ClientError::DriverTimeout(_))
        ));
    }

    #[test]
    fn test_timeout_fires_on_first_pass_after_deadline() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");

        // One pass just before the deadline: still pending.
        harness.clock.advance_ms(DRIVER_TIMEOUT_MS - 1);
        harness.do_work();
        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .expect("poll failed")
            .is_none());

        // First pass at the deadline: timed out.
        harness.clock.advance_ms(1);
        harness.do_work();
        assert!(matches!(
            harness.conductor.async_add_publication_poll(&handle),
            Err(ClientError::DriverTimeout(_))
        ));
    }

    #[test]
    fn test_responses_routed_by_correlation_id_in_any_order() {
        let mut harness = DriverHarness::new();

        let pub_handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        let sub_handle = harness
            .conductor
            .async_add_subscription(SUB_URI, STREAM_ID, None, None)
            .expect("Failed to add subscription");
        let counter_handle = harness
            .conductor
            .async_add_counter(COUNTER_TYPE_ID, &[], "")
            .expect("Failed to add counter");
        harness.do_work();

        // Respond in reverse order of the requests, with an error in the
        // middle: each handle resolves to its own outcome.
        harness.transmit_counter_ready(counter_handle.registration_id(), 11);
        harness.transmit_error(
            sub_handle.registration_id(),
            error_code::INVALID_CHANNEL,
            "invalid channel",
        );
        harness.create_log_file(&harness.log_file.clone());
        harness.transmit_publication_ready(pub_handle.registration_id(), false);
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_counter_poll(&counter_handle)
            .expect("poll failed")
            .is_some());
        assert!(matches!(
            harness.conductor.async_add_subscription_poll(&sub_handle),
            Err(ClientError::DriverError { .. })
        ));
        assert!(harness
            .conductor
            .async_add_publication_poll(&pub_handle)
            .expect("poll failed")
            .is_some());
    }

    #[test]
    fn test_response_for_abandoned_correlation_is_ignored() {
        let mut harness = DriverHarness::new();

        harness.transmit_counter_ready(4_242, 11);
        assert_eq!(harness.do_work(), 1);

        // Nothing registered, nothing materialized.
        let handle = AsyncAddCounter {
            registration_id: 4_242,
        };
        assert!(harness
            .conductor
            .async_add_counter_poll(&handle)
            .expect("poll failed")
            .is_none());
    }

    #[test]
    fn test_keepalive_cadence() {
        let mut harness = DriverHarness::new();

        harness.do_work();
        assert!(harness.read_to_driver().is_empty());

        harness.do_work_for_ms(600, true);

        let frames = harness.read_to_driver();
        assert!(!frames.is_empty());
        assert!(frames
            .iter()
            .all(|(type_id, _)| *type_id == command_type::CLIENT_KEEPALIVE));
    }

    #[test]
    fn test_driver_liveness_lapse_is_sticky() {
        let mut harness = DriverHarness::new();

        // The driver never stamps its heartbeat while time marches past the
        // timeout.
        harness.do_work_for_ms(DRIVER_TIMEOUT_MS + 1_000, false);

        assert!(matches!(
            harness.conductor.async_add_publication(PUB_URI, STREAM_ID),
            Err(ClientError::DriverDead(_))
        ));
        // Sticky: still failing on the next call.
        assert!(matches!(
            harness.conductor.async_add_counter(COUNTER_TYPE_ID, &[], ""),
            Err(ClientError::DriverDead(_))
        ));
    }

    #[test]
    fn test_broadcast_loss_is_sticky() {
        let mut harness = DriverHarness::new();

        // Overrun the conductor's receiver by more than the buffer capacity
        // before it gets a chance to drain.
        for _ in 0..20 {
            harness.transmit_error(1, error_code::GENERIC_ERROR, &"x".repeat(100));
        }
        harness.do_work();

        assert!(matches!(
            harness.conductor.async_add_publication(PUB_URI, STREAM_ID),
            Err(ClientError::BroadcastLoss)
        ));
    }

    #[test]
    fn test_client_timeout_event_is_sticky() {
        let mut harness = DriverHarness::new();

        let event = ClientTimeoutEvent {
            client_id: harness.conductor.client_id(),
        };
        let mut frame = Vec::new();
        event.encode(&mut frame);
        harness.transmit(response_type::ON_CLIENT_TIMEOUT, &frame);
        harness.do_work();

        assert!(matches!(
            harness.conductor.async_add_publication(PUB_URI, STREAM_ID),
            Err(ClientError::ClientTimeout)
        ));
    }

    #[test]
    fn test_client_timeout_for_other_client_is_ignored() {
        let mut harness = DriverHarness::new();

        let event = ClientTimeoutEvent {
            client_id: harness.conductor.client_id() + 1,
        };
        let mut frame = Vec::new();
        event.encode(&mut frame);
        harness.transmit(response_type::ON_CLIENT_TIMEOUT, &frame);
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .is_ok());
    }

    #[test]
    fn test_invalid_channel_rejected_without_registration() {
        let mut harness = DriverHarness::new();

        assert!(matches!(
            harness.conductor.async_add_publication("udp://nope", STREAM_ID),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(harness.read_to_driver().is_empty());
    }

    #[test]
    fn test_insufficient_space_registers_nothing() {
        let mut harness = DriverHarness::new();

        let mut last = harness.conductor.async_add_publication(PUB_URI, STREAM_ID);
        let mut accepted = 0;
        while last.is_ok() {
            accepted += 1;
            last = harness.conductor.async_add_publication(PUB_URI, STREAM_ID);
        }
        assert!(matches!(last, Err(ClientError::InsufficientSpace)));

        // Each accepted request has a registration; the rejected one none.
        assert_eq!(harness.conductor.registry.len(), accepted);
    }

    #[test]
    fn test_publication_ready_with_unmappable_log_errors_handle() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        harness.do_work();

        // Ready names a log file that was never laid out.
        harness.transmit_publication_ready(handle.registration_id(), false);
        harness.do_work();

        assert!(harness
            .conductor
            .async_add_publication_poll(&handle)
            .is_err());
    }

    #[test]
    fn test_on_close_marks_pending_handles_closed() {
        let mut harness = DriverHarness::new();

        let handle = harness
            .conductor
            .async_add_publication(PUB_URI, STREAM_ID)
            .expect("Failed to add publication");
        harness.do_work();

        harness.conductor.on_close();

        assert!(matches!(
            harness.conductor.async_add_publication_poll(&handle),
            Err(ClientError::Closed)
        ));
    }
}
