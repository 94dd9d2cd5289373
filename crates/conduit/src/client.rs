// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The public client facade.
//!
//! `Client::connect` maps the driver's CnC file, spins on the version field
//! until the driver has published the layout, and builds the conductor over
//! the carved buffers. In agent-thread mode (the default) the client owns a
//! thread driving the conductor duty cycle; in invoker mode the embedder
//! calls [`Client::main_do_work`] on its own cadence.
//!
//! Every public operation takes the conductor mutex only for the enqueue and
//! registry bookkeeping it needs; nothing blocks while holding it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::agent::AgentRunner;
use crate::cnc::{self, CncBuffers, META_DATA_LENGTH};
use crate::concurrent::AtomicBuffer;
use crate::conductor::registration::{
    AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication, AsyncAddSubscription,
};
use crate::conductor::ClientConductor;
use crate::context::Context;
use crate::counter::Counter;
use crate::counters::CountersReader;
use crate::error::{ClientError, Result};
use crate::publication::{ExclusivePublication, Publication};
use crate::subscription::{AvailableImageHandler, Subscription, UnavailableImageHandler};
use crate::util::MappedFile;

/// Pause between CnC version probes while connecting.
const CNC_PROBE_INTERVAL_MS: u64 = 16;

pub struct Client {
    conductor: Arc<Mutex<ClientConductor>>,
    runner: Option<AgentRunner>,
    invoker_mode: bool,
    client_id: i64,
    counters: CountersReader,
    /// Keeps the CnC mapping alive for every buffer view the conductor holds.
    _cnc_mapping: MappedFile,
}

impl Client {
    /// Connect to the driver through its CnC file.
    ///
    /// Spins (with a short sleep) until the file exists and carries the
    /// expected version, bounded by the configured driver timeout.
    ///
    /// # Errors
    ///
    /// `DriverTimeout` when the CnC file does not become ready in time,
    /// `InvalidArgument` for a malformed layout.
    pub fn connect(context: Context) -> Result<Self> {
        let cnc_path = context.cnc_file_path();
        let epoch_clock = context.epoch_clock();
        let deadline_ms = epoch_clock.time_ms() + context.driver_timeout_ms();

        let mapping = loop {
            match MappedFile::map_existing(&cnc_path) {
                Ok(mapping) if mapping.len() >= META_DATA_LENGTH => {
                    // SAFETY: mapping is held across the view's use below.
                    let view = unsafe { AtomicBuffer::wrap(mapping.as_ptr(), mapping.len()) };
                    if cnc::version(&view) == cnc::CNC_VERSION {
                        break mapping;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("[Client] CnC file not ready at {}: {e}", cnc_path.display());
                }
            }

            if epoch_clock.time_ms() > deadline_ms {
                return Err(ClientError::DriverTimeout(format!(
                    "CnC file not ready within {} ms: {}",
                    context.driver_timeout_ms(),
                    cnc_path.display()
                )));
            }
            thread::sleep(Duration::from_millis(CNC_PROBE_INTERVAL_MS));
        };

        // SAFETY: mapping is owned by the client and outlives the conductor.
        let view = unsafe { AtomicBuffer::wrap(mapping.as_ptr(), mapping.len()) };
        let buffers = CncBuffers::carve(&view)?;
        let conductor = ClientConductor::new(&context, buffers)?;
        let client_id = conductor.client_id();
        let counters = conductor.counters_reader();
        let invoker_mode = context.use_conductor_agent_invoker();
        let conductor = Arc::new(Mutex::new(conductor));

        let runner = if invoker_mode {
            None
        } else {
            Some(AgentRunner::start(Arc::clone(&conductor)))
        };

        log::debug!(
            "[Client] connected: client_id={client_id} cnc={} invoker={invoker_mode}",
            cnc_path.display()
        );

        Ok(Self {
            conductor,
            runner,
            invoker_mode,
            client_id,
            counters,
            _cnc_mapping: mapping,
        })
    }

    /// Id identifying this client to the driver.
    #[inline]
    #[must_use]
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    /// Read-only view over the driver's counters plane.
    #[must_use]
    pub fn counters_reader(&self) -> CountersReader {
        self.counters.clone()
    }

    /// Run one conductor duty cycle. Invoker mode only.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` in agent-thread mode, where the client-owned thread
    /// drives the duty cycle.
    pub fn main_do_work(&self) -> Result<usize> {
        if !self.invoker_mode {
            return Err(ClientError::InvalidArgument(
                "conductor duty cycle is owned by the agent thread".to_string(),
            ));
        }
        self.conductor.lock().do_work()
    }

    /// See [`ClientConductor::async_add_publication`].
    pub fn async_add_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddPublication> {
        self.conductor.lock().async_add_publication(channel, stream_id)
    }

    /// See [`ClientConductor::async_add_publication_poll`].
    pub fn async_add_publication_poll(
        &self,
        handle: &AsyncAddPublication,
    ) -> Result<Option<Arc<Publication>>> {
        self.conductor.lock().async_add_publication_poll(handle)
    }

    /// See [`ClientConductor::async_add_exclusive_publication`].
    pub fn async_add_exclusive_publication(
        &self,
        channel: &str,
        stream_id: i32,
    ) -> Result<AsyncAddExclusivePublication> {
        self.conductor
            .lock()
            .async_add_exclusive_publication(channel, stream_id)
    }

    /// See [`ClientConductor::async_add_exclusive_publication_poll`].
    pub fn async_add_exclusive_publication_poll(
        &self,
        handle: &AsyncAddExclusivePublication,
    ) -> Result<Option<Arc<ExclusivePublication>>> {
        self.conductor
            .lock()
            .async_add_exclusive_publication_poll(handle)
    }

    /// See [`ClientConductor::async_add_subscription`].
    pub fn async_add_subscription(
        &self,
        channel: &str,
        stream_id: i32,
        on_available_image: Option<AvailableImageHandler>,
        on_unavailable_image: Option<UnavailableImageHandler>,
    ) -> Result<AsyncAddSubscription> {
        self.conductor.lock().async_add_subscription(
            channel,
            stream_id,
            on_available_image,
            on_unavailable_image,
        )
    }

    /// See [`ClientConductor::async_add_subscription_poll`].
    pub fn async_add_subscription_poll(
        &self,
        handle: &AsyncAddSubscription,
    ) -> Result<Option<Arc<Subscription>>> {
        self.conductor.lock().async_add_subscription_poll(handle)
    }

    /// See [`ClientConductor::async_add_counter`].
    pub fn async_add_counter(
        &self,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<AsyncAddCounter> {
        self.conductor.lock().async_add_counter(type_id, key, label)
    }

    /// See [`ClientConductor::async_add_counter_poll`].
    pub fn async_add_counter_poll(&self, handle: &AsyncAddCounter) -> Result<Option<Arc<Counter>>> {
        self.conductor.lock().async_add_counter_poll(handle)
    }

    /// See [`ClientConductor::close_publication`].
    pub fn close_publication(&self, publication: &Publication) -> Result<()> {
        self.conductor.lock().close_publication(publication)
    }

    /// See [`ClientConductor::close_exclusive_publication`].
    pub fn close_exclusive_publication(&self, publication: &ExclusivePublication) -> Result<()> {
        self.conductor.lock().close_exclusive_publication(publication)
    }

    /// See [`ClientConductor::close_subscription`].
    pub fn close_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.conductor.lock().close_subscription(subscription)
    }

    /// See [`ClientConductor::close_counter`].
    pub fn close_counter(&self, counter: &Counter) -> Result<()> {
        self.conductor.lock().close_counter(counter)
    }

    /// Stop the agent thread (if any) and tear down the conductor.
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            runner.stop();
        }
        self.conductor.lock().on_close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
