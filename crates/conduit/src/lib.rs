// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Conduit - shared-memory media-driver client
//!
//! A client library for an Aeron-protocol media driver. The driver (a
//! separate process) multiplexes UDP transports; clients negotiate
//! publications, subscriptions, and counters with it entirely through
//! shared-memory files: a many-producer command ring toward the driver and a
//! broadcast event buffer back to every client.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit::{Client, Context};
//!
//! fn main() -> conduit::Result<()> {
//!     let client = Client::connect(Context::new())?;
//!
//!     let pending = client.async_add_publication("aeron:udp?endpoint=localhost:24567", 101)?;
//!     let publication = loop {
//!         if let Some(publication) = client.async_add_publication_poll(&pending)? {
//!             break publication;
//!         }
//!     };
//!
//!     println!("session {} at position {}", publication.session_id(), publication.position()?);
//!     client.close_publication(&publication)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                            Client API                              |
//! |    Client / Context -> async add + poll -> resource handles        |
//! +--------------------------------------------------------------------+
//! |                          Conductor Agent                           |
//! |  correlation registry | event dispatch | timeouts | keepalive      |
//! +--------------------------------------------------------------------+
//! |                       Shared-Memory Plane                          |
//! |  MPSC command ring -> driver | driver -> broadcast event buffer    |
//! |  counters plane | per-stream 3-partition log buffers               |
//! +--------------------------------------------------------------------+
//! ```
//!
//! The conductor is single-threaded by contract: all protocol state is
//! mutated only by the duty-cycle thread, while application threads enter
//! through a narrow mutex-guarded surface. Requests are asynchronous and
//! correlation-id keyed; callers poll an opaque handle until the driver's
//! response (or a deadline) resolves it.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Entry point; maps the CnC file and owns the conductor |
//! | [`Context`] | Builder-style configuration (directory, timeouts, clocks) |
//! | [`Publication`] | Handle to a stream this client may write |
//! | [`Subscription`] | Handle to a stream this client observes, with [`Image`]s per source |
//! | [`Counter`] | Handle to a driver-allocated counter slot |

pub mod agent;
/// Public client facade over the conductor.
pub mod client;
/// Clocks injected into the conductor for deterministic time.
pub mod clock;
/// Command-and-control file layout shared with the driver.
pub mod cnc;
/// Wire frames and type ids of the driver protocol.
pub mod command;
/// The single-threaded client conductor agent.
pub mod conductor;
/// Lock-free shared-memory primitives (atomic buffer, ring, broadcast).
pub mod concurrent;
/// Client configuration context.
pub mod context;
/// Counter resource handle.
pub mod counter;
/// Reader over the driver's counters plane.
pub mod counters;
/// Serialization of commands into the to-driver ring.
pub mod driver_proxy;
/// Client error kinds.
pub mod error;
/// Log buffer layout and position algebra.
pub mod logbuffer;
/// Publication resource handles.
pub mod publication;
/// Subscription and image resource handles.
pub mod subscription;
/// Alignment math and memory mappings.
pub mod util;

pub use client::Client;
pub use conductor::registration::{
    AsyncAddCounter, AsyncAddExclusivePublication, AsyncAddPublication, AsyncAddSubscription,
};
pub use context::Context;
pub use counter::Counter;
pub use error::{ClientError, Result};
pub use publication::{ExclusivePublication, Publication};
pub use subscription::{Image, Subscription};

/// Library version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
