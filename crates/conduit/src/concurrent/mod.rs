// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free shared-memory primitives: atomic buffer views, the
//! many-producer command ring, and the broadcast event buffer.

pub mod atomic_buffer;
pub mod broadcast;
pub mod ring_buffer;

pub use atomic_buffer::AtomicBuffer;
pub use broadcast::{BroadcastError, BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver};
pub use ring_buffer::{ManyToOneRingBuffer, RingBufferError};
