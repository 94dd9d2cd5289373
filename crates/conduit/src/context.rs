// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client configuration context.
//!
//! Builder-style configuration for a [`crate::client::Client`]. Defaults
//! match a co-located driver; the directory and driver timeout can also be
//! overridden through the environment (`CONDUIT_DIR`,
//! `CONDUIT_DRIVER_TIMEOUT_MS`).

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::{EpochClock, NanoClock, SystemEpochClock, SystemNanoClock};
use crate::cnc::CNC_FILE;

/// Environment variable overriding the driver directory.
pub const DIR_ENV_VAR: &str = "CONDUIT_DIR";

/// Environment variable overriding the driver timeout in milliseconds.
pub const DRIVER_TIMEOUT_ENV_VAR: &str = "CONDUIT_DRIVER_TIMEOUT_MS";

/// Default time without a driver heartbeat before the client declares the
/// driver dead, and the deadline for each pending request.
pub const DEFAULT_DRIVER_TIMEOUT_MS: i64 = 10_000;

/// Default client keepalive cadence.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: i64 = 500;

/// Default delay before a closed resource's log mapping is released.
pub const DEFAULT_RESOURCE_LINGER_DURATION_NS: i64 = 3_000_000_000;

#[derive(Clone)]
pub struct Context {
    dir: PathBuf,
    driver_timeout_ms: i64,
    keepalive_interval_ms: i64,
    resource_linger_duration_ns: i64,
    use_conductor_agent_invoker: bool,
    epoch_clock: Arc<dyn EpochClock>,
    nano_clock: Arc<dyn NanoClock>,
}

impl Context {
    /// A context with defaults, honoring the environment overrides.
    #[must_use]
    pub fn new() -> Self {
        let dir = env::var(DIR_ENV_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_dir());
        let driver_timeout_ms = env::var(DRIVER_TIMEOUT_ENV_VAR)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_DRIVER_TIMEOUT_MS);

        Self {
            dir,
            driver_timeout_ms,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            resource_linger_duration_ns: DEFAULT_RESOURCE_LINGER_DURATION_NS,
            use_conductor_agent_invoker: false,
            epoch_clock: Arc::new(SystemEpochClock),
            nano_clock: Arc::new(SystemNanoClock),
        }
    }

    /// Platform default directory for the driver's CnC file:
    /// `/dev/shm/conduit-<user>` where a tmpfs exists, the system temp
    /// directory otherwise.
    #[must_use]
    pub fn default_dir() -> PathBuf {
        let user = env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_else(|_| "default".to_string());
        let base = if Path::new("/dev/shm").is_dir() {
            PathBuf::from("/dev/shm")
        } else {
            env::temp_dir()
        };
        base.join(format!("conduit-{user}"))
    }

    /// Directory containing the driver's CnC file.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_driver_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.driver_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_keepalive_interval_ms(mut self, interval_ms: i64) -> Self {
        self.keepalive_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub fn with_resource_linger_duration_ns(mut self, linger_ns: i64) -> Self {
        self.resource_linger_duration_ns = linger_ns;
        self
    }

    /// Select invoker mode: the embedder drives the conductor duty cycle
    /// instead of a client-owned agent thread.
    #[must_use]
    pub fn with_conductor_agent_invoker(mut self, use_invoker: bool) -> Self {
        self.use_conductor_agent_invoker = use_invoker;
        self
    }

    #[must_use]
    pub fn with_epoch_clock(mut self, clock: Arc<dyn EpochClock>) -> Self {
        self.epoch_clock = clock;
        self
    }

    #[must_use]
    pub fn with_nano_clock(mut self, clock: Arc<dyn NanoClock>) -> Self {
        self.nano_clock = clock;
        self
    }

    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the CnC file within the driver directory.
    #[must_use]
    pub fn cnc_file_path(&self) -> PathBuf {
        self.dir.join(CNC_FILE)
    }

    #[inline]
    #[must_use]
    pub fn driver_timeout_ms(&self) -> i64 {
        self.driver_timeout_ms
    }

    #[inline]
    #[must_use]
    pub fn keepalive_interval_ms(&self) -> i64 {
        self.keepalive_interval_ms
    }

    #[inline]
    #[must_use]
    pub fn resource_linger_duration_ns(&self) -> i64 {
        self.resource_linger_duration_ns
    }

    #[inline]
    #[must_use]
    pub fn use_conductor_agent_invoker(&self) -> bool {
        self.use_conductor_agent_invoker
    }

    #[must_use]
    pub fn epoch_clock(&self) -> Arc<dyn EpochClock> {
        Arc::clone(&self.epoch_clock)
    }

    #[must_use]
    pub fn nano_clock(&self) -> Arc<dyn NanoClock> {
        Arc::clone(&self.nano_clock)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let context = Context::new();
        assert_eq!(context.keepalive_interval_ms(), DEFAULT_KEEPALIVE_INTERVAL_MS);
        assert_eq!(
            context.resource_linger_duration_ns(),
            DEFAULT_RESOURCE_LINGER_DURATION_NS
        );
        assert!(!context.use_conductor_agent_invoker());
        assert!(context.cnc_file_path().ends_with(CNC_FILE));
    }

    #[test]
    fn test_builder_overrides() {
        let context = Context::new()
            .with_dir("/tmp/driver")
            .with_driver_timeout_ms(1_234)
            .with_keepalive_interval_ms(99)
            .with_conductor_agent_invoker(true);

        assert_eq!(context.dir(), Path::new("/tmp/driver"));
        assert_eq!(context.driver_timeout_ms(), 1_234);
        assert_eq!(context.keepalive_interval_ms(), 99);
        assert!(context.use_conductor_agent_invoker());
        assert_eq!(context.cnc_file_path(), PathBuf::from("/tmp/driver/cnc.dat"));
    }
}
