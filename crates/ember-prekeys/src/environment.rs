//! Injected time and application-lifecycle queries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Source of wall-clock time in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// What the rotation engine needs to know about the host application.
pub trait AppEnvironment: Send + Sync {
    /// True in the primary application process (not an extension).
    fn is_main_app(&self) -> bool;

    /// True while the application is in the foreground.
    fn is_app_active(&self) -> bool;

    /// True once the account is registered with the service.
    fn is_registered(&self) -> bool;
}

/// An [`AppEnvironment`] driven by flags the host flips.
#[derive(Debug)]
pub struct StaticEnvironment {
    main_app: AtomicBool,
    active: AtomicBool,
    registered: AtomicBool,
}

impl StaticEnvironment {
    pub fn new(main_app: bool, active: bool, registered: bool) -> Self {
        Self {
            main_app: AtomicBool::new(main_app),
            active: AtomicBool::new(active),
            registered: AtomicBool::new(registered),
        }
    }

    pub fn set_main_app(&self, main_app: bool) {
        self.main_app.store(main_app, Ordering::SeqCst);
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn set_registered(&self, registered: bool) {
        self.registered.store(registered, Ordering::SeqCst);
    }
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

impl AppEnvironment for StaticEnvironment {
    fn is_main_app(&self) -> bool {
        self.main_app.load(Ordering::SeqCst)
    }

    fn is_app_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
