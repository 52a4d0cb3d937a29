//! Utilities for messing with time at millisecond precision
//!
//! Types included allow messing with and mocking out clocks and other
//! side-effect-laden time operations.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_must_use
)]
#![forbid(unsafe_code)]

use std::{
    ops,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

/// Unix time in milliseconds
///
/// Unix time as represented by the number of milliseconds elapsed since the
/// beginning of the Unix epoch on 1970/01/01 at 00:00:00 UTC.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct UnixMillis(pub u64);

impl UnixMillis {
    /// The beginning of the Unix epoch
    pub const EPOCH: Self = Self(0);

    /// Computes the time elapsed since `earlier`, saturating at zero if
    /// `earlier` is actually later than `self`
    #[inline]
    pub const fn saturating_since(self, earlier: UnixMillis) -> DurationMillis {
        DurationMillis(self.0.saturating_sub(earlier.0))
    }
}

impl From<SystemTime> for UnixMillis {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let millis = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        UnixMillis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

impl ops::Add<DurationMillis> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn add(self, rhs: DurationMillis) -> Self::Output {
        UnixMillis(self.0.saturating_add(rhs.0))
    }
}

impl ops::AddAssign<DurationMillis> for UnixMillis {
    #[inline]
    fn add_assign(&mut self, rhs: DurationMillis) {
        *self = *self + rhs;
    }
}

impl ops::Sub<DurationMillis> for UnixMillis {
    type Output = UnixMillis;

    #[inline]
    fn sub(self, rhs: DurationMillis) -> Self::Output {
        UnixMillis(self.0.saturating_sub(rhs.0))
    }
}

/// A duration in milliseconds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
#[repr(transparent)]
pub struct DurationMillis(pub u64);

impl DurationMillis {
    /// A zero-length duration
    pub const ZERO: Self = Self(0);

    /// Constructs a duration from a number of whole seconds
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Whether this duration has zero length
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl ops::Add for DurationMillis {
    type Output = DurationMillis;

    #[inline]
    fn add(self, rhs: DurationMillis) -> Self::Output {
        DurationMillis(self.0.saturating_add(rhs.0))
    }
}

impl From<DurationMillis> for Duration {
    #[inline]
    fn from(d: DurationMillis) -> Self {
        Duration::from_millis(d.0)
    }
}

impl From<Duration> for DurationMillis {
    #[inline]
    fn from(d: Duration) -> Self {
        DurationMillis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// Represents a clock, which can tell the current time
pub trait Clock {
    /// Gets the current time according to this clock
    fn now(&self) -> UnixMillis;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    #[inline]
    fn now(&self) -> UnixMillis {
        (**self).now()
    }
}

/// The system clock as provided by `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis::from(SystemTime::now())
    }
}

/// A test clock which maintains the current time as internal state
///
/// Clones share the same underlying time, so a clock handed to a component
/// under test can still be advanced from the test body.
#[derive(Clone, Debug, Default)]
pub struct TestClock(Arc<AtomicU64>);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixMillis {
        UnixMillis(self.0.load(Ordering::Acquire))
    }
}

impl TestClock {
    /// Creates a new test clock with the specified time
    #[inline]
    pub fn new(time: UnixMillis) -> Self {
        Self(Arc::new(AtomicU64::new(time.0)))
    }

    /// Updates the clock's current time to `val`
    pub fn set(&self, val: UnixMillis) {
        self.0.store(val.0, Ordering::Release);
    }

    /// Advances the clock's current time by `inc`
    pub fn advance(&self, inc: DurationMillis) {
        self.0.fetch_add(inc.0, Ordering::AcqRel);
    }
}
