use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout for a test run, in whole seconds, clamped to `[-60, 60]`.
///
/// A positive value means "wait for the process up to this long". A negative
/// value means "return immediately and collect output in the background for
/// at most `|value|` seconds". Zero is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTimeout(i32);

impl RunTimeout {
    /// Upper bound on `|seconds|`.
    pub const LIMIT_SECONDS: i32 = 60;

    /// Used when the caller does not ask for a specific timeout.
    pub const DEFAULT: Self = Self(5);

    /// Clamp a requested timeout into the supported range.
    ///
    /// Values above 60 and exactly 0 become 60; values below -60 become -60.
    #[must_use]
    pub fn clamp(requested: i64) -> Self {
        let limit = i64::from(Self::LIMIT_SECONDS);
        let seconds = if requested > limit || requested == 0 {
            limit
        } else if requested < -limit {
            -limit
        } else {
            requested
        };
        Self(i32::try_from(seconds).unwrap_or(Self::LIMIT_SECONDS))
    }

    /// Returns the signed number of seconds.
    #[must_use]
    pub const fn seconds(self) -> i32 {
        self.0
    }

    /// Returns `true` when the caller asked for fire-and-forget semantics.
    #[must_use]
    pub const fn is_detached(self) -> bool {
        self.0 < 0
    }

    /// Returns the wait bound as a [`Duration`] regardless of sign.
    #[must_use]
    pub fn duration(self) -> Duration {
        Duration::from_secs(u64::from(self.0.unsigned_abs()))
    }
}

impl Default for RunTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for RunTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
