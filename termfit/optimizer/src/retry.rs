use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Blocking pause between attempts, injectable so tests skip real delays.
pub trait Sleeper: Send + Sync {
    /// Blocks the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeps on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// One-based attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attempt(u32);

impl Attempt {
    /// The first attempt.
    pub const FIRST: Self = Self(1);

    /// Attempt number, starting at 1.
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    /// The following attempt, if the budget allows one.
    #[must_use]
    pub const fn next_within(self, max_attempts: u32) -> Option<Self> {
        if self.0 < max_attempts {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
