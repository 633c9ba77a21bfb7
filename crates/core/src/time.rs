use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Time source for session bookkeeping.
///
/// `Manual` shares one instant between clones so a test can hand a clock to a
/// coordinator and keep advancing it from outside.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
    Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
    #[must_use]
    pub fn system() -> Self {
        Self::System
    }

    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Returns a shared clock starting at `at`; see [`Clock::advance`].
    #[must_use]
    pub fn manual(at: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(Mutex::new(at)))
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
            Clock::Manual(shared) => *shared.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Moves a `Fixed` or `Manual` clock forward. `System` ignores this.
    ///
    /// Advancing a `Manual` clock is visible through every clone of it.
    pub fn advance(&mut self, delta: Duration) {
        match self {
            Clock::System => {}
            Clock::Fixed(t) => *t += delta,
            Clock::Manual(shared) => {
                *shared.lock().unwrap_or_else(PoisonError::into_inner) += delta;
            }
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Clock::System)
    }
}

/// Deterministic timestamp for tests (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_every_clone() {
        let mut clock = Clock::manual(fixed_now());
        let observer = clock.clone();
        clock.advance(Duration::seconds(42));
        assert_eq!(observer.now(), fixed_now() + Duration::seconds(42));
    }

    #[test]
    fn fixed_clock_is_independent_per_copy() {
        let mut clock = fixed_clock();
        let copy = clock.clone();
        clock.advance(Duration::seconds(5));
        assert_eq!(copy.now(), fixed_now());
        assert_eq!(clock.now(), fixed_now() + Duration::seconds(5));
        assert!(!clock.is_system());
    }
}
