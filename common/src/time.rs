//! Time utilities and constants for fxwallet.

use chrono::{DateTime, Duration, Utc};

/// Rate cache timing constants.
pub mod constants {
    use super::Duration;

    /// Age after which a cached pair rate is served stale and refreshed (30 seconds).
    pub fn rate_soft_ttl() -> Duration {
        Duration::seconds(30)
    }

    /// Age after which a cached pair rate is treated as absent (1 hour).
    pub fn rate_hard_ttl() -> Duration {
        Duration::hours(1)
    }

    /// Lifetime of a cached market rate table (60 seconds).
    pub fn market_rates_ttl() -> Duration {
        Duration::seconds(60)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Age of a timestamp relative to now. Never negative.
pub fn age_of(timestamp: Timestamp) -> Duration {
    let age = now() - timestamp;
    if age < Duration::zero() {
        Duration::zero()
    } else {
        age
    }
}
