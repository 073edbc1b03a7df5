//! Wall-clock timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in wall-clock time, as seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Datetime {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl Datetime {
    /// The Unix epoch. Used as the placeholder for timestamps the
    /// filesystem does not track.
    pub const EPOCH: Datetime = Datetime {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Current time from the host calendar clock.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }
}

impl From<DateTime<Utc>> for Datetime {
    fn from(value: DateTime<Utc>) -> Self {
        Self {
            // Pre-epoch host clocks clamp to the epoch.
            seconds: value.timestamp().max(0) as u64,
            nanoseconds: value.timestamp_subsec_nanos(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        let now = Datetime::now();
        assert!(now.seconds > 1_577_836_800);
        assert!(now.nanoseconds < 1_000_000_000);
    }

    #[test]
    fn ordering_uses_seconds_then_nanos() {
        let a = Datetime {
            seconds: 1,
            nanoseconds: 999,
        };
        let b = Datetime {
            seconds: 2,
            nanoseconds: 0,
        };
        assert!(a < b);
        assert!(Datetime::EPOCH < a);
    }
}
