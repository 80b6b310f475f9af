// src/timestamp.rs  —  monotonic (seconds, microseconds) edge timestamps
use std::sync::OnceLock;
use std::time::Instant;

/// The moment of a key-value edge, measured from process start.
///
/// Handed to the keying callback and to the receiver on every mark edge.
/// Split into seconds + microseconds so the keyer can advance it by tone
/// durations with explicit carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds:      u64,
    pub microseconds: u32,
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Timestamp {
    /// Current monotonic time.
    pub fn now() -> Self {
        let e = epoch().elapsed();
        Self {
            seconds:      e.as_secs(),
            microseconds: e.subsec_micros(),
        }
    }

    /// Advance by `usecs`, carrying overflow into the seconds field.
    pub fn advance_us(&mut self, usecs: u32) {
        let total = self.microseconds as u64 + usecs as u64;
        self.seconds += total / 1_000_000;
        self.microseconds = (total % 1_000_000) as u32;
    }

    /// Whole value in microseconds (test helper, mostly).
    pub fn as_micros(&self) -> u64 {
        self.seconds * 1_000_000 + self.microseconds as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_carries_into_seconds() {
        let mut t = Timestamp { seconds: 1, microseconds: 999_999 };
        t.advance_us(2);
        assert_eq!(t, Timestamp { seconds: 2, microseconds: 1 });

        t.advance_us(3_000_000);
        assert_eq!(t, Timestamp { seconds: 5, microseconds: 1 });
    }

    #[test]
    fn zero_default() {
        let t = Timestamp::default();
        assert_eq!(t.as_micros(), 0);
    }
}
