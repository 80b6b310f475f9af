// src/params.rs  —  keying parameters and derived tone durations (PARIS timing)
use crate::error::{Error, Result};

// Inclusive limits for every client-settable parameter.
pub const SPEED_MIN: u32 = 4; // WPM
pub const SPEED_MAX: u32 = 60;
pub const FREQUENCY_MIN: u32 = 0; // Hz; 0 keys silence
pub const FREQUENCY_MAX: u32 = 4_000;
pub const VOLUME_MIN: u32 = 0; // percent
pub const VOLUME_MAX: u32 = 100;
pub const GAP_MIN: u32 = 0; // extra dots between characters
pub const GAP_MAX: u32 = 60;
pub const TOLERANCE_MIN: u32 = 0; // percent, receiver-side
pub const TOLERANCE_MAX: u32 = 90;
pub const WEIGHTING_MIN: u32 = 20; // percent; 50 is neutral
pub const WEIGHTING_MAX: u32 = 80;

/// PARIS standard: one dot unit is 1.2 s / WPM.
const DOT_CALIBRATION_US: u32 = 1_200_000;

/// Client-settable knobs. `tolerance` is carried for the receiver
/// collaborator; it does not shape generator durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Params {
    pub send_speed: u32,
    pub frequency:  u32,
    pub volume:     u32,
    pub gap:        u32,
    pub tolerance:  u32,
    pub weighting:  u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            send_speed: 12,
            frequency:  800,
            volume:     70,
            gap:        0,
            tolerance:  50,
            weighting:  50,
        }
    }
}

/// Range check shared by all setters: out-of-range fails and the caller
/// leaves the previous value in place.
pub(crate) fn check(name: &'static str, value: u32, min: u32, max: u32) -> Result<u32> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(Error::InvalidArgument(name))
    }
}

/// Tone durations derived from `Params`, all in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Durations {
    /// Dot mark, weighting applied.
    pub dot_us: u32,
    /// Dash mark, 3x the weighted dot.
    pub dash_us: u32,
    /// End-of-element space between marks of one character.
    pub eoe_us: u32,
    /// Additional space completing the 3-unit inter-character gap.
    pub eoc_us: u32,
    /// Additional space completing the 7-unit inter-word gap.
    pub eow_us: u32,
    /// Extra per-character space from the `gap` parameter.
    pub additional_us: u32,
    /// Extra per-word space from the `gap` parameter.
    pub adjustment_us: u32,
}

impl Durations {
    /// Recompute everything from the current parameter set.
    ///
    /// Weighting shifts duration between mark and the following space:
    /// above 50% lengthens marks and shortens the end-of-element space,
    /// below 50% the reverse. The 28/22 scaling keeps dot + eoe at two
    /// units across the whole weighting range.
    pub fn derive(p: &Params) -> Self {
        let unit = (DOT_CALIBRATION_US / p.send_speed) as i64;
        let weighting = (2 * (p.weighting as i64 - 50) * unit) / 100;

        let dot = unit + weighting;
        let eoe = unit - (28 * weighting) / 22;
        let eoc = 3 * unit - eoe;
        let eow = 7 * unit - eoc;
        let additional = p.gap as i64 * unit;
        let adjustment = (7 * additional) / 3;

        Self {
            dot_us:        dot as u32,
            dash_us:       (3 * dot) as u32,
            eoe_us:        eoe as u32,
            eoc_us:        eoc as u32,
            eow_us:        eow as u32,
            additional_us: additional as u32,
            adjustment_us: adjustment as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_weighting_gives_paris_units() {
        let p = Params { send_speed: 12, weighting: 50, ..Params::default() };
        let d = Durations::derive(&p);
        assert_eq!(d.dot_us, 100_000);
        assert_eq!(d.dash_us, 300_000);
        assert_eq!(d.eoe_us, 100_000);
        assert_eq!(d.eoc_us, 200_000);
        assert_eq!(d.eow_us, 500_000);
        assert_eq!(d.additional_us, 0);
    }

    #[test]
    fn heavy_weighting_lengthens_marks_and_shortens_spaces() {
        let p = Params { send_speed: 12, weighting: 60, ..Params::default() };
        let d = Durations::derive(&p);
        assert_eq!(d.dot_us, 120_000);
        assert_eq!(d.dash_us, 360_000);
        assert_eq!(d.eoe_us, 100_000 - 25_454);
        assert_eq!(d.eoc_us, 300_000 - d.eoe_us);
    }

    #[test]
    fn light_weighting_stays_positive_at_the_limits() {
        for &wpm in &[SPEED_MIN, SPEED_MAX] {
            for &w in &[WEIGHTING_MIN, WEIGHTING_MAX] {
                let p = Params { send_speed: wpm, weighting: w, ..Params::default() };
                let d = Durations::derive(&p);
                assert!(d.dot_us > 0, "dot at wpm={wpm} weighting={w}");
                assert!(d.eoe_us > 0, "eoe at wpm={wpm} weighting={w}");
            }
        }
    }

    #[test]
    fn gap_scales_the_extra_delays() {
        let p = Params { send_speed: 12, gap: 2, ..Params::default() };
        let d = Durations::derive(&p);
        assert_eq!(d.additional_us, 200_000);
        assert_eq!(d.adjustment_us, 466_666);
    }

    #[test]
    fn check_rejects_out_of_range() {
        assert!(check("send speed", SPEED_MIN, SPEED_MIN, SPEED_MAX).is_ok());
        assert!(check("send speed", SPEED_MAX, SPEED_MIN, SPEED_MAX).is_ok());
        assert_eq!(
            check("send speed", SPEED_MIN - 1, SPEED_MIN, SPEED_MAX),
            Err(Error::InvalidArgument("send speed"))
        );
        assert_eq!(
            check("send speed", SPEED_MAX + 1, SPEED_MIN, SPEED_MAX),
            Err(Error::InvalidArgument("send speed"))
        );
    }
}
