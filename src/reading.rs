use serde::{Serialize, Serializer};
use std::fmt;

/// State string Home Assistant uses for a value that is not known.
pub const STATE_UNKNOWN: &str = "unknown";

/// A numeric reading that may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reading {
    Known(f64),
    #[default]
    Unknown,
}

impl Reading {
    /// Parses a raw entity state. Anything that is not a finite number is Unknown.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).map(str::parse::<f64>) {
            Some(Ok(value)) if value.is_finite() => Reading::Known(value),
            _ => Reading::Unknown,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Reading::Known(_))
    }

    /// Rounds half away from zero to `digits` decimal places.
    pub fn rounded(self, digits: u32) -> Self {
        match self {
            Reading::Known(value) => {
                let scale = 10f64.powi(digits as i32);
                let rounded = (value * scale).round() / scale;
                // Keep the unrounded value when scaling overflows the f64 range
                if rounded.is_finite() {
                    Reading::Known(rounded)
                } else {
                    Reading::Known(value)
                }
            }
            Reading::Unknown => Reading::Unknown,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Known(value) => write!(f, "{value}"),
            Reading::Unknown => f.write_str(STATE_UNKNOWN),
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Known(value) => serializer.serialize_f64(*value),
            Reading::Unknown => serializer.serialize_str(STATE_UNKNOWN),
        }
    }
}

/// Parses a binary entity state into a gate reading. Only "on" and "off" are understood.
pub fn parse_gate(raw: Option<&str>) -> Option<bool> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("on") => Some(true),
        Some("off") => Some(false),
        _ => None,
    }
}

/// Magnitude of change from `old` to `new`. A missing `old` counts as zero.
pub fn delta(new: Reading, old: Reading) -> Reading {
    match (new, old) {
        (Reading::Unknown, _) => Reading::Unknown,
        (Reading::Known(new), Reading::Unknown) => Reading::Known(new.abs()),
        (Reading::Known(new), Reading::Known(old)) => Reading::Known((new - old).abs()),
    }
}

/// Folds `new_delta` into the running accumulator.
pub fn accumulate_delta(new_delta: Reading, old_accu: Reading) -> Reading {
    match (new_delta, old_accu) {
        (Reading::Unknown, _) => Reading::Unknown,
        (Reading::Known(new_delta), Reading::Unknown) => Reading::Known(new_delta),
        (Reading::Known(new_delta), Reading::Known(old_accu)) => {
            Reading::Known(old_accu + new_delta)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric_states() {
        assert_eq!(Reading::parse(Some("22.5")), Reading::Known(22.5));
        assert_eq!(Reading::parse(Some(" -3 ")), Reading::Known(-3.0));
        assert_eq!(Reading::parse(Some("unknown")), Reading::Unknown);
        assert_eq!(Reading::parse(Some("unavailable")), Reading::Unknown);
        assert_eq!(Reading::parse(Some("NaN")), Reading::Unknown);
        assert_eq!(Reading::parse(Some("inf")), Reading::Unknown);
        assert_eq!(Reading::parse(Some("")), Reading::Unknown);
        assert_eq!(Reading::parse(None), Reading::Unknown);
    }

    #[test]
    fn test_parse_gate_states() {
        assert_eq!(parse_gate(Some("on")), Some(true));
        assert_eq!(parse_gate(Some("ON")), Some(true));
        assert_eq!(parse_gate(Some("off")), Some(false));
        assert_eq!(parse_gate(Some("unavailable")), None);
        assert_eq!(parse_gate(Some("1")), None);
        assert_eq!(parse_gate(None), None);
    }

    #[test]
    fn test_delta_with_unknown_old_is_absolute_value() {
        for a in [0.0, 4.5, -7.25, 1e9] {
            assert_eq!(delta(Reading::Known(a), Reading::Unknown), Reading::Known(a.abs()));
        }
    }

    #[test]
    fn test_delta_with_unknown_new_is_unknown() {
        assert_eq!(delta(Reading::Unknown, Reading::Unknown), Reading::Unknown);
        assert_eq!(delta(Reading::Unknown, Reading::Known(3.0)), Reading::Unknown);
    }

    #[test]
    fn test_delta_is_magnitude() {
        assert_eq!(delta(Reading::Known(9.0), Reading::Known(14.0)), Reading::Known(5.0));
        assert_eq!(delta(Reading::Known(14.0), Reading::Known(9.0)), Reading::Known(5.0));
    }

    #[test]
    fn test_accumulate_delta() {
        assert_eq!(accumulate_delta(Reading::Unknown, Reading::Known(2.0)), Reading::Unknown);
        assert_eq!(accumulate_delta(Reading::Known(2.0), Reading::Unknown), Reading::Known(2.0));
        assert_eq!(
            accumulate_delta(Reading::Known(2.0), Reading::Known(3.0)),
            Reading::Known(5.0)
        );
    }

    #[test]
    fn test_accumulate_sequential_matches_sum() {
        let pairs = [(1.0, 2.0), (0.5, 0.25), (10.0, 0.0), (3.0, 4.0)];
        for (d1, d2) in pairs {
            for start in [Reading::Unknown, Reading::Known(0.0), Reading::Known(7.0)] {
                let sequential =
                    accumulate_delta(Reading::Known(d2), accumulate_delta(Reading::Known(d1), start));
                let direct = accumulate_delta(Reading::Known(d1 + d2), start);
                assert_eq!(sequential, direct);
            }
        }
    }

    #[test]
    fn test_rounding_half_away_from_zero() {
        assert_eq!(Reading::Known(2.345).rounded(1), Reading::Known(2.3));
        assert_eq!(Reading::Known(0.125).rounded(2), Reading::Known(0.13));
        assert_eq!(Reading::Known(2.5).rounded(0), Reading::Known(3.0));
        assert_eq!(Reading::Known(-2.5).rounded(0), Reading::Known(-3.0));
        assert_eq!(Reading::Unknown.rounded(2), Reading::Unknown);
    }

    #[test]
    fn test_serialize_unknown_as_state_string() {
        assert_eq!(serde_json::to_string(&Reading::Unknown).unwrap(), "\"unknown\"");
        assert_eq!(serde_json::to_string(&Reading::Known(1.5)).unwrap(), "1.5");
    }
}
