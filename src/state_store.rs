use crate::reading::{accumulate_delta, delta, Reading};
use chrono::{NaiveDateTime, Timelike};
use tracing::debug;

/// Bookkeeping for one change sensor: the latest readings, the baseline the
/// next delta is measured from, and the deltas collected in the current period.
///
/// `accumulator` and `reported_delta` only ever hold sums of magnitudes, so
/// they never go negative.
#[derive(Debug, Clone)]
pub struct StateStore {
    gated: bool,
    round_digits: u32,
    current_value: Reading,
    previous_baseline: Reading,
    accumulator: Reading,
    gate_state: Option<bool>,
    previous_gate_state: Option<bool>,
    reported_delta: Reading,
    last_flush_time: NaiveDateTime,
    flush_pending: bool,
}

/// Copy of the store's fields, taken for publishing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSnapshot {
    pub current_value: Reading,
    pub previous_baseline: Reading,
    pub accumulator: Reading,
    pub gate_state: Option<bool>,
    pub reported_delta: Reading,
    pub last_flush_time: NaiveDateTime,
}

impl StateStore {
    pub fn new(gated: bool, round_digits: u32, now: NaiveDateTime) -> Self {
        let top_of_hour = now
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_minute(0))
            .unwrap_or(now);

        Self {
            gated,
            round_digits,
            current_value: Reading::Unknown,
            previous_baseline: Reading::Unknown,
            accumulator: Reading::Unknown,
            gate_state: None,
            previous_gate_state: None,
            reported_delta: Reading::Known(0.0),
            last_flush_time: top_of_hour,
            flush_pending: false,
        }
    }

    pub fn is_flush_pending(&self) -> bool {
        self.flush_pending
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            current_value: self.current_value,
            previous_baseline: self.previous_baseline,
            accumulator: self.accumulator,
            gate_state: self.gate_state,
            reported_delta: self.reported_delta,
            last_flush_time: self.last_flush_time,
        }
    }

    /// Records a new reading from the tracked source. The first known reading
    /// also becomes the baseline.
    pub fn on_value_changed(&mut self, value: Reading) {
        self.current_value = value;
        if value.is_known() && !self.previous_baseline.is_known() {
            self.previous_baseline = value;
        }
    }

    /// Records a new gate reading and applies edge rules: a falling edge folds
    /// the change since the baseline into the accumulator, a rising edge moves
    /// the baseline to the current value.
    pub fn on_gate_changed(&mut self, gate: Option<bool>) {
        if !self.gated {
            debug!("Ignoring gate update on an ungated sensor");
            return;
        }
        self.gate_state = gate;

        // An unknown previous state counts as off
        let was_on = self.previous_gate_state.unwrap_or(false);
        match (was_on, gate) {
            (true, Some(false)) => {
                self.accumulator = accumulate_delta(
                    delta(self.current_value, self.previous_baseline),
                    self.accumulator,
                );
                debug!("Gate closed, accumulator now {}", self.accumulator);
            }
            (false, Some(true)) => {
                self.reset_baseline();
                debug!("Gate opened, baseline reset to {}", self.previous_baseline);
            }
            _ => {}
        }

        self.previous_gate_state = gate;
    }

    /// Moves the baseline to the current value. An unknown current value keeps
    /// the old baseline, so once known it never goes back to unknown.
    fn reset_baseline(&mut self) {
        if self.current_value.is_known() {
            self.previous_baseline = self.current_value;
        }
    }

    /// Marks that a scheduled tick has been delivered and a flush is due.
    pub fn begin_flush(&mut self) {
        self.flush_pending = true;
    }

    /// Turns the period's bookkeeping into the reported delta and starts a new period.
    pub fn on_flush(&mut self, now: NaiveDateTime) {
        if self.gated {
            match self.gate_state {
                Some(true) => {
                    self.reported_delta = accumulate_delta(
                        delta(self.current_value, self.previous_baseline),
                        self.accumulator,
                    )
                }
                Some(false) => self.reported_delta = self.accumulator,
                None => debug!("Gate state unknown at flush, keeping {}", self.reported_delta),
            }
        } else {
            self.reported_delta = delta(self.current_value, self.previous_baseline);
        }

        self.reported_delta = self.reported_delta.rounded(self.round_digits);
        self.reset_baseline();
        self.accumulator = Reading::Known(0.0);
        self.last_flush_time = now;
        self.flush_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn ungated() -> StateStore {
        StateStore::new(false, 2, at(10, 17, 30))
    }

    fn gated() -> StateStore {
        StateStore::new(true, 2, at(10, 17, 30))
    }

    #[test]
    fn test_new_store() {
        let store = ungated();
        let snap = store.snapshot();
        assert_eq!(snap.reported_delta, Reading::Known(0.0));
        assert_eq!(snap.current_value, Reading::Unknown);
        assert_eq!(snap.previous_baseline, Reading::Unknown);
        assert_eq!(snap.last_flush_time, at(10, 0, 0));
        assert!(!store.is_flush_pending());
    }

    #[test]
    fn test_first_reading_bootstraps_baseline() {
        let mut store = ungated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_value_changed(Reading::Known(14.0));
        let snap = store.snapshot();
        assert_eq!(snap.current_value, Reading::Known(14.0));
        assert_eq!(snap.previous_baseline, Reading::Known(10.0));
        assert_eq!(snap.reported_delta, Reading::Known(0.0));
    }

    #[test]
    fn test_unknown_value_only_clears_current() {
        let mut store = ungated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_value_changed(Reading::Unknown);
        let snap = store.snapshot();
        assert_eq!(snap.current_value, Reading::Unknown);
        assert_eq!(snap.previous_baseline, Reading::Known(10.0));
    }

    #[test]
    fn test_ungated_flush_reports_change_since_period_start() {
        let mut store = ungated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_value_changed(Reading::Known(14.0));
        store.on_value_changed(Reading::Known(9.0));

        store.begin_flush();
        assert!(store.is_flush_pending());
        store.on_flush(at(11, 0, 5));

        let snap = store.snapshot();
        assert_eq!(snap.reported_delta, Reading::Known(1.0));
        assert_eq!(snap.previous_baseline, Reading::Known(9.0));
        assert_eq!(snap.accumulator, Reading::Known(0.0));
        assert_eq!(snap.last_flush_time, at(11, 0, 5));
        assert!(!store.is_flush_pending());

        store.on_value_changed(Reading::Known(12.5));
        store.on_flush(at(12, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Known(3.5));
    }

    #[test]
    fn test_ungated_flush_without_readings_is_unknown() {
        let mut store = ungated();
        store.on_flush(at(11, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Unknown);
    }

    #[test]
    fn test_unknown_value_at_flush_keeps_baseline() {
        let mut store = ungated();
        store.on_value_changed(Reading::Known(4.0));
        store.on_value_changed(Reading::Unknown);
        store.on_flush(at(11, 0, 5));

        let snap = store.snapshot();
        assert_eq!(snap.reported_delta, Reading::Unknown);
        assert_eq!(snap.previous_baseline, Reading::Known(4.0));

        store.on_value_changed(Reading::Known(6.0));
        store.on_flush(at(12, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Known(2.0));
    }

    #[test]
    fn test_gated_accumulates_active_intervals() {
        let mut store = gated();
        store.on_value_changed(Reading::Known(100.0));
        store.on_gate_changed(Some(false));
        store.on_gate_changed(Some(true));
        assert_eq!(store.snapshot().previous_baseline, Reading::Known(100.0));

        store.on_value_changed(Reading::Known(105.0));
        store.on_gate_changed(Some(false));
        assert_eq!(store.snapshot().accumulator, Reading::Known(5.0));

        // Change while the gate is closed is not counted
        store.on_value_changed(Reading::Known(120.0));
        store.on_gate_changed(Some(true));
        assert_eq!(store.snapshot().previous_baseline, Reading::Known(120.0));

        store.on_value_changed(Reading::Known(123.0));
        store.on_flush(at(11, 0, 5));

        let snap = store.snapshot();
        assert_eq!(snap.reported_delta, Reading::Known(8.0));
        assert_eq!(snap.accumulator, Reading::Known(0.0));
        assert_eq!(snap.previous_baseline, Reading::Known(123.0));
    }

    #[test]
    fn test_gated_flush_with_gate_off_reports_accumulator() {
        let mut store = gated();
        store.on_value_changed(Reading::Known(50.0));
        store.on_gate_changed(Some(true));
        store.on_value_changed(Reading::Known(52.25));
        store.on_gate_changed(Some(false));
        store.on_value_changed(Reading::Known(90.0));

        store.on_flush(at(11, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Known(2.25));
    }

    #[test]
    fn test_gated_flush_with_unknown_gate_keeps_reported() {
        let mut store = gated();
        store.on_value_changed(Reading::Known(50.0));
        store.on_gate_changed(Some(true));
        store.on_value_changed(Reading::Known(53.0));
        store.on_flush(at(11, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Known(3.0));

        store.on_gate_changed(None);
        store.on_value_changed(Reading::Known(70.0));
        store.on_flush(at(12, 0, 5));

        let snap = store.snapshot();
        assert_eq!(snap.reported_delta, Reading::Known(3.0));
        assert_eq!(snap.previous_baseline, Reading::Known(70.0));
        assert_eq!(snap.accumulator, Reading::Known(0.0));
    }

    #[test]
    fn test_first_gate_on_is_a_rising_edge() {
        let mut store = gated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_value_changed(Reading::Known(30.0));
        store.on_gate_changed(Some(true));
        assert_eq!(store.snapshot().previous_baseline, Reading::Known(30.0));
    }

    #[test]
    fn test_repeated_gate_state_is_not_an_edge() {
        let mut store = gated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_gate_changed(Some(true));
        store.on_value_changed(Reading::Known(12.0));
        store.on_gate_changed(Some(true));
        assert_eq!(store.snapshot().previous_baseline, Reading::Known(10.0));

        store.on_gate_changed(Some(false));
        store.on_gate_changed(Some(false));
        assert_eq!(store.snapshot().accumulator, Reading::Known(2.0));
    }

    #[test]
    fn test_gate_update_ignored_when_ungated() {
        let mut store = ungated();
        store.on_value_changed(Reading::Known(10.0));
        store.on_gate_changed(Some(true));
        assert_eq!(store.snapshot().gate_state, None);
    }

    #[test]
    fn test_flush_rounds_reported_delta() {
        let mut store = StateStore::new(false, 1, at(10, 0, 0));
        store.on_value_changed(Reading::Known(1.0));
        store.on_value_changed(Reading::Known(3.26));
        store.on_flush(at(11, 0, 5));
        assert_eq!(store.snapshot().reported_delta, Reading::Known(2.3));
        // Baseline keeps full precision
        assert_eq!(store.snapshot().previous_baseline, Reading::Known(3.26));
    }
}
