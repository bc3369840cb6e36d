//! Projection of snapshot history onto a fixed market-session grid.
//!
//! The grid is always complete: every slot from session open to session
//! close is emitted, and slots without an observation carry `None` so charts
//! render a gap rather than a false zero.

use crate::error::ConfigError;
use crate::types::{ObservedAt, Side, Snapshot};
use chrono::{NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde::Serialize;
use std::time::Duration;

const SESSION_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 15, 0) {
    Some(time) => time,
    None => panic!("invalid session open"),
};

const SESSION_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(time) => time,
    None => panic!("invalid session close"),
};

const SESSION_STEP_SECS: u32 = 3 * 60;

/// Trading session bounds in exchange-local time and the slot resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    open: NaiveTime,
    close: NaiveTime,
    step_secs: u32,
}

impl Default for SessionWindow {
    fn default() -> Self {
        Self {
            open: SESSION_OPEN,
            close: SESSION_CLOSE,
            step_secs: SESSION_STEP_SECS,
        }
    }
}

impl SessionWindow {
    pub fn new(open: NaiveTime, close: NaiveTime, step: Duration) -> Result<Self, ConfigError> {
        if open >= close {
            return Err(ConfigError::EmptySession {
                open: open.format("%H:%M").to_string(),
                close: close.format("%H:%M").to_string(),
            });
        }

        let step_secs = u32::try_from(step.as_secs())
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or(ConfigError::InvalidResolution)?;

        Ok(Self {
            open,
            close,
            step_secs,
        })
    }

    pub fn open(&self) -> NaiveTime {
        self.open
    }

    pub fn close(&self) -> NaiveTime {
        self.close
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(u64::from(self.step_secs))
    }

    /// Number of slots in the grid, close boundary included.
    pub fn slot_count(&self) -> usize {
        let span = self.close.num_seconds_from_midnight() - self.open.num_seconds_from_midnight();
        (span / self.step_secs) as usize + 1
    }

    /// Start time of every slot, open to close.
    pub fn slots(&self) -> impl Iterator<Item = NaiveTime> + '_ {
        let open = self.open.num_seconds_from_midnight();
        (0..self.slot_count() as u32).filter_map(move |index| {
            NaiveTime::from_num_seconds_from_midnight_opt(open + index * self.step_secs, 0)
        })
    }

    /// Slot an exchange-local time falls into, `None` outside the session.
    ///
    /// Anything within the closing minute still maps to the last slot.
    pub fn slot_index(&self, time: NaiveTime) -> Option<usize> {
        let secs = time.num_seconds_from_midnight();
        let open = self.open.num_seconds_from_midnight();
        let close = self.close.num_seconds_from_midnight();

        if secs < open || secs - secs % 60 > close {
            return None;
        }

        let index = ((secs - open) / self.step_secs) as usize;
        Some(index.min(self.slot_count() - 1))
    }
}

/// One grid slot of the OI chart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeSlot {
    pub time: NaiveTime,
    pub underlying_value: Option<f64>,
    pub call_oi: Option<u64>,
    pub put_oi: Option<u64>,
}

impl TimeSlot {
    fn empty(time: NaiveTime) -> Self {
        Self {
            time,
            underlying_value: None,
            call_oi: None,
            put_oi: None,
        }
    }

    /// `HH:MM` axis label.
    pub fn label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    pub fn has_data(&self) -> bool {
        self.call_oi.is_some() || self.put_oi.is_some()
    }
}

/// Latest value seen for a slot, with the observation time it came from.
#[derive(Debug, Clone, Copy)]
struct Latest<T> {
    at: ObservedAt,
    value: T,
}

impl<T> Latest<T> {
    /// Keep `value` if it is at least as recent. Ties go to the later call.
    fn offer(slot: &mut Option<Latest<T>>, at: ObservedAt, value: T) {
        if slot.as_ref().is_none_or(|latest| at >= latest.at) {
            *slot = Some(Latest { at, value });
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotAccumulator {
    underlying: Option<Latest<f64>>,
    call: Option<Latest<u64>>,
    put: Option<Latest<u64>>,
}

/// Project `history` onto `window` for one `(expiry, strike)`.
///
/// Only the most recent trading date present in the history is used, so a
/// buffer spanning a session boundary does not mix two days in one slot.
pub fn bucket<'a, I>(window: &SessionWindow, history: I, expiry: &str, strike: Decimal) -> Vec<TimeSlot>
where
    I: IntoIterator<Item = &'a Snapshot>,
{
    let observed: Vec<(ObservedAt, &Snapshot)> = history
        .into_iter()
        .filter_map(|snapshot| snapshot.timestamp.map(|at| (at, snapshot)))
        .collect();

    let session_date: Option<NaiveDate> = observed.iter().map(|(at, _)| at.date_naive()).max();

    let mut slots = vec![SlotAccumulator::default(); window.slot_count()];

    for (at, snapshot) in observed
        .into_iter()
        .filter(|(at, _)| Some(at.date_naive()) == session_date)
    {
        let Some(index) = window.slot_index(at.time()) else {
            continue;
        };
        let slot = &mut slots[index];

        Latest::offer(&mut slot.underlying, at, snapshot.underlying_value);
        if let Some(call) = snapshot.leg(expiry, strike, Side::Call) {
            Latest::offer(&mut slot.call, at, call.open_interest);
        }
        if let Some(put) = snapshot.leg(expiry, strike, Side::Put) {
            Latest::offer(&mut slot.put, at, put.open_interest);
        }
    }

    window
        .slots()
        .zip(slots)
        .map(|(time, slot)| {
            let has_leg = slot.call.is_some() || slot.put.is_some();
            TimeSlot {
                time,
                underlying_value: slot.underlying.filter(|_| has_leg).map(|latest| latest.value),
                call_oi: slot.call.map(|latest| latest.value),
                put_oi: slot.put.map(|latest| latest.value),
            }
        })
        .collect()
}

/// Grid with no data at all, for selections that have no history yet.
pub fn empty_grid(window: &SessionWindow) -> Vec<TimeSlot> {
    window.slots().map(TimeSlot::empty).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LegMetrics, OptionLeg};
    use chrono::DateTime;
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    fn time(raw: &str) -> NaiveTime {
        NaiveTime::parse_from_str(raw, "%H:%M:%S").unwrap()
    }

    fn leg(side: Side, open_interest: u64) -> OptionLeg {
        OptionLeg {
            side,
            strike: Some(dec!(24500)),
            expiry: Some(SmolStr::new("28-Oct-2026")),
            metrics: LegMetrics { open_interest, ..Default::default() },
        }
    }

    fn snapshot(at: &str, legs: Vec<OptionLeg>) -> Snapshot {
        Snapshot {
            timestamp: Some(DateTime::parse_from_rfc3339(at).unwrap()),
            underlying_value: 24500.0,
            legs,
        }
    }

    #[test]
    fn test_default_window_grid() {
        let window = SessionWindow::default();
        assert_eq!(window.slot_count(), 126);

        let slots: Vec<_> = window.slots().collect();
        assert_eq!(slots.len(), 126);
        assert_eq!(slots[0], time("09:15:00"));
        assert_eq!(slots[1], time("09:18:00"));
        assert_eq!(slots[125], time("15:30:00"));
    }

    #[test]
    fn test_slot_index() {
        struct TestCase {
            input: &'static str,
            expected: Option<usize>,
        }

        let tests = vec![
            TestCase {
                // TC0: before open
                input: "09:14:59",
                expected: None,
            },
            TestCase {
                // TC1: exactly at open
                input: "09:15:00",
                expected: Some(0),
            },
            TestCase {
                // TC2: rounds down within a slot
                input: "09:17:59",
                expected: Some(0),
            },
            TestCase {
                // TC3: next boundary
                input: "09:18:00",
                expected: Some(1),
            },
            TestCase {
                // TC4: closing minute is still in session
                input: "15:30:59",
                expected: Some(125),
            },
            TestCase {
                // TC5: after close
                input: "15:31:00",
                expected: None,
            },
        ];

        let window = SessionWindow::default();
        for (index, test) in tests.into_iter().enumerate() {
            let actual = window.slot_index(time(test.input));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_invalid_windows() {
        assert_eq!(
            SessionWindow::new(time("15:30:00"), time("09:15:00"), Duration::from_secs(180)),
            Err(ConfigError::EmptySession {
                open: "15:30".to_string(),
                close: "09:15".to_string()
            })
        );
        assert_eq!(
            SessionWindow::new(time("09:15:00"), time("15:30:00"), Duration::from_millis(500)),
            Err(ConfigError::InvalidResolution)
        );

        let hourly =
            SessionWindow::new(time("09:00:00"), time("15:30:00"), Duration::from_secs(3600)).unwrap();
        assert_eq!(hourly.slot_count(), 7);
        assert_eq!(hourly.slot_index(time("15:30:10")), Some(6));
    }

    #[test]
    fn test_grid_is_deterministic_and_sparse_slots_are_gaps() {
        let window = SessionWindow::default();
        let history = vec![snapshot(
            "2026-10-16T10:04:30+05:30",
            vec![leg(Side::Call, 100), leg(Side::Put, 200)],
        )];

        let empty: Vec<Snapshot> = vec![];
        assert_eq!(bucket(&window, &empty, "28-Oct-2026", dec!(24500)).len(), 126);
        assert_eq!(bucket(&window, &history, "04-Nov-2026", dec!(24500)).len(), 126);

        let slots = bucket(&window, &history, "28-Oct-2026", dec!(24500));
        assert_eq!(slots.len(), 126);

        // 10:04:30 rounds down to the 10:03 slot
        let filled: Vec<_> = slots.iter().filter(|slot| slot.has_data()).collect();
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].label(), "10:03");
        assert_eq!(filled[0].call_oi, Some(100));
        assert_eq!(filled[0].put_oi, Some(200));
        assert_eq!(filled[0].underlying_value, Some(24500.0));

        assert_eq!(slots[0].call_oi, None);
        assert_eq!(slots[0].put_oi, None);
        assert_eq!(slots[0].underlying_value, None);
    }

    #[test]
    fn test_latest_observation_wins_per_side() {
        let window = SessionWindow::default();
        // out of insertion order on purpose
        let history = vec![
            snapshot("2026-10-16T10:05:00+05:30", vec![leg(Side::Call, 150)]),
            snapshot("2026-10-16T10:03:10+05:30", vec![leg(Side::Call, 100), leg(Side::Put, 90)]),
        ];

        let slots = bucket(&window, &history, "28-Oct-2026", dec!(24500));
        let slot = slots.iter().find(|slot| slot.label() == "10:03").unwrap();
        assert_eq!(slot.call_oi, Some(150));
        // the later observation had no put leg
        assert_eq!(slot.put_oi, Some(90));
    }

    #[test]
    fn test_only_latest_session_date_is_used() {
        let window = SessionWindow::default();
        let history = vec![
            snapshot("2026-10-15T11:00:00+05:30", vec![leg(Side::Call, 1)]),
            snapshot("2026-10-16T09:15:00+05:30", vec![leg(Side::Call, 2)]),
            snapshot("2026-10-16T16:00:00+05:30", vec![leg(Side::Call, 3)]),
        ];

        let slots = bucket(&window, &history, "28-Oct-2026", dec!(24500));
        let filled: Vec<_> = slots.iter().filter_map(|slot| slot.call_oi).collect();
        assert_eq!(filled, vec![2]);
        assert_eq!(empty_grid(&window).len(), slots.len());
    }
}
