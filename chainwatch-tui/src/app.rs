use chainwatch_engine::{Record, RecordFilter};
use crossterm::event::KeyCode;
use rust_decimal::Decimal;
use smol_str::SmolStr;

/// User selection state: which expiry and strike are shown.
#[derive(Debug, Clone, Default)]
pub struct App {
    expiry: Option<SmolStr>,
    strike: Option<Decimal>,
    pub latest_only: bool,
    /// Chain table ordered by PCR, highest first, instead of by strike
    pub sort_by_pcr: bool,
    pub should_quit: bool,
    /// Set when the user asked for a rebuild, cleared by the main loop
    pub rebuild_requested: bool,
}

impl App {
    pub fn new() -> Self {
        Self {
            latest_only: true,
            ..Default::default()
        }
    }

    pub fn expiry(&self) -> Option<&SmolStr> {
        self.expiry.as_ref()
    }

    pub fn strike(&self) -> Option<Decimal> {
        self.strike
    }

    /// Keep the selected expiry valid against the current list (calendar
    /// order), defaulting to the nearest one.
    pub fn sync_expiry(&mut self, expiries: &[SmolStr]) {
        let valid = self
            .expiry
            .as_ref()
            .is_some_and(|expiry| expiries.contains(expiry));
        if !valid {
            self.expiry = expiries.first().cloned();
            self.strike = None;
        }
    }

    /// Keep the selected strike valid, defaulting to `default`.
    pub fn sync_strike(&mut self, strikes: &[Decimal], default: Option<Decimal>) {
        let valid = self.strike.is_some_and(|strike| strikes.contains(&strike));
        if !valid {
            self.strike = default;
        }
    }

    pub fn filter(&self) -> RecordFilter {
        let filter = RecordFilter::default().with_latest_only(self.latest_only);
        match &self.expiry {
            Some(expiry) => filter.with_expiry(expiry.clone()),
            None => filter,
        }
    }

    /// Apply the selected chain ordering. Records arrive in strike order.
    pub fn order(&self, records: &mut [Record]) {
        if self.sort_by_pcr {
            records.sort_by(|a, b| b.pcr().cmp_sort(&a.pcr()));
        }
    }

    pub fn handle_key(&mut self, code: KeyCode, expiries: &[SmolStr], strikes: &[Decimal]) {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => self.cycle_expiry(expiries, 1),
            KeyCode::BackTab => self.cycle_expiry(expiries, expiries.len().saturating_sub(1)),
            KeyCode::Up => self.step_strike(strikes, true),
            KeyCode::Down => self.step_strike(strikes, false),
            KeyCode::Char('l') | KeyCode::Char('L') => self.latest_only = !self.latest_only,
            KeyCode::Char('p') | KeyCode::Char('P') => self.sort_by_pcr = !self.sort_by_pcr,
            KeyCode::Char('r') | KeyCode::Char('R') => self.rebuild_requested = true,
            _ => {}
        }
    }

    fn cycle_expiry(&mut self, expiries: &[SmolStr], step: usize) {
        if expiries.is_empty() {
            return;
        }
        let current = self
            .expiry
            .as_ref()
            .and_then(|expiry| expiries.iter().position(|e| e == expiry))
            .unwrap_or(0);
        self.expiry = Some(expiries[(current + step) % expiries.len()].clone());
        self.strike = None;
    }

    fn step_strike(&mut self, strikes: &[Decimal], up: bool) {
        let Some(position) = self
            .strike
            .and_then(|strike| strikes.iter().position(|s| *s == strike))
        else {
            self.strike = strikes.get(strikes.len() / 2).copied();
            return;
        };

        let next = if up {
            (position + 1).min(strikes.len() - 1)
        } else {
            position.saturating_sub(1)
        };
        self.strike = Some(strikes[next]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn expiries() -> Vec<SmolStr> {
        vec![SmolStr::new("28-Oct-2026"), SmolStr::new("04-Nov-2026")]
    }

    #[test]
    fn test_expiry_selection() {
        let mut app = App::new();
        app.sync_expiry(&expiries());
        assert_eq!(app.expiry().map(|e| e.as_str()), Some("28-Oct-2026"));

        app.handle_key(KeyCode::Tab, &expiries(), &[]);
        assert_eq!(app.expiry().map(|e| e.as_str()), Some("04-Nov-2026"));

        app.handle_key(KeyCode::Tab, &expiries(), &[]);
        assert_eq!(app.expiry().map(|e| e.as_str()), Some("28-Oct-2026"));

        app.handle_key(KeyCode::BackTab, &expiries(), &[]);
        assert_eq!(app.expiry().map(|e| e.as_str()), Some("04-Nov-2026"));

        // selection disappears from the chain
        app.sync_expiry(&[SmolStr::new("28-Oct-2026")]);
        assert_eq!(app.expiry().map(|e| e.as_str()), Some("28-Oct-2026"));
    }

    #[test]
    fn test_strike_selection() {
        let strikes = vec![dec!(24400), dec!(24500), dec!(24600)];
        let mut app = App::new();

        app.sync_strike(&strikes, Some(dec!(24500)));
        assert_eq!(app.strike(), Some(dec!(24500)));

        struct TestCase {
            key: KeyCode,
            expected: Decimal,
        }

        let tests = vec![
            TestCase {
                // TC0: up
                key: KeyCode::Up,
                expected: dec!(24600),
            },
            TestCase {
                // TC1: clamps at the top
                key: KeyCode::Up,
                expected: dec!(24600),
            },
            TestCase {
                // TC2: down
                key: KeyCode::Down,
                expected: dec!(24500),
            },
            TestCase {
                // TC3: down again
                key: KeyCode::Down,
                expected: dec!(24400),
            },
            TestCase {
                // TC4: clamps at the bottom
                key: KeyCode::Down,
                expected: dec!(24400),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            app.handle_key(test.key, &expiries(), &strikes);
            assert_eq!(app.strike(), Some(test.expected), "TC{} failed", index);
        }
    }

    #[test]
    fn test_toggles_and_filter() {
        let mut app = App::new();
        assert!(app.filter().latest_only);
        assert_eq!(app.filter().expiry, None);

        app.handle_key(KeyCode::Char('l'), &[], &[]);
        app.sync_expiry(&expiries());
        let filter = app.filter();
        assert!(!filter.latest_only);
        assert_eq!(filter.expiry.as_deref(), Some("28-Oct-2026"));

        app.handle_key(KeyCode::Char('r'), &[], &[]);
        assert!(app.rebuild_requested);

        app.handle_key(KeyCode::Esc, &[], &[]);
        assert!(app.should_quit);
    }

    #[test]
    fn test_order_by_pcr() {
        use chainwatch_engine::{LegMetrics, RecordKey, Side};
        use chrono::DateTime;

        let record = |strike, call_oi, put_oi| {
            let key = RecordKey {
                strike,
                expiry: SmolStr::new("28-Oct-2026"),
                timestamp: DateTime::parse_from_rfc3339("2026-10-16T10:03:00+05:30").unwrap(),
            };
            let mut record = Record::new(&key, 24500.0);
            record.merge(Side::Call, LegMetrics { open_interest: call_oi, ..Default::default() });
            record.merge(Side::Put, LegMetrics { open_interest: put_oi, ..Default::default() });
            record
        };
        let strikes = |records: &[Record]| records.iter().map(|r| r.strike).collect::<Vec<_>>();

        let chain = vec![
            record(dec!(24400), 100, 50),
            // no call OI: unavailable, ordered as zero
            record(dec!(24500), 0, 500),
            record(dec!(24600), 100, 200),
        ];

        let mut app = App::new();
        let mut records = chain.clone();
        app.order(&mut records);
        assert_eq!(strikes(&records), strikes(&chain));

        app.handle_key(KeyCode::Char('p'), &[], &[]);
        app.order(&mut records);
        assert_eq!(strikes(&records), vec![dec!(24600), dec!(24400), dec!(24500)]);
    }
}
