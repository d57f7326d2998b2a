//! Relative duration (`1d 2h 30m`) and absolute date (`yyyy-MM-dd`)
//! expressions used for estimates and due dates.
//!
//! Duration grammar, case-insensitive, every group optional but the order
//! fixed:
//!
//! ```text
//! duration := ws* (num "d")? ws* (num "h")? ws* (num "m")? ws*
//! num      := digit+
//! ```
//!
//! A number must be immediately followed by its unit. The empty string is a
//! valid duration of zero; telling "absent" apart from "zero" is the caller's
//! job. Absolute dates only range-check the month (01-12) and day (01-31), so
//! `2021-02-31` is accepted; calendar validity is left to the consumer.

use std::fmt::{self, Display};

use chrono::{NaiveDateTime, TimeDelta};

const UNITS: [u8; 3] = [b'd', b'h', b'm'];

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DurationExpr {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AbsoluteDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// One or more ASCII digits; `None` on no digits or on overflow.
    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        let mut value: u32 = 0;
        while let Some(b) = self.peek().filter(u8::is_ascii_digit) {
            value = value.checked_mul(10)?.checked_add(u32::from(b - b'0'))?;
            self.pos += 1;
        }
        (self.pos > start).then_some(value)
    }

    /// Exactly `width` digits.
    fn fixed_digits(&mut self, width: usize) -> Option<u32> {
        let digits = self.input.get(self.pos..self.pos + width)?;
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        self.pos += width;
        Some(
            digits
                .iter()
                .fold(0, |acc, b| acc * 10 + u32::from(b - b'0')),
        )
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        (self.peek()? == byte).then(|| self.pos += 1)
    }

    fn unit(&mut self) -> Option<u8> {
        let unit = self.peek()?.to_ascii_lowercase();
        UNITS.contains(&unit).then(|| {
            self.pos += 1;
            unit
        })
    }
}

impl DurationExpr {
    /// Parse a duration expression, `None` if it does not match the grammar.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let mut cursor = Cursor::new(input);
        let mut expr = Self::default();
        let mut next_unit = 0;
        loop {
            cursor.skip_whitespace();
            if cursor.at_end() {
                return Some(expr);
            }
            let value = cursor.number()?;
            let unit = cursor.unit()?;
            let slot = UNITS[next_unit..].iter().position(|u| *u == unit)? + next_unit;
            match UNITS[slot] {
                b'd' => expr.days = value,
                b'h' => expr.hours = value,
                _ => expr.minutes = value,
            }
            next_unit = slot + 1;
        }
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.days == 0 && self.hours == 0 && self.minutes == 0
    }

    /// Add days, then hours, then minutes to `base`, each step on the running
    /// result. `None` if the result is out of chrono's range.
    #[must_use]
    pub fn evaluate(&self, base: NaiveDateTime) -> Option<NaiveDateTime> {
        base.checked_add_signed(TimeDelta::try_days(i64::from(self.days))?)?
            .checked_add_signed(TimeDelta::try_hours(i64::from(self.hours))?)?
            .checked_add_signed(TimeDelta::try_minutes(i64::from(self.minutes))?)
    }
}

impl Display for DurationExpr {
    /// Canonical `Nd Nh Nm` form with zero components left out.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [(self.days, 'd'), (self.hours, 'h'), (self.minutes, 'm')];
        let mut first = true;
        for (value, unit) in parts.into_iter().filter(|(value, _)| *value > 0) {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{value}{unit}")?;
            first = false;
        }
        Ok(())
    }
}

impl AbsoluteDate {
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let mut cursor = Cursor::new(input.trim());
        let year = cursor.fixed_digits(4)?;
        cursor.expect(b'-')?;
        let month = cursor.fixed_digits(2)?;
        cursor.expect(b'-')?;
        let day = cursor.fixed_digits(2)?;
        if !cursor.at_end() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return None;
        }
        Some(Self {
            year: u16::try_from(year).ok()?,
            month: u8::try_from(month).ok()?,
            day: u8::try_from(day).ok()?,
        })
    }
}

impl Display for AbsoluteDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[must_use]
pub fn is_valid_duration(input: &str) -> bool {
    DurationExpr::parse(input).is_some()
}

#[must_use]
pub fn is_valid_absolute_date(input: &str) -> bool {
    AbsoluteDate::parse(input).is_some()
}

#[must_use]
pub fn evaluate_duration(input: &str, base: NaiveDateTime) -> Option<NaiveDateTime> {
    DurationExpr::parse(input)?.evaluate(base)
}

#[must_use]
pub fn normalize_duration(input: &str) -> Option<String> {
    DurationExpr::parse(input).map(|expr| expr.to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{
        AbsoluteDate, DurationExpr, evaluate_duration, is_valid_absolute_date, is_valid_duration,
        normalize_duration,
    };

    fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
        match NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(value) => value,
            None => panic!("invalid test date"),
        }
    }

    #[test]
    fn duration_grammar_accepts_documented_forms() {
        assert!(is_valid_duration(""));
        assert!(is_valid_duration("1d 2h 30m"));
        assert!(is_valid_duration("1d1h30m"));
        assert!(is_valid_duration("1d"));
        assert!(is_valid_duration("1h 30m"));
        assert!(is_valid_duration("  45M "));
        assert!(is_valid_duration("2D 4H"));
    }

    #[test]
    fn duration_grammar_rejects_other_text() {
        assert!(!is_valid_duration("2021-02-31"));
        assert!(!is_valid_duration("30m 1h"));
        assert!(!is_valid_duration("1d 1d"));
        assert!(!is_valid_duration("1 d"));
        assert!(!is_valid_duration("d"));
        assert!(!is_valid_duration("1w"));
        assert!(!is_valid_duration("99999999999d"));
    }

    #[test]
    fn absolute_date_is_lenient_about_calendar() {
        assert!(is_valid_absolute_date("2021-02-31"));
        assert!(is_valid_absolute_date("2024-12-01"));
        assert!(!is_valid_absolute_date("1h 30m"));
        assert!(!is_valid_absolute_date("2024-13-01"));
        assert!(!is_valid_absolute_date("2024-00-10"));
        assert!(!is_valid_absolute_date("2024-01-32"));
        assert!(!is_valid_absolute_date("24-01-01"));
        assert!(!is_valid_absolute_date("2024-01-01T00:00"));
        assert_eq!(
            AbsoluteDate::parse("2021-02-31").map(|d| d.to_string()),
            Some("2021-02-31".to_string())
        );
    }

    #[test]
    fn evaluation_adds_components_sequentially() {
        let base = midnight(2024, 1, 1);
        let result = evaluate_duration("1d 24h 30m", base);
        let expected = base + chrono::TimeDelta::days(1) + chrono::TimeDelta::hours(24)
            + chrono::TimeDelta::minutes(30);
        assert_eq!(result, Some(expected));
        assert_eq!(result.map(|d| d.date()), NaiveDate::from_ymd_opt(2024, 1, 3));
    }

    #[test]
    fn hours_roll_over_into_next_day() {
        let base = midnight(2024, 2, 28);
        let result = evaluate_duration("24h", base).map(|d| d.date());
        assert_eq!(result, NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(evaluate_duration("", base), Some(base));
        assert_eq!(evaluate_duration("soon", base), None);
    }

    #[test]
    fn normalization_is_canonical() {
        assert_eq!(normalize_duration("1D1H30M").as_deref(), Some("1d 1h 30m"));
        assert_eq!(normalize_duration(" 0d 2h ").as_deref(), Some("2h"));
        assert_eq!(normalize_duration("").as_deref(), Some(""));
        assert_eq!(normalize_duration("later"), None);
        assert!(DurationExpr::parse("0m").is_some_and(|d| d.is_zero()));
    }
}
