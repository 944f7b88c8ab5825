//! Cronlist field parsing and next-occurrence search for `at:` clauses.
//!
//! Cron expressions in this catalog dialect are not the classic 5-field unix crontab string —
//! each field is named (`month`, `day`, `weekday`, `hour`, `minute`, `second`), accepts a
//! **cronlist** (single values, ranges, ranges-with-step, wildcards), and `day`/`weekday` are
//! ANDed together rather than ORed the way unix cron treats them. That divergence is why this
//! module hand-rolls the field grammar and the carry search instead of shelling out to a
//! standard 5-field cron parser.

use crate::errors::{CatalogError, SchedulerError};
use crate::schedule::TaskSchedule;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};
use std::collections::BTreeSet;

const MONTH_NAMES: &[(&str, u32)] = &[
    ("jan", 1), ("january", 1),
    ("feb", 2), ("february", 2),
    ("mar", 3), ("march", 3),
    ("apr", 4), ("april", 4),
    ("may", 5),
    ("jun", 6), ("june", 6),
    ("jul", 7), ("july", 7),
    ("aug", 8), ("august", 8),
    ("sep", 9), ("september", 9),
    ("oct", 10), ("october", 10),
    ("nov", 11), ("november", 11),
    ("dec", 12), ("december", 12),
];

const WEEKDAY_NAMES: &[(&str, u32)] = &[
    ("mon", 1), ("monday", 1),
    ("tue", 2), ("tuesday", 2),
    ("wed", 3), ("wednesday", 3),
    ("thu", 4), ("thursday", 4),
    ("fri", 5), ("friday", 5),
    ("sat", 6), ("saturday", 6),
    ("sun", 7), ("sunday", 7),
];

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Month,
    Weekday,
    Day,
    Hour,
    Minute,
    Second,
}

impl FieldKind {
    fn bounds(self) -> (u32, u32) {
        match self {
            FieldKind::Month => (1, 12),
            FieldKind::Weekday => (1, 7),
            FieldKind::Day => (1, 31),
            FieldKind::Hour => (0, 23),
            FieldKind::Minute => (0, 59),
            FieldKind::Second => (0, 59),
        }
    }

    fn name_table(self) -> &'static [(&'static str, u32)] {
        match self {
            FieldKind::Month => MONTH_NAMES,
            FieldKind::Weekday => WEEKDAY_NAMES,
            _ => &[],
        }
    }

    fn label(self) -> &'static str {
        match self {
            FieldKind::Month => "month",
            FieldKind::Weekday => "weekday",
            FieldKind::Day => "day",
            FieldKind::Hour => "hour",
            FieldKind::Minute => "minute",
            FieldKind::Second => "second",
        }
    }
}

fn parse_atom(token: &str, kind: FieldKind) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    if let Ok(n) = lower.parse::<u32>() {
        return Ok(n);
    }
    for (name, value) in kind.name_table() {
        if *name == lower {
            return Ok(*value);
        }
    }
    Err(format!("`{token}` is not a valid {} value", kind.label()))
}

/// Parses one cronlist string (e.g. `"1-5,sun", "*/2", "mon-fri"`) into the set of concrete
/// values it selects, validated against the field's bounds.
fn parse_cronlist(spec: &str, kind: FieldKind) -> Result<BTreeSet<u32>, String> {
    let (min, max) = kind.bounds();
    let mut out = BTreeSet::new();
    let normalized = spec.replace(',', " ");
    for item in normalized.split_whitespace() {
        let (range_part, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("`{s}` is not a valid step"))?;
                if step == 0 {
                    return Err("step cannot be zero".to_owned());
                }
                (r, step)
            }
            None => (item, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let lo = parse_atom(a, kind)?;
            let hi = parse_atom(b, kind)?;
            if lo > hi {
                return Err(format!("range `{range_part}` is inverted"));
            }
            (lo, hi)
        } else {
            let v = parse_atom(range_part, kind)?;
            (v, v)
        };

        if lo < min || hi > max {
            return Err(format!(
                "`{item}` is out of bounds for {} ({min}-{max})",
                kind.label()
            ));
        }

        let mut v = lo;
        while v <= hi {
            out.insert(v);
            v += step;
        }
    }
    if out.is_empty() {
        return Err("cronlist is empty".to_owned());
    }
    Ok(out)
}

fn full_range(kind: FieldKind) -> BTreeSet<u32> {
    let (min, max) = kind.bounds();
    (min..=max).collect()
}

/// [`CronSchedule`] is the [`TaskSchedule`] implementation lowered from an `at:` clause: each
/// field (`month`, `day`, `weekday`, `hour`, `minute`, `second`) is either a concrete set of
/// accepted values (from a cronlist) or "any" when the field is absent from the catalog entry.
///
/// `day` and `weekday` are ANDed: both must match for a candidate date to qualify.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    month: BTreeSet<u32>,
    day: BTreeSet<u32>,
    weekday: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    minute: BTreeSet<u32>,
    second: BTreeSet<u32>,
}

impl CronSchedule {
    /// Builds a schedule from the raw cronlist strings present in an `at:` mapping. A field
    /// absent from `fields` means "any" for that field. An entirely empty `fields` map is
    /// rejected, matching the "empty spec in cron mode" fail mode.
    pub fn from_fields(
        fields: &std::collections::BTreeMap<String, String>,
    ) -> Result<Self, CatalogError> {
        if fields.is_empty() {
            return Err(CatalogError::MalformedTiming(
                "at".to_owned(),
                "cron clause has no fields".to_owned(),
            ));
        }
        let field = |name: &str, kind: FieldKind| -> Result<BTreeSet<u32>, CatalogError> {
            match fields.get(name) {
                Some(spec) => parse_cronlist(spec, kind)
                    .map_err(|e| CatalogError::MalformedTiming(name.to_owned(), e)),
                None => Ok(full_range(kind)),
            }
        };
        Ok(Self {
            month: field("month", FieldKind::Month)?,
            day: field("day", FieldKind::Day)?,
            weekday: field("weekday", FieldKind::Weekday)?,
            hour: field("hour", FieldKind::Hour)?,
            minute: field("minute", FieldKind::Minute)?,
            second: field("second", FieldKind::Second)?,
        })
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(ny, nm, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
        .day()
}

fn next_in_set_or_wrap(set: &BTreeSet<u32>, current: u32) -> (u32, bool) {
    if let Some(&v) = set.range(current..).next() {
        (v, false)
    } else {
        (*set.iter().next().expect("non-empty cronlist"), true)
    }
}

impl TaskSchedule for CronSchedule {
    fn next_after(&self, now: &DateTime<Local>) -> Result<chrono::TimeDelta, SchedulerError> {
        let start = *now + chrono::TimeDelta::seconds(1);
        let mut year = start.year();
        let mut month = start.month();
        let mut day = start.day();
        let mut hour = start.hour();
        let mut minute = start.minute();
        let mut second = start.second();
        let start_year = year;

        for _ in 0..500_000 {
            if year > start_year + 8 {
                return Err(SchedulerError::Unsatisfiable("year"));
            }

            if !self.month.contains(&month) {
                let (next_month, wrapped) = next_in_set_or_wrap(&self.month, month);
                month = next_month;
                if wrapped {
                    year += 1;
                }
                day = 1;
                hour = 0;
                minute = 0;
                second = 0;
                continue;
            }

            let dim = days_in_month(year, month);
            if day > dim {
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
                day = 1;
                hour = 0;
                minute = 0;
                second = 0;
                continue;
            }

            let wd = NaiveDate::from_ymd_opt(year, month, day)
                .expect("validated y/m/d")
                .weekday()
                .number_from_monday();
            if !self.day.contains(&day) || !self.weekday.contains(&wd) {
                day += 1;
                hour = 0;
                minute = 0;
                second = 0;
                continue;
            }

            if !self.hour.contains(&hour) {
                let (next_hour, wrapped) = next_in_set_or_wrap(&self.hour, hour);
                hour = next_hour;
                if wrapped {
                    day += 1;
                }
                minute = 0;
                second = 0;
                continue;
            }

            if !self.minute.contains(&minute) {
                let (next_minute, wrapped) = next_in_set_or_wrap(&self.minute, minute);
                minute = next_minute;
                if wrapped {
                    hour += 1;
                }
                second = 0;
                continue;
            }

            if !self.second.contains(&second) {
                let (next_second, wrapped) = next_in_set_or_wrap(&self.second, second);
                second = next_second;
                if wrapped {
                    minute += 1;
                }
                continue;
            }

            let naive = NaiveDate::from_ymd_opt(year, month, day)
                .expect("validated y/m/d")
                .and_hms_opt(hour, minute, second)
                .expect("validated h/m/s");
            let resolved = match Local.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => dt,
                chrono::LocalResult::Ambiguous(dt, _) => dt,
                chrono::LocalResult::None => {
                    chrono::Utc.from_utc_datetime(&naive).with_timezone(&Local)
                }
            };
            return Ok(resolved.signed_duration_since(*now));
        }

        Err(SchedulerError::Unsatisfiable("search exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn weekly_sunday_backup_matches_spec_scenario() {
        let sched = CronSchedule::from_fields(&fields(&[
            ("weekday", "sun"),
            ("hour", "3"),
            ("minute", "27"),
        ]))
        .unwrap();
        let monday_midnight = Local
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 1, 1)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
            )
            .unwrap();
        let delta = sched.next_after(&monday_midnight).unwrap();
        assert_eq!(delta.num_seconds(), 5 * 86400 + 3 * 3600 + 27 * 60);
    }

    #[test]
    fn rejects_empty_cron_spec() {
        assert!(CronSchedule::from_fields(&BTreeMap::new()).is_err());
    }

    #[test]
    fn rejects_malformed_cronlist() {
        assert!(CronSchedule::from_fields(&fields(&[("hour", "99")])).is_err());
        assert!(CronSchedule::from_fields(&fields(&[("hour", "5-2")])).is_err());
        assert!(CronSchedule::from_fields(&fields(&[("month", "not-a-month")])).is_err());
    }

    #[test]
    fn step_range_expands_correctly() {
        let sched = CronSchedule::from_fields(&fields(&[("minute", "0-10/5")])).unwrap();
        assert_eq!(
            sched.minute.iter().copied().collect::<Vec<_>>(),
            vec![0, 5, 10]
        );
    }

    #[test]
    fn wildcard_with_step() {
        let sched = CronSchedule::from_fields(&fields(&[("second", "*/20")])).unwrap();
        assert_eq!(
            sched.second.iter().copied().collect::<Vec<_>>(),
            vec![0, 20, 40]
        );
    }
}
