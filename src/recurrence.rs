//! Recurrence rules for class schedules.
//!
//! A [`Recurrence`] is a set of RFC 5545 `RRULE` texts plus explicit
//! inclusion (`RDATE`) and exclusion (`EXDATE`) dates. Rules are expanded
//! with the `rrule` crate; occurrences are reported at midnight granularity
//! because class times live on the class itself.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

const EXPANSION_LIMIT: u16 = u16::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("Invalid recurrence rule `{rule}`: {reason}")]
    InvalidRule { rule: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Recurrence {
    /// First day the rules apply from. `INTERVAL`, `COUNT` and `UNTIL` are
    /// counted from here. Stored classes always carry one; when absent, rules
    /// are anchored at the start of whatever range is evaluated.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "date", example = "2026-01-05")]
    pub dtstart: Option<NaiveDate>,
    /// RRULE bodies, e.g. `FREQ=WEEKLY;BYDAY=MO`.
    #[serde(default)]
    pub rrules: Vec<String>,
    #[serde(default)]
    #[schema(value_type = Vec<String>, format = "date")]
    pub rdates: Vec<NaiveDate>,
    #[serde(default)]
    #[schema(value_type = Vec<String>, format = "date")]
    pub exdates: Vec<NaiveDate>,
}

impl Recurrence {
    pub fn from_rules<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rrules: rules.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Pins the rules to `date` unless they already have a start day.
    pub fn anchored_at(mut self, date: NaiveDate) -> Self {
        self.dtstart.get_or_insert(date);
        self
    }

    /// Checks that every rule parses.
    pub fn validate(&self) -> Result<(), RecurrenceError> {
        let anchor = self.dtstart.unwrap_or_default();
        for rule in &self.rrules {
            parse_rule_set(rule, anchor.and_time(NaiveTime::MIN))?;
        }
        Ok(())
    }

    /// Adds an exclusion date. Returns `false` when it was already excluded.
    pub fn exclude(&mut self, date: NaiveDate) -> bool {
        if self.exdates.contains(&date) {
            return false;
        }
        self.exdates.push(date);
        true
    }

    /// Occurrences between `start` and `end`, sorted and de-duplicated.
    /// With `inclusive` the bounds themselves may be returned.
    pub fn between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        inclusive: bool,
    ) -> Result<Vec<NaiveDateTime>, RecurrenceError> {
        if end < start {
            return Ok(Vec::new());
        }
        let first_day = start.date();
        let last_day = end.date();
        let anchor = self.dtstart.unwrap_or(first_day);

        let mut dates = BTreeSet::new();
        if anchor <= last_day {
            let tz = rrule::Tz::Tz(chrono_tz::UTC);
            let from = first_day.max(anchor);
            let lower = from.pred_opt().unwrap_or(from);
            let upper = last_day.succ_opt().unwrap_or(last_day);
            for rule in &self.rrules {
                let set = parse_rule_set(rule, anchor.and_time(NaiveTime::MIN))?
                    .after(tz.from_utc_datetime(&lower.and_time(NaiveTime::MIN)))
                    .before(tz.from_utc_datetime(&upper.and_time(NaiveTime::MIN)));
                for occurrence in set.all(EXPANSION_LIMIT).dates {
                    dates.insert(occurrence.naive_utc().date());
                }
            }
        }
        dates.extend(self.rdates.iter().copied());
        for excluded in &self.exdates {
            dates.remove(excluded);
        }

        Ok(dates
            .into_iter()
            .map(|date| date.and_time(NaiveTime::MIN))
            .filter(|occurrence| {
                if inclusive {
                    start <= *occurrence && *occurrence <= end
                } else {
                    start < *occurrence && *occurrence < end
                }
            })
            .collect())
    }

    /// Whether the rules yield an occurrence on `date`.
    pub fn occurs_on(&self, date: NaiveDate) -> Result<bool, RecurrenceError> {
        let start = date.and_time(NaiveTime::MIN);
        let end = date.and_hms_opt(23, 59, 59).unwrap_or(start);
        Ok(!self.between(start, end, true)?.is_empty())
    }
}

fn parse_rule_set(rule: &str, anchor: NaiveDateTime) -> Result<rrule::RRuleSet, RecurrenceError> {
    let invalid = |reason: String| RecurrenceError::InvalidRule {
        rule: rule.to_string(),
        reason,
    };
    let body = rule.trim();
    let body = body.strip_prefix("RRULE:").unwrap_or(body);
    if body.is_empty() {
        return Err(invalid("rule is empty".into()));
    }
    if body.contains(['\n', '\r']) {
        return Err(invalid("rule must be a single line".into()));
    }
    format!(
        "DTSTART:{}\nRRULE:{}",
        anchor.format("%Y%m%dT%H%M%SZ"),
        body
    )
    .parse::<rrule::RRuleSet>()
    .map_err(|err| invalid(err.to_string()))
}
