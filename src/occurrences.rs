//! Occurrence merging.
//!
//! Bookable occurrences come from two places: special instances persisted in
//! the store, and virtual occurrences computed from the class schedule. Both
//! are kept as separate variants of [`Occurrence`] until they are turned into
//! [`OccurrenceItem`]s for clients.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{
    AccountId, Class, ClassId, ClassInstance, DetailRef, InstanceId, OccurrenceItem, StudioId,
};
use crate::store::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    /// Finished occurrences, optionally limited to the last `days` days.
    Past { days: Option<u32> },
    /// Occurrences in progress right now.
    Current,
    /// Occurrences not started yet, optionally limited to the next `days` days.
    Future { days: Option<u32> },
}

impl TimeWindow {
    pub fn contains(
        &self,
        now: NaiveDateTime,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> bool {
        let today = now.date();
        let time = now.time();
        match *self {
            TimeWindow::Past { days } => {
                (date < today || (date == today && end_time < time))
                    && days.is_none_or(|days| date >= days_before(today, days))
            }
            TimeWindow::Current => date == today && start_time <= time && time <= end_time,
            TimeWindow::Future { days } => {
                (date > today || (date == today && start_time > time))
                    && days.is_none_or(|days| date <= days_after(today, days))
            }
        }
    }

    /// Replaces a missing day bound with `horizon_days`.
    pub fn capped(self, horizon_days: u32) -> Self {
        match self {
            TimeWindow::Past { days } => TimeWindow::Past {
                days: Some(days.unwrap_or(horizon_days)),
            },
            TimeWindow::Current => TimeWindow::Current,
            TimeWindow::Future { days } => TimeWindow::Future {
                days: Some(days.unwrap_or(horizon_days)),
            },
        }
    }

    /// Inclusive range of dates the schedule has to be evaluated over.
    /// Unbounded windows stop `horizon_days` away from today.
    fn date_span(&self, now: NaiveDateTime, horizon_days: u32) -> (NaiveDate, NaiveDate) {
        let today = now.date();
        match *self {
            TimeWindow::Past { days } => (
                days_before(today, days.unwrap_or(horizon_days)),
                today,
            ),
            TimeWindow::Current => (today, today),
            TimeWindow::Future { days } => (today, days_after(today, days.unwrap_or(horizon_days))),
        }
    }

    /// Future and current views read oldest first; history reads newest first.
    pub fn sort(&self, occurrences: &mut [Occurrence]) {
        match self {
            TimeWindow::Past { .. } => occurrences.sort_by_key(|o| {
                Reverse((o.date(), o.end_time(), o.class_id(), o.instance_id()))
            }),
            _ => occurrences
                .sort_by_key(|o| (o.date(), o.start_time(), o.class_id(), o.instance_id())),
        }
    }
}

fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(days.into()))
        .unwrap_or(NaiveDate::MIN)
}

fn days_after(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(days.into()))
        .unwrap_or(NaiveDate::MAX)
}

/// Per-class occurrences to leave out, e.g. the ones an account dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exceptions {
    /// Special instances, by id.
    pub special: BTreeSet<InstanceId>,
    /// Dates of non-special instances; their virtual occurrence is hidden.
    pub non_special: BTreeSet<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassSummary {
    pub studio_id: StudioId,
    pub class_id: ClassId,
    pub class_name: String,
    pub coach: String,
}

impl From<&Class> for ClassSummary {
    fn from(class: &Class) -> Self {
        Self {
            studio_id: class.studio_id,
            class_id: class.id,
            class_name: class.name.clone(),
            coach: class.coach.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence {
    /// Derived from the schedule, not stored.
    Virtual {
        class: ClassSummary,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    Materialized {
        class: ClassSummary,
        instance: ClassInstance,
    },
}

impl Occurrence {
    fn class(&self) -> &ClassSummary {
        match self {
            Occurrence::Virtual { class, .. } | Occurrence::Materialized { class, .. } => class,
        }
    }

    pub fn class_id(&self) -> ClassId {
        self.class().class_id
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            Occurrence::Virtual { date, .. } => *date,
            Occurrence::Materialized { instance, .. } => instance.date,
        }
    }

    pub fn start_time(&self) -> NaiveTime {
        match self {
            Occurrence::Virtual { start_time, .. } => *start_time,
            Occurrence::Materialized { instance, .. } => instance.start_time,
        }
    }

    pub fn end_time(&self) -> NaiveTime {
        match self {
            Occurrence::Virtual { end_time, .. } => *end_time,
            Occurrence::Materialized { instance, .. } => instance.end_time,
        }
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.detail().instance_id()
    }

    pub fn special(&self) -> bool {
        match self {
            Occurrence::Virtual { .. } => false,
            Occurrence::Materialized { instance, .. } => instance.special,
        }
    }

    pub fn detail(&self) -> DetailRef {
        let class = self.class();
        match self {
            Occurrence::Virtual { date, .. } => DetailRef::Virtual {
                studio_id: class.studio_id,
                class_id: class.class_id,
                date: *date,
            },
            Occurrence::Materialized { instance, .. } => DetailRef::Materialized {
                studio_id: class.studio_id,
                class_id: class.class_id,
                instance_id: instance.id,
            },
        }
    }

    pub fn into_item(self) -> OccurrenceItem {
        let detail = self.detail();
        let (date, start_time, end_time, special) =
            (self.date(), self.start_time(), self.end_time(), self.special());
        let class = match self {
            Occurrence::Virtual { class, .. } | Occurrence::Materialized { class, .. } => class,
        };
        OccurrenceItem {
            studio_id: class.studio_id,
            class_id: class.class_id,
            class_name: class.class_name,
            coach: class.coach,
            date,
            start_time,
            end_time,
            special,
            instance_id: detail.instance_id(),
            details: detail.path(),
        }
    }
}

/// Parameters shared by every merge.
#[derive(Debug, Clone, Copy)]
pub struct Query {
    pub window: TimeWindow,
    pub now: NaiveDateTime,
    /// Bound applied to unbounded windows, for stored and virtual
    /// occurrences alike.
    pub horizon_days: u32,
}

impl Query {
    fn bounded_window(&self) -> TimeWindow {
        self.window.capped(self.horizon_days)
    }
}

/// Special, non-cancelled instances of `class` inside the window.
pub fn special_occurrences(
    tables: &Tables,
    class: &Class,
    query: &Query,
    exceptions: &BTreeSet<InstanceId>,
) -> Vec<Occurrence> {
    tables
        .instances_of_class(class.id)
        .filter(|instance| instance.special && !instance.cancelled)
        .filter(|instance| {
            query.bounded_window().contains(
                query.now,
                instance.date,
                instance.start_time,
                instance.end_time,
            )
        })
        .filter(|instance| !exceptions.contains(&instance.id))
        .map(|instance| Occurrence::Materialized {
            class: class.into(),
            instance: instance.clone(),
        })
        .collect()
}

/// Occurrences the schedule of `class` yields inside the window.
pub fn virtual_occurrences(
    class: &Class,
    query: &Query,
    exceptions: &BTreeSet<NaiveDate>,
) -> Result<Vec<Occurrence>, BookingError> {
    let window = query.bounded_window();
    let (first, last) = window.date_span(query.now, query.horizon_days);
    let occurrences = class.schedule.between(
        first.and_time(NaiveTime::MIN),
        last.and_time(NaiveTime::MIN),
        true,
    )?;
    Ok(occurrences
        .into_iter()
        .map(|occurrence| occurrence.date())
        .filter(|date| window.contains(query.now, *date, class.start_time, class.end_time))
        .filter(|date| !exceptions.contains(date))
        .map(|date| Occurrence::Virtual {
            class: class.into(),
            date,
            start_time: class.start_time,
            end_time: class.end_time,
        })
        .collect())
}

/// Special instances followed by virtual occurrences for one class.
pub fn class_occurrences(
    tables: &Tables,
    class_id: ClassId,
    query: &Query,
    exceptions: &Exceptions,
) -> Result<Vec<Occurrence>, BookingError> {
    let class = tables.class(class_id)?;
    let mut occurrences = special_occurrences(tables, class, query, &exceptions.special);
    occurrences.extend(virtual_occurrences(class, query, &exceptions.non_special)?);
    Ok(occurrences)
}

/// Specific, non-cancelled instances inside the window, whatever their kind.
pub fn exact_occurrences(
    tables: &Tables,
    instance_ids: &[InstanceId],
    query: &Query,
) -> Result<Vec<Occurrence>, BookingError> {
    let mut occurrences = Vec::new();
    for instance_id in instance_ids {
        let instance = tables.instance(*instance_id)?;
        if instance.cancelled
            || !query.bounded_window().contains(
                query.now,
                instance.date,
                instance.start_time,
                instance.end_time,
            )
        {
            continue;
        }
        let class = tables.class(instance.class_id)?;
        occurrences.push(Occurrence::Materialized {
            class: class.into(),
            instance: instance.clone(),
        });
    }
    Ok(occurrences)
}

fn finish(query: &Query, mut occurrences: Vec<Occurrence>) -> Vec<OccurrenceItem> {
    query.window.sort(&mut occurrences);
    occurrences.into_iter().map(Occurrence::into_item).collect()
}

/// Everything bookable for one class.
pub fn list_class(
    tables: &Tables,
    class_id: ClassId,
    query: &Query,
) -> Result<Vec<OccurrenceItem>, BookingError> {
    let occurrences = class_occurrences(tables, class_id, query, &Exceptions::default())?;
    Ok(finish(query, occurrences))
}

/// Everything bookable across a studio's classes.
pub fn list_studio(
    tables: &Tables,
    studio_id: StudioId,
    query: &Query,
) -> Result<Vec<OccurrenceItem>, BookingError> {
    tables.studio(studio_id)?;
    let class_ids: Vec<ClassId> = tables
        .classes_of_studio(studio_id)
        .map(|class| class.id)
        .collect();
    let mut occurrences = Vec::new();
    for class_id in class_ids {
        occurrences.extend(class_occurrences(
            tables,
            class_id,
            query,
            &Exceptions::default(),
        )?);
    }
    Ok(finish(query, occurrences))
}

/// The account's own bookings: occurrences of its classes minus what it
/// dropped, plus instances it joined individually.
pub fn list_account(
    tables: &Tables,
    account: AccountId,
    query: &Query,
) -> Result<Vec<OccurrenceItem>, BookingError> {
    tables.account(account)?;
    let dropped = tables.dropped_instances_of(account);

    let mut occurrences = Vec::new();
    for class_id in tables.classes_of(account) {
        let mut exceptions = Exceptions::default();
        for instance_id in &dropped {
            let instance = tables.instance(*instance_id)?;
            if instance.class_id != class_id {
                continue;
            }
            if instance.special {
                exceptions.special.insert(instance.id);
            } else {
                exceptions.non_special.insert(instance.date);
            }
        }
        occurrences.extend(class_occurrences(tables, class_id, query, &exceptions)?);
    }
    occurrences.extend(exact_occurrences(
        tables,
        &tables.enrolled_instances_of(account),
        query,
    )?);
    Ok(finish(query, occurrences))
}
