//! Persisted class instances.
//!
//! A schedule yields virtual occurrences; an instance record only exists once
//! a booking must be bound to one specific date, or an administrator seeds
//! or edits one.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{ClassId, ClassInstance, InstanceId};
use crate::schedule::save_class;
use crate::store::{StoreError, Tables};
use crate::validation::validate_time_range;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewInstance {
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    /// Defaults to the class start time.
    #[schema(value_type = Option<String>, format = "time")]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>, format = "time")]
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct InstanceEdit {
    #[schema(value_type = Option<String>, format = "date")]
    pub date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = "time")]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>, format = "time")]
    pub end_time: Option<NaiveTime>,
    pub cancelled: Option<bool>,
}

/// Returns the open instance of `class_id` on `date`, creating it from the
/// class schedule when none exists yet.
pub fn materialize(
    tables: &mut Tables,
    class_id: ClassId,
    date: NaiveDate,
) -> Result<ClassInstance, BookingError> {
    if let Some(existing) = tables.open_instance(class_id, date) {
        return Ok(existing.clone());
    }

    let class = tables.class(class_id)?;
    if !class.schedule.occurs_on(date)? {
        return Err(BookingError::DateNotInSchedule(date));
    }

    let instance = ClassInstance {
        id: 0,
        class_id,
        date,
        start_time: class.start_time,
        end_time: class.end_time,
        cancelled: false,
        special: false,
        // every class member is enrolled in a fresh occurrence
        enrolled: tables.member_count(class_id),
    };
    match tables.insert_instance(instance) {
        Ok(created) => {
            debug!(class_id, instance_id = created.id, %date, "instance materialized");
            Ok(created)
        }
        Err(StoreError::UniqueViolation { .. }) => tables
            .open_instance(class_id, date)
            .cloned()
            .ok_or(BookingError::Store(StoreError::UniqueViolation { class_id, date })),
        Err(err) => Err(err.into()),
    }
}

/// Administrator-seeded instance, exempt from schedule reconciliation.
pub fn create_special_instance(
    tables: &mut Tables,
    class_id: ClassId,
    new: NewInstance,
) -> Result<ClassInstance, BookingError> {
    let class = tables.class(class_id)?;
    let start_time = new.start_time.unwrap_or(class.start_time);
    let end_time = new.end_time.unwrap_or(class.end_time);
    validate_time_range(start_time, end_time)?;

    let instance = ClassInstance {
        id: 0,
        class_id,
        date: new.date,
        start_time,
        end_time,
        cancelled: false,
        special: true,
        enrolled: tables.member_count(class_id),
    };
    Ok(tables.insert_instance(instance)?)
}

/// Applies an administrator edit.
///
/// Rescheduling a non-special instance turns it special and excludes its old
/// date from the class schedule, so the schedule stops producing a duplicate
/// virtual occurrence. Cancelling or restoring one excludes the date as well.
pub fn edit_instance(
    tables: &mut Tables,
    instance_id: InstanceId,
    edit: InstanceEdit,
    now: NaiveDateTime,
) -> Result<ClassInstance, BookingError> {
    let previous = tables.instance(instance_id)?.clone();
    let mut next = previous.clone();
    if let Some(date) = edit.date {
        next.date = date;
    }
    if let Some(start_time) = edit.start_time {
        next.start_time = start_time;
    }
    if let Some(end_time) = edit.end_time {
        next.end_time = end_time;
    }
    if let Some(cancelled) = edit.cancelled {
        next.cancelled = cancelled;
    }
    validate_time_range(next.start_time, next.end_time)?;

    if previous.special {
        tables.update_instance(next.clone())?;
        return Ok(next);
    }

    let rescheduled = next.date != previous.date
        || next.start_time != previous.start_time
        || next.end_time != previous.end_time;
    let restored = previous.cancelled && !next.cancelled;
    let toggled = next.cancelled != previous.cancelled;

    if rescheduled || restored {
        warn!(
            class_id = previous.class_id,
            instance_id,
            "non-special instance rescheduled by hand, marking it special"
        );
        next.special = true;
    }
    tables.update_instance(next.clone())?;

    if rescheduled || toggled {
        let mut class = tables.class(previous.class_id)?.clone();
        if class.schedule.exclude(previous.date) {
            warn!(
                class_id = class.id,
                instance_id,
                date = %previous.date,
                "exclusion date added to class schedule"
            );
        }
        save_class(tables, class, now)?;
    }

    Ok(tables.instance(instance_id)?.clone())
}
