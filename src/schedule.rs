//! Class administration and schedule reconciliation.
//!
//! Whenever a class's recurrence, start time or end time changes, every
//! upcoming non-special instance is checked against the new schedule:
//! instances on dates the schedule no longer produces are cancelled, and
//! instances on valid dates take over the new class times.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{Class, ClassId, InstanceId, StudioId};
use crate::recurrence::Recurrence;
use crate::store::Tables;
use crate::validation::{validate_capacity, validate_time_range};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewClass {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub coach: String,
    pub capacity: u32,
    #[schema(value_type = String, format = "time", example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "10:00:00")]
    pub end_time: NaiveTime,
    pub schedule: Recurrence,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClassUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub coach: Option<String>,
    pub capacity: Option<u32>,
    #[schema(value_type = Option<String>, format = "time")]
    pub start_time: Option<NaiveTime>,
    #[schema(value_type = Option<String>, format = "time")]
    pub end_time: Option<NaiveTime>,
    pub schedule: Option<Recurrence>,
}

/// Instances touched by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    pub cancelled: Vec<InstanceId>,
    pub retimed: Vec<InstanceId>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClassUpdated {
    pub class: Class,
    pub reconciled: ReconcileReport,
}

/// Creates a class. A schedule without a start day is pinned to the day of
/// creation.
pub fn create_class(
    tables: &mut Tables,
    studio_id: StudioId,
    new: NewClass,
    now: NaiveDateTime,
) -> Result<Class, BookingError> {
    tables.studio(studio_id)?;
    validate_time_range(new.start_time, new.end_time)?;
    validate_capacity(new.capacity)?;
    let schedule = new.schedule.anchored_at(now.date());
    schedule.validate()?;

    Ok(tables.insert_class(Class {
        id: 0,
        studio_id,
        name: new.name,
        description: new.description,
        coach: new.coach,
        capacity: new.capacity,
        enrolled: 0,
        start_time: new.start_time,
        end_time: new.end_time,
        schedule,
    }))
}

pub fn update_class(
    tables: &mut Tables,
    class_id: ClassId,
    update: ClassUpdate,
    now: NaiveDateTime,
) -> Result<ClassUpdated, BookingError> {
    let mut class = tables.class(class_id)?.clone();
    if let Some(name) = update.name {
        class.name = name;
    }
    if let Some(description) = update.description {
        class.description = description;
    }
    if let Some(coach) = update.coach {
        class.coach = coach;
    }
    if let Some(capacity) = update.capacity {
        class.capacity = validate_capacity(capacity)?;
    }
    if let Some(start_time) = update.start_time {
        class.start_time = start_time;
    }
    if let Some(end_time) = update.end_time {
        class.end_time = end_time;
    }
    if let Some(schedule) = update.schedule {
        // keep the phase of the current rules
        let anchor = class.schedule.dtstart.unwrap_or(now.date());
        let schedule = schedule.anchored_at(anchor);
        schedule.validate()?;
        class.schedule = schedule;
    }
    validate_time_range(class.start_time, class.end_time)?;

    let reconciled = save_class(tables, class, now)?;
    Ok(ClassUpdated {
        class: tables.class(class_id)?.clone(),
        reconciled,
    })
}

/// Persists `class`, reconciling its instances when scheduling changed.
/// Counters are owned by the ledger and are never taken from `class`.
pub(crate) fn save_class(
    tables: &mut Tables,
    class: Class,
    now: NaiveDateTime,
) -> Result<ReconcileReport, BookingError> {
    let stored = tables.class_mut(class.id)?;
    let rescheduled = stored.schedule != class.schedule
        || stored.start_time != class.start_time
        || stored.end_time != class.end_time;
    let enrolled = stored.enrolled;
    *stored = Class { enrolled, ..class };

    if !rescheduled {
        return Ok(ReconcileReport::default());
    }

    let class_id = stored.id;
    match reconcile(tables, class_id, now) {
        Ok(report) => Ok(report),
        Err(err) => {
            error!(class_id, error = %err, "schedule reconciliation failed");
            Ok(ReconcileReport::default())
        }
    }
}

/// Repairs upcoming non-special instances of `class_id` against its current
/// schedule.
pub fn reconcile(
    tables: &mut Tables,
    class_id: ClassId,
    now: NaiveDateTime,
) -> Result<ReconcileReport, BookingError> {
    let mut report = ReconcileReport::default();
    let Some(furthest) = tables.furthest_instance_date(class_id) else {
        return Ok(report);
    };
    let class = tables.class(class_id)?.clone();
    let today = now.date();
    if furthest < today {
        return Ok(report);
    }

    let until = furthest.succ_opt().unwrap_or(furthest).and_time(NaiveTime::MIN);
    let valid: BTreeSet<NaiveDate> = class
        .schedule
        .between(today.and_time(NaiveTime::MIN), until, true)?
        .into_iter()
        .map(|occurrence| occurrence.date())
        .collect();

    let candidates: Vec<_> = tables
        .instances_of_class(class_id)
        .filter(|instance| instance.holds_slot())
        .filter(|instance| {
            instance.date > today || (instance.date == today && instance.start_time > now.time())
        })
        .cloned()
        .collect();

    for mut instance in candidates {
        if !valid.contains(&instance.date) {
            warn!(
                class_id,
                instance_id = instance.id,
                date = %instance.date,
                "instance cancelled, its date no longer matches the class schedule"
            );
            instance.cancelled = true;
            report.cancelled.push(instance.id);
            tables.update_instance(instance)?;
            continue;
        }

        let mut retimed = false;
        if instance.start_time != class.start_time {
            warn!(
                class_id,
                instance_id = instance.id,
                from = %instance.start_time,
                to = %class.start_time,
                "instance start time adjusted to match the class"
            );
            instance.start_time = class.start_time;
            retimed = true;
        }
        if instance.end_time != class.end_time {
            warn!(
                class_id,
                instance_id = instance.id,
                from = %instance.end_time,
                to = %class.end_time,
                "instance end time adjusted to match the class"
            );
            instance.end_time = class.end_time;
            retimed = true;
        }
        if retimed {
            report.retimed.push(instance.id);
            tables.update_instance(instance)?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materializer::{NewInstance, create_special_instance, materialize};
    use crate::models::Studio;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Tables, Class) {
        let mut tables = Tables::default();
        let studio = tables.insert_studio(Studio {
            id: 0,
            name: "Downtown".into(),
            address: "1 Main St".into(),
            postal_code: "M5V2T6".into(),
            phone_num: "4165550000".into(),
            lat: 43.6,
            long: -79.4,
            amenities: Vec::new(),
        });
        let class = create_class(
            &mut tables,
            studio.id,
            NewClass {
                name: "Yoga".into(),
                description: String::new(),
                coach: "Ana".into(),
                capacity: 5,
                start_time: time(9, 0),
                end_time: time(10, 0),
                schedule: Recurrence::from_rules(["FREQ=WEEKLY;BYDAY=MO"]),
            },
            at(2026, 1, 5, 8, 0),
        )
        .unwrap();
        (tables, class)
    }

    fn biweekly(tables: &mut Tables, studio_id: StudioId, created: NaiveDateTime) -> Class {
        create_class(
            tables,
            studio_id,
            NewClass {
                name: "Pilates".into(),
                description: String::new(),
                coach: "Cy".into(),
                capacity: 5,
                start_time: time(9, 0),
                end_time: time(10, 0),
                schedule: Recurrence::from_rules(["FREQ=WEEKLY;INTERVAL=2;BYDAY=MO"]),
            },
            created,
        )
        .unwrap()
    }

    #[test]
    fn test_end_time_change_retimes_future_instance() {
        // Wednesday 2026-01-07; next Monday is 2026-01-12
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, class) = setup();
        let instance = materialize(&mut tables, class.id, date(2026, 1, 12)).unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                end_time: Some(time(10, 30)),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(updated.reconciled.retimed, vec![instance.id]);
        let stored = tables.instance(instance.id).unwrap();
        assert_eq!(stored.end_time, time(10, 30));
        assert_eq!(stored.start_time, time(9, 0));
        assert!(!stored.cancelled);
    }

    #[test]
    fn test_rule_change_cancels_orphaned_instance() {
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, class) = setup();
        let monday = materialize(&mut tables, class.id, date(2026, 1, 12)).unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                schedule: Some(Recurrence::from_rules(["FREQ=WEEKLY;BYDAY=TU"])),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(updated.reconciled.cancelled, vec![monday.id]);
        assert!(tables.instance(monday.id).unwrap().cancelled);
        assert!(tables.open_instance(class.id, monday.date).is_none());
    }

    #[test]
    fn test_special_and_past_instances_are_left_alone() {
        let now = at(2026, 1, 13, 12, 0);
        let (mut tables, class) = setup();
        let past = materialize(&mut tables, class.id, date(2026, 1, 12)).unwrap();
        let special = create_special_instance(
            &mut tables,
            class.id,
            NewInstance {
                date: date(2026, 1, 15),
                start_time: Some(time(18, 0)),
                end_time: Some(time(19, 0)),
            },
        )
        .unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                schedule: Some(Recurrence::from_rules(["FREQ=WEEKLY;BYDAY=FR"])),
                start_time: Some(time(7, 0)),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(updated.reconciled, ReconcileReport::default());
        assert_eq!(tables.instance(past.id).unwrap(), &past);
        assert_eq!(tables.instance(special.id).unwrap(), &special);
    }

    #[test]
    fn test_today_instance_not_started_is_checked() {
        let now = at(2026, 1, 12, 8, 0);
        let (mut tables, class) = setup();
        let today = materialize(&mut tables, class.id, date(2026, 1, 12)).unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                start_time: Some(time(8, 30)),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(updated.reconciled.retimed, vec![today.id]);
        assert_eq!(tables.instance(today.id).unwrap().start_time, time(8, 30));
    }

    #[test]
    fn test_resave_without_schedule_change_is_noop() {
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, class) = setup();
        let instance = materialize(&mut tables, class.id, date(2026, 1, 12)).unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                name: Some("Morning Yoga".into()),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        assert_eq!(updated.class.name, "Morning Yoga");
        assert_eq!(updated.reconciled, ReconcileReport::default());
        assert_eq!(tables.instance(instance.id).unwrap(), &instance);
    }

    #[test]
    fn test_inverted_times_rejected() {
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, class) = setup();
        let err = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                start_time: Some(time(11, 0)),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(tables.class(class.id).unwrap().start_time, time(9, 0));
    }

    #[test]
    fn test_invalid_rule_rejected_on_create() {
        let (mut tables, class) = setup();
        let err = create_class(
            &mut tables,
            class.studio_id,
            NewClass {
                name: "Spin".into(),
                description: String::new(),
                coach: "Bo".into(),
                capacity: 10,
                start_time: time(9, 0),
                end_time: time(10, 0),
                schedule: Recurrence::from_rules(["FREQ=NEVER"]),
            },
            at(2026, 1, 5, 8, 0),
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::Recurrence(_)));
    }

    #[test]
    fn test_non_special_instances_track_schedule() {
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, class) = setup();
        for day in [12, 19, 26] {
            materialize(&mut tables, class.id, date(2026, 1, day)).unwrap();
        }
        let mut schedule = Recurrence::from_rules(["FREQ=WEEKLY;BYDAY=MO"]);
        schedule.exclude(date(2026, 1, 19));
        update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                schedule: Some(schedule.clone()),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();

        let stored = tables.class(class.id).unwrap().schedule.clone();
        for instance in tables.instances_of_class(class.id) {
            if !instance.special {
                assert!(instance.cancelled || stored.occurs_on(instance.date).unwrap());
            }
        }
        assert!(tables.open_instance(class.id, date(2026, 1, 19)).is_none());
    }

    #[test]
    fn test_create_class_pins_schedule_start() {
        let (_, class) = setup();
        assert_eq!(class.schedule.dtstart, Some(date(2026, 1, 5)));

        let mut tables = Tables::default();
        let studio = tables.insert_studio(Studio {
            id: 0,
            name: "Uptown".into(),
            address: "2 Main St".into(),
            postal_code: "M5V2T6".into(),
            phone_num: "4165550001".into(),
            lat: 43.7,
            long: -79.4,
            amenities: Vec::new(),
        });
        let mut explicit = Recurrence::from_rules(["FREQ=DAILY"]);
        explicit.dtstart = Some(date(2026, 3, 1));
        let class = create_class(
            &mut tables,
            studio.id,
            NewClass {
                name: "Spin".into(),
                description: String::new(),
                coach: "Bo".into(),
                capacity: 10,
                start_time: time(9, 0),
                end_time: time(10, 0),
                schedule: explicit,
            },
            at(2026, 1, 7, 12, 0),
        )
        .unwrap();
        assert_eq!(class.schedule.dtstart, Some(date(2026, 3, 1)));
    }

    #[test]
    fn test_biweekly_dates_agree_between_listing_and_materializing() {
        // created Wednesday 2026-01-07: the rule runs on the Mondays of the
        // first week (2026-01-05, already past) and every second week after
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, weekly) = setup();
        let class = biweekly(&mut tables, weekly.studio_id, now);

        let listed: Vec<NaiveDate> = class
            .schedule
            .between(now, at(2026, 2, 10, 0, 0), true)
            .unwrap()
            .into_iter()
            .map(|occurrence| occurrence.date())
            .collect();
        assert_eq!(listed, vec![date(2026, 1, 19), date(2026, 2, 2)]);
        // a later window keeps the same phase
        assert!(class.schedule.occurs_on(date(2026, 2, 2)).unwrap());
        assert!(!class.schedule.occurs_on(date(2026, 1, 26)).unwrap());
        assert!(!class.schedule.occurs_on(date(2026, 2, 9)).unwrap());

        assert!(matches!(
            materialize(&mut tables, class.id, date(2026, 1, 26)),
            Err(BookingError::DateNotInSchedule(_))
        ));
        let instance = materialize(&mut tables, class.id, date(2026, 1, 19)).unwrap();

        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                end_time: Some(time(10, 30)),
                ..ClassUpdate::default()
            },
            now,
        )
        .unwrap();
        assert!(updated.reconciled.cancelled.is_empty());
        assert_eq!(updated.reconciled.retimed, vec![instance.id]);
    }

    #[test]
    fn test_schedule_update_keeps_existing_anchor() {
        let now = at(2026, 1, 7, 12, 0);
        let (mut tables, weekly) = setup();
        let class = biweekly(&mut tables, weekly.studio_id, now);
        let instance = materialize(&mut tables, class.id, date(2026, 1, 19)).unwrap();

        // Tuesdays join a week later; the rule still counts from 01-07
        let updated = update_class(
            &mut tables,
            class.id,
            ClassUpdate {
                schedule: Some(Recurrence::from_rules(["FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,TU"])),
                ..ClassUpdate::default()
            },
            at(2026, 1, 14, 12, 0),
        )
        .unwrap();
        assert_eq!(updated.class.schedule.dtstart, Some(date(2026, 1, 7)));
        assert!(updated.reconciled.cancelled.is_empty());
        assert!(!tables.instance(instance.id).unwrap().cancelled);
        assert!(updated.class.schedule.occurs_on(date(2026, 1, 20)).unwrap());
        assert!(!updated.class.schedule.occurs_on(date(2026, 1, 27)).unwrap());
    }

    #[test]
    fn test_counted_rule_ends() {
        let (mut tables, weekly) = setup();
        let created = at(2026, 3, 7, 8, 0);
        let class = create_class(
            &mut tables,
            weekly.studio_id,
            NewClass {
                name: "Workshop".into(),
                description: String::new(),
                coach: "Di".into(),
                capacity: 5,
                start_time: time(9, 0),
                end_time: time(10, 0),
                schedule: Recurrence::from_rules(["FREQ=DAILY;COUNT=2"]),
            },
            created,
        )
        .unwrap();

        let days = |from: NaiveDateTime| -> Vec<NaiveDate> {
            class
                .schedule
                .between(from, at(2026, 3, 20, 0, 0), true)
                .unwrap()
                .into_iter()
                .map(|occurrence| occurrence.date())
                .collect()
        };
        assert_eq!(days(at(2026, 3, 7, 0, 0)), vec![date(2026, 3, 7), date(2026, 3, 8)]);
        assert_eq!(days(at(2026, 3, 8, 0, 0)), vec![date(2026, 3, 8)]);
        assert!(days(at(2026, 3, 9, 0, 0)).is_empty());
        assert!(matches!(
            materialize(&mut tables, class.id, date(2026, 3, 9)),
            Err(BookingError::DateNotInSchedule(_))
        ));
    }
}
