//! Enrollment ledger.
//!
//! An account is effectively enrolled in an instance when it is a member of
//! the parent class and has not dropped the instance, or when it opted into
//! that instance alone. Class and instance `enrolled` counters are only ever
//! written here, in the same step as the membership sets they summarise.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{AccountId, ClassId, ClassInstance, InstanceId};
use crate::store::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentChange {
    /// Joined every occurrence of a class.
    Enrolled,
    /// Left a class.
    Unenrolled,
    /// Skipped one occurrence of a class the account belongs to.
    Dropped,
    /// Took back a skipped occurrence.
    Undropped,
    /// Joined a single occurrence without joining the class.
    OptedIn,
    OptedOut,
}

impl EnrollmentChange {
    pub fn is_enrolled(self) -> bool {
        matches!(
            self,
            EnrollmentChange::Enrolled | EnrollmentChange::Undropped | EnrollmentChange::OptedIn
        )
    }
}

pub fn is_effectively_enrolled(
    tables: &Tables,
    account: AccountId,
    instance: &ClassInstance,
) -> bool {
    (tables.is_member(account, instance.class_id)
        && !tables.has_dropped_instance(account, instance.id))
        || tables.has_enrolled_instance(account, instance.id)
}

/// Toggles class-level membership.
pub fn toggle_class(
    tables: &mut Tables,
    account: AccountId,
    class_id: ClassId,
) -> Result<EnrollmentChange, BookingError> {
    tables.account(account)?;
    tables.class(class_id)?;
    let joining = !tables.is_member(account, class_id);
    set_class_membership(tables, account, class_id, joining)?;
    debug!(account, class_id, joining, "class enrollment toggled");
    Ok(if joining {
        EnrollmentChange::Enrolled
    } else {
        EnrollmentChange::Unenrolled
    })
}

/// Moves `account` in or out of the class roster. Per-instance exceptions for
/// the class are cleared either way, and every instance counter is moved by
/// the change in effective enrollment.
fn set_class_membership(
    tables: &mut Tables,
    account: AccountId,
    class_id: ClassId,
    member: bool,
) -> Result<(), BookingError> {
    let view: &Tables = tables;
    let before: Vec<(InstanceId, bool)> = view
        .instances_of_class(class_id)
        .map(|instance| (instance.id, is_effectively_enrolled(view, account, instance)))
        .collect();

    tables.set_member(account, class_id, member);
    for (instance_id, _) in &before {
        tables.set_dropped_instance(account, *instance_id, false);
        tables.set_enrolled_instance(account, *instance_id, false);
    }

    let class = tables.class(class_id)?;
    let (class_enrolled, capacity) = (class.enrolled, class.capacity);
    let class_enrolled = if member {
        class_enrolled.saturating_add(1)
    } else {
        class_enrolled.saturating_sub(1)
    };
    tables.set_class_enrolled(class_id, class_enrolled)?;

    for (instance_id, was_enrolled) in before {
        let instance = tables.instance(instance_id)?;
        let enrolled = is_effectively_enrolled(tables, account, instance);
        let count = match (was_enrolled, enrolled) {
            (false, true) => instance.enrolled.saturating_add(1),
            (true, false) => instance.enrolled.saturating_sub(1),
            _ => continue,
        };
        // class-level joins skip the per-instance capacity check
        if count > capacity {
            warn!(
                account,
                class_id,
                instance_id,
                enrolled = count,
                capacity,
                "instance overbooked by class enrollment"
            );
        }
        tables.set_instance_enrolled(instance_id, count)?;
    }
    Ok(())
}

/// Toggles enrollment in one instance. For class members this drops or
/// restores the occurrence; for everyone else it opts in or out of it.
pub fn toggle_instance(
    tables: &mut Tables,
    account: AccountId,
    instance_id: InstanceId,
) -> Result<EnrollmentChange, BookingError> {
    tables.account(account)?;
    let instance = tables.instance(instance_id)?.clone();
    let capacity = tables.class(instance.class_id)?.capacity;

    let change = if tables.is_member(account, instance.class_id) {
        if tables.has_dropped_instance(account, instance_id) {
            ensure_joinable(&instance, capacity)?;
            tables.set_dropped_instance(account, instance_id, false);
            EnrollmentChange::Undropped
        } else {
            tables.set_dropped_instance(account, instance_id, true);
            EnrollmentChange::Dropped
        }
    } else if tables.has_enrolled_instance(account, instance_id) {
        tables.set_enrolled_instance(account, instance_id, false);
        EnrollmentChange::OptedOut
    } else {
        ensure_joinable(&instance, capacity)?;
        tables.set_enrolled_instance(account, instance_id, true);
        EnrollmentChange::OptedIn
    };

    let count = if change.is_enrolled() {
        instance.enrolled.saturating_add(1)
    } else {
        instance.enrolled.saturating_sub(1)
    };
    tables.set_instance_enrolled(instance_id, count)?;
    debug!(account, instance_id, ?change, "instance enrollment toggled");
    Ok(change)
}

fn ensure_joinable(instance: &ClassInstance, capacity: u32) -> Result<(), BookingError> {
    if instance.cancelled {
        return Err(BookingError::Validation(
            "Instance has been cancelled.".into(),
        ));
    }
    if instance.enrolled >= capacity {
        return Err(BookingError::CapacityExceeded {
            enrolled: instance.enrolled,
            capacity,
        });
    }
    Ok(())
}

/// Removes every enrollment the account holds, class-level and single
/// instance alike.
pub fn revoke_all(tables: &mut Tables, account: AccountId) -> Result<(), BookingError> {
    for class_id in tables.classes_of(account) {
        set_class_membership(tables, account, class_id, false)?;
    }
    for instance_id in tables.enrolled_instances_of(account) {
        leave_instance(tables, account, instance_id)?;
    }
    for instance_id in tables.dropped_instances_of(account) {
        tables.set_dropped_instance(account, instance_id, false);
    }
    Ok(())
}

/// Leaves single-instance enrollments dated after `until`.
pub fn release_instances_after(
    tables: &mut Tables,
    account: AccountId,
    until: NaiveDate,
) -> Result<usize, BookingError> {
    let mut released = 0;
    for instance_id in tables.enrolled_instances_of(account) {
        if tables.instance(instance_id)?.date > until {
            leave_instance(tables, account, instance_id)?;
            released += 1;
        }
    }
    Ok(released)
}

fn leave_instance(
    tables: &mut Tables,
    account: AccountId,
    instance_id: InstanceId,
) -> Result<(), BookingError> {
    let instance = tables.instance(instance_id)?;
    let was_enrolled = is_effectively_enrolled(tables, account, instance);
    let count = instance.enrolled;
    tables.set_enrolled_instance(account, instance_id, false);
    let instance = tables.instance(instance_id)?;
    if was_enrolled && !is_effectively_enrolled(tables, account, instance) {
        tables.set_instance_enrolled(instance_id, count.saturating_sub(1))?;
    }
    Ok(())
}
