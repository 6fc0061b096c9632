//! Class and instance detail views.

use crate::error::BookingError;
use crate::ledger::is_effectively_enrolled;
use crate::models::{AccountId, ClassDetail, ClassId, ClassInstance, InstanceDetail, InstanceId, StudioId};
use crate::store::Tables;

pub fn class_detail(
    tables: &Tables,
    studio_id: StudioId,
    class_id: ClassId,
    account: Option<AccountId>,
) -> Result<ClassDetail, BookingError> {
    let class = tables.studio_class(studio_id, class_id)?;
    let user_enrolled = match account {
        Some(account) => {
            tables.account(account)?;
            Some(tables.is_member(account, class_id))
        }
        None => None,
    };
    Ok(ClassDetail {
        class: class.clone(),
        user_enrolled,
    })
}

/// Looks up an instance through its studio and class.
pub fn scoped_instance<'a>(
    tables: &'a Tables,
    studio_id: StudioId,
    class_id: ClassId,
    instance_id: InstanceId,
) -> Result<&'a ClassInstance, BookingError> {
    tables.studio_class(studio_id, class_id)?;
    let instance = tables.instance(instance_id)?;
    if instance.class_id != class_id {
        return Err(BookingError::NotFound(format!(
            "No instance with id {instance_id} exists for class {class_id}"
        )));
    }
    Ok(instance)
}

pub fn instance_detail(
    tables: &Tables,
    instance: &ClassInstance,
    account: Option<AccountId>,
) -> Result<InstanceDetail, BookingError> {
    let class = tables.class(instance.class_id)?;
    let user_enrolled = match account {
        Some(account) => {
            tables.account(account)?;
            Some(is_effectively_enrolled(tables, account, instance))
        }
        None => None,
    };
    Ok(InstanceDetail {
        instance: instance.clone(),
        class_name: class.name.clone(),
        coach: class.coach.clone(),
        capacity: class.capacity,
        user_enrolled,
    })
}
