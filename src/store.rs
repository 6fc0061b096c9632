//! In-process relational store.
//!
//! All tables sit behind one lock. [`Store::transaction`] runs a closure with
//! exclusive access and rolls the tables back if it fails, so each
//! multi-step mutation is all-or-nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::info;

use crate::models::{
    Account, AccountId, Class, ClassId, ClassInstance, InstanceId, Payment, PaymentId, Studio,
    StudioId, Subscription, SubscriptionId,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store has not been initialised yet")]
    NotReady,
    #[error("No {entity} with id {id} exists")]
    Missing { entity: &'static str, id: u64 },
    #[error("Class {class_id} already has an open instance on {date}")]
    UniqueViolation { class_id: ClassId, date: NaiveDate },
    #[error("Store lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Default)]
pub struct Tables {
    studios: BTreeMap<StudioId, Studio>,
    classes: BTreeMap<ClassId, Class>,
    instances: BTreeMap<InstanceId, ClassInstance>,
    accounts: BTreeMap<AccountId, Account>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    payments: BTreeMap<PaymentId, Payment>,
    class_members: BTreeSet<(AccountId, ClassId)>,
    enrolled_instances: BTreeSet<(AccountId, InstanceId)>,
    dropped_instances: BTreeSet<(AccountId, InstanceId)>,
    // unique (class, date) index over non-special, non-cancelled instances
    open_slots: BTreeMap<(ClassId, NaiveDate), InstanceId>,
    last_id: u64,
}

fn missing(entity: &'static str, id: u64) -> StoreError {
    StoreError::Missing { entity, id }
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn insert_studio(&mut self, mut studio: Studio) -> Studio {
        studio.id = self.next_id();
        self.studios.insert(studio.id, studio.clone());
        studio
    }

    pub fn studio(&self, id: StudioId) -> Result<&Studio, StoreError> {
        self.studios.get(&id).ok_or_else(|| missing("studio", id))
    }

    pub fn studios(&self) -> impl Iterator<Item = &Studio> {
        self.studios.values()
    }

    pub fn insert_class(&mut self, mut class: Class) -> Class {
        class.id = self.next_id();
        class.enrolled = 0;
        self.classes.insert(class.id, class.clone());
        class
    }

    pub fn class(&self, id: ClassId) -> Result<&Class, StoreError> {
        self.classes.get(&id).ok_or_else(|| missing("class", id))
    }

    /// Class lookup scoped to a studio, as addressed by `/studios/{s}/classes/{c}`.
    pub fn studio_class(&self, studio_id: StudioId, id: ClassId) -> Result<&Class, StoreError> {
        self.studio(studio_id)?;
        self.class(id)
            .ok()
            .filter(|class| class.studio_id == studio_id)
            .ok_or_else(|| missing("class", id))
    }

    pub(crate) fn class_mut(&mut self, id: ClassId) -> Result<&mut Class, StoreError> {
        self.classes.get_mut(&id).ok_or_else(|| missing("class", id))
    }

    pub fn classes_of_studio(&self, studio_id: StudioId) -> impl Iterator<Item = &Class> {
        self.classes
            .values()
            .filter(move |class| class.studio_id == studio_id)
    }

    pub fn instance(&self, id: InstanceId) -> Result<&ClassInstance, StoreError> {
        self.instances.get(&id).ok_or_else(|| missing("instance", id))
    }

    pub fn instances_of_class(&self, class_id: ClassId) -> impl Iterator<Item = &ClassInstance> {
        self.instances
            .values()
            .filter(move |instance| instance.class_id == class_id)
    }

    /// The non-special, non-cancelled instance for (class, date), if any.
    pub fn open_instance(&self, class_id: ClassId, date: NaiveDate) -> Option<&ClassInstance> {
        self.open_slots
            .get(&(class_id, date))
            .and_then(|id| self.instances.get(id))
    }

    pub fn furthest_instance_date(&self, class_id: ClassId) -> Option<NaiveDate> {
        self.instances_of_class(class_id)
            .map(|instance| instance.date)
            .max()
    }

    fn claim_slot(&mut self, instance: &ClassInstance) -> Result<(), StoreError> {
        if !instance.holds_slot() {
            return Ok(());
        }
        let key = (instance.class_id, instance.date);
        match self.open_slots.get(&key) {
            Some(holder) if *holder != instance.id => Err(StoreError::UniqueViolation {
                class_id: instance.class_id,
                date: instance.date,
            }),
            _ => {
                self.open_slots.insert(key, instance.id);
                Ok(())
            }
        }
    }

    pub fn insert_instance(
        &mut self,
        mut instance: ClassInstance,
    ) -> Result<ClassInstance, StoreError> {
        self.class(instance.class_id)?;
        instance.id = self.next_id();
        self.claim_slot(&instance)?;
        self.instances.insert(instance.id, instance.clone());
        Ok(instance)
    }

    /// Saves an edited instance, keeping the (class, date) index in step.
    pub fn update_instance(&mut self, instance: ClassInstance) -> Result<(), StoreError> {
        let previous = self.instance(instance.id)?.clone();
        if previous.holds_slot() {
            self.open_slots.remove(&(previous.class_id, previous.date));
        }
        if let Err(err) = self.claim_slot(&instance) {
            if previous.holds_slot() {
                self.open_slots
                    .insert((previous.class_id, previous.date), previous.id);
            }
            return Err(err);
        }
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    pub(crate) fn set_class_enrolled(&mut self, id: ClassId, value: u32) -> Result<(), StoreError> {
        self.class_mut(id)?.enrolled = value;
        Ok(())
    }

    pub(crate) fn set_instance_enrolled(
        &mut self,
        id: InstanceId,
        value: u32,
    ) -> Result<(), StoreError> {
        self.instances
            .get_mut(&id)
            .ok_or_else(|| missing("instance", id))?
            .enrolled = value;
        Ok(())
    }

    pub fn insert_account(&mut self, mut account: Account) -> Account {
        account.id = self.next_id();
        self.accounts.insert(account.id, account.clone());
        account
    }

    pub fn account(&self, id: AccountId) -> Result<&Account, StoreError> {
        self.accounts.get(&id).ok_or_else(|| missing("account", id))
    }

    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, StoreError> {
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| missing("account", id))
    }

    pub fn account_ids(&self) -> Vec<AccountId> {
        self.accounts.keys().copied().collect()
    }

    pub fn is_member(&self, account: AccountId, class: ClassId) -> bool {
        self.class_members.contains(&(account, class))
    }

    pub(crate) fn set_member(&mut self, account: AccountId, class: ClassId, member: bool) {
        if member {
            self.class_members.insert((account, class));
        } else {
            self.class_members.remove(&(account, class));
        }
    }

    pub fn member_count(&self, class: ClassId) -> u32 {
        let count = self
            .class_members
            .iter()
            .filter(|(_, member_of)| *member_of == class)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn classes_of(&self, account: AccountId) -> Vec<ClassId> {
        self.class_members
            .range((account, ClassId::MIN)..=(account, ClassId::MAX))
            .map(|(_, class)| *class)
            .collect()
    }

    pub fn has_enrolled_instance(&self, account: AccountId, instance: InstanceId) -> bool {
        self.enrolled_instances.contains(&(account, instance))
    }

    pub(crate) fn set_enrolled_instance(
        &mut self,
        account: AccountId,
        instance: InstanceId,
        enrolled: bool,
    ) {
        if enrolled {
            self.enrolled_instances.insert((account, instance));
        } else {
            self.enrolled_instances.remove(&(account, instance));
        }
    }

    pub fn enrolled_instances_of(&self, account: AccountId) -> Vec<InstanceId> {
        self.enrolled_instances
            .range((account, InstanceId::MIN)..=(account, InstanceId::MAX))
            .map(|(_, instance)| *instance)
            .collect()
    }

    pub fn has_dropped_instance(&self, account: AccountId, instance: InstanceId) -> bool {
        self.dropped_instances.contains(&(account, instance))
    }

    pub(crate) fn set_dropped_instance(
        &mut self,
        account: AccountId,
        instance: InstanceId,
        dropped: bool,
    ) {
        if dropped {
            self.dropped_instances.insert((account, instance));
        } else {
            self.dropped_instances.remove(&(account, instance));
        }
    }

    pub fn dropped_instances_of(&self, account: AccountId) -> Vec<InstanceId> {
        self.dropped_instances
            .range((account, InstanceId::MIN)..=(account, InstanceId::MAX))
            .map(|(_, instance)| *instance)
            .collect()
    }

    pub fn insert_subscription(&mut self, mut subscription: Subscription) -> Subscription {
        subscription.id = self.next_id();
        self.subscriptions
            .insert(subscription.id, subscription.clone());
        subscription
    }

    pub fn subscription(&self, id: SubscriptionId) -> Result<&Subscription, StoreError> {
        self.subscriptions
            .get(&id)
            .ok_or_else(|| missing("subscription", id))
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }

    pub fn insert_payment(&mut self, mut payment: Payment) -> Payment {
        payment.id = self.next_id();
        self.payments.insert(payment.id, payment.clone());
        payment
    }

    pub fn payment(&self, id: PaymentId) -> Result<&Payment, StoreError> {
        self.payments.get(&id).ok_or_else(|| missing("payment", id))
    }

    pub fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment, StoreError> {
        self.payments
            .get_mut(&id)
            .ok_or_else(|| missing("payment", id))
    }

    pub fn payments_of(&self, account: AccountId) -> impl Iterator<Item = &Payment> {
        self.payments
            .values()
            .filter(move |payment| payment.account_id == account)
    }
}

#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Option<Tables>>,
}

impl Store {
    /// An empty store that still needs [`Store::migrate`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Some(Tables::default())),
        }
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut guard = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        if guard.is_none() {
            *guard = Some(Tables::default());
            info!("store initialised");
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.tables
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn read<T, E>(&self, f: impl FnOnce(&Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        let tables = guard.as_ref().ok_or(StoreError::NotReady)?;
        f(tables)
    }

    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut Tables) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let tables = guard.as_mut().ok_or(StoreError::NotReady)?;
        let snapshot = tables.clone();
        let result = f(tables);
        if result.is_err() {
            *tables = snapshot;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::recurrence::Recurrence;

    fn class() -> Class {
        Class {
            id: 0,
            studio_id: 1,
            name: "Yoga".into(),
            description: String::new(),
            coach: "Ana".into(),
            capacity: 5,
            enrolled: 0,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            schedule: Recurrence::from_rules(["FREQ=WEEKLY;BYDAY=MO"]),
        }
    }

    fn instance(class_id: ClassId, date: NaiveDate, special: bool) -> ClassInstance {
        ClassInstance {
            id: 0,
            class_id,
            date,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            cancelled: false,
            special,
            enrolled: 0,
        }
    }

    #[test]
    fn test_open_slot_is_unique() {
        let mut tables = Tables::default();
        let class = tables.insert_class(class());
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();

        let first = tables.insert_instance(instance(class.id, date, false)).unwrap();
        let err = tables
            .insert_instance(instance(class.id, date, false))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::UniqueViolation {
                class_id: class.id,
                date
            }
        );
        // special instances do not take the slot
        assert!(tables.insert_instance(instance(class.id, date, true)).is_ok());
        assert_eq!(tables.open_instance(class.id, date).unwrap().id, first.id);
    }

    #[test]
    fn test_cancelling_frees_slot() {
        let mut tables = Tables::default();
        let class = tables.insert_class(class());
        let date = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let mut first = tables.insert_instance(instance(class.id, date, false)).unwrap();

        first.cancelled = true;
        tables.update_instance(first).unwrap();
        assert!(tables.open_instance(class.id, date).is_none());
        assert!(tables.insert_instance(instance(class.id, date, false)).is_ok());
    }

    #[test]
    fn test_update_into_taken_slot_is_rejected() {
        let mut tables = Tables::default();
        let class = tables.insert_class(class());
        let monday = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let next_monday = NaiveDate::from_ymd_opt(2026, 1, 12).unwrap();
        tables.insert_instance(instance(class.id, monday, false)).unwrap();
        let mut other = tables
            .insert_instance(instance(class.id, next_monday, false))
            .unwrap();

        other.date = monday;
        assert!(tables.update_instance(other.clone()).is_err());
        assert_eq!(tables.open_instance(class.id, next_monday).unwrap().id, other.id);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = Store::in_memory();
        let result: Result<(), StoreError> = store.transaction(|tables| {
            tables.insert_class(class());
            Err(StoreError::Poisoned)
        });
        assert!(result.is_err());
        let count = store
            .read(|tables| Ok::<_, StoreError>(tables.classes_of_studio(1).count()))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_not_ready_until_migrated() {
        let store = Store::new();
        assert!(!store.is_ready());
        let err = store
            .read(|tables| Ok::<_, StoreError>(tables.account_ids()))
            .unwrap_err();
        assert_eq!(err, StoreError::NotReady);

        store.migrate().unwrap();
        assert!(store.is_ready());
    }

    #[test]
    fn test_membership_sets() {
        let mut tables = Tables::default();
        tables.set_member(1, 10, true);
        tables.set_member(1, 11, true);
        tables.set_member(2, 10, true);
        assert_eq!(tables.classes_of(1), vec![10, 11]);
        assert_eq!(tables.member_count(10), 2);
        tables.set_member(1, 10, false);
        assert_eq!(tables.member_count(10), 1);
        assert!(!tables.is_member(1, 10));
    }
}
