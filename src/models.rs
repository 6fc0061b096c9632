use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::recurrence::Recurrence;

pub type StudioId = u64;
pub type ClassId = u64;
pub type InstanceId = u64;
pub type AccountId = u64;
pub type SubscriptionId = u64;
pub type PaymentId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Studio {
    pub id: StudioId,
    pub name: String,
    pub address: String,
    pub postal_code: String,
    pub phone_num: String,
    pub lat: f64,
    pub long: f64,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
}

/// Something a studio offers, e.g. `{"type": "Showers", "quantity": 4}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Amenity {
    #[serde(rename = "type")]
    pub kind: String,
    pub quantity: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Class {
    pub id: ClassId,
    pub studio_id: StudioId,
    pub name: String,
    pub description: String,
    pub coach: String,
    pub capacity: u32,
    /// Number of accounts enrolled in every occurrence. Only the enrollment
    /// ledger writes it.
    pub(crate) enrolled: u32,
    #[schema(value_type = String, format = "time", example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "10:00:00")]
    pub end_time: NaiveTime,
    pub schedule: Recurrence,
}

impl Class {
    pub fn enrolled(&self) -> u32 {
        self.enrolled
    }
}

/// A persisted occurrence of a class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassInstance {
    pub id: InstanceId,
    pub class_id: ClassId,
    #[schema(value_type = String, format = "date", example = "2026-01-05")]
    pub date: NaiveDate,
    #[schema(value_type = String, format = "time", example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "10:00:00")]
    pub end_time: NaiveTime,
    /// Set when the parent schedule no longer produces this date.
    pub cancelled: bool,
    /// Special instances are never touched by schedule reconciliation.
    pub special: bool,
    pub(crate) enrolled: u32,
}

impl ClassInstance {
    pub fn enrolled(&self) -> u32 {
        self.enrolled
    }

    /// Non-special, non-cancelled instances are unique per (class, date).
    pub(crate) fn holds_slot(&self) -> bool {
        !self.special && !self.cancelled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub subscription: Option<SubscriptionId>,
    pub next_payment: Option<PaymentId>,
    /// Card reference kept on file for renewals.
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn period_days(self) -> i64 {
        match self {
            BillingCycle::Monthly => 30,
            BillingCycle::Yearly => 365,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub billing_cycle: BillingCycle,
    pub charge_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Payment {
    pub id: PaymentId,
    pub account_id: AccountId,
    pub amount_cents: i64,
    pub payment_method: String,
    #[schema(value_type = String, format = "date-time", example = "2026-02-04T09:00:00")]
    pub due: NaiveDateTime,
    pub completed: bool,
    pub cancelled: bool,
}

/// Where a client resolves one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailRef {
    /// Not persisted yet; resolved through the materializer.
    Virtual {
        studio_id: StudioId,
        class_id: ClassId,
        date: NaiveDate,
    },
    Materialized {
        studio_id: StudioId,
        class_id: ClassId,
        instance_id: InstanceId,
    },
}

impl DetailRef {
    pub fn path(&self) -> String {
        match self {
            DetailRef::Virtual {
                studio_id,
                class_id,
                date,
            } => format!("/studios/{studio_id}/classes/{class_id}/ns/{date}"),
            DetailRef::Materialized {
                studio_id,
                class_id,
                instance_id,
            } => format!("/studios/{studio_id}/classes/{class_id}/instances/{instance_id}"),
        }
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        match self {
            DetailRef::Virtual { .. } => None,
            DetailRef::Materialized { instance_id, .. } => Some(*instance_id),
        }
    }
}

/// One bookable occurrence as presented to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct OccurrenceItem {
    pub studio_id: StudioId,
    pub class_id: ClassId,
    pub class_name: String,
    pub coach: String,
    #[schema(value_type = String, format = "date", example = "2026-01-05")]
    pub date: NaiveDate,
    #[schema(value_type = String, format = "time", example = "09:00:00")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, format = "time", example = "10:00:00")]
    pub end_time: NaiveTime,
    pub special: bool,
    pub instance_id: Option<InstanceId>,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ClassDetail {
    #[serde(flatten)]
    pub class: Class,
    pub user_enrolled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct InstanceDetail {
    #[serde(flatten)]
    pub instance: ClassInstance,
    pub class_name: String,
    pub coach: String,
    pub capacity: u32,
    pub user_enrolled: Option<bool>,
}
