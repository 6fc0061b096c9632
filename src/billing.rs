//! Subscriptions, payments and the billing cycle.

use chrono::{Days, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::ledger;
use crate::models::{
    AccountId, BillingCycle, Payment, PaymentId, Subscription, SubscriptionId,
};
use crate::store::{Store, Tables};

/// Largest plan price accepted, in cents.
pub const MAX_CHARGE_CENTS: i64 = 100_000_000_000;

/// Adds `tax_bps` basis points to `cents`, rounding half up to the cent.
pub fn charge_with_tax(cents: i64, tax_bps: u32) -> Result<i64, BookingError> {
    cents
        .checked_mul(10_000 + i64::from(tax_bps))
        .and_then(|scaled| scaled.checked_add(5_000))
        .map(|scaled| scaled.div_euclid(10_000))
        .ok_or_else(|| BookingError::Validation("Charge is too large to bill.".into()))
}

fn due_after(now: NaiveDateTime, cycle: BillingCycle) -> NaiveDateTime {
    // period_days is 30 or 365
    now.checked_add_days(Days::new(cycle.period_days().unsigned_abs()))
        .unwrap_or(NaiveDateTime::MAX)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BillingReport {
    /// Accounts whose due payment was collected and renewed.
    pub renewed: Vec<AccountId>,
    /// Accounts whose cancelled subscription ran out.
    pub expired: Vec<AccountId>,
    /// Accounts that could not be settled; their payment stays due.
    pub failed: Vec<AccountId>,
}

enum Settlement {
    Renewed,
    Expired,
}

/// Settles every account whose next payment is due at `now`.
///
/// Each account is handled in its own transaction. Running the cycle again
/// with the same `now` changes nothing, since settled accounts point at a
/// payment due in the future.
pub fn run_billing_cycle(
    store: &Store,
    now: NaiveDateTime,
    tax_bps: u32,
) -> Result<BillingReport, BookingError> {
    let accounts = store.read(|tables| Ok::<_, BookingError>(tables.account_ids()))?;
    let mut report = BillingReport::default();
    for account in accounts {
        match store.transaction(|tables| settle(tables, account, now, tax_bps)) {
            Ok(Some(Settlement::Renewed)) => report.renewed.push(account),
            Ok(Some(Settlement::Expired)) => report.expired.push(account),
            Ok(None) => {}
            Err(err @ BookingError::Store(_)) => return Err(err),
            Err(err) => {
                error!(account_id = account, error = %err, "account left unsettled");
                report.failed.push(account);
            }
        }
    }
    info!(
        renewed = report.renewed.len(),
        expired = report.expired.len(),
        failed = report.failed.len(),
        "billing cycle finished"
    );
    Ok(report)
}

fn settle(
    tables: &mut Tables,
    account_id: AccountId,
    now: NaiveDateTime,
    tax_bps: u32,
) -> Result<Option<Settlement>, BookingError> {
    let account = tables.account(account_id)?;
    let Some(payment_id) = account.next_payment else {
        return Ok(None);
    };
    let payment = tables.payment(payment_id)?.clone();
    if payment.due > now {
        return Ok(None);
    }
    let plan = account
        .subscription
        .and_then(|id| tables.subscription(id).ok())
        .cloned();

    let plan = match plan {
        Some(plan) if !payment.cancelled => plan,
        _ => {
            warn!(
                account_id,
                payment_id,
                due = %payment.due,
                "subscription expired, revoking enrollments"
            );
            let account = tables.account_mut(account_id)?;
            account.subscription = None;
            account.next_payment = None;
            ledger::revoke_all(tables, account_id)?;
            return Ok(Some(Settlement::Expired));
        }
    };

    let amount_cents = charge_with_tax(plan.charge_cents, tax_bps)?;
    tables.payment_mut(payment_id)?.completed = true;
    let next = tables.insert_payment(Payment {
        id: 0,
        account_id,
        amount_cents,
        payment_method: payment.payment_method,
        due: due_after(now, plan.billing_cycle),
        completed: false,
        cancelled: false,
    });
    debug!(account_id, payment_id, next_payment = next.id, "payment collected");
    tables.account_mut(account_id)?.next_payment = Some(next.id);
    Ok(Some(Settlement::Renewed))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPlan {
    pub billing_cycle: BillingCycle,
    /// Price before tax, in cents.
    pub charge_cents: i64,
}

pub fn create_plan(tables: &mut Tables, plan: NewPlan) -> Result<Subscription, BookingError> {
    if plan.charge_cents < 0 {
        return Err(BookingError::Validation(
            "charge_cents must not be negative".into(),
        ));
    }
    if plan.charge_cents > MAX_CHARGE_CENTS {
        return Err(BookingError::Validation(format!(
            "charge_cents must not exceed {MAX_CHARGE_CENTS}"
        )));
    }
    Ok(tables.insert_subscription(Subscription {
        id: 0,
        billing_cycle: plan.billing_cycle,
        charge_cents: plan.charge_cents,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PlanView {
    #[serde(flatten)]
    pub plan: Subscription,
    pub currently_subscribed: bool,
    /// Set on the current plan once its next payment has been cancelled.
    pub cancelled_payment: bool,
}

pub fn plans(tables: &Tables, account_id: AccountId) -> Result<Vec<PlanView>, BookingError> {
    let account = tables.account(account_id)?;
    let cancelled = match account.next_payment {
        Some(id) => tables.payment(id)?.cancelled,
        None => false,
    };
    Ok(tables
        .subscriptions()
        .map(|plan| {
            let current = account.subscription == Some(plan.id);
            PlanView {
                plan: plan.clone(),
                currently_subscribed: current,
                cancelled_payment: current && cancelled,
            }
        })
        .collect())
}

/// Fails with [`BookingError::NotSubscribed`] unless the account holds a
/// subscription, cancelled or not.
pub fn ensure_subscribed(tables: &Tables, account_id: AccountId) -> Result<(), BookingError> {
    match tables.account(account_id)?.subscription {
        Some(_) => Ok(()),
        None => Err(BookingError::NotSubscribed),
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    pub subscription_id: SubscriptionId,
    /// Card reference. Falls back to the one on file.
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribed,
    Resubscribed,
    Switched,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SubscriptionStatus {
    pub action: SubscriptionAction,
    pub subscription: Subscription,
    pub next_payment: Payment,
}

pub fn subscribe(
    tables: &mut Tables,
    account_id: AccountId,
    request: SubscribeRequest,
    now: NaiveDateTime,
    tax_bps: u32,
) -> Result<SubscriptionStatus, BookingError> {
    let plan = tables.subscription(request.subscription_id)?.clone();
    let account = tables.account(account_id)?;
    let method = request
        .payment_method
        .filter(|method| !method.trim().is_empty())
        .or_else(|| account.payment_method.clone())
        .ok_or_else(|| BookingError::Validation("A payment method is required.".into()))?;
    let current = account.subscription;
    let pending = account.next_payment;
    tables.account_mut(account_id)?.payment_method = Some(method.clone());

    let amount = charge_with_tax(plan.charge_cents, tax_bps)?;
    let (action, next_payment) = match (current, pending) {
        (Some(current), Some(pending)) if current == plan.id => {
            let payment = tables.payment_mut(pending)?;
            if !payment.cancelled {
                return Err(BookingError::Conflict(
                    "Already subscribed to this plan.".into(),
                ));
            }
            payment.cancelled = false;
            info!(account_id, subscription_id = plan.id, "resubscribed");
            (SubscriptionAction::Resubscribed, payment.clone())
        }
        (Some(_), Some(pending)) => {
            let payment = tables.payment_mut(pending)?;
            payment.amount_cents = amount;
            payment.payment_method = method;
            payment.cancelled = false;
            let payment = payment.clone();
            info!(account_id, subscription_id = plan.id, "switched plan");
            (SubscriptionAction::Switched, payment)
        }
        _ => {
            tables.insert_payment(Payment {
                id: 0,
                account_id,
                amount_cents: amount,
                payment_method: method.clone(),
                due: now,
                completed: true,
                cancelled: false,
            });
            let next = tables.insert_payment(Payment {
                id: 0,
                account_id,
                amount_cents: amount,
                payment_method: method,
                due: due_after(now, plan.billing_cycle),
                completed: false,
                cancelled: false,
            });
            info!(account_id, subscription_id = plan.id, "subscribed");
            (SubscriptionAction::Subscribed, next)
        }
    };

    let account = tables.account_mut(account_id)?;
    account.subscription = Some(plan.id);
    account.next_payment = Some(next_payment.id);
    Ok(SubscriptionStatus {
        action,
        subscription: plan,
        next_payment,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Cancellation {
    pub payment_id: PaymentId,
    /// Whole days left on the paid-up period.
    pub days_remaining: i64,
    /// Single-instance enrollments past the paid-up period that were released.
    pub released_instances: usize,
}

/// Cancels the next payment. The subscription stays usable until that
/// payment would have been due.
pub fn cancel(
    tables: &mut Tables,
    account_id: AccountId,
    now: NaiveDateTime,
) -> Result<Cancellation, BookingError> {
    let account = tables.account(account_id)?;
    let (Some(_), Some(payment_id)) = (account.subscription, account.next_payment) else {
        return Err(BookingError::NotSubscribed);
    };
    let payment = tables.payment_mut(payment_id)?;
    if payment.cancelled {
        return Err(BookingError::Conflict(
            "Subscription is already cancelled.".into(),
        ));
    }
    payment.cancelled = true;
    let paid_until = payment.due.date();

    let released = ledger::release_instances_after(tables, account_id, paid_until)?;
    info!(account_id, payment_id, released, "subscription cancelled");
    Ok(Cancellation {
        payment_id,
        days_remaining: (paid_until - now.date()).num_days().max(0),
        released_instances: released,
    })
}

/// Payments of an account, newest first.
pub fn payments(tables: &Tables, account_id: AccountId) -> Result<Vec<Payment>, BookingError> {
    tables.account(account_id)?;
    let mut payments: Vec<Payment> = tables.payments_of(account_id).cloned().collect();
    payments.sort_by(|a, b| b.due.cmp(&a.due).then(b.id.cmp(&a.id)));
    Ok(payments)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime};

    use super::*;
    use crate::accounts::{AccountUpdate, update_account};
    use crate::ledger::{toggle_class, toggle_instance};
    use crate::materializer::materialize;
    use crate::models::{Account, Class, Studio};
    use crate::recurrence::Recurrence;
    use crate::store::StoreError;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn seed(store: &Store, cycle: BillingCycle) -> (AccountId, SubscriptionId) {
        store
            .transaction(|tables| {
                let plan = create_plan(
                    tables,
                    NewPlan {
                        billing_cycle: cycle,
                        charge_cents: 10_000,
                    },
                )?;
                let account = tables.insert_account(Account {
                    id: 0,
                    email: "member@example.com".into(),
                    first_name: "Sam".into(),
                    last_name: "Lee".into(),
                    subscription: None,
                    next_payment: None,
                    payment_method: Some("card_4242".into()),
                });
                Ok::<_, BookingError>((account.id, plan.id))
            })
            .unwrap()
    }

    fn subscribe_at(store: &Store, account: AccountId, plan: SubscriptionId, now: NaiveDateTime) {
        store
            .transaction(|tables| {
                subscribe(
                    tables,
                    account,
                    SubscribeRequest {
                        subscription_id: plan,
                        payment_method: None,
                    },
                    now,
                    1300,
                )
            })
            .unwrap();
    }

    #[test]
    fn test_charge_with_tax() {
        assert_eq!(charge_with_tax(10_000, 1300).unwrap(), 11_300);
        assert_eq!(charge_with_tax(999, 1300).unwrap(), 1129);
        assert_eq!(charge_with_tax(0, 1300).unwrap(), 0);
        assert_eq!(
            charge_with_tax(MAX_CHARGE_CENTS, 1300).unwrap(),
            113_000_000_000
        );
    }

    #[test]
    fn test_charge_with_tax_overflow_is_an_error() {
        assert!(matches!(
            charge_with_tax(1_000_000_000_000_000, 1300),
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            charge_with_tax(MAX_CHARGE_CENTS, u32::MAX),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn test_create_plan_rejects_huge_charge() {
        let mut tables = Tables::default();
        let err = create_plan(
            &mut tables,
            NewPlan {
                billing_cycle: BillingCycle::Monthly,
                charge_cents: 1_000_000_000_000_000,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(tables.subscriptions().count(), 0);
    }

    #[test]
    fn test_unbillable_account_is_skipped() {
        let store = Store::in_memory();
        let (account, _) = seed(&store, BillingCycle::Monthly);
        let plan = store
            .transaction(|tables| {
                create_plan(
                    tables,
                    NewPlan {
                        billing_cycle: BillingCycle::Monthly,
                        charge_cents: MAX_CHARGE_CENTS,
                    },
                )
            })
            .unwrap();
        subscribe_at(&store, account, plan.id, at(2026, 1, 1));

        // the tax rate cannot be applied to this charge, so the payment stays due
        let report = run_billing_cycle(&store, at(2026, 2, 1), u32::MAX).unwrap();
        assert_eq!(report.failed, vec![account]);
        assert!(report.renewed.is_empty());
        let payments = store.read(|tables| payments(tables, account)).unwrap();
        assert_eq!(payments.len(), 2);
        assert!(!payments[0].completed);

        let report = run_billing_cycle(&store, at(2026, 2, 1), 1300).unwrap();
        assert_eq!(report.renewed, vec![account]);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_due_payment_renewed_monthly() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));

        let now = at(2026, 2, 1);
        let report = run_billing_cycle(&store, now, 1300).unwrap();
        assert_eq!(report.renewed, vec![account]);
        assert!(report.expired.is_empty());

        let payments = store.read(|tables| payments(tables, account)).unwrap();
        assert_eq!(payments.len(), 3);
        let newest = &payments[0];
        assert_eq!(newest.amount_cents, 11_300);
        assert_eq!(newest.due, at(2026, 3, 3));
        assert_eq!(newest.payment_method, "card_4242");
        assert!(!newest.completed);
        assert!(payments[1].completed);
        store
            .read(|tables| {
                assert_eq!(tables.account(account)?.next_payment, Some(newest.id));
                Ok::<_, StoreError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_new_payment_method_used_for_renewal() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));

        store
            .transaction(|tables| {
                update_account(
                    tables,
                    account,
                    AccountUpdate {
                        payment_method: Some("card_0005".into()),
                        ..AccountUpdate::default()
                    },
                    at(2026, 1, 15),
                )
            })
            .unwrap();
        let before = store.read(|tables| payments(tables, account)).unwrap();
        assert_eq!(before[0].payment_method, "card_0005");
        // already collected
        assert_eq!(before[1].payment_method, "card_4242");

        let report = run_billing_cycle(&store, at(2026, 2, 1), 1300).unwrap();
        assert_eq!(report.renewed, vec![account]);
        let after = store.read(|tables| payments(tables, account)).unwrap();
        assert_eq!(after.len(), 3);
        assert_eq!(after[0].payment_method, "card_0005");
        assert!(after[1].completed);
    }

    #[test]
    fn test_yearly_period() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Yearly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));
        let payments = store.read(|tables| payments(tables, account)).unwrap();
        assert_eq!(payments[0].due, at(2027, 1, 1));
        assert_eq!(payments[0].amount_cents, 11_300);
    }

    #[test]
    fn test_cycle_is_idempotent() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));
        let now = at(2026, 2, 1);
        run_billing_cycle(&store, now, 1300).unwrap();
        let second = run_billing_cycle(&store, now, 1300).unwrap();
        assert_eq!(second, BillingReport::default());
        assert_eq!(store.read(|tables| payments(tables, account)).unwrap().len(), 3);
    }

    #[test]
    fn test_payment_not_due_is_left_alone() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));
        let report = run_billing_cycle(&store, at(2026, 1, 20), 1300).unwrap();
        assert_eq!(report, BillingReport::default());
    }

    #[test]
    fn test_cancelled_subscription_expires_and_revokes() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));
        let class_id = store
            .transaction(|tables| {
                let studio = tables.insert_studio(Studio {
                    id: 0,
                    name: "North".into(),
                    address: "2 King St".into(),
                    postal_code: "M5H1A1".into(),
                    phone_num: "4165550101".into(),
                    lat: 43.65,
                    long: -79.38,
                    amenities: Vec::new(),
                });
                let class = tables.insert_class(Class {
                    id: 0,
                    studio_id: studio.id,
                    name: "Spin".into(),
                    description: String::new(),
                    coach: "Jo".into(),
                    capacity: 10,
                    enrolled: 0,
                    start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                    schedule: Recurrence::from_rules(["FREQ=DAILY"]),
                });
                toggle_class(tables, account, class.id)?;
                let instance = materialize(tables, class.id, at(2026, 1, 10).date())?;
                assert_eq!(instance.enrolled(), 1);
                cancel(tables, account, at(2026, 1, 5))?;
                Ok::<_, BookingError>(class.id)
            })
            .unwrap();

        let report = run_billing_cycle(&store, at(2026, 2, 1), 1300).unwrap();
        assert_eq!(report.expired, vec![account]);
        store
            .read(|tables| {
                let account = tables.account(account)?;
                assert_eq!(account.subscription, None);
                assert_eq!(account.next_payment, None);
                assert_eq!(tables.class(class_id)?.enrolled(), 0);
                assert!(tables.instances_of_class(class_id).all(|i| i.enrolled() == 0));
                ensure_subscribed(tables, account.id).unwrap_err();
                Ok::<_, BookingError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_cycle_before_migration_fails_not_ready() {
        let store = Store::new();
        let err = run_billing_cycle(&store, at(2026, 1, 1), 1300).unwrap_err();
        assert!(matches!(err, BookingError::Store(StoreError::NotReady)));
    }

    #[test]
    fn test_subscribe_transitions() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        let now = at(2026, 1, 1);
        let request = |id| SubscribeRequest {
            subscription_id: id,
            payment_method: None,
        };
        store
            .transaction(|tables| {
                let yearly = create_plan(
                    tables,
                    NewPlan {
                        billing_cycle: BillingCycle::Yearly,
                        charge_cents: 100_000,
                    },
                )?;
                let status = subscribe(tables, account, request(plan), now, 1300)?;
                assert_eq!(status.action, SubscriptionAction::Subscribed);

                let again = subscribe(tables, account, request(plan), now, 1300);
                assert!(matches!(again, Err(BookingError::Conflict(_))));

                cancel(tables, account, now)?;
                let views = plans(tables, account)?;
                assert!(views.iter().any(|v| v.currently_subscribed && v.cancelled_payment));

                let status = subscribe(tables, account, request(plan), now, 1300)?;
                assert_eq!(status.action, SubscriptionAction::Resubscribed);
                assert!(!status.next_payment.cancelled);

                let status = subscribe(tables, account, request(yearly.id), now, 1300)?;
                assert_eq!(status.action, SubscriptionAction::Switched);
                assert_eq!(status.next_payment.amount_cents, 113_000);
                assert_eq!(tables.account(account)?.subscription, Some(yearly.id));
                Ok::<_, BookingError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_subscribe_requires_payment_method() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        let result = store.transaction(|tables| {
            tables.account_mut(account)?.payment_method = None;
            subscribe(
                tables,
                account,
                SubscribeRequest {
                    subscription_id: plan,
                    payment_method: Some("  ".into()),
                },
                at(2026, 1, 1),
                1300,
            )
        });
        assert!(matches!(result, Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_cancel_releases_instances_past_paid_period() {
        let store = Store::in_memory();
        let (account, plan) = seed(&store, BillingCycle::Monthly);
        subscribe_at(&store, account, plan, at(2026, 1, 1));
        store
            .transaction(|tables| {
                let class = tables.insert_class(Class {
                    id: 0,
                    studio_id: 0,
                    name: "Row".into(),
                    description: String::new(),
                    coach: "Kim".into(),
                    capacity: 4,
                    enrolled: 0,
                    start_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                    schedule: Recurrence::from_rules(["FREQ=DAILY"]),
                });
                let inside = materialize(tables, class.id, at(2026, 1, 20).date())?;
                let outside = materialize(tables, class.id, at(2026, 2, 10).date())?;
                toggle_instance(tables, account, inside.id)?;
                toggle_instance(tables, account, outside.id)?;

                let cancellation = cancel(tables, account, at(2026, 1, 11))?;
                assert_eq!(cancellation.days_remaining, 20);
                assert_eq!(cancellation.released_instances, 1);
                assert_eq!(tables.enrolled_instances_of(account), vec![inside.id]);
                assert_eq!(tables.instance(outside.id)?.enrolled(), 0);

                assert!(matches!(
                    cancel(tables, account, at(2026, 1, 11)),
                    Err(BookingError::Conflict(_))
                ));
                Ok::<_, BookingError>(())
            })
            .unwrap();
    }
}
