use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{Account, AccountId};
use crate::occurrences::TimeWindow;
use crate::store::Tables;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewAccount {
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub payment_method: Option<String>,
}

/// Lower-cased `email`, provided no other account uses it.
fn unique_email(
    tables: &Tables,
    email: &str,
    owner: Option<AccountId>,
) -> Result<String, BookingError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(BookingError::Validation("Enter a valid email address.".into()));
    }
    for id in tables.account_ids() {
        if Some(id) != owner && tables.account(id)?.email == email {
            return Err(BookingError::Conflict(
                "An account with this email already exists.".into(),
            ));
        }
    }
    Ok(email)
}

pub fn create_account(tables: &mut Tables, new: NewAccount) -> Result<Account, BookingError> {
    let email = unique_email(tables, &new.email, None)?;
    let account = tables.insert_account(Account {
        id: 0,
        email,
        first_name: new.first_name,
        last_name: new.last_name,
        subscription: None,
        next_payment: None,
        payment_method: new.payment_method,
    });
    info!(account_id = account.id, "account created");
    Ok(account)
}

/// Profile fields to change; absent fields stay as they are.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct AccountUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Replaces the card on file and on every payment not yet collected.
    pub payment_method: Option<String>,
}

pub fn update_account(
    tables: &mut Tables,
    account_id: AccountId,
    update: AccountUpdate,
    now: NaiveDateTime,
) -> Result<Account, BookingError> {
    let email = match update.email {
        Some(email) => Some(unique_email(tables, &email, Some(account_id))?),
        None => None,
    };
    let payment_method = match update.payment_method {
        Some(method) if method.trim().is_empty() => {
            return Err(BookingError::Validation(
                "payment_method must not be empty".into(),
            ));
        }
        other => other,
    };

    let account = tables.account_mut(account_id)?;
    if let Some(email) = email {
        account.email = email;
    }
    if let Some(first_name) = update.first_name {
        account.first_name = first_name;
    }
    if let Some(last_name) = update.last_name {
        account.last_name = last_name;
    }

    if let Some(method) = payment_method {
        account.payment_method = Some(method.clone());
        let pending: Vec<_> = tables
            .payments_of(account_id)
            .filter(|payment| !payment.completed && payment.due > now)
            .map(|payment| payment.id)
            .collect();
        for payment_id in &pending {
            tables.payment_mut(*payment_id)?.payment_method = method.clone();
        }
        info!(account_id, payments = pending.len(), "payment method replaced");
    }
    Ok(tables.account(account_id)?.clone())
}

/// The three booking views of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingView {
    Schedule,
    History,
    Ongoing,
}

impl BookingView {
    /// `days` of `None` leaves the window unbounded.
    pub fn window(self, days: Option<u32>) -> TimeWindow {
        match self {
            BookingView::Schedule => TimeWindow::Future { days },
            BookingView::History => TimeWindow::Past { days },
            BookingView::Ongoing => TimeWindow::Current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.into(),
            first_name: "Sam".into(),
            last_name: "Lee".into(),
            payment_method: None,
        }
    }

    #[test]
    fn test_create_account() {
        let mut tables = Tables::default();
        let account = create_account(&mut tables, new_account(" Sam@Example.com ")).unwrap();
        assert_eq!(account.email, "sam@example.com");
        assert_eq!(account.subscription, None);
        assert_eq!(tables.account(account.id).unwrap(), &account);
    }

    #[test]
    fn test_duplicate_email_conflicts() {
        let mut tables = Tables::default();
        create_account(&mut tables, new_account("sam@example.com")).unwrap();
        let err = create_account(&mut tables, new_account("SAM@example.com")).unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));
    }

    #[test]
    fn test_invalid_email_rejected() {
        let mut tables = Tables::default();
        for email in ["", "sam", "@example.com", "sam@localhost"] {
            assert!(matches!(
                create_account(&mut tables, new_account(email)),
                Err(BookingError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_update_account_profile() {
        let mut tables = Tables::default();
        let account = create_account(&mut tables, new_account("sam@example.com")).unwrap();
        let other = create_account(&mut tables, new_account("kim@example.com")).unwrap();
        let now = NaiveDateTime::default();

        let updated = update_account(
            &mut tables,
            account.id,
            AccountUpdate {
                first_name: Some("Samira".into()),
                email: Some("SAM@example.com".into()),
                ..AccountUpdate::default()
            },
            now,
        )
        .unwrap();
        assert_eq!(updated.first_name, "Samira");
        assert_eq!(updated.last_name, "Lee");
        assert_eq!(updated.email, "sam@example.com");

        let err = update_account(
            &mut tables,
            other.id,
            AccountUpdate {
                email: Some("sam@example.com".into()),
                ..AccountUpdate::default()
            },
            now,
        )
        .unwrap_err();
        assert!(matches!(err, BookingError::Conflict(_)));
        assert!(update_account(&mut tables, 999, AccountUpdate::default(), now).is_err());
    }

    #[test]
    fn test_views_map_to_windows() {
        assert_eq!(
            BookingView::Schedule.window(Some(14)),
            TimeWindow::Future { days: Some(14) }
        );
        assert_eq!(BookingView::History.window(None), TimeWindow::Past { days: None });
        assert_eq!(BookingView::Ongoing.window(Some(3)), TimeWindow::Current);
    }
}
