use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::error;

use crate::geocoding::GeocodeError;
use crate::recurrence::RecurrenceError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Instance is already at capacity ({enrolled}/{capacity}).")]
    CapacityExceeded { enrolled: u32, capacity: u32 },
    #[error("Date {0} does not match class schedule.")]
    DateNotInSchedule(NaiveDate),
    #[error("User is not subscribed.")]
    NotSubscribed,
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    #[error(transparent)]
    Geocode(#[from] GeocodeError),
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg).into_response()
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        match value {
            BookingError::Validation(_)
            | BookingError::DateNotInSchedule(_)
            | BookingError::Recurrence(_) => ApiError::BadRequest(value.to_string()),
            BookingError::NotFound(_) | BookingError::Store(StoreError::Missing { .. }) => {
                ApiError::NotFound(value.to_string())
            }
            BookingError::CapacityExceeded { .. } | BookingError::NotSubscribed => {
                ApiError::Forbidden(value.to_string())
            }
            BookingError::Conflict(_) | BookingError::Store(StoreError::UniqueViolation { .. }) => {
                ApiError::Conflict(value.to_string())
            }
            BookingError::Geocode(GeocodeError::NoMatch) => ApiError::BadRequest(value.to_string()),
            BookingError::Geocode(GeocodeError::Unavailable(ref reason)) => {
                error!("Geocoding failed: {reason}");
                ApiError::ServiceUnavailable(value.to_string())
            }
            BookingError::Store(err) => {
                error!("Store error: {err}");
                ApiError::Internal("Storage is unavailable".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: BookingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_booking_error_status_codes() {
        assert_eq!(
            status(BookingError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(BookingError::DateNotInSchedule(
                NaiveDate::from_ymd_opt(2026, 1, 6).unwrap()
            )),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(BookingError::Store(StoreError::Missing {
                entity: "class",
                id: 4
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(BookingError::CapacityExceeded {
                enrolled: 5,
                capacity: 5
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status(BookingError::Conflict("again".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(BookingError::Geocode(GeocodeError::Unavailable("down".into()))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status(BookingError::Store(StoreError::NotReady)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_capacity_message() {
        let err = BookingError::CapacityExceeded {
            enrolled: 5,
            capacity: 5,
        };
        assert_eq!(err.to_string(), "Instance is already at capacity (5/5).");
    }
}
