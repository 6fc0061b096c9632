//! Shared-secret guard for every booking endpoint except health checks.

use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use tracing::debug;

use crate::error::ApiError;
use crate::settings::Settings;

/// The token a request presents. A bearer header wins over `?token=`.
fn presented<'a>(
    header: Option<&'a Authorization<Bearer>>,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    header
        .map(|auth| auth.token())
        .or(query_token)
        .filter(|token| !token.is_empty())
}

/// Accepts a request only when it carries the configured token.
///
/// Requests without any token and requests with a wrong one are both
/// rejected with 401, with different details.
pub fn verify_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    match presented(auth.as_ref(), query_token) {
        Some(token) if token == settings.auth_token => Ok(()),
        Some(_) => {
            debug!(from_header = auth.is_some(), "booking token rejected");
            Err(ApiError::Unauthorized("Invalid token.".into()))
        }
        None => Err(ApiError::Unauthorized(
            "Authentication credentials were not provided.".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::test_settings;

    fn detail(result: Result<(), ApiError>) -> String {
        match result {
            Err(ApiError::Unauthorized(detail)) => detail,
            other => panic!("expected 401, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_token_header() {
        let settings = test_settings();
        let auth = Authorization::bearer("secret").unwrap();
        assert!(verify_token(&settings, Some(auth), None).is_ok());
        // the header is checked even when the query token is right
        let wrong = Authorization::bearer("nope").unwrap();
        assert_eq!(
            detail(verify_token(&settings, Some(wrong), Some("secret"))),
            "Invalid token."
        );
    }

    #[test]
    fn test_verify_token_query() {
        let settings = test_settings();
        assert!(verify_token(&settings, None, Some("secret")).is_ok());
        assert_eq!(
            detail(verify_token(&settings, None, Some("bad"))),
            "Invalid token."
        );
    }

    #[test]
    fn test_missing_token() {
        let settings = test_settings();
        for query in [None, Some("")] {
            assert_eq!(
                detail(verify_token(&settings, None, query)),
                "Authentication credentials were not provided."
            );
        }
    }
}
