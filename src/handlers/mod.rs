pub mod accounts;
pub mod studios;

use axum::http::Uri;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::billing::{BillingReport, run_billing_cycle};
use crate::error::BookingError;
use crate::occurrences::{self, TimeWindow};
use crate::pagination::{Page, Paginator};
use crate::validation::parse_range;
use crate::{AppState, auth::verify_token, error::ApiError};

pub(crate) type BearerAuth = Option<TypedHeader<Authorization<Bearer>>>;

pub(crate) fn authorize(
    state: &AppState,
    auth: BearerAuth,
    token: Option<&str>,
) -> Result<(), ApiError> {
    verify_token(&state.settings, auth.map(|TypedHeader(a)| a), token)
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Authentication token (alternative to Bearer header)
    pub token: Option<String>,
}

/// Time window and page of a listing.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WindowQuery {
    /// Days the window spans, or `all`
    pub range: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    /// Authentication token (alternative to Bearer header)
    pub token: Option<String>,
}

impl WindowQuery {
    fn days(&self, state: &AppState) -> Result<Option<u32>, BookingError> {
        parse_range(self.range.as_deref(), state.settings.default_range_days)
    }

    pub(crate) fn occurrence_query(
        &self,
        state: &AppState,
        window: impl FnOnce(Option<u32>) -> TimeWindow,
    ) -> Result<occurrences::Query, BookingError> {
        Ok(occurrences::Query {
            window: window(self.days(state)?),
            now: state.clock.now(),
            horizon_days: state.settings.max_horizon_days,
        })
    }

    pub(crate) fn paginate<T>(
        &self,
        state: &AppState,
        uri: &Uri,
        items: Vec<T>,
    ) -> Result<Page<T>, BookingError> {
        let range = self
            .range
            .clone()
            .unwrap_or_else(|| state.settings.default_range_days.to_string());
        paginate(state, uri, Some(range), self.limit, self.page, items)
    }
}

/// Paginates `items` with links back to `uri`'s path.
pub(crate) fn paginate<T>(
    state: &AppState,
    uri: &Uri,
    range: Option<String>,
    limit: Option<usize>,
    page: Option<usize>,
    items: Vec<T>,
) -> Result<Page<T>, BookingError> {
    Paginator::new(
        &state.settings.public_url,
        uri.path(),
        range,
        limit.unwrap_or(state.settings.page_size),
        page.unwrap_or(1),
    )?
    .paginate(items)
}

#[utoipa::path(get, path = "/", tag = "booking")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Studio Booking API",
        "endpoints": {
            "/studios": "Studios, classes and their occurrences",
            "/accounts": "Accounts, bookings and subscriptions",
            "/plans": "Subscription plans",
            "/billing/run": "Settle due payments"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "booking")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/healthz/ready",
    responses(
        (status = 200, description = "Store is ready"),
        (status = 503, description = "Store is not initialised")
    ),
    tag = "booking"
)]
pub async fn healthz_ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.is_ready() {
        (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "store not ready"})),
        )
    }
}

#[utoipa::path(
    post,
    path = "/billing/run",
    params(TokenQuery),
    responses(
        (status = 200, description = "Accounts settled by this run", body = BillingReport),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn run_billing(
    State(state): State<AppState>,
    auth: BearerAuth,
    axum::extract::Query(query): axum::extract::Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let report = run_billing_cycle(
        &state.store,
        state.clock.now(),
        state.settings.tax_rate_bps,
    )?;
    Ok(Json(report))
}
