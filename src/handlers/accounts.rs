use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::{Json, response::IntoResponse};
use serde::Deserialize;
use utoipa::IntoParams;

use super::{BearerAuth, TokenQuery, WindowQuery, authorize, paginate};
use crate::AppState;
use crate::accounts::{AccountUpdate, BookingView, NewAccount, create_account, update_account};
use crate::billing::{
    self, Cancellation, NewPlan, PlanView, SubscribeRequest, SubscriptionStatus, create_plan,
};
use crate::error::{ApiError, BookingError};
use crate::models::{Account, AccountId, OccurrenceItem, Payment, Subscription};
use crate::occurrences::list_account;
use crate::pagination::Page;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub token: Option<String>,
}

#[utoipa::path(
    post,
    path = "/accounts",
    params(TokenQuery),
    request_body = NewAccount,
    responses(
        (status = 201, description = "Account created", body = Account),
        (status = 400, description = "Invalid email"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn post_account(
    State(state): State<AppState>,
    auth: BearerAuth,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewAccount>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let account = state
        .store
        .transaction(|tables| create_account(tables, body))?;
    Ok((StatusCode::CREATED, Json(account)))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}",
    params(("account_id" = u64, Path, description = "Account id"), TokenQuery),
    responses(
        (status = 200, description = "Account", body = Account),
        (status = 404, description = "No such account")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn get_account(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let account = state
        .store
        .read(|tables| Ok::<_, BookingError>(tables.account(account_id)?.clone()))?;
    Ok(Json(account))
}

#[utoipa::path(
    patch,
    path = "/accounts/{account_id}",
    params(("account_id" = u64, Path, description = "Account id"), TokenQuery),
    request_body = AccountUpdate,
    responses(
        (status = 200, description = "Account updated", body = Account),
        (status = 400, description = "Invalid email or payment method"),
        (status = 404, description = "No such account"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn patch_account(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<AccountUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let account = state
        .store
        .transaction(|tables| update_account(tables, account_id, body, now))?;
    Ok(Json(account))
}

fn bookings(
    state: &AppState,
    account_id: AccountId,
    view: BookingView,
    query: &WindowQuery,
) -> Result<Vec<OccurrenceItem>, BookingError> {
    let occurrence_query = query.occurrence_query(state, |days| view.window(days))?;
    state
        .store
        .read(|tables| list_account(tables, account_id, &occurrence_query))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/schedule",
    params(("account_id" = u64, Path, description = "Account id"), WindowQuery),
    responses(
        (status = 200, description = "Upcoming bookings, soonest first", body = Page<OccurrenceItem>),
        (status = 404, description = "No such account or page")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn get_schedule(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(account_id): Path<AccountId>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let items = bookings(&state, account_id, BookingView::Schedule, &query)?;
    Ok(Json(query.paginate(&state, &uri, items)?))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/history",
    params(("account_id" = u64, Path, description = "Account id"), WindowQuery),
    responses(
        (status = 200, description = "Past bookings, most recent first", body = Page<OccurrenceItem>),
        (status = 404, description = "No such account or page")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn get_history(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(account_id): Path<AccountId>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let items = bookings(&state, account_id, BookingView::History, &query)?;
    Ok(Json(query.paginate(&state, &uri, items)?))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/ongoing",
    params(("account_id" = u64, Path, description = "Account id"), WindowQuery),
    responses(
        (status = 200, description = "Bookings in progress", body = Page<OccurrenceItem>),
        (status = 404, description = "No such account")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn get_ongoing(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(account_id): Path<AccountId>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let items = bookings(&state, account_id, BookingView::Ongoing, &query)?;
    Ok(Json(query.paginate(&state, &uri, items)?))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/schedule.ical",
    params(("account_id" = u64, Path, description = "Account id"), WindowQuery),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 401, description = "Missing or invalid token"),
        (status = 404, description = "No upcoming bookings")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "accounts"
)]
pub async fn get_schedule_ical(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let items = bookings(&state, account_id, BookingView::Schedule, &query)?;
    if items.is_empty() {
        return Err(ApiError::NotFound("No upcoming bookings".into()));
    }

    let body = state.exporter.generate(
        "Studio bookings",
        &items,
        state.settings.public_url.as_str(),
    );
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=studio_schedule.ics",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    post,
    path = "/plans",
    params(TokenQuery),
    request_body = NewPlan,
    responses(
        (status = 201, description = "Plan created", body = Subscription),
        (status = 400, description = "Negative charge")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn post_plan(
    State(state): State<AppState>,
    auth: BearerAuth,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewPlan>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let plan = state.store.transaction(|tables| create_plan(tables, body))?;
    Ok((StatusCode::CREATED, Json(plan)))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/subscription",
    params(("account_id" = u64, Path, description = "Account id"), TokenQuery),
    responses(
        (status = 200, description = "Every plan, flagged for this account", body = [PlanView]),
        (status = 404, description = "No such account")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn get_subscription(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let plans = state
        .store
        .read(|tables| billing::plans(tables, account_id))?;
    Ok(Json(plans))
}

#[utoipa::path(
    put,
    path = "/accounts/{account_id}/subscription",
    params(("account_id" = u64, Path, description = "Account id"), TokenQuery),
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscribed, resubscribed or switched plan", body = SubscriptionStatus),
        (status = 400, description = "No payment method"),
        (status = 404, description = "No such account or plan"),
        (status = 409, description = "Already subscribed to this plan")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn put_subscription(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let tax_bps = state.settings.tax_rate_bps;
    let status = state
        .store
        .transaction(|tables| billing::subscribe(tables, account_id, body, now, tax_bps))?;
    Ok(Json(status))
}

#[utoipa::path(
    delete,
    path = "/accounts/{account_id}/subscription",
    params(("account_id" = u64, Path, description = "Account id"), TokenQuery),
    responses(
        (status = 200, description = "Next payment cancelled", body = Cancellation),
        (status = 403, description = "Account is not subscribed"),
        (status = 409, description = "Already cancelled")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn delete_subscription(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(account_id): Path<AccountId>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let cancellation = state
        .store
        .transaction(|tables| billing::cancel(tables, account_id, now))?;
    Ok(Json(cancellation))
}

#[utoipa::path(
    get,
    path = "/accounts/{account_id}/payments",
    params(("account_id" = u64, Path, description = "Account id"), PageQuery),
    responses(
        (status = 200, description = "Payments, newest first", body = Page<Payment>),
        (status = 404, description = "No such account or page")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "billing"
)]
pub async fn get_payments(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(account_id): Path<AccountId>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let payments = state
        .store
        .read(|tables| billing::payments(tables, account_id))?;
    Ok(Json(paginate(&state, &uri, None, query.limit, query.page, payments)?))
}
