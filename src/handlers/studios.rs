use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::{Json, response::IntoResponse};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{BearerAuth, TokenQuery, WindowQuery, authorize, paginate};
use crate::billing::ensure_subscribed;
use crate::details::{class_detail, instance_detail, scoped_instance};
use crate::error::{ApiError, BookingError};
use crate::geocoding::Coordinates;
use crate::ledger::{EnrollmentChange, toggle_class, toggle_instance};
use crate::materializer::{InstanceEdit, NewInstance, create_special_instance, edit_instance, materialize};
use crate::models::{
    AccountId, Class, ClassDetail, ClassId, ClassInstance, InstanceDetail, InstanceId,
    OccurrenceItem, Studio, StudioId,
};
use crate::occurrences::{self, TimeWindow};
use crate::pagination::Page;
use crate::schedule::{ClassUpdate, ClassUpdated, NewClass, create_class, update_class};
use crate::studios::{
    ClassSearch, NearbyStudio, NewStudio, StudioSearch, create_studio, nearby, resolve_location,
    search_classes, search_studios,
};
use crate::validation::{parse_date, validate_coordinates};
use crate::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub long: Option<f64>,
    /// Used when `lat`/`long` are absent.
    pub postal_code: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StudioSearchQuery {
    /// Case-insensitive substring of the studio name.
    pub name: Option<String>,
    /// Comma-separated amenity types, e.g. `pool,sauna`.
    pub amenities: Option<String>,
    /// Comma-separated class names.
    pub classes: Option<String>,
    /// Comma-separated coach names.
    pub coaches: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub token: Option<String>,
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Case-insensitive substring of the class name.
    pub name: Option<String>,
    /// Case-insensitive substring of the coach name.
    pub coach: Option<String>,
    /// `HH:MM`; classes starting at or after it.
    pub after: Option<String>,
    /// `HH:MM`; classes ending at or before it.
    pub before: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DetailQuery {
    /// Reports whether this account is enrolled.
    pub account_id: Option<AccountId>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollmentRequest {
    pub account_id: AccountId,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollmentResponse {
    pub change: EnrollmentChange,
    /// Enrollment counter after the change.
    pub enrolled: u32,
    pub capacity: u32,
    pub instance_id: Option<InstanceId>,
}

#[utoipa::path(
    post,
    path = "/studios",
    params(TokenQuery),
    request_body = NewStudio,
    responses(
        (status = 201, description = "Studio created", body = Studio),
        (status = 400, description = "Invalid studio or no location match"),
        (status = 503, description = "Geocoding unavailable, coordinates required")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "studios"
)]
pub async fn post_studio(
    State(state): State<AppState>,
    auth: BearerAuth,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewStudio>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let location = resolve_location(&state.geocoder, &body).await?;
    let studio = state
        .store
        .transaction(|tables| create_studio(tables, body, location))?;
    Ok((StatusCode::CREATED, Json(studio)))
}

#[utoipa::path(
    get,
    path = "/studios/nearby",
    params(NearbyQuery),
    responses(
        (status = 200, description = "Studios, closest first", body = Page<NearbyStudio>),
        (status = 400, description = "No usable location given")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "studios"
)]
pub async fn get_nearby(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let origin = match (query.lat, query.long, query.postal_code.as_deref()) {
        (Some(lat), Some(long), _) => {
            let (lat, long) = validate_coordinates(lat, long)?;
            Coordinates { lat, long }
        }
        (_, _, Some(postal_code)) => state
            .geocoder
            .locate_postal_code(postal_code)
            .await
            .map_err(BookingError::from)?,
        _ => {
            return Err(BookingError::Validation(
                "Provide lat and long, or a postal_code.".into(),
            )
            .into());
        }
    };
    let studios = state
        .store
        .read(|tables| Ok::<_, BookingError>(nearby(tables, origin)))?;
    Ok(Json(paginate(&state, &uri, None, query.limit, query.page, studios)?))
}

#[utoipa::path(
    get,
    path = "/studios/search",
    params(StudioSearchQuery),
    responses(
        (status = 200, description = "Matching studios by name", body = Page<Studio>),
        (status = 404, description = "No such page")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "studios"
)]
pub async fn get_studio_search(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Query(query): Query<StudioSearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let search = StudioSearch {
        name: query.name,
        amenities: split_list(query.amenities),
        classes: split_list(query.classes),
        coaches: split_list(query.coaches),
    };
    let studios = state
        .store
        .read(|tables| Ok::<_, BookingError>(search_studios(tables, &search)))?;
    Ok(Json(paginate(&state, &uri, None, query.limit, query.page, studios)?))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}",
    params(("studio_id" = u64, Path, description = "Studio id"), TokenQuery),
    responses(
        (status = 200, description = "Studio", body = Studio),
        (status = 404, description = "No such studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "studios"
)]
pub async fn get_studio(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(studio_id): Path<StudioId>,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let studio = state
        .store
        .read(|tables| Ok::<_, BookingError>(tables.studio(studio_id)?.clone()))?;
    Ok(Json(studio))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/schedule",
    params(("studio_id" = u64, Path, description = "Studio id"), WindowQuery),
    responses(
        (status = 200, description = "Upcoming occurrences of every class", body = Page<OccurrenceItem>),
        (status = 404, description = "No such studio or page")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "studios"
)]
pub async fn get_studio_schedule(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(studio_id): Path<StudioId>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let occurrence_query = query.occurrence_query(&state, |days| TimeWindow::Future { days })?;
    let items = state
        .store
        .read(|tables| occurrences::list_studio(tables, studio_id, &occurrence_query))?;
    Ok(Json(query.paginate(&state, &uri, items)?))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/classes/search",
    params(("studio_id" = u64, Path, description = "Studio id"), SearchQuery),
    responses(
        (status = 200, description = "Matching classes by name", body = Page<Class>),
        (status = 404, description = "No such studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn get_class_search(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path(studio_id): Path<StudioId>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let search = ClassSearch {
        name: query.name,
        coach: query.coach,
        after: query.after,
        before: query.before,
    };
    let classes = state
        .store
        .read(|tables| search_classes(tables, studio_id, &search))?;
    Ok(Json(paginate(&state, &uri, None, query.limit, query.page, classes)?))
}

#[utoipa::path(
    post,
    path = "/studios/{studio_id}/classes",
    params(("studio_id" = u64, Path, description = "Studio id"), TokenQuery),
    request_body = NewClass,
    responses(
        (status = 201, description = "Class created", body = Class),
        (status = 400, description = "Invalid times, capacity or recurrence"),
        (status = 404, description = "No such studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn post_class(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path(studio_id): Path<StudioId>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewClass>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let class = state
        .store
        .transaction(|tables| create_class(tables, studio_id, body, now))?;
    Ok((StatusCode::CREATED, Json(class)))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/classes/{class_id}",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        DetailQuery
    ),
    responses(
        (status = 200, description = "Class detail", body = ClassDetail),
        (status = 404, description = "No such class in this studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn get_class(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id)): Path<(StudioId, ClassId)>,
    Query(query): Query<DetailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let detail = state
        .store
        .read(|tables| class_detail(tables, studio_id, class_id, query.account_id))?;
    Ok(Json(detail))
}

#[utoipa::path(
    patch,
    path = "/studios/{studio_id}/classes/{class_id}",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        TokenQuery
    ),
    request_body = ClassUpdate,
    responses(
        (status = 200, description = "Updated class and the instances reconciled", body = ClassUpdated),
        (status = 400, description = "Invalid times, capacity or recurrence"),
        (status = 404, description = "No such class in this studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn patch_class(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id)): Path<(StudioId, ClassId)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<ClassUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let updated = state.store.transaction(|tables| {
        tables.studio_class(studio_id, class_id)?;
        update_class(tables, class_id, body, now)
    })?;
    Ok(Json(updated))
}

#[utoipa::path(
    post,
    path = "/studios/{studio_id}/classes/{class_id}/toggle",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        TokenQuery
    ),
    request_body = EnrollmentRequest,
    responses(
        (status = 200, description = "Class membership toggled", body = EnrollmentResponse),
        (status = 403, description = "Account is not subscribed"),
        (status = 404, description = "No such class or account")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "enrollment"
)]
pub async fn post_class_toggle(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id)): Path<(StudioId, ClassId)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<EnrollmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let response = state.store.transaction(|tables| {
        tables.studio_class(studio_id, class_id)?;
        ensure_subscribed(tables, body.account_id)?;
        let change = toggle_class(tables, body.account_id, class_id)?;
        let class = tables.class(class_id)?;
        Ok::<_, BookingError>(EnrollmentResponse {
            change,
            enrolled: class.enrolled(),
            capacity: class.capacity,
            instance_id: None,
        })
    })?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/classes/{class_id}/instances",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        WindowQuery
    ),
    responses(
        (status = 200, description = "Upcoming occurrences of the class", body = Page<OccurrenceItem>),
        (status = 404, description = "No such class in this studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn get_class_instances(
    State(state): State<AppState>,
    auth: BearerAuth,
    uri: Uri,
    Path((studio_id, class_id)): Path<(StudioId, ClassId)>,
    Query(query): Query<WindowQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let occurrence_query = query.occurrence_query(&state, |days| TimeWindow::Future { days })?;
    let items = state.store.read(|tables| {
        tables.studio_class(studio_id, class_id)?;
        occurrences::list_class(tables, class_id, &occurrence_query)
    })?;
    Ok(Json(query.paginate(&state, &uri, items)?))
}

#[utoipa::path(
    post,
    path = "/studios/{studio_id}/classes/{class_id}/instances",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        TokenQuery
    ),
    request_body = NewInstance,
    responses(
        (status = 201, description = "Special instance created", body = ClassInstance),
        (status = 400, description = "Invalid times"),
        (status = 404, description = "No such class in this studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn post_instance(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id)): Path<(StudioId, ClassId)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<NewInstance>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let instance = state.store.transaction(|tables| {
        tables.studio_class(studio_id, class_id)?;
        create_special_instance(tables, class_id, body)
    })?;
    Ok((StatusCode::CREATED, Json(instance)))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/classes/{class_id}/instances/{instance_id}",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        ("instance_id" = u64, Path, description = "Instance id"),
        DetailQuery
    ),
    responses(
        (status = 200, description = "Instance detail", body = InstanceDetail),
        (status = 404, description = "No such instance of this class")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn get_instance(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id, instance_id)): Path<(StudioId, ClassId, InstanceId)>,
    Query(query): Query<DetailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let detail = state.store.read(|tables| {
        let instance = scoped_instance(tables, studio_id, class_id, instance_id)?;
        instance_detail(tables, instance, query.account_id)
    })?;
    Ok(Json(detail))
}

#[utoipa::path(
    patch,
    path = "/studios/{studio_id}/classes/{class_id}/instances/{instance_id}",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        ("instance_id" = u64, Path, description = "Instance id"),
        TokenQuery
    ),
    request_body = InstanceEdit,
    responses(
        (status = 200, description = "Edited instance", body = ClassInstance),
        (status = 400, description = "Invalid times"),
        (status = 404, description = "No such instance of this class"),
        (status = 409, description = "Another open instance exists on that date")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn patch_instance(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id, instance_id)): Path<(StudioId, ClassId, InstanceId)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<InstanceEdit>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let now = state.clock.now();
    let instance = state.store.transaction(|tables| {
        scoped_instance(tables, studio_id, class_id, instance_id)?;
        edit_instance(tables, instance_id, body, now)
    })?;
    Ok(Json(instance))
}

fn toggle_and_report(
    tables: &mut crate::store::Tables,
    account_id: AccountId,
    instance_id: InstanceId,
) -> Result<EnrollmentResponse, BookingError> {
    ensure_subscribed(tables, account_id)?;
    let change = toggle_instance(tables, account_id, instance_id)?;
    let instance = tables.instance(instance_id)?;
    let capacity = tables.class(instance.class_id)?.capacity;
    Ok(EnrollmentResponse {
        change,
        enrolled: instance.enrolled(),
        capacity,
        instance_id: Some(instance_id),
    })
}

#[utoipa::path(
    post,
    path = "/studios/{studio_id}/classes/{class_id}/instances/{instance_id}/toggle",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        ("instance_id" = u64, Path, description = "Instance id"),
        TokenQuery
    ),
    request_body = EnrollmentRequest,
    responses(
        (status = 200, description = "Enrollment in this occurrence toggled", body = EnrollmentResponse),
        (status = 403, description = "Instance full or account not subscribed"),
        (status = 404, description = "No such instance or account")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "enrollment"
)]
pub async fn post_instance_toggle(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id, instance_id)): Path<(StudioId, ClassId, InstanceId)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<EnrollmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let response = state.store.transaction(|tables| {
        scoped_instance(tables, studio_id, class_id, instance_id)?;
        toggle_and_report(tables, body.account_id, instance_id)
    })?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/studios/{studio_id}/classes/{class_id}/ns/{date}",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        ("date" = String, Path, description = "Occurrence date (YYYY-MM-DD)"),
        DetailQuery
    ),
    responses(
        (status = 200, description = "Detail of the materialized occurrence", body = InstanceDetail),
        (status = 400, description = "Malformed date or date not in the schedule"),
        (status = 404, description = "No such class in this studio")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "classes"
)]
pub async fn get_virtual_instance(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id, date)): Path<(StudioId, ClassId, String)>,
    Query(query): Query<DetailQuery>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let date = parse_date(&date)?;
    let detail = state.store.transaction(|tables| {
        tables.studio_class(studio_id, class_id)?;
        let instance = materialize(tables, class_id, date)?;
        instance_detail(tables, &instance, query.account_id)
    })?;
    Ok(Json(detail))
}

#[utoipa::path(
    post,
    path = "/studios/{studio_id}/classes/{class_id}/ns/{date}/toggle",
    params(
        ("studio_id" = u64, Path, description = "Studio id"),
        ("class_id" = u64, Path, description = "Class id"),
        ("date" = String, Path, description = "Occurrence date (YYYY-MM-DD)"),
        TokenQuery
    ),
    request_body = EnrollmentRequest,
    responses(
        (status = 200, description = "Occurrence materialized and enrollment toggled", body = EnrollmentResponse),
        (status = 400, description = "Malformed date or date not in the schedule"),
        (status = 403, description = "Instance full or account not subscribed")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "enrollment"
)]
pub async fn post_virtual_toggle(
    State(state): State<AppState>,
    auth: BearerAuth,
    Path((studio_id, class_id, date)): Path<(StudioId, ClassId, String)>,
    Query(query): Query<TokenQuery>,
    Json(body): Json<EnrollmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize(&state, auth, query.token.as_deref())?;
    let date = parse_date(&date)?;
    let response = state.store.transaction(|tables| {
        tables.studio_class(studio_id, class_id)?;
        let instance = materialize(tables, class_id, date)?;
        toggle_and_report(tables, body.account_id, instance.id)
    })?;
    Ok(Json(response))
}
