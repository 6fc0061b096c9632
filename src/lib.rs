pub mod accounts;
pub mod auth;
pub mod billing;
pub mod clock;
pub mod details;
pub mod error;
pub mod geocoding;
pub mod handlers;
pub mod ical;
pub mod ledger;
pub mod materializer;
pub mod models;
pub mod occurrences;
pub mod openapi;
pub mod pagination;
pub mod recurrence;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod studios;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use handlers::{
    accounts as account_api, healthz_live, healthz_ready, root, run_billing,
    studios as studio_api,
};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::billing::run_billing_cycle;
use crate::clock::{Clock, SystemClock};
use crate::geocoding::MapboxGeocoder;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::settings::Settings;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub geocoder: Arc<MapboxGeocoder>,
    pub exporter: Arc<ICalExporter>,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<Store>, clock: Arc<dyn Clock>) -> Self {
        let geocoder = MapboxGeocoder::new(
            settings.geocoder_base_url.clone(),
            settings.geocoder_api_key.clone(),
        );
        Self {
            settings,
            store,
            clock,
            geocoder: Arc::new(geocoder),
            exporter: Arc::new(ICalExporter::new()),
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let store = Arc::new(Store::new());
    if let Err(err) = store.migrate() {
        error!(error = %err, "store migration failed");
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(settings.tz()?));
    let state = AppState::new(settings, store, clock);

    if state.settings.billing_on_startup {
        // an unusable store must not stop the server from starting
        if let Err(err) = run_billing_cycle(
            &state.store,
            state.clock.now(),
            state.settings.tax_rate_bps,
        ) {
            error!(error = %err, "billing cycle skipped at startup");
        }
    }

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Studio Booking API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/billing/run", post(run_billing))
        .route("/studios", post(studio_api::post_studio))
        .route("/studios/nearby", get(studio_api::get_nearby))
        .route("/studios/search", get(studio_api::get_studio_search))
        .route("/studios/{studio_id}", get(studio_api::get_studio))
        .route(
            "/studios/{studio_id}/schedule",
            get(studio_api::get_studio_schedule),
        )
        .route(
            "/studios/{studio_id}/classes",
            post(studio_api::post_class),
        )
        .route(
            "/studios/{studio_id}/classes/search",
            get(studio_api::get_class_search),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}",
            get(studio_api::get_class).patch(studio_api::patch_class),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/toggle",
            post(studio_api::post_class_toggle),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/instances",
            get(studio_api::get_class_instances).post(studio_api::post_instance),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/instances/{instance_id}",
            get(studio_api::get_instance).patch(studio_api::patch_instance),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/instances/{instance_id}/toggle",
            post(studio_api::post_instance_toggle),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/ns/{date}",
            get(studio_api::get_virtual_instance),
        )
        .route(
            "/studios/{studio_id}/classes/{class_id}/ns/{date}/toggle",
            post(studio_api::post_virtual_toggle),
        )
        .route("/accounts", post(account_api::post_account))
        .route(
            "/accounts/{account_id}",
            get(account_api::get_account).patch(account_api::patch_account),
        )
        .route("/accounts/{account_id}/schedule", get(account_api::get_schedule))
        .route(
            "/accounts/{account_id}/schedule.ical",
            get(account_api::get_schedule_ical),
        )
        .route("/accounts/{account_id}/history", get(account_api::get_history))
        .route("/accounts/{account_id}/ongoing", get(account_api::get_ongoing))
        .route(
            "/accounts/{account_id}/subscription",
            get(account_api::get_subscription)
                .put(account_api::put_subscription)
                .delete(account_api::delete_subscription),
        )
        .route("/accounts/{account_id}/payments", get(account_api::get_payments))
        .route("/plans", post(account_api::post_plan))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer)
}
