use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::models::{Amenity, ClassInstance, OccurrenceItem};
use crate::recurrence::Recurrence;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::run_billing,
        crate::handlers::studios::post_studio,
        crate::handlers::studios::get_nearby,
        crate::handlers::studios::get_studio_search,
        crate::handlers::studios::get_studio,
        crate::handlers::studios::get_studio_schedule,
        crate::handlers::studios::get_class_search,
        crate::handlers::studios::post_class,
        crate::handlers::studios::get_class,
        crate::handlers::studios::patch_class,
        crate::handlers::studios::post_class_toggle,
        crate::handlers::studios::get_class_instances,
        crate::handlers::studios::post_instance,
        crate::handlers::studios::get_instance,
        crate::handlers::studios::patch_instance,
        crate::handlers::studios::post_instance_toggle,
        crate::handlers::studios::get_virtual_instance,
        crate::handlers::studios::post_virtual_toggle,
        crate::handlers::accounts::post_account,
        crate::handlers::accounts::get_account,
        crate::handlers::accounts::patch_account,
        crate::handlers::accounts::get_schedule,
        crate::handlers::accounts::get_history,
        crate::handlers::accounts::get_ongoing,
        crate::handlers::accounts::get_schedule_ical,
        crate::handlers::accounts::post_plan,
        crate::handlers::accounts::get_subscription,
        crate::handlers::accounts::put_subscription,
        crate::handlers::accounts::delete_subscription,
        crate::handlers::accounts::get_payments
    ),
    components(schemas(OccurrenceItem, ClassInstance, Recurrence, Amenity)),
    tags(
        (name = "booking", description = "Service status"),
        (name = "studios", description = "Studios and their schedules"),
        (name = "classes", description = "Class and instance administration"),
        (name = "enrollment", description = "Joining and leaving classes and occurrences"),
        (name = "accounts", description = "Accounts and their bookings"),
        (name = "billing", description = "Plans, subscriptions and payments")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
