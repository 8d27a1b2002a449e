//! Defines the Open Service Broker v2 routes.
//!
//! ## Structure
//! - `GET    /v2/catalog` — advertised service and plans
//! - `PUT    /v2/service_instances/{instance_id}` — provision
//! - `GET    /v2/service_instances/{instance_id}` — lookup
//! - `DELETE /v2/service_instances/{instance_id}` — deprovision
//! - `PUT    /v2/service_instances/{instance_id}/service_bindings/{binding_id}` — bind
//! - `DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}` — unbind
//!
//! Every route sits behind HTTP Basic authentication.

use crate::{
    auth::require_basic_auth,
    handlers::broker_handlers::{
        bind, catalog, create_instance, get_instance, missing_binding_id, missing_instance_id,
        remove_instance, unbind,
    },
    services::broker_service::BrokerService,
};
use axum::{
    Router, middleware,
    routing::{any, get, put},
};

/// Build the broker router with `service` as shared state.
pub fn routes(service: BrokerService) -> Router {
    Router::new()
        .route("/v2/catalog", get(catalog))
        .route("/v2/service_instances/", any(missing_instance_id))
        .route(
            "/v2/service_instances/{instance_id}",
            put(create_instance).get(get_instance).delete(remove_instance),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/",
            any(missing_binding_id),
        )
        .route(
            "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
            put(bind).delete(unbind),
        )
        .route_layer(middleware::from_fn_with_state(
            service.clone(),
            require_basic_auth,
        ))
        .with_state(service)
}
