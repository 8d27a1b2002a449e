//! HTTP handlers for the service broker API.
//! Extracts ids and bodies, turns extractor rejections into 400s and
//! delegates the lifecycle to `BrokerService`.

use crate::{
    errors::AppError,
    models::requests::{BindRequest, CreateServiceInstanceRequest, EmptyResponse},
    services::broker_service::BrokerService,
};
use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};

const INSTANCE_REQUIRED: &str = "service_instance_GUID is required";
const BINDING_REQUIRED: &str = "service_binding_GUID is required";

type InstancePath = Result<Path<String>, PathRejection>;
type BindingPath = Result<Path<(String, String)>, PathRejection>;

fn instance_id(path: InstancePath) -> Result<String, AppError> {
    match path {
        Ok(Path(id)) if !id.trim().is_empty() => Ok(id),
        _ => Err(AppError::bad_request(INSTANCE_REQUIRED)),
    }
}

fn binding_ids(path: BindingPath) -> Result<(String, String), AppError> {
    match path {
        Ok(Path((instance_id, binding_id))) => {
            if instance_id.trim().is_empty() {
                return Err(AppError::bad_request(INSTANCE_REQUIRED));
            }
            if binding_id.trim().is_empty() {
                return Err(AppError::bad_request(BINDING_REQUIRED));
            }
            Ok((instance_id, binding_id))
        }
        Err(_) => Err(AppError::bad_request(BINDING_REQUIRED)),
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// `GET /v2/catalog`
pub async fn catalog(State(service): State<BrokerService>) -> impl IntoResponse {
    Json(service.catalog().clone())
}

/// `PUT /v2/service_instances/{instance_id}`
pub async fn create_instance(
    State(service): State<BrokerService>,
    path: InstancePath,
    payload: Result<Json<CreateServiceInstanceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let instance_id = instance_id(path)?;
    let request = body(payload)?;
    let status = service.create_instance(&instance_id, request).await?;
    Ok((status, Json(EmptyResponse {})))
}

/// `GET /v2/service_instances/{instance_id}`
pub async fn get_instance(
    State(service): State<BrokerService>,
    path: InstancePath,
) -> Result<impl IntoResponse, AppError> {
    let instance_id = instance_id(path)?;
    let response = service.get_instance(&instance_id).await?;
    Ok((StatusCode::OK, Json(response)))
}

/// `DELETE /v2/service_instances/{instance_id}`
pub async fn remove_instance(
    State(service): State<BrokerService>,
    path: InstancePath,
) -> Result<impl IntoResponse, AppError> {
    let instance_id = instance_id(path)?;
    let status = service.remove_instance(&instance_id).await?;
    Ok((status, Json(EmptyResponse {})))
}

/// `PUT /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
pub async fn bind(
    State(service): State<BrokerService>,
    path: BindingPath,
    payload: Result<Json<BindRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let (instance_id, binding_id) = binding_ids(path)?;
    let request = body(payload)?;
    let (status, response) = service.bind(&instance_id, &binding_id, request).await?;
    Ok((status, Json(response)))
}

/// `DELETE /v2/service_instances/{instance_id}/service_bindings/{binding_id}`
pub async fn unbind(
    State(service): State<BrokerService>,
    path: BindingPath,
) -> Result<impl IntoResponse, AppError> {
    let (instance_id, binding_id) = binding_ids(path)?;
    service.unbind(&instance_id, &binding_id).await?;
    Ok((StatusCode::OK, Json(EmptyResponse {})))
}

/// Instance routes hit with an empty id segment.
pub async fn missing_instance_id() -> AppError {
    AppError::bad_request(INSTANCE_REQUIRED)
}

/// Binding routes hit with an empty binding id segment.
pub async fn missing_binding_id() -> AppError {
    AppError::bad_request(BINDING_REQUIRED)
}
