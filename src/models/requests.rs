//! Request and response bodies of the service broker API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `PUT /v2/service_instances/{instance}`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CreateServiceInstanceRequest {
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

/// Body of `PUT /v2/service_instances/{instance}/service_bindings/{binding}`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BindRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<BindResource>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

/// The application a binding is created for.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BindResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
}

/// Reply to instance create and lookup.
///
/// The broker provisions synchronously, so neither field is populated today.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ServiceInstanceResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
}

/// State of an asynchronous operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LastOperation {
    pub state: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_poll_interval_seconds: Option<u32>,
}

/// Reply to a bind. The shape of `credentials` belongs to the plan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BindResponse {
    pub credentials: Value,
}

/// Empty reply to deprovision and unbind.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct EmptyResponse {}

/// Error body sent with every non-2xx status.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorMessageResponse {
    pub description: String,
}
