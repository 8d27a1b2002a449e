//! Records owned by the store: provisioned instances and their bindings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A provisioned service instance.
///
/// `plan_params` is whatever the plan produced at create time. The
/// controller never looks inside it; only the plan that wrote it does.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServiceInstance {
    /// Externally assigned GUID, the store key.
    pub instance_guid: String,

    /// Must name a plan present in the catalog.
    pub plan_id: String,

    pub organization_guid: String,
    pub space_guid: String,
    pub service_id: String,

    /// Plan specific payload.
    #[serde(default)]
    pub plan_params: Value,
}

/// Credentials issued to one bound application.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BindInstance {
    /// Externally assigned GUID, unique within the parent instance.
    pub binding_guid: String,

    /// Plan specific payload, also returned to the caller as `credentials`.
    #[serde(default)]
    pub plan_params: Value,
}

/// Username and password pair for a Stardog endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
}
