//! Catalog documents returned by `GET /v2/catalog`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top level catalog document.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CatalogResponse {
    pub services: Vec<CatalogService>,
}

/// One service offering. This broker advertises exactly one.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CatalogService {
    pub name: String,
    pub id: String,
    pub description: String,
    pub bindable: bool,
    pub plan_updateable: bool,
    pub plans: Vec<ServicePlan>,
}

/// A plan entry inside a [`CatalogService`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ServicePlan {
    pub name: String,
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub free: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bindable: bool,
}
