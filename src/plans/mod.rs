//! Plans: the kinds of provisioning this broker offers.
//!
//! A [`PlanFactory`] is configured once at startup and advertised in the
//! catalog. For every request it produces a short-lived [`Plan`], either a
//! fresh one for a new instance (`make_plan`) or one inflated from a stored
//! [`ServiceInstance`] (`inflate_plan`). Plans perform the remote side effects
//! and hand back opaque JSON payloads that the controller persists verbatim.

pub mod credentials;
pub mod per_instance;
pub mod shared;

use crate::{
    client::StardogClientFactory,
    config::PlanConfig,
    models::{
        catalog::ServicePlan,
        instance::{BindInstance, ServiceInstance},
        requests::BindRequest,
    },
};
use async_trait::async_trait;
use axum::http::StatusCode;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

pub use per_instance::PerInstancePlanFactory;
pub use shared::SharedDatabasePlanFactory;

/// Config name of the shared-database plan.
pub const SHARED_DATABASE_PLAN: &str = "shared_database_plan";
/// Config name of the per-instance plan.
pub const PER_INSTANCE_PLAN: &str = "perinstance";

/// A failed plan operation and the status the plan wants reported.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{message}")]
pub struct PlanError {
    pub status: StatusCode,
    pub message: String,
}

impl PlanError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

/// A successful plan operation: the status to report and the payload it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub status: StatusCode,
    pub payload: Value,
}

impl PlanOutcome {
    pub fn new(status: StatusCode, payload: Value) -> Self {
        Self { status, payload }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;

#[async_trait]
pub trait Plan: Send + Sync {
    fn plan_id(&self) -> &str;

    /// Provision remote resources for a new instance. The returned payload
    /// is what gets persisted with the instance.
    async fn create_service_instance(&self, parameters: &Value) -> PlanResult<PlanOutcome>;

    async fn remove_instance(&self) -> PlanResult<PlanOutcome>;

    /// Issue credentials against the instance described by `instance_params`.
    /// The returned payload is both persisted and sent back as `credentials`.
    async fn bind(&self, instance_params: &Value, parameters: &Value) -> PlanResult<PlanOutcome>;

    async fn unbind(&self, binding: &BindInstance) -> PlanResult<StatusCode>;

    /// True when create `parameters` describe the instance this plan was inflated from.
    fn equal_instance(&self, parameters: &Value) -> bool;

    fn equal_binding(&self, binding: &BindInstance, request: &BindRequest) -> bool;
}

pub trait PlanFactory: Send + Sync {
    fn plan_id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    fn metadata(&self) -> Option<Value> {
        None
    }

    fn free(&self) -> bool {
        true
    }

    fn bindable(&self) -> bool {
        true
    }

    fn make_plan(&self, clients: Arc<dyn StardogClientFactory>) -> Box<dyn Plan>;

    fn inflate_plan(
        &self,
        instance: &ServiceInstance,
        clients: Arc<dyn StardogClientFactory>,
    ) -> PlanResult<Box<dyn Plan>>;

    fn service_plan(&self) -> ServicePlan {
        ServicePlan {
            name: self.name().to_string(),
            id: self.plan_id().to_string(),
            description: self.description().to_string(),
            metadata: self.metadata(),
            free: self.free(),
            bindable: self.bindable(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanConfigError {
    #[error("No plan named {0} exists")]
    UnknownPlan(String),
    #[error("plan id `{0}` is configured more than once")]
    DuplicateId(String),
    #[error("invalid parameters for plan `{plan_id}`: {source}")]
    InvalidParameters {
        plan_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Plan id → factory.
#[derive(Clone, Default)]
pub struct PlanRegistry {
    factories: HashMap<String, Arc<dyn PlanFactory>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from the `plans` section of the config.
    pub fn from_config(plans: &[PlanConfig]) -> Result<Self, PlanConfigError> {
        let mut registry = Self::new();
        for plan in plans {
            let invalid = |source| PlanConfigError::InvalidParameters {
                plan_id: plan.id.clone(),
                source,
            };
            let factory: Arc<dyn PlanFactory> = match plan.name.as_str() {
                SHARED_DATABASE_PLAN => Arc::new(
                    SharedDatabasePlanFactory::new(&plan.id, &plan.parameters).map_err(invalid)?,
                ),
                PER_INSTANCE_PLAN => Arc::new(
                    PerInstancePlanFactory::new(&plan.id, &plan.parameters).map_err(invalid)?,
                ),
                other => return Err(PlanConfigError::UnknownPlan(other.to_string())),
            };
            registry.insert(factory)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, factory: Arc<dyn PlanFactory>) -> Result<(), PlanConfigError> {
        let id = factory.plan_id().to_string();
        if self.factories.contains_key(&id) {
            return Err(PlanConfigError::DuplicateId(id));
        }
        self.factories.insert(id, factory);
        Ok(())
    }

    pub fn get(&self, plan_id: &str) -> Option<Arc<dyn PlanFactory>> {
        self.factories.get(plan_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Catalog entries for every registered plan, in map order.
    pub fn service_plans(&self) -> Vec<ServicePlan> {
        self.factories.values().map(|f| f.service_plan()).collect()
    }
}

const NAME_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `prefix` followed by `len` letters drawn uniformly from `[A-Za-z]`.
pub fn random_name(prefix: &str, len: usize) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..len)
        .map(|_| NAME_LETTERS[rng.gen_range(0..NAME_LETTERS.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// Project a generic JSON value onto the shape a plan declared.
/// `null` (absent parameters) projects to the shape's default.
pub fn project<T: DeserializeOwned + Default>(value: &Value) -> Result<T, serde_json::Error> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn random_name_has_prefix_and_letters_only() {
        let name = random_name("db", 16);
        assert_eq!(name.len(), 18);
        assert!(name.starts_with("db"));
        assert!(name[2..].chars().all(|c| c.is_ascii_alphabetic()));
        assert_ne!(random_name("", 24), random_name("", 24));
    }

    #[derive(Deserialize, Default, Debug, PartialEq)]
    struct Shape {
        #[serde(default)]
        db_name: String,
    }

    #[test]
    fn project_handles_null_and_rejects_bad_shapes() {
        assert_eq!(project::<Shape>(&Value::Null).unwrap(), Shape::default());
        assert_eq!(
            project::<Shape>(&json!({"db_name": "a", "extra": 1})).unwrap().db_name,
            "a"
        );
        assert!(project::<Shape>(&json!({"db_name": 7})).is_err());
        assert!(project::<Shape>(&json!("text")).is_err());
    }

    fn plan_config(name: &str, id: &str, parameters: Value) -> PlanConfig {
        PlanConfig {
            name: name.into(),
            id: id.into(),
            parameters,
        }
    }

    #[test]
    fn registry_from_config() {
        let shared = json!({
            "stardog_url": "http://localhost:5820",
            "admin_username": "admin",
            "admin_password": "admin"
        });
        let registry = PlanRegistry::from_config(&[
            plan_config(SHARED_DATABASE_PLAN, "P", shared.clone()),
            plan_config(PER_INSTANCE_PLAN, "Q", Value::Null),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("P").unwrap().name(), "shareddb");
        assert_eq!(registry.get("Q").unwrap().name(), "perinstance");
        assert!(registry.get("R").is_none());

        let dup = PlanRegistry::from_config(&[
            plan_config(SHARED_DATABASE_PLAN, "P", shared.clone()),
            plan_config(PER_INSTANCE_PLAN, "P", Value::Null),
        ]);
        assert!(matches!(dup, Err(PlanConfigError::DuplicateId(id)) if id == "P"));

        let unknown = PlanRegistry::from_config(&[plan_config("bogus", "P", Value::Null)]);
        assert!(matches!(unknown, Err(PlanConfigError::UnknownPlan(_))));

        let invalid = PlanRegistry::from_config(&[plan_config(
            SHARED_DATABASE_PLAN,
            "P",
            json!({"stardog_url": 1}),
        )]);
        assert!(matches!(invalid, Err(PlanConfigError::InvalidParameters { .. })));
    }

    #[test]
    fn service_plan_reflects_factory() {
        let registry =
            PlanRegistry::from_config(&[plan_config(PER_INSTANCE_PLAN, "Q", Value::Null)]).unwrap();
        let plans = registry.service_plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].id, "Q");
        assert!(plans[0].free);
        assert!(plans[0].bindable);
        assert!(plans[0].metadata.is_none());
    }
}
