//! Shared-database plan: every instance is a new database on one Stardog
//! server configured for the whole broker.

use super::{
    Plan, PlanError, PlanFactory, PlanOutcome, PlanResult, credentials, project, random_name,
};
use crate::{
    client::{StardogClient, StardogClientFactory},
    models::{
        instance::{BindInstance, DatabaseCredentials, ServiceInstance},
        requests::BindRequest,
    },
};
use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

const DB_NAME_PREFIX: &str = "db";
const DB_NAME_LEN: usize = 16;

/// Plan parameters from the broker config.
#[derive(Deserialize, Clone, Debug)]
pub struct SharedDatabaseConfig {
    pub stardog_url: String,
    pub admin_username: String,
    pub admin_password: String,
}

/// Create parameters, and the payload persisted with each instance.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
struct InstanceParameters {
    #[serde(default)]
    db_name: String,
}

pub struct SharedDatabasePlanFactory {
    plan_id: String,
    config: SharedDatabaseConfig,
}

impl SharedDatabasePlanFactory {
    pub fn new(plan_id: &str, parameters: &Value) -> Result<Self, serde_json::Error> {
        Ok(Self {
            plan_id: plan_id.to_string(),
            config: serde_json::from_value(parameters.clone())?,
        })
    }

    fn plan(
        &self,
        clients: Arc<dyn StardogClientFactory>,
        params: InstanceParameters,
    ) -> SharedDatabasePlan {
        SharedDatabasePlan {
            plan_id: self.plan_id.clone(),
            config: self.config.clone(),
            params,
            clients,
        }
    }
}

impl PlanFactory for SharedDatabasePlanFactory {
    fn plan_id(&self) -> &str {
        &self.plan_id
    }

    fn name(&self) -> &str {
        "shareddb"
    }

    fn description(&self) -> &str {
        concat!(
            "Creates a new Stardog database on an existing server. ",
            "The Stardog server maybe shared by many applications."
        )
    }

    fn make_plan(&self, clients: Arc<dyn StardogClientFactory>) -> Box<dyn Plan> {
        Box::new(self.plan(clients, InstanceParameters::default()))
    }

    fn inflate_plan(
        &self,
        instance: &ServiceInstance,
        clients: Arc<dyn StardogClientFactory>,
    ) -> PlanResult<Box<dyn Plan>> {
        let params = project(&instance.plan_params).map_err(|err| {
            PlanError::internal(format!(
                "stored parameters of {} are not readable: {}",
                instance.instance_guid, err
            ))
        })?;
        Ok(Box::new(self.plan(clients, params)))
    }
}

pub struct SharedDatabasePlan {
    plan_id: String,
    config: SharedDatabaseConfig,
    params: InstanceParameters,
    clients: Arc<dyn StardogClientFactory>,
}

impl SharedDatabasePlan {
    fn admin_client(&self) -> Arc<dyn StardogClient> {
        self.clients.admin_client(
            &self.config.stardog_url,
            DatabaseCredentials {
                username: self.config.admin_username.clone(),
                password: self.config.admin_password.clone(),
            },
        )
    }
}

#[async_trait]
impl Plan for SharedDatabasePlan {
    fn plan_id(&self) -> &str {
        &self.plan_id
    }

    async fn create_service_instance(&self, parameters: &Value) -> PlanResult<PlanOutcome> {
        let mut params: InstanceParameters = project(parameters)
            .map_err(|_| PlanError::bad_request("The parameters were not properly formed"))?;
        if params.db_name.is_empty() {
            params.db_name = random_name(DB_NAME_PREFIX, DB_NAME_LEN);
        }

        self.admin_client()
            .create_database(&params.db_name)
            .await
            .map_err(|err| PlanError::internal(err.to_string()))?;

        Ok(PlanOutcome::new(StatusCode::CREATED, json!(params)))
    }

    async fn remove_instance(&self) -> PlanResult<PlanOutcome> {
        self.admin_client()
            .delete_database(&self.params.db_name)
            .await
            .map_err(|err| PlanError::internal(err.to_string()))?;
        Ok(PlanOutcome::new(StatusCode::OK, json!({})))
    }

    async fn bind(&self, instance_params: &Value, parameters: &Value) -> PlanResult<PlanOutcome> {
        let instance: InstanceParameters = project(instance_params).map_err(|_| {
            PlanError::bad_request("The plan specific parameters were poorly formed")
        })?;
        credentials::issue(
            &*self.admin_client(),
            &self.config.stardog_url,
            &instance.db_name,
            parameters,
        )
        .await
    }

    async fn unbind(&self, binding: &BindInstance) -> PlanResult<StatusCode> {
        credentials::revoke(&*self.admin_client(), binding).await
    }

    /// A request that left `db_name` out matches the generated name.
    fn equal_instance(&self, parameters: &Value) -> bool {
        project::<InstanceParameters>(parameters)
            .map(|requested| {
                requested.db_name.is_empty() || requested.db_name == self.params.db_name
            })
            .unwrap_or(false)
    }

    fn equal_binding(&self, binding: &BindInstance, request: &BindRequest) -> bool {
        credentials::same_credentials(binding, request)
    }
}
