//! Per-instance plan: the caller names the Stardog server and its admin
//! credentials when creating the instance. Those travel with the stored
//! instance so later remove, bind and unbind reach the same server.

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

const DEFAULT_ADMIN: &str = "admin";

/// Create parameters, and the payload persisted with each instance.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
struct InstanceParameters {
    #[serde(default)]
    db_name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl InstanceParameters {
    fn credentials(&self) -> DatabaseCredentials {
        DatabaseCredentials {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// The plan takes no broker-level settings.
pub struct PerInstancePlanFactory {
    plan_id: String,
}

impl PerInstancePlanFactory {
    pub fn new(plan_id: &str, parameters: &Value) -> Result<Self, serde_json::Error> {
        if !parameters.is_null() {
            serde_json::from_value::<serde_json::Map<String, Value>>(parameters.clone())?;
        }
        Ok(Self {
            plan_id: plan_id.to_string(),
        })
    }

    fn plan(
        &self,
        clients: Arc<dyn StardogClientFactory>,
        params: InstanceParameters,
    ) -> PerInstancePlan {
        PerInstancePlan {
            plan_id: self.plan_id.clone(),
            params,
            clients,
        }
    }
}

impl PlanFactory for PerInstancePlanFactory {
    fn plan_id(&self) -> &str {
        &self.plan_id
    }

    fn name(&self) -> &str {
        "perinstance"
    }

    fn description(&self) -> &str {
        "Associate each instance with an existing Stardog knowledge graph."
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

pub struct PerInstancePlan {
    plan_id: String,
    params: InstanceParameters,
    clients: Arc<dyn StardogClientFactory>,
}

impl PerInstancePlan {
    fn client_for(&self, params: &InstanceParameters) -> Arc<dyn StardogClient> {
        self.clients.admin_client(&params.url, params.credentials())
    }
}

#[async_trait]
impl Plan for PerInstancePlan {
    fn plan_id(&self) -> &str {
        &self.plan_id
    }

    async fn create_service_instance(&self, parameters: &Value) -> PlanResult<PlanOutcome> {
        let mut params: InstanceParameters = project(parameters)
            .map_err(|_| PlanError::bad_request("The parameters were not properly formed"))?;
        if params.url.is_empty() {
            return Err(PlanError::bad_request("A Stardog URL is required"));
        }
        if params.password.is_empty() {
            return Err(PlanError::bad_request("An admin password is required"));
        }
        if params.username.is_empty() {
            params.username = DEFAULT_ADMIN.to_string();
        }
        if params.db_name.is_empty() {
            params.db_name = random_name("db", 16);
        }

        self.client_for(&params)
            .create_database(&params.db_name)
            .await
            .map_err(|err| PlanError::internal(err.to_string()))?;

        Ok(PlanOutcome::new(StatusCode::CREATED, json!(params)))
    }

    async fn remove_instance(&self) -> PlanResult<PlanOutcome> {
        self.client_for(&self.params)
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
            &*self.client_for(&instance),
            &instance.url,
            &instance.db_name,
            parameters,
        )
        .await
    }

    async fn unbind(&self, binding: &BindInstance) -> PlanResult<StatusCode> {
        credentials::revoke(&*self.client_for(&self.params), binding).await
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{FakeClientFactory, Op};

    fn stored(params: Value) -> ServiceInstance {
        ServiceInstance {
            instance_guid: "i1".into(),
            plan_id: "pi".into(),
            organization_guid: "o".into(),
            space_guid: "s".into(),
            service_id: "svc".into(),
            plan_params: params,
        }
    }

    #[tokio::test]
    async fn create_requires_url_and_password() {
        let clients = FakeClientFactory::new();
        let plan = PerInstancePlanFactory::new("pi", &Value::Null)
            .unwrap()
            .make_plan(Arc::new(clients.clone()));

        let err = plan
            .create_service_instance(&json!({"password": "pw"}))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = plan
            .create_service_instance(&json!({"url": "http://own:5820"}))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(clients.calls().is_empty());
    }

    #[tokio::test]
    async fn create_targets_caller_server_with_default_admin() {
        let clients = FakeClientFactory::new();
        let plan = PerInstancePlanFactory::new("pi", &json!({}))
            .unwrap()
            .make_plan(Arc::new(clients.clone()));

        let requested = json!({"url": "http://own:5820", "password": "pw", "db_name": "kg"});
        let outcome = plan.create_service_instance(&requested).await.unwrap();
        assert_eq!(outcome.status, StatusCode::CREATED);
        assert_eq!(
            outcome.payload,
            json!({
                "db_name": "kg",
                "url": "http://own:5820",
                "username": "admin",
                "password": "pw"
            })
        );

        let created = clients.calls_of(Op::CreateDatabase);
        assert_eq!(created[0].url, "http://own:5820");
        assert_eq!(created[0].admin, "admin");
    }

    #[tokio::test]
    async fn inflated_plan_reuses_stored_server() {
        let clients = FakeClientFactory::new();
        let inst = stored(json!({
            "db_name": "kg",
            "url": "http://own:5820",
            "username": "root",
            "password": "pw"
        }));
        let plan = PerInstancePlanFactory::new("pi", &Value::Null)
            .unwrap()
            .inflate_plan(&inst, Arc::new(clients.clone()))
            .unwrap();

        let outcome = plan.bind(&inst.plan_params, &Value::Null).await.unwrap();
        assert_eq!(outcome.payload["url"], "http://own:5820");
        assert_eq!(outcome.payload["db_name"], "kg");

        plan.remove_instance().await.unwrap();
        for call in clients.calls() {
            assert_eq!(call.url, "http://own:5820");
            assert_eq!(call.admin, "root");
        }
        assert!(plan.equal_instance(&json!({"db_name": "kg", "url": "elsewhere"})));
        assert!(!plan.equal_instance(&json!({"db_name": "other"})));
        assert!(plan.equal_instance(&json!({"url": "u", "password": "pw"})));
    }

    #[test]
    fn factory_rejects_non_object_parameters() {
        assert!(PerInstancePlanFactory::new("pi", &json!([1, 2])).is_err());
    }
}
