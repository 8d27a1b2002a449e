//! src/services/broker_service.rs
//!
//! BrokerService: the instance and binding lifecycle.
//!
//! Every operation looks at the store first, then drives the plan, then
//! records the outcome. Creating records after the remote side effect and
//! deleting a binding record before revoking it keeps a retried request
//! from finding a record that points at nothing. When a store write fails
//! after the remote side effect succeeded the resource is leaked; that is
//! logged with the ids involved and reported as 500.

use crate::{
    auth::BasicCredentials,
    client::StardogClientFactory,
    models::{
        catalog::{CatalogResponse, CatalogService},
        instance::{BindInstance, ServiceInstance},
        requests::{
            BindRequest, BindResponse, CreateServiceInstanceRequest, ServiceInstanceResponse,
        },
    },
    plans::{Plan, PlanError, PlanRegistry},
    store::{Store, StoreError},
};
use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "Stardog";
const SERVICE_DESCRIPTION: &str = "Provides access to a Stardog database";

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Gone(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BrokerError {
    pub fn status(&self) -> StatusCode {
        match self {
            BrokerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::Conflict(_) => StatusCode::CONFLICT,
            BrokerError::Gone(_) => StatusCode::GONE,
            BrokerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BrokerError::Plan(err) => err.status,
            BrokerError::Store(StoreError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            BrokerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Shared state behind every route.
#[derive(Clone)]
pub struct BrokerService {
    plans: Arc<PlanRegistry>,
    store: Arc<dyn Store>,
    clients: Arc<dyn StardogClientFactory>,
    catalog: Arc<CatalogResponse>,
    credentials: Arc<BasicCredentials>,
}

impl BrokerService {
    /// The catalog is built here once and served unchanged afterwards.
    pub fn new(
        broker_id: &str,
        plans: PlanRegistry,
        store: Arc<dyn Store>,
        clients: Arc<dyn StardogClientFactory>,
        credentials: BasicCredentials,
    ) -> Self {
        let catalog = CatalogResponse {
            services: vec![CatalogService {
                name: SERVICE_NAME.to_string(),
                id: broker_id.to_string(),
                description: SERVICE_DESCRIPTION.to_string(),
                bindable: true,
                plan_updateable: false,
                plans: plans.service_plans(),
            }],
        };
        Self {
            plans: Arc::new(plans),
            store,
            clients,
            catalog: Arc::new(catalog),
            credentials: Arc::new(credentials),
        }
    }

    pub fn credentials(&self) -> &BasicCredentials {
        &self.credentials
    }

    pub fn catalog(&self) -> &CatalogResponse {
        &self.catalog
    }

    async fn lookup_instance(&self, instance_id: &str) -> BrokerResult<Option<ServiceInstance>> {
        match self.store.get_instance(instance_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn lookup_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> BrokerResult<Option<BindInstance>> {
        match self.store.get_binding(instance_id, binding_id).await {
            Ok(binding) => Ok(Some(binding)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Rebuild the plan a stored instance was created with.
    fn inflate(&self, instance: &ServiceInstance) -> BrokerResult<Box<dyn Plan>> {
        let factory = self.plans.get(&instance.plan_id).ok_or_else(|| {
            BrokerError::Internal(format!(
                "The plan {} of instance {} is not in the catalog",
                instance.plan_id, instance.instance_guid
            ))
        })?;
        Ok(factory.inflate_plan(instance, self.clients.clone())?)
    }

    /// Provision `instance_id`. Returns 200 when an identical instance is
    /// already recorded, otherwise the status the plan reported.
    pub async fn create_instance(
        &self,
        instance_id: &str,
        request: CreateServiceInstanceRequest,
    ) -> BrokerResult<StatusCode> {
        info!(instance_id, plan_id = %request.plan_id, "Creating service instance");

        if let Some(existing) = self.lookup_instance(instance_id).await? {
            let plan = self.inflate(&existing)?;
            let same = existing.organization_guid == request.organization_guid
                && existing.space_guid == request.space_guid
                && plan.plan_id() == request.plan_id
                && existing.service_id == request.service_id
                && plan.equal_instance(&request.parameters);
            if same {
                debug!(instance_id, "Instance already exists with the same values");
                return Ok(StatusCode::OK);
            }
            return Err(BrokerError::Conflict(format!(
                "{} already exists with different values",
                instance_id
            )));
        }

        let factory = self.plans.get(&request.plan_id).ok_or_else(|| {
            BrokerError::BadRequest(format!("{} is not a known plan", request.plan_id))
        })?;
        let plan = factory.make_plan(self.clients.clone());
        let outcome = plan.create_service_instance(&request.parameters).await?;

        let instance = ServiceInstance {
            instance_guid: instance_id.to_string(),
            plan_id: request.plan_id,
            organization_guid: request.organization_guid,
            space_guid: request.space_guid,
            service_id: request.service_id,
            plan_params: outcome.payload,
        };
        if let Err(err) = self.store.add_instance(instance_id, &instance).await {
            warn!(
                instance_id,
                error = %err,
                "Failed to add the instance to the store. Resources leaked."
            );
            return Err(BrokerError::Internal(format!(
                "Failed to record instance {}: {}",
                instance_id, err
            )));
        }

        info!(instance_id, "Created service instance");
        Ok(outcome.status)
    }

    pub async fn get_instance(&self, instance_id: &str) -> BrokerResult<ServiceInstanceResponse> {
        debug!(instance_id, "Getting service instance");
        match self.lookup_instance(instance_id).await? {
            Some(_) => Ok(ServiceInstanceResponse::default()),
            None => Err(BrokerError::NotFound(format!(
                "The service with ID {} was not found",
                instance_id
            ))),
        }
    }

    /// Deprovision `instance_id` and every binding under it.
    ///
    /// Binding cleanup is best effort. A failed remote remove keeps the
    /// record so the request can be retried.
    pub async fn remove_instance(&self, instance_id: &str) -> BrokerResult<StatusCode> {
        info!(instance_id, "Removing service instance");

        let instance = self.lookup_instance(instance_id).await?.ok_or_else(|| {
            BrokerError::Gone(format!("service_instance_GUID {} does not exist", instance_id))
        })?;
        let plan = self.inflate(&instance)?;

        let bindings = self.store.get_all_bindings(instance_id).await?;
        for binding in &bindings {
            if let Err(err) = plan.unbind(binding).await {
                error!(
                    instance_id,
                    binding_id = %binding.binding_guid,
                    "Failed to clean up the binding: {}",
                    err
                );
            }
        }

        let outcome = plan.remove_instance().await.inspect_err(|err| {
            error!(instance_id, "Error removing the service: {}", err);
        })?;
        if let Err(err) = self.store.delete_instance(instance_id).await {
            warn!(
                instance_id,
                error = %err,
                "Removed the database but failed to delete the instance record. Resources leaked."
            );
            return Err(BrokerError::Internal(format!(
                "Failed to delete the record of instance {}: {}",
                instance_id, err
            )));
        }

        info!(instance_id, bindings = bindings.len(), "Removed service instance");
        Ok(outcome.status)
    }

    /// Issue credentials for `binding_id`. An identical existing binding
    /// returns its credentials with 200.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        request: BindRequest,
    ) -> BrokerResult<(StatusCode, BindResponse)> {
        info!(instance_id, binding_id, "Binding");

        let instance = self.lookup_instance(instance_id).await?.ok_or_else(|| {
            BrokerError::Internal(format!("service_instance_GUID {} does not exist", instance_id))
        })?;
        let plan = self.inflate(&instance)?;

        if let Some(existing) = self.lookup_binding(instance_id, binding_id).await? {
            if plan.equal_binding(&existing, &request) {
                debug!(instance_id, binding_id, "Binding already exists with the same values");
                return Ok((
                    StatusCode::OK,
                    BindResponse {
                        credentials: existing.plan_params,
                    },
                ));
            }
            return Err(BrokerError::Conflict(format!(
                "{} already exists with different values",
                binding_id
            )));
        }

        let outcome = plan.bind(&instance.plan_params, &request.parameters).await?;
        let binding = BindInstance {
            binding_guid: binding_id.to_string(),
            plan_params: outcome.payload,
        };
        if let Err(err) = self.store.add_binding(instance_id, binding_id, &binding).await {
            warn!(
                instance_id,
                binding_id,
                error = %err,
                "Failed to add the binding to the store. Resources leaked."
            );
            return Err(BrokerError::Internal(format!(
                "Failed to record binding {}: {}",
                binding_id, err
            )));
        }

        info!(instance_id, binding_id, "Bound");
        Ok((
            StatusCode::CREATED,
            BindResponse {
                credentials: binding.plan_params,
            },
        ))
    }

    /// Revoke `binding_id`. The record goes first, then the remote user.
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> BrokerResult<()> {
        info!(instance_id, binding_id, "Unbinding");

        let instance = self.lookup_instance(instance_id).await?.ok_or_else(|| {
            BrokerError::Gone(format!("service_instance_GUID {} does not exist", instance_id))
        })?;
        let binding = self
            .lookup_binding(instance_id, binding_id)
            .await?
            .ok_or_else(|| {
                BrokerError::Gone(format!("service_binding_GUID {} does not exist", binding_id))
            })?;
        let plan = self.inflate(&instance)?;

        self.store.delete_binding(instance_id, binding_id).await?;
        if let Err(err) = plan.unbind(&binding).await {
            warn!(
                instance_id,
                binding_id,
                error = %err,
                "Removed the binding record but failed to revoke it. Resources leaked."
            );
            return Err(BrokerError::Internal(err.message));
        }

        info!(instance_id, binding_id, "Unbound");
        Ok(())
    }
}
