//! src/store/stardog.rs
//!
//! Store kept as RDF inside a metadata database on a Stardog server.
//!
//! Each instance is one subject typed `sdcf:instance`; each binding is one
//! subject typed `sdcf:binding` and linked to its parent with `sdcf:boundto`.
//! Both carry their GUID and the base64 record in `sdcf:datais`. Identifiers
//! are restricted to `[A-Za-z0-9_-]` so they can be spliced into IRIs and
//! literals without escaping.

use super::{Store, StoreError, StoreResult, decode_record, encode_record};
use crate::{
    client::{HttpStardogClient, StardogClient, StardogError},
    models::instance::{BindInstance, ServiceInstance},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info};

const NS: &str = "http://github.com/stardog-union/service-broker/";
const TURTLE: &str = "text/turtle";
const DATA_VAR: &str = "data";

/// `storage.parameters` when `storage.type` is `stardog`.
#[derive(Deserialize, Clone, Debug)]
pub struct StardogStoreParameters {
    pub stardog_url: String,
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Deserialize)]
struct SparqlReply {
    results: SparqlResults,
}

#[derive(Deserialize)]
struct SparqlResults {
    #[serde(default)]
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Deserialize)]
struct SparqlTerm {
    value: String,
}

pub struct StardogStore {
    client: HttpStardogClient,
    db_name: String,
}

impl StardogStore {
    /// Attach to `metadata{broker_id}`, creating it when it cannot be sized.
    pub async fn connect(client: HttpStardogClient, broker_id: &str) -> StoreResult<Self> {
        let db_name = metadata_db_name(broker_id);
        if let Err(err) = client.database_size(&db_name).await {
            info!(
                "The database {} does not exist on {} ({}), creating it",
                db_name,
                client.base_url(),
                err
            );
            client.create_database(&db_name).await?;
        }
        Ok(Self { client, db_name })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    async fn select_data(&self, sparql: &str) -> StoreResult<Vec<String>> {
        debug!("Querying {}: {}", self.db_name, sparql);
        let body = self.client.query(&self.db_name, sparql).await?;
        column_values(&body, DATA_VAR)
    }

    async fn instance_record(&self, instance_id: &str) -> StoreResult<Option<String>> {
        let rows = self.select_data(&instance_query(instance_id)).await?;
        Ok(rows.into_iter().next())
    }

    async fn binding_record(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> StoreResult<Option<String>> {
        let rows = self
            .select_data(&binding_query(instance_id, binding_id))
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl Store for StardogStore {
    async fn add_instance(&self, instance_id: &str, instance: &ServiceInstance) -> StoreResult<()> {
        ensure_key_safe(instance_id)?;
        if self.instance_record(instance_id).await?.is_some() {
            return Err(StoreError::DuplicateInstance(instance_id.to_string()));
        }
        let data = encode_record(instance)?;
        self.client
            .add_data(&self.db_name, TURTLE, instance_turtle(instance_id, &data))
            .await?;
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> StoreResult<ServiceInstance> {
        ensure_key_safe(instance_id)?;
        match self.instance_record(instance_id).await? {
            Some(data) => decode_record(&data),
            None => Err(StoreError::InstanceNotFound(instance_id.to_string())),
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> StoreResult<()> {
        ensure_key_safe(instance_id)?;
        if self.instance_record(instance_id).await?.is_none() {
            return Err(StoreError::InstanceNotFound(instance_id.to_string()));
        }
        self.client
            .update(&self.db_name, &delete_instance_update(instance_id))
            .await?;
        Ok(())
    }

    async fn add_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        binding: &BindInstance,
    ) -> StoreResult<()> {
        ensure_key_safe(instance_id)?;
        ensure_key_safe(binding_id)?;
        if self.instance_record(instance_id).await?.is_none() {
            return Err(StoreError::ParentMissing(instance_id.to_string()));
        }
        if self.binding_record(instance_id, binding_id).await?.is_some() {
            return Err(StoreError::DuplicateBinding {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            });
        }
        let data = encode_record(binding)?;
        self.client
            .add_data(
                &self.db_name,
                TURTLE,
                binding_turtle(instance_id, binding_id, &data),
            )
            .await?;
        Ok(())
    }

    async fn get_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<BindInstance> {
        ensure_key_safe(instance_id)?;
        ensure_key_safe(binding_id)?;
        match self.binding_record(instance_id, binding_id).await? {
            Some(data) => decode_record(&data),
            None => Err(StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            }),
        }
    }

    async fn get_all_bindings(&self, instance_id: &str) -> StoreResult<Vec<BindInstance>> {
        ensure_key_safe(instance_id)?;
        if self.instance_record(instance_id).await?.is_none() {
            return Err(StoreError::ParentMissing(instance_id.to_string()));
        }
        self.select_data(&all_bindings_query(instance_id))
            .await?
            .iter()
            .map(|data| decode_record(data))
            .collect()
    }

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<()> {
        ensure_key_safe(instance_id)?;
        ensure_key_safe(binding_id)?;
        if self.binding_record(instance_id, binding_id).await?.is_none() {
            return Err(StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            });
        }
        self.client
            .update(&self.db_name, &delete_binding_update(instance_id, binding_id))
            .await?;
        Ok(())
    }
}

pub fn metadata_db_name(broker_id: &str) -> String {
    format!("metadata{}", broker_id)
}

fn ensure_key_safe(key: &str) -> StoreResult<()> {
    if key.is_empty()
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn instance_iri(instance_id: &str) -> String {
    format!("<{}instance/{}>", NS, instance_id)
}

fn binding_iri(instance_id: &str, binding_id: &str) -> String {
    format!("<{}binding/{}/{}>", NS, instance_id, binding_id)
}

fn instance_turtle(instance_id: &str, data: &str) -> String {
    format!(
        "@prefix sdcf: <{ns}> .\n\
         @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\
         {s} sdcf:GUID \"{id}\"^^xsd:string ;\n\
         \tsdcf:isa sdcf:instance ;\n\
         \tsdcf:datais \"{data}\"^^xsd:string .\n",
        ns = NS,
        s = instance_iri(instance_id),
        id = instance_id,
        data = data,
    )
}

fn binding_turtle(instance_id: &str, binding_id: &str, data: &str) -> String {
    format!(
        "@prefix sdcf: <{ns}> .\n\
         @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\
         {s} sdcf:GUID \"{id}\"^^xsd:string ;\n\
         \tsdcf:isa sdcf:binding ;\n\
         \tsdcf:boundto {parent} ;\n\
         \tsdcf:datais \"{data}\"^^xsd:string .\n",
        ns = NS,
        s = binding_iri(instance_id, binding_id),
        id = binding_id,
        parent = instance_iri(instance_id),
        data = data,
    )
}

fn instance_query(instance_id: &str) -> String {
    format!(
        "PREFIX sdcf: <{ns}>\n\
         SELECT ?{var} WHERE {{\n\
         \t{s} sdcf:isa sdcf:instance ;\n\
         \t\tsdcf:datais ?{var} .\n\
         }}",
        ns = NS,
        var = DATA_VAR,
        s = instance_iri(instance_id),
    )
}

fn binding_query(instance_id: &str, binding_id: &str) -> String {
    format!(
        "PREFIX sdcf: <{ns}>\n\
         SELECT ?{var} WHERE {{\n\
         \t{s} sdcf:isa sdcf:binding ;\n\
         \t\tsdcf:boundto {parent} ;\n\
         \t\tsdcf:datais ?{var} .\n\
         }}",
        ns = NS,
        var = DATA_VAR,
        s = binding_iri(instance_id, binding_id),
        parent = instance_iri(instance_id),
    )
}

fn all_bindings_query(instance_id: &str) -> String {
    format!(
        "PREFIX sdcf: <{ns}>\n\
         SELECT ?{var} WHERE {{\n\
         \t?binding sdcf:isa sdcf:binding ;\n\
         \t\tsdcf:boundto {parent} ;\n\
         \t\tsdcf:datais ?{var} .\n\
         }}",
        ns = NS,
        var = DATA_VAR,
        parent = instance_iri(instance_id),
    )
}

/// Bindings go first so none is left pointing at a deleted instance.
fn delete_instance_update(instance_id: &str) -> String {
    format!(
        "PREFIX sdcf: <{ns}>\n\
         DELETE WHERE {{ ?binding sdcf:boundto {s} ; ?p ?o . }} ;\n\
         DELETE WHERE {{ {s} ?p ?o . }}",
        ns = NS,
        s = instance_iri(instance_id),
    )
}

fn delete_binding_update(instance_id: &str, binding_id: &str) -> String {
    format!(
        "DELETE WHERE {{ {s} ?p ?o . }}",
        s = binding_iri(instance_id, binding_id),
    )
}

/// Values of `var` across every row of a SPARQL JSON results document.
fn column_values(body: &str, var: &str) -> StoreResult<Vec<String>> {
    let reply: SparqlReply = serde_json::from_str(body).map_err(StardogError::from)?;
    reply
        .results
        .bindings
        .into_iter()
        .map(|mut row| {
            row.remove(var).map(|term| term.value).ok_or_else(|| {
                StoreError::Remote(StardogError::InvalidResponse(format!(
                    "query result row has no `{}` column",
                    var
                )))
            })
        })
        .collect()
}
