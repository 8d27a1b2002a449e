//! Durable record of provisioned instances and their bindings.
//!
//! The store is independent of the Stardog servers the plans talk to. A
//! record here means the remote side effect happened; the controller relies
//! on that when deciding between 200, 409 and 410.

pub mod memory;
pub mod sql;
pub mod stardog;

use crate::{
    client::StardogError,
    models::instance::{BindInstance, ServiceInstance},
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use stardog::StardogStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("service instance `{0}` not found")]
    InstanceNotFound(String),
    #[error("binding `{binding_id}` of instance `{instance_id}` not found")]
    BindingNotFound {
        instance_id: String,
        binding_id: String,
    },
    #[error("service instance `{0}` already exists")]
    DuplicateInstance(String),
    #[error("binding `{binding_id}` of instance `{instance_id}` already exists")]
    DuplicateBinding {
        instance_id: String,
        binding_id: String,
    },
    #[error("parent instance `{0}` does not exist")]
    ParentMissing(String),
    #[error("invalid key `{0}`")]
    InvalidKey(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Remote(#[from] StardogError),
}

impl StoreError {
    /// The requested instance or binding is not recorded.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::InstanceNotFound(_) | StoreError::BindingNotFound { .. }
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent instance and binding records.
///
/// Deleting an instance deletes its bindings. Every backend serialises its
/// own writes; callers hold no locks across calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert `instance` under `instance_id`. Fails with `DuplicateInstance` if present.
    async fn add_instance(&self, instance_id: &str, instance: &ServiceInstance) -> StoreResult<()>;

    async fn get_instance(&self, instance_id: &str) -> StoreResult<ServiceInstance>;

    /// Remove the instance and all of its bindings.
    async fn delete_instance(&self, instance_id: &str) -> StoreResult<()>;

    /// Insert `binding` under its parent. Fails with `ParentMissing` when
    /// the instance is not recorded and `DuplicateBinding` when the id is taken.
    async fn add_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        binding: &BindInstance,
    ) -> StoreResult<()>;

    async fn get_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<BindInstance>;

    /// Every binding of `instance_id`. Fails with `ParentMissing` when the
    /// instance is not recorded.
    async fn get_all_bindings(&self, instance_id: &str) -> StoreResult<Vec<BindInstance>>;

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<()>;
}

/// Serialise a record as base64(JSON). The result only uses the standard
/// base64 alphabet, so it can sit inside an RDF literal without escaping.
pub fn encode_record<T: Serialize>(record: &T) -> StoreResult<String> {
    let json = serde_json::to_vec(record).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    Ok(general_purpose::STANDARD.encode(json))
}

pub fn decode_record<T: DeserializeOwned>(data: &str) -> StoreResult<T> {
    let json = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|err| StoreError::Corrupt(format!("base64: {}", err)))?;
    serde_json::from_slice(&json).map_err(|err| StoreError::Corrupt(format!("json: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_codec_keeps_every_field() {
        let instance = ServiceInstance {
            instance_guid: "11111111-1111".into(),
            plan_id: "P".into(),
            organization_guid: "O".into(),
            space_guid: "Sp".into(),
            service_id: "S".into(),
            plan_params: json!({"db_name": "alpha", "nested": {"k": [1, "two"]}}),
        };
        let encoded = encode_record(&instance).unwrap();
        assert!(
            encoded
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        );
        assert_eq!(decode_record::<ServiceInstance>(&encoded).unwrap(), instance);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_record::<BindInstance>("not base64!"),
            Err(StoreError::Corrupt(_))
        ));
        let not_json = general_purpose::STANDARD.encode("plain text");
        assert!(matches!(
            decode_record::<BindInstance>(&not_json),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn error_classification() {
        assert!(StoreError::InstanceNotFound("a".into()).is_not_found());
        assert!(
            StoreError::BindingNotFound {
                instance_id: "a".into(),
                binding_id: "b".into()
            }
            .is_not_found()
        );
        assert!(!StoreError::ParentMissing("a".into()).is_not_found());
        assert!(!StoreError::DuplicateInstance("a".into()).is_not_found());
    }
}
