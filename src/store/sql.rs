//! src/store/sql.rs
//!
//! SQLite-backed store. Instances live in `service_instance`, bindings in
//! `bindings` with a foreign key that cascades on instance delete. The schema
//! is `migrations/0001_init.sql`, embedded at build time.

use super::{Store, StoreError, StoreResult, decode_record, encode_record};
use crate::models::instance::{BindInstance, ServiceInstance};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// `storage.parameters` when `storage.type` is `sql`.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct SqlStoreParameters {
    #[serde(default)]
    pub contact_string: Option<String>,
}

impl SqlStoreParameters {
    /// The configured SQLite URL, or `sqlite://data/{broker_id}.db`.
    pub fn contact_string(&self, broker_id: &str) -> String {
        match self.contact_string.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("sqlite://data/{}.db", broker_id),
        }
    }
}

#[derive(Clone)]
pub struct SqlStore {
    db: Arc<SqlitePool>,
}

impl SqlStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Open a pool on `contact_string`, creating the database file if needed.
    pub async fn connect(contact_string: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(contact_string)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<usize> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(statements.len())
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn add_instance(&self, instance_id: &str, instance: &ServiceInstance) -> StoreResult<()> {
        let data = encode_record(instance)?;
        match sqlx::query("INSERT INTO service_instance (service_guid, data) VALUES (?, ?)")
            .bind(instance_id)
            .bind(data)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateInstance(instance_id.to_string()))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn get_instance(&self, instance_id: &str) -> StoreResult<ServiceInstance> {
        let data: Option<String> =
            sqlx::query_scalar("SELECT data FROM service_instance WHERE service_guid = ?")
                .bind(instance_id)
                .fetch_optional(&*self.db)
                .await?;
        match data {
            Some(data) => decode_record(&data),
            None => Err(StoreError::InstanceNotFound(instance_id.to_string())),
        }
    }

    async fn delete_instance(&self, instance_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM service_instance WHERE service_guid = ?")
            .bind(instance_id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::InstanceNotFound(instance_id.to_string()));
        }
        Ok(())
    }

    async fn add_binding(
        &self,
        instance_id: &str,
        binding_id: &str,
        binding: &BindInstance,
    ) -> StoreResult<()> {
        let data = encode_record(binding)?;
        let mut tx = self.db.begin().await?;

        let parent: Option<i64> =
            sqlx::query_scalar("SELECT id FROM service_instance WHERE service_guid = ?")
                .bind(instance_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(parent) = parent else {
            return Err(StoreError::ParentMissing(instance_id.to_string()));
        };

        match sqlx::query("INSERT INTO bindings (service_id, binding_guid, data) VALUES (?, ?, ?)")
            .bind(parent)
            .bind(binding_id)
            .bind(data)
            .execute(&mut *tx)
            .await
        {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateBinding {
                    instance_id: instance_id.to_string(),
                    binding_id: binding_id.to_string(),
                });
            }
            Err(err) => return Err(StoreError::Sqlx(err)),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<BindInstance> {
        let data: Option<String> = sqlx::query_scalar(
            "SELECT b.data FROM bindings b
             JOIN service_instance s ON b.service_id = s.id
             WHERE s.service_guid = ? AND b.binding_guid = ?",
        )
        .bind(instance_id)
        .bind(binding_id)
        .fetch_optional(&*self.db)
        .await?;
        match data {
            Some(data) => decode_record(&data),
            None => Err(StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            }),
        }
    }

    async fn get_all_bindings(&self, instance_id: &str) -> StoreResult<Vec<BindInstance>> {
        let mut tx = self.db.begin().await?;

        let parent: Option<i64> =
            sqlx::query_scalar("SELECT id FROM service_instance WHERE service_guid = ?")
                .bind(instance_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(parent) = parent else {
            return Err(StoreError::ParentMissing(instance_id.to_string()));
        };

        let rows: Vec<String> =
            sqlx::query_scalar("SELECT data FROM bindings WHERE service_id = ? ORDER BY id")
                .bind(parent)
                .fetch_all(&mut *tx)
                .await?;
        tx.commit().await?;

        rows.iter().map(|data| decode_record(data)).collect()
    }

    async fn delete_binding(&self, instance_id: &str, binding_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM bindings
             WHERE binding_guid = ?
               AND service_id = (SELECT id FROM service_instance WHERE service_guid = ?)",
        )
        .bind(binding_id)
        .bind(instance_id)
        .execute(&*self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::BindingNotFound {
                instance_id: instance_id.to_string(),
                binding_id: binding_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
