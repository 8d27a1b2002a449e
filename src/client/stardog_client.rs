//! src/client/stardog_client.rs
//!
//! Capability-level client for a remote Stardog server. The [`StardogClient`]
//! trait is what plans drive; [`HttpStardogClient`] implements it over the
//! Stardog HTTP admin API and additionally exposes the few data-plane calls
//! the graph-backed store needs.

use crate::models::instance::DatabaseCredentials;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url, header, multipart};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StardogError {
    #[error("request to Stardog failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("expected {expected} but got {actual} when {method} to {url}")]
    UnexpectedStatus {
        method: Method,
        url: String,
        expected: StatusCode,
        actual: StatusCode,
    },
    #[error("malformed Stardog response: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unexpected Stardog response: {0}")]
    InvalidResponse(String),
    #[error("invalid Stardog URL `{0}`")]
    InvalidUrl(String),
}

pub type StardogResult<T> = Result<T, StardogError>;

/// Operations the broker performs against a Stardog server on behalf of a plan.
#[async_trait]
pub trait StardogClient: Send + Sync {
    async fn create_database(&self, db_name: &str) -> StardogResult<()>;
    async fn delete_database(&self, db_name: &str) -> StardogResult<()>;
    async fn user_exists(&self, username: &str) -> StardogResult<bool>;
    async fn new_user(&self, username: &str, password: &str) -> StardogResult<()>;
    async fn delete_user(&self, username: &str) -> StardogResult<()>;
    /// Grants both read and write on `db_name`.
    async fn grant_user_access_to_db(&self, db_name: &str, username: &str) -> StardogResult<()>;
    /// Revokes both read and write on `db_name`.
    async fn revoke_user_access(&self, db_name: &str, username: &str) -> StardogResult<()>;
}

/// Hands out admin clients for a given endpoint. Plans only ever see this
/// seam, which is where tests substitute a fake.
pub trait StardogClientFactory: Send + Sync {
    fn admin_client(&self, url: &str, credentials: DatabaseCredentials)
    -> Arc<dyn StardogClient>;
}

/// Production factory. All clients share one connection pool.
#[derive(Clone)]
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    pub fn new() -> StardogResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("stardog-service-broker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    pub fn client(&self, url: &str, credentials: DatabaseCredentials) -> HttpStardogClient {
        HttpStardogClient::new(self.http.clone(), url, credentials)
    }
}

impl StardogClientFactory for HttpClientFactory {
    fn admin_client(
        &self,
        url: &str,
        credentials: DatabaseCredentials,
    ) -> Arc<dyn StardogClient> {
        Arc::new(self.client(url, credentials))
    }
}

#[derive(Serialize)]
struct NewUserRequest<'a> {
    username: &'a str,
    superuser: bool,
    /// Stardog expects the password as an array of one-character strings.
    password: Vec<String>,
}

#[derive(Deserialize)]
struct UserListResponse {
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Serialize)]
struct UserPermission<'a> {
    action: &'a str,
    resource_type: &'a str,
    resource: [&'a str; 1],
}

const PERMISSION_ACTIONS: [&str; 2] = ["write", "read"];

/// Stardog HTTP client bound to one server and one credential pair.
#[derive(Clone)]
pub struct HttpStardogClient {
    http: reqwest::Client,
    base_url: String,
    credentials: DatabaseCredentials,
}

impl HttpStardogClient {
    pub fn new(http: reqwest::Client, url: &str, credentials: DatabaseCredentials) -> Self {
        Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` extended by `segments`, each percent-encoded as a single
    /// path segment so names cannot climb out of their resource.
    fn endpoint(&self, segments: &[&str]) -> StardogResult<Url> {
        let invalid = || StardogError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> StardogResult<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.endpoint(segments)?)
            .basic_auth(&self.credentials.username, Some(&self.credentials.password)))
    }

    /// Send a request and require `expected` back.
    ///
    /// The response body is always read to completion so the connection is
    /// returned to the pool whatever the outcome.
    async fn execute(
        &self,
        builder: RequestBuilder,
        expected: StatusCode,
    ) -> StardogResult<String> {
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();

        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if status != expected {
            debug!(%method, %url, %status, body = %body, "unexpected Stardog status");
            return Err(StardogError::UnexpectedStatus {
                method,
                url,
                expected,
                actual: status,
            });
        }
        debug!("Completed {} to {}", method, url);
        Ok(body)
    }

    /// Size of `db_name` in triples. Fails when the database does not exist.
    pub async fn database_size(&self, db_name: &str) -> StardogResult<u64> {
        let body = self
            .execute(
                self.request(Method::GET, &[db_name, "size"])?
                    .header(header::ACCEPT, "text/plain"),
                StatusCode::OK,
            )
            .await?;
        body.trim()
            .parse::<u64>()
            .map_err(|_| StardogError::InvalidResponse(format!("database size `{}`", body.trim())))
    }

    /// Add `payload` to `db_name` inside a single transaction.
    pub async fn add_data(
        &self,
        db_name: &str,
        content_type: &str,
        payload: String,
    ) -> StardogResult<()> {
        let tx_id = self
            .execute(
                self.request(Method::POST, &[db_name, "transaction", "begin"])?
                    .header(header::ACCEPT, "text/plain"),
                StatusCode::OK,
            )
            .await?;
        let tx_id = tx_id.trim().to_string();

        if let Err(err) = self.add_and_commit(db_name, &tx_id, content_type, payload).await {
            let rollback = self.transaction_step(db_name, "rollback", &tx_id).await;
            if let Err(rollback_err) = rollback {
                warn!(
                    "Failed to roll back transaction {} on {}: {}",
                    tx_id, db_name, rollback_err
                );
            }
            return Err(err);
        }
        Ok(())
    }

    async fn add_and_commit(
        &self,
        db_name: &str,
        tx_id: &str,
        content_type: &str,
        payload: String,
    ) -> StardogResult<()> {
        self.execute(
            self.request(Method::POST, &[db_name, tx_id, "add"])?
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT, "text/plain")
                .body(payload),
            StatusCode::OK,
        )
        .await?;
        self.transaction_step(db_name, "commit", tx_id).await
    }

    /// `POST {db}/transaction/{step}/{tx_id}` for commit and rollback.
    async fn transaction_step(&self, db_name: &str, step: &str, tx_id: &str) -> StardogResult<()> {
        self.execute(
            self.request(Method::POST, &[db_name, "transaction", step, tx_id])?,
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }

    /// Run a SPARQL query and return the raw `application/sparql-results+json` body.
    pub async fn query(&self, db_name: &str, sparql: &str) -> StardogResult<String> {
        self.execute(
            self.request(Method::GET, &[db_name, "query"])?
                .query(&[("query", sparql)])
                .header(header::ACCEPT, "application/sparql-results+json"),
            StatusCode::OK,
        )
        .await
    }

    /// Run a SPARQL update.
    pub async fn update(&self, db_name: &str, sparql: &str) -> StardogResult<()> {
        self.execute(
            self.request(Method::POST, &[db_name, "update"])?
                .form(&[("query", sparql)]),
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }

    async fn put_permissions(
        &self,
        method: Method,
        segments: &[&str],
        db_name: &str,
        expected: StatusCode,
    ) -> StardogResult<()> {
        for action in PERMISSION_ACTIONS {
            let permission = UserPermission {
                action,
                resource_type: "db",
                resource: [db_name],
            };
            self.execute(
                self.request(method.clone(), segments)?.json(&permission),
                expected,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StardogClient for HttpStardogClient {
    async fn create_database(&self, db_name: &str) -> StardogResult<()> {
        let root = json!({ "dbname": db_name, "options": {}, "files": [] });
        debug!("Creating the database with {}", root);
        let form = multipart::Form::new().text("root", root.to_string());
        self.execute(
            self.request(Method::POST, &["admin", "databases"])?.multipart(form),
            StatusCode::CREATED,
        )
        .await?;
        Ok(())
    }

    async fn delete_database(&self, db_name: &str) -> StardogResult<()> {
        info!("Deleting the database {}", db_name);
        self.execute(
            self.request(Method::DELETE, &["admin", "databases", db_name])?,
            StatusCode::OK,
        )
        .await
        .inspect_err(|err| warn!("Error deleting the db {}: {}", db_name, err))?;
        Ok(())
    }

    async fn user_exists(&self, username: &str) -> StardogResult<bool> {
        let body = self
            .execute(
                self.request(Method::GET, &["admin", "users"])?
                    .header(header::ACCEPT, "application/json"),
                StatusCode::OK,
            )
            .await?;
        let list: UserListResponse = serde_json::from_str(&body)?;
        Ok(list.users.iter().any(|u| u == username))
    }

    async fn new_user(&self, username: &str, password: &str) -> StardogResult<()> {
        let request = NewUserRequest {
            username,
            superuser: false,
            password: password.chars().map(String::from).collect(),
        };
        self.execute(
            self.request(Method::POST, &["admin", "users"])?.json(&request),
            StatusCode::CREATED,
        )
        .await
        .inspect_err(|err| warn!("Failed to create a new user {}: {}", username, err))?;
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> StardogResult<()> {
        info!("Deleting the user {}", username);
        self.execute(
            self.request(Method::DELETE, &["admin", "users", username])?,
            StatusCode::OK,
        )
        .await
        .inspect_err(|err| warn!("Error deleting user {}: {}", username, err))?;
        Ok(())
    }

    async fn grant_user_access_to_db(&self, db_name: &str, username: &str) -> StardogResult<()> {
        self.put_permissions(
            Method::PUT,
            &["admin", "permissions", "user", username],
            db_name,
            StatusCode::CREATED,
        )
        .await
    }

    async fn revoke_user_access(&self, db_name: &str, username: &str) -> StardogResult<()> {
        info!("Revoking user {} access to {}", username, db_name);
        self.put_permissions(
            Method::POST,
            &["admin", "permissions", "user", username, "delete"],
            db_name,
            StatusCode::OK,
        )
        .await
    }
}
