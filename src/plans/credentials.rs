//! Binding logic common to every plan: one Stardog user per binding,
//! granted read and write on the instance database.

use super::{PlanError, PlanOutcome, PlanResult, project, random_name};
use crate::{
    client::StardogClient,
    models::{instance::BindInstance, requests::BindRequest},
};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

const USERNAME_PREFIX: &str = "stardog";
const USERNAME_LEN: usize = 8;
const PASSWORD_LEN: usize = 24;

/// Optional caller-chosen credentials on a bind request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BindParameters {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Credentials handed to a bound application. Also the persisted binding payload.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DatabaseBinding {
    pub db_name: String,
    pub url: String,
    pub username: String,
    pub password: String,
}

/// Create a user for `db_name` on `url` and grant it access.
///
/// Missing username and password are generated. An existing user with the
/// same name is a conflict; nothing is created in that case.
pub async fn issue(
    client: &dyn StardogClient,
    url: &str,
    db_name: &str,
    parameters: &Value,
) -> PlanResult<PlanOutcome> {
    let mut params: BindParameters = project(parameters)
        .map_err(|_| PlanError::bad_request("The parameters were not properly formed"))?;
    if params.username.is_empty() {
        params.username = random_name(USERNAME_PREFIX, USERNAME_LEN);
    }
    if params.password.is_empty() {
        params.password = random_name("", PASSWORD_LEN);
    }

    let binding = DatabaseBinding {
        db_name: db_name.to_string(),
        url: url.to_string(),
        username: params.username,
        password: params.password,
    };

    let exists = client.user_exists(&binding.username).await.map_err(|err| {
        warn!("UserExists check failed: {}", err);
        PlanError::internal("UserExists check failed")
    })?;
    if exists {
        return Err(PlanError::conflict(format!(
            "Failed to create the user because {} already exists",
            binding.username
        )));
    }
    client
        .new_user(&binding.username, &binding.password)
        .await
        .map_err(|err| {
            warn!("Failed to create the user {}: {}", binding.username, err);
            PlanError::internal("Failed to create the user")
        })?;
    client
        .grant_user_access_to_db(&binding.db_name, &binding.username)
        .await
        .map_err(|err| {
            warn!(
                "Failed to grant access on {} to the user {}: {}",
                binding.db_name, binding.username, err
            );
            PlanError::internal(format!(
                "Failed to grant access on {} to the user {}",
                binding.db_name, binding.username
            ))
        })?;

    let payload = serde_json::to_value(&binding)
        .map_err(|err| PlanError::internal(format!("failed to encode credentials: {}", err)))?;
    Ok(PlanOutcome::new(StatusCode::CREATED, payload))
}

/// Revoke the binding user's access and delete it.
pub async fn revoke(client: &dyn StardogClient, binding: &BindInstance) -> PlanResult<StatusCode> {
    let creds: DatabaseBinding = project(&binding.plan_params).map_err(|err| {
        warn!("Failed to inflate the parameters {}", err);
        PlanError::internal(format!("binding {} is not readable: {}", binding.binding_guid, err))
    })?;
    client
        .revoke_user_access(&creds.db_name, &creds.username)
        .await
        .map_err(|err| {
            warn!("Failed to revoke user access {}", err);
            PlanError::internal(err.to_string())
        })?;
    client.delete_user(&creds.username).await.map_err(|err| {
        warn!("Failed to delete user {}: {}", creds.username, err);
        PlanError::internal(err.to_string())
    })?;
    Ok(StatusCode::OK)
}

/// A bind request matches a stored binding when it asks for the same
/// username and password.
pub fn same_credentials(binding: &BindInstance, request: &BindRequest) -> bool {
    let Ok(requested) = project::<BindParameters>(&request.parameters) else {
        return false;
    };
    let Ok(stored) = project::<DatabaseBinding>(&binding.plan_params) else {
        return false;
    };
    requested.username == stored.username && requested.password == stored.password
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{
        StardogClientFactory,
        fake::{FakeClientFactory, Op},
    };
    use crate::models::instance::DatabaseCredentials;
    use serde_json::json;

    fn client(factory: &FakeClientFactory) -> std::sync::Arc<dyn StardogClient> {
        factory.admin_client("http://sd:5820", DatabaseCredentials::default())
    }

    #[tokio::test]
    async fn issue_generates_missing_credentials() {
        let factory = FakeClientFactory::new();
        let outcome = issue(&*client(&factory), "http://sd:5820", "db1", &Value::Null)
            .await
            .unwrap();
        assert_eq!(outcome.status, StatusCode::CREATED);

        let creds: DatabaseBinding = serde_json::from_value(outcome.payload).unwrap();
        assert!(creds.username.starts_with("stardog"));
        assert_eq!(creds.username.len(), 15);
        assert_eq!(creds.password.len(), 24);
        assert_eq!(creds.db_name, "db1");
        assert_eq!(creds.url, "http://sd:5820");

        let grants = factory.calls_of(Op::GrantUserAccess);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].db.as_deref(), Some("db1"));
        assert_eq!(grants[0].user.as_deref(), Some(creds.username.as_str()));
    }

    #[tokio::test]
    async fn issue_conflicts_on_existing_user() {
        let factory = FakeClientFactory::new();
        factory.set_user_exists(true);
        let err = issue(
            &*client(&factory),
            "u",
            "db1",
            &json!({"username": "taken", "password": "pw"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(factory.count(Op::NewUser), 0);
    }

    #[tokio::test]
    async fn issue_failures_are_internal_errors() {
        for op in [Op::UserExists, Op::NewUser, Op::GrantUserAccess] {
            let factory = FakeClientFactory::new();
            factory.fail(op);
            let err = issue(&*client(&factory), "u", "db1", &Value::Null)
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR, "{:?}", op);
        }
    }

    #[tokio::test]
    async fn issue_rejects_malformed_parameters() {
        let factory = FakeClientFactory::new();
        let err = issue(&*client(&factory), "u", "db1", &json!({"username": ["x"]}))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn revoke_revokes_then_deletes() {
        let factory = FakeClientFactory::new();
        let binding = BindInstance {
            binding_guid: "b1".into(),
            plan_params: json!({"db_name": "db1", "url": "u", "username": "bob", "password": "pw"}),
        };
        let status = revoke(&*client(&factory), &binding).await.unwrap();
        assert_eq!(status, StatusCode::OK);
        let ops: Vec<Op> = factory.calls().iter().map(|c| c.op).collect();
        assert_eq!(ops, vec![Op::RevokeUserAccess, Op::DeleteUser]);

        factory.fail(Op::DeleteUser);
        let err = revoke(&*client(&factory), &binding).await.unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn same_credentials_compares_username_and_password() {
        let binding = BindInstance {
            binding_guid: "b1".into(),
            plan_params: json!({"db_name": "db1", "url": "u", "username": "bob", "password": "pw"}),
        };
        let mut request = BindRequest {
            parameters: json!({"username": "bob", "password": "pw"}),
            ..Default::default()
        };
        assert!(same_credentials(&binding, &request));

        request.parameters = json!({"username": "bob", "password": "other"});
        assert!(!same_credentials(&binding, &request));

        request.parameters = Value::Null;
        assert!(!same_credentials(&binding, &request));
    }
}
