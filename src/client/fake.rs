//! Recording stand-in for a Stardog server, used by unit tests.

use super::stardog_client::{StardogClient, StardogClientFactory, StardogError, StardogResult};
use crate::models::instance::DatabaseCredentials;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    CreateDatabase,
    DeleteDatabase,
    UserExists,
    NewUser,
    DeleteUser,
    GrantUserAccess,
    RevokeUserAccess,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub op: Op,
    pub url: String,
    pub admin: String,
    pub db: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    failures: HashSet<Op>,
    user_exists: bool,
}

/// Factory whose clients record every call and fail on demand.
#[derive(Clone, Default)]
pub struct FakeClientFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: Op) {
        self.state.lock().failures.insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.state.lock().failures.remove(&op);
    }

    pub fn set_user_exists(&self, exists: bool) {
        self.state.lock().user_exists = exists;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls_of(op).len()
    }
}

impl StardogClientFactory for FakeClientFactory {
    fn admin_client(
        &self,
        url: &str,
        credentials: DatabaseCredentials,
    ) -> Arc<dyn StardogClient> {
        Arc::new(FakeClient {
            state: self.state.clone(),
            url: url.to_string(),
            admin: credentials.username,
        })
    }
}

struct FakeClient {
    state: Arc<Mutex<FakeState>>,
    url: String,
    admin: String,
}

impl FakeClient {
    fn record(
        &self,
        op: Op,
        db: Option<&str>,
        user: Option<&str>,
        password: Option<&str>,
    ) -> StardogResult<()> {
        let mut state = self.state.lock();
        state.calls.push(Call {
            op,
            url: self.url.clone(),
            admin: self.admin.clone(),
            db: db.map(str::to_string),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        });
        if state.failures.contains(&op) {
            return Err(StardogError::InvalidResponse(format!("forced failure of {:?}", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl StardogClient for FakeClient {
    async fn create_database(&self, db_name: &str) -> StardogResult<()> {
        self.record(Op::CreateDatabase, Some(db_name), None, None)
    }

    async fn delete_database(&self, db_name: &str) -> StardogResult<()> {
        self.record(Op::DeleteDatabase, Some(db_name), None, None)
    }

    async fn user_exists(&self, username: &str) -> StardogResult<bool> {
        self.record(Op::UserExists, None, Some(username), None)?;
        Ok(self.state.lock().user_exists)
    }

    async fn new_user(&self, username: &str, password: &str) -> StardogResult<()> {
        self.record(Op::NewUser, None, Some(username), Some(password))
    }

    async fn delete_user(&self, username: &str) -> StardogResult<()> {
        self.record(Op::DeleteUser, None, Some(username), None)
    }

    async fn grant_user_access_to_db(&self, db_name: &str, username: &str) -> StardogResult<()> {
        self.record(Op::GrantUserAccess, Some(db_name), Some(username), None)
    }

    async fn revoke_user_access(&self, db_name: &str, username: &str) -> StardogResult<()> {
        self.record(Op::RevokeUserAccess, Some(db_name), Some(username), None)
    }
}
