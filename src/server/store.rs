//! Persistence seam for the few account fields the protocol itself needs.
//!
//! [`UserStore`] is the boundary to whatever database a deployment uses;
//! [`MemoryUserStore`] backs tests and single-process deployments.

use crate::error::{ReariseError, Result};
use crate::wire::{PlatformType, FIRST_TUTORIAL_STATE_HOME, FIRST_TUTORIAL_STATE_PROLOGUE};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

/// Friend code assigned to accounts created on this server
pub const DEFAULT_FRIEND_CODE: &str = "000000000";

/// Length of generated restore passwords
const GENERATED_PASSWORD_LEN: usize = 12;

/// Stored account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Account id
    pub user_id: i32,
    /// Install identifier bound to the account
    pub uuid: String,
    /// Player name
    pub name: String,
    /// Public friend code
    pub friend_code: String,
    /// Store the account was created through
    pub platform_type: PlatformType,
    /// Progress through the first-run tutorial
    pub first_tutorial_state: i32,
    /// Last successful login, unix milliseconds
    pub last_login_ms: Option<i64>,
}

/// Fields supplied when creating an account
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Install identifier
    pub uuid: String,
    /// Player name
    pub name: String,
    /// Store the app came from
    pub platform_type: PlatformType,
}

/// Account imported from another deployment, restorable by password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyAccount {
    /// Account id carried over from the old deployment
    pub user_id: i32,
    /// Friend code on the old deployment
    pub friend_code: String,
    /// Password issued by the old deployment
    pub password: String,
    /// Password issued here on first restore
    pub new_password: Option<String>,
    /// Player name
    pub tamer_name: String,
    /// Player level
    pub tamer_level: i32,
    /// Store the account was created through
    pub platform_type: PlatformType,
}

impl LegacyAccount {
    /// Whether `password` is either the original or the reissued password
    #[must_use]
    pub fn accepts(&self, password: &str) -> bool {
        self.password == password || self.new_password.as_deref() == Some(password)
    }
}

/// Account storage
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Create an account and assign it an id
    async fn create_user(&self, user: NewUser) -> Result<UserRecord>;

    /// Find an account by id and install identifier
    async fn find_user(&self, user_id: i32, uuid: &str) -> Result<Option<UserRecord>>;

    /// Record a successful login
    async fn record_login(&self, user_id: i32, at_ms: i64) -> Result<()>;

    /// Find a restorable account by friend code and either password
    async fn find_legacy_account(
        &self,
        friend_code: &str,
        password: &str,
    ) -> Result<Option<LegacyAccount>>;

    /// Bind a restored account to a new install
    ///
    /// Serialized per account. A replacement password is issued only on the
    /// first restore; later restores keep it.
    async fn complete_restore(&self, friend_code: &str, uuid: &str) -> Result<LegacyAccount>;
}

/// In-memory [`UserStore`]
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<i32, UserRecord>>,
    legacy_accounts: RwLock<HashMap<String, Arc<Mutex<LegacyAccount>>>>,
}

impl MemoryUserStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a restorable account
    pub async fn insert_legacy_account(&self, account: LegacyAccount) {
        self.legacy_accounts
            .write()
            .await
            .insert(account.friend_code.clone(), Arc::new(Mutex::new(account)));
    }

    /// Set an account's tutorial progress
    pub async fn set_first_tutorial_state(&self, user_id: i32, state: i32) -> Result<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(&user_id)
            .ok_or_else(|| ReariseError::internal_error(format!("no user {user_id}"), None))?;
        user.first_tutorial_state = state;
        Ok(())
    }

    /// Number of stored accounts
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    async fn legacy_row(&self, friend_code: &str) -> Option<Arc<Mutex<LegacyAccount>>> {
        self.legacy_accounts.read().await.get(friend_code).cloned()
    }
}

#[async_trait::async_trait]
impl UserStore for MemoryUserStore {
    async fn create_user(&self, user: NewUser) -> Result<UserRecord> {
        let mut users = self.users.write().await;
        let user_id = match users.keys().max() {
            None => 1,
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| ReariseError::internal_error("User id space exhausted", None))?,
        };
        let record = UserRecord {
            user_id,
            uuid: user.uuid,
            name: user.name,
            friend_code: DEFAULT_FRIEND_CODE.to_string(),
            platform_type: user.platform_type,
            first_tutorial_state: FIRST_TUTORIAL_STATE_PROLOGUE,
            last_login_ms: None,
        };
        users.insert(user_id, record.clone());
        Ok(record)
    }

    async fn find_user(&self, user_id: i32, uuid: &str) -> Result<Option<UserRecord>> {
        Ok(self
            .users
            .read()
            .await
            .get(&user_id)
            .filter(|user| user.uuid == uuid)
            .cloned())
    }

    async fn record_login(&self, user_id: i32, at_ms: i64) -> Result<()> {
        if let Some(user) = self.users.write().await.get_mut(&user_id) {
            user.last_login_ms = Some(at_ms);
        }
        Ok(())
    }

    async fn find_legacy_account(
        &self,
        friend_code: &str,
        password: &str,
    ) -> Result<Option<LegacyAccount>> {
        let Some(row) = self.legacy_row(friend_code).await else {
            return Ok(None);
        };
        let account = row.lock().await;
        Ok(account.accepts(password).then(|| account.clone()))
    }

    async fn complete_restore(&self, friend_code: &str, uuid: &str) -> Result<LegacyAccount> {
        let row = self.legacy_row(friend_code).await.ok_or_else(|| {
            ReariseError::internal_error(format!("legacy account {friend_code} vanished"), None)
        })?;

        // Row lock: concurrent restores of one account run one at a time.
        let mut account = row.lock().await;
        if account.new_password.is_none() {
            account.new_password = Some(generate_password());
        }

        let mut users = self.users.write().await;
        let user = users.entry(account.user_id).or_insert_with(|| UserRecord {
            user_id: account.user_id,
            uuid: uuid.to_string(),
            name: account.tamer_name.clone(),
            friend_code: account.friend_code.clone(),
            platform_type: account.platform_type,
            first_tutorial_state: FIRST_TUTORIAL_STATE_HOME,
            last_login_ms: None,
        });
        user.uuid = uuid.to_string();

        Ok(account.clone())
    }
}

/// Current wall-clock time in unix milliseconds
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(uuid: &str) -> NewUser {
        NewUser {
            uuid: uuid.to_string(),
            name: "Tamer".to_string(),
            platform_type: PlatformType::PlayStore,
        }
    }

    fn legacy() -> LegacyAccount {
        LegacyAccount {
            user_id: 3_838_353,
            friend_code: "ABCDEFGHI".to_string(),
            password: "hunter2".to_string(),
            new_password: None,
            tamer_name: "Taichi".to_string(),
            tamer_level: 57,
            platform_type: PlatformType::AppStore,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryUserStore::new();
        let first = store.create_user(new_user("a")).await.unwrap();
        let second = store.create_user(new_user("b")).await.unwrap();
        assert_eq!(first.user_id, 1);
        assert_eq!(second.user_id, 2);
        assert_eq!(first.friend_code, DEFAULT_FRIEND_CODE);
        assert_eq!(first.first_tutorial_state, FIRST_TUTORIAL_STATE_PROLOGUE);

        assert!(store.find_user(1, "a").await.unwrap().is_some());
        assert!(store.find_user(1, "b").await.unwrap().is_none());
        assert!(store.find_user(9, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_user_rejects_exhausted_ids() {
        let store = MemoryUserStore::new();
        let last = store.create_user(new_user("a")).await.unwrap();
        let moved = UserRecord {
            user_id: i32::MAX,
            ..last
        };
        store.users.write().await.insert(i32::MAX, moved);

        let err = store.create_user(new_user("b")).await.unwrap_err();
        assert!(matches!(err, ReariseError::Internal { .. }));
        assert!(store.find_user(i32::MAX, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_login() {
        let store = MemoryUserStore::new();
        let user = store.create_user(new_user("a")).await.unwrap();
        store.record_login(user.user_id, 1_700_000_000_000).await.unwrap();
        let found = store.find_user(user.user_id, "a").await.unwrap().unwrap();
        assert_eq!(found.last_login_ms, Some(1_700_000_000_000));
    }

    #[tokio::test]
    async fn test_legacy_lookup_accepts_either_password() {
        let store = MemoryUserStore::new();
        store.insert_legacy_account(legacy()).await;

        assert!(store.find_legacy_account("ABCDEFGHI", "hunter2").await.unwrap().is_some());
        assert!(store.find_legacy_account("ABCDEFGHI", "wrong").await.unwrap().is_none());
        assert!(store.find_legacy_account("ZZZZZZZZZ", "hunter2").await.unwrap().is_none());

        let restored = store.complete_restore("ABCDEFGHI", "u1").await.unwrap();
        let new_password = restored.new_password.unwrap();
        assert!(store
            .find_legacy_account("ABCDEFGHI", &new_password)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_restore_issues_password_once_and_rebinds_uuid() {
        let store = MemoryUserStore::new();
        store.insert_legacy_account(legacy()).await;

        let first = store.complete_restore("ABCDEFGHI", "u1").await.unwrap();
        let second = store.complete_restore("ABCDEFGHI", "u2").await.unwrap();
        assert_eq!(first.new_password, second.new_password);

        assert!(store.find_user(3_838_353, "u1").await.unwrap().is_none());
        let user = store.find_user(3_838_353, "u2").await.unwrap().unwrap();
        assert_eq!(user.first_tutorial_state, FIRST_TUTORIAL_STATE_HOME);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_restores_issue_one_password() {
        let store = Arc::new(MemoryUserStore::new());
        store.insert_legacy_account(legacy()).await;

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.complete_restore("ABCDEFGHI", &format!("u{i}")).await
            }));
        }
        let mut passwords = Vec::new();
        for task in tasks {
            passwords.push(task.await.unwrap().unwrap().new_password);
        }
        passwords.dedup();
        assert_eq!(passwords.len(), 1);
    }

    #[test]
    fn test_generated_password_is_printable() {
        let password = generate_password();
        assert_eq!(password.len(), GENERATED_PASSWORD_LEN);
        assert!(password.bytes().all(|b| (0x21..=0x7e).contains(&b)));
    }
}
