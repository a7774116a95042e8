//! # Request Handlers Module
//!
//! Business handlers behind the auth middleware. Each handler declares how
//! its route authenticates and whether master/resource versions are checked,
//! then turns a decrypted payload into a JSON result.
//!
//! ## Built-in Routes
//!
//! | Path | Auth | Checks all versions |
//! |------|------|---------------------|
//! | `app/status` | login | no |
//! | `user/create` | login | no |
//! | `user/login` | login | no |
//! | `migration/restorePassword` | login | no |
//! | `home/login` | session | yes |

use crate::error::{ReariseError, Result};
use crate::server::middleware::{AuthContext, AuthMode};
use crate::server::store::{now_ms, NewUser};
use crate::server::ServerState;
use crate::wire::api::{
    path, AppStatusResponse, HomeLoginResponse, RestorePasswordRequest, RestorePasswordResponse,
    UserCreateRequest, UserCreateResponse, UserLoginRequest, UserLoginResponse,
};
use crate::wire::{
    CommonRequest, CommonResponse, ErrorNumber, TutorialInfo, FIRST_TUTORIAL_STATE_DOWNLOAD,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Longest accepted player name, in characters
pub const MAX_NAME_CHARS: usize = 10;

/// Language and voice changes granted on the global deployment
const GLOBAL_CHANGEABLE_COUNT: i32 = 3;

/// Decoded request handed to a handler
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Caller identity
    pub auth: AuthContext,
    /// Version/platform descriptor, already validated
    pub common: CommonRequest,
    /// Business fields
    pub payload: Value,
}

impl HandlerRequest {
    /// Deserialize the business fields
    ///
    /// ## Errors
    /// - `ReariseError::Request`: fields missing or of the wrong type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ReariseError::request_error(format!("invalid payload: {e}")))
    }

    /// Whether the caller is on the Japanese deployment
    #[must_use]
    pub fn is_japan(&self) -> bool {
        self.common.language_code_type.is_none()
    }

    fn session_user_id(&self) -> Result<i32> {
        self.auth
            .user_id
            .ok_or(ReariseError::Api(ErrorNumber::DISCONNECTED_SESSION))
    }
}

/// One API route
#[async_trait::async_trait]
pub trait ApiHandler: Send + Sync {
    /// Route path relative to `/api/`
    fn path(&self) -> &'static str;

    /// How callers authenticate
    fn auth_mode(&self) -> AuthMode;

    /// Whether master and resource versions are checked
    fn verify_all_versions(&self) -> bool {
        self.auth_mode() == AuthMode::Session
    }

    /// Produce the response payload
    async fn handle(&self, state: &ServerState, request: HandlerRequest) -> Result<Value>;
}

/// Path to handler map
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn ApiHandler>>,
}

impl HandlerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in route
    #[must_use]
    pub fn with_builtin_routes() -> Self {
        let mut registry = Self::new();
        registry.register(AppStatusHandler);
        registry.register(UserCreateHandler);
        registry.register(UserLoginHandler);
        registry.register(RestorePasswordHandler);
        registry.register(HomeLoginHandler);
        registry
    }

    /// Add or replace a route
    pub fn register<H: ApiHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.path(), Arc::new(handler));
    }

    /// Handler for `path`
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<dyn ApiHandler>> {
        self.handlers.get(path).cloned()
    }

    /// Registered paths, sorted
    #[must_use]
    pub fn paths(&self) -> Vec<&'static str> {
        let mut paths: Vec<_> = self.handlers.keys().copied().collect();
        paths.sort_unstable();
        paths
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

fn to_value<T: Serialize>(response: &T) -> Result<Value> {
    serde_json::to_value(response).map_err(|e| {
        ReariseError::internal_error("Failed to serialize response", Some(Box::new(e)))
    })
}

/// `app/status`: asset locations and legal document revisions
#[derive(Debug, Clone, Copy)]
pub struct AppStatusHandler;

#[async_trait::async_trait]
impl ApiHandler for AppStatusHandler {
    fn path(&self) -> &'static str {
        path::APP_STATUS
    }

    fn auth_mode(&self) -> AuthMode {
        AuthMode::Login
    }

    async fn handle(&self, state: &ServerState, request: HandlerRequest) -> Result<Value> {
        let base = state.public_base_url.trim_end_matches('/');
        let japan = request.is_japan();
        to_value(&AppStatusResponse {
            master_base_url: format!("{base}/master/"),
            master_cache_key: state.versions.master_cache_key(),
            resource_base_url: format!("{base}/resource/"),
            resource_cache_key: state.versions.resource_cache_key(),
            image_base_url: format!("{base}/image/"),
            terms_url: format!(
                "https://legal.bandainamcoent.co.jp/terms/{}",
                if japan { "nejp" } else { "" }
            ),
            terms_version: 1,
            privacy_policy_url: format!(
                "https://legal.bandainamcoent.co.jp/privacy/{}",
                if japan { "jp" } else { "" }
            ),
            privacy_policy_version: 1,
            update_type: i32::from(!japan),
        })
    }
}

/// `user/create`: new account with a fresh session
#[derive(Debug, Clone, Copy)]
pub struct UserCreateHandler;

#[async_trait::async_trait]
impl ApiHandler for UserCreateHandler {
    fn path(&self) -> &'static str {
        path::USER_CREATE
    }

    fn auth_mode(&self) -> AuthMode {
        AuthMode::Login
    }

    #[instrument(level = "debug", name = "user_create", skip_all)]
    async fn handle(&self, state: &ServerState, request: HandlerRequest) -> Result<Value> {
        let payload: UserCreateRequest = request.parse()?;
        if !is_install_uuid(&payload.uuid) {
            return Err(ReariseError::request_error("invalid `uuid`"));
        }
        if request.is_japan() && payload.currency_unit.as_deref() != Some("JPY") {
            return Err(ReariseError::request_error("invalid `currencyUnit`"));
        }
        validate_name(&payload.name)?;

        let user = state
            .store
            .create_user(NewUser {
                uuid: payload.uuid,
                name: payload.name,
                platform_type: payload.platform_type,
            })
            .await?;
        let session = state.crypto.mint_session(user.user_id, true);
        info!(user_id = user.user_id, "Created account");

        to_value(&UserCreateResponse {
            user_id: user.user_id,
            friend_code: user.friend_code,
            session_id: session.session_id,
            encryption_key: session.encryption_key,
            common_response: CommonResponse {
                tutorial_info: Some(TutorialInfo::first_tutorial_start()),
                ..CommonResponse::default()
            },
        })
    }
}

/// `user/login`: new session for an existing account
#[derive(Debug, Clone, Copy)]
pub struct UserLoginHandler;

#[async_trait::async_trait]
impl ApiHandler for UserLoginHandler {
    fn path(&self) -> &'static str {
        path::USER_LOGIN
    }

    fn auth_mode(&self) -> AuthMode {
        AuthMode::Login
    }

    #[instrument(level = "debug", name = "user_login", skip_all)]
    async fn handle(&self, state: &ServerState, request: HandlerRequest) -> Result<Value> {
        let payload: UserLoginRequest = request.parse()?;

        // User id 0 is an anonymous session with nothing to look up.
        let mut fresh = false;
        if payload.user_id != 0 {
            let user = state
                .store
                .find_user(payload.user_id, &payload.uuid)
                .await?
                .ok_or(ReariseError::Api(ErrorNumber::USER_NOT_EXISTS))?;
            state.store.record_login(user.user_id, now_ms()).await?;
            fresh = user.first_tutorial_state <= FIRST_TUTORIAL_STATE_DOWNLOAD;
        }

        let session = state.crypto.mint_session(payload.user_id, fresh);
        debug!(user_id = payload.user_id, fresh, "Logged in");

        let global_count = (!request.is_japan()).then_some(GLOBAL_CHANGEABLE_COUNT);
        to_value(&UserLoginResponse {
            session_id: session.session_id,
            encryption_key: session.encryption_key,
            is_load_necessary: true,
            language_changeable_count: global_count,
            voice_changeable_count: global_count,
        })
    }
}

/// `migration/restorePassword`: move an imported account to a new install
#[derive(Debug, Clone, Copy)]
pub struct RestorePasswordHandler;

#[async_trait::async_trait]
impl ApiHandler for RestorePasswordHandler {
    fn path(&self) -> &'static str {
        path::MIGRATION_RESTORE_PASSWORD
    }

    fn auth_mode(&self) -> AuthMode {
        AuthMode::Login
    }

    #[instrument(level = "debug", name = "restore_password", skip_all)]
    async fn handle(&self, state: &ServerState, request: HandlerRequest) -> Result<Value> {
        let payload: RestorePasswordRequest = request.parse()?;
        if !is_install_uuid(&payload.uuid) {
            return Err(ReariseError::request_error("invalid `uuid`"));
        }
        if !is_printable(&payload.friend_code, 9, 9) {
            return Err(ReariseError::request_error("invalid `friendCode`"));
        }
        if !is_printable(&payload.password, 1, 30) {
            return Err(ReariseError::request_error("invalid `password`"));
        }

        let account = state
            .store
            .find_legacy_account(&payload.friend_code, &payload.password)
            .await?
            .ok_or(ReariseError::Api(ErrorNumber::USER_INHERITANCE))?;

        // Keyed by the original password so either password joins one flight.
        let key = format!("{}:{}", account.friend_code, account.password);
        let store = Arc::clone(&state.store);
        let restored = state
            .restores
            .run(key, || async move {
                store.complete_restore(&payload.friend_code, &payload.uuid).await
            })
            .await?;

        let session = state.crypto.mint_session(restored.user_id, false);
        info!(user_id = restored.user_id, "Restored account");

        to_value(&RestorePasswordResponse {
            user_id: restored.user_id,
            friend_code: restored.friend_code,
            session_id: session.session_id,
            encryption_key: session.encryption_key,
            tamer_name: restored.tamer_name,
            tamer_level: restored.tamer_level,
        })
    }
}

/// `home/login`: daily login
#[derive(Debug, Clone, Copy)]
pub struct HomeLoginHandler;

#[async_trait::async_trait]
impl ApiHandler for HomeLoginHandler {
    fn path(&self) -> &'static str {
        path::HOME_LOGIN
    }

    fn auth_mode(&self) -> AuthMode {
        AuthMode::Session
    }

    async fn handle(&self, _state: &ServerState, request: HandlerRequest) -> Result<Value> {
        let user_id = request.session_user_id()?;
        debug!(user_id, "Daily login");
        to_value(&HomeLoginResponse::default())
    }
}

/// Player name rules
///
/// ## Errors
/// - `UserNameCharacterOver`: empty or longer than [`MAX_NAME_CHARS`]
/// - `NGWordInUserName`: whitespace only
pub fn validate_name(name: &str) -> Result<()> {
    let chars = name.chars().count();
    if chars == 0 || chars > MAX_NAME_CHARS {
        return Err(ReariseError::Api(ErrorNumber::USER_NAME_CHARACTER_OVER));
    }
    if name.chars().all(char::is_whitespace) {
        return Err(ReariseError::Api(ErrorNumber::NG_WORD_IN_USER_NAME));
    }
    Ok(())
}

fn is_install_uuid(uuid: &str) -> bool {
    uuid.len() == 32
        && uuid
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_printable(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.len()) && value.bytes().all(|b| (0x21..=0x7e).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoService, EnvelopeKey, SessionTokenCodec, DEFAULT_LOGIN_KEY};
    use crate::server::store::{LegacyAccount, MemoryUserStore, UserStore};
    use crate::server::version::VersionGate;
    use crate::wire::{LanguageCodeType, OsType, PlatformType, Version, TUTORIAL_TYPE_FIRST};
    use serde_json::json;

    const UUID: &str = "21f626eb2f4643e98ee5b840af07e813";

    fn state_with(store: Arc<MemoryUserStore>) -> ServerState {
        let tokens = SessionTokenCodec::new(&[5u8; 16], &[6u8; 16]).unwrap();
        let crypto = CryptoService::new(
            tokens,
            EnvelopeKey::from_slice(DEFAULT_LOGIN_KEY.as_bytes()).unwrap(),
        );
        ServerState::new(
            Arc::new(crypto),
            store,
            VersionGate::new("1.0.0", None, None),
            "http://localhost:7999/",
        )
    }

    fn state() -> ServerState {
        state_with(Arc::new(MemoryUserStore::new()))
    }

    fn login_request(state: &ServerState, payload: Value, language: Option<LanguageCodeType>) -> HandlerRequest {
        HandlerRequest {
            auth: crate::server::middleware::authenticate(&state.crypto, AuthMode::Login, None)
                .unwrap(),
            common: CommonRequest {
                os_type: OsType::Android,
                version: Version {
                    app_version: "1.0.0".to_string(),
                    ..Version::default()
                },
                language_code_type: language,
            },
            payload,
        }
    }

    fn create_payload(name: &str) -> Value {
        json!({"uuid": UUID, "name": name, "platformType": 2, "currencyUnit": "JPY"})
    }

    #[test]
    fn test_registry_routes() {
        let registry = HandlerRegistry::with_builtin_routes();
        assert_eq!(
            registry.paths(),
            vec![
                "app/status",
                "home/login",
                "migration/restorePassword",
                "user/create",
                "user/login"
            ]
        );
        let home = registry.get("home/login").unwrap();
        assert_eq!(home.auth_mode(), AuthMode::Session);
        assert!(home.verify_all_versions());
        assert!(!registry.get("user/login").unwrap().verify_all_versions());
        assert!(registry.get("user/delete").is_none());
    }

    #[tokio::test]
    async fn test_app_status() {
        let state = state();
        let value = AppStatusHandler
            .handle(&state, login_request(&state, json!({"userId": 0}), None))
            .await
            .unwrap();
        assert_eq!(value["masterBaseUrl"], "http://localhost:7999/master/");
        assert_eq!(value["resourceBaseUrl"], "http://localhost:7999/resource/");
        assert_eq!(value["termsVersion"], 1);
        assert_eq!(value["updateType"], 0);

        let value = AppStatusHandler
            .handle(&state, login_request(&state, json!({}), Some(LanguageCodeType::En)))
            .await
            .unwrap();
        assert_eq!(value["updateType"], 1);
    }

    #[tokio::test]
    async fn test_user_create_mints_fresh_session() {
        let state = state();
        let value = UserCreateHandler
            .handle(&state, login_request(&state, create_payload("Tamer"), None))
            .await
            .unwrap();
        let response: UserCreateResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.friend_code, "000000000");
        assert_eq!(
            response.common_response.tutorial_info.map(|t| t.tutorial_type),
            Some(TUTORIAL_TYPE_FIRST)
        );

        let opened = state.crypto.open_session(&response.session_id).unwrap();
        assert_eq!(opened.user_id, response.user_id);
        assert!(opened.fresh);
    }

    #[tokio::test]
    async fn test_user_create_name_rules() {
        let state = state();
        for (name, code) in [
            ("", ErrorNumber::USER_NAME_CHARACTER_OVER),
            ("ABCDEFGHIJK", ErrorNumber::USER_NAME_CHARACTER_OVER),
            ("   ", ErrorNumber::NG_WORD_IN_USER_NAME),
        ] {
            let err = UserCreateHandler
                .handle(&state, login_request(&state, create_payload(name), None))
                .await
                .unwrap_err();
            assert_eq!(err.error_number(), code, "name {name:?}");
        }
        assert!(validate_name("アグモン").is_ok());
        assert!(validate_name("ABCDEFGHIJ").is_ok());
    }

    #[tokio::test]
    async fn test_user_create_rejects_bad_fields() {
        let state = state();
        let bad_uuid = json!({"uuid": "XYZ", "name": "a", "platformType": 2, "currencyUnit": "JPY"});
        let no_currency = json!({"uuid": UUID, "name": "a", "platformType": 2});
        let bad_platform = json!({"uuid": UUID, "name": "a", "platformType": 3, "currencyUnit": "JPY"});
        for payload in [bad_uuid, no_currency, bad_platform] {
            let err = UserCreateHandler
                .handle(&state, login_request(&state, payload, None))
                .await
                .unwrap_err();
            assert_eq!(err.error_number(), ErrorNumber::SERVER_ERROR);
        }
    }

    #[tokio::test]
    async fn test_user_login() {
        let store = Arc::new(MemoryUserStore::new());
        let state = state_with(Arc::clone(&store));
        let user = store
            .create_user(NewUser {
                uuid: UUID.to_string(),
                name: "Tamer".to_string(),
                platform_type: PlatformType::PlayStore,
            })
            .await
            .unwrap();

        let payload = json!({"uuid": UUID, "userId": user.user_id});
        let value = UserLoginHandler
            .handle(&state, login_request(&state, payload.clone(), None))
            .await
            .unwrap();
        assert_eq!(value["isLoadNecessary"], true);
        assert!(value.get("languageChangeableCount").is_none());
        let opened = state
            .crypto
            .open_session(value["sessionId"].as_str().unwrap())
            .unwrap();
        assert!(opened.fresh);

        store
            .set_first_tutorial_state(user.user_id, crate::wire::FIRST_TUTORIAL_STATE_HOME)
            .await
            .unwrap();
        let value = UserLoginHandler
            .handle(&state, login_request(&state, payload, Some(LanguageCodeType::En)))
            .await
            .unwrap();
        assert_eq!(value["languageChangeableCount"], 3);
        let opened = state
            .crypto
            .open_session(value["sessionId"].as_str().unwrap())
            .unwrap();
        assert!(!opened.fresh);

        let found = store.find_user(user.user_id, UUID).await.unwrap().unwrap();
        assert!(found.last_login_ms.is_some());
    }

    #[tokio::test]
    async fn test_user_login_unknown_user() {
        let state = state();
        let err = UserLoginHandler
            .handle(&state, login_request(&state, json!({"uuid": UUID, "userId": 12345}), None))
            .await
            .unwrap_err();
        assert_eq!(err.error_number(), ErrorNumber::USER_NOT_EXISTS);

        let value = UserLoginHandler
            .handle(&state, login_request(&state, json!({"uuid": UUID, "userId": 0}), None))
            .await
            .unwrap();
        assert!(value["sessionId"].is_string());
    }

    #[tokio::test]
    async fn test_restore_password() {
        let store = Arc::new(MemoryUserStore::new());
        store
            .insert_legacy_account(LegacyAccount {
                user_id: 3_838_353,
                friend_code: "ABCDEFGHI".to_string(),
                password: "hunter2".to_string(),
                new_password: None,
                tamer_name: "Taichi".to_string(),
                tamer_level: 57,
                platform_type: PlatformType::AppStore,
            })
            .await;
        let state = state_with(Arc::clone(&store));

        let payload = json!({
            "friendCode": "ABCDEFGHI",
            "password": "hunter2",
            "uuid": UUID,
            "platformType": 1
        });
        let value = RestorePasswordHandler
            .handle(&state, login_request(&state, payload, None))
            .await
            .unwrap();
        let response: RestorePasswordResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.user_id, 3_838_353);
        assert_eq!(response.tamer_level, 57);
        let opened = state.crypto.open_session(&response.session_id).unwrap();
        assert!(!opened.fresh);
        assert!(store.find_user(3_838_353, UUID).await.unwrap().is_some());

        let wrong = json!({
            "friendCode": "ABCDEFGHI",
            "password": "wrong",
            "uuid": UUID,
            "platformType": 1
        });
        let err = RestorePasswordHandler
            .handle(&state, login_request(&state, wrong, None))
            .await
            .unwrap_err();
        assert_eq!(err.error_number(), ErrorNumber::USER_INHERITANCE);
    }

    #[tokio::test]
    async fn test_restore_password_validation() {
        let state = state();
        for (friend_code, password) in [("SHORT", "pw"), ("ABCDEFGHI", ""), ("ABCD FGHI", "pw")] {
            let payload = json!({
                "friendCode": friend_code,
                "password": password,
                "uuid": UUID,
                "platformType": 1
            });
            let err = RestorePasswordHandler
                .handle(&state, login_request(&state, payload, None))
                .await
                .unwrap_err();
            assert!(matches!(err, ReariseError::Request { .. }));
        }
    }

    #[test]
    fn test_home_login_requires_session() {
        let state = state();
        let err = tokio_test::block_on(
            HomeLoginHandler.handle(&state, login_request(&state, json!({}), None)),
        )
        .unwrap_err();
        assert_eq!(err.error_number(), ErrorNumber::DISCONNECTED_SESSION);

        let minted = state.crypto.mint_session(12345, false);
        let mut request = login_request(&state, json!({}), None);
        request.auth = crate::server::middleware::authenticate(
            &state.crypto,
            AuthMode::Session,
            Some(&minted.session_id),
        )
        .unwrap();
        let value = tokio_test::block_on(HomeLoginHandler.handle(&state, request)).unwrap();
        assert_eq!(value, json!({"receivedLoginBonusList": []}));
    }
}
