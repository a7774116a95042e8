//! # Client Call Engine
//!
//! A [`Session`] owns one player's connection state (token, session key,
//! tutorial progress, login day) and turns every business call into either a
//! decoded success payload or a terminal error.
//!
//! ## Recovery
//!
//! | Condition | Action |
//! |-----------|--------|
//! | transport timeout, fewer than 6 retries so far | resend immediately |
//! | *session disconnected* | `user/login` without the ad id, then resend |
//! | *day changed* | `home/login`, then resend |
//! | *server error*, attempts left | back off, resync, resend |
//! | anything else | [`ReariseError::Protocol`] with the request and response |
//! | shutdown | [`ReariseError::Terminated`] |
//!
//! Every session-mode call first waits the configured pre-call delay, which
//! throttles each session to a human-like call rate.
//!
//! ## Login-Mode Calls
//!
//! `app/status`, `user/login`, `user/create` and `migration/restorePassword`
//! are sealed with the pre-shared login key and skip the recovery table
//! (apart from timeout retries); any structured error they return is terminal.

use super::backoff::Backoff;
use super::config::{Account, ClientConfig};
use super::transport::{InboundResponse, OutboundRequest, Transport};
use crate::crypto::{envelope, EnvelopeKey};
use crate::error::{ReariseError, Result};
use crate::shutdown::Shutdown;
use crate::wire::api::{
    path, AppStatusRequest, AppStatusResponse, HomeLoginResponse, RestorePasswordRequest,
    RestorePasswordResponse, UserCreateRequest, UserCreateResponse, UserLoginRequest,
    UserLoginResponse,
};
use crate::wire::{
    common_response, new_request_id, wrap_request, ApiErrorBody, ApiResponse, BodyKind,
    CommonRequest, ErrorNumber, PlatformType, TutorialInfo, Version, CONTENT_TYPE_OCTET_STREAM,
    HEADER_REQUEST_ID, HEADER_SESSION_ID, HEADER_UNITY_VERSION,
};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Transport timeouts retried per exchange before the timeout is terminal
pub const MAX_TIMEOUT_RETRIES: u32 = 6;

/// File written into the diagnostics directory on an unexpected response
pub const DIAGNOSTICS_FILE: &str = "error.bin";

const JST_OFFSET_MS: i64 = 9 * 3_600_000;
const DAY_MS: i64 = 86_400_000;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Login day of `unix_ms` for a server that rolls over at `reset_hour` JST
#[must_use]
pub fn login_day(unix_ms: i64, reset_hour: u8) -> i64 {
    (unix_ms + JST_OFFSET_MS - i64::from(reset_hour) * 3_600_000).div_euclid(DAY_MS)
}

/// Random 16-digit device id
fn unique_device_id() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000_000_000_u64..10_000_000_000_000_000)
        .to_string()
}

fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// One player's protocol session
pub struct Session<T: Transport> {
    config: Arc<ClientConfig>,
    transport: Arc<T>,
    shutdown: Shutdown,
    account: Account,
    login_key: EnvelopeKey,
    session_id: Option<String>,
    session_key: Option<EnvelopeKey>,
    app_status: Option<AppStatusResponse>,
    tutorial_info: Option<TutorialInfo>,
    last_login_day: Option<i64>,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.account.user_id)
            .field("uuid", &self.account.uuid)
            .field("has_session", &self.session_id.is_some())
            .field("tutorial_info", &self.tutorial_info)
            .field("last_login_day", &self.last_login_day)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Create a session without talking to the server
    ///
    /// ## Errors
    /// `ReariseError::Config` when the configured login key is malformed.
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<T>,
        account: Account,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let login_key = config.login_key()?;
        Ok(Self {
            config,
            transport,
            shutdown,
            account,
            login_key,
            session_id: None,
            session_key: None,
            app_status: None,
            tutorial_info: None,
            last_login_day: None,
        })
    }

    /// Create a session and run the initialization handshake
    ///
    /// `app/status`, then `user/login` for existing accounts, then the daily
    /// `home/login` unless the player is still in the first tutorial.
    pub async fn connect(
        config: Arc<ClientConfig>,
        transport: Arc<T>,
        account: Account,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let mut session = Self::new(config, transport, account, shutdown)?;
        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<()> {
        self.check_app_status().await?;
        if self.account.user_id != 0 {
            self.user_login(true).await?;
            if !self.tutorial_info.is_some_and(|info| info.is_first_tutorial()) {
                self.ensure_home_login().await?;
            }
        }
        Ok(())
    }

    /// Player identity, including the id assigned by `user/create`
    #[must_use]
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Current session token, once logged in
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last `app/status` result
    #[must_use]
    pub fn app_status(&self) -> Option<&AppStatusResponse> {
        self.app_status.as_ref()
    }

    /// Tutorial progress reported by the last response carrying it
    #[must_use]
    pub fn tutorial_info(&self) -> Option<TutorialInfo> {
        self.tutorial_info
    }

    /// Login day of the last `home/login`
    #[must_use]
    pub fn last_login_day(&self) -> Option<i64> {
        self.last_login_day
    }

    /// Cancellation handle observed by every wait of this session
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Issue one session-mode call with the configured attempt limit
    pub async fn call<P, R>(&mut self, api_path: &str, payload: &P) -> Result<R>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let max_attempts = self.config.max_attempts;
        self.call_with(api_path, payload, max_attempts).await
    }

    /// Issue one session-mode call allowing `max_attempts` server errors
    pub async fn call_with<P, R>(&mut self, api_path: &str, payload: &P, max_attempts: u32) -> Result<R>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let body = wrap_request(&self.common_request(true), payload)?;
        let request_id = new_request_id();

        let delay = self.account.delay_ms.unwrap_or(self.config.call_delay_ms);
        self.shutdown.sleep(Duration::from_millis(delay)).await?;

        let mut attempt = 1;
        let mut backoff = Backoff::new();
        loop {
            let key = self.session_key.clone().unwrap_or_else(|| self.login_key.clone());
            let session_id = self.session_id.clone();
            let response = self
                .exchange(api_path, &key, session_id.as_deref(), &request_id, &body)
                .await?;

            let (error_body, raw) = match response {
                ApiResponse::Success(value) => {
                    if let Some(common) = common_response(&value) {
                        self.tutorial_info = common.tutorial_info;
                    }
                    return serde_json::from_value(value).map_err(|e| {
                        ReariseError::internal_error(
                            format!("Malformed {api_path} response"),
                            Some(Box::new(e)),
                        )
                    });
                }
                ApiResponse::Error { body: error_body, raw } => (error_body, raw),
            };

            match error_body.error_number {
                ErrorNumber::DISCONNECTED_SESSION => {
                    info!(user_id = self.account.user_id, uuid = %self.account.uuid, api_path, "Session disconnected, logging in again");
                    self.user_login(false).await?;
                }
                ErrorNumber::DAY_CHANGED => {
                    info!(user_id = self.account.user_id, uuid = %self.account.uuid, api_path, "Day changed, replaying home login");
                    self.home_login().await?;
                }
                ErrorNumber::SERVER_ERROR if attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    info!(
                        user_id = self.account.user_id,
                        uuid = %self.account.uuid,
                        "Backing off attempt {attempt}: {} ms",
                        delay.as_millis()
                    );
                    self.shutdown.sleep(delay).await?;
                    self.resync().await?;
                    attempt += 1;
                }
                _ => return Err(protocol_error(api_path, &body, error_body, &raw)),
            }
        }
    }

    /// Log in, minting a new session token and key
    ///
    /// Versions are declared only once a session already exists.
    pub async fn user_login(&mut self, supply_ad_id: bool) -> Result<UserLoginResponse> {
        let request = UserLoginRequest {
            uuid: self.account.uuid.clone(),
            user_id: self.account.user_id,
            ad_id: if supply_ad_id {
                self.account.ad_id.clone()
            } else {
                String::new()
            },
            is_development_mode: true,
            is_root: true,
            validation_code: self.account.validation_code.clone(),
            device_info: self.account.device_info(),
            locale: self.account.wire_locale(),
        };
        let common = self.common_request(self.session_id.is_some());
        let response: UserLoginResponse = self.login_call(path::USER_LOGIN, common, &request).await?;

        self.adopt_session(&response.session_id, &response.encryption_key)?;
        debug!(user_id = self.account.user_id, uuid = %self.account.uuid, "Logged in");
        Ok(response)
    }

    /// Create an account for this install and adopt its session
    pub async fn user_create(&mut self, name: &str) -> Result<UserCreateResponse> {
        let japan = self.account.is_japan();
        let request = UserCreateRequest {
            uuid: self.account.uuid.clone(),
            name: name.to_string(),
            platform_type: PlatformType::for_os(self.account.os_type),
            unique_device_id: unique_device_id(),
            ad_id: self.account.ad_id.clone(),
            is_development_mode: true,
            is_root: true,
            validation_code: self.account.validation_code.clone(),
            device_info: self.account.device_info(),
            currency_unit: japan.then(|| "JPY".to_string()),
            locale: self.account.wire_locale(),
        };
        let common = self.common_request(false);
        let response: UserCreateResponse =
            self.login_call(path::USER_CREATE, common, &request).await?;

        self.account.user_id = response.user_id;
        self.adopt_session(&response.session_id, &response.encryption_key)?;
        self.tutorial_info = response.common_response.tutorial_info;
        info!(user_id = response.user_id, uuid = %self.account.uuid, "Account created");
        Ok(response)
    }

    /// Restore a legacy account onto this install by friend code and password
    pub async fn restore_password(
        &mut self,
        friend_code: &str,
        password: &str,
    ) -> Result<RestorePasswordResponse> {
        let request = RestorePasswordRequest {
            friend_code: friend_code.to_string(),
            password: password.to_string(),
            uuid: self.account.uuid.clone(),
            platform_type: PlatformType::for_os(self.account.os_type),
            unique_device_id: unique_device_id(),
            ad_id: self.account.ad_id.clone(),
            device_info: self.account.device_info(),
        };
        let common = self.common_request(false);
        let response: RestorePasswordResponse = self
            .login_call(path::MIGRATION_RESTORE_PASSWORD, common, &request)
            .await?;

        self.account.user_id = response.user_id;
        self.adopt_session(&response.session_id, &response.encryption_key)?;
        self.tutorial_info = None;
        info!(user_id = response.user_id, uuid = %self.account.uuid, friend_code, "Account restored");
        Ok(response)
    }

    /// Fetch `app/status` and remember it
    pub async fn check_app_status(&mut self) -> Result<AppStatusResponse> {
        let request = AppStatusRequest {
            user_id: self.account.user_id,
        };
        let common = self.common_request(false);
        let status: AppStatusResponse = self.login_call(path::APP_STATUS, common, &request).await?;
        self.app_status = Some(status.clone());
        Ok(status)
    }

    /// Daily login; records today's login day before the call
    pub fn home_login(&mut self) -> BoxFuture<'_, Result<HomeLoginResponse>> {
        Box::pin(async move {
            self.last_login_day = Some(self.current_login_day());
            self.call(path::HOME_LOGIN, &Value::Null).await
        })
    }

    /// `home/login` unless it already ran this login day
    pub async fn ensure_home_login(&mut self) -> Result<()> {
        if self.last_login_day != Some(self.current_login_day()) {
            self.home_login().await?;
        }
        Ok(())
    }

    /// Login day right now
    #[must_use]
    pub fn current_login_day(&self) -> i64 {
        login_day(unix_now_ms(), self.config.login_reset_hour)
    }

    /// Re-sync version state after a server error
    ///
    /// `app/status` failures are ignored; `user/login` failures are not.
    pub async fn resync(&mut self) -> Result<()> {
        match self.check_app_status().await {
            Err(err) if err.is_termination() => return Err(err),
            Err(err) => debug!(uuid = %self.account.uuid, error = %err, "Ignoring app/status failure during resync"),
            Ok(_) => {}
        }
        if self.account.user_id != 0 {
            self.user_login(true).await?;
        }
        Ok(())
    }

    fn common_request(&self, with_versions: bool) -> CommonRequest {
        let (master_version, resource_version) = if with_versions {
            (
                self.config.master_version.clone(),
                self.config.resource_version.clone(),
            )
        } else {
            (String::new(), String::new())
        };
        CommonRequest {
            os_type: self.account.os_type,
            version: Version {
                app_version: self.config.app_version.clone(),
                master_version,
                resource_version,
            },
            language_code_type: self.account.language_code_type.wire_value(),
        }
    }

    fn adopt_session(&mut self, session_id: &str, encryption_key: &str) -> Result<()> {
        self.session_key = Some(EnvelopeKey::from_slice(encryption_key.as_bytes())?);
        self.session_id = Some(session_id.to_string());
        Ok(())
    }

    async fn login_call<P, R>(&self, api_path: &str, common: CommonRequest, payload: &P) -> Result<R>
    where
        P: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let body = wrap_request(&common, payload)?;
        let response = self
            .exchange(api_path, &self.login_key, None, &new_request_id(), &body)
            .await?;
        match response {
            ApiResponse::Success(value) => serde_json::from_value(value).map_err(|e| {
                ReariseError::internal_error(
                    format!("Malformed {api_path} response"),
                    Some(Box::new(e)),
                )
            }),
            ApiResponse::Error { body: error_body, raw } => {
                Err(protocol_error(api_path, &body, error_body, &raw))
            }
        }
    }

    /// Seal, send and decode one request, retrying transport timeouts
    async fn exchange(
        &self,
        api_path: &str,
        key: &EnvelopeKey,
        session_id: Option<&str>,
        request_id: &str,
        body: &Value,
    ) -> Result<ApiResponse> {
        let plaintext = serde_json::to_vec(body).map_err(|e| {
            ReariseError::internal_error("Failed to serialize request", Some(Box::new(e)))
        })?;

        let mut retries = 0;
        loop {
            let request = OutboundRequest {
                path: api_path.to_string(),
                headers: self.headers(session_id, request_id),
                body: envelope::encode(key, &plaintext),
            };
            match self.shutdown.guard(self.transport.post(request)).await {
                Ok(response) => return self.decode_response(key, response).await,
                Err(err) if err.is_timeout() && retries < MAX_TIMEOUT_RETRIES => {
                    retries += 1;
                    warn!(uuid = %self.account.uuid, api_path, retries, "Request timed out, retrying");
                }
                Err(err) => {
                    if !err.is_termination() {
                        error!(
                            user_id = self.account.user_id,
                            uuid = %self.account.uuid,
                            api_path,
                            error = %err,
                            "Request failed"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    fn headers(&self, session_id: Option<&str>, request_id: &str) -> Vec<(&'static str, String)> {
        let user_agent = self
            .account
            .user_agent
            .clone()
            .unwrap_or_else(|| self.config.user_agent.clone());
        let mut headers = vec![
            ("Content-Type", CONTENT_TYPE_OCTET_STREAM.to_string()),
            ("Cache-Control", "no-cache".to_string()),
            (HEADER_UNITY_VERSION, self.config.unity_version.clone()),
            (HEADER_REQUEST_ID, request_id.to_string()),
            ("User-Agent", user_agent),
        ];
        if let Some(session_id) = session_id {
            headers.push((HEADER_SESSION_ID, session_id.to_string()));
        }
        headers
    }

    async fn decode_response(&self, key: &EnvelopeKey, response: InboundResponse) -> Result<ApiResponse> {
        match BodyKind::classify(response.content_type.as_deref()) {
            BodyKind::Encrypted => {
                let plaintext = envelope::decode(key, &response.body)?;
                ApiResponse::from_slice(&plaintext)
            }
            BodyKind::PlaintextError => ApiResponse::from_slice(&response.body),
            BodyKind::Unexpected => {
                let content_type = response.content_type.unwrap_or_default();
                if let Some(dir) = &self.config.diagnostics_dir {
                    write_diagnostics(dir, &response.body).await;
                }
                error!(uuid = %self.account.uuid, content_type, bytes = response.body.len(), "Unexpected response content type");
                Err(ReariseError::UnexpectedContentType {
                    content_type,
                    body: response.body,
                })
            }
        }
    }
}

async fn write_diagnostics(dir: &Path, body: &[u8]) {
    let target = dir.join(DIAGNOSTICS_FILE);
    match tokio::fs::write(&target, body).await {
        Ok(()) => warn!(path = %target.display(), "Response body dumped"),
        Err(e) => warn!(path = %target.display(), error = %e, "Failed to dump response body"),
    }
}

fn protocol_error(api_path: &str, body: &Value, error_body: ApiErrorBody, raw: &Value) -> ReariseError {
    ReariseError::Protocol {
        body: error_body,
        request: format!("{api_path}\n{body}"),
        response: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{LanguageCodeType, OsType};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl Transport for Unreachable {
        async fn post(&self, _request: OutboundRequest) -> Result<InboundResponse> {
            Err(ReariseError::transport("unreachable", false, None))
        }
    }

    fn session(language: LanguageCodeType) -> Session<Unreachable> {
        let config = ClientConfig {
            master_version: "m1".to_string(),
            resource_version: "r1".to_string(),
            ..ClientConfig::default()
        };
        Session::new(
            Arc::new(config),
            Arc::new(Unreachable),
            Account::generate(OsType::Android, language),
            Shutdown::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_login_day_rolls_over_at_reset_hour() {
        // 2024-01-01T00:00:00Z is 09:00 JST
        let midnight_utc = 1_704_067_200_000;
        let day = login_day(midnight_utc, 4);

        // 03:59 JST the next day is still the same login day, 04:00 is not
        let next_0359_jst = midnight_utc + 18 * 3_600_000 + 59 * 60_000;
        assert_eq!(login_day(next_0359_jst, 4), day);
        assert_eq!(login_day(next_0359_jst + 60_000, 4), day + 1);

        // with a midnight reset, 15:00 UTC is already the next JST day
        assert_eq!(login_day(midnight_utc + 15 * 3_600_000, 0), login_day(midnight_utc, 0) + 1);
    }

    #[test]
    fn test_common_request_versions() {
        let ja_session = session(LanguageCodeType::Ja);
        let bare = ja_session.common_request(false);
        assert_eq!(bare.version.master_version, "");
        assert_eq!(bare.language_code_type, None);

        let full = ja_session.common_request(true);
        assert_eq!(full.version.master_version, "m1");
        assert_eq!(full.version.resource_version, "r1");

        let global = session(LanguageCodeType::Ko).common_request(false);
        assert_eq!(global.language_code_type, Some(LanguageCodeType::Ko));
    }

    #[test]
    fn test_headers() {
        let session = session(LanguageCodeType::Ja);
        let headers = session.headers(None, "abc");
        assert!(headers.iter().all(|(name, _)| *name != HEADER_SESSION_ID));
        assert!(headers.contains(&(HEADER_REQUEST_ID, "abc".to_string())));
        assert!(headers.contains(&("Content-Type", CONTENT_TYPE_OCTET_STREAM.to_string())));

        let headers = session.headers(Some("sid"), "abc");
        assert!(headers.contains(&(HEADER_SESSION_ID, "sid".to_string())));
    }

    #[test]
    fn test_protocol_error_carries_request_and_raw_response() {
        let raw = serde_json::json!({"errorNumber": 1000027, "banUntil": "2099-01-01"});
        let err = protocol_error(
            "home/login",
            &serde_json::json!({"commonRequest": {}}),
            ApiErrorBody::new(ErrorNumber::BAN_USER),
            &raw,
        );
        assert_eq!(err.protocol_error_number(), Some(ErrorNumber::BAN_USER));
        let message = err.internal_message();
        assert!(message.starts_with("home/login\n"));
        assert!(message.contains(r#""banUntil":"2099-01-01""#));
        match err {
            ReariseError::Protocol { response, .. } => {
                assert_eq!(serde_json::from_str::<Value>(&response).unwrap(), raw);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unexpected_content_type_is_dumped() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(LanguageCodeType::Ja);
        Arc::make_mut(&mut session.config).diagnostics_dir = Some(dir.path().to_path_buf());

        let key = session.login_key.clone();
        let err = session
            .decode_response(
                &key,
                InboundResponse {
                    content_type: Some("text/html".to_string()),
                    body: b"<html>maintenance</html>".to_vec(),
                },
            )
            .await
            .unwrap_err();

        match err {
            ReariseError::UnexpectedContentType { content_type, body } => {
                assert_eq!(content_type, "text/html");
                assert_eq!(body, b"<html>maintenance</html>");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let dumped = std::fs::read(dir.path().join(DIAGNOSTICS_FILE)).unwrap();
        assert_eq!(dumped, b"<html>maintenance</html>");
    }

    #[tokio::test]
    async fn test_plaintext_error_is_never_decrypted() {
        let session = session(LanguageCodeType::Ja);
        let key = session.login_key.clone();
        let response = session
            .decode_response(
                &key,
                InboundResponse {
                    content_type: Some("application/json".to_string()),
                    body: br#"{"errorNumber":1000029}"#.to_vec(),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            response,
            ApiResponse::Error {
                body: ApiErrorBody::new(ErrorNumber::DISCONNECTED_SESSION),
                raw: serde_json::json!({"errorNumber": 1000029}),
            }
        );
    }
}
