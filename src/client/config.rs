//! # Client Configuration Module
//!
//! Deployment-wide settings for the call engine ([`ClientConfig`]) and the
//! per-player identity a session logs in as ([`Account`]).
//!
//! `ClientConfig` follows the same precedence as the server configuration:
//! command-line arguments, then environment variables, then defaults.
//! Accounts are usually deserialized from a JSON roster.

use crate::crypto::{envelope, EnvelopeKey, DEFAULT_LOGIN_KEY};
use crate::error::{ReariseError, Result};
use crate::wire::api::{DeviceInfo, GlobalLocale};
use crate::wire::{LanguageCodeType, OsType};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// User agent of the reference Android client
pub const DEFAULT_USER_AGENT: &str = "Dalvik/2.1.0 (Linux; U; Android 5.1.1; A5010 Build/LMY48Z)";

/// Unity runtime version the reference client reports
pub const DEFAULT_UNITY_VERSION: &str = "2018.4.11f1";

/// Call engine configuration
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(name = "rearise-client", about = "ReArise API call engine settings", long_about = None)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the API routes, ending in `/api/`
    #[arg(
        long = "api-url",
        value_name = "URL",
        default_value = "http://127.0.0.1:7999/api/",
        env = "REARISE_API_URL"
    )]
    pub api_base_url: String,

    /// Value of the `X-Unity-Version` header
    #[arg(long = "unity-version", default_value = DEFAULT_UNITY_VERSION, env = "REARISE_UNITY_VERSION")]
    pub unity_version: String,

    /// Declared client app version
    #[arg(long = "app-version", default_value = "1.0.0", env = "REARISE_APP_VERSION")]
    pub app_version: String,

    /// Declared master data version once a session exists
    #[arg(long = "master-version", default_value = "", env = "REARISE_MASTER_VERSION")]
    pub master_version: String,

    /// Declared resource version once a session exists
    #[arg(long = "resource-version", default_value = "", env = "REARISE_RESOURCE_VERSION")]
    pub resource_version: String,

    /// Pre-shared login-mode key (32 ASCII characters)
    #[arg(
        long = "login-key",
        default_value = DEFAULT_LOGIN_KEY,
        env = "REARISE_LOGIN_KEY",
        hide_env_values = true
    )]
    pub login_key: String,

    /// Delay before every session-mode call, in milliseconds
    #[arg(long = "call-delay", value_name = "MILLISECONDS", default_value_t = 5_000, env = "REARISE_CALL_DELAY_MS")]
    pub call_delay_ms: u64,

    /// Per-attempt transport timeout, in milliseconds
    #[arg(long = "request-timeout", value_name = "MILLISECONDS", default_value_t = 10_000, env = "REARISE_CLIENT_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Attempts allowed per call before a server error becomes terminal
    #[arg(long = "max-attempts", default_value_t = 10, env = "REARISE_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    /// Hour (JST) at which the server rolls the login day over
    #[arg(long = "login-reset-hour", default_value_t = 4, env = "REARISE_LOGIN_RESET_HOUR")]
    pub login_reset_hour: u8,

    /// Default `User-Agent` header
    #[arg(long = "user-agent", default_value = DEFAULT_USER_AGENT, env = "REARISE_USER_AGENT")]
    pub user_agent: String,

    /// Directory receiving raw bodies of unexpected responses
    #[arg(long = "diagnostics-dir", value_name = "PATH", env = "REARISE_DIAGNOSTICS_DIR")]
    pub diagnostics_dir: Option<PathBuf>,
}

impl ClientConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from command-line arguments and environment
    #[must_use]
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let string_vars: [(&str, &mut String); 7] = [
            ("REARISE_API_URL", &mut config.api_base_url),
            ("REARISE_UNITY_VERSION", &mut config.unity_version),
            ("REARISE_APP_VERSION", &mut config.app_version),
            ("REARISE_MASTER_VERSION", &mut config.master_version),
            ("REARISE_RESOURCE_VERSION", &mut config.resource_version),
            ("REARISE_LOGIN_KEY", &mut config.login_key),
            ("REARISE_USER_AGENT", &mut config.user_agent),
        ];
        for (name, slot) in string_vars {
            if let Ok(value) = std::env::var(name) {
                *slot = value;
            }
        }

        if let Some(delay) = parse_env("REARISE_CALL_DELAY_MS")? {
            config.call_delay_ms = delay;
        }
        if let Some(timeout) = parse_env("REARISE_CLIENT_TIMEOUT_MS")? {
            config.request_timeout_ms = timeout;
        }
        if let Some(attempts) = parse_env("REARISE_MAX_ATTEMPTS")? {
            config.max_attempts = attempts;
        }
        if let Some(hour) = parse_env("REARISE_LOGIN_RESET_HOUR")? {
            config.login_reset_hour = hour;
        }
        if let Ok(dir) = std::env::var("REARISE_DIAGNOSTICS_DIR") {
            config.diagnostics_dir = Some(PathBuf::from(dir));
        }

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// ## Errors
    /// - `ReariseError::Config`: bad URL, malformed login key, zero limits
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api_base_url).map_err(|e| {
            ReariseError::config_error(
                format!("Invalid API URL '{}': {e}", self.api_base_url),
                Some(Box::new(e)),
            )
        })?;
        if !url.path().ends_with('/') {
            tracing::warn!(url = %url, "API URL has no trailing slash - route paths will replace its last segment");
        }

        self.login_key()?;

        if self.max_attempts == 0 {
            return Err(ReariseError::config_error("Max attempts cannot be zero", None));
        }
        if self.request_timeout_ms == 0 {
            return Err(ReariseError::config_error("Request timeout cannot be zero", None));
        }
        if self.login_reset_hour > 23 {
            return Err(ReariseError::config_error(
                format!("Login reset hour must be 0-23, got {}", self.login_reset_hour),
                None,
            ));
        }
        Ok(())
    }

    /// Login-mode envelope key
    pub fn login_key(&self) -> Result<EnvelopeKey> {
        if self.login_key.len() != envelope::KEY_LEN {
            return Err(ReariseError::config_error(
                format!(
                    "Login key must be {} characters, got {}",
                    envelope::KEY_LEN,
                    self.login_key.len()
                ),
                None,
            ));
        }
        EnvelopeKey::from_slice(self.login_key.as_bytes())
    }

    /// Per-attempt transport timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: format!("http://127.0.0.1:{}/api/", crate::DEFAULT_PORT),
            unity_version: DEFAULT_UNITY_VERSION.to_string(),
            app_version: "1.0.0".to_string(),
            master_version: String::new(),
            resource_version: String::new(),
            login_key: DEFAULT_LOGIN_KEY.to_string(),
            call_delay_ms: 5_000,
            request_timeout_ms: 10_000,
            max_attempts: 10,
            login_reset_hour: 4,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            diagnostics_dir: None,
        }
    }
}

pub(crate) fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|e| {
            ReariseError::config_error(format!("Invalid {name} '{raw}'"), Some(Box::new(e)))
        }),
        Err(_) => Ok(None),
    }
}

/// Player identity a session logs in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Client platform
    pub os_type: OsType,
    /// Advertising id (hyphenated UUID)
    pub ad_id: String,
    /// Account id; 0 until `user/create` succeeds
    #[serde(default)]
    pub user_id: i32,
    /// Install identifier, 32 hex characters
    pub uuid: String,
    /// Install validation code
    pub validation_code: String,
    /// Locale
    #[serde(default)]
    pub language_code_type: LanguageCodeType,
    /// Device descriptor override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    /// Locale fields override, global deployment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<GlobalLocale>,
    /// `User-Agent` override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Pre-call delay override, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

impl Account {
    /// Fresh install identity with no account yet
    ///
    /// The ad id is the install uuid in hyphenated form, and the validation
    /// code is the uuid itself.
    #[must_use]
    pub fn generate(os_type: OsType, language_code_type: LanguageCodeType) -> Self {
        let install = uuid::Uuid::new_v4();
        let uuid = install.simple().to_string();
        Self {
            os_type,
            ad_id: install.hyphenated().to_string(),
            user_id: 0,
            validation_code: uuid.clone(),
            uuid,
            language_code_type,
            device_info: None,
            locale: None,
            user_agent: None,
            delay_ms: None,
        }
    }

    /// Whether the account belongs to the Japanese deployment
    #[must_use]
    pub fn is_japan(&self) -> bool {
        self.language_code_type == LanguageCodeType::Ja
    }

    /// Device descriptor to send
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        self.device_info.clone().unwrap_or_default()
    }

    /// Locale fields to send; `None` for Japanese accounts
    #[must_use]
    pub fn wire_locale(&self) -> Option<GlobalLocale> {
        if self.is_japan() {
            None
        } else {
            Some(self.locale.clone().unwrap_or_default())
        }
    }
}
