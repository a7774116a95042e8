//! Business bodies of the routes this crate speaks natively.

use super::{CommonResponse, PlatformType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Route paths, relative to the API base URL
pub mod path {
    /// Pre-session status check
    pub const APP_STATUS: &str = "app/status";
    /// Account creation
    pub const USER_CREATE: &str = "user/create";
    /// Session login
    pub const USER_LOGIN: &str = "user/login";
    /// Password-based account restore
    pub const MIGRATION_RESTORE_PASSWORD: &str = "migration/restorePassword";
    /// Daily login
    pub const HOME_LOGIN: &str = "home/login";
}

/// Device descriptor sent on account creation and login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Operating system description
    pub operating_system: String,
    /// Device model
    pub device_model: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            operating_system: "Android OS 5.1.1 / API-22 (LMY48Z/eng.se.infra.20190315.173723)"
                .to_string(),
            device_model: "OnePlus A5010".to_string(),
        }
    }
}

/// Locale fields only the global deployment sends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalLocale {
    /// ISO country code
    pub country_code: String,
    /// Upper-case language code
    pub language_code: String,
    /// Offset formatted as `HH:MM:SS`
    pub timezone_offset: String,
}

impl Default for GlobalLocale {
    fn default() -> Self {
        Self {
            country_code: "GB".to_string(),
            language_code: "EN".to_string(),
            timezone_offset: "09:00:00".to_string(),
        }
    }
}

/// `app/status` request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusRequest {
    /// Account id, 0 before creation
    #[serde(default)]
    pub user_id: i32,
}

/// `app/status` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatusResponse {
    /// Base URL of master data
    pub master_base_url: String,
    /// Cache key of the current master data version
    pub master_cache_key: String,
    /// Base URL of resources
    pub resource_base_url: String,
    /// Cache key of the current resource version
    pub resource_cache_key: String,
    /// Base URL of images
    pub image_base_url: String,
    /// Terms of service page
    pub terms_url: String,
    /// Terms of service revision
    pub terms_version: i32,
    /// Privacy policy page
    pub privacy_policy_url: String,
    /// Privacy policy revision
    pub privacy_policy_version: i32,
    /// Whether an update is pending (0 = none)
    pub update_type: i32,
}

/// `user/create` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreateRequest {
    /// Install identifier, 32 hex characters
    pub uuid: String,
    /// Player name
    pub name: String,
    /// Store the app came from
    pub platform_type: PlatformType,
    /// Random 16-digit device id
    #[serde(default)]
    pub unique_device_id: String,
    /// Advertising id
    #[serde(default)]
    pub ad_id: String,
    /// Development build flag
    #[serde(default)]
    pub is_development_mode: bool,
    /// Rooted device flag
    #[serde(default)]
    pub is_root: bool,
    /// Install validation code
    #[serde(default)]
    pub validation_code: String,
    /// Device descriptor
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// Currency unit, Japanese deployment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_unit: Option<String>,
    /// Locale, global deployment only
    #[serde(flatten)]
    pub locale: Option<GlobalLocale>,
}

/// `user/create` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreateResponse {
    /// New account id
    pub user_id: i32,
    /// Public friend code
    pub friend_code: String,
    /// Session token
    pub session_id: String,
    /// Per-session key as text
    pub encryption_key: String,
    /// Tutorial descriptor for the new account
    pub common_response: CommonResponse,
}

/// `user/login` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoginRequest {
    /// Install identifier
    pub uuid: String,
    /// Account id
    pub user_id: i32,
    /// Advertising id, empty on re-login
    #[serde(default)]
    pub ad_id: String,
    /// Development build flag
    #[serde(default)]
    pub is_development_mode: bool,
    /// Rooted device flag
    #[serde(default)]
    pub is_root: bool,
    /// Install validation code
    #[serde(default)]
    pub validation_code: String,
    /// Device descriptor
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// Locale, global deployment only
    #[serde(flatten)]
    pub locale: Option<GlobalLocale>,
}

/// `user/login` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoginResponse {
    /// Session token
    pub session_id: String,
    /// Per-session key as text
    pub encryption_key: String,
    /// Whether cached user data must be reloaded
    pub is_load_necessary: bool,
    /// Remaining language changes, global deployment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_changeable_count: Option<i32>,
    /// Remaining voice language changes, global deployment only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_changeable_count: Option<i32>,
}

/// `migration/restorePassword` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePasswordRequest {
    /// Friend code of the account being restored
    pub friend_code: String,
    /// Restore password
    pub password: String,
    /// Install identifier of the new device
    pub uuid: String,
    /// Store the app came from
    pub platform_type: PlatformType,
    /// Random 16-digit device id
    #[serde(default)]
    pub unique_device_id: String,
    /// Advertising id
    #[serde(default)]
    pub ad_id: String,
    /// Device descriptor
    #[serde(default)]
    pub device_info: DeviceInfo,
}

/// `migration/restorePassword` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePasswordResponse {
    /// Restored account id
    pub user_id: i32,
    /// Friend code of the restored account
    pub friend_code: String,
    /// Session token
    pub session_id: String,
    /// Per-session key as text
    pub encryption_key: String,
    /// Player name
    pub tamer_name: String,
    /// Player level
    pub tamer_level: i32,
}

/// `home/login` response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeLoginResponse {
    /// Login bonuses granted today
    #[serde(default)]
    pub received_login_bonus_list: Vec<Value>,
}
