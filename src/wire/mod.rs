//! # Wire Format Module
//!
//! Types shared by both ends of the protocol: the common request and response
//! wrappers merged into every business body, the plaintext structured error
//! body, the numeric error codes, and content-type classification.
//!
//! ## Body Layout
//!
//! Every request body is a single JSON object. The version/platform
//! descriptor sits under `commonRequest` and the business fields sit next to
//! it at the top level:
//!
//! ```json
//! {"commonRequest":{"osType":2,"version":{"appVersion":"1.0.0","masterVersion":"","resourceVersion":""}},"userId":12345}
//! ```
//!
//! Responses may carry `commonResponse` the same way. Structured errors are
//! sent unencrypted as `{"errorNumber":1000029}`.

pub mod api;

use crate::error::{ReariseError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Header carrying the session token
pub const HEADER_SESSION_ID: &str = "X-SID";

/// Header carrying the opaque per-call request identifier
pub const HEADER_REQUEST_ID: &str = "X-REQUEST-ID";

/// Header carrying the client/platform version
pub const HEADER_UNITY_VERSION: &str = "X-Unity-Version";

/// Content type of encrypted bodies
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// Alternate content type some deployments use for encrypted bodies
pub const CONTENT_TYPE_BINARY_OCTET_STREAM: &str = "binary/octet-stream";

/// Content type of plaintext structured errors
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Key of the common request wrapper inside a request body
pub const COMMON_REQUEST_KEY: &str = "commonRequest";

/// Key of the common response wrapper inside a response body
pub const COMMON_RESPONSE_KEY: &str = "commonResponse";

/// Tutorial type of the first-run tutorial
pub const TUTORIAL_TYPE_FIRST: i32 = 100;

/// First tutorial state: prologue, right after account creation
pub const FIRST_TUTORIAL_STATE_PROLOGUE: i32 = 10;

/// First tutorial state: first content download
pub const FIRST_TUTORIAL_STATE_DOWNLOAD: i32 = 71;

/// First tutorial state: reached the home screen
pub const FIRST_TUTORIAL_STATE_HOME: i32 = 80;

/// Generate a request identifier: a v4 UUID without dashes
#[must_use]
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Numeric protocol error code
///
/// Codes are fixed by the deployed client; unknown codes are carried through
/// untouched so that they surface as terminal errors rather than parse
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorNumber(pub i64);

impl ErrorNumber {
    /// No error
    pub const NONE: Self = Self(0);
    /// Client binary is outdated
    pub const APPLICATION_UPDATE: Self = Self(1_000_000);
    /// Generic network failure
    pub const NETWORK_ERROR: Self = Self(1_000_001);
    /// Whole service under maintenance
    pub const MAINTENANCE_ALL: Self = Self(1_000_002);
    /// Master data or resource version is stale
    pub const MASTER_OR_RESOURCE_UPDATE: Self = Self(1_000_003);
    /// A single API is under maintenance
    pub const MAINTENANCE_API: Self = Self(1_000_004);
    /// Generic server fault, retried by clients with backoff
    pub const SERVER_ERROR: Self = Self(1_000_005);
    /// Account must be restored through the inheritance flow
    pub const USER_INHERITANCE: Self = Self(1_000_007);
    /// Daily rollover happened; the daily login must be replayed
    pub const DAY_CHANGED: Self = Self(1_000_017);
    /// Account is banned
    pub const BAN_USER: Self = Self(1_000_027);
    /// No account matches the supplied identity
    pub const USER_NOT_EXISTS: Self = Self(1_000_028);
    /// Session token absent or unusable; clients re-login
    pub const DISCONNECTED_SESSION: Self = Self(1_000_029);
    /// Response could not be converted by the server
    pub const FAILED_RESPONSE_CONVERT: Self = Self(1_000_031);
    /// Malformed client request
    pub const CLIENT_ERROR: Self = Self(1_000_032);
    /// User name contains a rejected word
    pub const NG_WORD_IN_USER_NAME: Self = Self(1_000_033);
    /// User name is too long or empty
    pub const USER_NAME_CHARACTER_OVER: Self = Self(1_000_040);
    /// Password restore is locked
    pub const LOCKED_RESTORE_PASSWORD: Self = Self(1_000_058);

    /// Symbolic name of well-known codes
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::NONE => "None",
            Self::APPLICATION_UPDATE => "ApplicationUpdate",
            Self::NETWORK_ERROR => "NetworkError",
            Self::MAINTENANCE_ALL => "MaintenanceAll",
            Self::MASTER_OR_RESOURCE_UPDATE => "MasterOrResourceUpdate",
            Self::MAINTENANCE_API => "MaintenanceApi",
            Self::SERVER_ERROR => "ServerError",
            Self::USER_INHERITANCE => "UserInheritance",
            Self::DAY_CHANGED => "DayChanged",
            Self::BAN_USER => "BanUser",
            Self::USER_NOT_EXISTS => "UserNotExists",
            Self::DISCONNECTED_SESSION => "DisconnectedSession",
            Self::FAILED_RESPONSE_CONVERT => "FailedResponseConvert",
            Self::CLIENT_ERROR => "ClientError",
            Self::NG_WORD_IN_USER_NAME => "NGWordInUserName",
            Self::USER_NAME_CHARACTER_OVER => "UserNameCharacterOver",
            Self::LOCKED_RESTORE_PASSWORD => "LockedResotrePassword",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ErrorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({name})", self.0),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Structured error body, always sent unencrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Dispatch key for the client recovery state machine
    pub error_number: ErrorNumber,
    /// Optional human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional action hint for the client UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Optional URL (store page, maintenance notice)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ApiErrorBody {
    /// Error body carrying only a code
    #[must_use]
    pub fn new(error_number: ErrorNumber) -> Self {
        Self {
            error_number,
            message: None,
            action: None,
            url: None,
        }
    }
}

/// Decoded response body: business payload or structured error
///
/// Produced once at the transport boundary; downstream code matches on the
/// variant instead of probing JSON keys.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Business payload (may include `commonResponse`)
    Success(Value),
    /// Structured error, with the body exactly as the server sent it
    Error {
        /// Typed view of the error
        body: ApiErrorBody,
        /// Decoded JSON, including any fields the typed view drops
        raw: Value,
    },
}

impl ApiResponse {
    /// Classify a decoded JSON body
    ///
    /// Any object carrying an `errorNumber` key is an error body.
    pub fn from_value(value: Value) -> Result<Self> {
        let is_error = value
            .as_object()
            .is_some_and(|object| object.contains_key("errorNumber"));
        if is_error {
            let body = ApiErrorBody::deserialize(&value)?;
            Ok(Self::Error { body, raw: value })
        } else {
            Ok(Self::Success(value))
        }
    }

    /// Parse raw JSON bytes; an empty body decodes to `null`
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::Success(Value::Null));
        }
        Self::from_value(serde_json::from_slice(bytes)?)
    }
}

/// How a response body must be treated, by declared content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Encrypted envelope
    Encrypted,
    /// Plaintext structured error; never decrypted
    PlaintextError,
    /// Anything else; fatal
    Unexpected,
}

impl BodyKind {
    /// Classify a `Content-Type` header value
    ///
    /// Media type parameters (`; charset=utf-8`) and case are ignored.
    #[must_use]
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Self::Unexpected;
        };
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            CONTENT_TYPE_OCTET_STREAM | CONTENT_TYPE_BINARY_OCTET_STREAM => Self::Encrypted,
            CONTENT_TYPE_JSON => Self::PlaintextError,
            _ => Self::Unexpected,
        }
    }
}

/// Mobile platform of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OsType {
    /// iOS
    Ios,
    /// Android
    Android,
}

impl TryFrom<u8> for OsType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Ios),
            2 => Ok(Self::Android),
            other => Err(format!("unknown osType {other}")),
        }
    }
}

impl From<OsType> for u8 {
    fn from(value: OsType) -> Self {
        match value {
            OsType::Ios => 1,
            OsType::Android => 2,
        }
    }
}

impl std::str::FromStr for OsType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ios" | "1" => Ok(Self::Ios),
            "android" | "2" => Ok(Self::Android),
            other => Err(format!("unknown OS type '{other}'")),
        }
    }
}

/// Store the account was created through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PlatformType {
    /// Apple App Store
    AppStore,
    /// Google Play Store
    PlayStore,
}

impl PlatformType {
    /// Store matching a mobile platform
    #[must_use]
    pub fn for_os(os_type: OsType) -> Self {
        match os_type {
            OsType::Ios => Self::AppStore,
            OsType::Android => Self::PlayStore,
        }
    }
}

impl TryFrom<u8> for PlatformType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::AppStore),
            2 => Ok(Self::PlayStore),
            other => Err(format!("unknown platformType {other}")),
        }
    }
}

impl From<PlatformType> for u8 {
    fn from(value: PlatformType) -> Self {
        match value {
            PlatformType::AppStore => 1,
            PlatformType::PlayStore => 2,
        }
    }
}

/// Client locale
///
/// Japanese is the default and is never written to the wire; the other codes
/// exist only on the global deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LanguageCodeType {
    /// Japanese
    #[default]
    Ja,
    /// English
    En,
    /// Korean
    Ko,
    /// Chinese
    Zh,
}

impl LanguageCodeType {
    /// Value for the optional `languageCodeType` wire field
    #[must_use]
    pub fn wire_value(self) -> Option<Self> {
        match self {
            Self::Ja => None,
            other => Some(other),
        }
    }
}

impl TryFrom<u8> for LanguageCodeType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ja),
            1 => Ok(Self::En),
            2 => Ok(Self::Ko),
            3 => Ok(Self::Zh),
            other => Err(format!("unknown languageCodeType {other}")),
        }
    }
}

impl From<LanguageCodeType> for u8 {
    fn from(value: LanguageCodeType) -> Self {
        match value {
            LanguageCodeType::Ja => 0,
            LanguageCodeType::En => 1,
            LanguageCodeType::Ko => 2,
            LanguageCodeType::Zh => 3,
        }
    }
}

impl std::str::FromStr for LanguageCodeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ja" | "0" => Ok(Self::Ja),
            "en" | "1" => Ok(Self::En),
            "ko" | "2" => Ok(Self::Ko),
            "zh" | "3" => Ok(Self::Zh),
            other => Err(format!("unknown language code '{other}'")),
        }
    }
}

/// App, master data and resource versions declared by the client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    /// Client binary version
    pub app_version: String,
    /// Master data version; empty before any manifest has been fetched
    pub master_version: String,
    /// Resource version; empty before any manifest has been fetched
    pub resource_version: String,
}

/// Version/platform descriptor merged into every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonRequest {
    /// Client platform
    pub os_type: OsType,
    /// Declared versions
    pub version: Version,
    /// Locale, absent for Japanese
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code_type: Option<LanguageCodeType>,
}

/// Tutorial progress descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorialInfo {
    /// Tutorial being played
    pub tutorial_type: i32,
    /// Step within that tutorial
    pub tutorial_state: i32,
}

impl TutorialInfo {
    /// Descriptor of a freshly created account
    #[must_use]
    pub fn first_tutorial_start() -> Self {
        Self {
            tutorial_type: TUTORIAL_TYPE_FIRST,
            tutorial_state: FIRST_TUTORIAL_STATE_PROLOGUE,
        }
    }

    /// Whether this describes the first-run tutorial
    #[must_use]
    pub fn is_first_tutorial(&self) -> bool {
        self.tutorial_type == TUTORIAL_TYPE_FIRST
    }
}

/// Mission/tutorial progress descriptor merged into responses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonResponse {
    /// Missions cleared by this call
    #[serde(default)]
    pub clear_mission_id_list: Vec<i64>,
    /// Challenges cleared by this call
    #[serde(default)]
    pub clear_challenge_id_list: Vec<i64>,
    /// Tutorial progress, when the player is in one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tutorial_info: Option<TutorialInfo>,
}

/// Merge a common request descriptor with a business payload
///
/// The payload must serialize to a JSON object or to `null`.
pub fn wrap_request<T: Serialize + ?Sized>(common: &CommonRequest, payload: &T) -> Result<Value> {
    let mut object = into_object(serde_json::to_value(payload)?)?;
    object.insert(COMMON_REQUEST_KEY.to_string(), serde_json::to_value(common)?);
    Ok(Value::Object(object))
}

/// Split a request body into its common descriptor and business fields
///
/// A missing or malformed descriptor is a request error.
pub fn split_request(body: Value) -> Result<(CommonRequest, Value)> {
    let mut object = into_object(body)?;
    let common = object
        .remove(COMMON_REQUEST_KEY)
        .ok_or_else(|| ReariseError::request_error("missing commonRequest"))?;
    let common = serde_json::from_value(common)
        .map_err(|e| ReariseError::request_error(format!("malformed commonRequest: {e}")))?;
    Ok((common, Value::Object(object)))
}

/// Extract the optional common response descriptor from a success payload
pub fn common_response(payload: &Value) -> Option<CommonResponse> {
    payload
        .get(COMMON_RESPONSE_KEY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(ReariseError::request_error(format!(
            "body must be a JSON object, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn common() -> CommonRequest {
        CommonRequest {
            os_type: OsType::Android,
            version: Version {
                app_version: "1.2.0".to_string(),
                ..Version::default()
            },
            language_code_type: LanguageCodeType::Ja.wire_value(),
        }
    }

    #[test]
    fn test_wrap_request_merges_fields() {
        let body = wrap_request(&common(), &json!({"userId": 12345})).unwrap();
        assert_eq!(body["userId"], 12345);
        assert_eq!(body["commonRequest"]["osType"], 2);
        assert_eq!(body["commonRequest"]["version"]["masterVersion"], "");
        assert!(body["commonRequest"].get("languageCodeType").is_none());
    }

    #[test]
    fn test_wrap_request_accepts_empty_payload() {
        let body = wrap_request(&common(), &Value::Null).unwrap();
        assert_eq!(body.as_object().map(Map::len), Some(1));
    }

    #[test]
    fn test_wrap_request_rejects_non_object() {
        assert!(wrap_request(&common(), &json!([1, 2])).is_err());
    }

    #[test]
    fn test_split_request() {
        let body = wrap_request(&common(), &json!({"uuid": "abc"})).unwrap();
        let (parsed, rest) = split_request(body).unwrap();
        assert_eq!(parsed, common());
        assert_eq!(rest, json!({"uuid": "abc"}));

        assert!(split_request(json!({"uuid": "abc"})).is_err());
        assert!(split_request(json!({"commonRequest": {"osType": 9}})).is_err());
    }

    #[test]
    fn test_language_code_on_wire() {
        let mut request = common();
        request.language_code_type = LanguageCodeType::Ko.wire_value();
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["languageCodeType"], 2);
    }

    #[test]
    fn test_api_response_classification() {
        let error = ApiResponse::from_slice(br#"{"errorNumber":1000029,"trace":"a1"}"#).unwrap();
        match error {
            ApiResponse::Error { body, raw } => {
                assert_eq!(body, ApiErrorBody::new(ErrorNumber::DISCONNECTED_SESSION));
                assert_eq!(raw["trace"], "a1");
            }
            other => panic!("expected error body, got {other:?}"),
        }

        let success = ApiResponse::from_slice(br#"{"sessionId":"x"}"#).unwrap();
        assert!(matches!(success, ApiResponse::Success(_)));

        let empty = ApiResponse::from_slice(b"").unwrap();
        assert_eq!(empty, ApiResponse::Success(Value::Null));
    }

    #[test]
    fn test_body_kind_classification() {
        assert_eq!(
            BodyKind::classify(Some("application/octet-stream")),
            BodyKind::Encrypted
        );
        assert_eq!(
            BodyKind::classify(Some("binary/octet-stream")),
            BodyKind::Encrypted
        );
        assert_eq!(
            BodyKind::classify(Some("application/json; charset=utf-8")),
            BodyKind::PlaintextError
        );
        assert_eq!(BodyKind::classify(Some("text/html")), BodyKind::Unexpected);
        assert_eq!(BodyKind::classify(None), BodyKind::Unexpected);
    }

    #[test]
    fn test_error_number_display() {
        assert_eq!(ErrorNumber::DAY_CHANGED.to_string(), "1000017 (DayChanged)");
        assert_eq!(ErrorNumber(42).to_string(), "42");
    }

    #[test]
    fn test_common_response_extraction() {
        let payload = json!({
            "commonResponse": {
                "clearMissionIdList": [],
                "clearChallengeIdList": [],
                "tutorialInfo": {"tutorialType": 100, "tutorialState": 10}
            }
        });
        let common = common_response(&payload).unwrap();
        assert_eq!(common.tutorial_info, Some(TutorialInfo::first_tutorial_start()));
        assert!(common_response(&json!({})).is_none());
    }

    #[test]
    fn test_request_id_format() {
        let id = new_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
