//! # Version Negotiation
//!
//! Every request declares the app, master data and resource versions it was
//! built against. The gate rejects stale clients before any handler runs.
//!
//! - App version must match exactly, otherwise `ApplicationUpdate`.
//! - Master and resource versions are checked only on routes that verify all
//!   versions. An empty string means the client has not fetched a manifest
//!   yet and always passes. Any other mismatch is `MasterOrResourceUpdate`.
//!
//! Manifests are JSON files of the form `{"version": "2022-02-18 10:44:27"}`.
//! Clients fetch assets under `md5hex(version)`, the cache key advertised by
//! `app/status`.

use crate::error::{ReariseError, Result};
use crate::server::ServerConfig;
use crate::wire::{CommonRequest, ErrorNumber, LanguageCodeType};
use md5::{Digest, Md5};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Parsed version manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VersionManifest {
    /// Version string, compared verbatim with the client's declaration
    pub version: String,
}

impl VersionManifest {
    /// Manifest with a known version
    #[must_use]
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    /// Read a manifest file
    ///
    /// ## Errors
    /// - `ReariseError::Config`: file unreadable or not a manifest
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReariseError::config_error(
                format!("Failed to read manifest {}", path.display()),
                Some(Box::new(e)),
            )
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ReariseError::config_error(
                format!("Malformed manifest {}", path.display()),
                Some(Box::new(e)),
            )
        })
    }

    /// Asset cache key, `md5hex(version)`
    #[must_use]
    pub fn cache_key(&self) -> String {
        hex::encode(Md5::digest(self.version.as_bytes()))
    }
}

/// Request version checks
#[derive(Debug, Clone)]
pub struct VersionGate {
    app_version: String,
    master: Option<VersionManifest>,
    resource: Option<VersionManifest>,
}

impl VersionGate {
    /// Create a gate; a missing manifest disables that check
    #[must_use]
    pub fn new(
        app_version: impl Into<String>,
        master: Option<VersionManifest>,
        resource: Option<VersionManifest>,
    ) -> Self {
        Self {
            app_version: app_version.into(),
            master,
            resource,
        }
    }

    /// Build the gate from the configured version and manifest files
    pub async fn from_config(config: &ServerConfig) -> Result<Self> {
        let master = match &config.master_manifest {
            Some(path) => Some(VersionManifest::load(path).await?),
            None => None,
        };
        let resource = match &config.resource_manifest {
            Some(path) => Some(VersionManifest::load(path).await?),
            None => None,
        };
        Ok(Self::new(config.app_version.clone(), master, resource))
    }

    /// Required client app version
    #[must_use]
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    /// Current master data cache key, empty when unknown
    #[must_use]
    pub fn master_cache_key(&self) -> String {
        self.master.as_ref().map(VersionManifest::cache_key).unwrap_or_default()
    }

    /// Current resource cache key, empty when unknown
    #[must_use]
    pub fn resource_cache_key(&self) -> String {
        self.resource.as_ref().map(VersionManifest::cache_key).unwrap_or_default()
    }

    /// Check a request's common descriptor
    ///
    /// ## Errors
    /// - `ReariseError::Request`: descriptor is malformed
    /// - `ReariseError::Api(APPLICATION_UPDATE)`: app version mismatch
    /// - `ReariseError::Api(MASTER_OR_RESOURCE_UPDATE)`: stale master or
    ///   resource version, only when `verify_all` is set
    pub fn validate(&self, common: &CommonRequest, verify_all: bool) -> Result<()> {
        // Japanese clients omit the field; an explicit 0 is malformed.
        if common.language_code_type == Some(LanguageCodeType::Ja) {
            return Err(ReariseError::request_error("languageCodeType 0 is not sent on the wire"));
        }

        let version = &common.version;
        if version.app_version != self.app_version {
            debug!(
                declared = %version.app_version,
                required = %self.app_version,
                "Rejecting outdated app version"
            );
            return Err(ReariseError::Api(ErrorNumber::APPLICATION_UPDATE));
        }

        if verify_all
            && (is_stale(&version.master_version, self.master.as_ref())
                || is_stale(&version.resource_version, self.resource.as_ref()))
        {
            debug!(
                master = %version.master_version,
                resource = %version.resource_version,
                "Rejecting stale master or resource version"
            );
            return Err(ReariseError::Api(ErrorNumber::MASTER_OR_RESOURCE_UPDATE));
        }

        Ok(())
    }
}

fn is_stale(declared: &str, current: Option<&VersionManifest>) -> bool {
    match current {
        Some(manifest) => !declared.is_empty() && declared != manifest.version,
        None => false,
    }
}
