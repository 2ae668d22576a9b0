//! Function URL definitions.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::normalize::normalize_url_config;
use crate::permissions::{GrantContent, GrantSet, GrantStatement};

/// How callers of a function URL authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    /// Public URL.
    #[serde(rename = "NONE")]
    None,
    /// Callers must sign requests.
    #[serde(rename = "AWS_IAM")]
    AwsIam,
}

impl AuthType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AwsIam => "AWS_IAM",
        }
    }
}

/// How responses are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvokeMode {
    Buffered,
    ResponseStream,
}

/// Cross-origin settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Cors {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_origins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_headers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
}

/// Function URL settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UrlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<AuthType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<Cors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoke_mode: Option<InvokeMode>,
    /// Alias or version the URL is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
}

/// Shape of `function_url.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionUrlDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<UrlConfig>,
    #[serde(default)]
    pub permissions: Vec<GrantStatement>,
}

/// A validated function URL definition bound to a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUrl {
    pub function_name: String,
    /// Normalized settings.
    pub config: UrlConfig,
    /// Desired grants keyed by statement id.
    pub grants: GrantSet,
}

impl FunctionUrl {
    #[must_use]
    pub fn qualifier(&self) -> Option<&str> {
        self.config.qualifier.as_deref()
    }

    /// Auth type after normalization.
    #[must_use]
    pub fn auth_type(&self) -> AuthType {
        self.config.auth_type.unwrap_or(AuthType::None)
    }
}

impl FunctionUrlDefinition {
    /// Bind the definition to `function_name` and check its grants.
    ///
    /// A public URL without grants gets a single wildcard grant. An
    /// IAM-authenticated URL must list its grants explicitly.
    pub fn validate(&self, function_name: &str) -> ControlResult<FunctionUrl> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ControlError::validation("function URL 'Config' attribute is required"))?;
        let config = normalize_url_config(config);

        let mut grants: GrantSet = self.permissions.iter().cloned().collect();
        match config.auth_type {
            Some(AuthType::AwsIam) if grants.is_empty() => {
                return Err(ControlError::validation(format!(
                    "function URL 'Permissions' attribute is required when 'AuthType' is '{}'",
                    AuthType::AwsIam.as_str()
                )));
            }
            Some(AuthType::None) if grants.is_empty() => {
                grants.insert(GrantStatement::new(GrantContent::wildcard()));
            }
            _ => {}
        }

        Ok(FunctionUrl {
            function_name: function_name.to_owned(),
            config,
            grants,
        })
    }
}
