//! Configuration for stratus.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::ControlResult;
use crate::identity::{CallerIdentity, IdentityResolver, StaticIdentity, Unconfigured};

/// Default configuration file name.
pub const CONFIG_FILE: &str = "stratus.toml";

/// Prefix of environment overrides, e.g. `STRATUS_ENDPOINT__URL`.
pub const ENV_PREFIX: &str = "STRATUS_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StratusConfig {
    /// Control plane endpoint.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Definition files.
    #[serde(default)]
    pub function: FunctionSection,

    /// Packaging behaviour.
    #[serde(default)]
    pub package: PackageSection,

    /// Caller identity exposed to templates.
    #[serde(default)]
    pub identity: Option<CallerIdentity>,
}

impl StratusConfig {
    /// Load configuration from the default sources.
    ///
    /// Later sources override earlier ones:
    /// 1. Default values
    /// 2. `stratus.toml` in the current directory (if present)
    /// 3. Environment variables with the `STRATUS_` prefix
    pub fn load() -> ControlResult<Self> {
        Self::from_file(CONFIG_FILE)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ControlResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Identity source for templates.
    #[must_use]
    pub fn identity_resolver(&self) -> Arc<dyn IdentityResolver> {
        match &self.identity {
            Some(identity) => Arc::new(StaticIdentity(identity.clone())),
            None => Arc::new(Unconfigured),
        }
    }
}

/// Control plane endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the function service API.
    #[serde(default = "default_endpoint_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint_url() -> String {
    "http://127.0.0.1:9001".to_owned()
}

const fn default_timeout_secs() -> u64 {
    30
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Definition file locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionSection {
    /// Function definition; `function.json` in the current directory when unset.
    #[serde(default)]
    pub definition: Option<PathBuf>,

    /// Function URL definition; optional.
    #[serde(default)]
    pub url_definition: Option<PathBuf>,

    /// Alias or version used by `init`.
    #[serde(default)]
    pub qualifier: Option<String>,
}

/// Packaging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Source directory or pre-built zip.
    #[serde(default = "default_src")]
    pub src: PathBuf,

    /// Ignore file; `<src>/.stratusignore` when unset.
    #[serde(default)]
    pub exclude_file: Option<PathBuf>,

    /// Store symlinks as links instead of following them.
    #[serde(default)]
    pub keep_symlinks: bool,
}

fn default_src() -> PathBuf {
    PathBuf::from(".")
}

impl Default for PackageSection {
    fn default() -> Self {
        Self {
            src: default_src(),
            exclude_file: None,
            keep_symlinks: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = StratusConfig::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.endpoint.url, "http://127.0.0.1:9001");
        assert_eq!(config.endpoint.timeout_secs, 30);
        assert_eq!(config.package.src, PathBuf::from("."));
        assert!(config.identity.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stratus.toml");
        let mut file = toml::Table::new();
        file.insert(
            "endpoint".to_owned(),
            toml::Value::Table(toml::Table::from_iter([(
                "url".to_owned(),
                toml::Value::from("http://emulator:4566"),
            )])),
        );
        file.insert(
            "package".to_owned(),
            toml::Value::Table(toml::Table::from_iter([(
                "keep_symlinks".to_owned(),
                toml::Value::from(true),
            )])),
        );
        file.insert(
            "identity".to_owned(),
            toml::Value::Table(toml::Table::from_iter([
                ("Account".to_owned(), toml::Value::from("123456789012")),
                (
                    "Arn".to_owned(),
                    toml::Value::from("arn:aws:iam::123456789012:user/ci"),
                ),
                ("UserId".to_owned(), toml::Value::from("AIDAEXAMPLE")),
            ])),
        );
        std::fs::write(&path, toml::to_string(&file).unwrap()).unwrap();

        let config = StratusConfig::from_file(&path).unwrap();
        assert_eq!(config.endpoint.url, "http://emulator:4566");
        assert_eq!(config.endpoint.timeout_secs, 30);
        assert!(config.package.keep_symlinks);
        assert_eq!(config.identity.unwrap().account, "123456789012");
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stratus.toml");
        std::fs::write(&path, "[endpoint]\ntimeout_secs = \"soon\"\n").unwrap();

        let err = StratusConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, crate::error::ControlError::Config(_)));
    }
}
