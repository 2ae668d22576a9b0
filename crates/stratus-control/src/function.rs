//! Function configuration model.
//!
//! [`FunctionConfig`] is the shape of `function.json` and also the shape the
//! live configuration is converted into, so desired and live snapshots can be
//! compared field by field. Field names follow the function service's
//! PascalCase wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Instruction set architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// 64-bit x86.
    #[serde(rename = "x86_64")]
    X86_64,
    /// 64-bit ARM.
    #[serde(rename = "arm64")]
    Arm64,
}

/// Deployment package type. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    /// Zip archive uploaded by the client.
    Zip,
    /// Container image.
    Image,
}

impl PackageType {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "Zip",
            Self::Image => "Image",
        }
    }
}

/// X-Ray tracing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TracingMode {
    /// Sample and trace requests.
    Active,
    /// Only trace when the upstream caller traced.
    PassThrough,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Plain text.
    Text,
    /// Structured JSON.
    #[serde(rename = "JSON")]
    Json,
}

/// When snapshots are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapStartApplyOn {
    /// Disabled.
    None,
    /// On every published version.
    PublishedVersions,
}

/// Size of `/tmp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EphemeralStorage {
    /// Size in MB.
    pub size: u32,
}

/// Environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    /// Variable name to value.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoggingConfig {
    /// Minimum application log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_log_level: Option<String>,
    /// Log line format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
    /// Destination log group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    /// Minimum system log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_log_level: Option<String>,
}

/// Snapshot settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapStart {
    /// When snapshots are taken.
    pub apply_on: SnapStartApplyOn,
}

/// Tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TracingConfig {
    /// Tracing mode.
    pub mode: TracingMode,
}

/// Network attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VpcConfig {
    /// Subnets the function is attached to.
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    /// Security groups applied to the function.
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

/// Mounted file system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileSystemConfig {
    /// Access point ARN.
    pub arn: String,
    /// Mount path inside the function.
    pub local_mount_path: String,
}

/// Where failed asynchronous events are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeadLetterConfig {
    /// Queue or topic ARN.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_arn: Option<String>,
}

/// Code location for image-based functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CodeLocation {
    /// Container image URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
}

/// Desired or live function configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionConfig {
    /// Function name. Immutable after creation.
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Execution role ARN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Memory in MB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_size: Option<u32>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architectures: Option<Vec<Architecture>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_storage: Option<EphemeralStorage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// Layer version ARNs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_config: Option<LoggingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snap_start: Option<SnapStart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_config: Option<TracingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_config: Option<VpcConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_system_configs: Option<Vec<FileSystemConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_config: Option<DeadLetterConfig>,
    #[serde(
        rename = "KMSKeyArn",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub kms_key_arn: Option<String>,
    /// Package type. Immutable after creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_type: Option<PackageType>,
    /// Image location for image-based functions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl FunctionConfig {
    /// Create a configuration with only the name set.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            function_name: name.into(),
            ..Self::default()
        }
    }

    /// Configured image URI, if any.
    #[must_use]
    pub fn image_uri(&self) -> Option<&str> {
        self.code.as_ref().and_then(|c| c.image_uri.as_deref())
    }

    /// Package type, inferring `Image` when an image URI is set.
    #[must_use]
    pub fn effective_package_type(&self) -> PackageType {
        self.package_type.unwrap_or(if self.image_uri().is_some() {
            PackageType::Image
        } else {
            PackageType::Zip
        })
    }
}

/// Snapshot of a deployed function as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveFunction {
    /// Fully populated configuration.
    pub config: FunctionConfig,
    /// Function ARN.
    pub function_arn: String,
    /// Base64 SHA-256 of the deployed package.
    pub code_sha256: String,
    /// Size of the deployed package in bytes.
    pub code_size: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn definition_file_round_trips() {
        let json = r#"{
            "FunctionName": "hello",
            "Handler": "index.handler",
            "Runtime": "nodejs20.x",
            "MemorySize": 256,
            "Architectures": ["arm64"],
            "KMSKeyArn": "arn:aws:kms:us-east-1:123456789012:key/abc",
            "LoggingConfig": {"LogFormat": "JSON", "ApplicationLogLevel": "DEBUG"},
            "Environment": {"Variables": {"B": "2", "A": "1"}},
            "Tags": {"team": "edge"}
        }"#;

        let config: FunctionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.function_name, "hello");
        assert_eq!(config.architectures, Some(vec![Architecture::Arm64]));
        assert_eq!(
            config.logging_config.as_ref().unwrap().log_format,
            Some(LogFormat::Json)
        );
        assert_eq!(
            config.kms_key_arn.as_deref(),
            Some("arn:aws:kms:us-east-1:123456789012:key/abc")
        );

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["LoggingConfig"]["LogFormat"], "JSON");
        assert!(value.get("Timeout").is_none());

        let again: FunctionConfig = serde_json::from_value(value).unwrap();
        assert_eq!(again, config);
    }

    #[test]
    fn image_uri_implies_image_package() {
        let mut config = FunctionConfig::named("img");
        assert_eq!(config.effective_package_type(), PackageType::Zip);

        config.code = Some(CodeLocation {
            image_uri: Some("123456789012.dkr.ecr.us-east-1.amazonaws.com/app:1".to_owned()),
        });
        assert_eq!(config.effective_package_type(), PackageType::Image);
    }
}
