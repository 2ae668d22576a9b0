//! Fill unset desired fields with the values the service would assign.
//!
//! Without this every server-side default would show up as a permanent
//! difference between the definition file and the deployed function.

use crate::function::{
    Architecture, EphemeralStorage, FunctionConfig, LogFormat, LoggingConfig, PackageType,
    SnapStart, SnapStartApplyOn, TracingConfig, TracingMode,
};
use crate::url::{AuthType, InvokeMode, UrlConfig};

/// Service defaults for function configuration fields.
#[derive(Debug, Clone, Copy)]
pub struct FunctionDefaults {
    pub description: &'static str,
    pub architecture: Architecture,
    pub ephemeral_storage_mb: u32,
    pub memory_size_mb: u32,
    pub timeout_secs: u32,
    pub tracing_mode: TracingMode,
    pub log_format: LogFormat,
    pub application_log_level: &'static str,
    pub system_log_level: &'static str,
    /// Log group name prefix; the function name is appended.
    pub log_group_prefix: &'static str,
    pub snap_start: SnapStartApplyOn,
}

/// The table consulted by [`normalize`].
pub const DEFAULTS: FunctionDefaults = FunctionDefaults {
    description: "",
    architecture: Architecture::X86_64,
    ephemeral_storage_mb: 512,
    memory_size_mb: 128,
    timeout_secs: 3,
    tracing_mode: TracingMode::PassThrough,
    log_format: LogFormat::Text,
    application_log_level: "INFO",
    system_log_level: "INFO",
    log_group_prefix: "/aws/lambda/",
    snap_start: SnapStartApplyOn::None,
};

/// Service defaults for function URL configuration.
#[derive(Debug, Clone, Copy)]
pub struct UrlDefaults {
    pub auth_type: AuthType,
    pub invoke_mode: InvokeMode,
}

/// The table consulted by [`normalize_url_config`].
pub const URL_DEFAULTS: UrlDefaults = UrlDefaults {
    auth_type: AuthType::None,
    invoke_mode: InvokeMode::Buffered,
};

/// Return a copy of `desired` with every defaultable field populated.
///
/// Empty environment, tag and VPC blocks are folded to unset, since the
/// service reports them as absent.
#[must_use]
pub fn normalize(desired: &FunctionConfig) -> FunctionConfig {
    normalize_with(desired, &DEFAULTS)
}

/// [`normalize`] against an explicit defaults table.
#[must_use]
pub fn normalize_with(desired: &FunctionConfig, defaults: &FunctionDefaults) -> FunctionConfig {
    let mut config = desired.clone();

    config
        .description
        .get_or_insert_with(|| defaults.description.to_owned());
    config
        .architectures
        .get_or_insert_with(|| vec![defaults.architecture]);
    config.ephemeral_storage.get_or_insert(EphemeralStorage {
        size: defaults.ephemeral_storage_mb,
    });
    config.memory_size.get_or_insert(defaults.memory_size_mb);
    config.timeout.get_or_insert(defaults.timeout_secs);
    config.layers.get_or_insert_with(Vec::new);
    config.tracing_config.get_or_insert(TracingConfig {
        mode: defaults.tracing_mode,
    });
    config.snap_start.get_or_insert(SnapStart {
        apply_on: defaults.snap_start,
    });

    let logging = config.logging_config.get_or_insert_with(LoggingConfig::default);
    logging.log_format.get_or_insert(defaults.log_format);
    logging
        .application_log_level
        .get_or_insert_with(|| defaults.application_log_level.to_owned());
    logging
        .system_log_level
        .get_or_insert_with(|| defaults.system_log_level.to_owned());
    logging
        .log_group
        .get_or_insert_with(|| format!("{}{}", defaults.log_group_prefix, desired.function_name));

    if config.package_type.is_none() {
        config.package_type = Some(if desired.image_uri().is_some() {
            PackageType::Image
        } else {
            PackageType::Zip
        });
    }

    if config
        .environment
        .as_ref()
        .is_some_and(|env| env.variables.is_empty())
    {
        config.environment = None;
    }
    if config.tags.as_ref().is_some_and(|tags| tags.is_empty()) {
        config.tags = None;
    }
    if config
        .vpc_config
        .as_ref()
        .is_some_and(|vpc| vpc.subnet_ids.is_empty() && vpc.security_group_ids.is_empty())
    {
        config.vpc_config = None;
    }
    if config
        .file_system_configs
        .as_ref()
        .is_some_and(|fs| fs.is_empty())
    {
        config.file_system_configs = None;
    }

    config
}

/// Return a copy of `desired` with auth type and invoke mode populated.
#[must_use]
pub fn normalize_url_config(desired: &UrlConfig) -> UrlConfig {
    let mut config = desired.clone();
    config.auth_type.get_or_insert(URL_DEFAULTS.auth_type);
    config.invoke_mode.get_or_insert(URL_DEFAULTS.invoke_mode);
    config
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::function::{CodeLocation, Environment, VpcConfig};

    #[test]
    fn fills_service_defaults() {
        let config = normalize(&FunctionConfig::named("hello"));

        assert_eq!(config.description.as_deref(), Some(""));
        assert_eq!(config.architectures, Some(vec![Architecture::X86_64]));
        assert_eq!(config.ephemeral_storage, Some(EphemeralStorage { size: 512 }));
        assert_eq!(config.memory_size, Some(128));
        assert_eq!(config.timeout, Some(3));
        assert_eq!(config.layers, Some(vec![]));
        assert_eq!(
            config.tracing_config,
            Some(TracingConfig {
                mode: TracingMode::PassThrough
            })
        );
        assert_eq!(
            config.logging_config,
            Some(LoggingConfig {
                application_log_level: Some("INFO".to_owned()),
                log_format: Some(LogFormat::Text),
                log_group: Some("/aws/lambda/hello".to_owned()),
                system_log_level: Some("INFO".to_owned()),
            })
        );
        assert_eq!(
            config.snap_start,
            Some(SnapStart {
                apply_on: SnapStartApplyOn::None
            })
        );
        assert_eq!(config.package_type, Some(PackageType::Zip));
    }

    #[test]
    fn explicit_values_are_kept() {
        let mut desired = FunctionConfig::named("hello");
        desired.memory_size = Some(1024);
        desired.logging_config = Some(LoggingConfig {
            log_format: Some(LogFormat::Json),
            log_group: Some("custom".to_owned()),
            ..LoggingConfig::default()
        });

        let config = normalize(&desired);
        assert_eq!(config.memory_size, Some(1024));
        let logging = config.logging_config.unwrap();
        assert_eq!(logging.log_format, Some(LogFormat::Json));
        assert_eq!(logging.log_group.as_deref(), Some("custom"));
        assert_eq!(logging.system_log_level.as_deref(), Some("INFO"));
    }

    #[test]
    fn image_uri_selects_image_package() {
        let mut desired = FunctionConfig::named("img");
        desired.code = Some(CodeLocation {
            image_uri: Some("repo/app:1".to_owned()),
        });
        assert_eq!(normalize(&desired).package_type, Some(PackageType::Image));
    }

    #[test]
    fn empty_blocks_fold_to_unset() {
        let mut desired = FunctionConfig::named("hello");
        desired.environment = Some(Environment::default());
        desired.tags = Some(BTreeMap::new());
        desired.vpc_config = Some(VpcConfig::default());

        let config = normalize(&desired);
        assert!(config.environment.is_none());
        assert!(config.tags.is_none());
        assert!(config.vpc_config.is_none());
    }

    #[test]
    fn normalizing_twice_changes_nothing() {
        let once = normalize(&FunctionConfig::named("hello"));
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn url_defaults() {
        let config = normalize_url_config(&UrlConfig::default());
        assert_eq!(config.auth_type, Some(AuthType::None));
        assert_eq!(config.invoke_mode, Some(InvokeMode::Buffered));
    }
}
