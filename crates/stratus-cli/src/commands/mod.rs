//! Subcommand implementations and the state they share.

pub mod archive;
pub mod deploy;
pub mod diff;
pub mod init;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use stratus_control::definition::{
    find_definition, load_function, load_function_url, FUNCTION_FILES,
};
use stratus_control::identity::CallerIdentityCache;
use stratus_control::template::JsonTemplate;
use stratus_control::{ControlPlane, Deployer, DesiredState, HttpControlPlane, StratusConfig};
use stratus_package::{read_exclude_file, CodeSource, ExcludeSet, SymlinkPolicy, DEFAULT_EXCLUDE_FILE};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration and cancellation shared by every command.
pub struct Context {
    pub config: StratusConfig,
    pub cancel: CancellationToken,
}

impl Context {
    /// Load `stratus.toml` (or `path`) and apply command line overrides.
    pub fn load(
        path: &Path,
        endpoint: Option<String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let mut config = StratusConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
        if let Some(url) = endpoint {
            config.endpoint.url = url;
        }
        debug!(endpoint = %config.endpoint.url, "configuration loaded");
        Ok(Self { config, cancel })
    }

    pub fn deployer(&self) -> anyhow::Result<Deployer> {
        let client: Arc<dyn ControlPlane> = Arc::new(HttpControlPlane::new(&self.config.endpoint)?);
        Ok(Deployer::with_cancellation(client, self.cancel.clone()))
    }

    pub fn evaluator(&self) -> JsonTemplate {
        JsonTemplate::new(Arc::new(CallerIdentityCache::new(
            self.config.identity_resolver(),
        )))
    }

    /// Resolve the code source. Flags win over `[package]` settings; an ignore
    /// file is optional only when it was not named explicitly.
    pub fn code_source(
        &self,
        src: Option<PathBuf>,
        exclude_file: Option<PathBuf>,
        keep_symlinks: bool,
    ) -> anyhow::Result<CodeSource> {
        let src = src.unwrap_or_else(|| self.config.package.src.clone());
        let explicit = exclude_file.or_else(|| self.config.package.exclude_file.clone());

        let patterns = match explicit {
            Some(file) => {
                anyhow::ensure!(file.is_file(), "exclude file {} not found", file.display());
                read_exclude_file(&file)
                    .with_context(|| format!("reading exclude file {}", file.display()))?
            }
            None => {
                let file = src.join(DEFAULT_EXCLUDE_FILE);
                if file.is_file() {
                    read_exclude_file(&file)
                        .with_context(|| format!("reading exclude file {}", file.display()))?
                } else {
                    Vec::new()
                }
            }
        };

        let policy = SymlinkPolicy::from_keep(keep_symlinks || self.config.package.keep_symlinks);
        Ok(CodeSource::detect(&src, ExcludeSet::with_defaults(patterns), policy))
    }

    /// Render and validate the definitions a deployment works from.
    pub async fn load_desired(
        &self,
        function: Option<PathBuf>,
        function_url: Option<PathBuf>,
    ) -> anyhow::Result<DesiredState> {
        let explicit = function.or_else(|| self.config.function.definition.clone());
        let function_path = find_definition(explicit.as_deref(), Path::new("."), FUNCTION_FILES)?;

        let evaluator = self.evaluator();
        let config = load_function(&evaluator, &function_path).await?;

        let function_url_path = function_url.or_else(|| self.config.function.url_definition.clone());
        let function_url = match &function_url_path {
            Some(path) => Some(load_function_url(&evaluator, path, &config.function_name).await?),
            None => None,
        };

        Ok(DesiredState {
            function: config,
            function_path,
            function_url,
            function_url_path,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn context() -> Context {
        Context {
            config: StratusConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn default_ignore_file_is_optional() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = context()
            .code_source(Some(dir.path().to_owned()), None, false)
            .unwrap();
        assert!(matches!(source, CodeSource::Directory { .. }));
    }

    #[test]
    fn default_ignore_file_adds_patterns() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(DEFAULT_EXCLUDE_FILE), "*.log\n").unwrap();

        let source = context()
            .code_source(Some(dir.path().to_owned()), None, true)
            .unwrap();
        let CodeSource::Directory {
            excludes, symlinks, ..
        } = source
        else {
            panic!("expected a directory source");
        };
        assert!(excludes.is_excluded("debug.log"));
        assert_eq!(symlinks, SymlinkPolicy::Preserve);
    }

    #[test]
    fn named_ignore_file_must_exist() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = context().code_source(
            Some(dir.path().to_owned()),
            Some(dir.path().join("missing")),
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn named_ignore_file_outside_src_is_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        let ignore = dir.path().join("deploy.ignore");
        std::fs::write(&ignore, "# tests\ntests/*\n").unwrap();

        let source = context().code_source(Some(src), Some(ignore), false).unwrap();
        let CodeSource::Directory { excludes, .. } = source else {
            panic!("expected a directory source");
        };
        assert!(excludes.is_excluded("tests/unit.js"));
    }

    #[test]
    fn endpoint_flag_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let context = Context::load(
            &dir.path().join("absent.toml"),
            Some("http://localhost:4566".to_owned()),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(context.config.endpoint.url, "http://localhost:4566");
    }
}
