//! Shared fixtures for deployment integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use stratus_control::permissions::GrantContent;
use stratus_control::url::Cors;
use stratus_control::{
    ControlPlane, Deployer, DesiredState, FunctionConfig, FunctionUrl, FunctionUrlDefinition,
    GrantStatement, MemoryControlPlane, UrlConfig,
};
use stratus_control::{AuthType, ConvergeOptions};
use stratus_package::{CodeSource, ExcludeSet, SymlinkPolicy};
use tempfile::TempDir;

pub const FUNCTION: &str = "hello";

/// A deployer over a fresh in-memory control plane.
pub struct Harness {
    pub plane: Arc<MemoryControlPlane>,
    pub deployer: Deployer,
}

impl Harness {
    pub fn new() -> Self {
        let plane = Arc::new(MemoryControlPlane::new());
        let client: Arc<dyn ControlPlane> = plane.clone();
        Self {
            plane,
            deployer: Deployer::new(client),
        }
    }

    /// Calls that change remote state.
    pub fn mutating_calls(&self) -> Vec<String> {
        self.plane
            .calls()
            .into_iter()
            .filter(|call| !call.starts_with("Get"))
            .collect()
    }
}

/// A source directory with a single handler file.
pub struct Source {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Source {
    pub fn new(handler: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("index.js"), handler).unwrap();
        Self { _dir: dir, root }
    }

    pub fn rewrite(&self, handler: &str) {
        std::fs::write(self.root.join("index.js"), handler).unwrap();
    }

    pub fn code(&self) -> CodeSource {
        CodeSource::detect(&self.root, ExcludeSet::with_defaults(Vec::<String>::new()), SymlinkPolicy::Resolve)
    }

    pub fn options(&self) -> ConvergeOptions {
        ConvergeOptions {
            source: Some(self.code()),
            ..ConvergeOptions::default()
        }
    }
}

pub fn zip_function() -> FunctionConfig {
    let mut config = FunctionConfig::named(FUNCTION);
    config.runtime = Some("nodejs20.x".to_owned());
    config.handler = Some("index.handler".to_owned());
    config.role = Some("arn:aws:iam::123456789012:role/hello".to_owned());
    config
}

pub fn desired(function: FunctionConfig) -> DesiredState {
    DesiredState {
        function,
        function_path: PathBuf::from("function.json"),
        function_url: None,
        function_url_path: None,
    }
}

pub fn with_url(mut state: DesiredState, url: FunctionUrl) -> DesiredState {
    state.function_url = Some(url);
    state.function_url_path = Some(PathBuf::from("function_url.json"));
    state
}

pub fn url(auth_type: AuthType, cors: Option<Cors>, grants: Vec<GrantStatement>) -> FunctionUrl {
    FunctionUrlDefinition {
        config: Some(UrlConfig {
            auth_type: Some(auth_type),
            cors,
            ..UrlConfig::default()
        }),
        permissions: grants,
    }
    .validate(FUNCTION)
    .unwrap()
}

pub fn account_grant(id: &str, account: &str) -> GrantStatement {
    GrantStatement::with_id(id, GrantContent::new(account))
}
