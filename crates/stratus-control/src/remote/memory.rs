//! In-process control plane.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::{AddGrantRequest, CodePayload, ControlPlane, LiveUrlConfig};
use crate::error::{RemoteError, RemoteResult};
use crate::function::{Architecture, CodeLocation, FunctionConfig, LiveFunction};
use crate::normalize::normalize;
use crate::permissions::WILDCARD_PRINCIPAL;
use crate::qualified_name;
use crate::url::{Cors, UrlConfig};

const DEFAULT_ACCOUNT: &str = "123456789012";
const DEFAULT_REGION: &str = "us-east-1";

type ResourceKey = (String, Option<String>);

#[derive(Debug, Clone)]
struct StoredFunction {
    config: FunctionConfig,
    code_sha256: String,
    code_size: u64,
}

#[derive(Debug, Default)]
struct State {
    functions: BTreeMap<String, StoredFunction>,
    urls: BTreeMap<ResourceKey, LiveUrlConfig>,
    policies: BTreeMap<ResourceKey, Vec<AddGrantRequest>>,
    failures: BTreeMap<(String, String), u16>,
    calls: Vec<String>,
}

/// Control plane that keeps functions, URLs and policies in memory.
///
/// Stored configurations are normalized the way the service populates them,
/// and policies are rendered as real policy documents, so the reconciler
/// sees the same shapes it would see remotely. Failures can be injected per
/// operation and key.
#[derive(Debug)]
pub struct MemoryControlPlane {
    state: RwLock<State>,
    account: String,
    region: String,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned(operation: &'static str) -> RemoteError {
    RemoteError::Api {
        operation,
        resource: String::new(),
        status: 500,
        message: "lock poisoned".to_owned(),
    }
}

fn conflict(operation: &'static str, resource: String, message: &str) -> RemoteError {
    RemoteError::Api {
        operation,
        resource,
        status: 409,
        message: message.to_owned(),
    }
}

fn digest(code: &CodePayload) -> (String, u64) {
    match code {
        CodePayload::Zip(bytes) => (
            STANDARD.encode(Sha256::digest(bytes)),
            bytes.len() as u64,
        ),
        CodePayload::Image(uri) => (STANDARD.encode(Sha256::digest(uri.as_bytes())), 0),
    }
}

impl MemoryControlPlane {
    /// Create an empty control plane for the default test account.
    #[must_use]
    pub fn new() -> Self {
        Self::with_account(DEFAULT_ACCOUNT, DEFAULT_REGION)
    }

    /// Create an empty control plane for `account` in `region`.
    pub fn with_account(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            account: account.into(),
            region: region.into(),
        }
    }

    /// Make `operation` on `key` fail with `status`. The key is the statement
    /// id for grant operations and the function name otherwise.
    pub fn fail(&self, operation: &str, key: &str, status: u16) {
        if let Ok(mut state) = self.state.write() {
            state
                .failures
                .insert((operation.to_owned(), key.to_owned()), status);
        }
    }

    /// Operations invoked so far, as `"<Operation> <key>"`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state
            .read()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.state.write() {
            state.calls.clear();
        }
    }

    /// Statement ids currently granted on a function or alias.
    #[must_use]
    pub fn grant_ids(&self, function_name: &str, qualifier: Option<&str>) -> Vec<String> {
        self.state
            .read()
            .ok()
            .and_then(|state| {
                state
                    .policies
                    .get(&key(function_name, qualifier))
                    .map(|grants| grants.iter().map(|g| g.statement_id.clone()).collect())
            })
            .unwrap_or_default()
    }

    fn function_arn(&self, function_name: &str, qualifier: Option<&str>) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region,
            self.account,
            qualified_name(function_name, qualifier)
        )
    }

    fn live(&self, stored: &StoredFunction) -> LiveFunction {
        LiveFunction {
            function_arn: self.function_arn(&stored.config.function_name, None),
            config: stored.config.clone(),
            code_sha256: stored.code_sha256.clone(),
            code_size: stored.code_size,
        }
    }

    /// Record the call and return an injected failure if one matches.
    fn enter(&self, state: &mut State, operation: &'static str, key: &str) -> RemoteResult<()> {
        state.calls.push(format!("{operation} {key}"));
        match state.failures.get(&(operation.to_owned(), key.to_owned())) {
            Some(404) => Err(RemoteError::not_found(operation, key)),
            Some(status) => Err(RemoteError::Api {
                operation,
                resource: key.to_owned(),
                status: *status,
                message: "injected failure".to_owned(),
            }),
            None => Ok(()),
        }
    }

    fn write(&self, operation: &'static str) -> RemoteResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| poisoned(operation))
    }

    fn render_principal(&self, principal: &str) -> Value {
        if principal == WILDCARD_PRINCIPAL {
            Value::from(principal)
        } else if principal.len() == 12 && principal.chars().all(|c| c.is_ascii_digit()) {
            json!({"AWS": format!("arn:aws:iam::{principal}:root")})
        } else if principal.ends_with(".amazonaws.com") {
            json!({"Service": principal})
        } else {
            json!({"AWS": principal})
        }
    }

    fn render_policy(&self, resource: &str, grants: &[AddGrantRequest]) -> String {
        let statements: Vec<Value> = grants
            .iter()
            .map(|grant| {
                let mut string_equals = Map::new();
                if let Some(auth) = grant.function_url_auth_type {
                    string_equals.insert(
                        "lambda:FunctionUrlAuthType".to_owned(),
                        Value::from(auth.as_str()),
                    );
                }
                if let Some(org) = &grant.principal_org_id {
                    string_equals.insert("aws:PrincipalOrgID".to_owned(), Value::from(org.as_str()));
                }
                if let Some(account) = &grant.source_account {
                    string_equals
                        .insert("AWS:SourceAccount".to_owned(), Value::from(account.as_str()));
                }

                let mut condition = Map::new();
                if !string_equals.is_empty() {
                    condition.insert("StringEquals".to_owned(), Value::Object(string_equals));
                }
                if let Some(arn) = &grant.source_arn {
                    condition.insert("ArnLike".to_owned(), json!({"AWS:SourceArn": arn}));
                }

                let mut statement = json!({
                    "Sid": grant.statement_id,
                    "Effect": "Allow",
                    "Principal": self.render_principal(&grant.principal),
                    "Action": grant.action,
                    "Resource": resource,
                });
                if !condition.is_empty() {
                    statement["Condition"] = Value::Object(condition);
                }
                statement
            })
            .collect();

        json!({
            "Version": "2012-10-17",
            "Id": "default",
            "Statement": statements,
        })
        .to_string()
    }
}

fn key(function_name: &str, qualifier: Option<&str>) -> ResourceKey {
    (function_name.to_owned(), qualifier.map(str::to_owned))
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn get_function(&self, function_name: &str) -> RemoteResult<LiveFunction> {
        let mut state = self.write("GetFunction")?;
        self.enter(&mut state, "GetFunction", function_name)?;
        state
            .functions
            .get(function_name)
            .map(|stored| self.live(stored))
            .ok_or_else(|| RemoteError::not_found("GetFunction", function_name))
    }

    async fn create_function(
        &self,
        config: &FunctionConfig,
        code: &CodePayload,
    ) -> RemoteResult<LiveFunction> {
        let name = config.function_name.as_str();
        let mut state = self.write("CreateFunction")?;
        self.enter(&mut state, "CreateFunction", name)?;
        if state.functions.contains_key(name) {
            return Err(conflict(
                "CreateFunction",
                name.to_owned(),
                "function already exists",
            ));
        }

        let mut stored_config = normalize(config);
        if let CodePayload::Image(uri) = code {
            stored_config.code = Some(CodeLocation {
                image_uri: Some(uri.clone()),
            });
        }
        let (code_sha256, code_size) = digest(code);
        let stored = StoredFunction {
            config: stored_config,
            code_sha256,
            code_size,
        };
        let live = self.live(&stored);
        state.functions.insert(name.to_owned(), stored);
        Ok(live)
    }

    async fn update_configuration(&self, config: &FunctionConfig) -> RemoteResult<LiveFunction> {
        let name = config.function_name.as_str();
        let mut state = self.write("UpdateFunctionConfiguration")?;
        self.enter(&mut state, "UpdateFunctionConfiguration", name)?;
        let stored = state
            .functions
            .get_mut(name)
            .ok_or_else(|| RemoteError::not_found("UpdateFunctionConfiguration", name))?;

        let mut updated = normalize(config);
        updated.code = stored.config.code.take();
        updated.tags = stored.config.tags.take();
        updated.package_type = stored.config.package_type;
        updated.architectures = stored.config.architectures.take();
        stored.config = updated;

        let stored = stored.clone();
        Ok(self.live(&stored))
    }

    async fn update_code(
        &self,
        function_name: &str,
        code: &CodePayload,
        architectures: Option<&[Architecture]>,
    ) -> RemoteResult<LiveFunction> {
        let mut state = self.write("UpdateFunctionCode")?;
        self.enter(&mut state, "UpdateFunctionCode", function_name)?;
        let stored = state
            .functions
            .get_mut(function_name)
            .ok_or_else(|| RemoteError::not_found("UpdateFunctionCode", function_name))?;

        let (code_sha256, code_size) = digest(code);
        stored.code_sha256 = code_sha256;
        stored.code_size = code_size;
        if let CodePayload::Image(uri) = code {
            stored.config.code = Some(CodeLocation {
                image_uri: Some(uri.clone()),
            });
        }
        if let Some(architectures) = architectures {
            stored.config.architectures = Some(architectures.to_vec());
        }

        let stored = stored.clone();
        Ok(self.live(&stored))
    }

    async fn tag_function(
        &self,
        function_arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<()> {
        let mut state = self.write("TagResource")?;
        self.enter(&mut state, "TagResource", function_arn)?;
        let name = function_arn.rsplit(':').next().unwrap_or(function_arn);
        let stored = state
            .functions
            .get_mut(name)
            .ok_or_else(|| RemoteError::not_found("TagResource", function_arn))?;
        let current = stored.config.tags.get_or_insert_with(BTreeMap::new);
        current.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn untag_function(&self, function_arn: &str, keys: &[String]) -> RemoteResult<()> {
        let mut state = self.write("UntagResource")?;
        self.enter(&mut state, "UntagResource", function_arn)?;
        let name = function_arn.rsplit(':').next().unwrap_or(function_arn);
        let stored = state
            .functions
            .get_mut(name)
            .ok_or_else(|| RemoteError::not_found("UntagResource", function_arn))?;
        if let Some(current) = stored.config.tags.as_mut() {
            for key in keys {
                current.remove(key);
            }
            if current.is_empty() {
                stored.config.tags = None;
            }
        }
        Ok(())
    }

    async fn get_url_config(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> RemoteResult<LiveUrlConfig> {
        let mut state = self.write("GetFunctionUrlConfig")?;
        self.enter(&mut state, "GetFunctionUrlConfig", function_name)?;
        state
            .urls
            .get(&key(function_name, qualifier))
            .cloned()
            .ok_or_else(|| {
                RemoteError::not_found(
                    "GetFunctionUrlConfig",
                    qualified_name(function_name, qualifier),
                )
            })
    }

    async fn create_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig> {
        let qualifier = config.qualifier.as_deref();
        let mut state = self.write("CreateFunctionUrlConfig")?;
        self.enter(&mut state, "CreateFunctionUrlConfig", function_name)?;
        if !state.functions.contains_key(function_name) {
            return Err(RemoteError::not_found(
                "CreateFunctionUrlConfig",
                function_name,
            ));
        }
        let key = key(function_name, qualifier);
        if state.urls.contains_key(&key) {
            return Err(conflict(
                "CreateFunctionUrlConfig",
                qualified_name(function_name, qualifier),
                "function URL config already exists",
            ));
        }

        let live = LiveUrlConfig {
            function_url: format!(
                "https://{}.lambda-url.{}.on.aws/",
                qualified_name(function_name, qualifier).replace(':', "-"),
                self.region
            ),
            function_arn: self.function_arn(function_name, qualifier),
            config: UrlConfig {
                qualifier: None,
                cors: config.cors.clone().filter(|cors| *cors != Cors::default()),
                ..config.clone()
            },
        };
        state.urls.insert(key, live.clone());
        Ok(live)
    }

    async fn update_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig> {
        let qualifier = config.qualifier.as_deref();
        let mut state = self.write("UpdateFunctionUrlConfig")?;
        self.enter(&mut state, "UpdateFunctionUrlConfig", function_name)?;
        let live = state
            .urls
            .get_mut(&key(function_name, qualifier))
            .ok_or_else(|| {
                RemoteError::not_found(
                    "UpdateFunctionUrlConfig",
                    qualified_name(function_name, qualifier),
                )
            })?;

        if let Some(auth_type) = config.auth_type {
            live.config.auth_type = Some(auth_type);
        }
        if let Some(invoke_mode) = config.invoke_mode {
            live.config.invoke_mode = Some(invoke_mode);
        }
        if let Some(cors) = &config.cors {
            // an empty block clears CORS
            live.config.cors = (*cors != Cors::default()).then(|| cors.clone());
        }
        Ok(live.clone())
    }

    async fn get_policy(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> RemoteResult<String> {
        let mut state = self.write("GetPolicy")?;
        self.enter(&mut state, "GetPolicy", function_name)?;
        match state.policies.get(&key(function_name, qualifier)) {
            Some(grants) if !grants.is_empty() => Ok(self.render_policy(
                &self.function_arn(function_name, qualifier),
                grants,
            )),
            _ => Err(RemoteError::not_found(
                "GetPolicy",
                qualified_name(function_name, qualifier),
            )),
        }
    }

    async fn add_grant(&self, request: &AddGrantRequest) -> RemoteResult<()> {
        let qualifier = request.qualifier.as_deref();
        let mut state = self.write("AddPermission")?;
        self.enter(&mut state, "AddPermission", &request.statement_id)?;
        if !state.functions.contains_key(&request.function_name) {
            return Err(RemoteError::not_found(
                "AddPermission",
                request.function_name.clone(),
            ));
        }

        let grants = state
            .policies
            .entry(key(&request.function_name, qualifier))
            .or_default();
        if grants
            .iter()
            .any(|g| g.statement_id == request.statement_id)
        {
            return Err(conflict(
                "AddPermission",
                qualified_name(&request.function_name, qualifier),
                "statement id already exists",
            ));
        }
        grants.push(request.clone());
        Ok(())
    }

    async fn remove_grant(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
        statement_id: &str,
    ) -> RemoteResult<()> {
        let mut state = self.write("RemovePermission")?;
        self.enter(&mut state, "RemovePermission", statement_id)?;
        let grants = state
            .policies
            .get_mut(&key(function_name, qualifier))
            .ok_or_else(|| RemoteError::not_found("RemovePermission", statement_id))?;
        let before = grants.len();
        grants.retain(|g| g.statement_id != statement_id);
        if grants.len() == before {
            return Err(RemoteError::not_found("RemovePermission", statement_id));
        }
        Ok(())
    }
}
