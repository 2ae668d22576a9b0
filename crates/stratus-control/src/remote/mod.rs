//! Control plane client abstraction.
//!
//! The reconciler only talks to the function service through [`ControlPlane`].
//! [`HttpControlPlane`] speaks the service's REST API; [`MemoryControlPlane`]
//! keeps everything in process and is used for tests and dry local runs.

mod http;
mod memory;

pub use http::HttpControlPlane;
pub use memory::MemoryControlPlane;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::RemoteResult;
use crate::function::{Architecture, FunctionConfig, LiveFunction};
use crate::url::{AuthType, UrlConfig};

/// Deployment package handed to the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodePayload {
    /// Zip archive bytes.
    Zip(Vec<u8>),
    /// Container image URI.
    Image(String),
}

/// Function URL settings as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveUrlConfig {
    /// Public URL.
    pub function_url: String,
    pub function_arn: String,
    pub config: UrlConfig,
}

/// Parameters of a single grant addition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddGrantRequest {
    pub function_name: String,
    pub qualifier: Option<String>,
    pub statement_id: String,
    pub action: String,
    pub principal: String,
    pub principal_org_id: Option<String>,
    pub source_arn: Option<String>,
    pub source_account: Option<String>,
    pub function_url_auth_type: Option<AuthType>,
}

/// Operations the reconciler needs from the function service.
///
/// Every lookup distinguishes a missing resource with
/// [`RemoteError::NotFound`](crate::error::RemoteError::NotFound).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the deployed configuration of `function_name`.
    async fn get_function(&self, function_name: &str) -> RemoteResult<LiveFunction>;

    /// Create a function from `config` and `code`.
    async fn create_function(
        &self,
        config: &FunctionConfig,
        code: &CodePayload,
    ) -> RemoteResult<LiveFunction>;

    /// Replace the configuration of an existing function.
    async fn update_configuration(&self, config: &FunctionConfig) -> RemoteResult<LiveFunction>;

    /// Replace the code of an existing function.
    async fn update_code(
        &self,
        function_name: &str,
        code: &CodePayload,
        architectures: Option<&[Architecture]>,
    ) -> RemoteResult<LiveFunction>;

    /// Add or overwrite tags on `function_arn`.
    async fn tag_function(
        &self,
        function_arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<()>;

    /// Remove tag keys from `function_arn`.
    async fn untag_function(&self, function_arn: &str, keys: &[String]) -> RemoteResult<()>;

    async fn get_url_config(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> RemoteResult<LiveUrlConfig>;

    async fn create_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig>;

    async fn update_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig>;

    /// Fetch the resource policy document as JSON text.
    async fn get_policy(&self, function_name: &str, qualifier: Option<&str>)
        -> RemoteResult<String>;

    async fn add_grant(&self, request: &AddGrantRequest) -> RemoteResult<()>;

    async fn remove_grant(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
        statement_id: &str,
    ) -> RemoteResult<()>;
}
