//! HTTP client for the function service REST API.
//!
//! Requests are sent unsigned, so the endpoint must be an emulator or a
//! signing proxy.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{AddGrantRequest, CodePayload, ControlPlane, LiveUrlConfig};
use crate::config::EndpointConfig;
use crate::error::{ControlError, ControlResult, RemoteError, RemoteResult};
use crate::function::{Architecture, CodeLocation, FunctionConfig, LiveFunction};
use crate::normalize::normalize;
use crate::qualified_name;
use crate::url::UrlConfig;

const FUNCTIONS: &str = "2015-03-31/functions";
const URLS: &str = "2021-10-31/functions";
const TAGS: &str = "2017-03-31/tags";

/// Fields of a configuration response that are not part of [`FunctionConfig`].
const UPDATE_EXCLUDED_FIELDS: &[&str] = &[
    "FunctionName",
    "Code",
    "Tags",
    "PackageType",
    "Architectures",
];

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(alias = "Message")]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFunction {
    configuration: Value,
    #[serde(default)]
    code: Option<CodeLocation>,
    #[serde(default)]
    tags: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawUrlConfig {
    function_url: String,
    function_arn: String,
    #[serde(flatten)]
    config: UrlConfig,
}

impl From<RawUrlConfig> for LiveUrlConfig {
    fn from(raw: RawUrlConfig) -> Self {
        Self {
            function_url: raw.function_url,
            function_arn: raw.function_arn,
            config: raw.config,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPolicy {
    policy: String,
}

/// Convert a function configuration response into a [`LiveFunction`].
///
/// Layers are reported as objects and reduced to their ARNs; the result is
/// normalized so fields the service omits compare equal to their defaults.
fn live_function(mut configuration: Value) -> Result<LiveFunction, String> {
    let fields = configuration
        .as_object_mut()
        .ok_or_else(|| "configuration is not an object".to_owned())?;

    let function_arn = fields
        .remove("FunctionArn")
        .and_then(|v| v.as_str().map(str::to_owned))
        .ok_or_else(|| "missing FunctionArn".to_owned())?;
    let code_sha256 = fields
        .remove("CodeSha256")
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    let code_size = fields
        .remove("CodeSize")
        .and_then(|v| v.as_u64())
        .unwrap_or_default();

    if let Some(Value::Array(layers)) = fields.get_mut("Layers") {
        for layer in layers.iter_mut() {
            if let Some(arn) = layer.get("Arn").cloned() {
                *layer = arn;
            }
        }
    }

    let config: FunctionConfig = serde_json::from_value(configuration).map_err(|e| e.to_string())?;
    Ok(LiveFunction {
        config: normalize(&config),
        function_arn,
        code_sha256,
        code_size,
    })
}

fn code_body(code: &CodePayload) -> Value {
    match code {
        CodePayload::Zip(bytes) => json!({"ZipFile": STANDARD.encode(bytes)}),
        CodePayload::Image(uri) => json!({"ImageUri": uri}),
    }
}

fn create_body(config: &FunctionConfig, code: &CodePayload) -> Result<Value, serde_json::Error> {
    let mut body = serde_json::to_value(config)?;
    body["Code"] = code_body(code);
    Ok(body)
}

fn update_configuration_body(config: &FunctionConfig) -> Result<Value, serde_json::Error> {
    let mut body = serde_json::to_value(config)?;
    if let Some(fields) = body.as_object_mut() {
        for field in UPDATE_EXCLUDED_FIELDS {
            fields.remove(*field);
        }
    }
    Ok(body)
}

fn update_code_body(code: &CodePayload, architectures: Option<&[Architecture]>) -> Value {
    let mut body = code_body(code);
    if let Some(architectures) = architectures {
        body["Architectures"] = json!(architectures);
    }
    body
}

fn add_grant_body(request: &AddGrantRequest) -> Value {
    let mut body = json!({
        "StatementId": request.statement_id,
        "Action": request.action,
        "Principal": request.principal,
    });
    let optional = [
        ("PrincipalOrgID", request.principal_org_id.as_deref()),
        ("SourceArn", request.source_arn.as_deref()),
        ("SourceAccount", request.source_account.as_deref()),
        (
            "FunctionUrlAuthType",
            request.function_url_auth_type.map(|a| a.as_str()),
        ),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            body[key] = Value::from(value);
        }
    }
    body
}

fn qualifier_query(qualifier: Option<&str>) -> Vec<(&'static str, &str)> {
    qualifier.map(|q| ("Qualifier", q)).into_iter().collect()
}

fn encode_error(operation: &'static str, resource: &str, e: &serde_json::Error) -> RemoteError {
    RemoteError::Decode {
        operation,
        resource: resource.to_owned(),
        message: format!("cannot encode request: {e}"),
    }
}

/// [`ControlPlane`] backed by the function service REST API.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
}

impl HttpControlPlane {
    /// Create a client from configuration.
    pub fn new(config: &EndpointConfig) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ControlError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_owned(),
        })
    }

    /// Create a client for `url` with default settings.
    pub fn with_url(url: impl Into<String>) -> ControlResult<Self> {
        Self::new(&EndpointConfig {
            url: url.into(),
            ..EndpointConfig::default()
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        operation: &'static str,
        resource: &str,
        request: RequestBuilder,
    ) -> RemoteResult<Response> {
        debug!(operation, resource, "sending request");
        let response = request
            .send()
            .await
            .map_err(|source| RemoteError::Transport {
                operation,
                resource: resource.to_owned(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::not_found(operation, resource));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(RemoteError::Api {
            operation,
            resource: resource.to_owned(),
            status: status.as_u16(),
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        resource: &str,
        response: Response,
    ) -> RemoteResult<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| RemoteError::Transport {
                operation,
                resource: resource.to_owned(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|e| RemoteError::Decode {
            operation,
            resource: resource.to_owned(),
            message: e.to_string(),
        })
    }

    async fn configuration(
        &self,
        operation: &'static str,
        resource: &str,
        request: RequestBuilder,
    ) -> RemoteResult<LiveFunction> {
        let response = self.send(operation, resource, request).await?;
        let configuration: Value = Self::decode(operation, resource, response).await?;
        live_function(configuration).map_err(|message| RemoteError::Decode {
            operation,
            resource: resource.to_owned(),
            message,
        })
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn get_function(&self, function_name: &str) -> RemoteResult<LiveFunction> {
        const OP: &str = "GetFunction";
        let request = self
            .client
            .get(self.url(&format!("{FUNCTIONS}/{function_name}")));
        let response = self.send(OP, function_name, request).await?;
        let raw: RawFunction = Self::decode(OP, function_name, response).await?;

        let mut live = live_function(raw.configuration).map_err(|message| RemoteError::Decode {
            operation: OP,
            resource: function_name.to_owned(),
            message,
        })?;
        if raw.code.as_ref().is_some_and(|c| c.image_uri.is_some()) {
            live.config.code = raw.code;
        }
        live.config.tags = raw.tags.filter(|tags| !tags.is_empty());
        Ok(live)
    }

    async fn create_function(
        &self,
        config: &FunctionConfig,
        code: &CodePayload,
    ) -> RemoteResult<LiveFunction> {
        const OP: &str = "CreateFunction";
        let name = config.function_name.as_str();
        let body = create_body(config, code).map_err(|e| encode_error(OP, name, &e))?;
        let request = self.client.post(self.url(FUNCTIONS)).json(&body);
        self.configuration(OP, name, request).await
    }

    async fn update_configuration(&self, config: &FunctionConfig) -> RemoteResult<LiveFunction> {
        const OP: &str = "UpdateFunctionConfiguration";
        let name = config.function_name.as_str();
        let body = update_configuration_body(config).map_err(|e| encode_error(OP, name, &e))?;
        let request = self
            .client
            .put(self.url(&format!("{FUNCTIONS}/{name}/configuration")))
            .json(&body);
        self.configuration(OP, name, request).await
    }

    async fn update_code(
        &self,
        function_name: &str,
        code: &CodePayload,
        architectures: Option<&[Architecture]>,
    ) -> RemoteResult<LiveFunction> {
        let request = self
            .client
            .put(self.url(&format!("{FUNCTIONS}/{function_name}/code")))
            .json(&update_code_body(code, architectures));
        self.configuration("UpdateFunctionCode", function_name, request)
            .await
    }

    async fn tag_function(
        &self,
        function_arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.url(&format!("{TAGS}/{function_arn}")))
            .json(&json!({ "Tags": tags }));
        self.send("TagResource", function_arn, request).await?;
        Ok(())
    }

    async fn untag_function(&self, function_arn: &str, keys: &[String]) -> RemoteResult<()> {
        let query: Vec<(&str, &str)> = keys.iter().map(|k| ("tagKeys", k.as_str())).collect();
        let request = self
            .client
            .delete(self.url(&format!("{TAGS}/{function_arn}")))
            .query(&query);
        self.send("UntagResource", function_arn, request).await?;
        Ok(())
    }

    async fn get_url_config(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> RemoteResult<LiveUrlConfig> {
        const OP: &str = "GetFunctionUrlConfig";
        let resource = qualified_name(function_name, qualifier);
        let request = self
            .client
            .get(self.url(&format!("{URLS}/{function_name}/url")))
            .query(&qualifier_query(qualifier));
        let response = self.send(OP, &resource, request).await?;
        let raw: RawUrlConfig = Self::decode(OP, &resource, response).await?;
        Ok(raw.into())
    }

    async fn create_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig> {
        const OP: &str = "CreateFunctionUrlConfig";
        let qualifier = config.qualifier.as_deref();
        let resource = qualified_name(function_name, qualifier);
        let body = UrlConfig {
            qualifier: None,
            ..config.clone()
        };
        let request = self
            .client
            .post(self.url(&format!("{URLS}/{function_name}/url")))
            .query(&qualifier_query(qualifier))
            .json(&body);
        let response = self.send(OP, &resource, request).await?;
        let raw: RawUrlConfig = Self::decode(OP, &resource, response).await?;
        Ok(raw.into())
    }

    async fn update_url_config(
        &self,
        function_name: &str,
        config: &UrlConfig,
    ) -> RemoteResult<LiveUrlConfig> {
        const OP: &str = "UpdateFunctionUrlConfig";
        let qualifier = config.qualifier.as_deref();
        let resource = qualified_name(function_name, qualifier);
        let body = UrlConfig {
            qualifier: None,
            ..config.clone()
        };
        let request = self
            .client
            .put(self.url(&format!("{URLS}/{function_name}/url")))
            .query(&qualifier_query(qualifier))
            .json(&body);
        let response = self.send(OP, &resource, request).await?;
        let raw: RawUrlConfig = Self::decode(OP, &resource, response).await?;
        Ok(raw.into())
    }

    async fn get_policy(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> RemoteResult<String> {
        const OP: &str = "GetPolicy";
        let resource = qualified_name(function_name, qualifier);
        let request = self
            .client
            .get(self.url(&format!("{FUNCTIONS}/{function_name}/policy")))
            .query(&qualifier_query(qualifier));
        let response = self.send(OP, &resource, request).await?;
        let raw: RawPolicy = Self::decode(OP, &resource, response).await?;
        Ok(raw.policy)
    }

    async fn add_grant(&self, request: &AddGrantRequest) -> RemoteResult<()> {
        let qualifier = request.qualifier.as_deref();
        let resource = qualified_name(&request.function_name, qualifier);
        let http = self
            .client
            .post(self.url(&format!("{FUNCTIONS}/{}/policy", request.function_name)))
            .query(&qualifier_query(qualifier))
            .json(&add_grant_body(request));
        self.send("AddPermission", &resource, http).await?;
        Ok(())
    }

    async fn remove_grant(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
        statement_id: &str,
    ) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.url(&format!(
                "{FUNCTIONS}/{function_name}/policy/{statement_id}"
            )))
            .query(&qualifier_query(qualifier));
        self.send("RemovePermission", statement_id, request).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::url::AuthType;

    #[test]
    fn base_url_is_trimmed() {
        let client = HttpControlPlane::with_url("http://localhost:9001/").unwrap();
        assert_eq!(
            client.url("2015-03-31/functions/hello"),
            "http://localhost:9001/2015-03-31/functions/hello"
        );
    }

    #[test]
    fn configuration_response_is_converted() {
        let response = json!({
            "FunctionName": "hello",
            "FunctionArn": "arn:aws:lambda:us-east-1:123456789012:function:hello",
            "Runtime": "nodejs20.x",
            "Handler": "index.handler",
            "CodeSha256": "abc=",
            "CodeSize": 1234,
            "MemorySize": 128,
            "Timeout": 3,
            "Layers": [{"Arn": "arn:aws:lambda:us-east-1:123456789012:layer:deps:3", "CodeSize": 10}],
            "VpcConfig": {"SubnetIds": [], "SecurityGroupIds": [], "VpcId": ""},
            "SnapStart": {"ApplyOn": "None", "OptimizationStatus": "Off"},
            "LastModified": "2024-01-01T00:00:00.000+0000"
        });

        let live = live_function(response).unwrap();
        assert_eq!(live.code_sha256, "abc=");
        assert_eq!(live.code_size, 1234);
        assert_eq!(
            live.config.layers,
            Some(vec![
                "arn:aws:lambda:us-east-1:123456789012:layer:deps:3".to_owned()
            ])
        );
        assert!(live.config.vpc_config.is_none());
        assert_eq!(live.config.architectures, Some(vec![Architecture::X86_64]));
    }

    #[test]
    fn configuration_without_arn_is_rejected() {
        assert!(live_function(json!({"FunctionName": "hello"})).is_err());
    }

    #[test]
    fn update_body_drops_code_only_fields() {
        let mut config = FunctionConfig::named("hello");
        config.memory_size = Some(256);
        config.tags = Some(BTreeMap::from([("a".to_owned(), "b".to_owned())]));
        config.architectures = Some(vec![Architecture::Arm64]);

        let body = update_configuration_body(&config).unwrap();
        assert_eq!(body, json!({"MemorySize": 256}));
    }

    #[test]
    fn create_body_embeds_code() {
        let body = create_body(
            &FunctionConfig::named("hello"),
            &CodePayload::Zip(b"zip".to_vec()),
        )
        .unwrap();
        assert_eq!(body["FunctionName"], "hello");
        assert_eq!(body["Code"]["ZipFile"], "emlw");
    }

    #[test]
    fn grant_body_skips_unset_conditions() {
        let body = add_grant_body(&AddGrantRequest {
            function_name: "hello".to_owned(),
            qualifier: None,
            statement_id: "sid".to_owned(),
            action: "lambda:InvokeFunctionUrl".to_owned(),
            principal: "*".to_owned(),
            principal_org_id: Some("o-1".to_owned()),
            source_arn: None,
            source_account: None,
            function_url_auth_type: Some(AuthType::AwsIam),
        });
        assert_eq!(
            body,
            json!({
                "StatementId": "sid",
                "Action": "lambda:InvokeFunctionUrl",
                "Principal": "*",
                "PrincipalOrgID": "o-1",
                "FunctionUrlAuthType": "AWS_IAM"
            })
        );
    }
}
