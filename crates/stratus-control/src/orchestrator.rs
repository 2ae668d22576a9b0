//! Deployment orchestration.
//!
//! [`Deployer::converge`] drives one function towards its definition:
//!
//! ```text
//! normalize ─▶ fetch live ─▶ diff + validate ─▶ update configuration ─▶ tags
//!                 │                                                    │
//!                 └─ not found ─▶ create                               ▼
//!                                                     code (only when the digest changed)
//!                                                                      │
//!                                          function URL config ◀───────┘
//!                                                   │
//!                                                   ▼
//!                                   grants: reconcile ─▶ apply (adds, then removes)
//! ```
//!
//! Every remote call is raced against the deployer's cancellation token. In
//! dry-run mode nothing is mutated; the report says what would change.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use stratus_package::CodeSource;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::diff::{canonical_json, describe_code_diff, describe_diff, diff_text, validate_transition, DiffLabels};
use crate::error::{ControlError, ControlResult, RemoteResult};
use crate::function::{FunctionConfig, LiveFunction, PackageType};
use crate::normalize::normalize;
use crate::permissions::{
    apply, parse_live_policy, reconcile, ApplyMode, ApplyReport, GrantSet, ReconciliationPlan,
    UrlGrantSink, INVOKE_URL_ACTION,
};
use crate::qualified_name;
use crate::remote::{CodePayload, ControlPlane, LiveUrlConfig};
use crate::url::{Cors, FunctionUrl, FunctionUrlDefinition, UrlConfig};

/// Label used for the live side of a diff when nothing is deployed yet.
const NOT_DEPLOYED: &str = "(not deployed)";

/// Everything a definition asks for.
#[derive(Debug, Clone)]
pub struct DesiredState {
    /// Function configuration as written (not yet normalized).
    pub function: FunctionConfig,
    /// Where the function definition came from.
    pub function_path: PathBuf,
    /// Validated function URL definition, if one is managed.
    pub function_url: Option<FunctionUrl>,
    /// Where the function URL definition came from.
    pub function_url_path: Option<PathBuf>,
}

/// Options for [`Deployer::converge`].
#[derive(Debug, Clone, Default)]
pub struct ConvergeOptions {
    /// Code to deploy for zip functions.
    pub source: Option<CodeSource>,
    /// Leave the deployed code alone.
    pub skip_code: bool,
    /// Compute and report changes without applying them.
    pub dry_run: bool,
}

/// What happened to one part of the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Unchanged,
    Created,
    Updated,
    /// Would change, but the run was a dry run.
    Planned,
    Skipped,
}

/// Outcome of a function URL deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReport {
    pub config: Change,
    /// Public URL, when known.
    pub function_url: Option<String>,
    pub plan: ReconciliationPlan,
    pub grants: ApplyReport,
}

/// Outcome of [`Deployer::converge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergeReport {
    pub function_name: String,
    pub function_arn: Option<String>,
    pub configuration: Change,
    /// Configuration diff shown to the operator; empty when unchanged.
    pub diff: String,
    pub tags: Change,
    pub code: Change,
    pub url: Option<UrlReport>,
    pub dry_run: bool,
}

impl ConvergeReport {
    /// Whether cancellation left grant changes partially applied.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.url.as_ref().is_some_and(|url| url.grants.interrupted)
    }
}

/// Outcome of [`Deployer::diff`].
#[derive(Debug)]
pub struct DiffReport {
    /// Whether the function exists.
    pub exists: bool,
    /// Configuration diff.
    pub function_diff: String,
    /// Code digest diff, when requested.
    pub code_diff: Option<String>,
    /// Function URL configuration diff.
    pub url_diff: Option<String>,
    /// Grant changes.
    pub grant_plan: Option<ReconciliationPlan>,
    /// Why the definition cannot be applied, if it cannot.
    pub transition_error: Option<ControlError>,
    /// Why the code digest could not be compared, if it could not.
    pub code_error: Option<ControlError>,
}

impl DiffReport {
    /// Whether anything differs.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.function_diff.is_empty()
            || self.code_diff.as_ref().is_some_and(|d| !d.is_empty())
            || self.url_diff.as_ref().is_some_and(|d| !d.is_empty())
            || self.grant_plan.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Definitions reconstructed from live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedDefinitions {
    pub function: FunctionConfig,
    pub function_url: Option<FunctionUrlDefinition>,
}

/// Applies definitions through a [`ControlPlane`].
pub struct Deployer {
    client: Arc<dyn ControlPlane>,
    cancel: CancellationToken,
}

impl Deployer {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self::with_cancellation(client, CancellationToken::new())
    }

    pub fn with_cancellation(client: Arc<dyn ControlPlane>, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Run a remote call unless cancellation wins the race.
    async fn call<T>(
        &self,
        step: &'static str,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> ControlResult<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ControlError::Cancelled(step)),
            result = call => result.map_err(ControlError::from),
        }
    }

    /// Like [`Self::call`], mapping "not found" to `None`.
    async fn lookup<T>(
        &self,
        step: &'static str,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> ControlResult<Option<T>> {
        match self.call(step, call).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Grants currently in the function URL policy.
    pub async fn live_grants(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> ControlResult<GrantSet> {
        let policy = self
            .lookup("get policy", self.client.get_policy(function_name, qualifier))
            .await?;
        match policy {
            None => Ok(GrantSet::new()),
            Some(document) => {
                parse_live_policy(&document, INVOKE_URL_ACTION).map_err(|source| {
                    ControlError::Policy {
                        resource: qualified_name(function_name, qualifier),
                        source,
                    }
                })
            }
        }
    }

    /// Build or load the package off the async runtime. Returns its digest
    /// and bytes.
    async fn package(source: &CodeSource) -> ControlResult<(String, Vec<u8>)> {
        let source = source.clone();
        tokio::task::spawn_blocking(move || -> ControlResult<(String, Vec<u8>)> {
            let mut package = source.prepare()?;
            let digest = package.code_sha256()?;
            Ok((digest, package.into_bytes()?))
        })
        .await
        .map_err(|e| ControlError::internal(format!("packaging task failed: {e}")))?
    }

    /// Code payload for `config`: the image URI, or the packaged source.
    async fn payload(
        config: &FunctionConfig,
        source: Option<&CodeSource>,
    ) -> ControlResult<(Option<String>, CodePayload)> {
        match config.effective_package_type() {
            PackageType::Image => {
                let uri = config.image_uri().ok_or_else(|| {
                    ControlError::validation("PackageType Image requires Code.ImageUri")
                })?;
                Ok((None, CodePayload::Image(uri.to_owned())))
            }
            PackageType::Zip => {
                let source = source.ok_or_else(|| {
                    ControlError::validation("a code source is required for Zip functions")
                })?;
                let (digest, bytes) = Self::package(source).await?;
                Ok((Some(digest), CodePayload::Zip(bytes)))
            }
        }
    }

    /// Compare a definition with what is deployed, without changing anything.
    ///
    /// With `code` set the package digest is compared as well, which is only
    /// possible for zip functions. A definition that cannot be applied is
    /// reported in [`DiffReport::transition_error`] next to the diff, and a
    /// live package that cannot be digest-compared in
    /// [`DiffReport::code_error`].
    pub async fn diff(
        &self,
        desired: &DesiredState,
        code: Option<&CodeSource>,
    ) -> ControlResult<DiffReport> {
        let config = normalize(&desired.function);
        let name = config.function_name.as_str();
        let definition = desired.function_path.display().to_string();

        let live = self
            .lookup("get function", self.client.get_function(name))
            .await?;

        let mut report = DiffReport {
            exists: live.is_some(),
            function_diff: String::new(),
            code_diff: None,
            url_diff: None,
            grant_plan: None,
            transition_error: None,
            code_error: None,
        };

        match &live {
            Some(live) => {
                let labels = DiffLabels::new(&live.function_arn, &definition);
                report.function_diff = describe_diff(&config, &live.config, &labels)?;
                report.transition_error = validate_transition(&live.config, &config).err();

                if let Some(source) = code {
                    let live_type = live.config.effective_package_type();
                    let code_labels =
                        DiffLabels::new(&live.function_arn, source.path().display().to_string());
                    if live_type == PackageType::Zip {
                        let (digest, _) = Self::package(source).await?;
                        report.code_diff = Some(describe_code_diff(
                            &digest,
                            &live.code_sha256,
                            live_type,
                            &code_labels,
                        )?);
                    } else {
                        report.code_error =
                            describe_code_diff("", "", live_type, &code_labels).err();
                    }
                }
            }
            None => {
                let labels = DiffLabels::new(NOT_DEPLOYED, &definition);
                report.function_diff = diff_text("", &canonical_json(&config)?, &labels);
                report.transition_error = validate_transition(&config, &config).err();
            }
        }

        if let Some(url) = &desired.function_url {
            let url_definition = desired
                .function_url_path
                .as_ref()
                .map_or_else(|| "function_url".to_owned(), |p| p.display().to_string());
            let live_url = if live.is_some() {
                self.lookup(
                    "get function URL config",
                    self.client.get_url_config(name, url.qualifier()),
                )
                .await?
            } else {
                None
            };

            let desired_url = comparable(&url.config);
            report.url_diff = Some(match &live_url {
                Some(live_url) => diff_text(
                    &canonical_json(&comparable(&live_url.config))?,
                    &canonical_json(&desired_url)?,
                    &DiffLabels::new(&live_url.function_arn, &url_definition),
                ),
                None => diff_text(
                    "",
                    &canonical_json(&desired_url)?,
                    &DiffLabels::new(NOT_DEPLOYED, &url_definition),
                ),
            });

            let live_grants = if live.is_some() {
                self.live_grants(name, url.qualifier()).await?
            } else {
                GrantSet::new()
            };
            report.grant_plan = Some(reconcile(&url.grants, &live_grants)?);
        }

        Ok(report)
    }

    /// Bring the deployed function in line with `desired`.
    pub async fn converge(
        &self,
        desired: &DesiredState,
        options: &ConvergeOptions,
    ) -> ControlResult<ConvergeReport> {
        let config = normalize(&desired.function);
        let name = config.function_name.clone();
        info!(function = %name, dry_run = options.dry_run, "starting deployment");

        let mut report = ConvergeReport {
            function_name: name.clone(),
            function_arn: None,
            configuration: Change::Unchanged,
            diff: String::new(),
            tags: Change::Unchanged,
            code: Change::Unchanged,
            url: None,
            dry_run: options.dry_run,
        };

        let live = self
            .lookup("get function", self.client.get_function(&name))
            .await?;

        let exists = live.is_some();
        match live {
            None => self.create(&config, desired, options, &mut report).await?,
            Some(live) => self.update(&config, live, desired, options, &mut report).await?,
        }

        if let Some(url) = &desired.function_url {
            report.url = Some(if exists || !options.dry_run {
                self.deploy_function_url(url, options.dry_run).await?
            } else {
                // Nothing to look up yet; every grant is new.
                let plan = reconcile(&url.grants, &GrantSet::new())?;
                UrlReport {
                    config: Change::Planned,
                    function_url: None,
                    plan,
                    grants: ApplyReport {
                        dry_run: true,
                        ..ApplyReport::default()
                    },
                }
            });
        }

        info!(
            function = %name,
            configuration = ?report.configuration,
            code = ?report.code,
            interrupted = report.interrupted(),
            "deployment finished"
        );
        Ok(report)
    }

    async fn create(
        &self,
        config: &FunctionConfig,
        desired: &DesiredState,
        options: &ConvergeOptions,
        report: &mut ConvergeReport,
    ) -> ControlResult<()> {
        info!(function = %config.function_name, "function not found, creating");
        validate_transition(config, config)?;

        let labels = DiffLabels::new(NOT_DEPLOYED, desired.function_path.display().to_string());
        report.diff = diff_text("", &canonical_json(config)?, &labels);

        if options.dry_run {
            report.configuration = Change::Planned;
            report.code = Change::Planned;
            report.tags = if config.tags.is_some() {
                Change::Planned
            } else {
                Change::Unchanged
            };
            return Ok(());
        }

        let (_, payload) = Self::payload(config, options.source.as_ref()).await?;
        let created = self
            .call("create function", self.client.create_function(config, &payload))
            .await?;
        info!(function = %config.function_name, arn = %created.function_arn, "created function");

        report.function_arn = Some(created.function_arn);
        report.configuration = Change::Created;
        report.code = Change::Created;
        if config.tags.is_some() {
            report.tags = Change::Created;
        }
        Ok(())
    }

    async fn update(
        &self,
        config: &FunctionConfig,
        live: LiveFunction,
        desired: &DesiredState,
        options: &ConvergeOptions,
        report: &mut ConvergeReport,
    ) -> ControlResult<()> {
        let name = config.function_name.as_str();
        let labels = DiffLabels::new(&live.function_arn, desired.function_path.display().to_string());
        report.function_arn = Some(live.function_arn.clone());
        report.diff = describe_diff(config, &live.config, &labels)?;
        if !report.diff.is_empty() {
            info!(function = %name, "configuration diff:\n{}", report.diff);
        }
        validate_transition(&live.config, config)?;

        report.configuration = if report.diff.is_empty() {
            Change::Unchanged
        } else if options.dry_run {
            Change::Planned
        } else {
            self.call(
                "update configuration",
                self.client.update_configuration(config),
            )
            .await?;
            info!(function = %name, "updated configuration");
            Change::Updated
        };

        report.tags = self.update_tags(config, &live, options.dry_run).await?;
        report.code = self.update_code(config, &live, options).await?;
        Ok(())
    }

    async fn update_tags(
        &self,
        config: &FunctionConfig,
        live: &LiveFunction,
        dry_run: bool,
    ) -> ControlResult<Change> {
        let Some(desired) = &config.tags else {
            return Ok(Change::Unchanged);
        };
        let empty = BTreeMap::new();
        let current = live.config.tags.as_ref().unwrap_or(&empty);

        let set: BTreeMap<String, String> = desired
            .iter()
            .filter(|(k, v)| current.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove: Vec<String> = current
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned()
            .collect();

        if set.is_empty() && remove.is_empty() {
            return Ok(Change::Unchanged);
        }
        if dry_run {
            return Ok(Change::Planned);
        }
        if !set.is_empty() {
            self.call("tag function", self.client.tag_function(&live.function_arn, &set))
                .await?;
        }
        if !remove.is_empty() {
            self.call(
                "untag function",
                self.client.untag_function(&live.function_arn, &remove),
            )
            .await?;
        }
        info!(function = %config.function_name, set = set.len(), removed = remove.len(), "updated tags");
        Ok(Change::Updated)
    }

    async fn update_code(
        &self,
        config: &FunctionConfig,
        live: &LiveFunction,
        options: &ConvergeOptions,
    ) -> ControlResult<Change> {
        let name = config.function_name.as_str();
        let architectures_changed = config.architectures != live.config.architectures;

        if options.skip_code {
            if architectures_changed {
                warn!(function = %name, "architectures differ but code deployment is skipped");
            }
            return Ok(Change::Skipped);
        }
        if config.effective_package_type() == PackageType::Zip && options.source.is_none() {
            return Ok(Change::Skipped);
        }

        let (digest, payload) = Self::payload(config, options.source.as_ref()).await?;
        let code_changed = match (&digest, &payload) {
            (Some(digest), _) => *digest != live.code_sha256,
            (None, CodePayload::Image(uri)) => live.config.image_uri() != Some(uri.as_str()),
            (None, CodePayload::Zip(_)) => true,
        };
        if !code_changed && !architectures_changed {
            info!(function = %name, "code unchanged");
            return Ok(Change::Unchanged);
        }
        if options.dry_run {
            return Ok(Change::Planned);
        }

        let updated = self
            .call(
                "update code",
                self.client
                    .update_code(name, &payload, config.architectures.as_deref()),
            )
            .await?;
        info!(function = %name, code_sha256 = %updated.code_sha256, "updated code");
        Ok(Change::Updated)
    }

    /// Converge the URL configuration and its grants.
    pub async fn deploy_function_url(
        &self,
        url: &FunctionUrl,
        dry_run: bool,
    ) -> ControlResult<UrlReport> {
        let name = url.function_name.as_str();
        let resource = qualified_name(name, url.qualifier());
        info!(function_url = %resource, dry_run, "deploying function URL");

        let live = self
            .lookup(
                "get function URL config",
                self.client.get_url_config(name, url.qualifier()),
            )
            .await?;

        let (config, function_url) = match live {
            None if dry_run => (Change::Planned, None),
            None => {
                info!(function_url = %resource, "function URL config not found, creating");
                let created = self
                    .call(
                        "create function URL config",
                        self.client.create_url_config(name, &url.config),
                    )
                    .await?;
                info!(function_url = %resource, url = %created.function_url, "created function URL config");
                (Change::Created, Some(created.function_url))
            }
            Some(live) => self.update_url_config(url, live, dry_run).await?,
        };

        let live_grants = self.live_grants(name, url.qualifier()).await?;
        let plan = reconcile(&url.grants, &live_grants)?;
        if plan.is_empty() {
            info!(function_url = %resource, "no changes in grants");
        }

        let sink = UrlGrantSink::new(
            Arc::clone(&self.client),
            name,
            url.config.qualifier.clone(),
            url.auth_type(),
        );
        let mode = if dry_run {
            ApplyMode::DryRun
        } else {
            ApplyMode::Execute
        };
        let grants = apply(&plan, &sink, mode, &self.cancel).await?;

        Ok(UrlReport {
            config,
            function_url,
            plan,
            grants,
        })
    }

    async fn update_url_config(
        &self,
        url: &FunctionUrl,
        live: LiveUrlConfig,
        dry_run: bool,
    ) -> ControlResult<(Change, Option<String>)> {
        let mut desired = url.config.clone();
        if live.config.cors.is_some() && desired.cors.is_none() {
            // an empty block resets CORS
            desired.cors = Some(Cors::default());
        }

        if comparable(&live.config) == comparable(&desired) {
            return Ok((Change::Unchanged, Some(live.function_url)));
        }
        if dry_run {
            return Ok((Change::Planned, Some(live.function_url)));
        }

        let updated = self
            .call(
                "update function URL config",
                self.client.update_url_config(&url.function_name, &desired),
            )
            .await?;
        info!(
            function_url = %qualified_name(&url.function_name, url.qualifier()),
            url = %updated.function_url,
            "updated function URL config"
        );
        Ok((Change::Updated, Some(updated.function_url)))
    }

    /// Reconstruct definitions from what is deployed.
    pub async fn export(
        &self,
        function_name: &str,
        qualifier: Option<&str>,
    ) -> ControlResult<ExportedDefinitions> {
        let live = self
            .call("get function", self.client.get_function(function_name))
            .await?;

        let url = self
            .lookup(
                "get function URL config",
                self.client.get_url_config(function_name, qualifier),
            )
            .await?;
        let function_url = match url {
            None => {
                warn!(function = %function_name, "function URL config not found");
                None
            }
            Some(url) => {
                let grants = self.live_grants(function_name, qualifier).await?;
                Some(FunctionUrlDefinition {
                    config: Some(UrlConfig {
                        qualifier: qualifier.map(str::to_owned),
                        ..url.config
                    }),
                    permissions: grants.into_iter().collect(),
                })
            }
        };

        Ok(ExportedDefinitions {
            function: live.config,
            function_url,
        })
    }
}

/// URL settings as compared between desired and live: qualifier removed and
/// an empty CORS block treated as none.
fn comparable(config: &UrlConfig) -> UrlConfig {
    UrlConfig {
        qualifier: None,
        cors: config.cors.clone().filter(|cors| *cors != Cors::default()),
        ..config.clone()
    }
}
