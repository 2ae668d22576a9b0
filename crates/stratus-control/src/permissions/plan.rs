//! Reconciliation plans and their application.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{GrantSet, GrantStatement};
use crate::error::{ApplyError, ApplyPhase, ControlError, ControlResult, RemoteResult};
use crate::remote::{AddGrantRequest, ControlPlane};
use crate::url::AuthType;

/// Changes needed to turn a live grant set into the desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Desired grants missing from the live policy.
    pub to_add: Vec<GrantStatement>,
    /// Live grants no longer desired.
    pub to_remove: Vec<GrantStatement>,
}

impl ReconciliationPlan {
    /// Whether live already matches desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the identifier-set difference between `desired` and `live`.
pub fn reconcile(desired: &GrantSet, live: &GrantSet) -> ControlResult<ReconciliationPlan> {
    let desired_ids: BTreeSet<&str> = desired.ids().collect();
    let live_ids: BTreeSet<&str> = live.ids().collect();

    let to_add = desired_ids
        .difference(&live_ids)
        .map(|id| {
            desired.get(id).cloned().ok_or_else(|| {
                ControlError::internal(format!("grant {id} not found in desired set"))
            })
        })
        .collect::<ControlResult<Vec<_>>>()?;

    let to_remove = live_ids
        .difference(&desired_ids)
        .map(|id| {
            live.get(id)
                .cloned()
                .ok_or_else(|| ControlError::internal(format!("grant {id} not found in live set")))
        })
        .collect::<ControlResult<Vec<_>>>()?;

    Ok(ReconciliationPlan { to_add, to_remove })
}

/// Destination of grant changes.
#[async_trait]
pub trait GrantSink: Send + Sync {
    /// Resource the grants belong to, for logs and errors.
    fn resource(&self) -> String;

    async fn add(&self, grant: &GrantStatement) -> RemoteResult<()>;

    async fn remove(&self, statement_id: &str) -> RemoteResult<()>;
}

/// Whether [`apply`] performs the changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Execute,
    DryRun,
}

/// Outcome of [`apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Ids added, in order.
    pub added: Vec<String>,
    /// Ids removed, in order.
    pub removed: Vec<String>,
    /// Set when nothing was invoked because of dry-run mode.
    pub dry_run: bool,
    /// Set when cancellation stopped the run with changes still pending.
    pub interrupted: bool,
}

impl ApplyReport {
    /// Number of changes performed.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.added.len() + self.removed.len()
    }
}

/// Apply `plan` to `sink`: all additions first, then all removals.
///
/// The first failing call stops the run; changes made before it stay in
/// effect and the error names the failing statement. Cancellation between or
/// during calls stops the run with an interrupted report.
pub async fn apply(
    plan: &ReconciliationPlan,
    sink: &dyn GrantSink,
    mode: ApplyMode,
    cancel: &CancellationToken,
) -> Result<ApplyReport, ApplyError> {
    let resource = sink.resource();
    let mut report = ApplyReport {
        dry_run: mode == ApplyMode::DryRun,
        ..ApplyReport::default()
    };

    info!(
        resource = %resource,
        adds = plan.to_add.len(),
        removes = plan.to_remove.len(),
        dry_run = report.dry_run,
        "applying grant plan"
    );
    if report.dry_run {
        for grant in &plan.to_add {
            info!(sid = grant.id(), principal = %grant.content().principal, "would add grant");
        }
        for grant in &plan.to_remove {
            info!(sid = grant.id(), "would remove grant");
        }
        return Ok(report);
    }

    for grant in &plan.to_add {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = sink.add(grant) => Some(result),
        };
        match result {
            None => return Ok(interrupted(report, &resource)),
            Some(Err(source)) => {
                return Err(ApplyError {
                    phase: ApplyPhase::Add,
                    statement_id: grant.id().to_owned(),
                    applied: report.applied(),
                    resource,
                    source,
                })
            }
            Some(Ok(())) => {
                info!(resource = %resource, sid = grant.id(), "added grant");
                report.added.push(grant.id().to_owned());
            }
        }
    }

    for grant in &plan.to_remove {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = sink.remove(grant.id()) => Some(result),
        };
        match result {
            None => return Ok(interrupted(report, &resource)),
            Some(Err(source)) => {
                return Err(ApplyError {
                    phase: ApplyPhase::Remove,
                    statement_id: grant.id().to_owned(),
                    applied: report.applied(),
                    resource,
                    source,
                })
            }
            Some(Ok(())) => {
                info!(resource = %resource, sid = grant.id(), "removed grant");
                report.removed.push(grant.id().to_owned());
            }
        }
    }

    Ok(report)
}

fn interrupted(mut report: ApplyReport, resource: &str) -> ApplyReport {
    warn!(
        resource,
        applied = report.applied(),
        "cancelled, grant changes partially applied"
    );
    report.interrupted = true;
    report
}

/// Applies grants to a function URL through a [`ControlPlane`].
pub struct UrlGrantSink {
    client: Arc<dyn ControlPlane>,
    function_name: String,
    qualifier: Option<String>,
    auth_type: AuthType,
}

impl UrlGrantSink {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        function_name: impl Into<String>,
        qualifier: Option<String>,
        auth_type: AuthType,
    ) -> Self {
        Self {
            client,
            function_name: function_name.into(),
            qualifier,
            auth_type,
        }
    }
}

#[async_trait]
impl GrantSink for UrlGrantSink {
    fn resource(&self) -> String {
        crate::qualified_name(&self.function_name, self.qualifier.as_deref())
    }

    async fn add(&self, grant: &GrantStatement) -> RemoteResult<()> {
        let content = grant.content();
        let request = AddGrantRequest {
            function_name: self.function_name.clone(),
            qualifier: self.qualifier.clone(),
            statement_id: grant.id().to_owned(),
            action: content.action.clone(),
            principal: content.principal.clone(),
            principal_org_id: content.principal_org_id.clone(),
            source_arn: content.source_arn.clone(),
            source_account: content.source_account.clone(),
            function_url_auth_type: Some(self.auth_type),
        };
        self.client.add_grant(&request).await
    }

    async fn remove(&self, statement_id: &str) -> RemoteResult<()> {
        self.client
            .remove_grant(&self.function_name, self.qualifier.as_deref(), statement_id)
            .await
    }
}
