//! Desired-state reconciliation for serverless functions.
//!
//! Definitions are JSON documents rendered through [`template`]. The
//! [`orchestrator::Deployer`] compares them with what the control plane
//! reports and applies the difference:
//!
//! - **Configuration**: normalized ([`normalize`]) and diffed ([`diff`])
//!   before any update, so a redeploy with no changes makes no writes
//! - **Code**: uploaded only when the package digest changed
//! - **Function URL**: settings plus invoke grants ([`permissions`]), where
//!   unnamed grants get statement ids derived from their content
//!
//! ```text
//! function.json ──▶ template ──▶ FunctionConfig ──▶ normalize ──┐
//!                                                               ▼
//!                               ControlPlane ◀── Deployer ◀── diff
//!                            (HTTP or memory)        │
//!                                                    ▼
//! function_url.json ─▶ FunctionUrl ─▶ GrantSet ─▶ reconcile ─▶ apply
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod definition;
pub mod diff;
pub mod error;
pub mod function;
pub mod identity;
pub mod normalize;
pub mod orchestrator;
pub mod permissions;
pub mod remote;
pub mod template;
pub mod url;

pub use config::StratusConfig;
pub use diff::{describe_code_diff, describe_diff, validate_transition, DiffLabels};
pub use error::{ApplyError, ControlError, ControlResult, RemoteError, RemoteResult};
pub use function::{Architecture, FunctionConfig, LiveFunction, PackageType};
pub use normalize::normalize;
pub use orchestrator::{
    Change, ConvergeOptions, ConvergeReport, Deployer, DesiredState, DiffReport,
    ExportedDefinitions, UrlReport,
};
pub use permissions::{GrantContent, GrantSet, GrantStatement, ReconciliationPlan};
pub use remote::{ControlPlane, HttpControlPlane, MemoryControlPlane};
pub use url::{AuthType, FunctionUrl, FunctionUrlDefinition, UrlConfig};

/// `name`, or `name:qualifier` when a qualifier is given.
#[must_use]
pub fn qualified_name(name: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(qualifier) => format!("{name}:{qualifier}"),
        None => name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualifier_is_appended() {
        assert_eq!(qualified_name("hello", None), "hello");
        assert_eq!(qualified_name("hello", Some("live")), "hello:live");
    }
}
