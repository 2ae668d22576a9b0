//! Desired versus live comparison.

use serde::Serialize;
use similar::TextDiff;

use crate::error::{ControlError, ControlResult};
use crate::function::{FunctionConfig, PackageType};

/// Context lines around each change.
const CONTEXT_RADIUS: usize = 3;

/// Headers for the two sides of a diff.
#[derive(Debug, Clone)]
pub struct DiffLabels {
    /// Live side, usually the function ARN.
    pub live: String,
    /// Desired side, usually the definition file path.
    pub desired: String,
}

impl DiffLabels {
    pub fn new(live: impl Into<String>, desired: impl Into<String>) -> Self {
        Self {
            live: live.into(),
            desired: desired.into(),
        }
    }
}

/// Render `value` as pretty JSON with object keys in sorted order.
///
/// Going through [`serde_json::Value`] sorts every map, so struct field order
/// and insertion order never show up in a diff.
pub fn canonical_json<T: Serialize>(value: &T) -> ControlResult<String> {
    let value = serde_json::to_value(value)?;
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    Ok(text)
}

/// Unified diff of two texts, empty when they are equal.
pub fn diff_text(before: &str, after: &str, labels: &DiffLabels) -> String {
    if before == after {
        return String::new();
    }
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(CONTEXT_RADIUS)
        .header(&labels.live, &labels.desired)
        .to_string()
}

/// Line diff from `live` to `desired`. Empty means no drift.
///
/// `desired` is expected to be normalized. When it leaves tags unset, tags
/// are not managed and live tags are ignored.
pub fn describe_diff(
    desired: &FunctionConfig,
    live: &FunctionConfig,
    labels: &DiffLabels,
) -> ControlResult<String> {
    let live = if desired.tags.is_none() && live.tags.is_some() {
        let mut live = live.clone();
        live.tags = None;
        canonical_json(&live)?
    } else {
        canonical_json(live)?
    };
    let desired = canonical_json(desired)?;
    Ok(diff_text(&live, &desired, labels))
}

/// One-line diff of package digests.
///
/// Code hashes are only comparable for zip packages; any other live package
/// type is rejected.
pub fn describe_code_diff(
    local: &str,
    remote: &str,
    live_package_type: PackageType,
    labels: &DiffLabels,
) -> ControlResult<String> {
    if live_package_type != PackageType::Zip {
        return Err(ControlError::validation(format!(
            "code digest comparison is only supported for Zip packages, {} has package type {}",
            labels.live,
            live_package_type.as_str()
        )));
    }
    let before = format!("CodeSha256: {remote}\n");
    let after = format!("CodeSha256: {local}\n");
    Ok(diff_text(&before, &after, labels))
}

/// Check that `desired` can be applied on top of `live`.
///
/// Every violated rule is reported, not only the first.
pub fn validate_transition(live: &FunctionConfig, desired: &FunctionConfig) -> ControlResult<()> {
    let mut violations = Vec::new();

    if live.function_name != desired.function_name {
        violations.push(format!(
            "FunctionName cannot change from {} to {}",
            live.function_name, desired.function_name
        ));
    }

    let live_type = live.effective_package_type();
    let desired_type = desired.effective_package_type();
    if live_type != desired_type {
        violations.push(format!(
            "PackageType cannot change from {} to {}",
            live_type.as_str(),
            desired_type.as_str()
        ));
    }

    match desired_type {
        PackageType::Image => {
            if desired.image_uri().is_none() {
                violations.push("PackageType Image requires Code.ImageUri".to_owned());
            }
        }
        PackageType::Zip => {
            if desired.runtime.is_none() {
                violations.push("PackageType Zip requires Runtime".to_owned());
            }
            if desired.handler.is_none() {
                violations.push("PackageType Zip requires Handler".to_owned());
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ControlError::InvalidTransition {
            function: desired.function_name.clone(),
            violations,
        })
    }
}
