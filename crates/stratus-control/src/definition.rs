//! Reading and writing definition files.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::{ControlError, ControlResult};
use crate::function::FunctionConfig;
use crate::template::TemplateEvaluator;
use crate::url::{FunctionUrl, FunctionUrlDefinition};

/// Candidate names of the function definition.
pub const FUNCTION_FILES: &[&str] = &["function.json"];

/// Candidate names of the function URL definition.
pub const FUNCTION_URL_FILES: &[&str] = &["function_url.json"];

/// Resolve a definition path: the explicit one if given, otherwise the first
/// default name that exists in `dir`.
pub fn find_definition(
    explicit: Option<&Path>,
    dir: &Path,
    defaults: &[&str],
) -> ControlResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_owned());
    }
    defaults
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ControlError::validation(format!(
                "no definition file found in {}, tried {}",
                dir.display(),
                defaults.join(", ")
            ))
        })
}

async fn load<T: DeserializeOwned>(
    evaluator: &dyn TemplateEvaluator,
    path: &Path,
) -> ControlResult<T> {
    let document = evaluator.evaluate(path).await?;
    serde_json::from_value(document).map_err(|e| ControlError::Definition {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

/// Render and decode a function definition.
pub async fn load_function(
    evaluator: &dyn TemplateEvaluator,
    path: &Path,
) -> ControlResult<FunctionConfig> {
    let config: FunctionConfig = load(evaluator, path).await?;
    if config.function_name.is_empty() {
        return Err(ControlError::Definition {
            path: path.to_owned(),
            message: "FunctionName is required".to_owned(),
        });
    }
    Ok(config)
}

/// Render, decode and validate a function URL definition for `function_name`.
pub async fn load_function_url(
    evaluator: &dyn TemplateEvaluator,
    path: &Path,
    function_name: &str,
) -> ControlResult<FunctionUrl> {
    let definition: FunctionUrlDefinition = load(evaluator, path).await?;
    definition.validate(function_name)
}

/// Write `value` as pretty JSON. An existing file is only replaced when
/// `force` is set.
pub fn write_definition<T: Serialize>(path: &Path, value: &T, force: bool) -> ControlResult<()> {
    if path.exists() && !force {
        return Err(ControlError::AlreadyExists(path.to_owned()));
    }
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    std::fs::write(path, text)?;
    info!(path = %path.display(), "wrote definition");
    Ok(())
}
