//! Rendering of definition files.
//!
//! Definition files are JSON with `{{ ... }}` placeholders:
//!
//! - `{{ env "NAME" }}` / `{{ env "NAME" "default" }}`: environment variable,
//!   falling back to the default when unset or empty
//! - `{{ must_env "NAME" }}`: environment variable, an error when unset
//! - `{{ caller_identity.Account }}` (also `Arn`, `UserId`)
//!
//! Substituted values are JSON-string escaped, so placeholders belong inside
//! string literals.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::identity::{CallerIdentityCache, IdentityError};

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").ok());

static QUOTED: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""(?:[^"\\]|\\.)*""#).ok());

const IDENTITY_PREFIX: &str = "caller_identity.";

/// Errors raised while rendering a definition file.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: invalid expression `{expression}`: {message}")]
    Syntax {
        path: PathBuf,
        expression: String,
        message: String,
    },

    #[error("{path}: environment variable {name} is not set")]
    MissingEnv { path: PathBuf, name: String },

    #[error("{path}: {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: IdentityError,
    },

    #[error("{path}: rendered document is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Turns a definition file into a structured document.
#[async_trait]
pub trait TemplateEvaluator: Send + Sync {
    async fn evaluate(&self, path: &Path) -> Result<Value, TemplateError>;
}

type EnvLookup = dyn Fn(&str) -> Option<String> + Send + Sync;

/// JSON with `{{ }}` placeholders.
#[derive(Clone)]
pub struct JsonTemplate {
    env: Arc<EnvLookup>,
    identity: Arc<CallerIdentityCache>,
}

impl std::fmt::Debug for JsonTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonTemplate")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

enum Expression {
    Env { name: String, default: String },
    MustEnv(String),
    Identity(String),
}

impl JsonTemplate {
    /// Template reading the process environment.
    pub fn new(identity: Arc<CallerIdentityCache>) -> Self {
        Self::with_env(identity, |name| std::env::var(name).ok())
    }

    /// Template with a custom environment lookup.
    pub fn with_env<F>(identity: Arc<CallerIdentityCache>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            env: Arc::new(env),
            identity,
        }
    }

    /// Render `source` read from `path`.
    pub async fn render(&self, path: &Path, source: &str) -> Result<String, TemplateError> {
        let placeholder = PLACEHOLDER.as_ref().ok_or_else(|| TemplateError::Syntax {
            path: path.to_owned(),
            expression: String::new(),
            message: "placeholder pattern unavailable".to_owned(),
        })?;

        let mut rendered = String::with_capacity(source.len());
        let mut last = 0;
        for captures in placeholder.captures_iter(source) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            rendered.push_str(&source[last..whole.start()]);
            let value = self.value(path, parse(path, inner.as_str())?).await?;
            rendered.push_str(&escape(&value));
            last = whole.end();
        }
        rendered.push_str(&source[last..]);
        Ok(rendered)
    }

    async fn value(&self, path: &Path, expression: Expression) -> Result<String, TemplateError> {
        match expression {
            Expression::Env { name, default } => Ok((self.env)(&name)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)),
            Expression::MustEnv(name) => {
                (self.env)(&name).ok_or_else(|| TemplateError::MissingEnv {
                    path: path.to_owned(),
                    name,
                })
            }
            Expression::Identity(field) => {
                let identity = self
                    .identity
                    .get()
                    .await
                    .map_err(|source| TemplateError::Identity {
                        path: path.to_owned(),
                        source,
                    })?;
                identity
                    .field(&field)
                    .map(str::to_owned)
                    .ok_or_else(|| TemplateError::Syntax {
                        path: path.to_owned(),
                        expression: format!("{IDENTITY_PREFIX}{field}"),
                        message: "unknown caller identity field".to_owned(),
                    })
            }
        }
    }
}

/// Escape `value` for inclusion inside a JSON string literal.
fn escape(value: &str) -> String {
    let quoted = Value::from(value).to_string();
    quoted[1..quoted.len() - 1].to_owned()
}

fn parse(path: &Path, expression: &str) -> Result<Expression, TemplateError> {
    let syntax = |message: &str| TemplateError::Syntax {
        path: path.to_owned(),
        expression: expression.to_owned(),
        message: message.to_owned(),
    };

    if let Some(field) = expression.strip_prefix(IDENTITY_PREFIX) {
        return Ok(Expression::Identity(field.trim().to_owned()));
    }

    let (function, rest) = expression
        .split_once(char::is_whitespace)
        .unwrap_or((expression, ""));
    let quoted = QUOTED
        .as_ref()
        .ok_or_else(|| syntax("argument pattern unavailable"))?;
    let args = quoted
        .find_iter(rest)
        .map(|m| serde_json::from_str::<String>(m.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| syntax("arguments must be double-quoted strings"))?;

    match (function, args.as_slice()) {
        ("env", [name]) => Ok(Expression::Env {
            name: name.clone(),
            default: String::new(),
        }),
        ("env", [name, default]) => Ok(Expression::Env {
            name: name.clone(),
            default: default.clone(),
        }),
        ("env", _) => Err(syntax("env takes a name and an optional default")),
        ("must_env", [name]) => Ok(Expression::MustEnv(name.clone())),
        ("must_env", _) => Err(syntax("must_env takes exactly one name")),
        _ => Err(syntax("unknown function")),
    }
}

#[async_trait]
impl TemplateEvaluator for JsonTemplate {
    async fn evaluate(&self, path: &Path) -> Result<Value, TemplateError> {
        debug!(path = %path.display(), "rendering definition");
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TemplateError::Read {
                path: path.to_owned(),
                source,
            })?;
        let rendered = self.render(path, &source).await?;
        serde_json::from_str(&rendered).map_err(|source| TemplateError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}
