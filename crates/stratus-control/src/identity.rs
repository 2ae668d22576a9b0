//! Caller identity available to definition templates.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

/// Who is running the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallerIdentity {
    #[serde(alias = "account")]
    pub account: String,
    #[serde(alias = "arn")]
    pub arn: String,
    #[serde(alias = "user_id")]
    pub user_id: String,
}

impl CallerIdentity {
    /// Look up a field by its template name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "Account" => Some(&self.account),
            "Arn" => Some(&self.arn),
            "UserId" => Some(&self.user_id),
            _ => None,
        }
    }
}

/// Caller identity could not be determined.
#[derive(Debug, thiserror::Error)]
#[error("failed to resolve caller identity: {0}")]
pub struct IdentityError(pub String);

/// Source of the caller identity.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self) -> Result<CallerIdentity, IdentityError>;
}

/// Identity fixed by configuration.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub CallerIdentity);

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self) -> Result<CallerIdentity, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Resolver used when no identity is configured. Fails only if a template
/// actually asks for the identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

#[async_trait]
impl IdentityResolver for Unconfigured {
    async fn resolve(&self) -> Result<CallerIdentity, IdentityError> {
        Err(IdentityError(
            "no caller identity configured, set [identity] in stratus.toml".to_owned(),
        ))
    }
}

/// Resolves the caller identity at most once per run.
pub struct CallerIdentityCache {
    resolver: Arc<dyn IdentityResolver>,
    cell: OnceCell<CallerIdentity>,
}

impl CallerIdentityCache {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            resolver,
            cell: OnceCell::new(),
        }
    }

    /// The identity, resolving it on first use. A failed resolution is not
    /// cached.
    pub async fn get(&self) -> Result<&CallerIdentity, IdentityError> {
        self.cell
            .get_or_try_init(|| async {
                debug!("resolving caller identity");
                self.resolver.resolve().await
            })
            .await
    }
}

impl std::fmt::Debug for CallerIdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerIdentityCache")
            .field("resolved", &self.cell.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl IdentityResolver for Counting {
        async fn resolve(&self) -> Result<CallerIdentity, IdentityError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(CallerIdentity {
                account: "123456789012".to_owned(),
                arn: "arn:aws:iam::123456789012:user/deployer".to_owned(),
                user_id: "AIDAEXAMPLE".to_owned(),
            })
        }
    }

    #[tokio::test]
    async fn resolves_once() {
        let resolver = Arc::new(Counting(AtomicUsize::new(0)));
        let cache = CallerIdentityCache::new(resolver.clone());

        let first = cache.get().await.unwrap().account.clone();
        let second = cache.get().await.unwrap().account.clone();
        assert_eq!(first, second);
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_identity_fails_on_use() {
        let cache = CallerIdentityCache::new(Arc::new(Unconfigured));
        assert!(cache.get().await.is_err());
    }

    #[test]
    fn fields_by_template_name() {
        let identity = CallerIdentity {
            account: "1".to_owned(),
            arn: "2".to_owned(),
            user_id: "3".to_owned(),
        };
        assert_eq!(identity.field("Account"), Some("1"));
        assert_eq!(identity.field("UserId"), Some("3"));
        assert_eq!(identity.field("Region"), None);
    }
}
