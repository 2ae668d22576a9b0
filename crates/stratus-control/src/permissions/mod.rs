//! Resource policy grants and their reconciliation.
//!
//! Grants are matched by identifier rather than by position. A grant without
//! an explicit statement id gets one derived from its content, so two grants
//! with the same content always share an id and an unchanged grant is never
//! removed and re-added.
//!
//! ```text
//! function_url.json ──▶ GrantSet (desired) ─┐
//!                                            ├─▶ reconcile ─▶ plan ─▶ apply (adds, then removes)
//! live policy JSON ───▶ GrantSet (live) ────┘
//! ```

mod plan;
mod policy;

pub use plan::{apply, reconcile, ApplyMode, ApplyReport, GrantSink, ReconciliationPlan, UrlGrantSink};
pub use policy::{canonical_principal, parse_live_policy, PolicyDocument, PolicyStatement};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};

/// Action granted for function URL invocation.
pub const INVOKE_URL_ACTION: &str = "lambda:InvokeFunctionUrl";

/// Only `Allow` statements are managed.
pub const ALLOW: &str = "Allow";

/// Prefix of content-derived statement ids.
pub const STATEMENT_ID_PREFIX: &str = "stratus-";

/// Principal that matches any caller.
pub const WILDCARD_PRINCIPAL: &str = "*";

/// The fields of a grant that determine its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantContent {
    /// Canonical principal: `*`, an account id, a service name or an ARN.
    pub principal: String,
    /// Organization the caller must belong to.
    pub principal_org_id: Option<String>,
    /// ARN the request must originate from.
    pub source_arn: Option<String>,
    /// Account the request must originate from.
    pub source_account: Option<String>,
    pub action: String,
    pub effect: String,
}

impl GrantContent {
    /// Grant for `principal` with the default action and effect.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            principal_org_id: None,
            source_arn: None,
            source_account: None,
            action: INVOKE_URL_ACTION.to_owned(),
            effect: ALLOW.to_owned(),
        }
    }

    /// Grant that allows any caller.
    #[must_use]
    pub fn wildcard() -> Self {
        Self::new(WILDCARD_PRINCIPAL)
    }

    /// Content-derived statement id.
    ///
    /// The content is rendered as JSON with sorted keys and unset fields
    /// omitted, then hashed with SHA-1.
    #[must_use]
    pub fn derived_id(&self) -> String {
        let mut fields = Map::new();
        fields.insert("Action".to_owned(), Value::from(self.action.as_str()));
        fields.insert("Effect".to_owned(), Value::from(self.effect.as_str()));
        fields.insert("Principal".to_owned(), Value::from(self.principal.as_str()));
        let optional = [
            ("PrincipalOrgID", &self.principal_org_id),
            ("SourceAccount", &self.source_account),
            ("SourceArn", &self.source_arn),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key.to_owned(), Value::from(value.as_str()));
            }
        }

        // serde_json maps are ordered by key
        let canonical = Value::Object(fields).to_string();
        let digest = Sha1::digest(canonical.as_bytes());
        format!("{STATEMENT_ID_PREFIX}{}", hex::encode(digest))
    }
}

/// One grant of a resource policy.
///
/// The identifier is fixed at construction: an explicit id is kept as is,
/// otherwise it is derived from the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GrantFields", into = "GrantFields")]
pub struct GrantStatement {
    id: String,
    explicit_id: bool,
    content: GrantContent,
}

impl GrantStatement {
    /// Grant with a content-derived id.
    #[must_use]
    pub fn new(content: GrantContent) -> Self {
        Self {
            id: content.derived_id(),
            explicit_id: false,
            content,
        }
    }

    /// Grant with an explicit id.
    pub fn with_id(id: impl Into<String>, content: GrantContent) -> Self {
        Self {
            id: id.into(),
            explicit_id: true,
            content,
        }
    }

    /// Statement identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the identifier was supplied rather than derived.
    #[must_use]
    pub fn has_explicit_id(&self) -> bool {
        self.explicit_id
    }

    /// Identity-determining fields.
    #[must_use]
    pub fn content(&self) -> &GrantContent {
        &self.content
    }
}

/// On-disk shape of a grant in `function_url.json`.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GrantFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    statement_id: Option<String>,
    principal: Value,
    #[serde(
        rename = "PrincipalOrgID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    principal_org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    effect: Option<String>,
}

impl TryFrom<GrantFields> for GrantStatement {
    type Error = String;

    fn try_from(fields: GrantFields) -> Result<Self, Self::Error> {
        let principal = canonical_principal(&fields.principal)
            .ok_or_else(|| format!("unsupported Principal: {}", fields.principal))?;
        let content = GrantContent {
            principal,
            principal_org_id: fields.principal_org_id,
            source_arn: fields.source_arn,
            source_account: fields.source_account,
            action: fields.action.unwrap_or_else(|| INVOKE_URL_ACTION.to_owned()),
            effect: fields.effect.unwrap_or_else(|| ALLOW.to_owned()),
        };
        Ok(match fields.statement_id {
            Some(id) if !id.is_empty() => Self::with_id(id, content),
            _ => Self::new(content),
        })
    }
}

impl From<GrantStatement> for GrantFields {
    fn from(grant: GrantStatement) -> Self {
        let GrantStatement {
            id,
            explicit_id,
            content,
        } = grant;
        Self {
            statement_id: explicit_id.then_some(id),
            principal: Value::String(content.principal),
            principal_org_id: content.principal_org_id,
            source_arn: content.source_arn,
            source_account: content.source_account,
            action: (content.action != INVOKE_URL_ACTION).then_some(content.action),
            effect: (content.effect != ALLOW).then_some(content.effect),
        }
    }
}

/// Grants keyed by statement id.
///
/// Inserting a grant whose id is already present replaces the earlier one,
/// which collapses content-identical unnamed grants into a single entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantSet(BTreeMap<String, GrantStatement>);

impl GrantSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a grant, returning the one it replaced.
    pub fn insert(&mut self, grant: GrantStatement) -> Option<GrantStatement> {
        self.0.insert(grant.id().to_owned(), grant)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&GrantStatement> {
        self.0.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    /// Statement ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Grants in id order.
    pub fn iter(&self) -> impl Iterator<Item = &GrantStatement> {
        self.0.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<GrantStatement> for GrantSet {
    fn from_iter<I: IntoIterator<Item = GrantStatement>>(iter: I) -> Self {
        let mut set = Self::new();
        for grant in iter {
            set.insert(grant);
        }
        set
    }
}

impl IntoIterator for GrantSet {
    type Item = GrantStatement;
    type IntoIter = std::collections::btree_map::IntoValues<String, GrantStatement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn derived_id_is_tagged_sha1_hex() {
        let grant = GrantStatement::new(GrantContent::wildcard());
        let id = grant.id();
        assert!(id.starts_with(STATEMENT_ID_PREFIX));
        assert_eq!(id.len(), STATEMENT_ID_PREFIX.len() + 40);
        assert!(id[STATEMENT_ID_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(!grant.has_explicit_id());
    }

    #[test]
    fn explicit_id_wins() {
        let grant = GrantStatement::with_id("allow-public", GrantContent::wildcard());
        assert_eq!(grant.id(), "allow-public");
        assert!(grant.has_explicit_id());
    }

    #[test]
    fn content_changes_change_the_id() {
        let base = GrantContent::wildcard();
        let mut scoped = base.clone();
        scoped.principal_org_id = Some("o-abc123".to_owned());
        assert_ne!(base.derived_id(), scoped.derived_id());
    }

    #[test]
    fn field_order_in_file_does_not_matter() {
        let a: GrantStatement = serde_json::from_str(
            r#"{"Principal": "*", "PrincipalOrgID": "o-1", "SourceArn": "arn:x"}"#,
        )
        .unwrap();
        let b: GrantStatement = serde_json::from_str(
            r#"{"SourceArn": "arn:x", "PrincipalOrgID": "o-1", "Principal": "*"}"#,
        )
        .unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn structured_principal_is_canonicalised() {
        let grant: GrantStatement = serde_json::from_str(
            r#"{"Principal": {"AWS": "arn:aws:iam::123456789012:root"}}"#,
        )
        .unwrap();
        assert_eq!(grant.content().principal, "123456789012");
    }

    #[test]
    fn derived_ids_are_not_written_back() {
        let grant = GrantStatement::new(GrantContent::new("123456789012"));
        let value = serde_json::to_value(&grant).unwrap();
        assert_eq!(value, serde_json::json!({"Principal": "123456789012"}));

        let named = GrantStatement::with_id("sid-1", GrantContent::new("123456789012"));
        let value = serde_json::to_value(&named).unwrap();
        assert_eq!(value["StatementId"], "sid-1");

        let back: GrantStatement = serde_json::from_value(value).unwrap();
        assert_eq!(back, named);
    }

    #[test]
    fn identical_unnamed_grants_collapse() {
        let set: GrantSet = [
            GrantStatement::new(GrantContent::wildcard()),
            GrantStatement::new(GrantContent::wildcard()),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 1);
    }

    fn optional_text() -> impl Strategy<Value = Option<String>> {
        proptest::option::of("[a-z0-9:-]{1,24}")
    }

    proptest! {
        #[test]
        fn id_depends_only_on_content(
            principal in "[*a-z0-9.]{1,20}",
            org in optional_text(),
            arn in optional_text(),
            account in optional_text(),
        ) {
            let mut forward = Map::new();
            forward.insert("Principal".to_owned(), Value::from(principal.clone()));
            if let Some(org) = &org {
                forward.insert("PrincipalOrgID".to_owned(), Value::from(org.clone()));
            }
            if let Some(arn) = &arn {
                forward.insert("SourceArn".to_owned(), Value::from(arn.clone()));
            }
            if let Some(account) = &account {
                forward.insert("SourceAccount".to_owned(), Value::from(account.clone()));
            }

            // Build the same document with keys emitted in reverse order.
            let reversed: String = {
                let pairs: Vec<String> = forward
                    .iter()
                    .rev()
                    .map(|(k, v)| format!("{}:{}", Value::from(k.as_str()), v))
                    .collect();
                format!("{{{}}}", pairs.join(","))
            };

            let a: GrantStatement = serde_json::from_value(Value::Object(forward)).unwrap();
            let b: GrantStatement = serde_json::from_str(&reversed).unwrap();
            prop_assert_eq!(a.id(), b.id());

            let direct = GrantStatement::new(GrantContent {
                principal,
                principal_org_id: org,
                source_arn: arn,
                source_account: account,
                ..GrantContent::new("")
            });
            prop_assert_eq!(a.id(), direct.id());
        }
    }
}
