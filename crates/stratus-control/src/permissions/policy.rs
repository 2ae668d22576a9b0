//! Parsing of live resource policy documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::{GrantContent, GrantSet, GrantStatement, ALLOW, WILDCARD_PRINCIPAL};

const AUTH_TYPE_CONDITION: &str = "lambda:FunctionUrlAuthType";
const ORG_ID_CONDITION: &str = "aws:PrincipalOrgID";
const SOURCE_ARN_CONDITION: &str = "aws:SourceArn";
const SOURCE_ACCOUNT_CONDITION: &str = "aws:SourceAccount";

/// A resource policy as returned by the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub statement: Vec<PolicyStatement>,
}

/// One statement of a [`PolicyDocument`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub principal: Value,
    #[serde(default)]
    pub action: Value,
    #[serde(default)]
    pub resource: Value,
    #[serde(default)]
    pub condition: Value,
}

impl PolicyStatement {
    fn grants_action(&self, action: &str) -> bool {
        match &self.action {
            Value::String(a) => a == action,
            Value::Array(actions) => actions.iter().any(|a| a.as_str() == Some(action)),
            _ => false,
        }
    }

    fn condition_value(&self, operator: &str, key: &str) -> Option<&str> {
        let block = self.condition.get(operator)?.as_object()?;
        lookup_ignore_case(block, key)?.as_str()
    }

    /// Organization constraint. Only meaningful on wildcard grants made for
    /// IAM-authenticated function URLs.
    fn principal_org_id(&self, principal: &str) -> Option<String> {
        if principal != WILDCARD_PRINCIPAL {
            return None;
        }
        if self.condition_value("StringEquals", AUTH_TYPE_CONDITION)? != "AWS_IAM" {
            return None;
        }
        self.condition_value("StringEquals", ORG_ID_CONDITION)
            .map(str::to_owned)
    }

    fn source_arn(&self) -> Option<String> {
        self.condition_value("ArnLike", SOURCE_ARN_CONDITION)
            .map(str::to_owned)
    }

    fn source_account(&self) -> Option<String> {
        self.condition_value("StringEquals", SOURCE_ACCOUNT_CONDITION)
            .map(str::to_owned)
    }

    /// Convert to a grant for `action`, keeping the statement's own id.
    fn to_grant(&self, action: &str) -> Option<GrantStatement> {
        let principal = canonical_principal(&self.principal)?;
        let content = GrantContent {
            principal_org_id: self.principal_org_id(&principal),
            source_arn: self.source_arn(),
            source_account: self.source_account(),
            action: action.to_owned(),
            effect: self.effect.clone(),
            principal,
        };
        Some(GrantStatement::with_id(self.sid.clone(), content))
    }
}

fn lookup_ignore_case<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// Account id of an ARN such as `arn:aws:iam::123456789012:root`.
fn arn_account(arn: &str) -> Option<&str> {
    let mut parts = arn.splitn(6, ':');
    if parts.next()? != "arn" {
        return None;
    }
    let account = parts.nth(3)?;
    // the resource part must exist for this to be an ARN
    parts.next()?;
    (!account.is_empty()).then_some(account)
}

/// Reduce a policy principal to a single string.
///
/// A plain string is kept. `{"AWS": arn}` becomes the ARN's account id (or
/// the raw value when it is not an ARN) and `{"Service": name}` becomes the
/// service name. Anything else has no canonical form.
#[must_use]
pub fn canonical_principal(principal: &Value) -> Option<String> {
    match principal {
        Value::String(s) => Some(s.clone()),
        Value::Object(block) => {
            if let Some(aws) = block.get("AWS") {
                let aws = aws.as_str()?;
                Some(arn_account(aws).unwrap_or(aws).to_owned())
            } else {
                block.get("Service")?.as_str().map(str::to_owned)
            }
        }
        _ => None,
    }
}

/// Extract the `Allow` grants for `action` from a policy document.
///
/// Statements for other actions or effects, and statements whose principal
/// cannot be reduced to a string, are skipped.
pub fn parse_live_policy(document: &str, action: &str) -> Result<GrantSet, serde_json::Error> {
    let policy: PolicyDocument = serde_json::from_str(document)?;

    let mut grants = GrantSet::new();
    for statement in &policy.statement {
        if statement.effect != ALLOW || !statement.grants_action(action) {
            continue;
        }
        match statement.to_grant(action) {
            Some(grant) => {
                debug!(sid = %statement.sid, principal = %grant.content().principal, "live grant");
                grants.insert(grant);
            }
            None => debug!(sid = %statement.sid, "skipping statement with unsupported principal"),
        }
    }
    Ok(grants)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::permissions::INVOKE_URL_ACTION;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!("*"), Some("*"))]
    #[case(json!({"AWS": "arn:aws:iam::123456789012:root"}), Some("123456789012"))]
    #[case(json!({"AWS": "123456789012"}), Some("123456789012"))]
    #[case(json!({"Service": "elasticloadbalancing.amazonaws.com"}), Some("elasticloadbalancing.amazonaws.com"))]
    #[case(json!({"Federated": "cognito-identity.amazonaws.com"}), None)]
    #[case(json!(["*"]), None)]
    fn principals(#[case] principal: Value, #[case] expected: Option<&str>) {
        assert_eq!(canonical_principal(&principal).as_deref(), expected);
    }

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Id": "default",
        "Statement": [
            {
                "Sid": "public",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "lambda:InvokeFunctionUrl",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:hello",
                "Condition": {"StringEquals": {"lambda:FunctionUrlAuthType": "NONE"}}
            },
            {
                "Sid": "org",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "lambda:InvokeFunctionUrl",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:hello",
                "Condition": {"StringEquals": {
                    "lambda:FunctionUrlAuthType": "AWS_IAM",
                    "AWS:PrincipalOrgID": "o-abc123"
                }}
            },
            {
                "Sid": "account",
                "Effect": "Allow",
                "Principal": {"AWS": "arn:aws:iam::210987654321:root"},
                "Action": "lambda:InvokeFunctionUrl",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:hello",
                "Condition": {"ArnLike": {"AWS:SourceArn": "arn:aws:s3:::bucket"}}
            },
            {
                "Sid": "invoke",
                "Effect": "Allow",
                "Principal": {"Service": "s3.amazonaws.com"},
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:hello"
            },
            {
                "Sid": "deny",
                "Effect": "Deny",
                "Principal": "*",
                "Action": "lambda:InvokeFunctionUrl",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:hello"
            }
        ]
    }"#;

    #[test]
    fn keeps_only_matching_allow_statements() {
        let grants = parse_live_policy(POLICY, INVOKE_URL_ACTION).unwrap();
        assert_eq!(grants.ids().collect::<Vec<_>>(), ["account", "org", "public"]);
    }

    #[test]
    fn extracts_conditions() {
        let grants = parse_live_policy(POLICY, INVOKE_URL_ACTION).unwrap();

        let public = grants.get("public").unwrap().content();
        assert_eq!(public.principal, "*");
        assert_eq!(public.principal_org_id, None);

        let org = grants.get("org").unwrap().content();
        assert_eq!(org.principal_org_id.as_deref(), Some("o-abc123"));

        let account = grants.get("account").unwrap().content();
        assert_eq!(account.principal, "210987654321");
        assert_eq!(account.source_arn.as_deref(), Some("arn:aws:s3:::bucket"));
        assert_eq!(account.principal_org_id, None);
    }

    #[test]
    fn org_id_ignored_without_iam_auth_condition() {
        let policy = json!({
            "Statement": [{
                "Sid": "s",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "lambda:InvokeFunctionUrl",
                "Condition": {"StringEquals": {"aws:PrincipalOrgID": "o-abc123"}}
            }]
        });
        let grants = parse_live_policy(&policy.to_string(), INVOKE_URL_ACTION).unwrap();
        assert_eq!(grants.get("s").unwrap().content().principal_org_id, None);
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(parse_live_policy("{not json", INVOKE_URL_ACTION).is_err());
    }

    #[test]
    fn action_list_yields_the_matched_action() {
        let policy = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Sid": "multi",
                "Effect": "Allow",
                "Principal": "*",
                "Action": ["lambda:InvokeFunction", "lambda:InvokeFunctionUrl"]
            }]
        });
        let grants = parse_live_policy(&policy.to_string(), INVOKE_URL_ACTION).unwrap();
        assert_eq!(
            grants.get("multi").unwrap().content().action,
            INVOKE_URL_ACTION
        );
    }
}
