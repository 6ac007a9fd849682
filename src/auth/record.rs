//! The authenticated identity attached to a request.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claim carrying the access-token marker.
pub const ACCESS_TOKEN_CLAIM: &str = "kc.isAccessToken";
/// Claim listing the scopes granted to the token.
pub const AUTHORIZED_SCOPES_CLAIM: &str = "kc.authorizedScopes";
/// Claim holding the secondary identity object.
pub const IDENTITY_CLAIM: &str = "kc.identity";
pub const IDENTIFIED_USER_ID_CLAIM: &str = "kc.i.id";
pub const IDENTIFIED_USERNAME_CLAIM: &str = "kc.i.un";

/// Registered claims validated by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default)]
    pub sub: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

/// Provider specific claims, kept as an open map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtraClaims(pub Map<String, Value>);

/// Secondary identity issued alongside the subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub username: Option<String>,
}

impl ExtraClaims {
    pub fn get(&self, claim: &str) -> Option<&Value> {
        self.0.get(claim)
    }

    pub fn insert(&mut self, claim: impl Into<String>, value: Value) {
        self.0.insert(claim.into(), value);
    }

    pub fn is_access_token(&self) -> bool {
        matches!(self.get(ACCESS_TOKEN_CLAIM), Some(Value::Bool(true)))
    }

    /// Granted scopes, from the scope list claim or an RFC 7662 `scope` string.
    pub fn authorized_scopes(&self) -> BTreeSet<&str> {
        match self.get(AUTHORIZED_SCOPES_CLAIM) {
            Some(Value::Array(scopes)) => scopes.iter().filter_map(Value::as_str).collect(),
            _ => self
                .get("scope")
                .and_then(Value::as_str)
                .map(|s| s.split_whitespace().collect())
                .unwrap_or_default(),
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        let object = self.get(IDENTITY_CLAIM)?.as_object()?;
        let field = |name: &str| {
            object
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Identity {
            user_id: field(IDENTIFIED_USER_ID_CLAIM),
            username: field(IDENTIFIED_USERNAME_CLAIM),
        })
    }
}

/// Result of a successful token validation.
///
/// Inserted into the request extensions by the auth gate and read by
/// handlers further down the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthRecord {
    pub subject: String,
    pub standard: StandardClaims,
    pub extra: ExtraClaims,
}

impl AuthRecord {
    /// Identified user ID, falling back to the token subject.
    pub fn user_id(&self) -> &str {
        self.extra
            .0
            .get(IDENTITY_CLAIM)
            .and_then(|v| v.get(IDENTIFIED_USER_ID_CLAIM))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.subject)
    }

    pub fn username(&self) -> Option<String> {
        self.extra.identity().and_then(|i| i.username)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn extra(value: Value) -> ExtraClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_scopes_from_list_claim() {
        let claims = extra(json!({ "kc.authorizedScopes": ["openid", "groupware"] }));
        let scopes = claims.authorized_scopes();
        assert!(scopes.contains("openid"));
        assert!(scopes.contains("groupware"));
        assert_eq!(scopes.len(), 2);
    }

    #[test]
    fn test_scopes_from_scope_string() {
        let claims = extra(json!({ "scope": "openid profile" }));
        assert_eq!(claims.authorized_scopes().len(), 2);
    }

    #[test]
    fn test_identity_and_user_id() {
        let record = AuthRecord {
            subject: "sub-1".into(),
            standard: StandardClaims::default(),
            extra: extra(json!({
                "kc.identity": { "kc.i.id": "user-42", "kc.i.un": "jdoe" },
                "kc.isAccessToken": true
            })),
        };
        assert!(record.extra.is_access_token());
        assert_eq!(record.user_id(), "user-42");
        assert_eq!(record.username().as_deref(), Some("jdoe"));

        let bare = AuthRecord {
            subject: "sub-1".into(),
            standard: StandardClaims::default(),
            extra: ExtraClaims::default(),
        };
        assert!(!bare.extra.is_access_token());
        assert_eq!(bare.user_id(), "sub-1");
        assert!(bare.username().is_none());
    }

    #[test]
    fn test_audience_single_string() {
        let claims: StandardClaims = serde_json::from_value(json!({ "sub": "a", "aud": "gateway" })).unwrap();
        assert_eq!(claims.aud, vec!["gateway".to_string()]);
    }
}
