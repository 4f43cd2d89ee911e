//! Bearer token verification for Azure AD v2.0 access tokens.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::errors::AuthError;
use crate::auth::keys::KeyResolver;
use crate::utils::clock::Clock;

/// Caller identity extracted from a verified token. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|a| a == expected),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
    iss: Option<String>,
    aud: Option<Audience>,
    exp: Option<i64>,
    email: Option<String>,
    preferred_username: Option<String>,
    name: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    scp: Option<String>,
}

pub struct TokenVerifier {
    keys: Arc<KeyResolver>,
    clock: Arc<dyn Clock>,
    issuer: String,
    audience: String,
}

impl TokenVerifier {
    pub fn new(
        keys: Arc<KeyResolver>,
        clock: Arc<dyn Clock>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            keys,
            clock,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedIdentity, AuthError> {
        let segments: Vec<&str> = raw_token.split('.').collect();
        let [_, payload, _] = segments.as_slice() else {
            return Err(AuthError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        };

        let header = jsonwebtoken::decode_header(raw_token)
            .map_err(|e| AuthError::MalformedToken(format!("unreadable header: {e}")))?;
        decode_json_segment(payload)?;

        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("token missing kid in header".into()))?;

        let key = self
            .keys
            .resolve_key(&kid)
            .await
            .map_err(|e| AuthError::UnknownSigningKey(e.to_string()))?;

        // Claim checks below run in a fixed order, so the library only verifies the signature.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<Claims>(raw_token, &key.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::Json(_) | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                    AuthError::MalformedToken(e.to_string())
                }
                _ => {
                    debug!(kid = %kid, error = %e, "Signature verification failed");
                    AuthError::BadSignature
                }
            })?
            .claims;

        if claims.iss.as_deref() != Some(self.issuer.as_str()) {
            return Err(AuthError::AudienceMismatch);
        }
        if let Some(aud) = &claims.aud {
            if !aud.contains(&self.audience) {
                return Err(AuthError::AudienceMismatch);
            }
        }

        let (Some(user_id), Some(_)) = (claims.sub, claims.aud) else {
            return Err(AuthError::MissingClaims);
        };

        if let Some(exp) = claims.exp {
            if exp <= self.clock.now().timestamp() {
                return Err(AuthError::Expired);
            }
        }

        Ok(VerifiedIdentity {
            user_id,
            email: claims.email.or(claims.preferred_username),
            name: claims.name,
            roles: claims.roles,
            scopes: claims
                .scp
                .map(|scp| scp.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

fn decode_json_segment(segment: &str) -> Result<Value, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))
}
