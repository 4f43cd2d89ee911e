use thiserror::Error;

/// Why a bearer token was rejected. Every variant maps to 401.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No auth token")]
    MissingToken,

    #[error("Invalid token format: {0}")]
    MalformedToken(String),

    #[error("Failed to get signing key: {0}")]
    UnknownSigningKey(String),

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Invalid token issuer or audience")]
    AudienceMismatch,

    #[error("Token has expired")]
    Expired,

    #[error("Token missing required claims")]
    MissingClaims,
}

impl AuthError {
    /// Short machine-readable kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::UnknownSigningKey(_) => "unknown_signing_key",
            AuthError::BadSignature => "bad_signature",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::Expired => "expired",
            AuthError::MissingClaims => "missing_claims",
        }
    }
}
