pub mod errors;
pub mod guard;
pub mod keys;
pub mod verifier;

pub use errors::AuthError;
pub use verifier::{TokenVerifier, VerifiedIdentity};
