//! Caller identity: `did:web` key resolution and verification of JWT
//! verifiable presentations.

pub mod credential;
pub mod did;

pub use credential::{CredentialClaimSet, CredentialVerifier, PresentationError, VerifiedCredential};
pub use did::{DidResolver, DidWebResolver, ResolutionError};
