//! Bearer token authentication.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <token>
//!     → gate.rs (parse header, enforce access-token marker and scopes)
//!     → provider.rs (IdentityProvider::validate_token)
//!         - oidc.rs (introspection endpoint, cached results)
//!     → record.rs (AuthRecord inserted into request extensions)
//! ```
//!
//! # Design Decisions
//! - Failures are a bare 403 so clients learn nothing about the claims
//! - The record travels as a typed request extension, never as a header

pub mod gate;
pub mod oidc;
pub mod provider;
pub mod record;

pub use gate::{AuthError, AuthGate};
pub use oidc::{OidcProvider, OidcSettings};
pub use provider::{IdentityProvider, ProviderError, ValidatedToken};
pub use record::{AuthRecord, ExtraClaims, Identity, StandardClaims};
