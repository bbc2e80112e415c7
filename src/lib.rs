//! Forge webhook - admission control for Forge build resources
//!
//! Forge is a Kubernetes-native build system. This crate is its mutating
//! admission webhook: a TLS-terminated server that intercepts create/update
//! requests for Forge resources before the API server commits them, applies
//! kind-specific defaulting and validation, and keeps the `spec.generation`
//! counter of every resource monotonically increasing.
//!
//! # Modules
//!
//! - [`crd`] - Forge resource types (Build, BuildTemplate, ClusterBuildTemplate)
//! - [`webhook`] - Admission pipeline, TLS server, and registration machinery
//! - [`pki`] - Certificate generation for the webhook's TLS identity
//! - [`config`] - Configuration surface consumed by the webhook
//! - [`error`] - Error types for the webhook

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod pki;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default port for the admission webhook HTTPS server
///
/// Port 8443 is used instead of 443 to avoid requiring root privileges.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;
