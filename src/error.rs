//! Error types for the Forge webhook

use thiserror::Error;

/// Main error type for webhook operations
///
/// Variants whose message reaches the caller of an admission request
/// (`Decode`, `Shape`, `Validation`, `Defaulting`) display their message
/// without a prefix: the denial response must carry the collaborator's
/// wording verbatim.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Request body or embedded object could not be decoded
    #[error("{0}")]
    Decode(String),

    /// Resource document is missing its expected `spec` substructure
    #[error("{0}")]
    Shape(String),

    /// Failure computing or bumping the spec generation
    #[error("failed to update generation: {0}")]
    Generation(String),

    /// Kind-specific defaulter rejected the object
    #[error("{0}")]
    Defaulting(String),

    /// Kind-specific validator rejected the object
    #[error("{0}")]
    Validation(String),

    /// Certificate secret exists but is missing a required field
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// Webhook configuration could not be reconciled
    #[error("registration error: {0}")]
    Registration(String),

    /// TLS configuration could not be assembled
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Certificate generation error
    #[error("pki error: {0}")]
    Pki(#[from] crate::pki::PkiError),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a shape error with the given message
    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    /// Create a generation error with the given message
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Create a defaulting error with the given message
    pub fn defaulting(msg: impl Into<String>) -> Self {
        Self::Defaulting(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a missing-credential error with the given message
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        Self::MissingCredential(msg.into())
    }

    /// Create a registration error with the given message
    pub fn registration(msg: impl Into<String>) -> Self {
        Self::Registration(msg.into())
    }

    /// Create a TLS configuration error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: collaborator messages survive the trip to the denial response
    ///
    /// A validator that returns "image field required" must produce a denial
    /// whose message is exactly "image field required" - no prefix, no
    /// rewording. The validator owns the user-visible text.
    #[test]
    fn story_collaborator_messages_are_verbatim() {
        let err = Error::validation("image field required");
        assert_eq!(err.to_string(), "image field required");

        let err = Error::defaulting("cannot default a build with no steps");
        assert_eq!(err.to_string(), "cannot default a build with no steps");

        // Decode and shape errors are ours but also surface as-is
        let err = Error::decode("unhandled kind: \"Widget\"");
        assert_eq!(err.to_string(), "unhandled kind: \"Widget\"");
    }

    /// Story: generation failures are distinguishable from validation failures
    ///
    /// A generation error always denies, and its message names the generation
    /// step so operators can tell a pipeline failure from a business-rule
    /// rejection.
    #[test]
    fn story_generation_errors_name_the_step() {
        let err = Error::generation("resource document has no spec field");
        assert!(err.to_string().starts_with("failed to update generation"));
        assert!(err.to_string().contains("no spec field"));
    }

    /// Story: startup errors are fatal and carry their category
    #[test]
    fn story_startup_errors_carry_category() {
        let err = Error::missing_credential("server-key.pem missing from secret");
        assert!(err.to_string().contains("missing credential"));

        let err = Error::registration("failed to fetch owner deployment");
        assert!(err.to_string().contains("registration error"));

        let err = Error::tls("no private key found in PEM data");
        assert!(err.to_string().contains("TLS configuration error"));
    }

    #[test]
    fn error_construction_accepts_str_and_string() {
        let kind = "Widget";
        let err = Error::decode(format!("unhandled kind: {kind:?}"));
        assert!(err.to_string().contains("Widget"));

        match Error::validation("static message") {
            Error::Validation(msg) => assert_eq!(msg, "static message"),
            _ => panic!("expected Validation variant"),
        }
    }
}
