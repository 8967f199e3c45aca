//! Provider Error Types
//!
//! This module defines the errors raised by the lifecycle operations.
//! RPC failures inside `create`, `destroy` and `reboot` are reported as a
//! `false` success flag instead; see [`crate::provider`].

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request verifier rejected a create request
    #[error("Verification failed for node: {0}")]
    VerificationFailed(String),

    /// Profile is not present in configuration
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Node metadata does not name a profile
    #[error("Node {0} does not report a profile")]
    MissingProfile(String),

    /// Malformed IP literal
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Operation invoked with the wrong call kind
    #[error("The {operation} {expected} must be called with {hint}")]
    InvalidCall {
        operation: &'static str,
        expected: &'static str,
        hint: &'static str,
    },

    /// No agent answered for the node
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// RPC dispatch error
    #[error("RPC error: {0}")]
    Rpc(String),
}
