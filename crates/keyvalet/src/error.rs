//! Error types for keyvalet.
//!
//! All errors are strongly typed and propagated without panicking.
//! Private key material is never included in error messages.

/// Keyvalet error types covering all core operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyvaletError {
    /// No stored credential matched the requested user/host. Non-fatal:
    /// the caller decides whether to proceed without an ephemeral agent.
    #[error("no matching key found for {user}@{host}")]
    NotFound { user: String, host: String },

    /// Wrong passphrase or unreadable encrypted key. The two cases are
    /// deliberately not distinguished; the message guides humans only.
    #[error("incorrect passphrase or invalid key")]
    AuthFailure,

    /// The external key-hardening tool failed. The store is left
    /// unmodified when this surfaces from an add or update.
    #[error("key encryption failed: {0}")]
    EncryptionFailure(String),

    /// Could not create the agent endpoint or its temporary directory.
    /// Fatal to `EphemeralAgent::start`.
    #[error("failed to create agent endpoint: {0}")]
    ResourceFailure(String),

    /// The store backend is unreadable or unwritable.
    #[error("credential store error: {0}")]
    StoreIo(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, KeyvaletError>;
