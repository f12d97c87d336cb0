//! keyvalet — pattern-matched credential store and ephemeral signing agent.
//!
//! Brokers short-lived access to private SSH keys: wildcard `user`/`host`
//! selectors map to stored (usually passphrase-encrypted) key material, and
//! a decrypted key is exposed only through a transient, time-bounded
//! ssh-agent endpoint that disappears with the session.

pub mod agent;
pub mod codec;
pub mod error;
pub mod pattern;
pub mod store;

// Re-export primary types
pub use agent::{AgentHandle, EphemeralAgent, DEFAULT_KEY_LIFETIME};
pub use codec::{HardeningTool, KeyStatus, SshKeygen};
pub use error::{KeyvaletError, Result};
pub use store::{CredentialRecord, CredentialStore, StoreBackend};

// Key material types are part of the public API surface.
pub use ssh_key;
