//! Ephemeral ssh-agent service.
//!
//! Holds exactly one decrypted private key in process memory and serves the
//! OpenSSH agent protocol on a throwaway Unix socket. The socket lives in a
//! fresh process-unique temporary directory, so concurrent invocations never
//! collide, and the directory is deleted again on [`AgentHandle::shutdown`].
//!
//! # Lifecycle
//!
//! ```text
//! start(key, label, lifetime)
//!   └─ TempDir + UnixListener ──► accept loop (one task per connection)
//!                                      │
//!        shutdown() ── cancel ─────────┤
//!        lifetime elapsed ─────────────┤
//!                                      ▼
//!                            scrub key, drop listener, remove temp dir
//! ```
//!
//! The held key is shared read-only across connection handlers; only
//! teardown invalidates it, and invalidation is visible to in-flight
//! handlers — a signing request that arrives after teardown began fails
//! cleanly instead of producing a signature.
//!
//! The lifetime ceiling is defense in depth: if the owning process is
//! killed before it can call `shutdown`, the key still self-invalidates
//! after a bounded interval. The default ceiling is 60 seconds.

use std::io;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use signature::Signer as _;
use ssh_agent_lib::agent::{listen, Session};
use ssh_agent_lib::error::AgentError;
use ssh_agent_lib::proto::{Identity, SignRequest};
use ssh_key::{PrivateKey, Signature};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{KeyvaletError, Result};

/// Ceiling on how long the decrypted key stays usable without an explicit
/// shutdown.
pub const DEFAULT_KEY_LIFETIME: Duration = Duration::from_secs(60);

// ── Held key ──────────────────────────────────────────────────────────────────

/// Single-owner slot for the decrypted key. Connection handlers read it;
/// only teardown takes it. `ssh_key::PrivateKey` zeroizes its private
/// scalar on drop.
struct HeldKey {
    slot: RwLock<Option<PrivateKey>>,
}

impl HeldKey {
    fn new(key: PrivateKey) -> Arc<Self> {
        Arc::new(Self {
            slot: RwLock::new(Some(key)),
        })
    }

    /// Run `f` against the key, or fail if the agent has been torn down.
    fn with<T>(
        &self,
        f: impl FnOnce(&PrivateKey) -> std::result::Result<T, AgentError>,
    ) -> std::result::Result<T, AgentError> {
        let guard = self
            .slot
            .read()
            .map_err(|_| other_err("key slot poisoned"))?;
        match guard.as_ref() {
            Some(key) => f(key),
            None => Err(other_err("agent has shut down")),
        }
    }

    /// Drop the key. Idempotent.
    fn scrub(&self) {
        if let Ok(mut guard) = self.slot.write() {
            guard.take();
        }
    }
}

fn other_err(msg: impl Into<String>) -> AgentError {
    AgentError::other(io::Error::other(msg.into()))
}

// ── Per-connection session ────────────────────────────────────────────────────

/// Agent protocol session. Cloned per incoming connection by
/// `ssh_agent_lib`. Read-only with respect to the single credential: the
/// add/remove/lock operations keep the library's default failure
/// responses, so an unsupported request is rejected cleanly rather than
/// dropping the connection.
#[derive(Clone)]
struct AgentConnection {
    key: Arc<HeldKey>,
    label: String,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[ssh_agent_lib::async_trait]
impl Session for AgentConnection {
    async fn request_identities(&mut self) -> std::result::Result<Vec<Identity>, AgentError> {
        let identity = self.key.with(|key| {
            Ok(Identity {
                pubkey: key.public_key().clone().into(),
                comment: self.label.clone(),
            })
        })?;
        debug!(label = %self.label, "request_identities");
        Ok(vec![identity])
    }

    async fn sign(&mut self, request: SignRequest) -> std::result::Result<Signature, AgentError> {
        let signature = self.key.with(|key| {
            if request.pubkey != *key.public_key().key_data() {
                return Err(other_err("requested identity is not held by this agent"));
            }
            key.try_sign(&request.data)
                .map_err(|e| other_err(format!("signing failed: {e}")))
        })?;
        debug!(label = %self.label, data_len = request.data.len(), "sign");
        Ok(signature)
    }
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Handle to a running ephemeral agent. Obtained from
/// [`EphemeralAgent::start`]; release it with
/// [`shutdown`](AgentHandle::shutdown).
pub struct AgentHandle {
    socket_path: PathBuf,
    cancel: CancellationToken,
    key: Arc<HeldKey>,
    serve_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Ephemeral ssh-agent over a transient Unix socket.
pub struct EphemeralAgent;

impl EphemeralAgent {
    /// Start serving `key` on a fresh local endpoint.
    ///
    /// `label` is the comment reported for the identity (typically
    /// `user@host`). The key self-invalidates and the endpoint closes once
    /// `lifetime` elapses, independently of explicit shutdown.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`KeyvaletError::ResourceFailure`] if the temporary
    /// directory cannot be created or the socket cannot be bound. Failures
    /// on individual connections after startup never surface here.
    pub async fn start(key: PrivateKey, label: &str, lifetime: Duration) -> Result<AgentHandle> {
        let dir = tempfile::Builder::new()
            .prefix("keyvalet-")
            .tempdir()
            .map_err(|e| KeyvaletError::ResourceFailure(format!("temp dir: {e}")))?;
        let socket_path = dir.path().join("agent.sock");

        let listener = tokio::net::UnixListener::bind(&socket_path)
            .map_err(|e| KeyvaletError::ResourceFailure(format!(
                "bind {}: {e}",
                socket_path.display()
            )))?;

        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| KeyvaletError::ResourceFailure(format!("chmod socket: {e}")))?;

        let held = HeldKey::new(key);
        let session = AgentConnection {
            key: Arc::clone(&held),
            label: label.to_string(),
        };

        let cancel = CancellationToken::new();
        let serve_task = tokio::spawn(serve(
            listener,
            session,
            dir,
            Arc::clone(&held),
            cancel.clone(),
            lifetime,
        ));

        debug!(socket = %socket_path.display(), label, "ephemeral agent started");

        Ok(AgentHandle {
            socket_path,
            cancel,
            key: held,
            serve_task: tokio::sync::Mutex::new(Some(serve_task)),
        })
    }
}

/// Accept loop wrapper. Owns the temp directory so the endpoint is removed
/// in exactly one place, whichever way the loop ends.
async fn serve(
    listener: tokio::net::UnixListener,
    session: AgentConnection,
    dir: TempDir,
    key: Arc<HeldKey>,
    cancel: CancellationToken,
    lifetime: Duration,
) {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("agent shutdown requested");
        }
        _ = tokio::time::sleep(lifetime) => {
            debug!(secs = lifetime.as_secs(), "agent key lifetime elapsed");
        }
        result = listen(listener, session) => {
            // `listen` only returns on listener-level failure; individual
            // connection errors are handled inside the library.
            if let Err(e) = result {
                warn!("agent listener exited: {e}");
            }
        }
    }

    key.scrub();
    if let Err(e) = dir.close() {
        warn!("failed to remove agent socket directory: {e}");
    }
}

impl AgentHandle {
    /// Path of the Unix socket, for `SSH_AUTH_SOCK`.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Tear the agent down: stop accepting connections, scrub the key, and
    /// delete the socket's temporary directory.
    ///
    /// Idempotent — safe to call repeatedly, and after the lifetime bound
    /// has already closed the agent.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.serve_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("agent serve task panicked: {e}");
            }
        }
        // The serve task normally scrubs on exit; cover the case where it
        // was already aborted or panicked.
        self.key.scrub();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
