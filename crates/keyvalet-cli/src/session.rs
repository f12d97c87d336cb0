//! Session orchestration.
//!
//! Resolves the destination against the credential store, unlocks the key
//! (prompting for a passphrase when needed), brings up the ephemeral agent,
//! and runs `ssh` with `SSH_AUTH_SOCK` rewired to the transient socket.
//! Signals are forwarded to the child; on exit the agent is torn down and
//! the child's status code is returned for process exit.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;
use zeroize::Zeroizing;

use keyvalet::ssh_key::PrivateKey;
use keyvalet::{codec, CredentialStore, EphemeralAgent, KeyStatus, KeyvaletError};

use crate::destination;

/// Run a remote-login session. Returns the exit code `ssh` finished with.
pub async fn run(store_path: &Path, ssh_args: &[String]) -> Result<i32> {
    let (user, host) = destination::parse(ssh_args);

    let agent = if host.is_empty() {
        None
    } else {
        prepare_agent(store_path, &user, &host).await?
    };

    let mut command = tokio::process::Command::new("ssh");
    command.args(ssh_args);
    if let Some(handle) = &agent {
        // Overrides any inherited SSH_AUTH_SOCK for the child only.
        command.env("SSH_AUTH_SOCK", handle.socket_path());
    }

    let mut child = command.spawn().context("failed to launch ssh")?;
    let status = wait_forwarding_signals(&mut child).await?;

    if let Some(handle) = agent {
        handle.shutdown().await;
    }

    Ok(status.code().unwrap_or(1))
}

/// Resolve and unlock the credential for `(user, host)` and start the
/// ephemeral agent. A missing credential is not fatal: the session runs
/// without an agent and the user's ambient keys apply.
async fn prepare_agent(
    store_path: &Path,
    user: &str,
    host: &str,
) -> Result<Option<keyvalet::AgentHandle>> {
    let store = CredentialStore::open(store_path)?;
    let record = match store.resolve(user, host)? {
        Some(record) => record,
        None => {
            eprintln!("keyvalet: no stored key matches {user}@{host}; continuing without one");
            return Ok(None);
        }
    };
    debug!(id = record.id, host_pattern = %record.host_pattern, "credential resolved");

    let label = if user.is_empty() {
        host.to_string()
    } else {
        format!("{user}@{host}")
    };

    let key = unlock(&record.key_material, &label)?;
    let handle = EphemeralAgent::start(key, &label, keyvalet::DEFAULT_KEY_LIFETIME).await?;
    Ok(Some(handle))
}

/// Turn stored key material into a usable private key, prompting for a
/// passphrase if the blob is encrypted. A wrong passphrase gets exactly
/// one re-prompt before failing.
fn unlock(blob: &[u8], label: &str) -> Result<PrivateKey> {
    match KeyStatus::of(blob) {
        KeyStatus::Unencrypted(key) => {
            eprintln!("Using unencrypted key for {label}");
            Ok(*key)
        }
        KeyStatus::PassphraseRequired => {
            let passphrase = Zeroizing::new(
                rpassword::prompt_password(format!(
                    "Key for {label} is encrypted. Enter passphrase: "
                ))
                .context("failed to read passphrase")?,
            );
            match codec::decrypt(blob, &passphrase) {
                Ok(key) => Ok(key),
                Err(KeyvaletError::AuthFailure) => {
                    let retry = Zeroizing::new(
                        rpassword::prompt_password("Incorrect passphrase, try again: ")
                            .context("failed to read passphrase")?,
                    );
                    codec::decrypt(blob, &retry).context("could not unlock key")
                }
                Err(e) => Err(e.into()),
            }
        }
        KeyStatus::Invalid(reason) => bail!("stored key for {label} is not usable: {reason}"),
    }
}

/// Wait for the child to exit, forwarding SIGINT and SIGTERM to it so an
/// interrupted wrapper still lets `ssh` clean up its terminal state.
#[cfg(unix)]
async fn wait_forwarding_signals(
    child: &mut tokio::process::Child,
) -> Result<std::process::ExitStatus> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            status = child.wait() => return status.context("waiting for ssh"),
            _ = sigint.recv() => forward_signal(child, nix::sys::signal::Signal::SIGINT),
            _ = sigterm.recv() => forward_signal(child, nix::sys::signal::Signal::SIGTERM),
        }
    }
}

#[cfg(unix)]
fn forward_signal(child: &tokio::process::Child, sig: nix::sys::signal::Signal) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig);
    }
}
