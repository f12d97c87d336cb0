//! keyvalet CLI.
//!
//! `keyvalet [user@host] [ssh args...]` launches `ssh` behind an ephemeral
//! signing agent holding the best-matching stored key. Management
//! subcommands (`add`, `list`, `update`, `remove`) maintain the credential
//! store.

mod destination;
mod session;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use zeroize::Zeroizing;

use keyvalet::{codec, CredentialStore, KeyStatus, SshKeygen};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// keyvalet — pattern-matched SSH keys behind an ephemeral agent.
#[derive(Parser, Debug)]
#[command(
    name = "keyvalet",
    about = "Launch ssh sessions with short-lived, store-backed keys",
    version,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Path to the credential store (.json selects the document backend,
    /// anything else SQLite)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments passed through to ssh, e.g. `deploy@prod.example -p 2222`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    ssh_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a key under user/host patterns (`-` reads the key from stdin)
    Add {
        user_pattern: String,
        host_pattern: String,
        key_path: String,
    },
    /// List stored credentials
    List,
    /// Replace the patterns and key material of an existing credential
    Update {
        id: i64,
        user_pattern: String,
        host_pattern: String,
        key_path: String,
    },
    /// Remove a credential by id
    Remove { id: i64 },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store_path = cli.store.unwrap_or_else(default_store_path);

    match cli.command {
        Some(Commands::Add {
            user_pattern,
            host_pattern,
            key_path,
        }) => cmd_add(&store_path, &user_pattern, &host_pattern, &key_path),
        Some(Commands::List) => cmd_list(&store_path),
        Some(Commands::Update {
            id,
            user_pattern,
            host_pattern,
            key_path,
        }) => cmd_update(&store_path, id, &user_pattern, &host_pattern, &key_path),
        Some(Commands::Remove { id }) => cmd_remove(&store_path, id),
        None => {
            if cli.ssh_args.is_empty() {
                bail!("no destination given; try `keyvalet user@host` or `keyvalet --help`");
            }
            let code = session::run(&store_path, &cli.ssh_args).await?;
            std::process::exit(code)
        }
    }
}

/// `$XDG_DATA_HOME`-style default location, SQLite backend. Falls back to
/// the working directory if no data directory can be determined.
fn default_store_path() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("keyvalet").join("keys.db"),
        None => PathBuf::from("keyvalet.db"),
    }
}

// ── Store commands ────────────────────────────────────────────────────────────

fn cmd_add(
    store_path: &std::path::Path,
    user_pattern: &str,
    host_pattern: &str,
    key_path: &str,
) -> Result<()> {
    let (blob, source) = read_key_input(key_path)?;
    let blob = ensure_protected(blob)?;

    let mut store = CredentialStore::open(store_path)?;
    let id = store.add(
        user_pattern,
        host_pattern,
        blob,
        &format!("Imported from {source}"),
    )?;

    println!("Key for {user_pattern}@{host_pattern} imported (id {id}).");
    Ok(())
}

fn cmd_list(store_path: &std::path::Path) -> Result<()> {
    let store = CredentialStore::open(store_path)?;
    let records = store.list()?;

    if records.is_empty() {
        println!("No stored credentials.");
        return Ok(());
    }

    let user_w = records
        .iter()
        .map(|r| r.user_pattern.len())
        .chain(std::iter::once("User Pattern".len()))
        .max()
        .unwrap_or(0);
    let host_w = records
        .iter()
        .map(|r| r.host_pattern.len())
        .chain(std::iter::once("Host Pattern".len()))
        .max()
        .unwrap_or(0);

    println!("{:<4} {:<user_w$} {:<host_w$} Comment", "ID", "User Pattern", "Host Pattern");
    for record in &records {
        println!(
            "{:<4} {:<user_w$} {:<host_w$} {}",
            record.id, record.user_pattern, record.host_pattern, record.comment
        );
    }
    Ok(())
}

fn cmd_update(
    store_path: &std::path::Path,
    id: i64,
    user_pattern: &str,
    host_pattern: &str,
    key_path: &str,
) -> Result<()> {
    let (blob, source) = read_key_input(key_path)?;
    let blob = ensure_protected(blob)?;

    let mut store = CredentialStore::open(store_path)?;
    if store.update(
        id,
        user_pattern,
        host_pattern,
        blob,
        &format!("Updated from {source}"),
    )? {
        println!("Credential {id} updated.");
    } else {
        println!("No credential with id {id}.");
    }
    Ok(())
}

fn cmd_remove(store_path: &std::path::Path, id: i64) -> Result<()> {
    let mut store = CredentialStore::open(store_path)?;
    if store.delete(id)? {
        println!("Credential {id} removed.");
    } else {
        println!("No credential with id {id}.");
    }
    Ok(())
}

// ── Import helpers ────────────────────────────────────────────────────────────

/// Read the key blob from a file, or from stdin when the path is `-`.
/// Returns the blob and a human-readable source for the record comment.
fn read_key_input(key_path: &str) -> Result<(Vec<u8>, String)> {
    if key_path == "-" {
        let mut blob = Vec::new();
        std::io::stdin()
            .read_to_end(&mut blob)
            .context("reading key from stdin")?;
        Ok((blob, "stdin".to_string()))
    } else {
        let blob = std::fs::read(key_path).with_context(|| format!("reading {key_path}"))?;
        Ok((blob, key_path.to_string()))
    }
}

/// Check the key before storing it. Already-encrypted keys pass through;
/// for a plaintext key the user is offered an interactive re-encryption
/// via the hardening tool.
fn ensure_protected(blob: Vec<u8>) -> Result<Vec<u8>> {
    match KeyStatus::of(&blob) {
        KeyStatus::PassphraseRequired => Ok(blob),
        KeyStatus::Invalid(reason) => bail!("not a usable private key: {reason}"),
        KeyStatus::Unencrypted(_) => {
            eprintln!("Warning: this key is unencrypted.");
            eprint!("Encrypt it before storing? (y/N): ");
            let mut answer = String::new();
            std::io::stdin()
                .read_line(&mut answer)
                .context("reading answer")?;
            if !answer.trim().eq_ignore_ascii_case("y") {
                return Ok(blob);
            }

            let passphrase = Zeroizing::new(
                rpassword::prompt_password("Enter new passphrase: ")
                    .context("reading passphrase")?,
            );
            let confirm = Zeroizing::new(
                rpassword::prompt_password("Confirm passphrase: ")
                    .context("reading passphrase")?,
            );
            if *passphrase != *confirm {
                bail!("passphrases do not match");
            }

            let encrypted = codec::encrypt(&SshKeygen, &blob, &passphrase)?;
            eprintln!("Key encrypted (aes256-ctr).");
            Ok(encrypted)
        }
    }
}
