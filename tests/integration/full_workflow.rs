//! End-to-end workflow: import an encrypted key into the store, resolve it
//! for a destination, unlock it, serve it from an ephemeral agent, and
//! verify the endpoint disappears on shutdown.

use rand::rngs::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use keyvalet::{codec, CredentialStore, EphemeralAgent, KeyStatus, DEFAULT_KEY_LIFETIME};

const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;

fn encrypted_blob(key: &PrivateKey, passphrase: &str) -> Vec<u8> {
    key.encrypt(&mut OsRng, passphrase)
        .unwrap()
        .to_openssh(LineEnding::LF)
        .unwrap()
        .as_bytes()
        .to_vec()
}

async fn list_identity_blobs(socket_path: &std::path::Path) -> Vec<Vec<u8>> {
    let mut stream = UnixStream::connect(socket_path).await.unwrap();
    stream.write_all(&1u32.to_be_bytes()).await.unwrap();
    stream
        .write_all(&[SSH_AGENTC_REQUEST_IDENTITIES])
        .await
        .unwrap();

    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut payload).await.unwrap();

    assert_eq!(payload[0], SSH_AGENT_IDENTITIES_ANSWER);
    let mut rest = &payload[1..];
    let nkeys = u32::from_be_bytes(rest[..4].try_into().unwrap());
    rest = &rest[4..];

    let mut blobs = Vec::new();
    for _ in 0..nkeys {
        let blob_len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
        blobs.push(rest[4..4 + blob_len].to_vec());
        rest = &rest[4 + blob_len..];
        let comment_len = u32::from_be_bytes(rest[..4].try_into().unwrap()) as usize;
        rest = &rest[4 + comment_len..];
    }
    blobs
}

#[tokio::test]
async fn test_full_session_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("keys.db");

    // Import: a broad key and a more specific one for the target host.
    let broad = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    let specific = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();

    let mut store = CredentialStore::open(&store_path).unwrap();
    store
        .add(
            "*",
            "*.internal.example",
            encrypted_blob(&broad, "broad-pass"),
            "Imported from stdin",
        )
        .unwrap();
    store
        .add(
            "deploy",
            "prod.internal.example",
            encrypted_blob(&specific, "deploy-pass"),
            "Imported from ~/.ssh/id_ed25519",
        )
        .unwrap();

    // Resolve: the longer host pattern wins.
    let record = store
        .resolve("deploy", "prod.internal.example")
        .unwrap()
        .expect("a credential must match");
    assert_eq!(record.host_pattern, "prod.internal.example");

    // Unlock: the blob is classified as encrypted and decrypts with the
    // right passphrase only.
    assert!(matches!(
        KeyStatus::of(&record.key_material),
        KeyStatus::PassphraseRequired
    ));
    assert!(codec::decrypt(&record.key_material, "wrong").is_err());
    let key = codec::decrypt(&record.key_material, "deploy-pass").unwrap();

    // Serve: the agent advertises exactly the resolved key.
    let handle = EphemeralAgent::start(key, "deploy@prod.internal.example", DEFAULT_KEY_LIFETIME)
        .await
        .unwrap();

    let blobs = list_identity_blobs(handle.socket_path()).await;
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0], specific.public_key().to_bytes().unwrap());

    // Teardown: endpoint gone, twice is fine.
    let socket_path = handle.socket_path().to_path_buf();
    handle.shutdown().await;
    handle.shutdown().await;
    assert!(UnixStream::connect(&socket_path).await.is_err());
    assert!(!socket_path.parent().unwrap().exists());
}
