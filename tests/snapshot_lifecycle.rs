//! Persist, reload, and corrupt-snapshot scenarios.

mod common;

use std::fs;

use tempfile::TempDir;

use common::{black_white_ip, Reply, TestServer};
use kawana::network::connection::encode_reply;
use kawana::store::codec::{ENCODING_VERSION, HEADER_LEN, RECORD_LEN};
use kawana::store::record::{FlagModifier, ImpactTriple};
use kawana::store::{IpStore, KDB_FILE};

const NOW: u32 = 1_700_000_000;

#[tokio::test]
async fn restart_preserves_every_record() {
    let dir = TempDir::new().expect("tempdir");

    // seed three IPs with distinct states and persist
    let mut expected = Vec::new();
    {
        let store = IpStore::open(dir.path()).expect("open");
        store.log_ip(1, 10, FlagModifier::Nop, NOW);
        store.log_ip(2, 20, FlagModifier::Allow, NOW);
        store.log_ip(3, 30, FlagModifier::Deny, NOW);
        store.forgive_ip(3, ImpactTriple::splat(5));

        for ip in 1..=3 {
            let record = store.log_ip(ip, 0, FlagModifier::Nop, NOW);
            expected.push(encode_reply(&record).to_vec());
        }
        store.persist().expect("persist");
    }

    // relaunch against the same data directory
    let server = TestServer::spawn_in(dir.path()).await;
    for ip in 1..=3u32 {
        let reply = server.send(&black_white_ip(ip, 0)).await;
        assert_eq!(
            reply,
            expected[(ip - 1) as usize],
            "ip {ip} state must survive the restart"
        );
    }
}

#[tokio::test]
async fn writes_during_a_snapshot_survive_the_cycle() {
    let dir = TempDir::new().expect("tempdir");
    let server = TestServer::spawn_in(dir.path()).await;

    server.send(&common::log_ip(5, 7)).await;

    let store = std::sync::Arc::clone(&server.store);
    let persist = tokio::task::spawn_blocking(move || store.persist());
    // concurrent command while the snapshot cycle runs
    let reply = Reply::parse(&server.send(&common::log_ip(5, 7)).await);
    persist.await.expect("join").expect("persist");

    assert_eq!(reply.max_five_min, 14);
    let reply = Reply::parse(&server.send(&black_white_ip(5, 0)).await);
    assert_eq!(reply.max_five_min, 14);
}

#[test]
fn missing_snapshot_yields_an_empty_store() {
    let dir = TempDir::new().expect("tempdir");
    let store = IpStore::open(dir.path()).expect("open");
    assert_eq!(store.tracked_ips(), 0);
}

#[test]
fn corrupt_header_refuses_to_load() {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join(KDB_FILE), b"not a kdb file").expect("write");

    assert!(IpStore::open(dir.path()).is_err());
}

#[test]
fn wrong_version_refuses_to_load() {
    let dir = TempDir::new().expect("tempdir");
    let mut bytes = (ENCODING_VERSION + 1).to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0u8; RECORD_LEN]);
    fs::write(dir.path().join(KDB_FILE), bytes).expect("write");

    assert!(IpStore::open(dir.path()).is_err());
}

#[test]
fn truncated_record_refuses_to_load() {
    let dir = TempDir::new().expect("tempdir");
    let mut bytes = ENCODING_VERSION.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0u8; RECORD_LEN - 1]);
    fs::write(dir.path().join(KDB_FILE), bytes).expect("write");

    assert!(IpStore::open(dir.path()).is_err());
}

#[test]
fn snapshot_file_has_header_and_packed_records() {
    let dir = TempDir::new().expect("tempdir");
    let store = IpStore::open(dir.path()).expect("open");
    store.log_ip(1, 1, FlagModifier::Nop, NOW);
    store.log_ip(2, 2, FlagModifier::Nop, NOW);
    store.persist().expect("persist");

    let bytes = fs::read(store.snapshot_path()).expect("read snapshot");
    assert_eq!(bytes.len(), HEADER_LEN + 2 * RECORD_LEN);
    assert_eq!(&bytes[0..4], &ENCODING_VERSION.to_le_bytes());
}

#[test]
fn repeated_persists_replace_the_snapshot_atomically() {
    let dir = TempDir::new().expect("tempdir");
    let store = IpStore::open(dir.path()).expect("open");

    store.log_ip(1, 1, FlagModifier::Nop, NOW);
    store.persist().expect("persist");
    let first = fs::read(store.snapshot_path()).expect("read");

    store.log_ip(2, 2, FlagModifier::Nop, NOW);
    store.persist().expect("persist");
    let second = fs::read(store.snapshot_path()).expect("read");

    assert_eq!(first.len(), HEADER_LEN + RECORD_LEN);
    assert_eq!(second.len(), HEADER_LEN + 2 * RECORD_LEN);
    assert!(!store
        .snapshot_path()
        .with_extension("kdb.part")
        .exists());
}
