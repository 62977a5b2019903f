//! Integration tests for the MogileFS client
//!
//! These tests require a running MogileFS cluster with a writable domain.
//! Set the environment variable MOGILEFS_TRACKER_ADDR to run these tests,
//! and MOGILEFS_TEST_DOMAIN to pick the domain (default "testdomain").
//!
//! Example: MOGILEFS_TRACKER_ADDR=192.168.1.100:7001 cargo test --test integration_tests

use mogilefs::{Admin, BackendConfig, Client, FileHandle, GetPathsOptions, NewFileOptions};
use std::env;

/// Helper function to get tracker address from environment
fn get_tracker_addr() -> String {
    env::var("MOGILEFS_TRACKER_ADDR").unwrap_or_else(|_| "127.0.0.1:7001".to_string())
}

fn get_domain() -> String {
    env::var("MOGILEFS_TEST_DOMAIN").unwrap_or_else(|_| "testdomain".to_string())
}

/// Helper function to check if integration tests should run
///
/// Integration tests are only run when the MOGILEFS_TRACKER_ADDR
/// environment variable is set, indicating a cluster is available.
fn should_run_integration_tests() -> bool {
    env::var("MOGILEFS_TRACKER_ADDR").is_ok()
}

fn client() -> Client {
    Client::new(get_domain(), BackendConfig::new([get_tracker_addr()])).unwrap()
}

fn unique_key(name: &str) -> String {
    format!("rust-client-test/{}/{}", std::process::id(), name)
}

/// Test complete store, read and delete cycle
///
/// 1. Store content under a fresh key
/// 2. Read it back and compare
/// 3. Delete the key
/// 4. Verify the tracker no longer knows it
#[tokio::test]
async fn test_store_read_delete_cycle() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set MOGILEFS_TRACKER_ADDR to run");
        return;
    }

    let client = client();
    let key = unique_key("cycle");
    let data = b"Hello, MogileFS!";

    let stored = client.store_content(&key, None, data).await.unwrap();
    assert_eq!(stored, data.len() as u64);

    let read = client.get_file_data(&key).await.unwrap();
    assert_eq!(&read[..], data);

    client.delete(&key).await.unwrap();
    let err = client.get_paths(&key, GetPathsOptions::default()).await.unwrap_err();
    assert!(err.is_tracker_code("unknown_key"), "unexpected error: {}", err);
}

/// Test streaming a large file with ranged writes and reads
#[tokio::test]
async fn test_large_file_ranges() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set MOGILEFS_TRACKER_ADDR to run");
        return;
    }

    let client = client();
    let key = unique_key("large");

    let mut file = client.new_file(&key, NewFileOptions::default().large()).await.unwrap();
    file.write(b"SPAM").await.unwrap();
    file.seek(1).unwrap();
    file.write(b"p").await.unwrap();
    file.close().await.unwrap();

    let mut reader = client.read_file(&key).await.unwrap();
    assert_eq!(&reader.read(Some(2)).await.unwrap()[..], b"Sp");
    assert_eq!(&reader.read(None).await.unwrap()[..], b"AM");
    assert!(reader.is_eof());
    reader.close().await.unwrap();

    client.delete(&key).await.unwrap();
}

/// Test rename and key listing
#[tokio::test]
async fn test_rename_and_list() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set MOGILEFS_TRACKER_ADDR to run");
        return;
    }

    let client = client();
    let from = unique_key("rename-from");
    let to = unique_key("rename-to");

    client.store_content(&from, None, b"x").await.unwrap();
    client.rename(&from, &to).await.unwrap();

    let prefix = unique_key("rename-");
    let keys = client.keys(Some(prefix.as_str())).await.unwrap();
    assert_eq!(keys, vec![to.clone()]);

    client.delete(&to).await.unwrap();
}

/// Test read-only admin queries
#[tokio::test]
async fn test_admin_listings() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set MOGILEFS_TRACKER_ADDR to run");
        return;
    }

    let admin = Admin::new(BackendConfig::new([get_tracker_addr()])).unwrap();

    let domains = admin.get_domains().await.unwrap();
    assert!(domains.iter().any(|d| d.name == get_domain()));

    let hosts = admin.get_hosts(None).await.unwrap();
    let devices = admin.get_devices(None).await.unwrap();
    assert!(!hosts.is_empty());
    assert!(devices.iter().all(|d| hosts.iter().any(|h| h.hostid == d.hostid)));
}
