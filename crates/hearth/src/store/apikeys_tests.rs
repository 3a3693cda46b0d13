// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tempfile::TempDir;

use super::hash_key;
use crate::store::Store;
use crate::types::epoch_ms;

async fn test_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("test.sqlite")).await.expect("open store");
    (dir, store)
}

#[test]
fn hash_is_stable_and_hex() {
    let a = hash_key("hk_secret");
    let b = hash_key("hk_secret");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_ne!(hash_key("hk_other"), a);
}

#[tokio::test]
async fn mint_returns_secret_once_and_stores_hash() {
    let (_dir, store) = test_store().await;

    let (key, secret) = store.create_api_key("user-1", "dashboard", None).await.expect("mint");
    assert!(secret.starts_with("hk_"));
    assert!(secret.starts_with(&key.key_preview));

    let listed = store.list_api_keys("user-1").await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "dashboard");
    // The secret itself is nowhere in the record.
    assert_eq!(listed[0].key_preview.len(), 7);
}

#[tokio::test]
async fn validate_resolves_user_and_stamps_last_used() {
    let (_dir, store) = test_store().await;

    let (_, secret) = store.create_api_key("user-1", "automation", None).await.expect("mint");

    let before = epoch_ms();
    let user = store.validate_api_key(&secret).await.expect("validate");
    assert_eq!(user.as_deref(), Some("user-1"));

    let listed = store.list_api_keys("user-1").await.expect("list");
    let last_used = listed[0].last_used_at.expect("last_used_at set");
    assert!(last_used >= before);
}

#[tokio::test]
async fn validate_rejects_unknown_and_expired() {
    let (_dir, store) = test_store().await;

    assert!(store.validate_api_key("hk_bogus").await.expect("validate").is_none());

    let expired_at = epoch_ms() - 1000;
    let (_, secret) =
        store.create_api_key("user-1", "stale", Some(expired_at)).await.expect("mint");
    assert!(store.validate_api_key(&secret).await.expect("validate").is_none());
}

#[tokio::test]
async fn delete_is_owner_scoped() {
    let (_dir, store) = test_store().await;

    let (key, _) = store.create_api_key("user-1", "mine", None).await.expect("mint");
    assert!(!store.delete_api_key("user-2", key.id).await.expect("delete"));
    assert!(store.delete_api_key("user-1", key.id).await.expect("delete"));
    assert!(store.list_api_keys("user-1").await.expect("list").is_empty());
}

#[tokio::test]
async fn has_api_keys_flips_on_first_mint() {
    let (_dir, store) = test_store().await;
    assert!(!store.has_api_keys().await.expect("query"));
    store.create_api_key("user-1", "first", None).await.expect("mint");
    assert!(store.has_api_keys().await.expect("query"));
}
