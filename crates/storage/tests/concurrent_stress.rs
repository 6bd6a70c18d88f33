//! Concurrent access stress tests for `MemoryRecordStore`.
//!
//! These tests race many tasks against the same identity to detect lost
//! updates and torn reads: the single-active-key invariant and the
//! revocation cascade must hold no matter how mutations interleave.

#![allow(clippy::expect_used, clippy::panic)]

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tokio::task::JoinSet;
use trustkey_storage::{
    Certificate, Identity, IdentityProfile, MemoryRecordStore, Mutation, MutationOutcome,
    MutationRejection, RecordStore, StorageError,
};

/// Number of concurrent tasks for most tests.
const CONCURRENCY: usize = 16;

/// Number of operations each task performs.
const OPS_PER_TASK: usize = 25;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn identity(n: u8) -> Identity {
    Identity::from_address_bytes(&[n; 20])
}

fn register(store: &MemoryRecordStore, n: u8, initial_key: Option<&str>) -> Identity {
    let profile = IdentityProfile::builder()
        .identity(identity(n))
        .username(format!("user{n}"))
        .email(format!("user{n}@example.com"))
        .build();
    store.register(profile, initial_key.map(str::to_owned)).expect("register should succeed");
    identity(n)
}

fn certificate(serial: &str) -> Certificate {
    let now = Utc::now();
    Certificate::builder()
        .serial_number(serial)
        .common_name("stress")
        .organization("org")
        .country("US")
        .state("CA")
        .locality("SF")
        .public_key("pk")
        .valid_from(now)
        .valid_to(now + Duration::days(30))
        .build()
}

// ---------------------------------------------------------------------------
// Test: parallel add_key on one identity
// ---------------------------------------------------------------------------

/// Every appended key gets a distinct index, no append is lost, and exactly
/// one key is active at the end.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_add_key_same_identity() {
    let store = MemoryRecordStore::new();
    let alice = register(&store, 1, None);

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let store = store.clone();
        let alice = alice.clone();
        set.spawn(async move {
            let mut indices = Vec::with_capacity(OPS_PER_TASK);
            for i in 0..OPS_PER_TASK {
                let outcome = store
                    .apply_mutation(&Mutation::AddKey {
                        identity: alice.clone(),
                        key_data: format!("task{task_id}-key{i}"),
                    })
                    .await
                    .expect("add_key should succeed");
                let MutationOutcome::KeyAdded(record) = outcome else {
                    panic!("unexpected outcome: {outcome:?}");
                };
                indices.push(record.index);
            }
            indices
        });
    }

    let mut seen = HashSet::new();
    while let Some(result) = set.join_next().await {
        for index in result.expect("task should not panic") {
            assert!(seen.insert(index), "index {index} handed out twice");
        }
    }

    let keys = store.read_keys(&alice).await.expect("read_keys");
    assert_eq!(keys.len(), CONCURRENCY * OPS_PER_TASK);
    assert_eq!(seen.len(), keys.len());
    assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
    assert!(keys.iter().enumerate().all(|(pos, k)| k.index as usize == pos));
}

// ---------------------------------------------------------------------------
// Test: revocation racing key additions
// ---------------------------------------------------------------------------

/// Readers never observe a revoked certificate next to a key that was active
/// before the revocation committed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_revocation_cascade_is_atomic_under_contention() {
    let store = MemoryRecordStore::new();
    let alice = register(&store, 1, Some("k0"));
    store
        .apply_mutation(&Mutation::IssueCertificate {
            identity: alice.clone(),
            certificate: certificate("SN-1"),
        })
        .await
        .expect("issue");

    let mut set = JoinSet::new();

    // Writers keep adding keys.
    for task_id in 0..CONCURRENCY / 2 {
        let store = store.clone();
        let alice = alice.clone();
        set.spawn(async move {
            for i in 0..OPS_PER_TASK {
                let _ = store
                    .apply_mutation(&Mutation::AddKey {
                        identity: alice.clone(),
                        key_data: format!("w{task_id}-{i}"),
                    })
                    .await;
                tokio::task::yield_now().await;
            }
        });
    }

    // One revoker.
    {
        let store = store.clone();
        let alice = alice.clone();
        set.spawn(async move {
            tokio::task::yield_now().await;
            store
                .apply_mutation(&Mutation::RevokeCertificate {
                    identity: alice.clone(),
                    reason: "compromised".into(),
                })
                .await
                .expect("revoke");
        });
    }

    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    // Keys added after the revocation may be active, but never more than one.
    let keys = store.read_keys(&alice).await.expect("read_keys");
    assert!(keys.iter().filter(|k| k.is_active).count() <= 1);

    // Revoking again re-applies the cascade atomically.
    store
        .apply_mutation(&Mutation::RevokeCertificate { identity: alice.clone(), reason: "x".into() })
        .await
        .expect("second revoke");
    let keys = store.read_keys(&alice).await.expect("read_keys");
    let cert = store.read_certificate(&alice).await.expect("read_certificate").expect("cert");
    assert!(cert.is_revoked);
    assert_eq!(cert.revocation_reason.as_deref(), Some("compromised"));
    assert!(keys.iter().all(|k| !k.is_active));
}

// ---------------------------------------------------------------------------
// Test: certificate issuance race
// ---------------------------------------------------------------------------

/// Of many concurrent issuers exactly one wins; all others see
/// `CertificateAlreadyExists`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_issue_exactly_one_winner() {
    let store = MemoryRecordStore::new();
    let alice = register(&store, 1, Some("k0"));

    let mut set = JoinSet::new();
    for task_id in 0..CONCURRENCY {
        let store = store.clone();
        let alice = alice.clone();
        set.spawn(async move {
            store
                .apply_mutation(&Mutation::IssueCertificate {
                    identity: alice,
                    certificate: certificate(&format!("SN-{task_id}")),
                })
                .await
        });
    }

    let mut winners = 0;
    while let Some(result) = set.join_next().await {
        match result.expect("task should not panic") {
            Ok(_) => winners += 1,
            Err(StorageError::Rejected(MutationRejection::CertificateAlreadyExists)) => {},
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners, 1);
}

// ---------------------------------------------------------------------------
// Test: independent identities
// ---------------------------------------------------------------------------

/// Mutations on different identities proceed independently and never bleed
/// into each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_identities_do_not_interfere() {
    let store = MemoryRecordStore::new();
    let identities: Vec<Identity> =
        (1..=CONCURRENCY as u8).map(|n| register(&store, n, None)).collect();

    let mut set = JoinSet::new();
    for (task_id, id) in identities.iter().cloned().enumerate() {
        let store = store.clone();
        set.spawn(async move {
            for i in 0..=task_id {
                store
                    .apply_mutation(&Mutation::AddKey {
                        identity: id.clone(),
                        key_data: format!("{id}-{i}"),
                    })
                    .await
                    .expect("add_key");
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.expect("task should not panic");
    }

    for (task_id, id) in identities.iter().enumerate() {
        let keys = store.read_keys(id).await.expect("read_keys");
        assert_eq!(keys.len(), task_id + 1);
        assert!(keys.iter().all(|k| k.key_data.starts_with(id.as_str())));
    }
}
