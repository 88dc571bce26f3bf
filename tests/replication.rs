use aclsync::entity::AclToken;
use aclsync::fsm::{ApplyRequest, MemoryState};
use aclsync::replication::{reconcile, ReplicationConfig};
use aclsync::test_utils::{
    policy_replicator, role_replicator, test_policy, test_role, test_token, token_replicator,
    MemoryPrimary,
};
use aclsync::Error;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::watch;

fn setup() -> (Arc<MemoryPrimary>, Arc<MemoryState>, watch::Receiver<bool>) {
    let primary = Arc::new(MemoryPrimary::new());
    let fsm = Arc::new(MemoryState::new());
    // The sender side may drop; a watch receiver keeps reporting the last
    // value, which stays "not cancelled".
    let (_tx, rx) = watch::channel(false);
    (primary, fsm, rx)
}

#[tokio::test]
async fn cold_start_pulls_full_catalogue() {
    let (primary, fsm, cancel) = setup();
    primary.set_index(9);
    let p1 = primary.put_policy(test_policy("p1"));
    let p2 = primary.put_policy(test_policy("p2"));
    assert_eq!(p1.modify_index, 10);
    assert_eq!(p2.modify_index, 11);

    let mut r = policy_replicator(&primary, &fsm);
    let report = reconcile(&mut r, &ReplicationConfig::default(), 0, &cancel)
        .await
        .unwrap()
        .expect("cold start must do work");

    assert_eq!(report.remote_index, 11);
    assert_eq!(report.deletes, 0);
    assert_eq!(report.delete_applies, 0);
    assert_eq!(report.upserts, 2);

    let mut want = vec![p1.id.clone(), p2.id.clone()];
    want.sort();
    assert_eq!(fsm.policy_ids(), want);
    assert_eq!(fsm.policy(&p1.id), Some(p1));
    assert_eq!(fsm.policy(&p2.id), Some(p2));
}

#[tokio::test]
async fn steady_state_second_tick_applies_nothing() {
    let (primary, fsm, cancel) = setup();
    primary.set_index(4);
    let r1 = primary.put_role(test_role("r1"));
    assert_eq!(r1.modify_index, 5);

    let cfg = ReplicationConfig::default();
    let mut r = role_replicator(&primary, &fsm);

    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();
    assert_eq!(first.remote_index, 5);
    let applies_after_first = fsm.committed_applies();

    // Same remote state again: the diff is empty and the FSM untouched.
    let second = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap()
        .expect("remote still lists one role");
    assert_eq!(second.remote_index, 5);
    assert_eq!(second.deletes, 0);
    assert_eq!(second.upserts, 0);
    assert_eq!(second.delete_applies + second.upsert_applies, 0);
    assert_eq!(fsm.committed_applies(), applies_after_first);
}

#[tokio::test]
async fn divergent_hash_is_one_upsert() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let t1 = primary.put_token(test_token("before"));
    let mut r = token_replicator(&primary, &fsm);
    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();

    let mut changed = t1.clone();
    changed.description = "after".to_string();
    let changed = primary.put_token(changed);
    assert_ne!(changed.hash, t1.hash);

    let report = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.deletes, 0);
    assert_eq!(report.upserts, 1);
    assert_eq!(report.upsert_applies, 1);
    assert_eq!(fsm.token(&t1.accessor_id), Some(changed));
}

#[tokio::test]
async fn remote_deletion_is_one_delete_batch() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let p1 = primary.put_policy(test_policy("keep"));
    let p2 = primary.put_policy(test_policy("drop"));
    let mut r = policy_replicator(&primary, &fsm);
    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();

    primary.delete_policy(&p2.id);
    let before = fsm.committed_applies();
    let report = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.deletes, 1);
    assert_eq!(report.delete_applies, 1);
    assert_eq!(report.upserts, 0);
    assert_eq!(fsm.policy_ids(), vec![p1.id.clone()]);

    let log = fsm.apply_log();
    assert_eq!(
        log[before..],
        [ApplyRequest::PolicyBatchDelete {
            ids: vec![p2.id.clone()]
        }]
    );
}

fn sized_token(estimated: usize) -> AclToken {
    let mut token = test_token("");
    let overhead = token.estimated_size() + 32 - token.hash.len();
    token.description = "x".repeat(estimated - overhead);
    token
}

#[tokio::test]
async fn upserts_split_by_size_and_count() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig {
        max_batch_bytes: 64 * 1024,
        max_batch_count: 64,
        ..ReplicationConfig::default()
    };

    for _ in 0..200 {
        primary.put_token(sized_token(2048));
    }

    let mut r = token_replicator(&primary, &fsm);
    let report = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();

    assert_eq!(report.upserts, 200);
    // 2 KiB bodies fill the 64 KiB budget 32 at a time, well under the
    // count limit: ceil(200 / 32) applies.
    assert_eq!(report.upsert_applies, 7);
    assert_eq!(fsm.token_ids().len(), 200);

    let mut seen = 0;
    let mut previous_max_id = String::new();
    for req in fsm.apply_log() {
        let ApplyRequest::TokenBatchSet { tokens, cas } = &req else {
            panic!("only upserts expected, got {req:?}");
        };
        assert!(!cas);
        assert!(tokens.len() <= cfg.max_batch_count);
        let total: usize = tokens.iter().map(AclToken::estimated_size).sum();
        assert!(total <= cfg.max_batch_bytes);

        // Batches land in ascending accessor order across applies.
        for token in tokens {
            assert!(token.accessor_id > previous_max_id);
            previous_max_id = token.accessor_id.clone();
        }
        seen += tokens.len();
    }
    assert_eq!(seen, 200);
}

#[tokio::test]
async fn rejected_apply_leaves_index_for_retry() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let p1 = primary.put_policy(test_policy("p1"));
    let mut r = policy_replicator(&primary, &fsm);

    fsm.reject_applies(1, "not the leader");
    let err = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::ApplyRejected { .. }));
    assert!(err.is_retryable());
    assert!(fsm.policy(&p1.id).is_none());

    // The caller never advanced its index, so the retry reissues the same
    // diff and converges.
    let report = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();
    assert_eq!(report.upserts, 1);
    assert_eq!(report.remote_index, primary.index());
    assert_eq!(fsm.policy(&p1.id), Some(p1));
}

#[tokio::test]
async fn deletes_commit_before_any_upsert() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig {
        // Force several batches on both sides.
        max_batch_count: 2,
        ..ReplicationConfig::default()
    };

    let mut r = policy_replicator(&primary, &fsm);
    let keep: Vec<_> = (0..5)
        .map(|i| primary.put_policy(test_policy(&format!("keep{i}"))))
        .collect();
    let stale: Vec<_> = (0..5)
        .map(|i| primary.put_policy(test_policy(&format!("drop{i}"))))
        .collect();
    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();

    for p in &stale {
        primary.delete_policy(&p.id);
    }
    for p in &keep {
        let mut updated = p.clone();
        updated.description = "touched".to_string();
        primary.put_policy(updated);
    }

    let before = fsm.committed_applies();
    let report = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.deletes, 5);
    assert_eq!(report.delete_applies, 3);
    assert_eq!(report.upserts, 5);
    assert_eq!(report.upsert_applies, 3);

    let log = fsm.apply_log();
    let tick = &log[before..];
    let first_set = tick
        .iter()
        .position(|req| !req.is_delete())
        .expect("tick has upserts");
    assert!(
        tick[..first_set].iter().all(ApplyRequest::is_delete),
        "every delete precedes the first upsert"
    );
    assert!(tick[first_set..].iter().all(|req| !req.is_delete()));
}

#[tokio::test]
async fn expired_tokens_replicate_and_remain() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let mut expired = test_token("expired long ago");
    expired.expiration_time = Some(Utc::now() - ChronoDuration::hours(48));
    let expired = primary.put_token(expired);

    let mut r = token_replicator(&primary, &fsm);
    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();
    assert_eq!(fsm.token(&expired.accessor_id), Some(expired.clone()));

    // Still there on the next tick; only the primary may reap it.
    let before = fsm.committed_applies();
    let _ = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap();
    assert_eq!(fsm.committed_applies(), before);
    assert_eq!(fsm.token(&expired.accessor_id), Some(expired));
}

#[tokio::test]
async fn primary_outage_is_unavailable() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    primary.put_policy(test_policy("p1"));
    primary.fail_next("list_policies", 1);

    let mut r = policy_replicator(&primary, &fsm);
    let err = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));
    assert!(err.is_retryable());

    // Outage over: the same tick input succeeds.
    let report = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();
    assert_eq!(report.upserts, 1);
}

#[tokio::test]
async fn batch_fetch_outage_after_deletes_is_retryable() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let p1 = primary.put_policy(test_policy("p1"));
    let mut r = policy_replicator(&primary, &fsm);
    let first = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap().unwrap();

    primary.delete_policy(&p1.id);
    let p2 = primary.put_policy(test_policy("p2"));
    primary.fail_next("policy_batch", 1);

    let err = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unavailable { .. }));
    // The delete already committed; rerunning the tick only has the upsert
    // left to do.
    assert!(fsm.policy(&p1.id).is_none());

    let report = reconcile(&mut r, &cfg, first.remote_index, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.deletes, 0);
    assert_eq!(report.upserts, 1);
    assert_eq!(fsm.policy(&p2.id), Some(p2));
}

#[tokio::test]
async fn quiet_primary_skips_the_fsm() {
    let (primary, fsm, cancel) = setup();
    let cfg = ReplicationConfig::default();

    let mut r = token_replicator(&primary, &fsm);
    // Empty catalogue at index 0, nothing to do at all.
    let outcome = reconcile(&mut r, &cfg, 0, &cancel).await.unwrap();
    assert!(outcome.is_none());
    assert_eq!(fsm.committed_applies(), 0);
}

#[tokio::test]
async fn cancellation_stops_between_applies() {
    let (primary, fsm, _cancel) = setup();
    let cfg = ReplicationConfig {
        max_batch_count: 1,
        ..ReplicationConfig::default()
    };

    for i in 0..4 {
        primary.put_policy(test_policy(&format!("p{i}")));
    }

    // Already cancelled: the tick must refuse to touch consensus.
    let (tx, rx) = watch::channel(true);
    let mut r = policy_replicator(&primary, &fsm);
    let err = reconcile(&mut r, &cfg, 0, &rx).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(fsm.committed_applies(), 0);
    drop(tx);
}
