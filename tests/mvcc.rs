//! MVCC engine integration tests.
//!
//! Revision ordering, history reads, transactions, compaction and conflict
//! retry against the memory backend.

mod common;

use common::{harness, harness_with_retry, utf8};
use etkv::adapters::etcd::kv::{CompactionRequest, DeleteRangeRequest, PutRequest, RangeRequest};
use etkv::adapters::etcd::txn::{Compare, CompareResult, RequestOp, ResponseOp, TxnRequest};
use etkv::core::error::EtkvError;
use etkv::mvcc::{Compactor, RetryPolicy, TxnTranslator};
use std::collections::HashSet;
use std::sync::Arc;

fn translator(h: &common::Harness) -> TxnTranslator<etkv::backend::MemoryBackend> {
    TxnTranslator::new(h.index.clone(), Default::default())
}

// ============================================================================
// Revision ordering
// ============================================================================

#[tokio::test]
async fn put_sequence_bumps_mod_revision_and_version() {
    let h = harness();
    let mut last_mod = 0;
    for round in 1..=3 {
        for i in 1..=4 {
            h.index
                .put(&PutRequest::new("k", format!("v{}", i)))
                .await
                .unwrap();
            let kv = h.index.get(b"k", 0).await.unwrap().unwrap();
            assert!(kv.mod_revision > last_mod);
            assert_eq!(kv.version, i);
            last_mod = kv.mod_revision;
        }
        let resp = h.index.delete_range(&DeleteRangeRequest::key("k")).await.unwrap();
        assert_eq!(resp.deleted, 1, "round {}", round);
        assert!(h.index.get(b"k", 0).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn create_revision_survives_updates_and_resets_after_delete() {
    let h = harness();
    h.index.put(&PutRequest::new("k", "a")).await.unwrap();
    h.index.put(&PutRequest::new("k", "b")).await.unwrap();
    let kv = h.index.get(b"k", 0).await.unwrap().unwrap();
    assert_eq!(kv.create_revision, 2);
    assert_eq!(kv.mod_revision, 3);

    h.index.delete_range(&DeleteRangeRequest::key("k")).await.unwrap();
    h.index.put(&PutRequest::new("k", "c")).await.unwrap();
    let kv = h.index.get(b"k", 0).await.unwrap().unwrap();
    assert_eq!(kv.create_revision, 5);
    assert_eq!(kv.version, 1);
}

#[tokio::test]
async fn history_reads_see_past_values() {
    let h = harness();
    h.index.put(&PutRequest::new("x", "1")).await.unwrap();
    h.index.put(&PutRequest::new("x", "2")).await.unwrap();
    h.index.delete_range(&DeleteRangeRequest::key("x")).await.unwrap();

    let at2 = h.index.get(b"x", 2).await.unwrap().unwrap();
    assert_eq!(utf8(&at2.value), "1");
    let at3 = h.index.get(b"x", 3).await.unwrap().unwrap();
    assert_eq!(utf8(&at3.value), "2");
    assert!(h.index.get(b"x", 4).await.unwrap().is_none());

    let err = h.index.get(b"x", 9).await.unwrap_err();
    assert!(matches!(err, EtkvError::FutureRevision { revision: 9, current: 4 }));
}

#[tokio::test]
async fn range_pagination_and_count() {
    let h = harness();
    for key in ["a", "b", "c", "d"] {
        h.index.put(&PutRequest::new(key, key)).await.unwrap();
    }
    let resp = h
        .index
        .range(&RangeRequest::range("a", "\0").with_limit(2))
        .await
        .unwrap();
    assert_eq!(resp.kvs.len(), 2);
    assert_eq!(resp.count, 4);
    assert!(resp.more);
    assert_eq!(resp.header.revision, 5);

    let resp = h.index.range(&RangeRequest::range("b", "d")).await.unwrap();
    let keys: Vec<_> = resp.kvs.iter().map(|kv| utf8(&kv.key).to_string()).collect();
    assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test]
async fn count_ignores_revision_filters() {
    let h = harness();
    for key in ["a", "b", "c", "d"] {
        h.index.put(&PutRequest::new(key, key)).await.unwrap();
    }
    // a=2, b=3, c=4, d=5
    let req = RangeRequest {
        min_mod_revision: 4,
        ..RangeRequest::range("a", "\0")
    };
    let resp = h.index.range(&req).await.unwrap();
    let keys: Vec<_> = resp.kvs.iter().map(|kv| utf8(&kv.key).to_string()).collect();
    assert_eq!(keys, vec!["c", "d"]);
    assert_eq!(resp.count, 4);
    assert!(!resp.more);
}

#[tokio::test]
async fn empty_key_is_rejected() {
    let h = harness();
    let err = h.index.put(&PutRequest::new("", "v")).await.unwrap_err();
    assert!(matches!(err, EtkvError::InvalidArgument { .. }));
    assert_eq!(h.index.current_revision().await.unwrap(), 1);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn compare_and_swap_scenario() {
    let h = harness();
    assert_eq!(
        h.index.put(&PutRequest::new("x", "1")).await.unwrap().header.revision,
        2
    );
    assert_eq!(
        h.index.put(&PutRequest::new("x", "2")).await.unwrap().header.revision,
        3
    );
    assert_eq!(h.index.get(b"x", 0).await.unwrap().unwrap().version, 2);

    let txn = TxnRequest {
        compare: vec![Compare::mod_revision("x", CompareResult::Equal, 3)],
        success: vec![RequestOp::Put(PutRequest::new("x", "3"))],
        failure: vec![],
    };
    let resp = translator(&h).execute(&txn).await.unwrap();
    assert!(resp.succeeded);
    assert_eq!(resp.header.revision, 4);

    let kv = h.index.get(b"x", 0).await.unwrap().unwrap();
    assert_eq!(utf8(&kv.value), "3");
    assert_eq!(kv.mod_revision, 4);
}

#[tokio::test]
async fn false_compare_runs_only_failure_branch() {
    let h = harness();
    h.index.put(&PutRequest::new("x", "1")).await.unwrap();

    let txn = TxnRequest {
        compare: vec![Compare::value("x", CompareResult::Equal, "other")],
        success: vec![RequestOp::Put(PutRequest::new("won", "1"))],
        failure: vec![
            RequestOp::Put(PutRequest::new("lost", "1")),
            RequestOp::Range(RangeRequest::key("x")),
        ],
    };
    let resp = translator(&h).execute(&txn).await.unwrap();
    assert!(!resp.succeeded);
    assert!(h.index.get(b"won", 0).await.unwrap().is_none());
    assert!(h.index.get(b"lost", 0).await.unwrap().is_some());
    match &resp.responses[1] {
        ResponseOp::Range(range) => assert_eq!(utf8(&range.kvs[0].value), "1"),
        other => panic!("unexpected response: {:?}", other),
    }
}

#[tokio::test]
async fn concurrent_cas_has_one_winner() {
    let h = harness_with_retry(RetryPolicy {
        max_attempts: 100,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
    });
    h.index.put(&PutRequest::new("lock", "free")).await.unwrap();
    let txns = Arc::new(translator(&h));

    let mut handles = Vec::new();
    for i in 0..8 {
        let txns = txns.clone();
        handles.push(tokio::spawn(async move {
            let req = TxnRequest {
                compare: vec![Compare::value("lock", CompareResult::Equal, "free")],
                success: vec![RequestOp::Put(PutRequest::new("lock", format!("owner-{}", i)))],
                failure: vec![],
            };
            txns.execute(&req).await.unwrap().succeeded
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.index.current_revision().await.unwrap(), 3);
}

// ============================================================================
// Concurrency and retry
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_puts_get_distinct_increasing_revisions() {
    let h = harness_with_retry(RetryPolicy {
        max_attempts: 100,
        base_backoff_ms: 1,
        max_backoff_ms: 10,
    });

    let mut handles = Vec::new();
    for task in 0..8 {
        let index = h.index.clone();
        handles.push(tokio::spawn(async move {
            let mut revisions = Vec::new();
            for i in 0..10 {
                let req = PutRequest::new(format!("t{}-{}", task, i), "v");
                revisions.push(index.put(&req).await.unwrap().header.revision);
            }
            revisions
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let revisions = handle.await.unwrap();
        assert!(revisions.windows(2).all(|w| w[0] < w[1]));
        for revision in revisions {
            assert!(seen.insert(revision), "revision {} reused", revision);
        }
    }
    assert_eq!(seen.len(), 80);
    assert_eq!(h.index.current_revision().await.unwrap(), 81);
}

#[tokio::test]
async fn injected_conflicts_are_retried() {
    let h = harness();
    h.backend.inject_conflicts(3);
    let resp = h.index.put(&PutRequest::new("k", "v")).await.unwrap();
    assert_eq!(resp.header.revision, 2);
}

#[tokio::test]
async fn exhausted_retries_report_unavailable() {
    let h = harness_with_retry(RetryPolicy {
        max_attempts: 2,
        base_backoff_ms: 1,
        max_backoff_ms: 1,
    });
    h.backend.inject_conflicts(5);
    let err = h.index.put(&PutRequest::new("k", "v")).await.unwrap_err();
    assert!(matches!(err, EtkvError::Unavailable { .. }));
    assert_eq!(h.index.current_revision().await.unwrap(), 1);
}

// ============================================================================
// Compaction
// ============================================================================

#[tokio::test]
async fn compaction_drops_history_but_not_latest() {
    let h = harness();
    for v in ["1", "2", "3"] {
        h.index.put(&PutRequest::new("x", v)).await.unwrap();
    }
    h.index.put(&PutRequest::new("gone", "1")).await.unwrap();
    h.index.delete_range(&DeleteRangeRequest::key("gone")).await.unwrap();
    // x@2, x@3, x@4, gone@5, tombstone@6
    let compactor = Compactor::new(h.index.clone(), 1);
    compactor
        .compact(&CompactionRequest {
            revision: 6,
            physical: true,
        })
        .await
        .unwrap();

    let err = h.index.get(b"x", 3).await.unwrap_err();
    assert!(matches!(err, EtkvError::RevisionCompacted { revision: 3, .. }));
    let latest = h.index.get(b"x", 0).await.unwrap().unwrap();
    assert_eq!(utf8(&latest.value), "3");
    assert_eq!(latest.version, 3);
    assert!(h.index.get(b"gone", 0).await.unwrap().is_none());

    let state = h.index.state().await.unwrap();
    assert_eq!(state.compacted, 6);
    assert_eq!(state.current, 6);
}

#[tokio::test]
async fn compaction_bounds() {
    let h = harness();
    h.index.put(&PutRequest::new("x", "1")).await.unwrap();
    let compactor = Compactor::new(h.index.clone(), 10);

    let future = compactor
        .compact(&CompactionRequest {
            revision: 5,
            physical: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(future, EtkvError::InvalidArgument { .. }));

    compactor
        .compact(&CompactionRequest {
            revision: 2,
            physical: false,
        })
        .await
        .unwrap();
    // Compacting at the watermark again is a no-op.
    compactor
        .compact(&CompactionRequest {
            revision: 2,
            physical: false,
        })
        .await
        .unwrap();
    let below = compactor
        .compact(&CompactionRequest {
            revision: 1,
            physical: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(below, EtkvError::InvalidArgument { .. }));
}
