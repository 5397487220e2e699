//! Integration tests for the `Dragonfly` backend.
//!
//! These tests require a live Dragonfly (or Redis) instance. Run with:
//!
//! ```bash
//! docker run -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! cargo test -p keystone-store -- --ignored
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    missing_docs
)]

use keystone_store::{
    CommitOutcome, DragonflyStore, KeyReader, Op, Reply, VersionedStore, WriteBatch,
};

/// Dragonfly connection URL for the local Docker instance.
const DRAGONFLY_URL: &str = "redis://localhost:6379";

async fn connect() -> DragonflyStore {
    let store = DragonflyStore::connect(DRAGONFLY_URL, 4)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    store.flush_all().await.expect("Failed to flush");
    store
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn apply_returns_one_reply_per_op() {
    let store = connect().await;
    let replies = store
        .apply(WriteBatch::from(vec![
            Op::HIncrBy {
                key: "account:a".to_owned(),
                field: "funds".to_owned(),
                delta: 15,
            },
            Op::ZAdd {
                key: "market:".to_owned(),
                member: "sku1.a".to_owned(),
                score: 10.0,
            },
            Op::ZRange {
                key: "market:".to_owned(),
                start: 0,
                stop: -1,
            },
        ]))
        .await
        .expect("apply");

    assert_eq!(replies[0], Reply::Int(15));
    assert_eq!(replies[1], Reply::Int(1));
    assert_eq!(replies[2], Reply::Members(vec!["sku1.a".to_owned()]));
    assert_eq!(store.zscore("market:", "sku1.a").await.unwrap(), Some(10.0));
    assert_eq!(store.zrank("market:", "sku1.a").await.unwrap(), Some(0));
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn foreign_write_between_watch_and_exec_conflicts() {
    let store = connect().await;
    let txn = store.watch(&["inventory:a".to_owned()]).await.expect("watch");

    store
        .apply(WriteBatch::new().with(Op::SAdd {
            key: "inventory:a".to_owned(),
            member: "sku1".to_owned(),
        }))
        .await
        .expect("foreign write");

    let outcome = store
        .commit(
            txn,
            WriteBatch::new().with(Op::Set {
                key: "marker".to_owned(),
                value: "x".to_owned(),
            }),
        )
        .await
        .expect("commit");

    assert_eq!(outcome, CommitOutcome::Conflict);
    assert_eq!(store.get("marker").await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn unwatch_returns_connection_for_reuse() {
    let store = connect().await;
    for _ in 0..8 {
        let txn = store.watch(&["k".to_owned()]).await.expect("watch");
        assert!(!txn.exists("k").await.unwrap());
        store.unwatch(txn).await.expect("unwatch");
    }
    let txn = store.watch(&["k".to_owned()]).await.expect("watch");
    let outcome = store
        .commit(
            txn,
            WriteBatch::new().with(Op::Set {
                key: "k".to_owned(),
                value: "v".to_owned(),
            }),
        )
        .await
        .expect("commit");
    assert_eq!(outcome, CommitOutcome::Committed(vec![Reply::Ok]));
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn expire_reports_whether_the_key_exists() {
    let store = connect().await;
    let replies = store
        .apply(WriteBatch::from(vec![
            Op::Expire {
                key: "missing".to_owned(),
                seconds: 60,
            },
            Op::Set {
                key: "voted:1".to_owned(),
                value: "x".to_owned(),
            },
            Op::Expire {
                key: "voted:1".to_owned(),
                seconds: 60,
            },
        ]))
        .await
        .unwrap();

    assert_eq!(replies, vec![Reply::Int(0), Reply::Ok, Reply::Int(1)]);
    assert!(store.exists("voted:1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn watch_waits_for_a_free_connection() {
    let store = DragonflyStore::connect(DRAGONFLY_URL, 1)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    let held = store.watch(&["a".to_owned()]).await.unwrap();

    let blocked = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        store.watch(&["b".to_owned()]),
    )
    .await;
    assert!(blocked.is_err());

    store.unwatch(held).await.unwrap();
    let next = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        store.watch(&["b".to_owned()]),
    )
    .await
    .expect("watch should proceed once the connection is released")
    .unwrap();
    store.unwatch(next).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn failed_commit_releases_its_connection() {
    let store = DragonflyStore::connect(DRAGONFLY_URL, 1)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?");
    store.flush_all().await.unwrap();
    store
        .apply(WriteBatch::new().with(Op::Set {
            key: "k".to_owned(),
            value: "v".to_owned(),
        }))
        .await
        .unwrap();

    for _ in 0..3 {
        let txn = store.watch(&["k".to_owned()]).await.unwrap();
        let result = store
            .commit(
                txn,
                WriteBatch::new().with(Op::SAdd {
                    key: "k".to_owned(),
                    member: "m".to_owned(),
                }),
            )
            .await;
        assert!(result.is_err());
    }

    let txn = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        store.watch(&["k".to_owned()]),
    )
    .await
    .expect("pool slot should be free after failed commits")
    .unwrap();
    store.unwatch(txn).await.unwrap();
}
