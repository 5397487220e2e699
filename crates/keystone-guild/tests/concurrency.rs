//! Autocomplete under concurrent callers and membership churn.

#![allow(clippy::unwrap_used, clippy::panic, missing_docs)]

use std::sync::Arc;

use keystone_core::{TransactionCoordinator, TxOutcome};
use keystone_guild::{GuildDirectory, MAX_RESULTS};
use keystone_store::MemoryStore;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_autocompletes_are_bounded_and_leave_no_sentinels() {
    let store = MemoryStore::new();
    let dir = GuildDirectory::new(TransactionCoordinator::new(Arc::new(store.clone())));
    for first in ['a', 'b', 'c'] {
        for second in 'a'..='z' {
            dir.join_guild("g", &format!("{first}{second}x")).await.unwrap();
        }
    }

    let mut handles = Vec::new();
    for i in 0..16_u8 {
        let dir = dir.clone();
        handles.push(tokio::spawn(async move {
            let prefix = match i % 4 {
                0 => "a",
                1 => "bq",
                2 => "c",
                _ => "",
            };
            if i % 5 == 0 {
                dir.join_guild("g", &format!("churn{i}")).await.unwrap();
            }
            (prefix, dir.autocomplete_prefix("g", prefix).await.unwrap())
        }));
    }

    for handle in handles {
        let (prefix, outcome) = handle.await.unwrap();
        let TxOutcome::Committed(found) = outcome else {
            panic!("autocomplete {prefix:?} did not commit: {outcome:?}");
        };
        assert!(found.len() <= usize::try_from(MAX_RESULTS).unwrap());
        assert!(found.iter().all(|name| name.starts_with(prefix)), "{found:?}");
        assert!(!found.is_empty(), "{prefix:?}");
    }

    let members = dir.members("g").await.unwrap();
    assert!(members.iter().all(|m| !m.contains('{')), "{members:?}");
    assert_eq!(members.len(), 78 + 4);
}
