// Copyright 2021 The Jujutsu Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ledger::btree::{Change, Entry, Priority};
use ledger::commit::Commit;
use ledger::merge::{ConflictResolver, MergeError, MergeResolver, MergeStrategy};
use ledger::page_db::JournalKind;
use ledger::page_storage::{put_value, PageStorage};
use ledger::testutils::open_test_page;

/// Always resolves a conflict by keeping the right side's value, recording
/// whether it was ever invoked so tests can assert the auto-merge fast path
/// was (or wasn't) bypassed.
struct KeepRight {
    called: AtomicBool,
}

impl KeepRight {
    fn new() -> Arc<Self> {
        Arc::new(KeepRight {
            called: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl ConflictResolver for KeepRight {
    async fn resolve(
        &self,
        storage: &PageStorage,
        _left: &Commit,
        right: &Commit,
        ancestor: &Commit,
    ) -> Result<Vec<Change>, MergeError> {
        self.called.store(true, Ordering::SeqCst);
        let mut changes = Vec::new();
        storage
            .btree()
            .diff(&ancestor.root_node_id, &right.root_node_id, &[], &mut |c| changes.push(c))
            .await?;
        Ok(changes)
    }
}

async fn put_bytes(storage: &PageStorage, base: ledger::commit::CommitId, key: &[u8], value: &[u8]) -> Arc<Commit> {
    put_value(storage, base, key.to_vec(), value.to_vec(), Priority::Eager)
        .await
        .unwrap()
}

async fn delete_key(storage: &PageStorage, base: ledger::commit::CommitId, key: &[u8]) -> Arc<Commit> {
    let journal = storage.start_commit(base, JournalKind::Implicit).await.unwrap();
    journal.delete(key.to_vec()).await.unwrap();
    storage.commit_journal(journal).await.unwrap()
}

async fn entry_value(storage: &PageStorage, commit: &ledger::commit::CommitId, key: &[u8]) -> Option<Vec<u8>> {
    let entry = storage.get_entry_from_commit(commit, key).await.unwrap();
    match entry {
        Some(Entry { object_id, .. }) => Some(
            storage
                .get_object(&object_id, ledger::object_store::Location::Local)
                .await
                .unwrap()
                .data,
        ),
        None => None,
    }
}

#[tokio::test]
async fn disjoint_changes_auto_merge_without_the_fallback_resolver() {
    let (_dir, storage) = open_test_page().await;
    let sentinel = storage.get_head_commit_ids().await.unwrap().remove(0);

    let ancestor = put_bytes(&storage, sentinel, b"x", b"X").await;
    let ancestor = put_bytes(&storage, ancestor.id.clone(), b"y", b"Y").await;

    let left = put_bytes(&storage, ancestor.id.clone(), b"z", b"Z").await;
    let right = delete_key(&storage, ancestor.id.clone(), b"x").await;
    assert_ne!(left.id, right.id);

    let resolver_double = KeepRight::new();
    let resolver = MergeResolver::new(
        storage.clone(),
        MergeStrategy::AutoWithFallback(resolver_double.clone()),
        1,
        10,
    );
    resolver.run_until_converged().await.unwrap();

    assert!(
        !resolver_double.called.load(Ordering::SeqCst),
        "disjoint changes should merge automatically, without invoking the fallback"
    );

    let heads = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(heads.len(), 1);
    let merged = &heads[0];
    assert_eq!(entry_value(&storage, merged, b"x").await, None);
    assert_eq!(entry_value(&storage, merged, b"y").await, Some(b"Y".to_vec()));
    assert_eq!(entry_value(&storage, merged, b"z").await, Some(b"Z".to_vec()));
}

#[tokio::test]
async fn overlapping_changes_fall_back_to_the_custom_resolver() {
    let (_dir, storage) = open_test_page().await;
    let sentinel = storage.get_head_commit_ids().await.unwrap().remove(0);

    let ancestor = put_bytes(&storage, sentinel, b"x", b"X").await;
    let ancestor = put_bytes(&storage, ancestor.id.clone(), b"y", b"Y").await;

    // Left now also touches "x", so left and right overlap on that key.
    let left = put_bytes(&storage, ancestor.id.clone(), b"x", b"x-from-left").await;
    let left = put_bytes(&storage, left.id.clone(), b"z", b"Z").await;
    let right = delete_key(&storage, ancestor.id.clone(), b"x").await;
    assert_ne!(left.id, right.id);

    let resolver_double = KeepRight::new();
    let resolver = MergeResolver::new(
        storage.clone(),
        MergeStrategy::AutoWithFallback(resolver_double.clone()),
        1,
        10,
    );
    resolver.run_until_converged().await.unwrap();

    assert!(
        resolver_double.called.load(Ordering::SeqCst),
        "an overlapping key must trigger the fallback resolver"
    );

    let heads = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(heads.len(), 1);
}
