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

use ledger::btree::Priority;
use ledger::commit::CommitId;
use ledger::page_storage::put_value;
use ledger::testutils::open_test_page;

#[tokio::test]
async fn single_device_put_then_get() {
    let (_dir, storage) = open_test_page().await;
    let base = storage.get_head_commit_ids().await.unwrap().remove(0);

    let commit = put_value(
        &storage,
        base,
        b"name".to_vec(),
        b"Alice".to_vec(),
        Priority::Eager,
    )
    .await
    .unwrap();

    let entry = storage.get_entry_from_commit(&commit.id, b"name").await.unwrap().unwrap();
    let value = storage.get_object(&entry.object_id, ledger::object_store::Location::Local).await.unwrap();
    assert_eq!(value.data, b"Alice");
}

#[tokio::test]
async fn two_puts_to_the_same_key_apply_in_client_submission_order() {
    let (_dir, storage) = open_test_page().await;

    // A single client serializes its own calls by always starting the next
    // journal from the head its previous put produced; the second put here
    // races nothing but still must win since it was submitted after.
    let base = storage.get_head_commit_ids().await.unwrap().remove(0);
    let first = put_value(&storage, base, b"name".to_vec(), b"Alice".to_vec(), Priority::Eager)
        .await
        .unwrap();
    let second = put_value(
        &storage,
        first.id.clone(),
        b"name".to_vec(),
        b"Bob".to_vec(),
        Priority::Eager,
    )
    .await
    .unwrap();

    let head = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(head, vec![second.id.clone()]);

    let entry = storage
        .get_entry_from_commit(&second.id, b"name")
        .await
        .unwrap()
        .unwrap();
    let value = storage
        .get_object(&entry.object_id, ledger::object_store::Location::Local)
        .await
        .unwrap();
    assert_eq!(value.data, b"Bob");
}

#[tokio::test]
async fn fresh_page_starts_at_the_sentinel_commit() {
    let (_dir, storage) = open_test_page().await;
    let heads = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(heads, vec![CommitId::sentinel()]);
}
