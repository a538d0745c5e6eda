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
use ledger::merge::{MergeResolver, MergeStrategy};
use ledger::page_storage::put_value;
use ledger::testutils::open_test_page;

#[tokio::test]
async fn two_devices_concurrent_writes_converge_to_the_newer_timestamp() {
    let (_dir, storage) = open_test_page().await;
    let sentinel = storage.get_head_commit_ids().await.unwrap().remove(0);

    // Two devices, offline from each other, both branch off the same base.
    let device_a = put_value(&storage, sentinel.clone(), b"k".to_vec(), b"a1".to_vec(), Priority::Eager)
        .await
        .unwrap();
    let device_b = put_value(&storage, sentinel, b"k".to_vec(), b"b1".to_vec(), Priority::Eager)
        .await
        .unwrap();
    assert!(device_b.timestamp >= device_a.timestamp);

    let heads = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(heads.len(), 2);

    let resolver = MergeResolver::new(storage.clone(), MergeStrategy::LastOneWins, 1, 10);
    resolver.run_until_converged().await.unwrap();

    let heads = storage.get_head_commit_ids().await.unwrap();
    assert_eq!(heads.len(), 1);

    let merged = heads[0].clone();
    let entry = storage.get_entry_from_commit(&merged, b"k").await.unwrap().unwrap();
    let value = storage
        .get_object(&entry.object_id, ledger::object_store::Location::Local)
        .await
        .unwrap();
    assert_eq!(value.data, b"b1");
}
