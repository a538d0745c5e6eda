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
use ledger::hash::{ObjectId, ObjectType};
use ledger::object_store::{BufferDataSource, Location, ObjectStoreError};
use ledger::page_storage::put_value;
use ledger::testutils::open_test_page;

#[tokio::test]
async fn a_one_megabyte_value_round_trips_through_streaming_split_and_assemble() {
    let (_dir, storage) = open_test_page().await;
    let base = storage.get_head_commit_ids().await.unwrap().remove(0);
    let big = vec![b'a'; 1_000_000];

    let commit = put_value(&storage, base, b"big".to_vec(), big.clone(), Priority::Lazy)
        .await
        .unwrap();

    let entry = storage.get_entry_from_commit(&commit.id, b"big").await.unwrap().unwrap();
    let assembled = storage.get_object(&entry.object_id, Location::Local).await.unwrap();
    assert_eq!(assembled.data.len(), 1_000_000);
    assert!(assembled.data.iter().all(|&b| b == b'a'));
}

#[tokio::test]
async fn add_from_sync_with_a_wrong_expected_id_is_rejected() {
    let (_dir, storage) = open_test_page().await;
    let data = vec![b'z'; 500_000];
    let wrong_id = ObjectId::compute(ObjectType::Value, b"not the right content at all");

    let result = storage
        .objects()
        .add_from_sync(&wrong_id, BufferDataSource::new(data))
        .await;

    assert!(matches!(result, Err(ObjectStoreError::ObjectIdMismatch { .. })));
}
