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
use ledger::page_db::JournalKind;
use ledger::testutils::open_test_page;

#[tokio::test]
async fn enumerating_by_prefix_returns_only_matching_keys_in_order() {
    let (_dir, storage) = open_test_page().await;
    let mut base = storage.get_head_commit_ids().await.unwrap().remove(0);

    let journal = storage.start_commit(base.clone(), JournalKind::Implicit).await.unwrap();
    for key in ["000", "001", "010", "011"] {
        let object_id = storage
            .add_object_from_local(ledger::object_store::BufferDataSource::new(key.as_bytes().to_vec()))
            .await
            .unwrap();
        journal.put(key.as_bytes().to_vec(), object_id, Priority::Eager).await.unwrap();
    }
    let commit = storage.commit_journal(journal).await.unwrap();
    base = commit.id.clone();

    let prefix = b"00";
    let mut matched = Vec::new();
    storage
        .get_commit_contents(&base, prefix, &mut |entry| {
            if !entry.key.starts_with(prefix) {
                return false;
            }
            matched.push(entry.key.clone());
            true
        })
        .await
        .unwrap();

    assert_eq!(matched, vec![b"000".to_vec(), b"001".to_vec()]);
}
