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

use std::time::Duration;

use ledger::btree::Priority;
use ledger::config::LedgerConfig;
use ledger::page_storage::put_value;
use ledger::sync::PageSync;
use ledger::testutils::{open_test_page, FakeCloudBackend};

#[tokio::test]
async fn five_offline_commits_all_reach_synced_once_the_backend_comes_online() {
    let (_dir, storage) = open_test_page().await;
    let mut head = storage.get_head_commit_ids().await.unwrap().remove(0);

    for i in 0..5 {
        let commit = put_value(
            &storage,
            head,
            format!("key-{i}").into_bytes(),
            format!("value-{i}").into_bytes(),
            Priority::Eager,
        )
        .await
        .unwrap();
        head = commit.id.clone();
    }
    assert_eq!(storage.get_unsynced_commits().await.unwrap().len(), 5);

    let backend = FakeCloudBackend::new();
    let config = LedgerConfig::default();
    let _sync = PageSync::start(storage.clone(), backend.clone(), &config).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if storage.get_unsynced_commits().await.unwrap().is_empty() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "uploads never drained");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(backend.commit_count().await, 5);
    let last_commit = storage.get_commit(&head).await.unwrap();
    assert_eq!(backend.latest_commit_timestamp().await, Some(last_commit.timestamp.to_utc()));
}
