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

//! Test-only fixtures: a temp-directory-backed page, and an in-memory
//! `CloudBackend` double used in place of a real network transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::commit::CommitId;
use crate::hash::ObjectId;
use crate::page_db::RedbPageDb;
use crate::page_storage::PageStorage;
use crate::sync::{CloudBackend, CommitBatch, CommitObserver, SyncError, WatchToken};

pub fn new_temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("ledger-test-")
        .tempdir()
        .unwrap()
}

/// Opens a fresh page backed by a `redb` file inside a fresh temp
/// directory. The directory is returned alongside the page so the caller
/// keeps it alive for as long as the page is in use.
pub async fn open_test_page() -> (tempfile::TempDir, Arc<PageStorage>) {
    let dir = new_temp_dir();
    let db = RedbPageDb::open(&dir.path().join("page.redb")).unwrap();
    let storage = PageStorage::open(Arc::new(db)).await.unwrap();
    (dir, storage)
}

/// A deterministic, in-process stand-in for a cloud mirror: objects and
/// commits land in plain maps, and `watch_commits` observers are invoked
/// synchronously by [`FakeCloudBackend::push`] rather than by a real push
/// channel.
#[derive(Default)]
pub struct FakeCloudBackend {
    inner: Mutex<FakeCloudBackendState>,
}

#[derive(Default)]
struct FakeCloudBackendState {
    objects: HashMap<ObjectId, Vec<u8>>,
    commits: Vec<(CommitId, Vec<u8>, DateTime<Utc>)>,
    next_watch_token: WatchToken,
    watchers: HashMap<WatchToken, Arc<dyn CommitObserver>>,
}

impl FakeCloudBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeCloudBackend::default())
    }

    /// Simulates a server-pushed batch: records it as part of history and
    /// notifies every watcher currently installed.
    pub async fn push(&self, id: CommitId, bytes: Vec<u8>, timestamp: DateTime<Utc>) {
        let watchers: Vec<Arc<dyn CommitObserver>> = {
            let mut state = self.inner.lock().await;
            state.commits.push((id.clone(), bytes.clone(), timestamp));
            state.watchers.values().cloned().collect()
        };
        let batch = CommitBatch {
            records: vec![(id, bytes, timestamp)],
            latest_timestamp: timestamp,
        };
        for watcher in watchers {
            watcher.on_commits(batch.clone()).await;
        }
    }

    /// Number of commits this backend has ever received, via either
    /// `add_commits` or `push`. Test-only introspection.
    pub async fn commit_count(&self) -> usize {
        self.inner.lock().await.commits.len()
    }

    /// The latest commit timestamp this backend has recorded, if any.
    pub async fn latest_commit_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.commits.iter().map(|(_, _, ts)| *ts).max()
    }
}

#[async_trait]
impl CloudBackend for FakeCloudBackend {
    async fn add_object(&self, id: &ObjectId, bytes: &[u8]) -> Result<(), SyncError> {
        self.inner.lock().await.objects.insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Vec<u8>, SyncError> {
        self.inner
            .lock()
            .await
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::Network(format!("no such object {id}")))
    }

    async fn add_commits(&self, commits: Vec<(CommitId, Vec<u8>)>) -> Result<(), SyncError> {
        let mut state = self.inner.lock().await;
        for (id, bytes) in commits {
            let timestamp = Utc::now();
            state.commits.push((id, bytes, timestamp));
        }
        Ok(())
    }

    async fn get_commits(&self, since: DateTime<Utc>) -> Result<CommitBatch, SyncError> {
        let state = self.inner.lock().await;
        let records: Vec<_> = state
            .commits
            .iter()
            .filter(|(_, _, ts)| *ts > since)
            .cloned()
            .collect();
        let latest_timestamp = records.iter().map(|(_, _, ts)| *ts).max().unwrap_or(since);
        Ok(CommitBatch {
            records,
            latest_timestamp,
        })
    }

    async fn watch_commits(
        &self,
        _since: DateTime<Utc>,
        observer: Arc<dyn CommitObserver>,
    ) -> Result<WatchToken, SyncError> {
        let mut state = self.inner.lock().await;
        let token = state.next_watch_token;
        state.next_watch_token += 1;
        state.watchers.insert(token, observer);
        Ok(token)
    }

    async fn unwatch_commits(&self, token: WatchToken) -> Result<(), SyncError> {
        self.inner.lock().await.watchers.remove(&token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_backend_round_trips_an_object() {
        let backend = FakeCloudBackend::new();
        let id = ObjectId::compute(crate::hash::ObjectType::Value, b"hello");
        backend.add_object(&id, b"hello").await.unwrap();
        assert_eq!(backend.get_object(&id).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn fake_backend_filters_commits_by_timestamp() {
        let backend = FakeCloudBackend::new();
        let id = CommitId::sentinel();
        backend.add_commits(vec![(id.clone(), vec![1, 2, 3])]).await.unwrap();
        let since = Utc::now() + chrono::Duration::seconds(60);
        let batch = backend.get_commits(since).await.unwrap();
        assert!(batch.records.is_empty());
    }

    #[tokio::test]
    async fn open_test_page_starts_with_a_sentinel_head() {
        let (_dir, storage) = open_test_page().await;
        let heads = storage.get_head_commit_ids().await.unwrap();
        assert_eq!(heads, vec![CommitId::sentinel()]);
    }
}
