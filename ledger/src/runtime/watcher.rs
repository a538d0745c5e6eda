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

//! Per-watcher pagination: computes `diff(last, current)` against a key
//! prefix, slices it into messages respecting byte/handle caps, and walks
//! the watcher through `PARTIAL_STARTED → PARTIAL_CONTINUED* →
//! PARTIAL_COMPLETED` (or a single `COMPLETED`), coalescing any head that
//! arrives mid-pagination.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::instrument;

use crate::btree::Change;
use crate::commit::CommitId;
use crate::page_storage::PageStorage;

/// A page of changes delivered to a watcher, tagged with its place in a
/// (possibly trivial) pagination sequence.
#[derive(Debug, Clone)]
pub enum WatcherMessage {
    Completed(Vec<Change>),
    PartialStarted(Vec<Change>),
    PartialContinued(Vec<Change>),
    PartialCompleted(Vec<Change>),
}

/// The client-side channel a [`PageWatcherContainer`] delivers pagination
/// messages to. Returns `false` once the watcher has disconnected, which
/// aborts any pagination in progress.
#[async_trait]
pub trait WatcherSink: Send + Sync {
    async fn send(&self, message: WatcherMessage) -> bool;
}

pub struct PageWatcherContainer {
    storage: Arc<PageStorage>,
    sink: Arc<dyn WatcherSink>,
    key_prefix: Vec<u8>,
    max_bytes: usize,
    max_handles: usize,
    last_commit: Mutex<CommitId>,
    current_commit: Mutex<CommitId>,
    draining: Mutex<()>,
    on_drained: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl PageWatcherContainer {
    pub fn new(
        storage: Arc<PageStorage>,
        sink: Arc<dyn WatcherSink>,
        key_prefix: Vec<u8>,
        initial_commit: CommitId,
        max_bytes: usize,
        max_handles: usize,
    ) -> Arc<Self> {
        Arc::new(PageWatcherContainer {
            storage,
            sink,
            key_prefix,
            max_bytes,
            max_handles,
            last_commit: Mutex::new(initial_commit.clone()),
            current_commit: Mutex::new(initial_commit),
            draining: Mutex::new(()),
            on_drained: Mutex::new(None),
        })
    }

    pub async fn set_on_drained(&self, callback: Box<dyn Fn() + Send + Sync>) {
        *self.on_drained.lock().await = Some(callback);
    }

    /// Called whenever the page's branch head advances. Queues the new
    /// target and, if no pagination is already running, drains it.
    #[instrument(skip(self))]
    pub async fn notify_head(&self, new_head: CommitId) {
        *self.current_commit.lock().await = new_head;
        let Ok(_guard) = self.draining.try_lock() else {
            // A drain is already in flight; it will observe the updated
            // `current_commit` on its next loop iteration.
            return;
        };
        self.drain_locked().await;
    }

    async fn drain_locked(&self) {
        loop {
            let last = self.last_commit.lock().await.clone();
            let current = self.current_commit.lock().await.clone();
            if last == current {
                if let Some(callback) = self.on_drained.lock().await.as_ref() {
                    callback();
                }
                return;
            }

            let mut changes = Vec::new();
            if let Err(err) = self
                .storage
                .get_commit_contents_diff(&last, &current, &self.key_prefix, &mut |c| changes.push(c))
                .await
            {
                tracing::warn!(error = %err, "watcher diff failed, skipping to latest head");
                *self.last_commit.lock().await = current;
                continue;
            }

            let pages = paginate(changes, self.max_bytes, self.max_handles);
            let page_count = pages.len().max(1);
            for (i, page) in pages.into_iter().enumerate() {
                let message = if page_count == 1 {
                    WatcherMessage::Completed(page)
                } else if i == 0 {
                    WatcherMessage::PartialStarted(page)
                } else if i == page_count - 1 {
                    WatcherMessage::PartialCompleted(page)
                } else {
                    WatcherMessage::PartialContinued(page)
                };
                if !self.sink.send(message).await {
                    return;
                }
            }
            *self.last_commit.lock().await = current;
        }
    }
}

fn change_weight(change: &Change) -> usize {
    match change {
        Change::Put(entry) => entry.key.len() + 32,
        Change::Delete(key) => key.len(),
    }
}

fn paginate(changes: Vec<Change>, max_bytes: usize, max_handles: usize) -> Vec<Vec<Change>> {
    if changes.is_empty() {
        return vec![Vec::new()];
    }
    let mut pages = Vec::new();
    let mut current = Vec::new();
    let mut bytes = 0usize;
    for change in changes {
        let weight = change_weight(&change);
        if !current.is_empty() && (bytes + weight > max_bytes || current.len() >= max_handles) {
            pages.push(std::mem::take(&mut current));
            bytes = 0;
        }
        bytes += weight;
        current.push(change);
    }
    if !current.is_empty() {
        pages.push(current);
    }
    pages
}
