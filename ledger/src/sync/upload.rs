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

//! Single-consumer upload FIFO: for each unsynced commit, in turn, uploads
//! its still-local object pieces (bounded concurrency) and then the commit
//! bytes themselves, skipping commits while the page has more than one
//! head.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use super::{Backoff, CloudBackend, SyncError};
use crate::commit::CommitId;
use crate::page_storage::{CommitWatcher, PageStorage};

pub struct UploadEngine {
    storage: Arc<PageStorage>,
    backend: Arc<dyn CloudBackend>,
    concurrency: usize,
    backoff: Backoff,
    sender: mpsc::UnboundedSender<CommitId>,
}

impl UploadEngine {
    pub fn new(
        storage: Arc<PageStorage>,
        backend: Arc<dyn CloudBackend>,
        concurrency: usize,
        backoff_seed_millis: u64,
        backoff_max_millis: u64,
    ) -> Arc<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<CommitId>();
        let engine = Arc::new(UploadEngine {
            storage,
            backend,
            concurrency: concurrency.max(1),
            backoff: Backoff::new(backoff_seed_millis, backoff_max_millis),
            sender,
        });
        let worker = engine.clone();
        tokio::spawn(async move {
            while let Some(commit_id) = receiver.recv().await {
                loop {
                    match worker.upload_one(&commit_id).await {
                        Ok(Uploaded::Done) => {
                            worker.backoff.reset();
                            break;
                        }
                        Ok(Uploaded::DeferredMultipleHeads) => break,
                        Err(err) => {
                            warn!(commit = %commit_id, error = %err, "upload failed, retrying");
                            worker.backoff.wait().await;
                        }
                    }
                }
            }
        });
        engine
    }

    /// Enqueues `id` for upload. Called once per newly-created local
    /// commit; re-delivery on backoff is handled internally.
    pub fn enqueue(&self, id: CommitId) {
        let _ = self.sender.send(id);
    }

    pub async fn enqueue_backlog(&self) -> Result<(), SyncError> {
        for id in self.storage.get_unsynced_commits().await? {
            self.enqueue(id);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn upload_one(&self, commit_id: &CommitId) -> Result<Uploaded, SyncError> {
        let heads = self.storage.get_head_commit_ids().await?;
        if heads.len() != 1 {
            return Ok(Uploaded::DeferredMultipleHeads);
        }

        let commit = self.storage.get_commit(commit_id).await?;
        let mut pieces = Vec::new();
        self.storage
            .btree()
            .collect_unsynced_pieces(&commit.root_node_id, &mut pieces)
            .await
            .map_err(crate::page_storage::PageStorageError::from)?;

        let backend = self.backend.clone();
        let storage = self.storage.clone();
        let results: Vec<Result<(), SyncError>> = stream::iter(pieces.into_iter().map(|id| {
            let backend = backend.clone();
            let storage = storage.clone();
            async move {
                let object = storage.get_piece(&id).await?;
                backend.add_object(&id, &object.data).await?;
                storage.mark_piece_synced(&id).await?;
                Ok(())
            }
        }))
        .buffer_unordered(self.concurrency)
        .collect()
        .await;
        for result in results {
            result?;
        }

        self.backend
            .add_commits(vec![(commit.id.clone(), commit.encode())])
            .await?;
        self.storage.mark_commit_synced(&commit.id).await?;
        Ok(Uploaded::Done)
    }
}

enum Uploaded {
    Done,
    DeferredMultipleHeads,
}

#[async_trait::async_trait]
impl CommitWatcher for UploadEngine {
    async fn on_new_commits(&self, commits: &[Arc<crate::commit::Commit>]) {
        for commit in commits {
            self.enqueue(commit.id.clone());
        }
    }
}
