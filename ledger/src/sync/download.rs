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

//! Startup backlog fetch plus steady-state handling of server-pushed commit
//! batches. A batch in flight buffers any further pushes so they're applied
//! strictly after it, never interleaved.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use super::cloud_backend::{CommitBatch, CommitObserver};
use super::{Backoff, CloudBackend, SyncError};
use crate::page_storage::PageStorage;

const SYNC_TIMESTAMP_KEY: &str = "sync.download.timestamp";

pub struct DownloadEngine {
    storage: Arc<PageStorage>,
    backend: Arc<dyn CloudBackend>,
    backoff: Backoff,
    in_flight: Mutex<()>,
}

impl DownloadEngine {
    pub fn new(
        storage: Arc<PageStorage>,
        backend: Arc<dyn CloudBackend>,
        backoff_seed_millis: u64,
        backoff_max_millis: u64,
    ) -> Arc<Self> {
        Arc::new(DownloadEngine {
            storage,
            backend,
            backoff: Backoff::new(backoff_seed_millis, backoff_max_millis),
            in_flight: Mutex::new(()),
        })
    }

    async fn last_timestamp(&self) -> Result<chrono::DateTime<chrono::Utc>, SyncError> {
        match self.storage.get_sync_metadata(SYNC_TIMESTAMP_KEY).await? {
            Some(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|err| SyncError::MalformedNotification(err.to_string()))?;
                text.parse::<chrono::DateTime<chrono::Utc>>()
                    .map_err(|err| SyncError::MalformedNotification(err.to_string()))
            }
            None => Ok(chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap()),
        }
    }

    /// Runs the startup protocol: fetch the backlog since the last known
    /// cursor, persist it, and return once caught up so the caller can fire
    /// its "backlog downloaded" signal and install the push watch.
    #[instrument(skip(self))]
    pub async fn fetch_backlog(&self) -> Result<(), SyncError> {
        loop {
            let since = self.last_timestamp().await?;
            match self.backend.get_commits(since).await {
                Ok(batch) => {
                    self.apply_batch(batch).await?;
                    self.backoff.reset();
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "backlog download failed, retrying");
                    self.backoff.wait().await;
                }
            }
        }
    }

    #[instrument(skip(self, batch))]
    async fn apply_batch(&self, batch: CommitBatch) -> Result<(), SyncError> {
        let _guard = self.in_flight.lock().await;
        if batch.records.is_empty() {
            return Ok(());
        }
        let commits = batch
            .records
            .iter()
            .map(|(id, bytes, _)| (id.clone(), bytes.clone()))
            .collect();
        self.storage.add_commits_from_sync(commits).await?;
        // The cursor only advances after the commits it covers are durable,
        // so a crash between the two replays the same batch rather than
        // silently skipping it.
        self.storage
            .set_sync_metadata(
                SYNC_TIMESTAMP_KEY,
                batch.latest_timestamp.to_rfc3339().as_bytes(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CommitObserver for DownloadEngine {
    async fn on_commits(&self, batch: CommitBatch) {
        if let Err(err) = self.apply_batch(batch).await {
            warn!(error = %err, "failed to apply pushed commit batch");
        }
    }
}
