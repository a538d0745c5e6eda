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

//! Per-page mirroring to a cloud backend: ordered upload of local commits
//! and objects, ordered download of remote commits with lazy object fetch,
//! and the backoff/retry policy shared by both directions.
//!
//! Grounded on `store.rs`'s remote-backend delegate pattern: the page never
//! talks to the network directly, only through the [`CloudBackend`]
//! capability this module defines.

mod backoff;
mod cloud_backend;
mod download;
mod upload;

use std::sync::Arc;

use thiserror::Error;

pub use backoff::Backoff;
pub use cloud_backend::{AuthProvider, CloudBackend, CommitBatch, CommitObserver, WatchToken};
pub use download::DownloadEngine;
pub use upload::UploadEngine;

use crate::hash::ObjectId;
use crate::page_storage::PageStorage;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("object content does not match claimed id {expected}")]
    ObjectIdMismatch { expected: ObjectId },
    #[error("malformed sync notification: {0}")]
    MalformedNotification(String),
    #[error(transparent)]
    Storage(#[from] crate::error::LedgerError),
}

impl From<crate::object_store::ObjectStoreError> for SyncError {
    fn from(value: crate::object_store::ObjectStoreError) -> Self {
        use crate::object_store::ObjectStoreError as E;
        match value {
            E::ObjectIdMismatch { expected } => SyncError::ObjectIdMismatch { expected },
            other => SyncError::Storage(other.into()),
        }
    }
}

impl From<crate::page_storage::PageStorageError> for SyncError {
    fn from(value: crate::page_storage::PageStorageError) -> Self {
        SyncError::Storage(crate::error::LedgerError::IllegalState(value.to_string()))
    }
}

/// Wires a page to a cloud backend: installs the upload engine as a commit
/// watcher, runs the download engine's startup protocol, and registers
/// itself as the page's network object-fetch delegate.
pub struct PageSync {
    backend: Arc<dyn CloudBackend>,
    upload: Arc<UploadEngine>,
    download: Arc<DownloadEngine>,
}

impl PageSync {
    pub async fn start(
        storage: Arc<PageStorage>,
        backend: Arc<dyn CloudBackend>,
        config: &crate::config::LedgerConfig,
    ) -> Result<Arc<Self>, SyncError> {
        let upload = UploadEngine::new(
            storage.clone(),
            backend.clone(),
            config.upload_concurrency,
            config.backoff_seed_millis,
            config.backoff_max_millis,
        );
        let download = DownloadEngine::new(
            storage.clone(),
            backend.clone(),
            config.backoff_seed_millis,
            config.backoff_max_millis,
        );
        let sync = Arc::new(PageSync {
            backend,
            upload,
            download,
        });

        storage
            .set_network_fetcher(Some(sync.clone() as Arc<dyn crate::object_store::NetworkObjectFetcher>))
            .await;
        storage
            .add_commit_watcher(sync.upload.clone())
            .await
            .map_err(SyncError::from)?;

        sync.download.fetch_backlog().await?;
        sync.upload.enqueue_backlog().await?;

        let since = chrono::Utc::now();
        let _watch_token = sync
            .backend
            .watch_commits(since, sync.download.clone() as Arc<dyn CommitObserver>)
            .await?;

        Ok(sync)
    }
}

#[async_trait::async_trait]
impl crate::object_store::NetworkObjectFetcher for PageSync {
    async fn fetch_piece(&self, id: &ObjectId) -> Result<Vec<u8>, crate::object_store::ObjectStoreError> {
        self.backend
            .get_object(id)
            .await
            .map_err(|err| crate::object_store::ObjectStoreError::Io(std::io::Error::other(err.to_string())))
    }
}
