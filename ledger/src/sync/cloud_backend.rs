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

//! The capability surface a cloud provider implements so a page's sync
//! engine can mirror it, independent of any particular transport.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::SyncError;
use crate::commit::CommitId;
use crate::hash::ObjectId;

pub type WatchToken = u64;

/// A downloaded slice of remote history: commits newer than the timestamp a
/// caller last observed, plus the server timestamp to resume from next.
#[derive(Debug, Clone)]
pub struct CommitBatch {
    pub records: Vec<(CommitId, Vec<u8>, DateTime<Utc>)>,
    pub latest_timestamp: DateTime<Utc>,
}

/// Receives server-pushed commit batches registered through
/// [`CloudBackend::watch_commits`].
#[async_trait]
pub trait CommitObserver: Send + Sync {
    async fn on_commits(&self, batch: CommitBatch);
}

/// Supplies the bearer credential a [`CloudBackend`] attaches to outbound
/// requests; implementations typically refresh on expiry.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn token(&self) -> Result<String, SyncError>;
}

/// One page's view of a cloud mirror. Every method maps onto a single RPC
/// or streaming call in a real transport; this crate ships the trait only,
/// not a concrete transport.
#[async_trait]
pub trait CloudBackend: Send + Sync {
    async fn add_object(&self, id: &ObjectId, bytes: &[u8]) -> Result<(), SyncError>;
    async fn get_object(&self, id: &ObjectId) -> Result<Vec<u8>, SyncError>;

    async fn add_commits(&self, commits: Vec<(CommitId, Vec<u8>)>) -> Result<(), SyncError>;
    async fn get_commits(&self, since: DateTime<Utc>) -> Result<CommitBatch, SyncError>;

    async fn watch_commits(
        &self,
        since: DateTime<Utc>,
        observer: Arc<dyn CommitObserver>,
    ) -> Result<WatchToken, SyncError>;
    async fn unwatch_commits(&self, token: WatchToken) -> Result<(), SyncError>;
}
