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

//! Typed layer over an ordered key-value engine, addressed through disjoint
//! key prefixes (realized here as distinct `redb` tables): heads, commits,
//! unsynced commits, journals and their entries, objects, object sync
//! status, and sync metadata.
//!
//! Grounded on `op_store.rs`'s trait-per-concern shape, generalized from
//! flat files to `redb` tables.

mod redb_page_db;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use redb_page_db::RedbPageDb;

use crate::commit::CommitId;
use crate::hash::ObjectId;

#[derive(Debug, Error)]
pub enum PageDbError {
    #[error("{0}")]
    NotFound(String),
    #[error("malformed record: {0}")]
    FormatError(String),
    #[error(transparent)]
    Database(#[from] redb::DatabaseError),
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    #[error(transparent)]
    Table(#[from] redb::TableError),
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
}

/// Sync status of a stored object piece. Transitions are monotone along
/// this declaration order except for the reset that happens at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncStatus {
    Unknown,
    Transient,
    Local,
    Synced,
}

impl SyncStatus {
    fn to_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SyncStatus::Unknown,
            1 => SyncStatus::Transient,
            2 => SyncStatus::Local,
            _ => SyncStatus::Synced,
        }
    }
}

/// Whether a journal auto-commits on every op (`Implicit`, persisted so it
/// can be replayed after a crash) or only on explicit client request
/// (`Explicit`, in-memory only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalKind {
    Explicit,
    Implicit,
}

/// The commit(s) a journal was started from: a single base for a normal
/// transaction, or two parents for a merge in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalBase {
    Single(CommitId),
    Merge(CommitId, CommitId),
}

/// A single buffered mutation inside a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntryRecord {
    Put {
        key: Vec<u8>,
        object_id: ObjectId,
        eager: bool,
    },
    Delete {
        key: Vec<u8>,
    },
}

pub type JournalId = u64;

/// Durable storage substrate for a single page. All mutations that must be
/// observed together go through a single call so the backing engine can
/// commit them as one write transaction.
#[async_trait]
pub trait PageDb: Send + Sync {
    async fn list_heads(&self) -> Result<Vec<(CommitId, DateTime<Utc>)>, PageDbError>;
    async fn add_head(&self, id: CommitId, timestamp: DateTime<Utc>) -> Result<(), PageDbError>;
    async fn remove_heads(&self, ids: &[CommitId]) -> Result<(), PageDbError>;

    async fn get_commit(&self, id: &CommitId) -> Result<Option<Vec<u8>>, PageDbError>;
    async fn put_commit(&self, id: &CommitId, bytes: &[u8]) -> Result<(), PageDbError>;

    /// Atomically: insert `commit`, remove `remove_heads` from the head set,
    /// add `commit` as a new head, mark every id in `new_local_objects` as
    /// at least [`SyncStatus::Local`], and delete `journal`'s data.
    async fn commit_journal_result(
        &self,
        commit_id: &CommitId,
        commit_bytes: &[u8],
        timestamp: DateTime<Utc>,
        remove_heads: &[CommitId],
        new_local_objects: &[ObjectId],
        journal: JournalId,
    ) -> Result<(), PageDbError>;

    async fn add_unsynced_commit(&self, id: CommitId, generation: u64) -> Result<(), PageDbError>;
    async fn remove_unsynced_commit(&self, id: &CommitId) -> Result<(), PageDbError>;
    async fn list_unsynced_commits(&self) -> Result<Vec<CommitId>, PageDbError>;

    async fn create_journal(&self, kind: JournalKind, base: JournalBase) -> Result<JournalId, PageDbError>;
    async fn remove_journal(&self, id: JournalId) -> Result<(), PageDbError>;
    async fn list_implicit_journals(&self) -> Result<Vec<(JournalId, JournalBase)>, PageDbError>;
    async fn add_journal_entry(
        &self,
        id: JournalId,
        entry: JournalEntryRecord,
    ) -> Result<(), PageDbError>;
    async fn list_journal_entries(&self, id: JournalId) -> Result<Vec<JournalEntryRecord>, PageDbError>;

    async fn get_object(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, PageDbError>;
    async fn put_object(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        status: SyncStatus,
    ) -> Result<(), PageDbError>;
    async fn object_status(&self, id: &ObjectId) -> Result<Option<SyncStatus>, PageDbError>;
    /// Sets `status := max(current, status)`, the monotone promotion rule.
    async fn promote_object_status(
        &self,
        id: &ObjectId,
        status: SyncStatus,
    ) -> Result<(), PageDbError>;
    async fn object_exists(&self, id: &ObjectId) -> Result<bool, PageDbError>;

    async fn get_sync_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, PageDbError>;
    async fn set_sync_metadata(&self, key: &str, value: &[u8]) -> Result<(), PageDbError>;
}
