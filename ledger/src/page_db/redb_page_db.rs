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

//! Concrete [`PageDb`] backed by a single `redb` database file, one table
//! per key prefix from the spec's data model.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use super::{JournalBase, JournalEntryRecord, JournalId, JournalKind, PageDb, PageDbError, SyncStatus};
use crate::commit::CommitId;
use crate::hash::ObjectId;

const HEADS: TableDefinition<&[u8], i64> = TableDefinition::new("heads");
const COMMITS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("commits");
const UNSYNCED_COMMITS: TableDefinition<&[u8], u64> = TableDefinition::new("unsynced_commits");
const JOURNAL_META: TableDefinition<u64, &[u8]> = TableDefinition::new("journal_meta");
const JOURNAL_ENTRIES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("journal_entries");
const OBJECTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("objects");
// Presence-only sets, one per non-terminal `SyncStatus`: an id's status is
// `Local` if it's in `OBJECT_LOCAL`, else `Transient` if it's in
// `OBJECT_TRANSIENT`, else `Synced` if its bytes are in `OBJECTS`, else
// unknown. `Synced` needs no set of its own: the `OBJECTS` table already is
// one.
const OBJECT_TRANSIENT: TableDefinition<&[u8], u8> = TableDefinition::new("object_transient");
const OBJECT_LOCAL: TableDefinition<&[u8], u8> = TableDefinition::new("object_local");
const SYNC_META: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_metadata");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_JOURNAL_ID_KEY: &str = "next_journal_id";
const STATUS_MARKER: u8 = 1;

pub struct RedbPageDb {
    db: Arc<Database>,
}

impl RedbPageDb {
    /// Opens (creating if absent) the page's `redb` file and ensures every
    /// table exists.
    pub fn open(path: &Path) -> Result<Self, PageDbError> {
        let db = Database::create(path)?;
        {
            let txn = db.begin_write()?;
            txn.open_table(HEADS)?;
            txn.open_table(COMMITS)?;
            txn.open_table(UNSYNCED_COMMITS)?;
            txn.open_table(JOURNAL_META)?;
            txn.open_table(JOURNAL_ENTRIES)?;
            txn.open_table(OBJECTS)?;
            txn.open_table(OBJECT_TRANSIENT)?;
            txn.open_table(OBJECT_LOCAL)?;
            txn.open_table(SYNC_META)?;
            txn.open_table(COUNTERS)?;
            txn.commit()?;
        }
        Ok(RedbPageDb { db: Arc::new(db) })
    }

    async fn spawn<F, T>(&self, f: F) -> Result<T, PageDbError>
    where
        F: FnOnce(&Database) -> Result<T, PageDbError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .expect("page_db blocking task panicked")
    }
}

fn encode_journal_base(base: &JournalBase) -> Vec<u8> {
    match base {
        JournalBase::Single(id) => {
            let mut out = vec![0u8];
            out.extend_from_slice(id.as_bytes());
            out
        }
        JournalBase::Merge(left, right) => {
            let mut out = vec![1u8];
            out.extend_from_slice(&(left.as_bytes().len() as u32).to_le_bytes());
            out.extend_from_slice(left.as_bytes());
            out.extend_from_slice(right.as_bytes());
            out
        }
    }
}

fn decode_journal_base(bytes: &[u8]) -> Result<JournalBase, PageDbError> {
    match bytes.first() {
        Some(0) => Ok(JournalBase::Single(CommitId::from_bytes(&bytes[1..]))),
        Some(1) => {
            let len = u32::from_le_bytes(
                bytes[1..5]
                    .try_into()
                    .map_err(|_| PageDbError::FormatError("truncated journal base".into()))?,
            ) as usize;
            let left = CommitId::from_bytes(&bytes[5..5 + len]);
            let right = CommitId::from_bytes(&bytes[5 + len..]);
            Ok(JournalBase::Merge(left, right))
        }
        _ => Err(PageDbError::FormatError("unknown journal base tag".into())),
    }
}

fn encode_entry(entry: &JournalEntryRecord) -> Vec<u8> {
    match entry {
        JournalEntryRecord::Put {
            key,
            object_id,
            eager,
        } => {
            let mut out = vec![0u8, u8::from(*eager)];
            out.extend_from_slice(&(key.len() as u32).to_le_bytes());
            out.extend_from_slice(key);
            out.extend_from_slice(object_id.as_bytes());
            out
        }
        JournalEntryRecord::Delete { key } => {
            let mut out = vec![1u8];
            out.extend_from_slice(key);
            out
        }
    }
}

fn decode_entry(bytes: &[u8]) -> Result<JournalEntryRecord, PageDbError> {
    match bytes.first() {
        Some(0) => {
            let eager = bytes[1] != 0;
            let key_len = u32::from_le_bytes(
                bytes[2..6]
                    .try_into()
                    .map_err(|_| PageDbError::FormatError("truncated journal entry".into()))?,
            ) as usize;
            let key = bytes[6..6 + key_len].to_vec();
            let object_id = ObjectId::from_bytes(&bytes[6 + key_len..]);
            Ok(JournalEntryRecord::Put {
                key,
                object_id,
                eager,
            })
        }
        Some(1) => Ok(JournalEntryRecord::Delete {
            key: bytes[1..].to_vec(),
        }),
        _ => Err(PageDbError::FormatError("unknown journal entry tag".into())),
    }
}

fn timestamp_to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or(Utc::now())
}

#[async_trait]
impl PageDb for RedbPageDb {
    async fn list_heads(&self) -> Result<Vec<(CommitId, DateTime<Utc>)>, PageDbError> {
        self.spawn(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(HEADS)?;
            let mut heads = Vec::new();
            for entry in table.range::<&[u8]>(..)? {
                let (key, value) = entry?;
                heads.push((CommitId::from_bytes(key.value()), millis_to_timestamp(value.value())));
            }
            heads.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            Ok(heads)
        })
        .await
    }

    async fn add_head(&self, id: CommitId, timestamp: DateTime<Utc>) -> Result<(), PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(HEADS)?;
                table.insert(id.as_bytes(), timestamp_to_millis(timestamp))?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove_heads(&self, ids: &[CommitId]) -> Result<(), PageDbError> {
        let ids = ids.to_vec();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(HEADS)?;
                for id in &ids {
                    table.remove(id.as_bytes())?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_commit(&self, id: &CommitId) -> Result<Option<Vec<u8>>, PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(COMMITS)?;
            Ok(table.get(id.as_bytes())?.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put_commit(&self, id: &CommitId, bytes: &[u8]) -> Result<(), PageDbError> {
        let id = id.clone();
        let bytes = bytes.to_vec();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(COMMITS)?;
                table.insert(id.as_bytes(), bytes.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn commit_journal_result(
        &self,
        commit_id: &CommitId,
        commit_bytes: &[u8],
        timestamp: DateTime<Utc>,
        remove_heads: &[CommitId],
        new_local_objects: &[ObjectId],
        journal: JournalId,
    ) -> Result<(), PageDbError> {
        let commit_id = commit_id.clone();
        let commit_bytes = commit_bytes.to_vec();
        let remove_heads = remove_heads.to_vec();
        let new_local_objects = new_local_objects.to_vec();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut commits = txn.open_table(COMMITS)?;
                commits.insert(commit_id.as_bytes(), commit_bytes.as_slice())?;
            }
            {
                let mut heads = txn.open_table(HEADS)?;
                for id in &remove_heads {
                    heads.remove(id.as_bytes())?;
                }
                heads.insert(commit_id.as_bytes(), timestamp_to_millis(timestamp))?;
            }
            {
                let objects = txn.open_table(OBJECTS)?;
                let mut local = txn.open_table(OBJECT_LOCAL)?;
                let mut transient = txn.open_table(OBJECT_TRANSIENT)?;
                for id in &new_local_objects {
                    let is_local = local.get(id.as_bytes())?.is_some();
                    let is_transient = transient.get(id.as_bytes())?.is_some();
                    let is_synced = !is_local && !is_transient && objects.get(id.as_bytes())?.is_some();
                    // `Local` and `Synced` are both already at least `Local`;
                    // only a bare `Transient` (or untracked) entry moves.
                    if !is_local && !is_synced {
                        local.insert(id.as_bytes(), STATUS_MARKER)?;
                        transient.remove(id.as_bytes())?;
                    }
                }
            }
            {
                let mut meta = txn.open_table(JOURNAL_META)?;
                meta.remove(journal)?;
            }
            {
                let mut entries = txn.open_table(JOURNAL_ENTRIES)?;
                let keys: Vec<(u64, u64)> = entries
                    .range((journal, 0)..(journal + 1, 0))?
                    .map(|r| r.map(|(k, _)| k.value()))
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    entries.remove(key)?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn add_unsynced_commit(&self, id: CommitId, generation: u64) -> Result<(), PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(UNSYNCED_COMMITS)?;
                table.insert(id.as_bytes(), generation)?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn remove_unsynced_commit(&self, id: &CommitId) -> Result<(), PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(UNSYNCED_COMMITS)?;
                table.remove(id.as_bytes())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_unsynced_commits(&self) -> Result<Vec<CommitId>, PageDbError> {
        self.spawn(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(UNSYNCED_COMMITS)?;
            let mut commits: Vec<(CommitId, u64)> = Vec::new();
            for entry in table.range::<&[u8]>(..)? {
                let (key, value) = entry?;
                commits.push((CommitId::from_bytes(key.value()), value.value()));
            }
            commits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            Ok(commits.into_iter().map(|(id, _)| id).collect())
        })
        .await
    }

    async fn create_journal(&self, kind: JournalKind, base: JournalBase) -> Result<JournalId, PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            let id = {
                let mut counters = txn.open_table(COUNTERS)?;
                let next = counters
                    .get(NEXT_JOURNAL_ID_KEY)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                counters.insert(NEXT_JOURNAL_ID_KEY, next + 1)?;
                next
            };
            if matches!(kind, JournalKind::Implicit) {
                let mut meta = txn.open_table(JOURNAL_META)?;
                meta.insert(id, encode_journal_base(&base).as_slice())?;
            }
            txn.commit()?;
            Ok(id)
        })
        .await
    }

    async fn remove_journal(&self, id: JournalId) -> Result<(), PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut meta = txn.open_table(JOURNAL_META)?;
                meta.remove(id)?;
            }
            {
                let mut entries = txn.open_table(JOURNAL_ENTRIES)?;
                let keys: Vec<(u64, u64)> = entries
                    .range((id, 0)..(id + 1, 0))?
                    .map(|r| r.map(|(k, _)| k.value()))
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    entries.remove(key)?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_implicit_journals(&self) -> Result<Vec<(JournalId, JournalBase)>, PageDbError> {
        self.spawn(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(JOURNAL_META)?;
            let mut out = Vec::new();
            for entry in table.range::<u64>(..)? {
                let (key, value) = entry?;
                out.push((key.value(), decode_journal_base(value.value())?));
            }
            out.sort_by_key(|(id, _)| *id);
            Ok(out)
        })
        .await
    }

    async fn add_journal_entry(
        &self,
        id: JournalId,
        entry: JournalEntryRecord,
    ) -> Result<(), PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut entries = txn.open_table(JOURNAL_ENTRIES)?;
                let next_seq = entries
                    .range((id, 0)..(id + 1, 0))?
                    .count() as u64;
                entries.insert((id, next_seq), encode_entry(&entry).as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_journal_entries(&self, id: JournalId) -> Result<Vec<JournalEntryRecord>, PageDbError> {
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let entries = txn.open_table(JOURNAL_ENTRIES)?;
            let mut out = Vec::new();
            for entry in entries.range((id, 0)..(id + 1, 0))? {
                let (_, value) = entry?;
                out.push(decode_entry(value.value())?);
            }
            Ok(out)
        })
        .await
    }

    async fn get_object(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OBJECTS)?;
            Ok(table.get(id.as_bytes())?.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn put_object(
        &self,
        id: &ObjectId,
        bytes: &[u8],
        status: SyncStatus,
    ) -> Result<(), PageDbError> {
        let id = id.clone();
        let bytes = bytes.to_vec();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut objects = txn.open_table(OBJECTS)?;
                objects.insert(id.as_bytes(), bytes.as_slice())?;
            }
            {
                let mut local = txn.open_table(OBJECT_LOCAL)?;
                let mut transient = txn.open_table(OBJECT_TRANSIENT)?;
                match status {
                    SyncStatus::Local => {
                        local.insert(id.as_bytes(), STATUS_MARKER)?;
                        transient.remove(id.as_bytes())?;
                    }
                    SyncStatus::Transient => {
                        transient.insert(id.as_bytes(), STATUS_MARKER)?;
                        local.remove(id.as_bytes())?;
                    }
                    SyncStatus::Synced | SyncStatus::Unknown => {
                        local.remove(id.as_bytes())?;
                        transient.remove(id.as_bytes())?;
                    }
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn object_status(&self, id: &ObjectId) -> Result<Option<SyncStatus>, PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let local = txn.open_table(OBJECT_LOCAL)?;
            if local.get(id.as_bytes())?.is_some() {
                return Ok(Some(SyncStatus::Local));
            }
            let transient = txn.open_table(OBJECT_TRANSIENT)?;
            if transient.get(id.as_bytes())?.is_some() {
                return Ok(Some(SyncStatus::Transient));
            }
            let objects = txn.open_table(OBJECTS)?;
            if objects.get(id.as_bytes())?.is_some() {
                return Ok(Some(SyncStatus::Synced));
            }
            Ok(None)
        })
        .await
    }

    async fn promote_object_status(
        &self,
        id: &ObjectId,
        status: SyncStatus,
    ) -> Result<(), PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut local = txn.open_table(OBJECT_LOCAL)?;
                let mut transient = txn.open_table(OBJECT_TRANSIENT)?;
                let current = if local.get(id.as_bytes())?.is_some() {
                    SyncStatus::Local
                } else if transient.get(id.as_bytes())?.is_some() {
                    SyncStatus::Transient
                } else if txn.open_table(OBJECTS)?.get(id.as_bytes())?.is_some() {
                    SyncStatus::Synced
                } else {
                    SyncStatus::Unknown
                };
                match current.max(status) {
                    SyncStatus::Local => {
                        local.insert(id.as_bytes(), STATUS_MARKER)?;
                        transient.remove(id.as_bytes())?;
                    }
                    SyncStatus::Transient => {
                        transient.insert(id.as_bytes(), STATUS_MARKER)?;
                    }
                    SyncStatus::Synced | SyncStatus::Unknown => {
                        local.remove(id.as_bytes())?;
                        transient.remove(id.as_bytes())?;
                    }
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn object_exists(&self, id: &ObjectId) -> Result<bool, PageDbError> {
        let id = id.clone();
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(OBJECTS)?;
            Ok(table.get(id.as_bytes())?.is_some())
        })
        .await
    }

    async fn get_sync_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, PageDbError> {
        let key = key.to_string();
        self.spawn(move |db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(SYNC_META)?;
            Ok(table.get(key.as_str())?.map(|v| v.value().to_vec()))
        })
        .await
    }

    async fn set_sync_metadata(&self, key: &str, value: &[u8]) -> Result<(), PageDbError> {
        let key = key.to_string();
        let value = value.to_vec();
        self.spawn(move |db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(SYNC_META)?;
                table.insert(key.as_str(), value.as_slice())?;
            }
            txn.commit()?;
            Ok(())
        })
        .await
    }
}
