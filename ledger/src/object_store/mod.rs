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

//! Content-addressed immutable object storage.
//!
//! A large value is split by a rolling hash into chunks, aggregated into a
//! shallow Merkle tree of [`FileIndex`] objects, and stored piece by piece
//! through the page's [`PageDb`]. Grounded on `store.rs`'s async method
//! shapes and `file_util.rs`'s content-addressed persist idiom.

mod piece;

use std::collections::HashSet;
use std::io;
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

pub use piece::{FileIndex, FileIndexChild, Object};

use crate::hash::{ObjectId, ObjectType};
use crate::page_db::{PageDb, PageDbError, SyncStatus};
use crate::rolling_hash::{RollingHash, MAX_CHILDREN_PER_INDEX};

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object {0} not found")]
    NotFound(ObjectId),
    #[error("malformed object: {0}")]
    FormatError(String),
    #[error("object content does not match claimed id {expected}")]
    ObjectIdMismatch { expected: ObjectId },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    PageDb(#[from] PageDbError),
}

/// Where to resolve an object's bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Local,
    Network,
}

/// A streaming source of bytes to be split and stored. Mirrors the
/// `DataSource` capability in the source's public storage interface.
#[async_trait]
pub trait DataSource: Send {
    /// Returns the next chunk, or `None` at end of stream.
    async fn next_chunk(&mut self) -> Option<io::Result<Vec<u8>>>;
}

/// A `DataSource` over an in-memory buffer, for callers that already have
/// the whole value (used by client puts of small values and by tests).
pub struct BufferDataSource {
    data: Option<Vec<u8>>,
}

impl BufferDataSource {
    pub fn new(data: Vec<u8>) -> Self {
        BufferDataSource { data: Some(data) }
    }
}

#[async_trait]
impl DataSource for BufferDataSource {
    async fn next_chunk(&mut self) -> Option<io::Result<Vec<u8>>> {
        self.data.take().map(Ok)
    }
}

/// Delegate the sync engine installs so that `get_object(Location::Network)`
/// can fetch a missing piece from the cloud backend.
#[async_trait]
pub trait NetworkObjectFetcher: Send + Sync {
    async fn fetch_piece(&self, id: &ObjectId) -> Result<Vec<u8>, ObjectStoreError>;
}

pub struct ObjectStore {
    db: Arc<dyn PageDb>,
    network_fetcher: RwLock<Option<Arc<dyn NetworkObjectFetcher>>>,
}

impl ObjectStore {
    pub fn new(db: Arc<dyn PageDb>) -> Self {
        ObjectStore {
            db,
            network_fetcher: RwLock::new(None),
        }
    }

    pub async fn set_network_fetcher(&self, fetcher: Option<Arc<dyn NetworkObjectFetcher>>) {
        *self.network_fetcher.write().await = fetcher;
    }

    #[instrument(skip(self, source))]
    pub async fn add_from_local(
        &self,
        mut source: impl DataSource,
    ) -> Result<(ObjectId, HashSet<ObjectId>), ObjectStoreError> {
        let mut buf = Vec::new();
        while let Some(chunk) = source.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        self.split_and_store(&buf, SyncStatus::Transient).await
    }

    #[instrument(skip(self, source))]
    pub async fn add_from_sync(
        &self,
        expected_id: &ObjectId,
        mut source: impl DataSource,
    ) -> Result<HashSet<ObjectId>, ObjectStoreError> {
        let mut buf = Vec::new();
        while let Some(chunk) = source.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        let (root_id, new_ids) = self.split_and_store(&buf, SyncStatus::Synced).await?;
        if &root_id != expected_id {
            return Err(ObjectStoreError::ObjectIdMismatch {
                expected: expected_id.clone(),
            });
        }
        Ok(new_ids)
    }

    #[instrument(skip(self))]
    pub async fn get_piece(&self, id: &ObjectId) -> Result<Object, ObjectStoreError> {
        let data = self.read_piece_bytes(id, Location::Local).await?;
        Ok(Object {
            id: id.clone(),
            data,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_object(
        &self,
        id: &ObjectId,
        location: Location,
    ) -> Result<Object, ObjectStoreError> {
        let data = self.assemble(id, location).await?;
        Ok(Object {
            id: id.clone(),
            data,
        })
    }

    /// Walks an index subtree, promoting every piece's status to at least
    /// `Synced`.
    pub async fn mark_synced(&self, id: &ObjectId) -> Result<(), ObjectStoreError> {
        if id.inline_data().is_some() {
            return Ok(());
        }
        self.db.promote_object_status(id, SyncStatus::Synced).await?;
        if matches!(id.object_type(), ObjectType::Index) {
            let bytes = self.read_piece_bytes(id, Location::Local).await?;
            let index = FileIndex::decode(&bytes)?;
            for child in &index.children {
                Box::pin(self.mark_synced(&child.id)).await?;
            }
        }
        Ok(())
    }

    pub async fn is_untracked(&self, id: &ObjectId) -> Result<bool, ObjectStoreError> {
        if id.inline_data().is_some() {
            return Ok(false);
        }
        Ok(self.db.object_status(id).await? == Some(SyncStatus::Transient))
    }

    /// Collects every piece reachable from `id` (including `id` itself)
    /// that the sync engine hasn't uploaded yet, depth-first so that index
    /// pieces are uploaded after the children they reference.
    pub fn collect_unsynced_pieces<'a>(
        &'a self,
        id: &'a ObjectId,
        out: &'a mut Vec<ObjectId>,
    ) -> BoxFuture<'a, Result<(), ObjectStoreError>> {
        async move {
            if id.inline_data().is_some() {
                return Ok(());
            }
            let status = self.db.object_status(id).await?;
            let untracked = status.map_or(true, |s| s < SyncStatus::Synced);
            if matches!(id.object_type(), ObjectType::Index) {
                let bytes = self.read_piece_bytes(id, Location::Local).await?;
                let index = FileIndex::decode(&bytes)?;
                for child in &index.children {
                    self.collect_unsynced_pieces(&child.id, out).await?;
                }
            }
            if untracked {
                out.push(id.clone());
            }
            Ok(())
        }
        .boxed()
    }

    fn assemble<'a>(&'a self, id: &'a ObjectId, location: Location) -> BoxFuture<'a, Result<Vec<u8>, ObjectStoreError>> {
        async move {
            if let Some(inline) = id.inline_data() {
                return Ok(inline.to_vec());
            }
            let bytes = self.read_piece_bytes(id, location).await?;
            match id.object_type() {
                ObjectType::Value => Ok(bytes),
                ObjectType::Index => {
                    let index = FileIndex::decode(&bytes)?;
                    let mut out = Vec::with_capacity(index.total_size as usize);
                    for child in &index.children {
                        out.extend(self.assemble(&child.id, location).await?);
                    }
                    Ok(out)
                }
            }
        }
        .boxed()
    }

    async fn read_piece_bytes(
        &self,
        id: &ObjectId,
        location: Location,
    ) -> Result<Vec<u8>, ObjectStoreError> {
        if let Some(inline) = id.inline_data() {
            return Ok(inline.to_vec());
        }
        if let Some(bytes) = self.db.get_object(id).await? {
            return Ok(bytes);
        }
        match location {
            Location::Local => Err(ObjectStoreError::NotFound(id.clone())),
            Location::Network => {
                let fetcher = self.network_fetcher.read().await.clone();
                let fetcher = fetcher.ok_or_else(|| ObjectStoreError::NotFound(id.clone()))?;
                let bytes = fetcher.fetch_piece(id).await?;
                if !id.verify(&bytes) {
                    return Err(ObjectStoreError::ObjectIdMismatch { expected: id.clone() });
                }
                self.db.put_object(id, &bytes, SyncStatus::Synced).await?;
                Ok(bytes)
            }
        }
    }

    async fn write_piece(
        &self,
        bytes: &[u8],
        object_type: ObjectType,
        status: SyncStatus,
        new_ids: &mut HashSet<ObjectId>,
    ) -> Result<ObjectId, ObjectStoreError> {
        let id = ObjectId::compute(object_type, bytes);
        new_ids.insert(id.clone());
        if id.inline_data().is_none() && !self.db.object_exists(&id).await? {
            self.db.put_object(&id, bytes, status).await?;
        }
        Ok(id)
    }

    async fn split_and_store(
        &self,
        data: &[u8],
        status: SyncStatus,
    ) -> Result<(ObjectId, HashSet<ObjectId>), ObjectStoreError> {
        let mut new_ids = HashSet::new();
        let mut levels: Vec<Vec<FileIndexChild>> = Vec::new();

        for (range, cut_level) in plan_chunks(data) {
            let chunk = &data[range];
            let id = self
                .write_piece(chunk, ObjectType::Value, status, &mut new_ids)
                .await?;
            push_child(
                &mut levels,
                0,
                FileIndexChild {
                    id,
                    size: chunk.len() as u64,
                },
            );
            for level in 0..cut_level as usize {
                self.flush_level(&mut levels, level, status, &mut new_ids)
                    .await?;
            }
            while level_len(&levels, find_overflowing_level(&levels)) > MAX_CHILDREN_PER_INDEX {
                let level = find_overflowing_level(&levels);
                self.flush_level(&mut levels, level, status, &mut new_ids)
                    .await?;
            }
        }

        let root = self.finalize(&mut levels, status, &mut new_ids).await?;
        Ok((root, new_ids))
    }

    async fn flush_level(
        &self,
        levels: &mut Vec<Vec<FileIndexChild>>,
        level: usize,
        status: SyncStatus,
        new_ids: &mut HashSet<ObjectId>,
    ) -> Result<(), ObjectStoreError> {
        if level >= levels.len() || levels[level].is_empty() {
            return Ok(());
        }
        let children = std::mem::take(&mut levels[level]);
        let promoted = if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            let total_size = children.iter().map(|c| c.size).sum();
            let index = FileIndex {
                children: children.into(),
                total_size,
            };
            let bytes = index.encode();
            let id = self
                .write_piece(&bytes, ObjectType::Index, status, new_ids)
                .await?;
            FileIndexChild { id, size: total_size }
        };
        push_child(levels, level + 1, promoted);
        Ok(())
    }

    async fn finalize(
        &self,
        levels: &mut Vec<Vec<FileIndexChild>>,
        status: SyncStatus,
        new_ids: &mut HashSet<ObjectId>,
    ) -> Result<ObjectId, ObjectStoreError> {
        if levels.is_empty() {
            // Empty data source.
            let id = self
                .write_piece(&[], ObjectType::Value, status, new_ids)
                .await?;
            return Ok(id);
        }
        let mut level = 0;
        loop {
            let non_empty = levels.iter().enumerate().find(|(_, v)| !v.is_empty());
            let Some((idx, children)) = non_empty else {
                unreachable!("split_and_store always produces at least one piece")
            };
            let higher_empty = levels[idx + 1..].iter().all(Vec::is_empty);
            if children.len() == 1 && higher_empty {
                return Ok(levels[idx][0].id.clone());
            }
            self.flush_level(levels, idx, status, new_ids).await?;
            level += 1;
            if level > levels.len() + 1 {
                unreachable!("cascade must terminate within the number of levels")
            }
        }
    }
}

fn push_child(levels: &mut Vec<Vec<FileIndexChild>>, level: usize, child: FileIndexChild) {
    while levels.len() <= level {
        levels.push(Vec::new());
    }
    levels[level].push(child);
}

fn level_len(levels: &[Vec<FileIndexChild>], level: usize) -> usize {
    levels.get(level).map_or(0, Vec::len)
}

fn find_overflowing_level(levels: &[Vec<FileIndexChild>]) -> usize {
    levels
        .iter()
        .position(|v| v.len() > MAX_CHILDREN_PER_INDEX)
        .unwrap_or(0)
}

/// Splits `data` into level-0 chunk boundaries using the rolling hash,
/// forcing a final chunk at end of stream even if no cut was found there.
fn plan_chunks(data: &[u8]) -> Vec<(Range<usize>, u32)> {
    let mut roller = RollingHash::new();
    let mut events = Vec::new();
    let mut start = 0usize;
    for i in 0..data.len() {
        if let Some(level) = roller.roll(data[i]) {
            events.push((start..i + 1, level));
            start = i + 1;
        }
    }
    if start < data.len() || data.is_empty() {
        events.push((start..data.len(), 0));
    }
    events
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::page_db::RedbPageDb;

    fn store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::Builder::new()
            .prefix("ledger-object-store-test-")
            .tempdir()
            .unwrap();
        let db = RedbPageDb::open(&dir.path().join("page.redb")).unwrap();
        (dir, ObjectStore::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn empty_source_is_inline() {
        let (_dir, store) = store();
        let (id, new_ids) = store
            .add_from_local(BufferDataSource::new(Vec::new()))
            .await
            .unwrap();
        assert!(id.inline_data().is_some());
        assert_eq!(id.inline_data(), Some([].as_slice()));
        assert!(new_ids.contains(&id));
    }

    #[tokio::test]
    async fn small_value_round_trips() {
        let (_dir, store) = store();
        let data = b"hello ledger".to_vec();
        let (id, _) = store
            .add_from_local(BufferDataSource::new(data.clone()))
            .await
            .unwrap();
        let object = store.get_object(&id, Location::Local).await.unwrap();
        assert_eq!(object.data, data);
    }

    #[tokio::test]
    async fn large_value_round_trips_through_index_tree() {
        let (_dir, store) = store();
        let data = vec![b'a'; 1_000_000];
        let (id, new_ids) = store
            .add_from_local(BufferDataSource::new(data.clone()))
            .await
            .unwrap();
        assert!(new_ids.len() > 1);
        let object = store.get_object(&id, Location::Local).await.unwrap();
        assert_eq!(object.data.len(), data.len());
        assert_eq!(object.data, data);
    }

    #[tokio::test]
    async fn sync_rejects_mismatched_id() {
        let (_dir, store) = store();
        let wrong_id = ObjectId::compute(ObjectType::Value, &vec![9u8; 64]);
        let result = store
            .add_from_sync(&wrong_id, BufferDataSource::new(vec![1u8; 1_000_000]))
            .await;
        assert!(matches!(result, Err(ObjectStoreError::ObjectIdMismatch { .. })));
    }
}
