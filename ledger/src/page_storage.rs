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

//! Composition root for a single page: wires together [`PageDb`],
//! [`ObjectStore`], [`BTree`], and [`CommitDag`], orders journal
//! application through an [`OperationSerializer`], and fans new commits out
//! to registered watchers.
//!
//! Grounded on `store.rs`'s composition of backend + cache + signer into
//! one facade, generalized to this wider set of collaborators.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use slab::Slab;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::btree::{BTree, BTreeError, Entry as TreeEntry};
use crate::commit::{Commit, CommitId};
use crate::commit_dag::{CommitDag, CommitDagError};
use crate::hash::ObjectId;
use crate::journal::{CommitResult, Journal, JournalError};
use crate::object_store::{
    BufferDataSource, DataSource, Location, NetworkObjectFetcher, Object, ObjectStore, ObjectStoreError,
};
use crate::operation_serializer::OperationSerializer;
use crate::page_db::{JournalBase, JournalKind, PageDb, PageDbError, SyncStatus};

#[derive(Debug, Error)]
pub enum PageStorageError {
    #[error(transparent)]
    PageDb(#[from] PageDbError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    BTree(#[from] BTreeError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    CommitDag(#[from] CommitDagError),
    #[error("watcher already registered")]
    WatcherAlreadyRegistered,
    #[error("commit batch contains commits whose parents are never resolved")]
    OrphanCommits,
}

/// Notified whenever new commits become known to a page, whether created
/// locally or received from sync.
#[async_trait]
pub trait CommitWatcher: Send + Sync {
    async fn on_new_commits(&self, commits: &[Arc<Commit>]);
}

pub type WatcherHandle = usize;

pub struct PageStorage {
    db: Arc<dyn PageDb>,
    objects: Arc<ObjectStore>,
    btree: Arc<BTree>,
    commit_dag: Arc<CommitDag>,
    serializer: OperationSerializer,
    watchers: Mutex<Slab<Arc<dyn CommitWatcher>>>,
}

impl PageStorage {
    pub async fn open(db: Arc<dyn PageDb>) -> Result<Arc<Self>, PageStorageError> {
        let objects = Arc::new(ObjectStore::new(db.clone()));
        let btree = Arc::new(BTree::new(objects.clone()));
        let commit_dag = Arc::new(CommitDag::new(db.clone()));

        let empty_tree = btree.empty_tree_id().await?;
        let root = commit_dag.ensure_root(empty_tree).await?;
        if db.list_heads().await?.is_empty() {
            db.add_head(root.id.clone(), Utc::now()).await?;
        }

        let storage = Arc::new(PageStorage {
            db,
            objects,
            btree,
            commit_dag,
            serializer: OperationSerializer::new(),
            watchers: Mutex::new(Slab::new()),
        });
        storage.replay_implicit_journals().await?;
        Ok(storage)
    }

    async fn replay_implicit_journals(&self) -> Result<(), PageStorageError> {
        for (id, base) in self.db.list_implicit_journals().await? {
            let journal = Journal::new(
                id,
                base,
                JournalKind::Implicit,
                self.db.clone(),
                self.btree.clone(),
                self.commit_dag.clone(),
            );
            let result = journal.commit().await?;
            self.notify_if_new(&result).await;
        }
        Ok(())
    }

    pub fn objects(&self) -> &Arc<ObjectStore> {
        &self.objects
    }

    pub fn btree(&self) -> &Arc<BTree> {
        &self.btree
    }

    pub async fn get_head_commit_ids(&self) -> Result<Vec<CommitId>, PageStorageError> {
        Ok(self
            .db
            .list_heads()
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    pub async fn get_commit(&self, id: &CommitId) -> Result<Arc<Commit>, PageStorageError> {
        Ok(self.commit_dag.get(id).await?)
    }

    /// Commits with no currently-known successor. Used by [`crate::merge`]
    /// to find the pair it should reconcile next.
    pub async fn list_heads_with_timestamps(
        &self,
    ) -> Result<Vec<(CommitId, chrono::DateTime<Utc>)>, PageStorageError> {
        Ok(self.db.list_heads().await?)
    }

    pub async fn find_common_ancestor(
        &self,
        a: &CommitId,
        b: &CommitId,
    ) -> Result<CommitId, PageStorageError> {
        Ok(self.commit_dag.find_common_ancestor(a, b).await?)
    }

    pub async fn start_commit(&self, base: CommitId, kind: JournalKind) -> Result<Journal, PageStorageError> {
        let id = self
            .db
            .create_journal(kind, JournalBase::Single(base.clone()))
            .await?;
        Ok(Journal::new(
            id,
            JournalBase::Single(base),
            kind,
            self.db.clone(),
            self.btree.clone(),
            self.commit_dag.clone(),
        ))
    }

    pub async fn start_merge_commit(
        &self,
        left: CommitId,
        right: CommitId,
    ) -> Result<Journal, PageStorageError> {
        let id = self
            .db
            .create_journal(JournalKind::Explicit, JournalBase::Merge(left.clone(), right.clone()))
            .await?;
        Ok(Journal::new(
            id,
            JournalBase::Merge(left, right),
            JournalKind::Explicit,
            self.db.clone(),
            self.btree.clone(),
            self.commit_dag.clone(),
        ))
    }

    #[instrument(skip(self, journal))]
    pub async fn commit_journal(&self, journal: Journal) -> Result<Arc<Commit>, PageStorageError> {
        let result = self.serializer.submit(move || async move { journal.commit().await }).await?;
        self.notify_if_new(&result).await;
        Ok(result.commit)
    }

    pub async fn rollback_journal(&self, journal: Journal) -> Result<(), PageStorageError> {
        journal.rollback().await?;
        Ok(())
    }

    async fn notify_if_new(&self, result: &CommitResult) {
        // `Journal::commit` returns an empty `new_object_ids` exactly when
        // the journal elided to its unchanged base commit; nothing changed,
        // so there's nothing to tell watchers about.
        if result.new_object_ids.is_empty() {
            return;
        }
        self.notify_watchers(&[result.commit.clone()]).await;
    }

    async fn notify_watchers(&self, commits: &[Arc<Commit>]) {
        let watchers: Vec<Arc<dyn CommitWatcher>> =
            self.watchers.lock().await.iter().map(|(_, w)| w.clone()).collect();
        for watcher in watchers {
            watcher.on_new_commits(commits).await;
        }
    }

    pub async fn add_commit_watcher(
        &self,
        watcher: Arc<dyn CommitWatcher>,
    ) -> Result<WatcherHandle, PageStorageError> {
        Ok(self.watchers.lock().await.insert(watcher))
    }

    pub async fn remove_commit_watcher(&self, handle: WatcherHandle) {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains(handle) {
            watchers.remove(handle);
        }
    }

    pub async fn add_object_from_local(
        &self,
        source: impl DataSource,
    ) -> Result<ObjectId, PageStorageError> {
        let (id, _) = self.objects.add_from_local(source).await?;
        Ok(id)
    }

    pub async fn get_object(&self, id: &ObjectId, location: Location) -> Result<Object, PageStorageError> {
        Ok(self.objects.get_object(id, location).await?)
    }

    pub async fn get_piece(&self, id: &ObjectId) -> Result<Object, PageStorageError> {
        Ok(self.objects.get_piece(id).await?)
    }

    pub async fn get_entry_from_commit(
        &self,
        commit_id: &CommitId,
        key: &[u8],
    ) -> Result<Option<TreeEntry>, PageStorageError> {
        let commit = self.commit_dag.get(commit_id).await?;
        Ok(self.btree.get_entry(&commit.root_node_id, key).await?)
    }

    pub async fn get_commit_contents(
        &self,
        commit_id: &CommitId,
        min_key: &[u8],
        on_next: &mut dyn FnMut(&TreeEntry) -> bool,
    ) -> Result<(), PageStorageError> {
        let commit = self.commit_dag.get(commit_id).await?;
        self.btree.for_each_entry(&commit.root_node_id, min_key, on_next).await?;
        Ok(())
    }

    pub async fn get_commit_contents_diff(
        &self,
        base: &CommitId,
        target: &CommitId,
        min_key: &[u8],
        on_change: &mut dyn FnMut(crate::btree::Change),
    ) -> Result<(), PageStorageError> {
        let base_commit = self.commit_dag.get(base).await?;
        let target_commit = self.commit_dag.get(target).await?;
        self.btree
            .diff(&base_commit.root_node_id, &target_commit.root_node_id, min_key, on_change)
            .await?;
        Ok(())
    }

    pub async fn mark_commit_synced(&self, id: &CommitId) -> Result<(), PageStorageError> {
        self.db.remove_unsynced_commit(id).await?;
        Ok(())
    }

    pub async fn mark_piece_synced(&self, id: &ObjectId) -> Result<(), PageStorageError> {
        self.objects.mark_synced(id).await?;
        Ok(())
    }

    pub async fn get_unsynced_commits(&self) -> Result<Vec<CommitId>, PageStorageError> {
        Ok(self.db.list_unsynced_commits().await?)
    }

    /// Every still-unsynced piece reachable from any unsynced commit,
    /// deduped. Object sync status isn't range-scannable through the narrow
    /// `PageDb` trait surface (it's keyed by object id, not status), so this
    /// walks each unsynced commit's tree transitively via
    /// [`BTree::collect_unsynced_pieces`] instead of a dedicated index.
    pub async fn get_unsynced_pieces(&self) -> Result<Vec<ObjectId>, PageStorageError> {
        let mut seen = HashSet::new();
        let mut pieces = Vec::new();
        for commit_id in self.db.list_unsynced_commits().await? {
            let commit = self.commit_dag.get(&commit_id).await?;
            let mut commit_pieces = Vec::new();
            self.btree.collect_unsynced_pieces(&commit.root_node_id, &mut commit_pieces).await?;
            for id in commit_pieces {
                if seen.insert(id.clone()) {
                    pieces.push(id);
                }
            }
        }
        Ok(pieces)
    }

    pub async fn set_sync_metadata(&self, key: &str, value: &[u8]) -> Result<(), PageStorageError> {
        self.db.set_sync_metadata(key, value).await?;
        Ok(())
    }

    pub async fn get_sync_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, PageStorageError> {
        Ok(self.db.get_sync_metadata(key).await?)
    }

    pub async fn set_network_fetcher(&self, fetcher: Option<Arc<dyn NetworkObjectFetcher>>) {
        self.objects.set_network_fetcher(fetcher).await;
    }

    /// Accepts a batch of commits produced locally outside of the journal
    /// pipeline (e.g. by [`crate::merge`]'s strategies when they build a
    /// commit directly rather than through [`Journal::commit`]).
    #[instrument(skip(self, commits))]
    pub async fn add_commits_from_local(
        &self,
        commits: Vec<Commit>,
        new_object_ids: HashSet<ObjectId>,
    ) -> Result<(), PageStorageError> {
        self.add_commits(commits, new_object_ids.into_iter().collect(), SyncStatus::Local)
            .await
    }

    /// Accepts a batch of commits downloaded from the cloud backend.
    #[instrument(skip(self, records))]
    pub async fn add_commits_from_sync(
        &self,
        records: Vec<(CommitId, Vec<u8>)>,
    ) -> Result<(), PageStorageError> {
        let mut remaining: Vec<(CommitId, Vec<u8>)> = records;
        let mut decoded = Vec::new();
        let mut made_progress = true;
        while !remaining.is_empty() && made_progress {
            made_progress = false;
            let mut next_round = Vec::new();
            for (id, bytes) in remaining {
                let commit = match Commit::decode(id.clone(), &bytes) {
                    Ok(commit) => commit,
                    Err(err) => {
                        warn!(commit = %id, error = %err, "dropping malformed synced commit");
                        continue;
                    }
                };
                let parents_known = {
                    let mut known = true;
                    for parent in &commit.parent_ids {
                        if parent.is_sentinel() {
                            continue;
                        }
                        if self.commit_dag.get(parent).await.is_err()
                            && !decoded.iter().any(|c: &Commit| &c.id == parent)
                        {
                            known = false;
                            break;
                        }
                    }
                    known
                };
                if parents_known {
                    decoded.push(commit);
                    made_progress = true;
                } else {
                    next_round.push((id, bytes));
                }
            }
            remaining = next_round;
        }
        if !remaining.is_empty() {
            warn!(orphans = remaining.len(), "sync commit batch left orphans unresolved");
            return Err(PageStorageError::OrphanCommits);
        }

        let mut new_ids = HashSet::new();
        for commit in &decoded {
            new_ids.extend(self.fetch_referenced_objects(commit).await?);
        }
        self.add_commits(decoded, new_ids.into_iter().collect(), SyncStatus::Synced)
            .await
    }

    async fn fetch_referenced_objects(&self, commit: &Commit) -> Result<HashSet<ObjectId>, PageStorageError> {
        let mut to_fetch = Vec::new();
        let mut eager_entries = Vec::new();
        self.btree
            .for_each_node_and_entry(
                &commit.root_node_id,
                Location::Network,
                &mut |id: &ObjectId| to_fetch.push(id.clone()),
                &mut |entry: &TreeEntry| {
                    if matches!(entry.priority, crate::btree::Priority::Eager) {
                        eager_entries.push(entry.object_id.clone());
                    }
                },
            )
            .await?;
        to_fetch.extend(eager_entries);

        let mut fetched = HashSet::new();
        for id in to_fetch {
            if fetched.contains(&id) || id.inline_data().is_some() {
                continue;
            }
            self.objects.get_object(&id, Location::Network).await?;
            fetched.insert(id);
        }
        Ok(fetched)
    }

    async fn add_commits(
        &self,
        commits: Vec<Commit>,
        new_object_ids: Vec<ObjectId>,
        object_status: SyncStatus,
    ) -> Result<(), PageStorageError> {
        let mut new_heads = Vec::new();
        let mut remove_heads = Vec::new();
        for commit in &commits {
            self.commit_dag.put(commit).await?;
            if !matches!(object_status, SyncStatus::Synced) {
                self.db.add_unsynced_commit(commit.id.clone(), commit.generation).await?;
            }
            for parent in &commit.parent_ids {
                remove_heads.push(parent.clone());
            }
            new_heads.push(commit.id.clone());
        }
        for id in &new_object_ids {
            self.db.promote_object_status(id, object_status).await?;
        }
        self.db.remove_heads(&remove_heads).await?;
        for id in &new_heads {
            self.db.add_head(id.clone(), Utc::now()).await?;
        }
        let arcs: Vec<Arc<Commit>> = commits.into_iter().map(Arc::new).collect();
        self.notify_watchers(&arcs).await;
        Ok(())
    }
}

/// Convenience wrapper for putting a single small value directly, used by
/// the client-facing `Page.put` operation: writes the value's object, then
/// buffers a `Put` into an implicit journal and commits it immediately.
pub async fn put_value(
    storage: &PageStorage,
    base: CommitId,
    key: Vec<u8>,
    value: Vec<u8>,
    priority: crate::btree::Priority,
) -> Result<Arc<Commit>, PageStorageError> {
    let object_id = storage.add_object_from_local(BufferDataSource::new(value)).await?;
    let journal = storage.start_commit(base, JournalKind::Implicit).await?;
    journal.put(key, object_id, priority).await?;
    storage.commit_journal(journal).await
}
