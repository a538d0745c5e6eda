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

//! A mutation buffer bound to a base commit (or two parents, for a merge in
//! progress). `EXPLICIT` journals poison on failure and live only in
//! memory; `IMPLICIT` journals auto-commit and are persisted so they can be
//! replayed after a crash.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::btree::{BTree, BTreeError, Change, Entry, Priority};
use crate::commit::{Commit, CommitId};
use crate::commit_dag::{CommitDag, CommitDagError};
use crate::hash::ObjectId;
use crate::page_db::{JournalBase, JournalEntryRecord, JournalId, JournalKind, PageDb, PageDbError};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal poisoned by a prior failure")]
    Poisoned,
    #[error(transparent)]
    BTree(#[from] BTreeError),
    #[error(transparent)]
    PageDb(#[from] PageDbError),
}

impl From<CommitDagError> for JournalError {
    fn from(value: CommitDagError) -> Self {
        match value {
            CommitDagError::PageDb(err) => JournalError::PageDb(err),
            other => JournalError::PageDb(PageDbError::NotFound(other.to_string())),
        }
    }
}

/// The outcome of committing a journal: either a freshly written commit, or
/// the unchanged base commit when the net change was empty (elision).
pub struct CommitResult {
    pub commit: Arc<Commit>,
    pub new_object_ids: Vec<ObjectId>,
}

pub struct Journal {
    id: JournalId,
    base: JournalBase,
    kind: JournalKind,
    db: Arc<dyn PageDb>,
    btree: Arc<BTree>,
    commit_dag: Arc<CommitDag>,
    poisoned: AtomicBool,
}

impl Journal {
    pub(crate) fn new(
        id: JournalId,
        base: JournalBase,
        kind: JournalKind,
        db: Arc<dyn PageDb>,
        btree: Arc<BTree>,
        commit_dag: Arc<CommitDag>,
    ) -> Self {
        Journal {
            id,
            base,
            kind,
            db,
            btree,
            commit_dag,
            poisoned: AtomicBool::new(false),
        }
    }

    fn check_not_poisoned(&self) -> Result<(), JournalError> {
        if self.poisoned.load(AtomicOrdering::Acquire) {
            return Err(JournalError::Poisoned);
        }
        Ok(())
    }

    fn poison_on_err<T>(&self, result: Result<T, JournalError>) -> Result<T, JournalError> {
        if result.is_err() && matches!(self.kind, JournalKind::Explicit) {
            self.poisoned.store(true, AtomicOrdering::Release);
        }
        result
    }

    #[instrument(skip(self))]
    pub async fn put(
        &self,
        key: Vec<u8>,
        object_id: ObjectId,
        priority: Priority,
    ) -> Result<(), JournalError> {
        self.check_not_poisoned()?;
        let result = self
            .db
            .add_journal_entry(
                self.id,
                JournalEntryRecord::Put {
                    key,
                    object_id,
                    eager: matches!(priority, Priority::Eager),
                },
            )
            .await
            .map_err(JournalError::from);
        self.poison_on_err(result)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: Vec<u8>) -> Result<(), JournalError> {
        self.check_not_poisoned()?;
        let result = self
            .db
            .add_journal_entry(self.id, JournalEntryRecord::Delete { key })
            .await
            .map_err(JournalError::from);
        self.poison_on_err(result)
    }

    #[instrument(skip(self))]
    pub async fn rollback(&self) -> Result<(), JournalError> {
        self.db.remove_journal(self.id).await?;
        Ok(())
    }

    /// Materializes the buffered entries as a sorted change stream, applies
    /// them to the base commit's tree, and writes the resulting commit
    /// unless the net change was a no-op (in which case the base commit is
    /// returned unchanged and the journal is simply discarded).
    #[instrument(skip(self))]
    pub async fn commit(&self) -> Result<CommitResult, JournalError> {
        self.check_not_poisoned()?;
        let result = self.commit_inner().await;
        self.poison_on_err(result)
    }

    async fn commit_inner(&self) -> Result<CommitResult, JournalError> {
        let parents = self.base_commits().await?;
        let changes = self
            .db
            .list_journal_entries(self.id)
            .await?
            .into_iter()
            .map(|record| match record {
                JournalEntryRecord::Put {
                    key,
                    object_id,
                    eager,
                } => Change::Put(Entry {
                    key,
                    object_id,
                    priority: if eager { Priority::Eager } else { Priority::Lazy },
                }),
                JournalEntryRecord::Delete { key } => Change::Delete(key),
            })
            .collect::<Vec<_>>();

        let base_root = &parents[0].root_node_id;
        let (new_root, new_ids) = self.btree.apply_changes(base_root, changes).await?;

        let is_merge = parents.len() == 2;
        if !is_merge && new_root == parents[0].root_node_id {
            self.db.remove_journal(self.id).await?;
            return Ok(CommitResult {
                commit: parents[0].clone(),
                new_object_ids: Vec::new(),
            });
        }

        let parent_commits: Vec<Commit> = parents.iter().map(|p| (**p).clone()).collect();
        let remove_heads: Vec<CommitId> = parents.iter().map(|p| p.id.clone()).collect();
        let commit = Commit::from_content_and_parents(new_root, parent_commits)
            .map_err(|err| JournalError::PageDb(PageDbError::FormatError(err.to_string())))?;

        let new_object_ids: Vec<ObjectId> = new_ids.into_iter().collect();
        self.db
            .commit_journal_result(
                &commit.id,
                &commit.encode(),
                commit.timestamp.to_utc(),
                &remove_heads,
                &new_object_ids,
                self.id,
            )
            .await?;
        self.db
            .add_unsynced_commit(commit.id.clone(), commit.generation)
            .await?;
        self.commit_dag.put(&commit).await?;

        Ok(CommitResult {
            commit: Arc::new(commit),
            new_object_ids,
        })
    }

    async fn base_commits(&self) -> Result<Vec<Arc<Commit>>, JournalError> {
        match &self.base {
            JournalBase::Single(id) => Ok(vec![self.commit_dag.get(id).await?]),
            JournalBase::Merge(left, right) => {
                let left = self.commit_dag.get(left).await?;
                let right = self.commit_dag.get(right).await?;
                // Kept in the order the merge was started; `Commit::from_content_and_parents`
                // re-sorts parents by id regardless.
                Ok(vec![left, right])
            }
        }
    }
}
