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

//! The three merge strategies named in the merge subsystem design: a
//! built-in last-one-wins policy, delegation to an external
//! [`ConflictResolver`], and an auto-merge fast path that falls back to the
//! custom resolver on any overlapping key.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::MergeError;
use crate::btree::Change;
use crate::commit::Commit;
use crate::page_db::JournalKind;
use crate::page_storage::{PageStorage, PageStorageError};

fn wrap(err: PageStorageError) -> MergeError {
    match err {
        PageStorageError::Journal(e) => MergeError::Journal(e),
        PageStorageError::BTree(e) => MergeError::BTree(e),
        other => MergeError::NotFound(other.to_string()),
    }
}

/// External decision-maker for the `Custom` strategy: given both sides and
/// their common ancestor, returns the changes to apply on top of `left` to
/// produce the merge result.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        storage: &PageStorage,
        left: &Commit,
        right: &Commit,
        ancestor: &Commit,
    ) -> Result<Vec<Change>, MergeError>;
}

#[derive(Clone)]
pub enum MergeStrategy {
    LastOneWins,
    Custom(Arc<dyn ConflictResolver>),
    AutoWithFallback(Arc<dyn ConflictResolver>),
}

impl MergeStrategy {
    #[instrument(skip(self, storage, left, right, ancestor))]
    pub async fn merge(
        &self,
        storage: &PageStorage,
        left: &Commit,
        right: &Commit,
        ancestor: &Commit,
    ) -> Result<Arc<Commit>, MergeError> {
        match self {
            MergeStrategy::LastOneWins => last_one_wins(storage, left, right, ancestor).await,
            MergeStrategy::Custom(resolver) => custom(storage, left, right, ancestor, resolver.as_ref()).await,
            MergeStrategy::AutoWithFallback(resolver) => {
                auto_with_fallback(storage, left, right, ancestor, resolver.as_ref()).await
            }
        }
    }
}

/// `left` = older head, `right` = newer head. Applies `ancestor → right`'s
/// diff on top of `left`, so ties resolve to the newer side by construction.
async fn last_one_wins(
    storage: &PageStorage,
    left: &Commit,
    right: &Commit,
    ancestor: &Commit,
) -> Result<Arc<Commit>, MergeError> {
    let mut changes = Vec::new();
    storage
        .btree()
        .diff(&ancestor.root_node_id, &right.root_node_id, &[], &mut |c| changes.push(c))
        .await?;
    apply_merge_changes(storage, left.id.clone(), right.id.clone(), changes).await
}

async fn custom(
    storage: &PageStorage,
    left: &Commit,
    right: &Commit,
    ancestor: &Commit,
    resolver: &dyn ConflictResolver,
) -> Result<Arc<Commit>, MergeError> {
    let changes = resolver.resolve(storage, left, right, ancestor).await?;
    apply_merge_changes(storage, left.id.clone(), right.id.clone(), changes).await
}

/// Fast path: if the two sides' diffs from the ancestor touch disjoint key
/// sets, apply the right side's diff onto the left side mechanically.
/// Any overlapping key means a real conflict, which only the custom
/// resolver is equipped to arbitrate.
async fn auto_with_fallback(
    storage: &PageStorage,
    left: &Commit,
    right: &Commit,
    ancestor: &Commit,
    resolver: &dyn ConflictResolver,
) -> Result<Arc<Commit>, MergeError> {
    let mut right_changes = Vec::new();
    storage
        .btree()
        .diff(&ancestor.root_node_id, &right.root_node_id, &[], &mut |c| right_changes.push(c))
        .await?;
    if right_changes.is_empty() {
        return apply_merge_changes(storage, left.id.clone(), right.id.clone(), Vec::new()).await;
    }

    let mut left_changes = Vec::new();
    storage
        .btree()
        .diff(&ancestor.root_node_id, &left.root_node_id, &[], &mut |c| left_changes.push(c))
        .await?;

    let left_keys: HashSet<&[u8]> = left_changes.iter().map(change_key).collect();
    let overlap = right_changes.iter().any(|c| left_keys.contains(change_key(c)));
    if overlap {
        return custom(storage, left, right, ancestor, resolver).await;
    }
    apply_merge_changes(storage, left.id.clone(), right.id.clone(), right_changes).await
}

fn change_key(change: &Change) -> &[u8] {
    match change {
        Change::Put(entry) => &entry.key,
        Change::Delete(key) => key,
    }
}

async fn apply_merge_changes(
    storage: &PageStorage,
    left: crate::commit::CommitId,
    right: crate::commit::CommitId,
    changes: Vec<Change>,
) -> Result<Arc<Commit>, MergeError> {
    let journal = storage.start_merge_commit(left, right).await.map_err(wrap)?;
    for change in changes {
        match change {
            Change::Put(entry) => journal
                .put(entry.key, entry.object_id, entry.priority)
                .await
                .map_err(MergeError::Journal)?,
            Change::Delete(key) => journal.delete(key).await.map_err(MergeError::Journal)?,
        }
    }
    storage.commit_journal(journal).await.map_err(wrap)
}
