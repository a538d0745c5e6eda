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

//! Commit construction, persistence, and common-ancestor search.
//!
//! The common-ancestor algorithm is grounded on `index.rs`'s
//! `common_ancestors_pos`/`heads_pos`: a generation-ordered frontier merge,
//! adapted from index positions to commit ids looked up through a small
//! in-memory cache backed by [`PageDb`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::commit::{Commit, CommitError, CommitId};
use crate::hash::ObjectId;
use crate::page_db::{PageDb, PageDbError};

#[derive(Debug, Error)]
pub enum CommitDagError {
    #[error("commit {0} not found")]
    NotFound(CommitId),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    PageDb(#[from] PageDbError),
    #[error("no common ancestor (disjoint commit graphs)")]
    NoCommonAncestor,
}

/// In-memory cache of decoded commits in front of a page's [`PageDb`],
/// mirroring `store.rs`'s `CLruCache<CommitId, Arc<Commit>>` pattern (sized
/// unbounded here since a page's live commit set is small relative to a
/// whole-repo commit history).
pub struct CommitDag {
    db: Arc<dyn PageDb>,
    cache: RwLock<HashMap<CommitId, Arc<Commit>>>,
}

impl CommitDag {
    pub fn new(db: Arc<dyn PageDb>) -> Self {
        CommitDag {
            db,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Ensures the sentinel empty commit is present, returning it.
    pub async fn ensure_root(&self, empty_tree_id: ObjectId) -> Result<Arc<Commit>, CommitDagError> {
        let root = Commit::empty(empty_tree_id);
        if self.db.get_commit(&root.id).await?.is_none() {
            self.put(&root).await?;
        }
        Ok(Arc::new(root))
    }

    pub async fn get(&self, id: &CommitId) -> Result<Arc<Commit>, CommitDagError> {
        if let Some(commit) = self.cache.read().await.get(id) {
            return Ok(commit.clone());
        }
        let bytes = self
            .db
            .get_commit(id)
            .await?
            .ok_or_else(|| CommitDagError::NotFound(id.clone()))?;
        let commit = Arc::new(Commit::decode(id.clone(), &bytes)?);
        self.cache.write().await.insert(id.clone(), commit.clone());
        Ok(commit)
    }

    pub async fn put(&self, commit: &Commit) -> Result<(), CommitDagError> {
        self.db.put_commit(&commit.id, &commit.encode()).await?;
        self.cache
            .write()
            .await
            .insert(commit.id.clone(), Arc::new(commit.clone()));
        Ok(())
    }

    /// Returns the commit with the greatest generation that is an ancestor
    /// of both `a` and `b`.
    pub async fn find_common_ancestor(
        &self,
        a: &CommitId,
        b: &CommitId,
    ) -> Result<CommitId, CommitDagError> {
        #[derive(Eq, PartialEq)]
        struct Entry {
            generation: u64,
            id: CommitId,
        }
        impl Ord for Entry {
            fn cmp(&self, other: &Self) -> Ordering {
                self.generation
                    .cmp(&other.generation)
                    .then_with(|| self.id.cmp(&other.id))
            }
        }
        impl PartialOrd for Entry {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        const FROM_A: u8 = 1;
        const FROM_B: u8 = 2;

        let mut visited: HashMap<CommitId, u8> = HashMap::new();
        let mut heap = BinaryHeap::new();

        for (id, bit) in [(a, FROM_A), (b, FROM_B)] {
            let commit = self.get(id).await?;
            visited.insert(id.clone(), bit);
            heap.push(Entry {
                generation: commit.generation,
                id: id.clone(),
            });
        }

        while let Some(Entry { id, .. }) = heap.pop() {
            if visited[&id] == FROM_A | FROM_B {
                return Ok(id);
            }
            let mask = visited[&id];
            let commit = self.get(&id).await?;
            for parent in &commit.parent_ids {
                let entry = visited.entry(parent.clone()).or_insert(0);
                *entry |= mask;
                let parent_commit = self.get(parent).await?;
                heap.push(Entry {
                    generation: parent_commit.generation,
                    id: parent.clone(),
                });
            }
        }
        Err(CommitDagError::NoCommonAncestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectType;
    use crate::page_db::RedbPageDb;

    fn tree_id(tag: &str) -> ObjectId {
        ObjectId::compute(ObjectType::Value, tag.as_bytes())
    }

    fn dag() -> (tempfile::TempDir, CommitDag) {
        let dir = tempfile::Builder::new()
            .prefix("ledger-commit-dag-test-")
            .tempdir()
            .unwrap();
        let db = RedbPageDb::open(&dir.path().join("page.redb")).unwrap();
        (dir, CommitDag::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn finds_ancestor_of_diverged_branches() {
        let (_dir, dag) = dag();
        let root = dag.ensure_root(tree_id("empty")).await.unwrap();
        let base = Commit::from_content_and_parents(tree_id("base"), vec![(*root).clone()]).unwrap();
        dag.put(&base).await.unwrap();
        let left = Commit::from_content_and_parents(tree_id("left"), vec![base.clone()]).unwrap();
        dag.put(&left).await.unwrap();
        let right = Commit::from_content_and_parents(tree_id("right"), vec![base.clone()]).unwrap();
        dag.put(&right).await.unwrap();

        let ancestor = dag.find_common_ancestor(&left.id, &right.id).await.unwrap();
        assert_eq!(ancestor, base.id);
    }

    #[tokio::test]
    async fn long_chain_terminates() {
        let (_dir, dag) = dag();
        let root = dag.ensure_root(tree_id("empty")).await.unwrap();
        let mut chain = vec![(*root).clone()];
        for i in 0..180 {
            let next =
                Commit::from_content_and_parents(tree_id(&i.to_string()), vec![chain.last().unwrap().clone()])
                    .unwrap();
            dag.put(&next).await.unwrap();
            chain.push(next);
        }
        let tip = chain.last().unwrap();
        let ancestor = dag.find_common_ancestor(&tip.id, &tip.id).await.unwrap();
        assert_eq!(ancestor, tip.id);
    }
}
