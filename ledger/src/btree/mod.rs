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

//! Persistent, copy-on-write B-tree mapping keys to `(object id, priority)`.
//!
//! Grounded on `default_index/mutable.rs`'s split between an in-memory
//! builder and a persisted segment, generalized from a flat generation
//! index to a keyed tree whose level assignment comes from each key's
//! digest (a "Merkle search tree": a node's level is the maximum level
//! among the keys it holds directly, and each gap between two same-level
//! keys is a subtree of strictly lower-level keys). This gives the same
//! canonical-tree-for-a-given-key-set property as a copy-on-write diff walk
//! without needing to mutate an existing tree node by node.

mod entry;
mod node;
mod traversal;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

pub use entry::{Change, Entry, Priority};
pub use node::{key_level, TreeNode};

use crate::hash::ObjectId;
use crate::object_store::{BufferDataSource, Location, ObjectStore, ObjectStoreError};

#[derive(Debug, Error)]
pub enum BTreeError {
    #[error("tree node {0} not found")]
    NotFound(ObjectId),
    #[error("malformed tree node: {0}")]
    FormatError(String),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub struct BTree {
    objects: Arc<ObjectStore>,
}

impl BTree {
    pub fn new(objects: Arc<ObjectStore>) -> Self {
        BTree { objects }
    }

    /// The id of the canonical empty tree.
    pub async fn empty_tree_id(&self) -> Result<ObjectId, BTreeError> {
        self.write_node(&TreeNode::empty()).await
    }

    pub async fn read_node(&self, id: &ObjectId, location: Location) -> Result<TreeNode, BTreeError> {
        let object = self
            .objects
            .get_object(id, location)
            .await
            .map_err(|err| match err {
                ObjectStoreError::NotFound(id) => BTreeError::NotFound(id),
                other => BTreeError::ObjectStore(other),
            })?;
        TreeNode::decode(&object.data)
    }

    async fn write_node(&self, node: &TreeNode) -> Result<ObjectId, BTreeError> {
        let (id, _) = self
            .objects
            .add_from_local(BufferDataSource::new(node.encode()))
            .await?;
        Ok(id)
    }

    async fn write_node_tracked(
        &self,
        node: &TreeNode,
        new_ids: &mut HashSet<ObjectId>,
    ) -> Result<ObjectId, BTreeError> {
        let id = self.write_node(node).await?;
        new_ids.insert(id.clone());
        Ok(id)
    }

    pub async fn get_entry(&self, root: &ObjectId, key: &[u8]) -> Result<Option<Entry>, BTreeError> {
        let mut current = root.clone();
        loop {
            let node = self.read_node(&current, Location::Local).await?;
            match node.locate(key) {
                Ok(index) => return Ok(Some(node.entries[index].clone())),
                Err(child_index) => match &node.children[child_index] {
                    Some(child) => current = child.clone(),
                    None => return Ok(None),
                },
            }
        }
    }

    /// Applies a batch of [`Change`]s to the tree rooted at `root`,
    /// returning the new root id and the set of object ids newly written
    /// while doing so. Only the path from the root down to each changed
    /// key is ever rewritten; untouched subtrees are referenced by their
    /// existing id.
    pub async fn apply_changes(
        &self,
        root: &ObjectId,
        changes: Vec<Change>,
    ) -> Result<(ObjectId, HashSet<ObjectId>), BTreeError> {
        let mut by_key: BTreeMap<Vec<u8>, Change> = BTreeMap::new();
        for change in changes {
            by_key.insert(change.key().to_vec(), change);
        }
        if by_key.is_empty() {
            return Ok((root.clone(), HashSet::new()));
        }
        let sorted: Vec<Change> = by_key.into_values().collect();
        let built = self.build(NodeBuilder::Existing(root.clone()), &sorted).await?;
        let mut new_ids = HashSet::new();
        let new_root = self.write_builder(built, &mut new_ids).await?;
        Ok((new_root, new_ids))
    }

    /// Expands a builder into its `(level, entries, children)` view without
    /// writing anything.
    fn view<'a>(
        &'a self,
        builder: &'a NodeBuilder,
    ) -> BoxFuture<'a, Result<(u32, Vec<Entry>, Vec<NodeBuilder>), BTreeError>> {
        Box::pin(async move {
            match builder {
                NodeBuilder::Null => Ok((0, Vec::new(), vec![NodeBuilder::Null])),
                NodeBuilder::Existing(id) => {
                    let node = self.read_node(id, Location::Local).await?;
                    let children = node
                        .children
                        .into_iter()
                        .map(|c| match c {
                            Some(id) => NodeBuilder::Existing(id),
                            None => NodeBuilder::Null,
                        })
                        .collect();
                    Ok((node.level, node.entries, children))
                }
                NodeBuilder::New { level, entries, children } => {
                    Ok((*level, entries.clone(), children.clone()))
                }
            }
        })
    }

    /// The copy-on-write merge at the core of `apply_changes`: rebuilds only
    /// the part of `node` that `changes` (sorted, deduped by key) actually
    /// touches, short-circuiting to `node` unchanged wherever nothing below
    /// it changed.
    fn build<'a>(&'a self, node: NodeBuilder, changes: &'a [Change]) -> BoxFuture<'a, Result<NodeBuilder, BTreeError>> {
        Box::pin(async move {
            if changes.is_empty() {
                return Ok(node);
            }
            let node_clone = node.clone();
            let (level, mut entries, mut children) = self.view(&node).await?;

            let has_put = changes.iter().any(|c| matches!(c, Change::Put(_)));
            if entries.is_empty() && children.len() == 1 && matches!(children[0], NodeBuilder::Null) && !has_put {
                return Ok(node_clone);
            }

            let put_level = changes
                .iter()
                .filter_map(|c| match c {
                    Change::Put(entry) => Some(key_level(&entry.key)),
                    Change::Delete(_) => None,
                })
                .max();
            let target_level = put_level.map_or(level, |put_level| level.max(put_level));

            if level < target_level {
                children = vec![node_clone];
                entries = Vec::new();
            }

            let mut here = Vec::new();
            let mut below = Vec::new();
            for change in changes {
                if key_level(change.key()) == target_level {
                    here.push(change.clone());
                } else {
                    below.push(change.clone());
                }
            }

            for change in here {
                match change {
                    Change::Put(entry) => match entries.binary_search_by(|e| e.key.cmp(&entry.key)) {
                        Ok(i) => entries[i] = entry,
                        Err(i) => {
                            let (left, right) = self.split_at(&children[i], &entry.key).await?;
                            children.splice(i..=i, [left, right]);
                            entries.insert(i, entry);
                        }
                    },
                    Change::Delete(key) => {
                        if let Ok(i) = entries.binary_search_by(|e| e.key.cmp(&key)) {
                            entries.remove(i);
                            let left = children.remove(i);
                            let right = children.remove(i);
                            children.insert(i, self.merge_adjacent(left, right).await?);
                        }
                    }
                }
            }

            let mut buckets: Vec<Vec<Change>> = vec![Vec::new(); children.len()];
            for change in below {
                let idx = match entries.binary_search_by(|e| e.key.as_slice().cmp(change.key())) {
                    Ok(_) => unreachable!("a change routed below target_level can't equal an entry at it"),
                    Err(i) => i,
                };
                buckets[idx].push(change);
            }
            for (idx, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                let child = std::mem::replace(&mut children[idx], NodeBuilder::Null);
                children[idx] = self.build(child, &bucket).await?;
            }

            if entries.is_empty() {
                Ok(children.into_iter().next().unwrap())
            } else {
                Ok(NodeBuilder::New { level: target_level, entries, children })
            }
        })
    }

    /// Splits `node` into `(left, right)` holding respectively the entries
    /// below and above `key`, which must not already be present in `node`.
    fn split_at<'a>(
        &'a self,
        node: &'a NodeBuilder,
        key: &'a [u8],
    ) -> BoxFuture<'a, Result<(NodeBuilder, NodeBuilder), BTreeError>> {
        Box::pin(async move {
            let (level, entries, children) = self.view(node).await?;
            if entries.is_empty() && matches!(children[0], NodeBuilder::Null) {
                return Ok((NodeBuilder::Null, NodeBuilder::Null));
            }
            let idx = match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
                Ok(_) => unreachable!("split_at is only called for an absent key"),
                Err(i) => i,
            };
            let (sub_left, sub_right) = self.split_at(&children[idx], key).await?;

            let left = if idx == 0 {
                sub_left
            } else {
                NodeBuilder::New {
                    level,
                    entries: entries[..idx].to_vec(),
                    children: children[..idx].iter().cloned().chain(std::iter::once(sub_left)).collect(),
                }
            };
            let right = if idx == entries.len() {
                sub_right
            } else {
                NodeBuilder::New {
                    level,
                    entries: entries[idx..].to_vec(),
                    children: std::iter::once(sub_right).chain(children[idx + 1..].iter().cloned()).collect(),
                }
            };
            Ok((left, right))
        })
    }

    /// Merges two subtrees known to hold disjoint, non-interleaved key
    /// ranges (`left`'s keys all below `right`'s) into one, grafting the
    /// shallower side into the deeper side's boundary child.
    fn merge_adjacent<'a>(
        &'a self,
        left: NodeBuilder,
        right: NodeBuilder,
    ) -> BoxFuture<'a, Result<NodeBuilder, BTreeError>> {
        Box::pin(async move {
            let (left_level, left_entries, left_children) = self.view(&left).await?;
            if left_entries.is_empty() && matches!(left_children[0], NodeBuilder::Null) {
                return Ok(right);
            }
            let (right_level, right_entries, right_children) = self.view(&right).await?;
            if right_entries.is_empty() && matches!(right_children[0], NodeBuilder::Null) {
                return Ok(left);
            }

            if left_level >= right_level {
                let mut children = left_children;
                let last = children.len() - 1;
                let grafted = std::mem::replace(&mut children[last], NodeBuilder::Null);
                children[last] = self.merge_adjacent(grafted, right).await?;
                Ok(NodeBuilder::New { level: left_level, entries: left_entries, children })
            } else {
                let mut children = right_children;
                let grafted = std::mem::replace(&mut children[0], NodeBuilder::Null);
                children[0] = self.merge_adjacent(left, grafted).await?;
                Ok(NodeBuilder::New { level: right_level, entries: right_entries, children })
            }
        })
    }

    /// Flushes a builder bottom-up into real tree-node objects.
    /// `Existing` ids pass through untouched; `Null` only ever becomes a
    /// written empty-tree object at the very top (an internal `Null` child
    /// stays a bare `None` in its parent's `TreeNode::children`).
    fn write_builder<'a>(
        &'a self,
        builder: NodeBuilder,
        new_ids: &'a mut HashSet<ObjectId>,
    ) -> BoxFuture<'a, Result<ObjectId, BTreeError>> {
        Box::pin(async move {
            match builder {
                NodeBuilder::Existing(id) => Ok(id),
                NodeBuilder::Null => self.write_node_tracked(&TreeNode::empty(), new_ids).await,
                NodeBuilder::New { level, entries, children } => {
                    let mut child_ids = Vec::with_capacity(children.len());
                    for child in children {
                        child_ids.push(match child {
                            NodeBuilder::Null => None,
                            other => Some(self.write_builder(other, new_ids).await?),
                        });
                    }
                    let node = TreeNode { level, entries, children: child_ids };
                    self.write_node_tracked(&node, new_ids).await
                }
            }
        })
    }
}

/// A subtree being assembled while applying changes: either passed through
/// unchanged from the base tree, an explicit absence, or freshly built
/// content still waiting to be flushed.
#[derive(Debug, Clone)]
enum NodeBuilder {
    Null,
    Existing(ObjectId),
    New {
        level: u32,
        entries: Vec<Entry>,
        children: Vec<NodeBuilder>,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::page_db::RedbPageDb;

    fn tree() -> (tempfile::TempDir, BTree) {
        let dir = tempfile::Builder::new().prefix("ledger-btree-test-").tempdir().unwrap();
        let db = RedbPageDb::open(&dir.path().join("page.redb")).unwrap();
        let objects = Arc::new(ObjectStore::new(Arc::new(db)));
        (dir, BTree::new(objects))
    }

    fn entry(key: &str, value: &str) -> Entry {
        Entry {
            key: key.as_bytes().to_vec(),
            object_id: ObjectId::compute(crate::hash::ObjectType::Value, value.as_bytes()),
            priority: Priority::Eager,
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, tree) = tree();
        let empty = tree.empty_tree_id().await.unwrap();
        let (root, _) = tree
            .apply_changes(&empty, vec![Change::Put(entry("name", "Alice"))])
            .await
            .unwrap();
        let found = tree.get_entry(&root, b"name").await.unwrap().unwrap();
        assert_eq!(found.object_id, entry("name", "Alice").object_id);
    }

    #[tokio::test]
    async fn keys_enumerate_in_sorted_order() {
        let (_dir, tree) = tree();
        let empty = tree.empty_tree_id().await.unwrap();
        let (root, _) = tree
            .apply_changes(
                &empty,
                vec![
                    Change::Put(entry("010", "b")),
                    Change::Put(entry("000", "a")),
                    Change::Put(entry("011", "c")),
                    Change::Put(entry("001", "d")),
                ],
            )
            .await
            .unwrap();
        let mut keys = Vec::new();
        tree.for_each_entry(&root, b"00", &mut |e: &Entry| {
            keys.push(String::from_utf8(e.key.clone()).unwrap());
            true
        })
        .await
        .unwrap();
        assert_eq!(keys, vec!["000", "001"]);
    }

    #[tokio::test]
    async fn put_then_delete_same_key_elides_to_base() {
        let (_dir, tree) = tree();
        let empty = tree.empty_tree_id().await.unwrap();
        let (base, _) = tree
            .apply_changes(&empty, vec![Change::Put(entry("a", "1"))])
            .await
            .unwrap();
        let (after, _) = tree
            .apply_changes(
                &base,
                vec![
                    Change::Put(entry("transient", "x")),
                    Change::Delete(b"transient".to_vec()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(after, base);
    }

    #[tokio::test]
    async fn diff_then_apply_reaches_target_root() {
        let (_dir, tree) = tree();
        let empty = tree.empty_tree_id().await.unwrap();
        let (root_a, _) = tree
            .apply_changes(&empty, vec![Change::Put(entry("x", "1")), Change::Put(entry("y", "2"))])
            .await
            .unwrap();
        let (root_b, _) = tree
            .apply_changes(&root_a, vec![Change::Delete(b"x".to_vec()), Change::Put(entry("z", "3"))])
            .await
            .unwrap();

        let mut changes = Vec::new();
        tree.diff(&root_a, &root_b, &[], &mut |change: Change| changes.push(change))
            .await
            .unwrap();
        let (applied, _) = tree.apply_changes(&root_a, changes).await.unwrap();
        assert_eq!(applied, root_b);
    }
}
