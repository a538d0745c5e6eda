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

use std::future::Future;
use std::pin::Pin;

use itertools::{EitherOrBoth, Itertools};

use super::entry::{Change, Entry};
use super::{BTree, BTreeError};
use crate::hash::ObjectId;
use crate::object_store::Location;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

impl BTree {
    /// In-order traversal of entries with key ≥ `min_key`. `on_next` returns
    /// `false` to stop early.
    pub async fn for_each_entry(
        &self,
        root: &ObjectId,
        min_key: &[u8],
        on_next: &mut dyn FnMut(&Entry) -> bool,
    ) -> Result<(), BTreeError> {
        self.visit(root, min_key, on_next).await?;
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        node_id: &'a ObjectId,
        min_key: &'a [u8],
        on_next: &'a mut dyn FnMut(&Entry) -> bool,
    ) -> BoxFuture<'a, Result<bool, BTreeError>> {
        Box::pin(async move {
            let node = self.read_node(node_id, Location::Local).await?;
            for i in 0..node.entries.len() {
                if let Some(child) = &node.children[i] {
                    if !self.visit(child, min_key, on_next).await? {
                        return Ok(false);
                    }
                }
                let entry = &node.entries[i];
                if entry.key.as_slice() >= min_key && !on_next(entry) {
                    return Ok(false);
                }
            }
            if let Some(child) = node.children.last().and_then(|c| c.as_ref()) {
                if !self.visit(child, min_key, on_next).await? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    /// Emits the minimal sequence of [`Change`]s that turns the contents of
    /// `root_a` into the contents of `root_b`, restricted to keys ≥
    /// `min_key`, in key order.
    pub async fn diff(
        &self,
        root_a: &ObjectId,
        root_b: &ObjectId,
        min_key: &[u8],
        on_change: &mut dyn FnMut(Change),
    ) -> Result<(), BTreeError> {
        if root_a == root_b {
            return Ok(());
        }
        let mut a_entries = Vec::new();
        self.for_each_entry(root_a, min_key, &mut |e: &Entry| {
            a_entries.push(e.clone());
            true
        })
        .await?;
        let mut b_entries = Vec::new();
        self.for_each_entry(root_b, min_key, &mut |e: &Entry| {
            b_entries.push(e.clone());
            true
        })
        .await?;

        for pair in a_entries.into_iter().merge_join_by(b_entries, |a, b| a.key.cmp(&b.key)) {
            match pair {
                EitherOrBoth::Left(a) => on_change(Change::Delete(a.key)),
                EitherOrBoth::Right(b) => on_change(Change::Put(b)),
                EitherOrBoth::Both(a, b) => {
                    if a != b {
                        on_change(Change::Put(b));
                    }
                }
            }
        }
        Ok(())
    }

    /// Collects every tree node and value object reachable from `root`,
    /// Local-only, that hasn't been uploaded yet. Recurses through
    /// `TreeNode.children` and `entries[].object_id` directly, since those
    /// form a graph layered on top of [`ObjectStore`]'s own chunking, which
    /// `ObjectStore::collect_unsynced_pieces` has no way to see.
    pub fn collect_unsynced_pieces<'a>(
        &'a self,
        root: &'a ObjectId,
        out: &'a mut Vec<ObjectId>,
    ) -> BoxFuture<'a, Result<(), BTreeError>> {
        Box::pin(async move {
            if root.inline_data().is_some() {
                return Ok(());
            }
            let node = self.read_node(root, Location::Local).await?;
            for child in node.children.iter().flatten() {
                self.collect_unsynced_pieces(child, out).await?;
            }
            for entry in &node.entries {
                self.objects.collect_unsynced_pieces(&entry.object_id, out).await?;
            }
            self.objects.collect_unsynced_pieces(root, out).await?;
            Ok(())
        })
    }

    /// Visits every tree node and leaf entry reachable from `root`,
    /// unconditionally and regardless of sync status, reading through
    /// `location`. Used to pull down everything a freshly synced commit
    /// references.
    pub fn for_each_node_and_entry<'a>(
        &'a self,
        root: &'a ObjectId,
        location: Location,
        on_node: &'a mut dyn FnMut(&ObjectId),
        on_entry: &'a mut dyn FnMut(&Entry),
    ) -> BoxFuture<'a, Result<(), BTreeError>> {
        Box::pin(async move {
            on_node(root);
            if root.inline_data().is_some() {
                return Ok(());
            }
            let node = self.read_node(root, location).await?;
            for child in node.children.iter().flatten() {
                self.for_each_node_and_entry(child, location, on_node, on_entry).await?;
            }
            for entry in &node.entries {
                on_entry(entry);
            }
            Ok(())
        })
    }
}
