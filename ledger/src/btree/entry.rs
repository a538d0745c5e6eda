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

use crate::hash::ObjectId;

/// Whether a value's object should be fetched eagerly (at commit-add time)
/// or lazily (only when a client reads it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Eager,
    Lazy,
}

/// A single sorted-map entry: a key mapped to the object holding its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub object_id: ObjectId,
    pub priority: Priority,
}

/// One buffered mutation against a tree, as fed to [`super::BTree::apply_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(Entry),
    Delete(Vec<u8>),
}

impl Change {
    pub fn key(&self) -> &[u8] {
        match self {
            Change::Put(entry) => &entry.key,
            Change::Delete(key) => key,
        }
    }
}
