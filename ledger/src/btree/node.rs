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

use sha2::{Digest, Sha256};

use super::entry::{Entry, Priority};
use super::BTreeError;
use crate::hash::ObjectId;
use crate::proto;

/// A node of the persistent B-tree: an ordered list of entries and one more
/// child than there are entries (`children[i]` holds keys strictly between
/// `entries[i-1]` and `entries[i]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub level: u32,
    pub entries: Vec<Entry>,
    pub children: Vec<Option<ObjectId>>,
}

impl TreeNode {
    pub fn empty() -> Self {
        TreeNode {
            level: 0,
            entries: Vec::new(),
            children: vec![None],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let proto = proto::TreeNode {
            level: self.level,
            entries: self
                .entries
                .iter()
                .map(|e| proto::TreeEntry {
                    key: e.key.clone(),
                    object_id: e.object_id.as_bytes().to_vec(),
                    priority: match e.priority {
                        Priority::Eager => proto::Priority::Eager as i32,
                        Priority::Lazy => proto::Priority::Lazy as i32,
                    },
                })
                .collect(),
            children: self
                .children
                .iter()
                .map(|c| c.as_ref().map(|id| id.as_bytes().to_vec()).unwrap_or_default())
                .collect(),
        };
        prost::Message::encode_to_vec(&proto)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BTreeError> {
        let proto: proto::TreeNode = prost::Message::decode(bytes)
            .map_err(|err| BTreeError::FormatError(format!("bad tree node: {err}")))?;
        if proto.children.len() != proto.entries.len() + 1 {
            return Err(BTreeError::FormatError(
                "tree node child count must be entries + 1".into(),
            ));
        }
        let entries = proto
            .entries
            .into_iter()
            .map(|e| {
                let priority = match proto::Priority::try_from(e.priority) {
                    Ok(proto::Priority::Lazy) => Priority::Lazy,
                    _ => Priority::Eager,
                };
                Entry {
                    key: e.key,
                    object_id: ObjectId::from_bytes(&e.object_id),
                    priority,
                }
            })
            .collect();
        let children = proto
            .children
            .into_iter()
            .map(|c| (!c.is_empty()).then(|| ObjectId::from_bytes(&c)))
            .collect();
        Ok(TreeNode {
            level: proto.level,
            entries,
            children,
        })
    }

    /// Finds `key` among this node's entries, or the child index that would
    /// contain it.
    pub fn locate(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_slice().cmp(key))
    }
}

/// Derives a key's B-tree level from the number of leading zero bytes of
/// its digest: higher levels are exponentially rarer, giving an expected
/// branching factor close to 256 (approximated in the spec as "≈255").
pub fn key_level(key: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(key);
    let digest = hasher.finalize();
    digest.iter().take_while(|&&b| b == 0).count() as u32
}
