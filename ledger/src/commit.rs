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

//! The immutable commit record: `{id, timestamp, generation, root_node_id,
//! parent_ids}`. Grounded on `op_store.rs`'s `Operation`/`OperationMetadata`
//! shape and error-enum style.

use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use sha2::{Digest, Sha256};
use smallvec::SmallVec;
use thiserror::Error;

use crate::hash::ObjectId;

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("commit must have 1 or 2 parents, found {0}")]
    WrongParentCount(usize),
    #[error("malformed commit: {0}")]
    FormatError(String),
}

/// Content-derived identifier of a [`Commit`]: `SHA-256` of its serialized
/// bytes, except for the sentinel empty commit.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(Vec<u8>);

impl CommitId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        CommitId(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The id of the synthetic empty commit that roots every page's DAG.
    pub fn sentinel() -> Self {
        CommitId(vec![0u8; 32])
    }

    pub fn is_sentinel(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", hex::encode(&self.0))
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// An immutable commit: one or two parents, the root of a [`crate::btree`]
/// snapshot, a generation number, and a timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: CommitId,
    pub root_node_id: ObjectId,
    pub parent_ids: SmallVec<[CommitId; 2]>,
    pub timestamp: DateTime<FixedOffset>,
    pub generation: u64,
}

impl Commit {
    /// Builds a normal (1 parent) or merge (2 parent) commit from its
    /// content and parents, computing generation, timestamp, and id.
    pub fn from_content_and_parents(
        root_node_id: ObjectId,
        mut parents: Vec<Commit>,
    ) -> Result<Commit, CommitError> {
        if parents.is_empty() || parents.len() > 2 {
            return Err(CommitError::WrongParentCount(parents.len()));
        }
        parents.sort_by(|a, b| a.id.cmp(&b.id));
        let generation = 1 + parents.iter().map(|p| p.generation).max().unwrap();
        let timestamp = if parents.len() == 2 {
            parents.iter().map(|p| p.timestamp).max().unwrap()
        } else {
            Utc::now().into()
        };
        let parent_ids = parents.iter().map(|p| p.id.clone()).collect();
        let bytes = encode(&root_node_id, &parent_ids, timestamp, generation);
        let id = hash_bytes(&bytes);
        Ok(Commit {
            id,
            root_node_id,
            parent_ids,
            timestamp,
            generation,
        })
    }

    /// The synthetic first commit of every page: no parents, empty tree,
    /// generation 0, id = the sentinel value.
    pub fn empty(empty_tree_id: ObjectId) -> Commit {
        Commit {
            id: CommitId::sentinel(),
            root_node_id: empty_tree_id,
            parent_ids: SmallVec::new(),
            timestamp: DateTime::<Utc>::from_timestamp(0, 0).unwrap().into(),
            generation: 0,
        }
    }

    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() == 2
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(&self.root_node_id, &self.parent_ids, self.timestamp, self.generation)
    }

    pub fn decode(id: CommitId, bytes: &[u8]) -> Result<Commit, CommitError> {
        let proto: crate::proto::Commit = prost::Message::decode(bytes)
            .map_err(|err| CommitError::FormatError(err.to_string()))?;
        if proto.parent_ids.is_empty() || proto.parent_ids.len() > 2 {
            return Err(CommitError::WrongParentCount(proto.parent_ids.len()));
        }
        if !id.is_sentinel() {
            let expected = hash_bytes(bytes);
            if expected != id {
                return Err(CommitError::FormatError(
                    "commit id does not match its serialized bytes".into(),
                ));
            }
        }
        let tz = FixedOffset::east_opt(proto.tz_offset_minutes * 60)
            .ok_or_else(|| CommitError::FormatError("invalid timezone offset".into()))?;
        let timestamp = tz
            .timestamp_millis_opt(proto.millis_since_epoch)
            .single()
            .ok_or_else(|| CommitError::FormatError("invalid commit timestamp".into()))?;
        Ok(Commit {
            id,
            root_node_id: ObjectId::from_bytes(&proto.root_node_id),
            parent_ids: proto.parent_ids.iter().map(|b| CommitId::from_bytes(b)).collect(),
            timestamp,
            generation: proto.generation,
        })
    }
}

fn encode(
    root_node_id: &ObjectId,
    parent_ids: &[CommitId],
    timestamp: DateTime<FixedOffset>,
    generation: u64,
) -> Vec<u8> {
    let proto = crate::proto::Commit {
        root_node_id: root_node_id.as_bytes().to_vec(),
        parent_ids: parent_ids.iter().map(|id| id.as_bytes().to_vec()).collect(),
        millis_since_epoch: timestamp.timestamp_millis(),
        tz_offset_minutes: timestamp.offset().local_minus_utc() / 60,
        generation,
    };
    prost::Message::encode_to_vec(&proto)
}

fn hash_bytes(bytes: &[u8]) -> CommitId {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    CommitId(hasher.finalize().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ObjectType;

    fn test_tree_id(tag: &str) -> ObjectId {
        ObjectId::compute(ObjectType::Value, tag.as_bytes())
    }

    #[test]
    fn single_parent_commit_increments_generation() {
        let root = Commit::empty(test_tree_id("empty"));
        let child = Commit::from_content_and_parents(test_tree_id("a"), vec![root.clone()]).unwrap();
        assert_eq!(child.generation, 1);
        assert_eq!(child.parent_ids.as_slice(), [root.id.clone()]);
    }

    #[test]
    fn merge_commit_generation_is_max_plus_one() {
        let root = Commit::empty(test_tree_id("empty"));
        let left = Commit::from_content_and_parents(test_tree_id("a"), vec![root.clone()]).unwrap();
        let mut right = Commit::from_content_and_parents(test_tree_id("b"), vec![root.clone()]).unwrap();
        right.generation = 3;
        let merge =
            Commit::from_content_and_parents(test_tree_id("c"), vec![left.clone(), right.clone()])
                .unwrap();
        assert_eq!(merge.generation, 4);
        assert!(merge.is_merge());
    }

    #[test]
    fn parents_are_sorted_by_id() {
        let root = Commit::empty(test_tree_id("empty"));
        let a = Commit::from_content_and_parents(test_tree_id("a"), vec![root.clone()]).unwrap();
        let b = Commit::from_content_and_parents(test_tree_id("b"), vec![root.clone()]).unwrap();
        let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
        let merge = Commit::from_content_and_parents(
            test_tree_id("c"),
            vec![second.clone(), first.clone()],
        )
        .unwrap();
        assert_eq!(merge.parent_ids.as_slice(), [first.id, second.id]);
    }

    #[test]
    fn serialize_then_parse_is_identity() {
        let root = Commit::empty(test_tree_id("empty"));
        let commit = Commit::from_content_and_parents(test_tree_id("a"), vec![root]).unwrap();
        let bytes = commit.encode();
        let parsed = Commit::decode(commit.id.clone(), &bytes).unwrap();
        assert_eq!(parsed, commit);
    }

    #[test]
    fn zero_parents_is_rejected() {
        let result = Commit::from_content_and_parents(test_tree_id("a"), vec![]);
        assert!(matches!(result, Err(CommitError::WrongParentCount(0))));
    }
}
