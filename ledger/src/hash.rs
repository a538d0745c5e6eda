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

//! Content-addressed object identifiers.
//!
//! An [`ObjectId`] is one of three kinds, distinguished by size and leading
//! byte: inline (the content itself, for data no longer than a digest),
//! value-hash (`0x01` ++ SHA-256 of the raw bytes), or index-hash (`0x02` ++
//! SHA-256 of a serialized [`FileIndex`](crate::object_store::FileIndex)).

use std::fmt;

use sha2::{Digest, Sha256};

pub const DIGEST_SIZE: usize = 32;

const VALUE_HASH_PREFIX: u8 = 0x01;
const INDEX_HASH_PREFIX: u8 = 0x02;

/// Whether an [`ObjectId`] names a leaf value chunk or an index node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Inline,
    ValueHash,
    IndexHash,
}

/// Whether the object identified is a plain value chunk or a file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Value,
    Index,
}

/// A content-addressed object id: either the inlined bytes of a small value,
/// or a one-byte kind prefix followed by a SHA-256 digest.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(Vec<u8>);

impl ObjectId {
    /// Computes the id for `content` under `object_type`, inlining it when it
    /// is no longer than a digest (matching `ComputeObjectId` in the source).
    pub fn compute(object_type: ObjectType, content: &[u8]) -> Self {
        match object_type {
            ObjectType::Value if content.len() <= DIGEST_SIZE => ObjectId(content.to_vec()),
            ObjectType::Value => Self::with_prefix(VALUE_HASH_PREFIX, content),
            ObjectType::Index => Self::with_prefix(INDEX_HASH_PREFIX, content),
        }
    }

    fn with_prefix(prefix: u8, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let digest = hasher.finalize();
        let mut bytes = Vec::with_capacity(1 + DIGEST_SIZE);
        bytes.push(prefix);
        bytes.extend_from_slice(&digest);
        ObjectId(bytes)
    }

    /// Parses bytes previously returned by [`ObjectId::as_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        ObjectId(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn kind(&self) -> ObjectKind {
        if self.0.len() <= DIGEST_SIZE {
            ObjectKind::Inline
        } else if self.0[0] == VALUE_HASH_PREFIX {
            ObjectKind::ValueHash
        } else {
            ObjectKind::IndexHash
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self.kind() {
            ObjectKind::Inline | ObjectKind::ValueHash => ObjectType::Value,
            ObjectKind::IndexHash => ObjectType::Index,
        }
    }

    /// For an inline id, the inlined bytes themselves; for a hashed id, `None`.
    pub fn inline_data(&self) -> Option<&[u8]> {
        matches!(self.kind(), ObjectKind::Inline).then_some(self.0.as_slice())
    }

    pub fn verify(&self, content: &[u8]) -> bool {
        *self == Self::compute(self.object_type(), content)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", hex::encode(&self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_value_is_inlined() {
        let id = ObjectId::compute(ObjectType::Value, b"hello");
        assert_eq!(id.kind(), ObjectKind::Inline);
        assert_eq!(id.inline_data(), Some(b"hello".as_slice()));
    }

    #[test]
    fn large_value_is_hashed() {
        let content = vec![b'a'; DIGEST_SIZE + 1];
        let id = ObjectId::compute(ObjectType::Value, &content);
        assert_eq!(id.kind(), ObjectKind::ValueHash);
        assert!(id.verify(&content));
    }

    #[test]
    fn index_hash_uses_index_prefix() {
        let content = vec![0u8; 100];
        let id = ObjectId::compute(ObjectType::Index, &content);
        assert_eq!(id.kind(), ObjectKind::IndexHash);
        assert_eq!(id.object_type(), ObjectType::Index);
    }

    #[test]
    fn round_trips_through_bytes() {
        let id = ObjectId::compute(ObjectType::Value, &vec![7u8; 64]);
        assert_eq!(ObjectId::from_bytes(id.as_bytes()), id);
    }
}
