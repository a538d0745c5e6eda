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

//! On-disk representation of a single stored object: either a raw value
//! chunk, or a [`FileIndex`] describing the children of an index object.

use smallvec::SmallVec;

use super::ObjectStoreError;
use crate::hash::ObjectId;
use crate::proto;

/// One child reference inside a [`FileIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIndexChild {
    pub id: ObjectId,
    pub size: u64,
}

/// Serialized contents of an index-hash object: an ordered list of children
/// plus the total size of the subtree they represent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileIndex {
    pub children: SmallVec<[FileIndexChild; 8]>,
    pub total_size: u64,
}

impl FileIndex {
    pub fn encode(&self) -> Vec<u8> {
        let proto = proto::FileIndex {
            children: self
                .children
                .iter()
                .map(|c| proto::FileIndexChild {
                    id: c.id.as_bytes().to_vec(),
                    size: c.size,
                })
                .collect(),
            total_size: self.total_size,
        };
        prost::Message::encode_to_vec(&proto)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ObjectStoreError> {
        let proto: proto::FileIndex = prost::Message::decode(bytes)
            .map_err(|err| ObjectStoreError::FormatError(format!("bad file index: {err}")))?;
        if proto.children.is_empty() {
            return Err(ObjectStoreError::FormatError(
                "file index has no children".into(),
            ));
        }
        Ok(FileIndex {
            children: proto
                .children
                .into_iter()
                .map(|c| FileIndexChild {
                    id: ObjectId::from_bytes(&c.id),
                    size: c.size,
                })
                .collect(),
            total_size: proto.total_size,
        })
    }
}

/// A fully materialized object: either a leaf value's bytes, or (after
/// recursive assembly) the concatenated bytes of an index subtree.
#[derive(Debug, Clone)]
pub struct Object {
    pub id: ObjectId,
    pub data: Vec<u8>,
}
