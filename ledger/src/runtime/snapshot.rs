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

//! A read-only view pinned to one commit. All reads route through the
//! `BTree`/`ObjectStore` pair at that commit's root, so a long-lived
//! snapshot sees a stable view even as the page keeps advancing.

use std::sync::Arc;

use crate::btree::Entry;
use crate::commit::CommitId;
use crate::page_storage::{PageStorage, PageStorageError};

pub struct Snapshot {
    storage: Arc<PageStorage>,
    commit_id: CommitId,
}

impl Snapshot {
    pub fn new(storage: Arc<PageStorage>, commit_id: CommitId) -> Self {
        Snapshot { storage, commit_id }
    }

    pub fn commit_id(&self) -> &CommitId {
        &self.commit_id
    }

    pub async fn get_entry(&self, key: &[u8]) -> Result<Option<Entry>, PageStorageError> {
        self.storage.get_entry_from_commit(&self.commit_id, key).await
    }

    pub async fn for_each_entry(
        &self,
        min_key: &[u8],
        on_next: &mut dyn FnMut(&Entry) -> bool,
    ) -> Result<(), PageStorageError> {
        self.storage.get_commit_contents(&self.commit_id, min_key, on_next).await
    }
}
