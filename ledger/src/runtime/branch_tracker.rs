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

//! Tracks a single "branch head" commit per page so watchers observe a
//! monotone succession rather than the raw, possibly-multi-headed, commit
//! DAG. Buffers advances while an explicit transaction is in progress.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::commit::{Commit, CommitId};

pub struct BranchTracker {
    head: RwLock<CommitId>,
    in_transaction: AtomicBool,
}

impl BranchTracker {
    pub fn new(initial: CommitId) -> Self {
        BranchTracker {
            head: RwLock::new(initial),
            in_transaction: AtomicBool::new(false),
        }
    }

    pub async fn current(&self) -> CommitId {
        self.head.read().await.clone()
    }

    /// Advances the head if `commit`'s parent is the current head. Commits
    /// on other branches are left for the merge subsystem to reconcile.
    /// No-op while a transaction is in progress; the branch tracker resumes
    /// evaluating new commits only after `end_transaction`.
    pub async fn on_new_commit(&self, commit: &Commit) {
        if self.in_transaction.load(Ordering::Acquire) {
            return;
        }
        let mut head = self.head.write().await;
        if commit.parent_ids.iter().any(|p| p == &*head) {
            *head = commit.id.clone();
        }
    }

    pub fn begin_transaction(&self) {
        self.in_transaction.store(true, Ordering::Release);
    }

    /// Ends the buffered transaction. `result` is `Some(new_head)` on a
    /// successful commit (the branch head is set directly, bypassing the
    /// parent check, since the transaction's own journal already applied on
    /// top of the prior head) or `None` on rollback (the head is left as it
    /// was before the transaction).
    pub async fn end_transaction(&self, result: Option<CommitId>) {
        if let Some(new_head) = result {
            *self.head.write().await = new_head;
        }
        self.in_transaction.store(false, Ordering::Release);
    }
}
