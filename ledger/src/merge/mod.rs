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

//! Reconciliation of concurrent heads: common-ancestor search (delegated to
//! [`crate::commit_dag`]) plus three pluggable merge strategies, driven by a
//! watcher that keeps retrying until a page has exactly one head.

mod resolver;
mod strategy;

use thiserror::Error;

pub use resolver::MergeResolver;
pub use strategy::{ConflictResolver, MergeStrategy};

use crate::btree::BTreeError;
use crate::journal::JournalError;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    BTree(#[from] BTreeError),
    #[error("{0}")]
    NotFound(String),
}
