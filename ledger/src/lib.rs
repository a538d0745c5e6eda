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

//! A per-user, offline-first, eventually-consistent key-value store. Data
//! lives in independent "pages", each a content-addressed object store plus
//! an immutable commit DAG, reconciled by a pluggable merge strategy and
//! mirrored to an optional cloud backend.
//!
//! Layering, innermost first:
//! - [`hash`] / [`rolling_hash`]: content addressing and chunking.
//! - [`object_store`]: immutable blobs and the `FileIndex` Merkle tree over
//!   large values.
//! - [`btree`]: the page's key/value Merkle search tree.
//! - [`commit`] / [`commit_dag`]: the immutable history graph.
//! - [`page_db`]: the typed `redb` tables everything above is persisted in.
//! - [`journal`] / [`operation_serializer`]: the mutation path, serialized
//!   onto a single FIFO gate.
//! - [`page_storage`]: the composition root tying the above into one page.
//! - [`merge`]: automatic convergence of divergent heads.
//! - [`sync`]: mirroring a page to a cloud backend.
//! - [`runtime`]: the client-facing surface (branch head, watchers,
//!   snapshots) built on top of a [`page_storage::PageStorage`].

mod proto {
    #![allow(clippy::all)]
    include!(concat!(env!("OUT_DIR"), "/ledger.storage.rs"));
}

pub mod btree;
pub mod commit;
pub mod commit_dag;
pub mod config;
pub mod error;
pub mod hash;
pub mod journal;
pub mod merge;
pub mod object_store;
pub mod operation_serializer;
pub mod page_db;
pub mod page_storage;
pub mod rolling_hash;
pub mod runtime;
pub mod sync;

/// Fixtures shared by this crate's unit tests and by `tests/`. Not gated
/// behind `cfg(test)` since integration tests build against the library as
/// an ordinary dependency and need these helpers too.
pub mod testutils;

pub use commit::{Commit, CommitId};
pub use config::LedgerConfig;
pub use error::{LedgerError, Result};
pub use hash::ObjectId;
pub use page_storage::{put_value, CommitWatcher, PageStorage, PageStorageError};
