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

//! Crate-wide error taxonomy.
//!
//! Every subsystem defines its own narrow error enum and converts it into
//! [`LedgerError`] via `#[from]`, the same layering the teacher uses for
//! `BackendError`/`OpStoreError`.

use std::io;

use thiserror::Error;

use crate::hash::ObjectId;

/// Top-level error type returned by every public API in this crate.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed stored data: {0}")]
    FormatError(String),

    #[error("object content does not match claimed id {expected}")]
    ObjectIdMismatch { expected: ObjectId },

    #[error("storage I/O error")]
    IoError(#[source] io::Error),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("reference not found: {0}")]
    ReferenceNotFound(ObjectId),

    #[error("no sync delegate attached to this page")]
    NotConnected,

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl From<io::Error> for LedgerError {
    fn from(value: io::Error) -> Self {
        LedgerError::IoError(value)
    }
}

impl From<crate::object_store::ObjectStoreError> for LedgerError {
    fn from(value: crate::object_store::ObjectStoreError) -> Self {
        use crate::object_store::ObjectStoreError as E;
        match value {
            E::NotFound(id) => LedgerError::NotFound(format!("object {id}")),
            E::FormatError(msg) => LedgerError::FormatError(msg),
            E::ObjectIdMismatch { expected } => LedgerError::ObjectIdMismatch { expected },
            E::Io(err) => LedgerError::IoError(err),
            E::PageDb(err) => err.into(),
        }
    }
}

impl From<crate::page_db::PageDbError> for LedgerError {
    fn from(value: crate::page_db::PageDbError) -> Self {
        use crate::page_db::PageDbError as E;
        match value {
            E::NotFound(msg) => LedgerError::NotFound(msg),
            E::FormatError(msg) => LedgerError::FormatError(msg),
            E::Database(err) => LedgerError::IoError(io::Error::other(err.to_string())),
            E::Transaction(err) => LedgerError::IoError(io::Error::other(err.to_string())),
            E::Table(err) => LedgerError::IoError(io::Error::other(err.to_string())),
            E::Storage(err) => LedgerError::IoError(io::Error::other(err.to_string())),
            E::Commit(err) => LedgerError::IoError(io::Error::other(err.to_string())),
        }
    }
}

impl From<crate::btree::BTreeError> for LedgerError {
    fn from(value: crate::btree::BTreeError) -> Self {
        use crate::btree::BTreeError as E;
        match value {
            E::NotFound(id) => LedgerError::NotFound(format!("tree node {id}")),
            E::FormatError(msg) => LedgerError::FormatError(msg),
            E::ObjectStore(err) => err.into(),
        }
    }
}

impl From<crate::journal::JournalError> for LedgerError {
    fn from(value: crate::journal::JournalError) -> Self {
        use crate::journal::JournalError as E;
        match value {
            E::Poisoned => LedgerError::IllegalState("journal poisoned by a prior failure".into()),
            E::BTree(err) => err.into(),
            E::PageDb(err) => err.into(),
        }
    }
}

impl From<crate::merge::MergeError> for LedgerError {
    fn from(value: crate::merge::MergeError) -> Self {
        use crate::merge::MergeError as E;
        match value {
            E::Journal(err) => err.into(),
            E::BTree(err) => err.into(),
            E::NotFound(msg) => LedgerError::NotFound(msg),
        }
    }
}

impl From<crate::page_storage::PageStorageError> for LedgerError {
    fn from(value: crate::page_storage::PageStorageError) -> Self {
        use crate::page_storage::PageStorageError as E;
        match value {
            E::PageDb(err) => err.into(),
            E::ObjectStore(err) => err.into(),
            E::BTree(err) => err.into(),
            E::Journal(err) => err.into(),
            E::CommitDag(err) => LedgerError::NotFound(err.to_string()),
            E::WatcherAlreadyRegistered => {
                LedgerError::IllegalState("commit watcher already registered".into())
            }
            E::OrphanCommits => {
                LedgerError::FormatError("commit batch left unresolved parents".into())
            }
        }
    }
}

impl From<crate::sync::SyncError> for LedgerError {
    fn from(value: crate::sync::SyncError) -> Self {
        use crate::sync::SyncError as E;
        match value {
            E::Network(msg) => LedgerError::NetworkError(msg),
            E::Auth(msg) => LedgerError::AuthError(msg),
            E::ObjectIdMismatch { expected } => LedgerError::ObjectIdMismatch { expected },
            E::MalformedNotification(msg) => LedgerError::FormatError(msg),
            E::Storage(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
