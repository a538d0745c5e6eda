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

//! Client-facing runtime sitting on top of [`crate::page_storage`]: a single
//! monotone branch head, paginated per-watcher change delivery, and
//! commit-pinned read snapshots.

mod branch_tracker;
mod snapshot;
mod watcher;

pub use branch_tracker::BranchTracker;
pub use snapshot::Snapshot;
pub use watcher::{PageWatcherContainer, WatcherMessage, WatcherSink};
