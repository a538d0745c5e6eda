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

//! Tunables the spec leaves as named constants in prose. Loaded from an
//! optional TOML file and overridable programmatically, in the spirit of
//! the teacher's layered user-config approach.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::rolling_hash::{MAX_CHILDREN_PER_INDEX, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub max_children_per_index: usize,
    /// Bounded concurrency for simultaneous piece uploads in the sync
    /// engine's upload task.
    pub upload_concurrency: usize,
    /// How long a page binding waits for the initial sync download before
    /// being served from possibly-stale local state.
    pub startup_grace_period_secs: u64,
    pub backoff_seed_millis: u64,
    pub backoff_max_millis: u64,
    /// Per-message caps used by the paginated watcher container.
    pub watcher_page_max_bytes: usize,
    pub watcher_page_max_handles: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            min_chunk_size: MIN_CHUNK_SIZE,
            max_chunk_size: MAX_CHUNK_SIZE,
            max_children_per_index: MAX_CHILDREN_PER_INDEX,
            upload_concurrency: 4,
            startup_grace_period_secs: 5,
            backoff_seed_millis: 100,
            backoff_max_millis: 60_000,
            watcher_page_max_bytes: 64 * 1024,
            watcher_page_max_handles: 256,
        }
    }
}

impl LedgerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub async fn load_or_default(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml_str(&text).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse config, using defaults");
                LedgerConfig::default()
            }),
            Err(_) => LedgerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let config = LedgerConfig::default();
        assert_eq!(config.min_chunk_size, MIN_CHUNK_SIZE);
        assert_eq!(config.max_chunk_size, MAX_CHUNK_SIZE);
    }

    #[test]
    fn partial_toml_overrides_only_named_fields() {
        let config = LedgerConfig::from_toml_str("upload_concurrency = 8\n").unwrap();
        assert_eq!(config.upload_concurrency, 8);
        assert_eq!(config.min_chunk_size, MIN_CHUNK_SIZE);
    }
}
