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

//! Watches a page's heads and keeps collapsing them with the active
//! [`MergeStrategy`] until exactly one remains.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

use super::strategy::MergeStrategy;
use super::MergeError;
use crate::commit::Commit;
use crate::page_storage::{CommitWatcher, PageStorage};

pub struct MergeResolver {
    storage: Arc<PageStorage>,
    strategy: RwLock<MergeStrategy>,
    backoff_seed_millis: u64,
    backoff_max_millis: u64,
}

impl MergeResolver {
    pub fn new(
        storage: Arc<PageStorage>,
        strategy: MergeStrategy,
        backoff_seed_millis: u64,
        backoff_max_millis: u64,
    ) -> Arc<Self> {
        Arc::new(MergeResolver {
            storage,
            strategy: RwLock::new(strategy),
            backoff_seed_millis,
            backoff_max_millis,
        })
    }

    pub async fn set_strategy(&self, strategy: MergeStrategy) {
        *self.strategy.write().await = strategy;
    }

    #[instrument(skip(self))]
    pub async fn run_until_converged(&self) -> Result<(), MergeError> {
        let mut attempt = 0u32;
        loop {
            let mut heads = self
                .storage
                .list_heads_with_timestamps()
                .await
                .map_err(|err| MergeError::NotFound(err.to_string()))?;
            if heads.len() <= 1 {
                return Ok(());
            }
            heads.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let older_id = heads[0].0.clone();
            let newer_id = heads[1].0.clone();
            let older = self
                .storage
                .get_commit(&older_id)
                .await
                .map_err(|err| MergeError::NotFound(err.to_string()))?;
            let newer = self
                .storage
                .get_commit(&newer_id)
                .await
                .map_err(|err| MergeError::NotFound(err.to_string()))?;

            if older.is_merge() && newer.is_merge() && older.root_node_id == newer.root_node_id {
                self.backoff(attempt).await;
                attempt += 1;
                continue;
            }
            attempt = 0;

            if older.root_node_id == newer.root_node_id {
                self.commit_identity_merge(&older, &newer).await?;
                continue;
            }

            let ancestor_id = self
                .storage
                .find_common_ancestor(&older.id, &newer.id)
                .await
                .map_err(|err| MergeError::NotFound(err.to_string()))?;
            let ancestor = self
                .storage
                .get_commit(&ancestor_id)
                .await
                .map_err(|err| MergeError::NotFound(err.to_string()))?;

            let strategy = self.strategy.read().await.clone();
            strategy.merge(&self.storage, &older, &newer, &ancestor).await?;
        }
    }

    async fn commit_identity_merge(&self, left: &Commit, right: &Commit) -> Result<(), MergeError> {
        let journal = self
            .storage
            .start_merge_commit(left.id.clone(), right.id.clone())
            .await
            .map_err(|err| MergeError::NotFound(err.to_string()))?;
        self.storage
            .commit_journal(journal)
            .await
            .map_err(|err| MergeError::NotFound(err.to_string()))?;
        Ok(())
    }

    async fn backoff(&self, attempt: u32) {
        let cap = self.backoff_max_millis.max(self.backoff_seed_millis);
        let exp = self.backoff_seed_millis.saturating_mul(1u64 << attempt.min(16));
        let upper = exp.min(cap).max(1);
        let millis = rand::thread_rng().gen_range(0..=upper);
        warn!(attempt, millis, "merge candidates unchanged since last cycle, backing off");
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[async_trait]
impl CommitWatcher for MergeResolver {
    async fn on_new_commits(&self, _commits: &[Arc<Commit>]) {
        if let Err(err) = self.run_until_converged().await {
            warn!(error = %err, "merge resolver cycle failed");
        }
    }
}
