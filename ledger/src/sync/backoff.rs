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

//! Jittered exponential backoff, one instance per sync engine direction, as
//! named by the "every network-classified error triggers exponential
//! backoff (per-engine singleton); success resets the backoff" rule.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::Mutex;

pub struct Backoff {
    seed_millis: u64,
    max_millis: u64,
    attempt: AtomicU32,
    rng: Mutex<ChaCha8Rng>,
}

impl Backoff {
    pub fn new(seed_millis: u64, max_millis: u64) -> Self {
        Backoff {
            seed_millis,
            max_millis: max_millis.max(seed_millis),
            attempt: AtomicU32::new(0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed_from_clock())),
        }
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::Relaxed);
    }

    /// Sleeps for a jittered duration that grows exponentially with the
    /// number of consecutive failures observed so far, then records one
    /// more failure.
    pub async fn wait(&self) {
        let attempt = self.attempt.fetch_add(1, Ordering::Relaxed);
        let exp = self.seed_millis.saturating_mul(1u64 << attempt.min(16));
        let upper = exp.min(self.max_millis).max(1);
        let millis = self.rng.lock().await.gen_range(0..=upper);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

fn seed_from_clock() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
