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

//! FIFO gate for a page's client-facing mutations: operations run in
//! submission order, and each completes before the next starts, even
//! though each operation is itself asynchronous.
//!
//! A single background task drains a channel one operation at a time,
//! which gives the ordering guarantee for free from the channel's own FIFO
//! delivery, in place of an explicit queue + lock.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type BoxedOp = Box<dyn FnOnce() -> BoxFuture + Send>;

pub struct OperationSerializer {
    sender: tokio::sync::mpsc::UnboundedSender<BoxedOp>,
}

impl OperationSerializer {
    pub fn new() -> Self {
        let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel::<BoxedOp>();
        tokio::spawn(async move {
            while let Some(op) = receiver.recv().await {
                op().await;
            }
        });
        OperationSerializer { sender }
    }

    /// Submits `f` to run after every previously submitted operation has
    /// completed, and awaits its result.
    pub async fn submit<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let boxed: BoxedOp = Box::new(move || {
            Box::pin(async move {
                let result = f().await;
                let _ = result_tx.send(result);
            })
        });
        self.sender
            .send(boxed)
            .expect("operation serializer's background task should not exit early");
        result_rx
            .await
            .expect("operation serializer's background task dropped the result sender")
    }
}

impl Default for OperationSerializer {
    fn default() -> Self {
        Self::new()
    }
}
