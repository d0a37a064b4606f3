// Copyright 2024 The Chameleon Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::history::History;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObserverId(pub u64);

/// A connected, authenticated observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observer {
    pub id: ObserverId,
    pub user_id: u64,
    /// Privileged observers see every record, not just their own.
    pub privileged: bool,
}

/// Message delivered to observers whenever a record changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryUpdate {
    pub history: History,
}

/// Transport towards observers. Delivery is best effort and must never block.
pub trait NotificationSink: Send + Sync + fmt::Debug {
    /// Observers currently connected and authenticated.
    fn observers(&self) -> Vec<Observer>;

    fn publish(&self, record: &History, recipients: &[ObserverId]);
}

/// Fans record changes out to the executor and every privileged observer.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationPublisher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Observers interested in `record`.
    pub fn recipients(&self, record: &History) -> Vec<ObserverId> {
        let executor = record.executor.as_ref().map(|user| user.id);
        self.sink
            .observers()
            .into_iter()
            .filter(|observer| observer.privileged || Some(observer.user_id) == executor)
            .map(|observer| observer.id)
            .collect()
    }

    pub fn publish(&self, record: &History) {
        let recipients = self.recipients(record);
        tracing::trace!(
            history_id = record.id_string(),
            status = %record.status,
            recipients = recipients.len(),
            "publishing history update"
        );
        self.sink.publish(record, &recipients);
    }
}

#[derive(Debug)]
struct ObserverEntry {
    user_id: u64,
    privileged: bool,
    tx: mpsc::UnboundedSender<HistoryUpdate>,
}

/// In-process registry of connected observers, each fed through its own
/// unbounded channel. Observers whose receiver was dropped are pruned on
/// the next publish.
#[derive(Debug, Default)]
pub struct ObserverHub {
    next_id: AtomicU64,
    observers: Mutex<HashMap<ObserverId, ObserverEntry>>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(
        &self,
        user_id: u64,
        privileged: bool,
    ) -> (ObserverId, mpsc::UnboundedReceiver<HistoryUpdate>) {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().insert(
            id,
            ObserverEntry {
                user_id,
                privileged,
                tx,
            },
        );
        (id, rx)
    }

    pub fn disconnect(&self, id: ObserverId) {
        self.observers.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for ObserverHub {
    fn observers(&self) -> Vec<Observer> {
        self.observers
            .lock()
            .iter()
            .filter(|(_, entry)| !entry.tx.is_closed())
            .map(|(id, entry)| Observer {
                id: *id,
                user_id: entry.user_id,
                privileged: entry.privileged,
            })
            .collect()
    }

    fn publish(&self, record: &History, recipients: &[ObserverId]) {
        let mut observers = self.observers.lock();
        for id in recipients {
            let Some(entry) = observers.get(id) else {
                continue;
            };
            let update = HistoryUpdate {
                history: record.clone(),
            };
            if entry.tx.send(update).is_err() {
                observers.remove(id);
            }
        }
        observers.retain(|_, entry| !entry.tx.is_closed());
    }
}
