// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Rate-limited work queue for domain events.
//!
//! Single consumer, many producers. Re-adding an event whose key is already
//! queued replaces the queued payload; re-adding a key that is currently
//! being processed parks the event until `done` releases it, so the consumer
//! never handles the same key concurrently with itself.

use crate::constants::backoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::events::{EventKey, MirrorEvent};

#[derive(Default)]
struct QueueState {
    order: VecDeque<EventKey>,
    pending: HashMap<EventKey, MirrorEvent>,
    processing: HashSet<EventKey>,
    parked: HashMap<EventKey, MirrorEvent>,
    failures: HashMap<EventKey, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Cheaply cloneable handle; all clones share the same queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue an event, coalescing on its key. A no-op once shut down.
    pub fn add(&self, event: MirrorEvent) {
        let key = event.key();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            if state.processing.contains(&key) {
                state.parked.insert(key, event);
                return;
            }
            if state.pending.insert(key.clone(), event).is_none() {
                state.order.push_back(key);
            }
        }
        self.inner.notify.notify_one();
    }

    /// Enqueue after the per-key exponential backoff delay, growing the
    /// failure count for that key.
    pub fn add_rate_limited(&self, event: MirrorEvent) {
        let delay = {
            let mut state = self.inner.state.lock().unwrap();
            let failures = state.failures.entry(event.key()).or_insert(0);
            let delay = backoff_delay(*failures);
            *failures += 1;
            delay
        };

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(event);
        });
    }

    /// Next event, or `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<MirrorEvent> {
        loop {
            {
                let mut state = self.inner.state.lock().unwrap();
                while let Some(key) = state.order.pop_front() {
                    if let Some(event) = state.pending.remove(&key) {
                        state.processing.insert(key);
                        return Some(event);
                    }
                }
                if state.shutting_down {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Release an event from the processing set. An event re-added while it
    /// was being processed becomes eligible again here.
    pub fn done(&self, event: &MirrorEvent) {
        let key = event.key();
        let requeued = {
            let mut state = self.inner.state.lock().unwrap();
            state.processing.remove(&key);
            match state.parked.remove(&key) {
                Some(parked) => {
                    if state.pending.insert(key.clone(), parked).is_none() {
                        state.order.push_back(key);
                    }
                    true
                }
                None => false,
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Clear failure state for an event key.
    pub fn forget(&self, event: &MirrorEvent) {
        self.inner
            .state
            .lock()
            .unwrap()
            .failures
            .remove(&event.key());
    }

    /// How many times the event has been requeued with `add_rate_limited`
    /// since it was last forgotten.
    pub fn num_requeues(&self, event: &MirrorEvent) -> u32 {
        self.inner
            .state
            .lock()
            .unwrap()
            .failures
            .get(&event.key())
            .copied()
            .unwrap_or(0)
    }

    /// Stop accepting new events. The consumer drains what is already queued
    /// and then observes `None`.
    pub fn shut_down(&self) {
        self.inner.state.lock().unwrap().shutting_down = true;
        self.inner.notify.notify_one();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().unwrap().shutting_down
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff_delay(failures: u32) -> Duration {
    let factor = 2u32.saturating_pow(failures.min(32));
    backoff::BASE_DELAY
        .saturating_mul(factor)
        .min(backoff::MAX_DELAY)
}
