/* This file is part of ringwatch
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use log::debug;

use super::CondVar;

pub type AckGroupPtr = Arc<AckGroup>;

/// Registry of workers that must acknowledge they have stopped.
///
/// The lifecycle coordinator registers one entry per spawned worker and
/// parks in [`AckGroup::wait_all`] until every entry is marked done.
pub struct AckGroup {
    workers: Mutex<AckState>,
    cv: CondVar,
}

struct AckState {
    next_id: u64,
    entries: BTreeMap<u64, (String, bool)>,
}

impl AckGroup {
    pub fn new() -> AckGroupPtr {
        Arc::new(Self {
            workers: Mutex::new(AckState { next_id: 0, entries: BTreeMap::new() }),
            cv: CondVar::new(),
        })
    }

    /// Register a worker. The returned handle marks it stopped when
    /// [`WorkerAck::done`] is called or when it is dropped.
    pub fn register(self: &Arc<Self>, name: &str) -> WorkerAck {
        let mut state = self.workers.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.insert(id, (name.to_string(), false));
        WorkerAck { group: self.clone(), id }
    }

    fn mark(&self, id: u64) {
        if let Some(entry) = self.workers.lock().unwrap().entries.get_mut(&id) {
            debug!(target: "ringwatch::system::ack", "Worker {} acknowledged stop", entry.0);
            entry.1 = true;
        }
        self.cv.notify();
    }

    /// Names of the workers that have not acknowledged yet.
    pub fn pending(&self) -> Vec<String> {
        let state = self.workers.lock().unwrap();
        state.entries.values().filter(|(_, done)| !done).map(|(name, _)| name.clone()).collect()
    }

    /// True once every registered worker has acknowledged.
    pub fn is_quiescent(&self) -> bool {
        self.workers.lock().unwrap().entries.values().all(|(_, done)| *done)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Park until all registered workers have acknowledged.
    pub async fn wait_all(&self) {
        loop {
            if self.is_quiescent() {
                return
            }

            self.cv.wait().await;
            self.cv.reset();
        }
    }
}

/// Stop acknowledgment handle owned by a single worker.
pub struct WorkerAck {
    group: AckGroupPtr,
    id: u64,
}

impl WorkerAck {
    /// Acknowledge that the worker has stopped.
    pub fn done(self) {
        // Drop does the marking
    }
}

impl Drop for WorkerAck {
    fn drop(&mut self) {
        self.group.mark(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_all_returns_after_every_ack() {
        let ex = smol::Executor::new();
        let group = AckGroup::new();

        let acks: Vec<WorkerAck> =
            (0..4).map(|i| group.register(&format!("worker-{}", i))).collect();
        assert_eq!(group.len(), 4);
        assert_eq!(group.pending().len(), 4);

        for (i, ack) in acks.into_iter().enumerate() {
            ex.spawn(async move {
                crate::system::msleep(5 * i as u64).await;
                ack.done();
            })
            .detach();
        }

        smol::block_on(ex.run(group.wait_all()));
        assert!(group.is_quiescent());
        assert!(group.pending().is_empty());
    }

    #[test]
    fn empty_group_is_quiescent() {
        let group = AckGroup::new();
        assert!(group.is_empty());
        smol::block_on(group.wait_all());
    }

    #[test]
    fn dropped_ack_counts_as_done() {
        let group = AckGroup::new();
        let ack = group.register("dropped");
        assert!(!group.is_quiescent());
        drop(ack);
        assert!(group.is_quiescent());
    }
}
