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

//! Shared vector state.
//!
//! The local vector holds one [`PeerStatus`] per neighbour. Each record has
//! its own lock so probers writing different peers never contend; the outer
//! lock is only taken for writing when the whole vector is replaced on
//! start or reload.
//!
//! The master vector maps every reporting host to the vector it last
//! pushed. It has its own lock, independent from the local vector.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use log::debug;
use serde::{Deserialize, Serialize};
use smol::lock::{Mutex, RwLock};

use crate::{topology::Topology, util::time::Timestamp, Result};

/// Hostname recorded until the peer has told us its own
pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// A record is stale once it is older than this many intervals
pub const STALE_FACTOR: i64 = 5;

/// Reachability record of one peer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerStatus {
    /// Address as configured in the sector
    pub host: String,
    /// Name the peer reports for itself
    pub hostname: String,
    /// Reachable on the last cycle
    pub status: bool,
    /// Refresh interval in seconds
    pub interval: u64,
    /// Last update
    pub timestamp: Timestamp,
    pub sectors: Vec<String>,
}

impl PeerStatus {
    pub fn new(host: &str, interval: u64, sectors: Vec<String>) -> Self {
        Self {
            host: host.to_string(),
            hostname: UNKNOWN_HOSTNAME.to_string(),
            status: false,
            interval,
            timestamp: Timestamp::current_time(),
            sectors,
        }
    }

    /// True if `timestamp + interval * 5` lies strictly before `now`.
    pub fn is_stale(&self, now: Timestamp) -> bool {
        let limit = (self.interval.min(i64::MAX as u64) as i64).saturating_mul(STALE_FACTOR);
        self.timestamp.0.saturating_add(limit) < now.0
    }
}

/// Handle to one record of the local vector
pub type PeerSlot = Arc<Mutex<PeerStatus>>;

pub type VectorStorePtr = Arc<VectorStore>;

/// The local vector
pub struct VectorStore {
    peers: RwLock<Vec<PeerSlot>>,
}

impl VectorStore {
    pub fn new() -> VectorStorePtr {
        Arc::new(Self { peers: RwLock::new(vec![]) })
    }

    /// Replace the vector with fresh records for every neighbour of
    /// `topology`. Returns the slots in neighbour order.
    pub async fn reset(&self, topology: &Topology, interval: u64) -> Vec<PeerSlot> {
        let slots: Vec<PeerSlot> = topology
            .neighbours
            .iter()
            .map(|n| Arc::new(Mutex::new(PeerStatus::new(&n.address, interval, n.sectors.clone()))))
            .collect();

        *self.peers.write().await = slots.clone();
        debug!(target: "ringwatch::vector::reset()", "Vector reset to {} peers", slots.len());
        slots
    }

    pub async fn slot(&self, host: &str) -> Option<PeerSlot> {
        for slot in self.peers.read().await.iter() {
            if slot.lock().await.host == host {
                return Some(slot.clone())
            }
        }
        None
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of every record, each one read under its own lock.
    pub async fn snapshot(&self) -> Vec<PeerStatus> {
        let slots = self.peers.read().await.clone();
        let mut ret = Vec::with_capacity(slots.len());
        for slot in slots {
            ret.push(slot.lock().await.clone());
        }
        ret
    }

    pub async fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot().await)?)
    }
}

/// Counters of one eviction pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub records: usize,
    pub hosts: usize,
}

pub type MasterVectorPtr = Arc<MasterVector>;

/// Aggregated vectors of every reporting host
pub struct MasterVector {
    entries: RwLock<HashMap<String, Vec<PeerStatus>>>,
}

impl MasterVector {
    pub fn new() -> MasterVectorPtr {
        Arc::new(Self { entries: RwLock::new(HashMap::new()) })
    }

    /// Overwrite the entry of `hostname` wholesale.
    pub async fn install(&self, hostname: &str, vector: Vec<PeerStatus>) {
        self.entries.write().await.insert(hostname.to_string(), vector);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn get(&self, hostname: &str) -> Option<Vec<PeerStatus>> {
        self.entries.read().await.get(hostname).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ordered copy of the whole master vector.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<PeerStatus>> {
        self.entries.read().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub async fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot().await)?)
    }

    /// Drop stale records, and the whole host key once every record of
    /// it was stale. Each host is pruned under its own write lock, so a
    /// key removed concurrently is simply skipped.
    pub async fn evict(&self, now: Timestamp) -> EvictionReport {
        let hosts: Vec<String> = self.entries.read().await.keys().cloned().collect();
        let mut report = EvictionReport::default();

        for host in hosts {
            let mut entries = self.entries.write().await;
            let Some(records) = entries.get_mut(&host) else { continue };

            let before = records.len();
            records.retain(|r| !r.is_stale(now));
            let removed = before - records.len();
            report.records += removed;

            if removed == before {
                entries.remove(&host);
                report.hosts += 1;
                debug!(target: "ringwatch::vector::evict()", "Evicted host {}", host);
            } else if removed > 0 {
                debug!(
                    target: "ringwatch::vector::evict()",
                    "Evicted {} stale records of {}", removed, host,
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Neighbour;

    fn record(host: &str, interval: u64, timestamp: i64) -> PeerStatus {
        PeerStatus {
            host: host.into(),
            hostname: host.into(),
            status: true,
            interval,
            timestamp: Timestamp(timestamp),
            sectors: vec!["s".into()],
        }
    }

    #[test]
    fn staleness_boundary_is_strict() {
        let r = record("a", 10, 1000);
        assert!(!r.is_stale(Timestamp(1050)));
        assert!(r.is_stale(Timestamp(1051)));
    }

    #[test]
    fn eviction_prunes_records_then_hosts() {
        smol::block_on(async {
            let mv = MasterVector::new();
            mv.install("mixed", vec![record("a", 10, 1000), record("b", 10, 1960)]).await;
            mv.install("stale", vec![record("c", 10, 100), record("d", 1, 500)]).await;
            mv.install("fresh", vec![record("e", 10, 1990)]).await;

            let report = mv.evict(Timestamp(2000)).await;
            assert_eq!(report, EvictionReport { records: 3, hosts: 1 });

            assert_eq!(mv.get("mixed").await.unwrap(), vec![record("b", 10, 1960)]);
            assert!(mv.get("stale").await.is_none());
            assert_eq!(mv.get("fresh").await.unwrap().len(), 1);
        });
    }

    #[test]
    fn eviction_without_stale_records_is_noop() {
        smol::block_on(async {
            let mv = MasterVector::new();
            let vector = vec![record("a", 10, 1990), record("b", 60, 1800)];
            mv.install("h", vector.clone()).await;

            let before = mv.snapshot().await;
            assert_eq!(mv.evict(Timestamp(2000)).await, EvictionReport::default());
            assert_eq!(mv.snapshot().await, before);
        });
    }

    #[test]
    fn vector_json_round_trip() {
        let vector = vec![record("a", 10, 1700000000), PeerStatus::new("b", 5, vec![])];
        let json = serde_json::to_string(&vector).unwrap();
        assert!(json.contains("\"hostname\":\"a\""));
        assert!(json.contains("\"timestamp\":1700000000"));

        let back: Vec<PeerStatus> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vector);
        assert_eq!(back[1].hostname, UNKNOWN_HOSTNAME);
    }

    #[test]
    fn reset_replaces_local_vector() {
        smol::block_on(async {
            let store = VectorStore::new();
            let topo = Topology {
                hostname: "me".into(),
                memberships: vec!["s".into()],
                neighbours: vec![
                    Neighbour { address: "x".into(), sectors: vec!["s".into()] },
                    Neighbour { address: "y".into(), sectors: vec!["s".into()] },
                ],
                master_candidates: vec![],
            };

            let slots = store.reset(&topo, 7).await;
            assert_eq!(slots.len(), 2);
            slots[1].lock().await.status = true;

            let snap = store.snapshot().await;
            assert_eq!(snap.len(), 2);
            assert!(!snap[0].status && snap[1].status);
            assert_eq!(snap[0].interval, 7);
            assert!(store.slot("y").await.is_some());

            store.reset(&Topology::default(), 7).await;
            assert!(store.is_empty().await);
        });
    }
}
