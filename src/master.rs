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

//! Master side of the agent.
//!
//! [`MasterClient`] pushes the local vector to one of the configured master
//! servers, failing over along the candidate ring. [`Aggregator`] runs on
//! the master itself and keeps the master vector from growing stale.

use log::{debug, info, trace, warn};
use rand::{rngs::OsRng, Rng};
use smol::net::TcpStream;

use crate::{
    agent::AgentContextPtr,
    config::dial_addr,
    net::{self, LineStream},
    proto,
    system::sleep,
    util::time::Timestamp,
    Error, Result,
};

/// Seconds between eviction passes over the master vector
pub const EVICTION_INTERVAL: u64 = 60;

/// Pushes the local vector to the current master candidate
pub struct MasterClient {
    ctx: AgentContextPtr,
    current: usize,
    last_success: usize,
    failovers: u64,
    conn: Option<LineStream<TcpStream>>,
}

impl MasterClient {
    /// Start at a random candidate.
    pub fn new(ctx: AgentContextPtr) -> Self {
        let n = ctx.topology.master_candidates.len();
        let start = if n > 0 { OsRng.gen_range(0..n) } else { 0 };
        Self::with_start_index(ctx, start)
    }

    /// Start at `start`, taken modulo the number of candidates.
    pub fn with_start_index(ctx: AgentContextPtr, start: usize) -> Self {
        let start = start.checked_rem(ctx.topology.master_candidates.len()).unwrap_or(0);
        if !ctx.config.master {
            if let Some(master) = ctx.topology.master_candidates.get(start) {
                info!(target: "ringwatch::master::MasterClient", "Using {} as master server", master);
            }
        }

        Self { ctx, current: start, last_success: start, failovers: 0, conn: None }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Number of times the client moved on to the next candidate
    pub fn failovers(&self) -> u64 {
        self.failovers
    }

    pub fn current_candidate(&self) -> Option<&str> {
        self.ctx.topology.master_candidates.get(self.current).map(String::as_str)
    }

    /// Push forever, sleeping one interval before every push.
    pub async fn run(mut self) -> Result<()> {
        loop {
            sleep(self.ctx.config.interval).await;
            if let Err(e) = self.push().await {
                warn!(target: "ringwatch::master::MasterClient::run()", "Vector push failed: {}", e);
            }
        }
    }

    /// Deliver the local vector once.
    ///
    /// A master installs its own vector directly. Otherwise candidates are
    /// tried in ring order, starting from the current one, until one
    /// accepts the vector or the ring wraps back to the last candidate
    /// that worked.
    pub async fn push(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();

        if ctx.config.master {
            let vector = ctx.store.snapshot().await;
            trace!(target: "ringwatch::master::push()", "Loopback of {} records", vector.len());
            ctx.master_vector.install(&ctx.config.hostname, vector).await;
            return Ok(())
        }

        let candidates = &ctx.topology.master_candidates;
        if candidates.is_empty() {
            return Err(Error::NoMasterServers)
        }

        let json = ctx.store.to_json().await?;

        loop {
            let candidate = &candidates[self.current];
            let reused = self.conn.is_some();

            if !reused {
                let addr = dial_addr(candidate, ctx.config.peer_port);
                match net::dial(&addr, ctx.config.net_timeout()).await {
                    Ok(stream) => self.conn = Some(LineStream::new(stream, candidate)),
                    Err(e) => {
                        warn!(
                            target: "ringwatch::master::push()",
                            "Master {} unreachable: {}", candidate, e,
                        );
                        if self.advance() {
                            return Err(Error::MasterUnreachable)
                        }
                        continue
                    }
                }
            }

            match self.send_vector(&json).await {
                Ok(()) => {
                    self.last_success = self.current;
                    debug!(target: "ringwatch::master::push()", "Vector pushed to {}", candidate);
                    return Ok(())
                }

                // A kept-alive connection may have died since the last push,
                // so redial the same candidate before moving on.
                Err(e) if reused => {
                    debug!(
                        target: "ringwatch::master::push()",
                        "Stale connection to {}: {}", candidate, e,
                    );
                    self.conn = None;
                }

                Err(e) => {
                    warn!(target: "ringwatch::master::push()", "Push to {} failed: {}", candidate, e);
                    self.conn = None;
                    if self.advance() {
                        return Err(Error::MasterUnreachable)
                    }
                }
            }
        }
    }

    /// Move to the next candidate. Returns `true` once the ring wrapped
    /// back to the last good one.
    fn advance(&mut self) -> bool {
        let candidates = &self.ctx.topology.master_candidates;
        self.current = (self.current + 1) % candidates.len();
        self.failovers += 1;

        if self.current == self.last_success {
            warn!(target: "ringwatch::master::advance()", "All master servers are unreachable");
            return true
        }

        info!(
            target: "ringwatch::master::advance()",
            "Switching master server to {}", candidates[self.current],
        );
        false
    }

    async fn send_vector(&mut self, json: &str) -> Result<()> {
        let cfg = &self.ctx.config;
        let timeout = cfg.net_timeout();
        let Some(conn) = self.conn.as_mut() else { return Err(Error::ConnectionClosed) };

        conn.write_line(&proto::auth(&cfg.security_code)).await?;
        proto::expect_auth(&conn.read_reply(timeout).await?)?;

        conn.write_line(&proto::set_vector(&cfg.hostname, json)).await?;
        let reply = conn.read_reply(timeout).await?;
        if reply.trim() != proto::ACK_SET {
            return Err(Error::UnexpectedReply(reply))
        }

        Ok(())
    }
}

/// Master vector upkeep, active only when this host is the master
pub struct Aggregator {
    ctx: AgentContextPtr,
    eviction_interval: u64,
}

impl Aggregator {
    pub fn new(ctx: AgentContextPtr) -> Self {
        Self::with_eviction_interval(ctx, EVICTION_INTERVAL)
    }

    pub fn with_eviction_interval(ctx: AgentContextPtr, eviction_interval: u64) -> Self {
        Self { ctx, eviction_interval }
    }

    pub async fn run(self) -> Result<()> {
        if !self.ctx.config.master {
            debug!(target: "ringwatch::master::Aggregator::run()", "Not a master, nothing to do");
            return Ok(())
        }

        info!(target: "ringwatch::master::Aggregator::run()", "I'm master server");
        self.ctx.master_vector.clear().await;

        futures::try_join!(self.persist_loop(), self.evict_loop())?;
        Ok(())
    }

    async fn persist_loop(&self) -> Result<()> {
        let ctx = &self.ctx;
        loop {
            sleep(ctx.config.interval).await;
            let snapshot = ctx.master_vector.snapshot().await;

            match ctx.persistence.select_query(&ctx.config.hostname).await {
                Ok(rows) => trace!(target: "ringwatch::master::persist", "{} rows stored", rows),
                Err(e) => warn!(target: "ringwatch::master::persist", "Select failed: {}", e),
            }

            if let Err(e) = ctx.persistence.insert_query(&ctx.config.hostname, &snapshot).await {
                warn!(target: "ringwatch::master::persist", "Insert failed: {}", e);
            }
        }
    }

    async fn evict_loop(&self) -> Result<()> {
        loop {
            sleep(self.eviction_interval).await;
            let report = self.ctx.master_vector.evict(Timestamp::current_time()).await;
            if report.records > 0 {
                info!(
                    target: "ringwatch::master::evict",
                    "Evicted {} stale records and {} hosts", report.records, report.hosts,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agent::AgentContext, config::AgentConfig, topology::Topology, vector::PeerStatus,
    };

    fn master_context() -> AgentContextPtr {
        let config = AgentConfig { hostname: "node-m".into(), master: true, ..Default::default() };
        AgentContext::standalone(config)
    }

    #[test]
    fn master_loops_back_local_vector() {
        smol::block_on(async {
            let ctx = master_context();
            let mut client = MasterClient::new(ctx.clone());
            client.push().await.unwrap();
            assert_eq!(ctx.master_vector.get("node-m").await.unwrap(), vec![]);
        });
    }

    #[test]
    fn no_candidates_is_an_error() {
        smol::block_on(async {
            let config = AgentConfig { hostname: "node-a".into(), ..Default::default() };
            let mut client = MasterClient::new(AgentContext::standalone(config));
            assert!(matches!(client.push().await, Err(Error::NoMasterServers)));
            assert!(client.current_candidate().is_none());
        });
    }

    #[test]
    fn start_index_wraps_to_candidates() {
        smol::block_on(async {
            let config = AgentConfig {
                hostname: "node-a".into(),
                master_servers: vec!["m0".into(), "m1".into(), "m2".into()],
                ..Default::default()
            };
            let topology = Topology::resolve(&config).unwrap();
            let client = MasterClient::with_start_index(AgentContext::with_topology(config, topology), 7);
            assert_eq!(client.current_index(), 1);
            assert_eq!(client.current_candidate(), Some("m1"));

            let config = AgentConfig { hostname: "node-a".into(), ..Default::default() };
            let mut client = MasterClient::with_start_index(AgentContext::standalone(config), 5);
            assert_eq!(client.current_index(), 0);
            assert!(matches!(client.push().await, Err(Error::NoMasterServers)));
        });
    }

    #[test]
    fn one_lap_then_give_up() {
        smol::block_on(async {
            let mut dead = vec![];
            for _ in 0..3 {
                let l = smol::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                dead.push(l.local_addr().unwrap().to_string());
            }

            let config = AgentConfig {
                hostname: "node-a".into(),
                master_servers: dead.clone(),
                net_timeout: 1,
                ..Default::default()
            };
            let topology = Topology::resolve(&config).unwrap();
            let ctx = AgentContext::with_topology(config, topology);

            let mut client = MasterClient::with_start_index(ctx, 1);
            assert!(matches!(client.push().await, Err(Error::MasterUnreachable)));
            assert_eq!(client.failovers(), 3);
            assert_eq!(client.current_index(), 1);
        });
    }

    #[test]
    fn non_master_aggregator_returns_at_once() {
        smol::block_on(async {
            let config = AgentConfig { hostname: "node-a".into(), ..Default::default() };
            let ctx = AgentContext::standalone(config);
            ctx.master_vector.install("x", vec![]).await;
            Aggregator::new(ctx.clone()).run().await.unwrap();
            assert_eq!(ctx.master_vector.len().await, 1);
        });
    }

    #[test]
    fn master_aggregator_clears_and_evicts() {
        let ex = smol::Executor::new();
        let ctx = master_context();

        smol::block_on(ex.run(async {
            let stale = PeerStatus {
                host: "x".into(),
                hostname: "x".into(),
                status: true,
                interval: 1,
                timestamp: Timestamp(0),
                sectors: vec![],
            };
            ctx.master_vector.install("before-start", vec![]).await;

            let task = ex.spawn(Aggregator::with_eviction_interval(ctx.clone(), 1).run());
            crate::system::msleep(100).await;
            assert!(ctx.master_vector.is_empty().await);

            ctx.master_vector.install("old", vec![stale]).await;
            crate::system::msleep(1500).await;
            assert!(ctx.master_vector.get("old").await.is_none());

            drop(task);
        }));
    }
}
