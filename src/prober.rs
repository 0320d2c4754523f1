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

//! Neighbour reachability client.
//!
//! One [`Prober`] runs per neighbour. A cycle walks
//! `Connecting -> Authenticating -> AwaitingIdentity -> AwaitingHostAck`
//! and ends in `Idle` on success or `Disconnected` on any error. The
//! connection stays open between cycles.

use log::{debug, info, warn};
use smol::net::TcpStream;

use crate::{
    agent::AgentContextPtr,
    config::dial_addr,
    net::{self, LineStream},
    proto,
    system::sleep,
    util::time::Timestamp,
    vector::PeerSlot,
    Error, Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeState {
    Disconnected,
    Connecting,
    Authenticating,
    AwaitingIdentity,
    AwaitingHostAck,
    Idle,
}

pub struct Prober {
    ctx: AgentContextPtr,
    slot: PeerSlot,
    address: String,
    conn: Option<LineStream<TcpStream>>,
    state: ProbeState,
}

impl Prober {
    pub fn new(ctx: AgentContextPtr, address: &str, slot: PeerSlot) -> Self {
        Self { ctx, slot, address: address.to_string(), conn: None, state: ProbeState::Disconnected }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Probe forever, sleeping one interval before every cycle.
    pub async fn run(mut self) -> Result<()> {
        debug!(target: "ringwatch::prober::run()", "Starting prober for {}", self.address);
        loop {
            sleep(self.ctx.config.interval).await;
            self.cycle().await;
        }
    }

    /// Run one check and record its result.
    pub async fn cycle(&mut self) {
        match self.check().await {
            Ok(remote) => {
                self.state = ProbeState::Idle;
                self.record(true, Some(remote)).await;
            }
            Err(e) => {
                warn!(
                    target: "ringwatch::prober::cycle()",
                    "Probe of {} failed in {:?}: {}", self.address, self.state, e,
                );
                self.conn = None;
                self.state = ProbeState::Disconnected;
                self.record(false, None).await;
            }
        }
    }

    async fn record(&self, reachable: bool, remote: Option<String>) {
        let now = Timestamp::current_time();
        let mut peer = self.slot.lock().await;
        if peer.status != reachable {
            info!(
                target: "ringwatch::prober::record()",
                "{} is {} since {}",
                self.address, if reachable { "reachable" } else { "unreachable" }, now,
            );
        }

        peer.status = reachable;
        peer.interval = self.ctx.config.interval;
        peer.timestamp = now;
        if let Some(remote) = remote {
            peer.hostname = remote;
        }
    }

    async fn exchange(&mut self, line: &str) -> Result<String> {
        let timeout = self.ctx.config.net_timeout();
        let Some(conn) = self.conn.as_mut() else { return Err(Error::ConnectionClosed) };
        conn.write_line(line).await?;
        conn.read_reply(timeout).await
    }

    /// Returns the hostname the peer reported for itself. A kept-alive
    /// connection that fails is redialed once within the same cycle.
    async fn check(&mut self) -> Result<String> {
        if self.conn.is_none() {
            return self.handshake().await
        }

        match self.handshake().await {
            Ok(remote) => Ok(remote),
            Err(e) => {
                debug!(
                    target: "ringwatch::prober::check()",
                    "Kept connection to {} failed: {}, redialing", self.address, e,
                );
                self.conn = None;
                self.handshake().await
            }
        }
    }

    async fn handshake(&mut self) -> Result<String> {
        let ctx = self.ctx.clone();
        let cfg = &ctx.config;
        let local = &cfg.hostname;

        if self.conn.is_none() {
            self.state = ProbeState::Connecting;
            let addr = dial_addr(&self.address, cfg.peer_port);
            let stream = net::dial(&addr, cfg.net_timeout()).await?;
            self.conn = Some(LineStream::new(stream, &self.address));
        }

        self.state = ProbeState::Authenticating;
        let reply = self.exchange(&proto::auth(&cfg.security_code)).await?;
        proto::expect_auth(&reply)?;

        self.state = ProbeState::AwaitingIdentity;
        let reply = self.exchange("get hostname").await?;
        let remote = proto::parse_ack(&reply, "hostname")?.to_string();

        self.state = ProbeState::AwaitingHostAck;
        let reply = self.exchange(&proto::set_host(local)).await?;
        let echoed = proto::parse_ack(&reply, "host")?;
        if echoed != local.as_str() {
            return Err(Error::HostnameMismatch(echoed.to_string()))
        }

        Ok(remote)
    }
}
