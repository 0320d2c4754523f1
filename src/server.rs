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

//! Line protocol server.
//!
//! Every accepted connection runs its own [`Session`], a two-state machine:
//! an unauthenticated session only serves `ping`, `export`, `quit` and
//! `auth`; the authenticated one adds the `get`, `set` and `help` commands.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::{AsyncRead, AsyncWrite};
use log::{debug, error, info, warn};
use smol::{net::TcpListener, Executor};

use crate::{
    agent::AgentContextPtr,
    net::LineStream,
    proto::{self, Command, ExportTarget},
    system::{msleep, StopSignal, StoppableTask},
    vector::PeerStatus,
    Error, Result,
};

/// Reported by `get version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF_MS: u64 = 100;

const ERR_EXPORT: &str = "-ERR export";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// What the connection should do after a command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Reply(Vec<String>),
    Silent,
    /// Send the lines, then close the connection
    Close(Vec<String>),
}

fn reply(line: &str) -> Outcome {
    Outcome::Reply(vec![line.to_string()])
}

/// Protocol state of one inbound connection
pub struct Session {
    id: u64,
    state: SessionState,
    client_hostname: Option<String>,
    ctx: AgentContextPtr,
}

impl Session {
    pub fn new(id: u64, ctx: AgentContextPtr) -> Self {
        Self { id, state: SessionState::Unauthenticated, client_hostname: None, ctx }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Hostname the caller declared with `set host`
    pub fn client_hostname(&self) -> Option<&str> {
        self.client_hostname.as_deref()
    }

    pub async fn handle(&mut self, cmd: Command) -> Outcome {
        match self.state {
            SessionState::Unauthenticated => self.handle_open(cmd).await,
            SessionState::Authenticated => self.handle_authenticated(cmd).await,
        }
    }

    /// Commands served in every state
    async fn handle_open(&mut self, cmd: Command) -> Outcome {
        match cmd {
            Command::Empty => Outcome::Silent,
            Command::Ping => reply(proto::PONG),
            Command::Export(target) => self.export(target).await,
            Command::Quit => Outcome::Close(vec![proto::BYE.to_string()]),
            Command::Auth(code) => self.authenticate(&code),

            Command::Unknown(line) => {
                warn!(target: "ringwatch::server::session", "[{}] Unimplemented `{}`", self.id, line);
                Outcome::Silent
            }

            cmd @ Command::Malformed(_) if !cmd.requires_auth() => {
                warn!(target: "ringwatch::server::session", "[{}] Malformed {:?}", self.id, cmd);
                reply(proto::ERR_SYNTAX)
            }

            cmd => {
                warn!(
                    target: "ringwatch::server::session",
                    "[{}] {:?} refused before authentication", self.id, cmd,
                );
                reply(proto::ERR_AUTH_REQUIRED)
            }
        }
    }

    async fn handle_authenticated(&mut self, cmd: Command) -> Outcome {
        match cmd {
            Command::GetWhoami => reply(&proto::ack("whoami", &self.id.to_string())),
            Command::GetHostname => reply(&proto::ack("hostname", &self.ctx.config.hostname)),
            Command::GetVersion => reply(&proto::ack("version", VERSION)),

            Command::SetHost(name) => {
                debug!(target: "ringwatch::server::session", "[{}] Caller is {}", self.id, name);
                let ack = proto::ack("host", &name);
                self.client_hostname = Some(name);
                reply(&ack)
            }

            Command::SetVector { hostname, payload } => {
                match serde_json::from_str::<Vec<PeerStatus>>(&payload) {
                    Ok(vector) => {
                        debug!(
                            target: "ringwatch::server::session",
                            "[{}] Installing {} records for {}", self.id, vector.len(), hostname,
                        );
                        self.ctx.master_vector.install(&hostname, vector).await;
                        reply(proto::ACK_SET)
                    }
                    Err(e) => {
                        warn!(
                            target: "ringwatch::server::session",
                            "[{}] Bad vector from {}: {}", self.id, hostname, e,
                        );
                        reply(proto::ERR_SET)
                    }
                }
            }

            Command::Help => {
                let mut lines: Vec<String> = proto::HELP.iter().map(|l| l.to_string()).collect();
                lines.push(proto::OK.to_string());
                Outcome::Reply(lines)
            }

            Command::Malformed(line) => {
                warn!(target: "ringwatch::server::session", "[{}] Malformed `{}`", self.id, line);
                reply(proto::ERR_SYNTAX)
            }

            cmd => self.handle_open(cmd).await,
        }
    }

    fn authenticate(&mut self, code: &str) -> Outcome {
        if code != self.ctx.config.security_code {
            warn!(target: "ringwatch::server::session", "[{}] Wrong security code", self.id);
            return reply(proto::ERR_AUTH)
        }

        if self.state == SessionState::Unauthenticated {
            info!(target: "ringwatch::server::session", "[{}] Authenticated", self.id);
        }
        self.state = SessionState::Authenticated;
        reply(proto::ACK_AUTH)
    }

    async fn export(&self, target: ExportTarget) -> Outcome {
        let (field, json) = match target {
            ExportTarget::Vector => ("vector", self.ctx.store.to_json().await),
            ExportTarget::Master => ("master", self.ctx.master_vector.to_json().await),
        };

        match json {
            Ok(json) => {
                debug!(target: "ringwatch::server::session", "[{}] Export {}: {}", self.id, field, json);
                reply(&proto::ack(field, &json))
            }
            Err(e) => {
                error!(target: "ringwatch::server::session", "[{}] Export {} failed: {}", self.id, field, e);
                reply(ERR_EXPORT)
            }
        }
    }
}

/// Serve one connection until the peer quits or misbehaves.
pub async fn handle_connection<C>(stream: C, peer: SocketAddr, id: u64, ctx: AgentContextPtr) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Send + Unpin,
{
    let mut conn = LineStream::new(stream, &peer.to_string());
    let mut session = Session::new(id, ctx);

    loop {
        let line = conn.read_line().await?;

        match session.handle(Command::parse(&line)).await {
            Outcome::Silent => {}

            Outcome::Reply(lines) => {
                for line in &lines {
                    conn.write_line(line).await?;
                }
            }

            Outcome::Close(lines) => {
                for line in &lines {
                    conn.write_line(line).await?;
                }
                conn.close().await?;
                return Ok(())
            }
        }
    }
}

/// Accept loop of the line protocol server
pub struct Server {
    ctx: AgentContextPtr,
    listener: Arc<TcpListener>,
    /// Owned by the agent so ids stay unique across reloads
    conn_ids: Arc<AtomicU64>,
}

impl Server {
    pub fn new(ctx: AgentContextPtr, listener: Arc<TcpListener>, conn_ids: Arc<AtomicU64>) -> Self {
        Self { ctx, listener, conn_ids }
    }

    /// Diagnostic id for a new connection. Wraps to zero on overflow.
    pub fn next_connection_id(&self) -> u64 {
        self.conn_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Accept connections forever. Each connection runs as its own task
    /// and is closed as soon as `stop` fires.
    pub async fn run(self, stop: StopSignal, ex: Arc<Executor<'static>>) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(target: "ringwatch::server::run()", "Server listening on {}", addr);
        }

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(target: "ringwatch::server::run()", "Accept failed: {}", e);
                    msleep(ACCEPT_BACKOFF_MS).await;
                    continue
                }
            };

            let id = self.next_connection_id();
            info!(target: "ringwatch::server::run()", "New connection [{}] from {}", id, peer);

            StoppableTask::new(stop.clone()).start(
                handle_connection(stream, peer, id, self.ctx.clone()),
                move |res| async move {
                    match res {
                        Ok(()) | Err(Error::DetachedTaskStopped) | Err(Error::ConnectionClosed) => {
                            info!(target: "ringwatch::server::run()", "Client [{}] went away", id)
                        }
                        Err(e) => {
                            warn!(target: "ringwatch::server::run()", "Client [{}] dropped: {}", id, e)
                        }
                    }
                },
                Error::DetachedTaskStopped,
                ex.clone(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{agent::AgentContext, config::AgentConfig, util::time::Timestamp};

    fn context() -> AgentContextPtr {
        let config = AgentConfig {
            hostname: "node-a".into(),
            security_code: "sesame".into(),
            ..Default::default()
        };
        AgentContext::standalone(config)
    }

    fn lines(outcome: Outcome) -> Vec<String> {
        match outcome {
            Outcome::Reply(l) | Outcome::Close(l) => l,
            Outcome::Silent => vec![],
        }
    }

    #[test]
    fn post_auth_commands_are_gated() {
        smol::block_on(async {
            let ctx = context();
            let mut s = Session::new(3, ctx.clone());

            for line in ["get whoami", "get hostname", "get version", "set host x", "set vector x []", "help"] {
                let out = s.handle(Command::parse(line)).await;
                assert_eq!(lines(out), vec![proto::ERR_AUTH_REQUIRED.to_string()], "{}", line);
                assert_eq!(s.state(), SessionState::Unauthenticated);
            }
            assert!(ctx.master_vector.is_empty().await);
            assert!(s.client_hostname().is_none());

            let out = s.handle(Command::parse("auth wrong")).await;
            assert_eq!(lines(out), vec![proto::ERR_AUTH.to_string()]);
            assert_eq!(s.state(), SessionState::Unauthenticated);

            let out = s.handle(Command::parse("auth sesame")).await;
            assert_eq!(lines(out), vec![proto::ACK_AUTH.to_string()]);
            assert_eq!(s.state(), SessionState::Authenticated);

            assert_eq!(lines(s.handle(Command::GetWhoami).await), vec!["+OK ack whoami 3"]);
            assert_eq!(lines(s.handle(Command::GetHostname).await), vec!["+OK ack hostname node-a"]);
            assert_eq!(
                lines(s.handle(Command::GetVersion).await),
                vec![format!("+OK ack version {}", VERSION)]
            );
            assert_eq!(
                lines(s.handle(Command::parse("set host node-b")).await),
                vec!["+OK ack host node-b"]
            );
            assert_eq!(s.client_hostname(), Some("node-b"));

            let help = lines(s.handle(Command::Help).await);
            assert_eq!(help.last().unwrap(), proto::OK);
            assert_eq!(help.len(), proto::HELP.len() + 1);

            // A wrong code never drops an established session
            s.handle(Command::parse("auth wrong")).await;
            assert_eq!(s.state(), SessionState::Authenticated);
        });
    }

    #[test]
    fn open_commands_work_unauthenticated() {
        smol::block_on(async {
            let mut s = Session::new(0, context());
            assert_eq!(s.handle(Command::Empty).await, Outcome::Silent);
            assert_eq!(s.handle(Command::Ping).await, reply(proto::PONG));
            assert_eq!(s.handle(Command::parse("dance")).await, Outcome::Silent);
            assert_eq!(s.handle(Command::parse("export")).await, reply(proto::ERR_SYNTAX));
            assert_eq!(
                s.handle(Command::Export(ExportTarget::Master)).await,
                reply("+OK ack master {}")
            );
            assert_eq!(s.handle(Command::Export(ExportTarget::Vector)).await, reply("+OK ack vector []"));
            assert_eq!(s.handle(Command::Quit).await, Outcome::Close(vec![proto::BYE.to_string()]));
        });
    }

    #[test]
    fn set_vector_installs_master_entry() {
        smol::block_on(async {
            let ctx = context();
            let mut s = Session::new(0, ctx.clone());
            s.handle(Command::parse("auth sesame")).await;

            let vector = vec![PeerStatus {
                host: "node-c".into(),
                hostname: "node-c".into(),
                status: true,
                interval: 10,
                timestamp: Timestamp(1700000000),
                sectors: vec!["dc 1".into()],
            }];
            let json = serde_json::to_string(&vector).unwrap();

            let out = s.handle(Command::parse(&proto::set_vector("node-b", &json))).await;
            assert_eq!(out, reply(proto::ACK_SET));
            assert_eq!(ctx.master_vector.get("node-b").await.unwrap(), vector);

            let out = s.handle(Command::parse("set vector node-b {broken")).await;
            assert_eq!(out, reply(proto::ERR_SET));
            assert_eq!(ctx.master_vector.get("node-b").await.unwrap(), vector);

            assert_eq!(s.handle(Command::parse("set vector node-b")).await, reply(proto::ERR_SYNTAX));
        });
    }

    #[test]
    fn connection_ids_continue_across_servers() {
        smol::block_on(async {
            let url = url::Url::parse("tcp://127.0.0.1:0").unwrap();
            let listener = Arc::new(crate::net::listen(&url).unwrap());
            let ids = Arc::new(AtomicU64::new(0));

            let first = Server::new(context(), listener.clone(), ids.clone());
            assert_eq!(first.next_connection_id(), 0);
            assert_eq!(first.next_connection_id(), 1);

            let second = Server::new(context(), listener, ids.clone());
            assert_eq!(second.next_connection_id(), 2);
            assert_eq!(ids.load(Ordering::Relaxed), 3);
        });
    }

    #[test]
    fn security_code_may_contain_spaces() {
        smol::block_on(async {
            let config = AgentConfig {
                hostname: "node-a".into(),
                security_code: "open sesame".into(),
                ..Default::default()
            };
            assert!(config.validate().is_ok());
            let mut s = Session::new(0, AgentContext::standalone(config));

            let out = s.handle(Command::parse("auth open")).await;
            assert_eq!(lines(out), vec![proto::ERR_AUTH.to_string()]);
            assert_eq!(s.state(), SessionState::Unauthenticated);

            let out = s.handle(Command::parse(&proto::auth("open sesame"))).await;
            assert_eq!(lines(out), vec![proto::ACK_AUTH.to_string()]);
            assert_eq!(s.state(), SessionState::Authenticated);
        });
    }
}
