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
    net::SocketAddr,
    sync::{atomic::AtomicU64, Arc},
};

use futures::Future;
use log::{debug, error, info};
use smol::{lock::Mutex, net::TcpListener, Executor};
use url::Url;

use crate::{
    config::AgentConfig,
    master::{Aggregator, MasterClient},
    net,
    persist::{NullPersistence, PersistencePtr},
    prober::Prober,
    server::Server,
    system::{AckGroup, AckGroupPtr, StopSignal, StoppableTask},
    topology::Topology,
    vector::{MasterVector, MasterVectorPtr, VectorStore, VectorStorePtr},
    Error, Result,
};

pub type AgentContextPtr = Arc<AgentContext>;

/// Everything the workers of one agent run share.
///
/// The configuration and topology are fixed for the run. The vector
/// stores outlive runs and are only reset on start and reload.
pub struct AgentContext {
    pub config: AgentConfig,
    pub topology: Topology,
    pub store: VectorStorePtr,
    pub master_vector: MasterVectorPtr,
    pub persistence: PersistencePtr,
}

impl AgentContext {
    /// Context with empty stores and no topology, for driving single
    /// components on their own.
    pub fn standalone(config: AgentConfig) -> AgentContextPtr {
        Self::with_topology(config, Topology::default())
    }

    pub fn with_topology(config: AgentConfig, topology: Topology) -> AgentContextPtr {
        Arc::new(Self {
            config,
            topology,
            store: VectorStore::new(),
            master_vector: MasterVector::new(),
            persistence: NullPersistence::new(),
        })
    }
}

/// Workers of the current run
struct Running {
    ctx: AgentContextPtr,
    stop: StopSignal,
    acks: AckGroupPtr,
}

pub type AgentPtr = Arc<Agent>;

/// Lifecycle coordinator.
///
/// Owns the long-lived state and starts, stops and reloads the set of
/// workers: the server accept loop, one prober per neighbour, the master
/// client and the aggregator.
pub struct Agent {
    config: Mutex<AgentConfig>,
    store: VectorStorePtr,
    master_vector: MasterVectorPtr,
    persistence: PersistencePtr,
    listener: Mutex<Option<(Url, Arc<TcpListener>)>>,
    running: Mutex<Option<Running>>,
    conn_ids: Arc<AtomicU64>,
    executor: Arc<Executor<'static>>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        persistence: PersistencePtr,
        executor: Arc<Executor<'static>>,
    ) -> AgentPtr {
        Arc::new(Self {
            config: Mutex::new(config),
            store: VectorStore::new(),
            master_vector: MasterVector::new(),
            persistence,
            listener: Mutex::new(None),
            running: Mutex::new(None),
            conn_ids: Arc::new(AtomicU64::new(0)),
            executor,
        })
    }

    pub fn store(&self) -> VectorStorePtr {
        self.store.clone()
    }

    pub fn master_vector(&self) -> MasterVectorPtr {
        self.master_vector.clone()
    }

    pub async fn config(&self) -> AgentConfig {
        self.config.lock().await.clone()
    }

    /// Address the server is bound to, once started
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let listener = self.listener.lock().await;
        listener.as_ref().and_then(|(_, l)| l.local_addr().ok())
    }

    /// Context of the current run
    pub async fn context(&self) -> Option<AgentContextPtr> {
        self.running.lock().await.as_ref().map(|r| r.ctx.clone())
    }

    /// Stop acknowledgments of the current run
    pub async fn acks(&self) -> Option<AckGroupPtr> {
        self.running.lock().await.as_ref().map(|r| r.acks.clone())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Resolve the topology and spawn every worker. A bad configuration
    /// is returned as an error and nothing is started.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(Error::AgentAlreadyRunning)
        }

        let config = self.config.lock().await.clone();
        let topology = Topology::resolve(&config)?;
        let listener = self.bind(&config.listen).await?;

        *running = Some(self.spawn_workers(config, topology, listener).await);
        info!(target: "ringwatch::agent::start()", "Agent started");
        Ok(())
    }

    /// Signal every worker to stop and wait until all of them have
    /// acknowledged. Stopping a stopped agent does nothing.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(run) => Self::halt(run).await,
            None => debug!(target: "ringwatch::agent::stop()", "Agent is not running"),
        }
    }

    /// Switch to `config`. The new topology is resolved and the listener
    /// bound before anything is stopped, so a bad config leaves the
    /// current run untouched and only returns the error.
    pub async fn reload(&self, config: AgentConfig) -> Result<()> {
        let mut running = self.running.lock().await;

        let topology = match Topology::resolve(&config) {
            Ok(t) => t,
            Err(e) => {
                error!(
                    target: "ringwatch::agent::reload()",
                    "Reload rejected, keeping previous topology: {}", e,
                );
                return Err(e)
            }
        };

        let listener = match self.bind(&config.listen).await {
            Ok(l) => l,
            Err(e) => {
                error!(
                    target: "ringwatch::agent::reload()",
                    "Reload rejected, cannot listen on {}: {}", config.listen, e,
                );
                return Err(e)
            }
        };

        info!(target: "ringwatch::agent::reload()", "Reloading agent");
        if let Some(run) = running.take() {
            Self::halt(run).await;
        }

        *self.config.lock().await = config.clone();
        *running = Some(self.spawn_workers(config, topology, listener).await);
        info!(target: "ringwatch::agent::reload()", "Agent reloaded");
        Ok(())
    }

    async fn halt(run: Running) {
        info!(target: "ringwatch::agent::stop()", "Stopping {} workers", run.acks.len());
        run.stop.fire();
        run.acks.wait_all().await;
        info!(target: "ringwatch::agent::stop()", "All workers stopped");
    }

    /// Reuse the current listener when the URL did not change.
    async fn bind(&self, url: &Url) -> Result<Arc<TcpListener>> {
        let mut current = self.listener.lock().await;
        if let Some((bound, listener)) = current.as_ref() {
            if bound == url {
                return Ok(listener.clone())
            }
        }

        let listener = Arc::new(net::listen(url)?);
        *current = Some((url.clone(), listener.clone()));
        Ok(listener)
    }

    async fn spawn_workers(
        &self,
        config: AgentConfig,
        topology: Topology,
        listener: Arc<TcpListener>,
    ) -> Running {
        let slots = self.store.reset(&topology, config.interval).await;

        let ctx = Arc::new(AgentContext {
            config,
            topology,
            store: self.store.clone(),
            master_vector: self.master_vector.clone(),
            persistence: self.persistence.clone(),
        });

        let stop = StopSignal::new();
        let acks = AckGroup::new();

        let server = Server::new(ctx.clone(), listener, self.conn_ids.clone());
        self.spawn_worker("server", server.run(stop.clone(), self.executor.clone()), &stop, &acks);

        for (neighbour, slot) in ctx.topology.neighbours.iter().zip(slots) {
            let prober = Prober::new(ctx.clone(), &neighbour.address, slot);
            self.spawn_worker(&format!("prober:{}", neighbour.address), prober.run(), &stop, &acks);
        }

        self.spawn_worker("master-client", MasterClient::new(ctx.clone()).run(), &stop, &acks);
        self.spawn_worker("aggregator", Aggregator::new(ctx.clone()).run(), &stop, &acks);

        Running { ctx, stop, acks }
    }

    fn spawn_worker<F>(&self, name: &str, main: F, stop: &StopSignal, acks: &AckGroupPtr)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let ack = acks.register(name);
        let name = name.to_string();

        StoppableTask::new(stop.clone()).start(
            main,
            |res| async move {
                match res {
                    Ok(()) | Err(Error::DetachedTaskStopped) => {
                        debug!(target: "ringwatch::agent::spawn_worker()", "{} exited", name)
                    }
                    Err(e) => {
                        error!(target: "ringwatch::agent::spawn_worker()", "{} failed: {}", name, e)
                    }
                }
                ack.done();
            },
            Error::DetachedTaskStopped,
            self.executor.clone(),
        );
    }
}
