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
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::FutureExt;
use log::{debug, error, info};
use smol::channel::Receiver;
use structopt_toml::StructOptToml;

use ringwatch::{
    agent::{Agent, AgentPtr},
    async_daemonize,
    config::parse_configured_channels,
    notify::{queue::MessageQueuePtr, MessageQueue},
    persist::NullPersistence,
    system::{sleep, StopSignal, StoppableTask},
    util::{
        cli::{SignalEvent, SignalHandler},
        path::expand_path,
    },
    Error, Result,
};

mod settings;
use settings::{Args, CONFIG_FILE, CONFIG_FILE_CONTENTS};

async_daemonize!(realmain);
async fn realmain(args: Args, cfg_path: PathBuf, ex: Arc<smol::Executor<'static>>) -> Result<()> {
    let contents = std::fs::read_to_string(&cfg_path)?;
    let config = args.agent_config(&contents)?;

    let queue = MessageQueue::new(
        expand_path(&args.message_path)?,
        &config.hostname,
        parse_configured_channels(&contents)?,
        config.net_timeout(),
    );

    ////////////////////
    // Queue a report and exit
    ////////////////////
    if let Some(message) = &args.report {
        for path in queue.report(message, &args.report_target)? {
            println!("{}", path.display());
        }
        return Ok(())
    }

    // Signal handling for config reload, queue flush and graceful termination.
    let (signals_handler, signals_task) = SignalHandler::new(ex.clone())?;

    ////////////////////
    // Agent
    ////////////////////
    info!(target: "ringwatchd", "Starting ringwatchd as {}", config.hostname);
    let flush_interval = config.interval;
    let agent = Agent::new(config, NullPersistence::new(), ex.clone());
    agent.start().await?;

    let events_stop = StopSignal::new();
    StoppableTask::new(events_stop.clone()).start(
        handle_events(signals_handler.event_rx.clone(), agent.clone(), queue, cfg_path, flush_interval),
        |res| async {
            match res {
                Ok(()) | Err(Error::DetachedTaskStopped) => { /* Do nothing */ }
                Err(e) => error!(target: "ringwatchd", "Event handler failed: {}", e),
            }
        },
        Error::DetachedTaskStopped,
        ex.clone(),
    );

    ////////////////////
    // Wait for termination signal
    ////////////////////
    signals_handler.wait_termination(signals_task).await?;
    info!(target: "ringwatchd", "Caught termination signal, cleaning up and exiting...");

    events_stop.fire();
    agent.stop().await;
    info!(target: "ringwatchd", "Shut down successfully");

    Ok(())
}

/// React to reload and flush signals, and flush the queue every interval.
async fn handle_events(
    events: Receiver<SignalEvent>,
    agent: AgentPtr,
    queue: MessageQueuePtr,
    cfg_path: PathBuf,
    flush_interval: u64,
) -> Result<()> {
    loop {
        let event = futures::select! {
            ev = events.recv().fuse() => Some(ev?),
            _ = sleep(flush_interval).fuse() => None,
        };

        match event {
            Some(SignalEvent::Reload) => reload(&agent, &cfg_path).await,
            Some(SignalEvent::Flush) | None => {
                if let Some(report) = queue.flush().await {
                    debug!(target: "ringwatchd", "Queue flushed: {:?}", report);
                }
            }
        }
    }
}

/// Re-read the config file and hand it to the agent. Any failure keeps
/// the agent on its current configuration.
async fn reload(agent: &Agent, cfg_path: &Path) {
    info!(target: "ringwatchd", "Reloading configuration from {:?}", cfg_path);

    let contents = match std::fs::read_to_string(cfg_path) {
        Ok(v) => v,
        Err(e) => {
            error!(target: "ringwatchd", "Unable to read config file: {}", e);
            return
        }
    };

    let args = match Args::from_args_with_toml(&contents) {
        Ok(v) => v,
        Err(e) => {
            error!(target: "ringwatchd", "Error parsing the config file: {}", e);
            return
        }
    };

    let config = match args.agent_config(&contents) {
        Ok(v) => v,
        Err(e) => {
            error!(target: "ringwatchd", "Invalid configuration: {}", e);
            return
        }
    };

    // Errors are logged by the agent, which keeps running on the old config
    let _ = agent.reload(config).await;
}
