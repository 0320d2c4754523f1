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

use std::{env, fs::File, sync::Arc};

use futures::StreamExt;
use log::{debug, warn};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook_async_std::{Handle, Signals};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use smol::channel::{Receiver, Sender};

use crate::Result;

/// Map the `-v` occurrence count onto a log level.
pub fn get_log_level(verbosity_level: u8) -> LevelFilter {
    match verbosity_level {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Build the logger config. A comma-separated `LOG_TARGETS` environment
/// variable restricts output to the listed targets; entries prefixed with
/// `!` are muted instead.
pub fn get_log_config() -> simplelog::Config {
    let mut cfg = ConfigBuilder::new();
    cfg.set_target_level(LevelFilter::Error);

    if let Ok(targets) = env::var("LOG_TARGETS") {
        for target in targets.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match target.strip_prefix('!') {
                Some(ignored) => cfg.add_filter_ignore(ignored.to_string()),
                None => cfg.add_filter_allow(target.to_string()),
            };
        }
    }

    cfg.build()
}

/// Install the terminal logger, plus a file logger when `log_path` is set.
pub fn init_logger(verbosity_level: u8, log_path: Option<String>) -> Result<()> {
    let log_level = get_log_level(verbosity_level);
    let log_config = get_log_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        log_level,
        log_config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_path {
        let path = super::path::expand_path(&path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        loggers.push(WriteLogger::new(log_level, log_config, File::create(path)?));
    }

    CombinedLogger::init(loggers)?;
    Ok(())
}

/// Generate a `main()` that loads `Args` from the CLI and the TOML config
/// file, sets up logging and runs `$realmain(args, executor)` on a
/// multithreaded smol executor.
///
/// The calling crate must provide `Args` (with `config`, `log` and
/// `verbose` fields), `CONFIG_FILE` and `CONFIG_FILE_CONTENTS` in scope.
#[macro_export]
macro_rules! async_daemonize {
    ($realmain:ident) => {
        fn main() -> $crate::Result<()> {
            let args = match Args::from_args_with_toml("") {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Unable to parse arguments: {}", e);
                    return Err($crate::Error::ConfigInvalid(e.to_string()))
                }
            };
            let cfg_path = $crate::util::path::get_config_path(args.config, CONFIG_FILE)?;
            $crate::util::path::spawn_config(&cfg_path, CONFIG_FILE_CONTENTS.as_bytes())?;
            let args = match Args::from_args_with_toml(&std::fs::read_to_string(&cfg_path)?) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("Unable to parse config file {:?}: {}", cfg_path, e);
                    return Err($crate::Error::ConfigInvalid(e.to_string()))
                }
            };

            $crate::util::cli::init_logger(args.verbose, args.log.clone())?;

            let n_threads = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            let ex = std::sync::Arc::new(smol::Executor::new());
            let (signal, shutdown) = smol::channel::unbounded::<()>();
            let (_, result) = easy_parallel::Parallel::new()
                .each(0..n_threads, |_| smol::future::block_on(ex.run(shutdown.recv())))
                .finish(|| {
                    smol::future::block_on(async {
                        $realmain(args, cfg_path, ex.clone()).await?;
                        drop(signal);
                        Ok::<(), $crate::Error>(())
                    })
                });

            result
        }
    };
}

/// What an incoming process signal asks the daemon to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalEvent {
    /// Re-read the config file and reload the agent
    Reload,
    /// Flush the notification queue
    Flush,
}

/// Routes process signals into channels the daemon can await.
pub struct SignalHandler {
    /// Fires once on SIGTERM, SIGINT or SIGQUIT
    pub term_rx: Receiver<()>,
    /// SIGHUP, SIGUSR1 and SIGUSR2
    pub event_rx: Receiver<SignalEvent>,
    handle: Handle,
}

impl SignalHandler {
    pub fn new(ex: Arc<smol::Executor<'static>>) -> Result<(Self, smol::Task<Result<()>>)> {
        let (term_tx, term_rx) = smol::channel::bounded::<()>(1);
        let (event_tx, event_rx) = smol::channel::unbounded::<SignalEvent>();
        let signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT, SIGUSR1, SIGUSR2])?;
        let handle = signals.handle();
        let signals_task = ex.spawn(handle_signals(signals, term_tx, event_tx));

        Ok((Self { term_rx, event_rx, handle }, signals_task))
    }

    /// Handler waits for termination signal
    pub async fn wait_termination(&self, signals_task: smol::Task<Result<()>>) -> Result<()> {
        self.term_rx.recv().await?;
        print!("\r");
        self.handle.close();
        signals_task.await?;

        Ok(())
    }
}

async fn handle_signals(
    mut signals: Signals,
    term_tx: Sender<()>,
    event_tx: Sender<SignalEvent>,
) -> Result<()> {
    debug!(target: "ringwatch::util::cli::handle_signals()", "Started signal handler");
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => event_tx.send(SignalEvent::Reload).await?,
            SIGUSR1 | SIGUSR2 => event_tx.send(SignalEvent::Flush).await?,
            SIGTERM | SIGINT | SIGQUIT => {
                // Repeated termination signals are dropped once one is queued
                let _ = term_tx.try_send(());
            }
            _ => warn!(target: "ringwatch::util::cli::handle_signals()", "Unsupported signal"),
        }
    }
    Ok(())
}
