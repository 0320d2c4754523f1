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
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info, warn};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use super::NotifyChannel;
use crate::{
    util::file::{load_json_file, save_json_file},
    Result,
};

/// Target that fans a report out to every configured channel
pub const TARGET_ALL: &str = "all";

/// Random bytes in a queued file name
const NAME_BYTES: usize = 16;

/// One pending report as stored on disk
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedMessage {
    pub target: String,
    pub message: String,
}

/// Outcome counters of one [`MessageQueue::flush`] pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub dropped: usize,
    pub kept: usize,
}

/// Directory of pending reports, drained into the notification channels.
pub struct MessageQueue {
    path: PathBuf,
    hostname: String,
    channels: Vec<NotifyChannel>,
    net_timeout: Duration,
    flushing: AtomicBool,
}

pub type MessageQueuePtr = Arc<MessageQueue>;

impl MessageQueue {
    pub fn new(
        path: PathBuf,
        hostname: &str,
        channels: Vec<NotifyChannel>,
        net_timeout: Duration,
    ) -> MessageQueuePtr {
        Arc::new(Self {
            path,
            hostname: hostname.to_string(),
            channels,
            net_timeout,
            flushing: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue `message` for `target`. Returns the files written.
    pub fn report(&self, message: &str, target: &str) -> Result<Vec<PathBuf>> {
        let targets: Vec<String> = if target.eq_ignore_ascii_case(TARGET_ALL) {
            self.channels.iter().map(|c| c.name().to_string()).collect()
        } else {
            vec![target.to_lowercase()]
        };

        fs::create_dir_all(&self.path)?;

        let mut written = vec![];
        for target in targets {
            let path = self.fresh_name();
            let msg = QueuedMessage { target, message: message.to_string() };
            save_json_file(&path, &msg)?;
            info!(
                target: "ringwatch::notify::queue::report()",
                "Queued {:?} [target: {}]", path, msg.target,
            );
            written.push(path);
        }

        Ok(written)
    }

    fn fresh_name(&self) -> PathBuf {
        loop {
            let mut bytes = [0u8; NAME_BYTES];
            OsRng.fill_bytes(&mut bytes);
            let path = self.path.join(hex::encode(bytes));
            if !path.exists() {
                return path
            }
        }
    }

    /// Try to deliver every queued message.
    ///
    /// Delivered messages and messages for unknown channels are removed,
    /// anything else stays for the next pass. Returns `None` when another
    /// flush is already running.
    pub async fn flush(&self) -> Option<FlushReport> {
        if self.flushing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            info!(target: "ringwatch::notify::queue::flush()", "Sender iteration already in progress");
            return None
        }

        let report = self.drain().await;
        self.flushing.store(false, Ordering::Release);
        Some(report)
    }

    async fn drain(&self) -> FlushReport {
        let mut report = FlushReport::default();

        let entries = match fs::read_dir(&self.path) {
            Ok(v) => v,
            Err(e) => {
                debug!(
                    target: "ringwatch::notify::queue::flush()",
                    "Cannot read {:?}: {}", self.path, e,
                );
                return report
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.is_file() {
                continue
            }

            let msg: QueuedMessage = match load_json_file(&path) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        target: "ringwatch::notify::queue::flush()",
                        "Unreadable message {:?}: {}", path, e,
                    );
                    report.kept += 1;
                    continue
                }
            };

            let Some(channel) = self.channels.iter().find(|c| c.name() == msg.target) else {
                error!(
                    target: "ringwatch::notify::queue::flush()",
                    "Unsupported channel {}, dropping {:?}", msg.target, path,
                );
                remove(&path);
                report.dropped += 1;
                continue
            };

            match channel.send_message(&msg.message, &self.hostname, self.net_timeout).await {
                Ok(true) => {
                    remove(&path);
                    report.delivered += 1;
                }
                Ok(false) => report.kept += 1,
                Err(e) => {
                    warn!(
                        target: "ringwatch::notify::queue::flush()",
                        "Delivery over {} failed: {}", msg.target, e,
                    );
                    report.kept += 1;
                }
            }
        }

        report
    }
}

fn remove(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(target: "ringwatch::notify::queue", "Unable to remove {:?}: {}", path, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::GraphiteConfig;
    use tempdir::TempDir;

    fn graphite(disabled: bool) -> NotifyChannel {
        NotifyChannel::Graphite(GraphiteConfig {
            address: "127.0.0.1".to_string(),
            port: 1,
            prefix: "rw".to_string(),
            disabled,
        })
    }

    #[test]
    fn report_all_fans_out() {
        let tmp = TempDir::new("ringwatch-queue").unwrap();
        let dir = tmp.path().join("msg");
        let q = MessageQueue::new(dir, "node-a", vec![graphite(true)], Duration::from_secs(1));

        let files = q.report("disk full", "all").unwrap();
        assert_eq!(files.len(), 1);

        let msg: QueuedMessage = load_json_file(&files[0]).unwrap();
        assert_eq!(msg, QueuedMessage { target: "graphite".into(), message: "disk full".into() });

        let name = files[0].file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name.len(), NAME_BYTES * 2);
    }

    #[test]
    fn flush_drops_unknown_and_keeps_undelivered() {
        let tmp = TempDir::new("ringwatch-queue").unwrap();
        let dir = tmp.path().to_path_buf();
        let q = MessageQueue::new(dir.clone(), "node-a", vec![graphite(true)], Duration::from_secs(1));

        q.report("a", "pager").unwrap();
        q.report("b", "graphite").unwrap();
        fs::write(dir.join(".hidden"), b"junk").unwrap();

        let report = smol::block_on(q.flush()).unwrap();
        assert_eq!(report, FlushReport { delivered: 0, dropped: 1, kept: 1 });

        let left = fs::read_dir(&dir).unwrap().count();
        assert_eq!(left, 2);
    }

    #[test]
    fn concurrent_flush_is_refused() {
        let tmp = TempDir::new("ringwatch-queue").unwrap();
        let q = MessageQueue::new(tmp.path().to_path_buf(), "node-a", vec![], Duration::from_secs(1));
        q.flushing.store(true, Ordering::Release);
        assert!(smol::block_on(q.flush()).is_none());
    }
}
