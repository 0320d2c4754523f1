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

//! Outbound notification channels.
//!
//! The set of channels is closed, so they are an enum rather than trait
//! objects. Every variant carries its own typed configuration and exposes
//! the same `send_message` capability.

use std::time::Duration;

use log::{debug, warn};
use serde_json::json;

use crate::{net, Result};

/// Queue of undelivered reports on disk
pub mod queue;
pub use queue::{MessageQueue, QueuedMessage};

pub mod mail;
pub use mail::MailConfig;

/// Graphite plaintext protocol endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphiteConfig {
    pub address: String,
    pub port: u16,
    pub prefix: String,
    pub disabled: bool,
}

/// Chat-bot relay accepting JSON `sendMessage` packets
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotConfig {
    pub address: String,
    pub port: u16,
    /// Usernames the relay delivers to
    pub to: Vec<String>,
    pub disabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotifyChannel {
    Graphite(GraphiteConfig),
    Bot(BotConfig),
    Mail(MailConfig),
}

impl NotifyChannel {
    /// Name used as a message target and as the config table key
    pub fn name(&self) -> &'static str {
        match self {
            Self::Graphite(_) => "graphite",
            Self::Bot(_) => "bot",
            Self::Mail(_) => "mail",
        }
    }

    pub fn is_disabled(&self) -> bool {
        match self {
            Self::Graphite(c) => c.disabled,
            Self::Bot(c) => c.disabled,
            Self::Mail(c) => c.disabled,
        }
    }

    /// Deliver `text` on behalf of `hostname`.
    ///
    /// Returns `Ok(false)` when the channel is disabled or the remote end
    /// did not confirm delivery.
    pub async fn send_message(&self, text: &str, hostname: &str, timeout: Duration) -> Result<bool> {
        if self.is_disabled() {
            debug!(target: "ringwatch::notify::send_message()", "Channel {} is disabled", self.name());
            return Ok(false)
        }

        match self {
            Self::Graphite(c) => {
                let stream = net::dial(&format!("{}:{}", c.address, c.port), timeout).await?;
                let mut conn = net::LineStream::new(stream, &c.address);
                conn.write_line(&graphite_metric(&c.prefix, hostname, text)).await?;
                conn.close().await?;
                Ok(true)
            }

            Self::Bot(c) => {
                let stream = net::dial(&format!("{}:{}", c.address, c.port), timeout).await?;
                let mut conn = net::LineStream::new(stream, &c.address);
                conn.write_line(&bot_packet(&c.to, hostname, text)).await?;

                let reply = conn.read_reply(timeout).await?;
                if reply.trim() != "ok" {
                    warn!(
                        target: "ringwatch::notify::send_message()",
                        "Bot relay at {} refused message: {}", c.address, reply,
                    );
                    return Ok(false)
                }

                Ok(true)
            }

            Self::Mail(c) => c.send(text, hostname, timeout).await,
        }
    }
}

fn graphite_metric(prefix: &str, hostname: &str, text: &str) -> String {
    format!("{}.{}.{}", prefix, hostname, text)
}

fn bot_packet(to: &[String], hostname: &str, text: &str) -> String {
    json!({
        "command": "sendMessage",
        "message": {
            "event": "personal",
            "usernames": to,
            "text": format!("[{}]: {}", hostname, text),
        },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{AsyncBufReadExt, AsyncWriteExt};
    use smol::{io::BufReader, net::TcpListener};

    #[test]
    fn disabled_channel_does_not_network() {
        smol::block_on(async {
            let chan = NotifyChannel::Graphite(GraphiteConfig {
                // Nothing listens here; a dial would fail
                address: "127.0.0.1".to_string(),
                port: 1,
                prefix: "rw".to_string(),
                disabled: true,
            });
            assert!(!chan.send_message("x", "h", Duration::from_secs(1)).await.unwrap());
        });
    }

    #[test]
    fn bot_packet_shape() {
        let packet = bot_packet(&["alice".to_string()], "node-a", "down");
        let v: serde_json::Value = serde_json::from_str(&packet).unwrap();
        assert_eq!(v["command"], "sendMessage");
        assert_eq!(v["message"]["event"], "personal");
        assert_eq!(v["message"]["usernames"][0], "alice");
        assert_eq!(v["message"]["text"], "[node-a]: down");
    }

    #[test]
    fn bot_delivery_requires_ok() {
        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let relay = smol::spawn(async move {
                for reply in ["ok\n", "nope\n"] {
                    let (mut stream, _) = listener.accept().await.unwrap();
                    let mut line = String::new();
                    BufReader::new(stream.clone()).read_line(&mut line).await.unwrap();
                    assert!(line.contains("sendMessage"));
                    stream.write_all(reply.as_bytes()).await.unwrap();
                }
            });

            let chan = NotifyChannel::Bot(BotConfig {
                address: "127.0.0.1".to_string(),
                port,
                to: vec!["alice".to_string()],
                disabled: false,
            });

            assert!(chan.send_message("up", "node-a", Duration::from_secs(2)).await.unwrap());
            assert!(!chan.send_message("up", "node-a", Duration::from_secs(2)).await.unwrap());
            relay.await;
        });
    }

    #[test]
    fn graphite_writes_metric_path() {
        smol::block_on(async {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();

            let sink = smol::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let mut line = String::new();
                BufReader::new(stream).read_line(&mut line).await.unwrap();
                line
            });

            let chan = NotifyChannel::Graphite(GraphiteConfig {
                address: "127.0.0.1".to_string(),
                port,
                prefix: "ringwatch".to_string(),
                disabled: false,
            });

            assert!(chan.send_message("cpu 1", "node-a", Duration::from_secs(2)).await.unwrap());
            assert_eq!(sink.await, "ringwatch.node-a.cpu 1\n");
        });
    }
}
