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

//! Agent configuration.
//!
//! Scalar settings come from the daemon's command line and TOML file.
//! Sectors and notification channels are TOML tables and are parsed here:
//!
//! ```toml
//! [sector."dc1"]
//! hosts = ["node-a", "node-b,node-b-alt", "node-c:6000"]
//!
//! [channel."graphite"]
//! address = "127.0.0.1"
//! port = 2003
//! prefix = "ringwatch"
//!
//! [channel."bot"]
//! address = "127.0.0.1"
//! port = 7000
//! to = ["alice"]
//!
//! [channel."mail"]
//! address = "127.0.0.1"
//! port = 25
//! from = "ringwatch@hostname"
//! to = ["ops@example.org"]
//! ```

use std::time::Duration;

use log::{info, warn};
use toml::Value;
use url::Url;

use crate::{
    notify::{BotConfig, GraphiteConfig, MailConfig, NotifyChannel},
    Error, Result,
};

/// Port the agents listen on and dial by default
pub const DEFAULT_PORT: u16 = 5223;
pub const DEFAULT_HOST_CNT: usize = 1;
pub const DEFAULT_INTERVAL: u64 = 10;
pub const DEFAULT_NET_TIMEOUT: u64 = 2;
pub const DEFAULT_SECURITY_CODE: &str = "CodePhrase";

/// A named ring of host slots
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sector {
    pub name: String,
    /// Each slot holds one or more comma-separated equivalent addresses
    pub hosts: Vec<String>,
}

/// Everything one agent run needs to know
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub hostname: String,
    /// Ring radius: neighbours watched on each side of this host
    pub host_cnt: usize,
    /// Seconds between check and push cycles
    pub interval: u64,
    /// Seconds allowed for a dial or a reply
    pub net_timeout: u64,
    pub master: bool,
    pub security_code: String,
    pub listen: Url,
    /// Port used for addresses that do not carry one
    pub peer_port: u16,
    pub sectors: Vec<Sector>,
    pub master_servers: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            host_cnt: DEFAULT_HOST_CNT,
            interval: DEFAULT_INTERVAL,
            net_timeout: DEFAULT_NET_TIMEOUT,
            master: false,
            security_code: DEFAULT_SECURITY_CODE.to_string(),
            listen: default_listen_url(),
            peer_port: DEFAULT_PORT,
            sectors: vec![],
            master_servers: vec![],
        }
    }
}

pub fn default_listen_url() -> Url {
    // Constant input, cannot fail
    Url::parse(&format!("tcp://0.0.0.0:{}", DEFAULT_PORT)).unwrap()
}

impl AgentConfig {
    pub fn net_timeout(&self) -> Duration {
        Duration::from_secs(self.net_timeout)
    }

    /// Reject configurations no agent run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::ConfigInvalid("hostname is empty".to_string()))
        }

        if self.security_code.is_empty() || self.security_code.trim() != self.security_code {
            return Err(Error::ConfigInvalid(
                "security code is empty or has surrounding whitespace".to_string(),
            ))
        }

        if self.interval == 0 {
            return Err(Error::ConfigInvalid("interval must be positive".to_string()))
        }

        if self.listen.scheme() != "tcp" || self.listen.port().is_none() {
            return Err(Error::ConfigInvalid(format!("bad listen URL {}", self.listen)))
        }

        for sector in &self.sectors {
            if sector.hosts.is_empty() {
                return Err(Error::ConfigInvalid(format!("sector {} has no hosts", sector.name)))
            }

            if sector.hosts.iter().any(|slot| slot_addresses(slot).is_empty()) {
                return Err(Error::ConfigInvalid(format!("sector {} has an empty slot", sector.name)))
            }
        }

        Ok(())
    }
}

/// Split a host slot into its equivalent addresses.
pub fn slot_addresses(slot: &str) -> Vec<&str> {
    slot.split(',').map(str::trim).filter(|a| !a.is_empty()).collect()
}

/// Address to dial for a configured host entry.
pub fn dial_addr(address: &str, default_port: u16) -> String {
    if host_part(address) != address {
        return address.to_string()
    }

    if address.contains(':') {
        // Bare IPv6 literal
        return format!("[{}]:{}", address, default_port)
    }

    format!("{}:{}", address, default_port)
}

/// Host part of an entry that may carry an explicit `:port`.
pub fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            if port.parse::<u16>().is_ok() {
                return host
            }
        }
        return address
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}

/// Parse a TOML string for `[sector."name"]` tables.
pub fn parse_configured_sectors(data: &str) -> Result<Vec<Sector>> {
    let mut ret = vec![];

    let map = match toml::from_str(data)? {
        Value::Table(m) => m,
        _ => return Ok(ret),
    };

    let Some(sectors) = map.get("sector").and_then(|v| v.as_table()) else { return Ok(ret) };

    for (name, table) in sectors {
        let Some(hosts) = table.get("hosts").and_then(|v| v.as_array()) else {
            return Err(Error::ConfigInvalid(format!("sector {} lacks a hosts array", name)))
        };

        let mut slots = Vec::with_capacity(hosts.len());
        for host in hosts {
            match host.as_str() {
                Some(h) => slots.push(h.to_string()),
                None => {
                    return Err(Error::ConfigInvalid(format!(
                        "sector {} has a non-string host slot",
                        name
                    )))
                }
            }
        }

        info!(target: "ringwatch::config", "Found sector {} with {} slots", name, slots.len());
        ret.push(Sector { name: name.to_string(), hosts: slots });
    }

    Ok(ret)
}

/// Parse a TOML string for `[channel."kind"]` tables.
/// Unknown channel kinds are skipped with a warning.
pub fn parse_configured_channels(data: &str) -> Result<Vec<NotifyChannel>> {
    let mut ret = vec![];

    let map = match toml::from_str(data)? {
        Value::Table(m) => m,
        _ => return Ok(ret),
    };

    let Some(channels) = map.get("channel").and_then(|v| v.as_table()) else { return Ok(ret) };

    for (kind, table) in channels {
        let address = str_field(table, "address").unwrap_or("127.0.0.1").to_string();
        let disabled = table.get("disabled").and_then(|v| v.as_bool()).unwrap_or(false);

        let channel = match kind.as_str() {
            "graphite" => NotifyChannel::Graphite(GraphiteConfig {
                address,
                port: port_field(table, kind, 2003)?,
                prefix: str_field(table, "prefix").unwrap_or("ringwatch").to_string(),
                disabled,
            }),

            "bot" => NotifyChannel::Bot(BotConfig {
                address,
                port: port_field(table, kind, 7000)?,
                to: string_list(table, "to"),
                disabled,
            }),

            "mail" => {
                let defaults = MailConfig::default();
                NotifyChannel::Mail(MailConfig {
                    address,
                    port: port_field(table, kind, defaults.port)?,
                    auth: table.get("auth").and_then(|v| v.as_bool()).unwrap_or(defaults.auth),
                    username: str_field(table, "username").unwrap_or_default().to_string(),
                    password: str_field(table, "password").unwrap_or_default().to_string(),
                    from: str_field(table, "from").map(String::from).unwrap_or(defaults.from),
                    to: string_list(table, "to"),
                    disabled,
                })
            }

            _ => {
                warn!(target: "ringwatch::config", "Unsupported channel kind {}, skipping", kind);
                continue
            }
        };

        info!(target: "ringwatch::config", "Found configuration for channel {}", kind);
        ret.push(channel);
    }

    Ok(ret)
}

fn string_list(table: &Value, key: &str) -> Vec<String> {
    table
        .get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|u| u.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

fn str_field<'a>(table: &'a Value, key: &str) -> Option<&'a str> {
    table.get(key).and_then(|v| v.as_str())
}

fn port_field(table: &Value, kind: &str, default: u16) -> Result<u16> {
    match table.get("port").and_then(|v| v.as_integer()) {
        None => Ok(default),
        Some(p) => u16::try_from(p)
            .map_err(|_| Error::ConfigInvalid(format!("channel {} has bad port {}", kind, p))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
        hostname = "node-a"

        [sector."dc1"]
        hosts = ["node-a", "node-b,node-b-alt", "node-c:6000"]

        [sector."dc2"]
        hosts = ["node-a", "node-z"]

        [channel."graphite"]
        address = "10.0.0.1"
        port = 2003
        prefix = "mon"

        [channel."bot"]
        port = 7000
        to = ["alice", "bob"]
        disabled = true

        [channel."mail"]
        address = "smtp.example.org"
        auth = true
        username = "ringwatch"
        password = "hunter2"
        to = ["ops@example.org"]

        [channel."pager"]
        address = "10.0.0.9"
    "#;

    #[test]
    fn sectors_are_parsed() {
        let sectors = parse_configured_sectors(CONFIG).unwrap();
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].name, "dc1");
        assert_eq!(sectors[0].hosts[1], "node-b,node-b-alt");
        assert_eq!(sectors[1].hosts, vec!["node-a", "node-z"]);
    }

    #[test]
    fn sector_without_hosts_is_invalid() {
        let res = parse_configured_sectors("[sector.\"x\"]\nfoo = 1\n");
        assert!(matches!(res, Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn security_code_is_checked() {
        let mut cfg = AgentConfig { hostname: "node-a".into(), ..Default::default() };
        cfg.security_code = "open sesame".into();
        assert!(cfg.validate().is_ok());

        for code in ["", " sesame", "sesame\t"] {
            cfg.security_code = code.into();
            assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid(_))), "{:?}", code);
        }
    }

    #[test]
    fn channels_are_parsed() {
        let channels = parse_configured_channels(CONFIG).unwrap();
        assert_eq!(channels.len(), 3);
        assert!(channels.contains(&NotifyChannel::Graphite(GraphiteConfig {
            address: "10.0.0.1".into(),
            port: 2003,
            prefix: "mon".into(),
            disabled: false,
        })));
        assert!(channels.contains(&NotifyChannel::Bot(BotConfig {
            address: "127.0.0.1".into(),
            port: 7000,
            to: vec!["alice".into(), "bob".into()],
            disabled: true,
        })));
        assert!(channels.contains(&NotifyChannel::Mail(MailConfig {
            address: "smtp.example.org".into(),
            port: 25,
            auth: true,
            username: "ringwatch".into(),
            password: "hunter2".into(),
            from: "ringwatch@hostname".into(),
            to: vec!["ops@example.org".into()],
            disabled: false,
        })));
    }

    #[test]
    fn dial_addr_appends_default_port() {
        assert_eq!(dial_addr("node-b", 5223), "node-b:5223");
        assert_eq!(dial_addr("node-c:6000", 5223), "node-c:6000");
        assert_eq!(dial_addr("10.0.0.1", 5223), "10.0.0.1:5223");
        assert_eq!(dial_addr("::1", 5223), "[::1]:5223");
        assert_eq!(dial_addr("[::1]:7000", 5223), "[::1]:7000");
        assert_eq!(host_part("node-c:6000"), "node-c");
    }

    #[test]
    fn validation() {
        let mut cfg = AgentConfig { hostname: "node-a".into(), ..Default::default() };
        assert!(cfg.validate().is_ok());

        cfg.interval = 0;
        assert!(cfg.validate().is_err());
        cfg.interval = 10;

        cfg.sectors = vec![Sector { name: "s".into(), hosts: vec!["a".into(), " , ".into()] }];
        assert!(cfg.validate().is_err());

        cfg.sectors = vec![Sector { name: "s".into(), hosts: vec![] }];
        assert!(cfg.validate().is_err());

        cfg.sectors = vec![];
        cfg.hostname = " ".into();
        assert!(cfg.validate().is_err());
    }
}
