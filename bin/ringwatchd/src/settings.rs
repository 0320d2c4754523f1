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

use serde::Deserialize;
use structopt::StructOpt;
use structopt_toml::StructOptToml;
use url::Url;

use ringwatch::{
    config::{parse_configured_sectors, AgentConfig},
    util::hostname::system_hostname,
    Result,
};

// Location for config file
pub const CONFIG_FILE: &str = "ringwatchd_config.toml";
pub const CONFIG_FILE_CONTENTS: &str = include_str!("../ringwatchd_config.toml");

/// ringwatchd cli
#[derive(Clone, Debug, Deserialize, StructOpt, StructOptToml)]
#[serde(default)]
#[structopt(name = "ringwatchd", about = "Ring-topology host monitoring daemon")]
pub struct Args {
    /// Sets a custom config file
    #[structopt(short, long)]
    pub config: Option<String>,

    /// Name of this node (defaults to the system hostname)
    #[structopt(long)]
    pub hostname: Option<String>,

    /// Neighbours watched on each side in every sector
    #[structopt(long, default_value = "1")]
    pub host_cnt: usize,

    /// Seconds between check cycles and vector pushes
    #[structopt(long, default_value = "10")]
    pub interval: u64,

    /// Seconds allowed for connecting and for each reply
    #[structopt(long, default_value = "2")]
    pub net_timeout: u64,

    /// Aggregate the vectors of every other node
    #[structopt(long)]
    pub master: bool,

    /// Shared secret presented on every connection
    #[structopt(long, default_value = "CodePhrase")]
    pub security_code: String,

    /// Line protocol listen URL
    #[structopt(long, default_value = "tcp://0.0.0.0:5223")]
    pub listen: Url,

    /// Port dialed for hosts configured without one
    #[structopt(long, default_value = "5223")]
    pub peer_port: u16,

    /// Master servers (repeatable)
    #[structopt(long)]
    pub master_servers: Vec<String>,

    /// Directory holding queued notifications
    #[structopt(long, default_value = "~/.local/share/ringwatch/msg")]
    pub message_path: String,

    /// Queue a notification message and exit
    #[structopt(long)]
    pub report: Option<String>,

    /// Channel the queued notification goes to
    #[structopt(long, default_value = "all")]
    pub report_target: String,

    /// Set log file to output into
    #[structopt(short, long)]
    pub log: Option<String>,

    /// Increase verbosity (-vvv supported)
    #[structopt(short, parse(from_occurrences))]
    pub verbose: u8,
}

impl Args {
    /// Build the agent configuration from these arguments and the
    /// table sections of the config file contents.
    pub fn agent_config(&self, toml_str: &str) -> Result<AgentConfig> {
        let hostname = match &self.hostname {
            Some(h) if !h.trim().is_empty() => h.trim().to_string(),
            _ => system_hostname()?,
        };

        Ok(AgentConfig {
            hostname,
            host_cnt: self.host_cnt,
            interval: self.interval,
            net_timeout: self.net_timeout,
            master: self.master,
            security_code: self.security_code.clone(),
            listen: self.listen.clone(),
            peer_port: self.peer_port,
            sectors: parse_configured_sectors(toml_str)?,
            master_servers: self.master_servers.clone(),
        })
    }
}
