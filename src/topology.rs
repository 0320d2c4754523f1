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

//! Ring topology resolution.
//!
//! Every sector is a ring of host slots. A host watches the `host_cnt`
//! nearest slots on each side of every slot it occupies.

use log::{debug, info};

use crate::{
    config::{host_part, slot_addresses, AgentConfig},
    Result,
};

/// A peer this host checks, tagged with every sector it was reached through
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbour {
    pub address: String,
    pub sectors: Vec<String>,
}

/// Read-only result of resolving one configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Topology {
    pub hostname: String,
    /// Sectors the local host occupies a slot in
    pub memberships: Vec<String>,
    /// Deduplicated, in first-seen order
    pub neighbours: Vec<Neighbour>,
    pub master_candidates: Vec<String>,
}

fn slot_holds(slot: &str, hostname: &str) -> bool {
    slot_addresses(slot).into_iter().any(|a| a == hostname || host_part(a) == hostname)
}

impl Topology {
    /// Derive the topology of `cfg.hostname`. Pure, performs no I/O.
    pub fn resolve(cfg: &AgentConfig) -> Result<Self> {
        cfg.validate()?;

        let hostname = cfg.hostname.trim();
        let mut topology = Self { hostname: hostname.to_string(), ..Default::default() };

        for sector in &cfg.sectors {
            let size = sector.hosts.len();

            for (index, slot) in sector.hosts.iter().enumerate() {
                if !slot_holds(slot, hostname) {
                    continue
                }

                if !topology.memberships.contains(&sector.name) {
                    topology.memberships.push(sector.name.clone());
                }

                for l in 1..=cfg.host_cnt {
                    let step = l % size;
                    let next = (index + step) % size;
                    let prev = (index + size - step) % size;

                    for i in [next, prev] {
                        let candidate = &sector.hosts[i];
                        if slot_holds(candidate, hostname) {
                            continue
                        }

                        for address in slot_addresses(candidate) {
                            topology.add_neighbour(address, &sector.name);
                        }
                    }
                }
            }
        }

        topology.master_candidates = cfg
            .master_servers
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        info!(
            target: "ringwatch::topology::resolve()",
            "{} is in {} sectors with {} neighbours",
            topology.hostname, topology.memberships.len(), topology.neighbours.len(),
        );

        Ok(topology)
    }

    fn add_neighbour(&mut self, address: &str, sector: &str) {
        match self.neighbours.iter_mut().find(|n| n.address == address) {
            Some(n) => {
                if !n.sectors.iter().any(|s| s == sector) {
                    n.sectors.push(sector.to_string());
                }
            }
            None => {
                debug!(target: "ringwatch::topology::resolve()", "Neighbour {} via {}", address, sector);
                self.neighbours.push(Neighbour {
                    address: address.to_string(),
                    sectors: vec![sector.to_string()],
                });
            }
        }
    }

    pub fn has_neighbour(&self, address: &str) -> bool {
        self.neighbours.iter().any(|n| n.address == address)
    }
}
