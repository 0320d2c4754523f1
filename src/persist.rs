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

//! Persistence hook for the master vector.
//!
//! The master hands every aggregation snapshot to a [`Persistence`]
//! implementation. Failures are reported back but never stop the agent.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use log::trace;

use crate::{vector::PeerStatus, Result};

pub type PersistencePtr = Arc<dyn Persistence>;

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Number of rows stored for the vectors aggregated by `master`.
    async fn select_query(&self, master: &str) -> Result<usize>;

    /// Store `snapshot` on behalf of `master`, returning the rows written.
    async fn insert_query(
        &self,
        master: &str,
        snapshot: &BTreeMap<String, Vec<PeerStatus>>,
    ) -> Result<usize>;
}

/// Store that keeps nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPersistence;

impl NullPersistence {
    pub fn new() -> PersistencePtr {
        Arc::new(Self)
    }
}

#[async_trait]
impl Persistence for NullPersistence {
    async fn select_query(&self, master: &str) -> Result<usize> {
        trace!(target: "ringwatch::persist", "select for {} skipped", master);
        Ok(0)
    }

    async fn insert_query(
        &self,
        master: &str,
        snapshot: &BTreeMap<String, Vec<PeerStatus>>,
    ) -> Result<usize> {
        trace!(target: "ringwatch::persist", "insert of {} hosts for {} skipped", snapshot.len(), master);
        Ok(0)
    }
}
