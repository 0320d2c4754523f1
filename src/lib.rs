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

pub mod error;
pub use error::{Error, Result};

/// Process lifecycle primitives
pub mod system;

/// Path, time, hostname and daemon helpers
pub mod util;

/// TCP transport and line framing
pub mod net;

pub mod config;
pub mod topology;
pub mod vector;

/// Line protocol grammar shared by the server and its clients
pub mod proto;

pub mod master;
pub mod prober;
pub mod server;

/// Lifecycle coordinator owning the runtime context
pub mod agent;

pub mod notify;
pub mod persist;
