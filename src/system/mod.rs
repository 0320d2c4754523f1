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

use std::time::Duration;

use smol::Timer;

/// Condition variable which allows a task to block until woken up
pub mod condvar;
pub use condvar::CondVar;

/// One-shot broadcast used to cancel every worker of one agent run
pub mod stop_signal;
pub use stop_signal::StopSignal;

/// Per-worker stop acknowledgments
pub mod ack;
pub use ack::{AckGroup, AckGroupPtr, WorkerAck};

/// Implementation of async background task spawning which are stoppable
/// using channel signalling.
pub mod stoppable_task;
pub use stoppable_task::{StoppableTask, StoppableTaskPtr};

/// Timeout wrapper for I/O futures
pub mod timeout;
pub use timeout::io_timeout;

/// Sleep for any number of seconds.
pub async fn sleep(seconds: u64) {
    Timer::after(Duration::from_secs(seconds)).await;
}

/// Sleep for any number of milliseconds.
pub async fn msleep(millis: u64) {
    Timer::after(Duration::from_millis(millis)).await;
}
