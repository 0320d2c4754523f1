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

use smol::channel::{Receiver, Sender};

/// One-shot broadcast cancellation signal.
///
/// Every clone observes the same signal. Firing closes the underlying
/// channel, so all current and future `wait()` calls resolve at once.
/// A fresh `StopSignal` is created for every agent run.
#[derive(Clone, Debug)]
pub struct StopSignal {
    sender: Sender<()>,
    receiver: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (sender, receiver) = smol::channel::bounded(1);
        Self { sender, receiver }
    }

    /// Fire the signal. Returns `true` only for the call that actually
    /// fired it; later calls are no-ops.
    pub fn fire(&self) -> bool {
        self.sender.close()
    }

    pub fn is_fired(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the signal has been fired.
    pub async fn wait(&self) {
        // Nothing is ever sent, so this only returns on close.
        let _ = self.receiver.recv().await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn clones_observe_the_same_fire() {
        smol::block_on(async {
            let signal = StopSignal::new();
            let a = signal.clone();
            let b = signal.clone();
            signal.fire();
            a.wait().await;
            b.wait().await;
            assert!(a.is_fired() && b.is_fired());
        });
    }
}
