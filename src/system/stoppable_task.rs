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

use std::sync::Arc;

use futures::{Future, FutureExt};
use smol::Executor;

use super::StopSignal;

pub type StoppableTaskPtr = Arc<StoppableTask>;

/// A detached task that is cancelled when its [`StopSignal`] fires.
///
/// On cancellation the main future is dropped, closing any socket it
/// owns, and the stop handler runs with `Err(stop_value)`.
pub struct StoppableTask {
    signal: StopSignal,
}

impl StoppableTask {
    pub fn new(signal: StopSignal) -> StoppableTaskPtr {
        Arc::new(Self { signal })
    }

    /// Fire the underlying signal. This stops every task sharing it.
    pub fn stop(&self) {
        self.signal.fire();
    }

    pub fn start<'a, MainFut, StopFut, StopFn, Error>(
        self: Arc<Self>,
        main: MainFut,
        stop_handler: StopFn,
        stop_value: Error,
        executor: Arc<Executor<'a>>,
    ) where
        MainFut: Future<Output = std::result::Result<(), Error>> + Send + 'a,
        StopFut: Future<Output = ()> + Send,
        StopFn: FnOnce(std::result::Result<(), Error>) -> StopFut + Send + 'a,
        Error: std::error::Error + Send + 'a,
    {
        executor
            .spawn(async move {
                let result = futures::select! {
                    _ = self.signal.wait().fuse() => Err(stop_value),
                    result = main.fuse() => result
                };

                stop_handler(result).await;
            })
            .detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn stop_cancels_pending_main() {
        let ex = Arc::new(Executor::new());
        let (tx, rx) = smol::channel::bounded(1);

        let task = StoppableTask::new(StopSignal::new());
        task.clone().start(
            async {
                smol::future::pending::<()>().await;
                Ok(())
            },
            |res| async move {
                let _ = tx.send(matches!(res, Err(Error::DetachedTaskStopped))).await;
            },
            Error::DetachedTaskStopped,
            ex.clone(),
        );

        task.stop();
        let stopped = smol::block_on(ex.run(rx.recv())).unwrap();
        assert!(stopped);
    }
}
