//! Async pump loop for sessions without a game thread
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::session::Session;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default pump period, roughly one game frame
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

/// Pumps a shared [`Session`] on a tokio interval
///
/// Stands in for the game loop's per-frame tick when no engine is driving
/// the session. The session lock is only held for the duration of one
/// pump, never across an await.
pub struct SessionDriver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl SessionDriver {
    /// Start pumping `session` every `tick`
    pub fn spawn(session: Arc<Mutex<Session>>, tick: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut dispatched: u64 = 0;

            info!(tick_ms = tick.as_millis() as u64, "Session driver started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut session = session.lock();
                        if session.is_being_destroyed() {
                            debug!("Session destroyed, driver exiting");
                            break;
                        }
                        dispatched += session.pump(Instant::now().into_std()) as u64;
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!(dispatched, "Session driver stopped");
            dispatched
        });

        Self { shutdown, task }
    }

    /// Whether the pump loop has exited on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop pumping; returns how many events were dispatched in total
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                warn!(error = %e, "Session driver task failed");
                0
            }
        }
    }
}
