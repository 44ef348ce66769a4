// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Task supervision over the tokio runtime.
//!
//! Readiness selection itself is tokio's I/O driver; this layer adds what
//! the sessions need on top: tracked spawning so shutdown can wait for
//! every connection task, one-shot timers with cancellation, and an alive
//! flag that makes work submitted after shutdown disappear silently.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::logging as wslog;

const TAG: &str = "reactor";

pub(crate) struct Reactor {
  handle: tokio::runtime::Handle,
  tracker: TaskTracker,
  shutdown: CancellationToken,
  alive: AtomicBool,
}

impl Reactor {
  /// Must be called from within a tokio runtime; connection tasks are
  /// spawned onto it.
  pub fn new() -> Self {
    Self {
      handle: tokio::runtime::Handle::current(),
      tracker: TaskTracker::new(),
      shutdown: CancellationToken::new(),
      alive: AtomicBool::new(true),
    }
  }

  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::Acquire)
  }

  /// A token cancelled when the reactor shuts down; sessions derive their
  /// own cancellation from it.
  pub fn child_token(&self) -> CancellationToken {
    self.shutdown.child_token()
  }

  /// Runs a task on the runtime. Dropped silently once shutdown started.
  pub fn submit<F>(&self, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    if !self.is_alive() {
      wslog::v(TAG, "task dropped: reactor destroyed");
      return;
    }
    self.tracker.spawn_on(task, &self.handle);
  }

  /// Runs `task` once after `delay`, unless cancelled first. Shutdown
  /// cancels every pending timer.
  pub fn schedule(
    &self,
    delay: Duration,
    task: impl FnOnce() + Send + 'static,
  ) -> Scheduled {
    let token = self.shutdown.child_token();
    let scheduled = Scheduled {
      token: token.clone(),
    };
    if !self.is_alive() {
      return scheduled;
    }
    self.tracker.spawn_on(
      async move {
        tokio::select! {
          _ = token.cancelled() => {}
          _ = tokio::time::sleep(delay) => task(),
        }
      },
      &self.handle,
    );
    scheduled
  }

  /// Idempotent. Cancels all sessions and timers, then waits until every
  /// tracked task has exited; afterwards no more work runs here.
  pub async fn destroy(&self) {
    if self.alive.swap(false, Ordering::AcqRel) {
      wslog::d(TAG, "shutting down");
      self.shutdown.cancel();
    }
    self.tracker.close();
    self.tracker.wait().await;
  }
}

/// Cancellation handle for a scheduled task. Cancelling after the task ran
/// (or cancelling twice) is a no-op.
pub(crate) struct Scheduled {
  token: CancellationToken,
}

impl Scheduled {
  pub fn cancel(&self) {
    self.token.cancel();
  }
}
