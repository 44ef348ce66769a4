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

//! Leveled diagnostics for the client internals.
//!
//! The default sink forwards into the [`log`] facade, so applications that
//! already run `env_logger` or similar see the client's output with no
//! extra wiring. Both the level and the sink are process-wide; changing
//! them after the first session is undefined as an API contract.

use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;

/// Verbosity threshold. Each level includes everything to its right:
/// `Verbose` ⊇ `Debug` ⊇ `Error`; `Silent` suppresses all output.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
  Verbose = 0,
  Debug = 1,
  Error = 2,
  Silent = 3,
}

/// Destination for client diagnostics.
pub trait LogSink: Send + Sync {
  fn verbose(&self, tag: &str, message: &str);
  fn debug(&self, tag: &str, message: &str);
  fn error(&self, tag: &str, message: &str);
  /// Receives error values with their source chain, the fourth entry point
  /// next to the three message levels.
  fn stacktrace(&self, tag: &str, error: &(dyn std::error::Error + 'static));
}

struct LogFacade;

impl LogSink for LogFacade {
  fn verbose(&self, tag: &str, message: &str) {
    log::trace!(target: "tether", "[{tag}] {message}");
  }

  fn debug(&self, tag: &str, message: &str) {
    log::debug!(target: "tether", "[{tag}] {message}");
  }

  fn error(&self, tag: &str, message: &str) {
    log::error!(target: "tether", "[{tag}] {message}");
  }

  fn stacktrace(&self, tag: &str, error: &(dyn std::error::Error + 'static)) {
    log::error!(target: "tether", "[{tag}] {error}");
    let mut source = error.source();
    while let Some(cause) = source {
      log::error!(target: "tether", "[{tag}]   caused by: {cause}");
      source = cause.source();
    }
  }
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Error as u8);
static SINK: RwLock<Option<Arc<dyn LogSink>>> = RwLock::new(None);

/// Sets the process-wide verbosity. Default: [`LogLevel::Error`].
pub fn set_level(level: LogLevel) {
  LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> LogLevel {
  match LEVEL.load(Ordering::Relaxed) {
    0 => LogLevel::Verbose,
    1 => LogLevel::Debug,
    2 => LogLevel::Error,
    _ => LogLevel::Silent,
  }
}

/// Replaces the process-wide sink. Default: the [`log`] facade.
pub fn set_sink(sink: Arc<dyn LogSink>) {
  *SINK.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
}

fn with_sink(f: impl FnOnce(&dyn LogSink)) {
  let guard = SINK.read().unwrap_or_else(|e| e.into_inner());
  match guard.as_deref() {
    Some(sink) => f(sink),
    None => f(&LogFacade),
  }
}

pub(crate) fn v(tag: &str, message: &str) {
  if level() <= LogLevel::Verbose {
    with_sink(|sink| sink.verbose(tag, message));
  }
}

pub(crate) fn d(tag: &str, message: &str) {
  if level() <= LogLevel::Debug {
    with_sink(|sink| sink.debug(tag, message));
  }
}

pub(crate) fn e(tag: &str, message: &str) {
  if level() <= LogLevel::Error {
    with_sink(|sink| sink.error(tag, message));
  }
}

pub(crate) fn stacktrace(
  tag: &str,
  error: &(dyn std::error::Error + 'static),
) {
  if level() <= LogLevel::Error {
    with_sink(|sink| sink.stacktrace(tag, error));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  #[derive(Default)]
  struct Counter {
    verbose: AtomicUsize,
    debug: AtomicUsize,
    error: AtomicUsize,
    stacktrace: AtomicUsize,
  }

  // Only counts the "test" tag: other tests in this binary may log
  // concurrently through the process-wide sink.
  impl LogSink for Counter {
    fn verbose(&self, tag: &str, _: &str) {
      if tag == "test" {
        self.verbose.fetch_add(1, Ordering::Relaxed);
      }
    }
    fn debug(&self, tag: &str, _: &str) {
      if tag == "test" {
        self.debug.fetch_add(1, Ordering::Relaxed);
      }
    }
    fn error(&self, tag: &str, _: &str) {
      if tag == "test" {
        self.error.fetch_add(1, Ordering::Relaxed);
      }
    }
    fn stacktrace(&self, tag: &str, _: &(dyn std::error::Error + 'static)) {
      if tag == "test" {
        self.stacktrace.fetch_add(1, Ordering::Relaxed);
      }
    }
  }

  impl Counter {
    fn total(&self) -> usize {
      self.verbose.load(Ordering::Relaxed)
        + self.debug.load(Ordering::Relaxed)
        + self.error.load(Ordering::Relaxed)
        + self.stacktrace.load(Ordering::Relaxed)
    }
  }

  fn emit_all() {
    let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
    v("test", "verbose");
    d("test", "debug");
    e("test", "error");
    stacktrace("test", &err);
  }

  // Level and sink are process-wide, so the scenarios run in one test to
  // keep them from racing each other under the parallel test runner.
  #[test]
  fn levels_gate_the_four_entry_points() {
    let counter = Arc::new(Counter::default());
    set_sink(counter.clone());

    set_level(LogLevel::Silent);
    emit_all();
    assert_eq!(counter.total(), 0);

    set_level(LogLevel::Error);
    emit_all();
    assert_eq!(counter.total(), 2);
    assert_eq!(counter.error.load(Ordering::Relaxed), 1);
    assert_eq!(counter.stacktrace.load(Ordering::Relaxed), 1);

    set_level(LogLevel::Verbose);
    emit_all();
    assert_eq!(counter.total(), 6);
    assert_eq!(counter.verbose.load(Ordering::Relaxed), 1);
    assert_eq!(counter.debug.load(Ordering::Relaxed), 1);

    set_level(LogLevel::Silent);
  }
}
