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

use crate::close::CloseCode;
use crate::session::Session;

/// Callbacks a session delivers to the application.
///
/// All methods for one session run on that session's dispatch task, in
/// on-the-wire order. They must not block: a stalled callback stalls the
/// session's inbound stream (other sessions are unaffected). Long work
/// belongs on the application's own executor.
///
/// Every method has a default no-op implementation, so a handler only
/// implements the events it cares about.
pub trait Handler: Send + Sync + 'static {
  /// The handshake completed and the session is open.
  fn on_connected(&self, session: &Session) {
    let _ = session;
  }

  /// A complete text message arrived; the payload is valid UTF-8.
  fn on_text(&self, text: String) {
    let _ = text;
  }

  /// A complete binary message arrived.
  fn on_binary(&self, payload: Vec<u8>) {
    let _ = payload;
  }

  /// A ping arrived. The pong reply has already been queued.
  fn on_ping(&self, payload: &[u8]) {
    let _ = payload;
  }

  /// A pong arrived; any armed ping deadline has been cancelled.
  fn on_pong(&self, payload: &[u8]) {
    let _ = payload;
  }

  /// The connection is gone. Fires exactly once per session, whether the
  /// close was negotiated, forced locally, or the transport failed.
  fn on_closed(&self, code: CloseCode, reason: &str) {
    let _ = (code, reason);
  }
}
