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

use std::sync::Arc;
use std::time::Duration;

use crate::extension::ExtensionConfig;
use crate::handshake::HandshakeHook;

/// Per-session options, applied when the session is opened.
#[derive(Clone)]
pub struct SessionConfig {
  /// Subprotocols to offer, in preference order.
  pub protocols: Vec<String>,
  /// Extensions to offer, in negotiation order.
  pub extensions: Vec<Arc<dyn ExtensionConfig>>,
  /// Inbound frames (and reassembled messages) larger than this are
  /// rejected with a 1009 close. Default: 64 MiB.
  pub max_response_payload_size: usize,
  /// Extra headers appended to the opening request.
  pub extra_headers: Vec<(String, String)>,
  /// Optional application check of the validated handshake response.
  pub handshake_hook: Option<HandshakeHook>,
  /// Covers TCP connect plus the whole opening handshake.
  pub open_timeout: Duration,
  /// How long to wait for the server's close reply before dropping the
  /// socket.
  pub close_grace_period: Duration,
  /// Outbound messages larger than this are fragmented. `None` sends
  /// every message as a single frame.
  pub fragment_size: Option<usize>,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      protocols: Vec::new(),
      extensions: Vec::new(),
      max_response_payload_size: 64 << 20,
      extra_headers: Vec::new(),
      handshake_hook: None,
      open_timeout: Duration::from_secs(10),
      close_grace_period: Duration::from_secs(5),
      fragment_size: None,
    }
  }
}
