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

/// Status code used to indicate why an endpoint is closing the connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CloseCode {
  /// Indicates a normal closure, meaning that the purpose for
  /// which the connection was established has been fulfilled.
  Normal,
  /// Indicates that an endpoint is "going away", such as a server
  /// going down or a browser having navigated away from a page.
  Away,
  /// Indicates that an endpoint is terminating the connection due
  /// to a protocol error.
  Protocol,
  /// Indicates that an endpoint is terminating the connection
  /// because it has received a type of data it cannot accept.
  Unsupported,
  /// Indicates that no status code was included in a closing frame.
  Status,
  /// Indicates an abnormal closure. The connection was dropped without a
  /// close frame; this code is never put on the wire.
  Abnormal,
  /// Indicates that an endpoint is terminating the connection
  /// because it has received data within a message that was not
  /// consistent with the type of the message.
  Invalid,
  /// Indicates that an endpoint is terminating the connection
  /// because it has received a message that violates its policy.
  Policy,
  /// Indicates that an endpoint is terminating the connection
  /// because it has received a message that is too big for it to process.
  MessageTooBig,
  /// Indicates that an endpoint (client) is terminating the
  /// connection because it has expected the server to negotiate one or
  /// more extension, but the server didn't return them in the response
  /// message of the WebSocket handshake.
  Extension,
  /// Indicates that a server is terminating the connection because
  /// it encountered an unexpected condition that prevented it from
  /// fulfilling the request.
  Error,
  /// Indicates that the server is restarting.
  Restart,
  /// Indicates that the server is overloaded and the client should
  /// either connect to a different IP, or reconnect to the same IP
  /// when a user has performed an action.
  Again,
  #[doc(hidden)]
  Tls,
  #[doc(hidden)]
  Reserved(u16),
  #[doc(hidden)]
  Iana(u16),
  #[doc(hidden)]
  Library(u16),
  #[doc(hidden)]
  Bad(u16),
}

impl CloseCode {
  /// Whether the code is allowed to appear in a close frame on the wire.
  pub fn is_allowed(self) -> bool {
    !matches!(
      self,
      CloseCode::Bad(_)
        | CloseCode::Reserved(_)
        | CloseCode::Status
        | CloseCode::Abnormal
        | CloseCode::Tls
    )
  }
}

impl From<CloseCode> for u16 {
  fn from(code: CloseCode) -> u16 {
    match code {
      CloseCode::Normal => 1000,
      CloseCode::Away => 1001,
      CloseCode::Protocol => 1002,
      CloseCode::Unsupported => 1003,
      CloseCode::Status => 1005,
      CloseCode::Abnormal => 1006,
      CloseCode::Invalid => 1007,
      CloseCode::Policy => 1008,
      CloseCode::MessageTooBig => 1009,
      CloseCode::Extension => 1010,
      CloseCode::Error => 1011,
      CloseCode::Restart => 1012,
      CloseCode::Again => 1013,
      CloseCode::Tls => 1015,
      CloseCode::Reserved(code) => code,
      CloseCode::Iana(code) => code,
      CloseCode::Library(code) => code,
      CloseCode::Bad(code) => code,
    }
  }
}

impl From<u16> for CloseCode {
  fn from(code: u16) -> CloseCode {
    match code {
      1000 => CloseCode::Normal,
      1001 => CloseCode::Away,
      1002 => CloseCode::Protocol,
      1003 => CloseCode::Unsupported,
      1005 => CloseCode::Status,
      1006 => CloseCode::Abnormal,
      1007 => CloseCode::Invalid,
      1008 => CloseCode::Policy,
      1009 => CloseCode::MessageTooBig,
      1010 => CloseCode::Extension,
      1011 => CloseCode::Error,
      1012 => CloseCode::Restart,
      1013 => CloseCode::Again,
      1015 => CloseCode::Tls,
      1016..=2999 => CloseCode::Reserved(code),
      3000..=3999 => CloseCode::Iana(code),
      4000..=4999 => CloseCode::Library(code),
      _ => CloseCode::Bad(code),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trip() {
    for raw in [1000u16, 1001, 1002, 1003, 1007, 1008, 1009, 1010, 1011] {
      let code = CloseCode::from(raw);
      assert_eq!(u16::from(code), raw);
      assert!(code.is_allowed());
    }
  }

  #[test]
  fn internal_codes_are_not_sendable() {
    assert!(!CloseCode::Abnormal.is_allowed());
    assert!(!CloseCode::Status.is_allowed());
    assert!(!CloseCode::from(1004).is_allowed());
  }
}
