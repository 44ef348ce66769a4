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

//! Protocol extensions (RFC 6455 §9): payload transforms negotiated during
//! the opening handshake, keyed off the frame header's reserved bits.

use crate::error::WebSocketError;

/// A single `name[=value]` parameter of an extension token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
  pub name: String,
  pub value: Option<String>,
}

impl Param {
  pub fn flag(name: &str) -> Self {
    Self {
      name: name.to_owned(),
      value: None,
    }
  }

  pub fn with_value(name: &str, value: &str) -> Self {
    Self {
      name: name.to_owned(),
      value: Some(value.to_owned()),
    }
  }
}

/// One `extension-name; k=v; …` token from a `Sec-WebSocket-Extensions`
/// header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionToken {
  pub name: String,
  pub params: Vec<Param>,
}

/// Parses a `Sec-WebSocket-Extensions` header value into its tokens.
///
/// Grammar handled: comma-separated tokens, each `name[;k[=v];…]`, with
/// optional whitespace and optionally quoted parameter values.
pub fn parse_extensions_header(
  value: &str,
) -> Result<Vec<ExtensionToken>, WebSocketError> {
  let mut tokens = Vec::new();
  for entry in value.split(',') {
    let entry = entry.trim();
    if entry.is_empty() {
      continue;
    }
    let mut parts = entry.split(';');
    let name = match parts.next().map(str::trim) {
      Some(name) if !name.is_empty() => name.to_owned(),
      _ => {
        return Err(WebSocketError::InvalidExtensionParameter(
          entry.to_owned(),
        ))
      }
    };
    let mut params = Vec::new();
    for part in parts {
      let part = part.trim();
      if part.is_empty() {
        return Err(WebSocketError::InvalidExtensionParameter(
          entry.to_owned(),
        ));
      }
      match part.split_once('=') {
        Some((k, v)) => {
          let v = v.trim().trim_matches('"');
          params.push(Param::with_value(k.trim(), v));
        }
        None => params.push(Param::flag(part)),
      }
    }
    tokens.push(ExtensionToken { name, params });
  }
  Ok(tokens)
}

/// A negotiated, per-session extension instance.
///
/// `encode` and `decode` transform whole message payloads in place; the
/// codec applies them after reassembly on receive and before fragmentation
/// on send. Instances may hold state across messages (e.g. a compression
/// context) and are owned by one session.
pub trait Extension: Send {
  fn name(&self) -> &str;

  /// Parameters the server confirmed for this session.
  fn params(&self) -> &[Param];

  /// Bitmask of reserved bits this extension claims, as `0b_rsv1_rsv2_rsv3`.
  /// Inbound frames may only set bits claimed by some negotiated extension.
  fn reserved_bits(&self) -> u8;

  /// Transforms an outbound message payload. Returns `true` when the first
  /// frame of the message must carry rsv1.
  fn encode(&mut self, payload: &mut Vec<u8>) -> Result<bool, WebSocketError>;

  /// Transforms a reassembled inbound message payload. `rsv1` is the bit
  /// from the message's first frame.
  fn decode(
    &mut self,
    payload: &mut Vec<u8>,
    rsv1: bool,
  ) -> Result<(), WebSocketError>;
}

/// An extension the client is willing to use, offered during the handshake.
pub trait ExtensionConfig: Send + Sync {
  /// Extension token name, e.g. `permessage-deflate`.
  fn name(&self) -> &str;

  /// The offer put on the wire in `Sec-WebSocket-Extensions`.
  fn offer(&self) -> String;

  /// Builds the session instance from the parameters the server accepted.
  fn negotiate(
    &self,
    params: &[Param],
  ) -> Result<Box<dyn Extension>, WebSocketError>;
}
