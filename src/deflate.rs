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

//! permessage-deflate (RFC 7692): raw DEFLATE over whole message payloads,
//! signalled by rsv1 on the first frame of a message.

use flate2::Compress;
use flate2::Compression;
use flate2::Decompress;
use flate2::FlushCompress;
use flate2::FlushDecompress;
use flate2::Status;

use crate::error::WebSocketError;
use crate::extension::Extension;
use crate::extension::ExtensionConfig;
use crate::extension::Param;

pub const EXTENSION_NAME: &str = "permessage-deflate";

/// The empty stored block a sync flush appends; stripped from compressed
/// payloads on send and restored before inflating (RFC 7692 §7.2.1).
const SYNC_FLUSH_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

const PARAM_SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const PARAM_CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const PARAM_SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";
const PARAM_CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";

/// Offer configuration for permessage-deflate.
///
/// Window bits outside `8..=15` are rejected when the offer is built, not
/// at handshake time.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
  client_no_context_takeover: bool,
  server_no_context_takeover: bool,
  client_max_window_bits: u8,
  server_max_window_bits: Option<u8>,
  min_size_in_bytes: usize,
  max_inflated_size: usize,
}

impl Default for DeflateConfig {
  fn default() -> Self {
    Self {
      client_no_context_takeover: false,
      server_no_context_takeover: false,
      client_max_window_bits: 15,
      server_max_window_bits: None,
      min_size_in_bytes: 0,
      max_inflated_size: 64 << 20,
    }
  }
}

impl DeflateConfig {
  pub fn new() -> Self {
    Self::default()
  }

  /// Asks the server to reset its compression context after every message.
  pub fn server_no_context_takeover(mut self, on: bool) -> Self {
    self.server_no_context_takeover = on;
    self
  }

  /// Resets our compression context after every message.
  pub fn client_no_context_takeover(mut self, on: bool) -> Self {
    self.client_no_context_takeover = on;
    self
  }

  /// LZ77 window our compressor may use.
  pub fn client_max_window_bits(
    mut self,
    bits: u8,
  ) -> Result<Self, WebSocketError> {
    if !(8..=15).contains(&bits) {
      return Err(WebSocketError::InvalidWindowBits(bits));
    }
    self.client_max_window_bits = bits;
    Ok(self)
  }

  /// LZ77 window we ask the server to limit itself to.
  pub fn server_max_window_bits(
    mut self,
    bits: u8,
  ) -> Result<Self, WebSocketError> {
    if !(8..=15).contains(&bits) {
      return Err(WebSocketError::InvalidWindowBits(bits));
    }
    self.server_max_window_bits = Some(bits);
    Ok(self)
  }

  /// Messages smaller than this are sent uncompressed. Default: 0.
  pub fn min_size_in_bytes(mut self, size: usize) -> Self {
    self.min_size_in_bytes = size;
    self
  }

  /// Upper bound on the inflated size of a single message. Default: 64 MiB.
  pub fn max_inflated_size(mut self, size: usize) -> Self {
    self.max_inflated_size = size;
    self
  }
}

impl ExtensionConfig for DeflateConfig {
  fn name(&self) -> &str {
    EXTENSION_NAME
  }

  fn offer(&self) -> String {
    let mut offer = String::from(EXTENSION_NAME);
    if self.client_max_window_bits < 15 {
      offer.push_str("; client_max_window_bits=");
      offer.push_str(&self.client_max_window_bits.to_string());
    } else {
      offer.push_str("; client_max_window_bits");
    }
    if let Some(bits) = self.server_max_window_bits {
      offer.push_str("; server_max_window_bits=");
      offer.push_str(&bits.to_string());
    }
    if self.client_no_context_takeover {
      offer.push_str("; client_no_context_takeover");
    }
    if self.server_no_context_takeover {
      offer.push_str("; server_no_context_takeover");
    }
    offer
  }

  fn negotiate(
    &self,
    params: &[Param],
  ) -> Result<Box<dyn Extension>, WebSocketError> {
    let mut client_no_context_takeover = self.client_no_context_takeover;
    let mut server_no_context_takeover = self.server_no_context_takeover;
    let mut client_bits = self.client_max_window_bits;

    for param in params {
      match param.name.as_str() {
        PARAM_SERVER_NO_CONTEXT_TAKEOVER => server_no_context_takeover = true,
        PARAM_CLIENT_NO_CONTEXT_TAKEOVER => client_no_context_takeover = true,
        PARAM_SERVER_MAX_WINDOW_BITS => {
          // The server states the window it will compress with; inflating
          // with a full window accepts any stream at or below it.
          parse_window_bits(param)?;
        }
        PARAM_CLIENT_MAX_WINDOW_BITS => {
          let bits = parse_window_bits(param)?;
          client_bits = client_bits.min(bits);
        }
        _ => {
          return Err(WebSocketError::InvalidExtensionParameter(
            param.name.clone(),
          ))
        }
      }
    }

    Ok(Box::new(PerMessageDeflate {
      // zlib cannot emit a raw stream with an 8-bit window; it bumps the
      // window to 9 internally, so request 9 outright.
      compress: Compress::new_with_window_bits(
        Compression::default(),
        false,
        client_bits.max(9),
      ),
      decompress: Decompress::new_with_window_bits(false, 15),
      client_no_context_takeover,
      server_no_context_takeover,
      min_size_in_bytes: self.min_size_in_bytes,
      max_inflated_size: self.max_inflated_size,
      params: params.to_vec(),
    }))
  }
}

fn parse_window_bits(param: &Param) -> Result<u8, WebSocketError> {
  let bits: u8 = param
    .value
    .as_deref()
    .and_then(|v| v.parse().ok())
    .ok_or_else(|| {
      WebSocketError::InvalidExtensionParameter(param.name.clone())
    })?;
  if !(8..=15).contains(&bits) {
    return Err(WebSocketError::InvalidWindowBits(bits));
  }
  Ok(bits)
}

/// Negotiated permessage-deflate instance. Holds the sliding-window state
/// of both directions for the lifetime of the session.
pub struct PerMessageDeflate {
  compress: Compress,
  decompress: Decompress,
  client_no_context_takeover: bool,
  server_no_context_takeover: bool,
  min_size_in_bytes: usize,
  max_inflated_size: usize,
  params: Vec<Param>,
}

impl PerMessageDeflate {
  fn deflate(&mut self, input: &[u8]) -> Result<Vec<u8>, WebSocketError> {
    let mut out = Vec::with_capacity(input.len() / 2 + 64);
    let mut read = 0usize;
    loop {
      if out.len() == out.capacity() {
        out.reserve(out.capacity().max(64));
      }
      let consumed_before = self.compress.total_in();
      self
        .compress
        .compress_vec(&input[read..], &mut out, FlushCompress::Sync)
        .map_err(|_| WebSocketError::InvalidEncoding)?;
      read += (self.compress.total_in() - consumed_before) as usize;
      if read >= input.len() && out.len() < out.capacity() {
        break;
      }
    }
    if out.ends_with(&SYNC_FLUSH_TAIL) {
      out.truncate(out.len() - SYNC_FLUSH_TAIL.len());
    }
    Ok(out)
  }

  fn inflate(&mut self, input: &[u8]) -> Result<Vec<u8>, WebSocketError> {
    let mut data = Vec::with_capacity(input.len() + SYNC_FLUSH_TAIL.len());
    data.extend_from_slice(input);
    data.extend_from_slice(&SYNC_FLUSH_TAIL);

    let mut out = Vec::with_capacity((input.len() * 2).max(256));
    let mut read = 0usize;
    loop {
      if out.len() == out.capacity() {
        out.reserve(out.capacity().max(4096));
      }
      let consumed_before = self.decompress.total_in();
      let status = self
        .decompress
        .decompress_vec(&data[read..], &mut out, FlushDecompress::Sync)
        .map_err(|_| WebSocketError::InvalidEncoding)?;
      read += (self.decompress.total_in() - consumed_before) as usize;
      if out.len() > self.max_inflated_size {
        return Err(WebSocketError::FrameTooLarge(out.len()));
      }
      match status {
        Status::StreamEnd => break,
        _ => {
          if read >= data.len() && out.len() < out.capacity() {
            break;
          }
        }
      }
    }
    Ok(out)
  }
}

impl Extension for PerMessageDeflate {
  fn name(&self) -> &str {
    EXTENSION_NAME
  }

  fn params(&self) -> &[Param] {
    &self.params
  }

  fn reserved_bits(&self) -> u8 {
    0b100
  }

  fn encode(&mut self, payload: &mut Vec<u8>) -> Result<bool, WebSocketError> {
    if payload.len() < self.min_size_in_bytes {
      return Ok(false);
    }
    *payload = self.deflate(payload)?;
    if self.client_no_context_takeover {
      self.compress.reset();
    }
    Ok(true)
  }

  fn decode(
    &mut self,
    payload: &mut Vec<u8>,
    rsv1: bool,
  ) -> Result<(), WebSocketError> {
    if !rsv1 {
      return Ok(());
    }
    *payload = self.inflate(payload)?;
    if self.server_no_context_takeover {
      self.decompress.reset(false);
    }
    Ok(())
  }
}
