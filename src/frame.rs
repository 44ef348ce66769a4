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

use crate::error::WebSocketError;
use crate::mask::unmask;

/// Maximum payload of a control frame (RFC 6455 §5.5).
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Maximum close reason length: control payload minus the 2-byte status code.
pub const MAX_CLOSE_REASON: usize = MAX_CONTROL_PAYLOAD - 2;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
  Continuation = 0x0,
  Text = 0x1,
  Binary = 0x2,
  Close = 0x8,
  Ping = 0x9,
  Pong = 0xA,
}

#[inline]
pub fn is_control(opcode: OpCode) -> bool {
  matches!(opcode, OpCode::Close | OpCode::Ping | OpCode::Pong)
}

impl TryFrom<u8> for OpCode {
  type Error = WebSocketError;

  #[inline]
  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0x0 => Ok(OpCode::Continuation),
      0x1 => Ok(OpCode::Text),
      0x2 => Ok(OpCode::Binary),
      0x8 => Ok(OpCode::Close),
      0x9 => Ok(OpCode::Ping),
      0xA => Ok(OpCode::Pong),
      _ => Err(WebSocketError::InvalidOpCode(value)),
    }
  }
}

/// A single WebSocket frame with an owned payload.
///
/// Payloads are owned because frames cross task boundaries: they travel
/// from the session to the connection write queue, and from the read loop
/// to the message assembler.
#[derive(Debug)]
pub struct Frame {
  pub fin: bool,
  pub rsv1: bool,
  pub rsv2: bool,
  pub rsv3: bool,
  pub opcode: OpCode,
  pub payload: Vec<u8>,
}

impl Frame {
  pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
    Self {
      fin,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode,
      payload,
    }
  }

  pub fn text(payload: Vec<u8>) -> Self {
    Self::new(true, OpCode::Text, payload)
  }

  pub fn binary(payload: Vec<u8>) -> Self {
    Self::new(true, OpCode::Binary, payload)
  }

  pub fn ping(payload: Vec<u8>) -> Self {
    Self::new(true, OpCode::Ping, payload)
  }

  pub fn pong(payload: Vec<u8>) -> Self {
    Self::new(true, OpCode::Pong, payload)
  }

  /// A close frame carrying `code` and as much of `reason` as fits.
  ///
  /// The reason is truncated on a character boundary so that the payload
  /// never exceeds 125 bytes.
  pub fn close(code: u16, reason: &str) -> Self {
    Self::new(true, OpCode::Close, close_payload(code, reason))
  }

  /// A close frame echoing a raw payload, e.g. the one the peer sent.
  pub fn close_raw(payload: Vec<u8>) -> Self {
    Self::new(true, OpCode::Close, payload)
  }

  #[inline]
  pub fn is_control(&self) -> bool {
    is_control(self.opcode)
  }

  pub fn is_utf8(&self) -> bool {
    #[cfg(feature = "simd")]
    return simdutf8::basic::from_utf8(&self.payload).is_ok();

    #[cfg(not(feature = "simd"))]
    return std::str::from_utf8(&self.payload).is_ok();
  }

  /// Serializes the frame into `out`, masking the payload with `mask`.
  ///
  /// Client frames are always masked; the mask key is drawn by the caller
  /// so that encoding stays deterministic under a seeded RNG.
  pub fn encode_masked(&self, mask: [u8; 4], out: &mut Vec<u8>) {
    self.encode_head(true, out);
    out.extend_from_slice(&mask);
    let start = out.len();
    out.extend_from_slice(&self.payload);
    unmask(&mut out[start..], mask);
  }

  fn encode_head(&self, masked: bool, out: &mut Vec<u8>) {
    let mut b0 = (self.fin as u8) << 7 | self.opcode as u8;
    b0 |= (self.rsv1 as u8) << 6 | (self.rsv2 as u8) << 5 | (self.rsv3 as u8) << 4;
    out.push(b0);

    let mask_bit = (masked as u8) << 7;
    let len = self.payload.len();
    if len <= 125 {
      out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
      out.push(mask_bit | 126);
      out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
      out.push(mask_bit | 127);
      out.extend_from_slice(&(len as u64).to_be_bytes());
    }
  }
}

/// Builds a close payload: 2-byte big-endian code plus a UTF-8 reason
/// truncated to [`MAX_CLOSE_REASON`] bytes on a character boundary.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
  let mut cut = reason.len().min(MAX_CLOSE_REASON);
  while !reason.is_char_boundary(cut) {
    cut -= 1;
  }
  let mut payload = Vec::with_capacity(2 + cut);
  payload.extend_from_slice(&code.to_be_bytes());
  payload.extend_from_slice(&reason.as_bytes()[..cut]);
  payload
}

/// Splits a close payload into its code and reason.
///
/// An empty payload means no status was given; a 1-byte payload is invalid.
pub fn parse_close_payload(
  payload: &[u8],
) -> Result<(u16, String), WebSocketError> {
  match payload.len() {
    0 => Ok((1005, String::new())),
    1 => Err(WebSocketError::InvalidCloseFrame),
    _ => {
      let code = u16::from_be_bytes([payload[0], payload[1]]);
      let reason = std::str::from_utf8(&payload[2..])
        .map_err(|_| WebSocketError::InvalidUTF8)?;
      Ok((code, reason.to_owned()))
    }
  }
}
