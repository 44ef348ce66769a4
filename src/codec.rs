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

use bytes::Buf;
use bytes::BytesMut;

use crate::error::WebSocketError;
use crate::extension::Extension;
use crate::frame::is_control;
use crate::frame::Frame;
use crate::frame::OpCode;
use crate::frame::MAX_CONTROL_PAYLOAD;
use crate::random;

/// Incremental frame parser over the inbound byte stream.
///
/// `decode` consumes complete frames from the front of the buffer and
/// returns `None` when more bytes are needed. Chunk boundaries are
/// arbitrary: the caller appends whatever the socket produced and retries.
pub(crate) struct FrameDecoder {
  /// Inbound frames larger than this are rejected before their payload is
  /// buffered.
  pub max_payload_size: usize,
  /// Reserved bits claimed by negotiated extensions, as `0b_rsv1_rsv2_rsv3`.
  pub allowed_rsv: u8,
}

impl FrameDecoder {
  pub fn new(max_payload_size: usize, allowed_rsv: u8) -> Self {
    Self {
      max_payload_size,
      allowed_rsv,
    }
  }

  pub fn decode(
    &self,
    buf: &mut BytesMut,
  ) -> Result<Option<Frame>, WebSocketError> {
    if buf.len() < 2 {
      return Ok(None);
    }

    let fin = buf[0] & 0b10000000 != 0;
    let rsv = (buf[0] >> 4) & 0b0111;
    if rsv & !self.allowed_rsv != 0 {
      return Err(WebSocketError::ReservedBitsNotZero);
    }

    let opcode = OpCode::try_from(buf[0] & 0b00001111)?;
    if is_control(opcode) {
      if !fin {
        return Err(WebSocketError::ControlFrameFragmented);
      }
      if rsv != 0 {
        return Err(WebSocketError::ReservedBitsNotZero);
      }
    }

    // Frames from the server must not be masked.
    if buf[1] & 0b10000000 != 0 {
      return Err(WebSocketError::MaskedServerFrame);
    }

    let length_code = buf[1] & 0x7F;
    let extra = match length_code {
      126 => 2,
      127 => 8,
      _ => 0,
    };

    let header_size = 2 + extra;
    if buf.len() < header_size {
      return Ok(None);
    }

    let payload_len: usize = match extra {
      0 => usize::from(length_code),
      2 => u16::from_be_bytes([buf[2], buf[3]]) as usize,
      _ => {
        let mut be_bytes = [0u8; 8];
        be_bytes.copy_from_slice(&buf[2..10]);
        match usize::try_from(u64::from_be_bytes(be_bytes)) {
          Ok(len) => len,
          Err(_) => return Err(WebSocketError::FrameTooLarge(usize::MAX)),
        }
      }
    };

    if is_control(opcode) && payload_len > MAX_CONTROL_PAYLOAD {
      return Err(WebSocketError::ControlFrameTooLarge);
    }
    if payload_len > self.max_payload_size {
      return Err(WebSocketError::FrameTooLarge(payload_len));
    }

    if buf.len() < header_size + payload_len {
      return Ok(None);
    }

    buf.advance(header_size);
    let payload = buf.split_to(payload_len).to_vec();

    let mut frame = Frame::new(fin, opcode, payload);
    frame.rsv1 = rsv & 0b100 != 0;
    frame.rsv2 = rsv & 0b010 != 0;
    frame.rsv3 = rsv & 0b001 != 0;
    Ok(Some(frame))
  }
}

/// Builds the wire bytes of outbound messages.
///
/// Extensions run in negotiation order and may claim rsv1 for the message;
/// the payload is then split into fragments, each masked with a fresh key.
/// Every call returns the bytes of the whole message so the session can
/// enqueue a multi-fragment send as one atomic write.
pub(crate) struct FrameEncoder {
  pub extensions: Vec<Box<dyn Extension>>,
  pub fragment_size: Option<usize>,
}

impl FrameEncoder {
  pub fn new(
    extensions: Vec<Box<dyn Extension>>,
    fragment_size: Option<usize>,
  ) -> Self {
    Self {
      extensions,
      fragment_size,
    }
  }

  /// Reserved bits inbound frames are allowed to carry.
  pub fn allowed_rsv(&self) -> u8 {
    self
      .extensions
      .iter()
      .fold(0, |bits, ext| bits | ext.reserved_bits())
  }

  /// Applies receive transforms in reverse negotiation order.
  pub fn decode_message(
    &mut self,
    payload: &mut Vec<u8>,
    rsv1: bool,
  ) -> Result<(), WebSocketError> {
    for ext in self.extensions.iter_mut().rev() {
      ext.decode(payload, rsv1)?;
    }
    Ok(())
  }

  pub fn encode_message(
    &mut self,
    opcode: OpCode,
    mut payload: Vec<u8>,
  ) -> Result<Vec<u8>, WebSocketError> {
    debug_assert!(!is_control(opcode));
    let mut rsv1 = false;
    for ext in self.extensions.iter_mut() {
      rsv1 |= ext.encode(&mut payload)?;
    }

    let fragment_size = self.fragment_size.unwrap_or(usize::MAX).max(1);
    let total = payload.len();
    let mut out = Vec::with_capacity(total + 16);
    let mut offset = 0usize;
    let mut index = 0usize;
    loop {
      let end = offset.saturating_add(fragment_size).min(total);
      let fin = end == total;
      let mut frame = Frame::new(
        fin,
        if index == 0 { opcode } else { OpCode::Continuation },
        payload[offset..end].to_vec(),
      );
      frame.rsv1 = rsv1 && index == 0;
      frame.encode_masked(random::mask_key(), &mut out);
      if fin {
        break;
      }
      offset = end;
      index += 1;
    }
    Ok(out)
  }

  /// Encodes one explicit fragment for the partial-message writer.
  ///
  /// Partial messages bypass extensions: the transforms operate on whole
  /// message payloads, which a fragment stream does not have up front.
  pub fn encode_fragment(
    &self,
    opcode: OpCode,
    fin: bool,
    payload: Vec<u8>,
  ) -> Vec<u8> {
    let frame = Frame::new(fin, opcode, payload);
    let mut out = Vec::with_capacity(frame.payload.len() + 16);
    frame.encode_masked(random::mask_key(), &mut out);
    out
  }

  pub fn encode_control(
    &self,
    opcode: OpCode,
    payload: Vec<u8>,
  ) -> Result<Vec<u8>, WebSocketError> {
    debug_assert!(is_control(opcode));
    if payload.len() > MAX_CONTROL_PAYLOAD {
      return Err(WebSocketError::ControlFrameTooLarge);
    }
    let frame = Frame::new(true, opcode, payload);
    let mut out = Vec::with_capacity(frame.payload.len() + 8);
    frame.encode_masked(random::mask_key(), &mut out);
    Ok(out)
  }
}
