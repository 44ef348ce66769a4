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
use crate::frame::Frame;
use crate::frame::OpCode;

/// A reassembled data message, ready for extension decode and dispatch.
#[derive(Debug)]
pub(crate) struct Message {
  pub opcode: OpCode,
  /// rsv1 of the message's first frame; continuations must carry it clear.
  pub rsv1: bool,
  pub payload: Vec<u8>,
}

struct Partial {
  opcode: OpCode,
  rsv1: bool,
  payload: Vec<u8>,
}

/// Reassembles fragmented messages from non-control frames.
///
/// Control frames never pass through here; the read loop dispatches them
/// directly, so interleaved pings do not disturb assembly state.
pub(crate) struct MessageAssembler {
  max_message_size: usize,
  partial: Option<Partial>,
}

impl MessageAssembler {
  pub fn new(max_message_size: usize) -> Self {
    Self {
      max_message_size,
      partial: None,
    }
  }

  pub fn push(
    &mut self,
    frame: Frame,
  ) -> Result<Option<Message>, WebSocketError> {
    debug_assert!(!frame.is_control());
    match frame.opcode {
      OpCode::Text | OpCode::Binary => {
        if self.partial.is_some() {
          return Err(WebSocketError::MessageInProgress);
        }
        if frame.fin {
          return Ok(Some(Message {
            opcode: frame.opcode,
            rsv1: frame.rsv1,
            payload: frame.payload,
          }));
        }
        self.partial = Some(Partial {
          opcode: frame.opcode,
          rsv1: frame.rsv1,
          payload: frame.payload,
        });
        Ok(None)
      }
      OpCode::Continuation => {
        let Some(mut partial) = self.partial.take() else {
          return Err(WebSocketError::OrphanContinuation);
        };
        if frame.rsv1 {
          return Err(WebSocketError::ReservedBitsNotZero);
        }
        partial.payload.extend_from_slice(&frame.payload);
        if partial.payload.len() > self.max_message_size {
          return Err(WebSocketError::FrameTooLarge(partial.payload.len()));
        }
        if !frame.fin {
          self.partial = Some(partial);
          return Ok(None);
        }
        Ok(Some(Message {
          opcode: partial.opcode,
          rsv1: partial.rsv1,
          payload: partial.payload,
        }))
      }
      _ => unreachable!("control frame in message assembler"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn data_frame(fin: bool, opcode: OpCode, payload: &[u8]) -> Frame {
    Frame::new(fin, opcode, payload.to_vec())
  }

  #[test]
  fn single_frame_message() {
    let mut assembler = MessageAssembler::new(1024);
    let message = assembler
      .push(data_frame(true, OpCode::Text, b"hi"))
      .unwrap()
      .unwrap();
    assert_eq!(message.opcode, OpCode::Text);
    assert_eq!(message.payload, b"hi");
  }

  #[test]
  fn three_fragment_message() {
    let mut assembler = MessageAssembler::new(1024);
    assert!(assembler
      .push(data_frame(false, OpCode::Binary, b"ab"))
      .unwrap()
      .is_none());
    assert!(assembler
      .push(data_frame(false, OpCode::Continuation, b"cd"))
      .unwrap()
      .is_none());
    let message = assembler
      .push(data_frame(true, OpCode::Continuation, b"ef"))
      .unwrap()
      .unwrap();
    assert_eq!(message.opcode, OpCode::Binary);
    assert_eq!(message.payload, b"abcdef");
  }

  #[test]
  fn rsv1_is_taken_from_the_first_frame() {
    let mut assembler = MessageAssembler::new(1024);
    let mut first = data_frame(false, OpCode::Text, b"a");
    first.rsv1 = true;
    assembler.push(first).unwrap();
    let message = assembler
      .push(data_frame(true, OpCode::Continuation, b"b"))
      .unwrap()
      .unwrap();
    assert!(message.rsv1);
  }

  #[test]
  fn rejects_rsv1_on_continuation() {
    let mut assembler = MessageAssembler::new(1024);
    assembler
      .push(data_frame(false, OpCode::Text, b"a"))
      .unwrap();
    let mut cont = data_frame(true, OpCode::Continuation, b"b");
    cont.rsv1 = true;
    assert!(matches!(
      assembler.push(cont),
      Err(WebSocketError::ReservedBitsNotZero)
    ));
  }

  #[test]
  fn rejects_interleaved_message() {
    let mut assembler = MessageAssembler::new(1024);
    assembler
      .push(data_frame(false, OpCode::Text, b"a"))
      .unwrap();
    assert!(matches!(
      assembler.push(data_frame(true, OpCode::Text, b"b")),
      Err(WebSocketError::MessageInProgress)
    ));
  }

  #[test]
  fn rejects_orphan_continuation() {
    let mut assembler = MessageAssembler::new(1024);
    assert!(matches!(
      assembler.push(data_frame(true, OpCode::Continuation, b"x")),
      Err(WebSocketError::OrphanContinuation)
    ));
  }

  #[test]
  fn bounds_accumulated_size() {
    let mut assembler = MessageAssembler::new(8);
    assembler
      .push(data_frame(false, OpCode::Binary, &[0; 6]))
      .unwrap();
    assert!(matches!(
      assembler.push(data_frame(true, OpCode::Continuation, &[0; 6])),
      Err(WebSocketError::FrameTooLarge(12))
    ));
  }
}
