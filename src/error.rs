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

/// Errors surfaced by the client.
///
/// Transport and handshake variants come out of [`connect`](crate::WebSocketFactory::connect);
/// protocol variants terminate a live session and are reported through
/// [`Handler::on_closed`](crate::Handler::on_closed) with the close code from
/// [`WebSocketError::close_code`].
#[derive(Debug, thiserror::Error)]
pub enum WebSocketError {
  // Transport
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("unexpected EOF")]
  UnexpectedEOF,
  #[error("connection closed")]
  ConnectionClosed,
  #[error("timed out while opening the connection")]
  OpenTimeout,

  // Handshake
  #[error("invalid HTTP response: {0}")]
  InvalidHttpResponse(#[from] httparse::Error),
  #[error("unexpected handshake status: {0}")]
  UnexpectedStatus(u16),
  #[error("missing or invalid {0} header")]
  InvalidUpgradeHeader(&'static str),
  #[error("Sec-WebSocket-Accept mismatch")]
  AcceptMismatch,
  #[error("server selected subprotocol {0:?} which was not offered")]
  SubprotocolNotOffered(String),
  #[error("server did not select any of the offered subprotocols")]
  MissingSubprotocol,
  #[error("server selected extension {0:?} which was not offered")]
  ExtensionNotOffered(String),
  #[error("invalid extension parameter {0:?}")]
  InvalidExtensionParameter(String),
  #[error("handshake response head exceeds {0} bytes")]
  ResponseHeadTooLarge(usize),
  #[error("handshake rejected: {0}")]
  HandshakeRejected(String),

  // Protocol
  #[error("invalid opcode: {0:#x}")]
  InvalidOpCode(u8),
  #[error("reserved bits are not zero")]
  ReservedBitsNotZero,
  #[error("received a masked frame from the server")]
  MaskedServerFrame,
  #[error("control frame must not be fragmented")]
  ControlFrameFragmented,
  #[error("control frame payload exceeds 125 bytes")]
  ControlFrameTooLarge,
  #[error("frame payload of {0} bytes exceeds the configured maximum")]
  FrameTooLarge(usize),
  #[error("new message started before the previous one completed")]
  MessageInProgress,
  #[error("continuation frame without a message in progress")]
  OrphanContinuation,
  #[error("invalid UTF-8 in text message")]
  InvalidUTF8,
  #[error("invalid close frame payload")]
  InvalidCloseFrame,
  #[error("invalid compressed payload")]
  InvalidEncoding,

  // Usage
  #[error("window bits must be within 8..=15, got {0}")]
  InvalidWindowBits(u8),
  #[error("a partial message writer is already open")]
  PartialWriterOpen,
  #[error("partial message already finished")]
  PartialMessageFinished,
  #[error("unsupported url: {0}")]
  UnsupportedUrl(String),

  // Resource
  #[error("factory has been destroyed")]
  FactoryDestroyed,
}

impl WebSocketError {
  /// Close code sent to the peer when this error terminates a session.
  pub fn close_code(&self) -> CloseCode {
    match self {
      WebSocketError::FrameTooLarge(_) => CloseCode::MessageTooBig,
      WebSocketError::Io(_)
      | WebSocketError::UnexpectedEOF
      | WebSocketError::ConnectionClosed => CloseCode::Abnormal,
      _ => CloseCode::Protocol,
    }
  }
}
