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

//! A live connection: the user-facing [`Session`] handle plus the two
//! tasks that drive its socket.
//!
//! The read task owns the inbound half: it decodes frames, reassembles
//! messages and calls the handler, so all callbacks for one session are
//! sequential and in wire order. Sends from any thread are encoded under
//! the session's codec lock and enqueued on the write task's channel; a
//! multi-fragment message goes into the channel as one entry, so fragments
//! of concurrent messages never interleave on the wire.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::Once;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::close::CloseCode;
use crate::codec::FrameDecoder;
use crate::codec::FrameEncoder;
use crate::error::WebSocketError;
use crate::fragment::Message;
use crate::fragment::MessageAssembler;
use crate::frame::close_payload;
use crate::frame::parse_close_payload;
use crate::frame::Frame;
use crate::frame::OpCode;
use crate::handler::Handler;
use crate::logging as wslog;
use crate::reactor::Reactor;
use crate::reactor::Scheduled;

const TAG: &str = "session";

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

pub(crate) enum Command {
  Write(Vec<u8>),
  Shutdown,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) struct SessionInner {
  url: String,
  protocol: Option<String>,
  extension_names: Vec<String>,
  tx: mpsc::UnboundedSender<Command>,
  /// Outbound codec and the negotiated extension instances; extensions are
  /// stateful in both directions, so the read task decodes through the
  /// same lock.
  encoder: Mutex<FrameEncoder>,
  state: AtomicU8,
  close_sent: AtomicBool,
  partial_open: AtomicBool,
  /// Close outcome to report when the transport goes down; first writer
  /// wins so the initiating cause is what `on_closed` sees.
  pending_close: Mutex<Option<(u16, String)>>,
  closed_once: Once,
  handler: Arc<dyn Handler>,
  reactor: Arc<Reactor>,
  cancel: CancellationToken,
  ping_deadline: Mutex<Option<Scheduled>>,
  close_grace: Mutex<Option<Scheduled>>,
  close_grace_period: Duration,
}

impl SessionInner {
  #[allow(clippy::too_many_arguments)]
  pub(crate) fn new(
    url: String,
    protocol: Option<String>,
    encoder: FrameEncoder,
    tx: mpsc::UnboundedSender<Command>,
    handler: Arc<dyn Handler>,
    reactor: Arc<Reactor>,
    close_grace_period: Duration,
  ) -> Self {
    let extension_names = encoder
      .extensions
      .iter()
      .map(|ext| ext.name().to_owned())
      .collect();
    Self {
      url,
      protocol,
      extension_names,
      tx,
      encoder: Mutex::new(encoder),
      state: AtomicU8::new(STATE_OPEN),
      close_sent: AtomicBool::new(false),
      partial_open: AtomicBool::new(false),
      pending_close: Mutex::new(None),
      closed_once: Once::new(),
      handler,
      reactor: reactor.clone(),
      cancel: reactor.child_token(),
      ping_deadline: Mutex::new(None),
      close_grace: Mutex::new(None),
      close_grace_period,
    }
  }

  fn is_open(&self) -> bool {
    self.state.load(Ordering::Acquire) == STATE_OPEN
  }

  fn send_message(
    &self,
    opcode: OpCode,
    payload: Vec<u8>,
  ) -> Result<(), WebSocketError> {
    if !self.is_open() {
      wslog::d(TAG, "send ignored: session is not open");
      return Ok(());
    }
    if self.partial_open.load(Ordering::Acquire) {
      return Err(WebSocketError::PartialWriterOpen);
    }
    self.encode_and_send(|encoder| encoder.encode_message(opcode, payload))
  }

  /// Encodes under the codec lock and enqueues before releasing it, so
  /// wire order always matches encode order. Stateful extensions depend
  /// on this: the peer inflates messages in the order they were deflated.
  fn encode_and_send(
    &self,
    encode: impl FnOnce(&mut FrameEncoder) -> Result<Vec<u8>, WebSocketError>,
  ) -> Result<(), WebSocketError> {
    let mut encoder = lock(&self.encoder);
    let bytes = encode(&mut encoder)?;
    self.enqueue(bytes);
    Ok(())
  }

  fn enqueue(&self, bytes: Vec<u8>) {
    if self.tx.send(Command::Write(bytes)).is_err() {
      wslog::v(TAG, "write dropped: connection task is gone");
    }
  }

  fn arm_ping_deadline(self: &Arc<Self>, deadline: Duration) {
    let inner = Arc::clone(self);
    let scheduled = self.reactor.schedule(deadline, move || {
      wslog::e(TAG, "ping deadline expired; dropping connection");
      inner.drop_connection(CloseCode::Abnormal, "ping timeout");
    });
    if let Some(previous) = lock(&self.ping_deadline).replace(scheduled) {
      previous.cancel();
    }
  }

  fn cancel_ping_deadline(&self) {
    if let Some(timer) = lock(&self.ping_deadline).take() {
      timer.cancel();
    }
  }

  /// Severs the transport without a close exchange. The recorded outcome
  /// is what `on_closed` reports; the first recorded cause wins.
  pub(crate) fn drop_connection(&self, code: CloseCode, reason: &str) {
    lock(&self.pending_close)
      .get_or_insert_with(|| (code.into(), reason.to_owned()));
    self.cancel.cancel();
  }

  fn begin_close(self: &Arc<Self>, code: CloseCode, reason: &str) {
    if self
      .state
      .compare_exchange(
        STATE_OPEN,
        STATE_CLOSING,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_err()
    {
      return;
    }
    lock(&self.pending_close)
      .get_or_insert_with(|| (code.into(), reason.to_owned()));
    self.close_sent.store(true, Ordering::Release);
    let payload = close_payload(code.into(), reason);
    if let Err(err) = self
      .encode_and_send(|encoder| encoder.encode_control(OpCode::Close, payload))
    {
      wslog::stacktrace(TAG, &err);
    }

    // If the server never answers our close, drop the socket.
    let inner = Arc::clone(self);
    let scheduled = self.reactor.schedule(self.close_grace_period, move || {
      wslog::d(TAG, "close grace period expired; dropping connection");
      inner.cancel.cancel();
    });
    if let Some(previous) = lock(&self.close_grace).replace(scheduled) {
      previous.cancel();
    }
  }

  fn take_pending_close(&self, default: (u16, String)) -> (u16, String) {
    lock(&self.pending_close).take().unwrap_or(default)
  }

  fn finish(&self, code: u16, reason: &str) {
    self.state.store(STATE_CLOSED, Ordering::Release);
    self.cancel_ping_deadline();
    if let Some(timer) = lock(&self.close_grace).take() {
      timer.cancel();
    }
    let _ = self.tx.send(Command::Shutdown);
    self.cancel.cancel();
    self.closed_once.call_once(|| {
      wslog::d(TAG, &format!("closed: {code} {reason}"));
      self.handler.on_closed(CloseCode::from(code), reason);
    });
  }
}

/// Handle to an open connection. Cheap to clone; all methods are
/// non-blocking and safe to call from any thread.
#[derive(Clone)]
pub struct Session {
  inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session").field("url", &self.inner.url).finish()
  }
}

impl Session {
  pub(crate) fn new(inner: Arc<SessionInner>) -> Self {
    Self { inner }
  }

  pub fn url(&self) -> &str {
    &self.inner.url
  }

  pub fn is_open(&self) -> bool {
    self.inner.is_open()
  }

  /// The subprotocol the server selected, if any.
  pub fn protocol(&self) -> Option<&str> {
    self.inner.protocol.as_deref()
  }

  /// Names of the extensions negotiated for this session.
  pub fn extensions(&self) -> &[String] {
    &self.inner.extension_names
  }

  /// Queues a text message. A no-op when the session is not open.
  pub fn send_text(&self, text: &str) -> Result<(), WebSocketError> {
    self
      .inner
      .send_message(OpCode::Text, text.as_bytes().to_vec())
  }

  /// Queues a binary message. A no-op when the session is not open.
  pub fn send_binary(&self, payload: Vec<u8>) -> Result<(), WebSocketError> {
    self.inner.send_message(OpCode::Binary, payload)
  }

  /// Sends a ping and arms a deadline: if no pong arrives within it, the
  /// connection is dropped and `on_closed` fires. Re-arming cancels the
  /// previous deadline.
  pub fn check_connection(
    &self,
    deadline: Duration,
  ) -> Result<(), WebSocketError> {
    if !self.inner.is_open() {
      return Ok(());
    }
    // armed before the ping can possibly be answered
    self.inner.arm_ping_deadline(deadline);
    if let Err(err) = self
      .inner
      .encode_and_send(|encoder| encoder.encode_control(OpCode::Ping, Vec::new()))
    {
      self.inner.cancel_ping_deadline();
      return Err(err);
    }
    Ok(())
  }

  /// Starts the close exchange with 1000 NORMAL_CLOSURE. Idempotent.
  pub fn close(&self) {
    self.inner.begin_close(CloseCode::Normal, "");
  }

  /// Starts the close exchange with an explicit code. Idempotent.
  pub fn close_with(&self, code: CloseCode, reason: &str) {
    self.inner.begin_close(code, reason);
  }

  /// Drops the socket without a close frame. `on_closed` still fires
  /// exactly once.
  pub fn close_now(&self) {
    self
      .inner
      .drop_connection(CloseCode::Abnormal, "closed locally");
  }

  /// Opens a writer that emits one message as explicitly-finished
  /// fragments. Only one may be open at a time; regular sends fail with
  /// [`WebSocketError::PartialWriterOpen`] until it finishes.
  pub fn new_partial_writer(
    &self,
    kind: MessageKind,
  ) -> Result<PartialWriter, WebSocketError> {
    if !self.inner.is_open() {
      return Err(WebSocketError::ConnectionClosed);
    }
    if self
      .inner
      .partial_open
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      return Err(WebSocketError::PartialWriterOpen);
    }
    Ok(PartialWriter {
      inner: self.inner.clone(),
      opcode: match kind {
        MessageKind::Text => OpCode::Text,
        MessageKind::Binary => OpCode::Binary,
      },
      started: false,
      finished: false,
    })
  }

}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageKind {
  Text,
  Binary,
}

/// Emits one message fragment by fragment.
///
/// Fragments bypass extension transforms, which operate on whole message
/// payloads. Dropping a writer whose last fragment was not final ends the
/// message with an empty final fragment.
pub struct PartialWriter {
  inner: Arc<SessionInner>,
  opcode: OpCode,
  started: bool,
  finished: bool,
}

impl PartialWriter {
  /// Sends one fragment. The first fragment carries the message opcode,
  /// later ones CONTINUATION; `fin` ends the message.
  pub fn write(
    &mut self,
    payload: &[u8],
    fin: bool,
  ) -> Result<(), WebSocketError> {
    if self.finished {
      return Err(WebSocketError::PartialMessageFinished);
    }
    let opcode = self.next_opcode();
    if self.inner.is_open() {
      let _ = self.inner.encode_and_send(|encoder| {
        Ok(encoder.encode_fragment(opcode, fin, payload.to_vec()))
      });
    }
    self.started = true;
    if fin {
      self.finished = true;
      self.release();
    }
    Ok(())
  }

  /// Ends the message, sending an empty final fragment if needed.
  pub fn finish(mut self) {
    self.end();
  }

  fn next_opcode(&self) -> OpCode {
    if self.started {
      OpCode::Continuation
    } else {
      self.opcode
    }
  }

  fn end(&mut self) {
    if self.finished {
      return;
    }
    let opcode = self.next_opcode();
    if self.inner.is_open() && self.started {
      let _ = self.inner.encode_and_send(|encoder| {
        Ok(encoder.encode_fragment(opcode, true, Vec::new()))
      });
    }
    self.finished = true;
    self.release();
  }

  fn release(&self) {
    self.inner.partial_open.store(false, Ordering::Release);
  }
}

impl Drop for PartialWriter {
  fn drop(&mut self) {
    self.end();
  }
}

/// Spawns the read and write tasks for a freshly opened session.
pub(crate) fn spawn_io<S>(
  reactor: &Reactor,
  stream: S,
  inner: Arc<SessionInner>,
  leftover: BytesMut,
  rx: mpsc::UnboundedReceiver<Command>,
  max_payload_size: usize,
  allowed_rsv: u8,
) where
  S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
  let (read_half, write_half) = tokio::io::split(stream);
  reactor.submit(write_loop(write_half, rx, inner.clone()));
  reactor.submit(read_loop(
    read_half,
    inner,
    leftover,
    max_payload_size,
    allowed_rsv,
  ));
}

async fn write_loop<W>(
  mut stream: W,
  mut rx: mpsc::UnboundedReceiver<Command>,
  inner: Arc<SessionInner>,
) where
  W: AsyncWrite + Send + Unpin,
{
  while let Some(command) = rx.recv().await {
    match command {
      Command::Write(bytes) => {
        if let Err(err) = stream.write_all(&bytes).await {
          wslog::stacktrace(TAG, &err);
          inner.drop_connection(CloseCode::Abnormal, "write failed");
          break;
        }
      }
      Command::Shutdown => break,
    }
  }
  let _ = stream.shutdown().await;
}

async fn read_loop<R>(
  mut stream: R,
  inner: Arc<SessionInner>,
  mut buf: BytesMut,
  max_payload_size: usize,
  allowed_rsv: u8,
) where
  R: AsyncRead + Send + Unpin,
{
  let decoder = FrameDecoder::new(max_payload_size, allowed_rsv);
  let mut assembler = MessageAssembler::new(max_payload_size);
  let (code, reason) =
    drive(&mut stream, &inner, &decoder, &mut assembler, &mut buf).await;
  inner.finish(code, &reason);
}

async fn drive<R>(
  stream: &mut R,
  inner: &Arc<SessionInner>,
  decoder: &FrameDecoder,
  assembler: &mut MessageAssembler,
  buf: &mut BytesMut,
) -> (u16, String)
where
  R: AsyncRead + Send + Unpin,
{
  loop {
    loop {
      match decoder.decode(buf) {
        Ok(Some(frame)) => match dispatch(inner, assembler, frame) {
          Ok(None) => continue,
          Ok(Some(outcome)) => return outcome,
          Err(err) => return protocol_failure(inner, err),
        },
        Ok(None) => break,
        Err(err) => return protocol_failure(inner, err),
      }
    }
    tokio::select! {
      _ = inner.cancel.cancelled() => {
        return inner.take_pending_close((
          CloseCode::Abnormal.into(),
          "connection dropped".to_owned(),
        ));
      }
      read = stream.read_buf(buf) => match read {
        Ok(0) => {
          wslog::d(TAG, "peer closed the transport");
          return inner.take_pending_close((
            CloseCode::Abnormal.into(),
            "unexpected EOF".to_owned(),
          ));
        }
        Ok(_) => {}
        Err(err) => {
          wslog::stacktrace(TAG, &err);
          return inner.take_pending_close((
            CloseCode::Abnormal.into(),
            err.to_string(),
          ));
        }
      }
    }
  }
}

/// Answers a protocol violation: 1002 (or 1009 for oversize) goes on the
/// wire unless a close was already sent, and the same code is reported.
fn protocol_failure(
  inner: &Arc<SessionInner>,
  err: WebSocketError,
) -> (u16, String) {
  wslog::e(TAG, &format!("protocol violation: {err}"));
  let code = err.close_code();
  if !inner.close_sent.swap(true, Ordering::AcqRel) {
    let payload = close_payload(code.into(), &err.to_string());
    let _ = inner
      .encode_and_send(|encoder| encoder.encode_control(OpCode::Close, payload));
  }
  (code.into(), err.to_string())
}

fn dispatch(
  inner: &Arc<SessionInner>,
  assembler: &mut MessageAssembler,
  frame: Frame,
) -> Result<Option<(u16, String)>, WebSocketError> {
  if frame.is_control() {
    return match frame.opcode {
      OpCode::Ping => {
        if inner.is_open() {
          inner.encode_and_send(|encoder| {
            encoder.encode_control(OpCode::Pong, frame.payload.clone())
          })?;
        }
        inner.handler.on_ping(&frame.payload);
        Ok(None)
      }
      OpCode::Pong => {
        inner.cancel_ping_deadline();
        inner.handler.on_pong(&frame.payload);
        Ok(None)
      }
      _ => {
        let (code, reason) = parse_close_payload(&frame.payload)?;
        if code != 1005 && !CloseCode::from(code).is_allowed() {
          return Err(WebSocketError::InvalidCloseFrame);
        }
        if !inner.close_sent.swap(true, Ordering::AcqRel) {
          // Server-initiated close: echo its code (NORMAL when absent).
          let echo = if frame.payload.is_empty() {
            close_payload(CloseCode::Normal.into(), "")
          } else {
            frame.payload.clone()
          };
          inner
            .encode_and_send(|encoder| encoder.encode_control(OpCode::Close, echo))?;
          Ok(Some((code, reason)))
        } else {
          // We initiated: report the code we actually sent.
          Ok(Some(inner.take_pending_close((code, reason))))
        }
      }
    };
  }

  if let Some(message) = assembler.push(frame)? {
    deliver(inner, message)?;
  }
  Ok(None)
}

fn deliver(
  inner: &Arc<SessionInner>,
  message: Message,
) -> Result<(), WebSocketError> {
  let mut payload = message.payload;
  lock(&inner.encoder).decode_message(&mut payload, message.rsv1)?;
  match message.opcode {
    OpCode::Text => inner.handler.on_text(validate_utf8(payload)?),
    _ => inner.handler.on_binary(payload),
  }
  Ok(())
}

fn validate_utf8(payload: Vec<u8>) -> Result<String, WebSocketError> {
  #[cfg(feature = "simd")]
  if simdutf8::basic::from_utf8(&payload).is_err() {
    return Err(WebSocketError::InvalidUTF8);
  }
  String::from_utf8(payload).map_err(|_| WebSocketError::InvalidUTF8)
}
