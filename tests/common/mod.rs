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

//! Scripted in-process server: accepts one connection, performs the
//! upgrade, then exchanges raw frames exactly as the test dictates.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tether::CloseCode;
use tether::Handler;
use tether::Session;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

pub async fn listen() -> (TcpListener, String) {
  let _ = env_logger::builder().is_test(true).try_init();
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let port = listener.local_addr().unwrap().port();
  (listener, format!("ws://127.0.0.1:{port}/test"))
}

/// One accepted connection, post-upgrade.
pub struct ServerConn {
  stream: TcpStream,
  buf: Vec<u8>,
}

/// A client frame as seen by the server, already unmasked.
#[derive(Debug)]
pub struct ServerFrame {
  pub fin: bool,
  pub rsv1: bool,
  pub opcode: u8,
  pub payload: Vec<u8>,
}

impl ServerConn {
  pub async fn accept(listener: &TcpListener) -> Self {
    Self::accept_with(listener, "").await
  }

  /// Accepts and upgrades, appending `extra_headers` (CRLF-terminated
  /// lines) to the 101 response.
  pub async fn accept_with(
    listener: &TcpListener,
    extra_headers: &str,
  ) -> Self {
    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Self {
      stream,
      buf: Vec::new(),
    };
    let request = conn.read_request_head().await;
    let key = header_value(&request, "sec-websocket-key")
      .expect("client request has no Sec-WebSocket-Key");
    let accept = tether::handshake::accept_key(&key);
    let response = format!(
      "HTTP/1.1 101 Switching Protocols\r\n\
       Upgrade: websocket\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Accept: {accept}\r\n\
       {extra_headers}\r\n"
    );
    conn.stream.write_all(response.as_bytes()).await.unwrap();
    conn
  }

  /// Accepts and answers with a verbatim (non-upgrade) response.
  pub async fn accept_and_respond_raw(
    listener: &TcpListener,
    response: &str,
  ) {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut conn_buf = Vec::new();
    loop {
      let mut chunk = [0u8; 4096];
      let n = stream.read(&mut chunk).await.unwrap();
      assert!(n > 0, "client closed before sending its request");
      conn_buf.extend_from_slice(&chunk[..n]);
      if conn_buf.windows(4).any(|w| w == b"\r\n\r\n") {
        break;
      }
    }
    stream.write_all(response.as_bytes()).await.unwrap();
  }

  async fn read_request_head(&mut self) -> String {
    loop {
      if let Some(end) =
        self.buf.windows(4).position(|w| w == b"\r\n\r\n")
      {
        let head = self.buf.drain(..end + 4).collect::<Vec<u8>>();
        return String::from_utf8(head).unwrap();
      }
      let mut chunk = [0u8; 4096];
      let n = self.stream.read(&mut chunk).await.unwrap();
      assert!(n > 0, "client closed before completing its request");
      self.buf.extend_from_slice(&chunk[..n]);
    }
  }

  pub async fn read_frame(&mut self) -> ServerFrame {
    loop {
      if let Some((frame, consumed)) = parse_client_frame(&self.buf) {
        self.buf.drain(..consumed);
        return frame;
      }
      let mut chunk = [0u8; 64 * 1024];
      let n = self.stream.read(&mut chunk).await.unwrap();
      assert!(n > 0, "client closed while a frame was expected");
      self.buf.extend_from_slice(&chunk[..n]);
    }
  }

  /// Reads data frames until fin, returning (first opcode, whole payload).
  pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
    let first = self.read_frame().await;
    let opcode = first.opcode;
    let mut payload = first.payload;
    let mut fin = first.fin;
    while !fin {
      let next = self.read_frame().await;
      assert_eq!(next.opcode, OPCODE_CONTINUATION);
      payload.extend_from_slice(&next.payload);
      fin = next.fin;
    }
    (opcode, payload)
  }

  pub async fn write_frame(&mut self, fin: bool, opcode: u8, payload: &[u8]) {
    self
      .write_frame_with_rsv1(fin, false, opcode, payload)
      .await;
  }

  pub async fn write_frame_with_rsv1(
    &mut self,
    fin: bool,
    rsv1: bool,
    opcode: u8,
    payload: &[u8],
  ) {
    let mut wire = vec![((fin as u8) << 7) | ((rsv1 as u8) << 6) | opcode];
    let len = payload.len();
    if len <= 125 {
      wire.push(len as u8);
    } else if len <= u16::MAX as usize {
      wire.push(126);
      wire.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
      wire.push(127);
      wire.extend_from_slice(&(len as u64).to_be_bytes());
    }
    wire.extend_from_slice(payload);
    self.stream.write_all(&wire).await.unwrap();
  }

  pub async fn write_close(&mut self, code: u16, reason: &str) {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    self.write_frame(true, OPCODE_CLOSE, &payload).await;
  }

  pub async fn write_raw(&mut self, bytes: &[u8]) {
    self.stream.write_all(bytes).await.unwrap();
  }

  /// Waits until the client drops the transport.
  pub async fn read_eof(&mut self) {
    loop {
      let mut chunk = [0u8; 4096];
      let n = self.stream.read(&mut chunk).await.unwrap();
      if n == 0 {
        return;
      }
      self.buf.extend_from_slice(&chunk[..n]);
    }
  }

  /// Like [`read_eof`](Self::read_eof), but treats a reset as closed.
  /// Used where the client may tear the socket down with inbound bytes
  /// still unread, which surfaces as ECONNRESET rather than EOF.
  pub async fn read_eof_lossy(&mut self) {
    loop {
      let mut chunk = [0u8; 4096];
      match self.stream.read(&mut chunk).await {
        Ok(0) | Err(_) => return,
        Ok(_) => {}
      }
    }
  }
}

fn parse_client_frame(buf: &[u8]) -> Option<(ServerFrame, usize)> {
  if buf.len() < 2 {
    return None;
  }
  let fin = buf[0] & 0x80 != 0;
  let rsv1 = buf[0] & 0x40 != 0;
  let opcode = buf[0] & 0x0F;
  assert_eq!(buf[1] & 0x80, 0x80, "client frames must be masked");
  let code = (buf[1] & 0x7F) as usize;
  let (len, header) = match code {
    126 => {
      if buf.len() < 4 {
        return None;
      }
      (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
    }
    127 => {
      if buf.len() < 10 {
        return None;
      }
      let mut be = [0u8; 8];
      be.copy_from_slice(&buf[2..10]);
      (u64::from_be_bytes(be) as usize, 10)
    }
    _ => (code, 2),
  };
  let total = header + 4 + len;
  if buf.len() < total {
    return None;
  }
  let mut mask = [0u8; 4];
  mask.copy_from_slice(&buf[header..header + 4]);
  let mut payload = buf[header + 4..total].to_vec();
  for (i, byte) in payload.iter_mut().enumerate() {
    *byte ^= mask[i % 4];
  }
  Some((
    ServerFrame {
      fin,
      rsv1,
      opcode,
      payload,
    },
    total,
  ))
}

fn header_value(head: &str, name: &str) -> Option<String> {
  head.lines().find_map(|line| {
    let (n, v) = line.split_once(':')?;
    if n.trim().eq_ignore_ascii_case(name) {
      Some(v.trim().to_owned())
    } else {
      None
    }
  })
}

#[derive(Debug)]
pub enum Event {
  Connected,
  Text(String),
  Binary(Vec<u8>),
  Ping(Vec<u8>),
  Pong(Vec<u8>),
  Closed(CloseCode, String),
}

pub struct Recorder {
  tx: mpsc::UnboundedSender<Event>,
}

impl Handler for Recorder {
  fn on_connected(&self, _session: &Session) {
    let _ = self.tx.send(Event::Connected);
  }

  fn on_text(&self, text: String) {
    let _ = self.tx.send(Event::Text(text));
  }

  fn on_binary(&self, payload: Vec<u8>) {
    let _ = self.tx.send(Event::Binary(payload));
  }

  fn on_ping(&self, payload: &[u8]) {
    let _ = self.tx.send(Event::Ping(payload.to_vec()));
  }

  fn on_pong(&self, payload: &[u8]) {
    let _ = self.tx.send(Event::Pong(payload.to_vec()));
  }

  fn on_closed(&self, code: CloseCode, reason: &str) {
    let _ = self.tx.send(Event::Closed(code, reason.to_owned()));
  }
}

pub fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Event>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (Arc::new(Recorder { tx }), rx)
}

pub async fn expect_event(
  rx: &mut mpsc::UnboundedReceiver<Event>,
  within: Duration,
) -> Event {
  tokio::time::timeout(within, rx.recv())
    .await
    .expect("timed out waiting for an event")
    .expect("event channel closed")
}

/// Deterministic pseudo-random payload for echo checks.
pub fn patterned(len: usize) -> Vec<u8> {
  let mut state = 0x9e3779b97f4a7c15u64;
  (0..len)
    .map(|_| {
      state ^= state << 13;
      state ^= state >> 7;
      state ^= state << 17;
      state as u8
    })
    .collect()
}
