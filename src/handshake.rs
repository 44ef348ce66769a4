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

//! Opening handshake (RFC 6455 §4): the HTTP/1.1 Upgrade request, and an
//! incremental parser/validator for the server's response.

use std::sync::Arc;

use base64::prelude::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::BytesMut;
use sha1::Digest;
use sha1::Sha1;
use url::Url;

use crate::error::WebSocketError;
use crate::extension::parse_extensions_header;
use crate::extension::Extension;
use crate::extension::ExtensionConfig;
use crate::random;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the buffered response head; anything larger fails the
/// handshake rather than grow without limit.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Inspects the validated server response and may reject the connection.
pub type HandshakeHook =
  Arc<dyn Fn(&HandshakeResponse) -> Result<(), String> + Send + Sync>;

/// A fresh `Sec-WebSocket-Key` value.
pub fn generate_key() -> String {
  BASE64_STANDARD.encode(random::nonce())
}

/// The `Sec-WebSocket-Accept` value a conforming server must answer with.
pub fn accept_key(key: &str) -> String {
  let mut sha1 = Sha1::new();
  sha1.update(key.as_bytes());
  sha1.update(GUID.as_bytes());
  BASE64_STANDARD.encode(sha1.finalize())
}

/// Builds the opening GET request.
pub(crate) fn build_request(
  url: &Url,
  key: &str,
  protocols: &[String],
  extension_offers: &[String],
  extra_headers: &[(String, String)],
) -> Result<String, WebSocketError> {
  let host = url
    .host_str()
    .ok_or_else(|| WebSocketError::UnsupportedUrl(url.to_string()))?;
  // `Url` drops default ports for ws/wss, so any port here is non-default.
  let host_header = match url.port() {
    Some(port) => format!("{host}:{port}"),
    None => host.to_owned(),
  };
  let mut path = url.path().to_owned();
  if let Some(query) = url.query() {
    path.push('?');
    path.push_str(query);
  }

  let mut request = format!(
    "GET {path} HTTP/1.1\r\n\
     Host: {host_header}\r\n\
     Upgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Key: {key}\r\n\
     Sec-WebSocket-Version: 13\r\n"
  );
  if !protocols.is_empty() {
    request.push_str("Sec-WebSocket-Protocol: ");
    request.push_str(&protocols.join(", "));
    request.push_str("\r\n");
  }
  if !extension_offers.is_empty() {
    request.push_str("Sec-WebSocket-Extensions: ");
    request.push_str(&extension_offers.join(", "));
    request.push_str("\r\n");
  }
  for (name, value) in extra_headers {
    request.push_str(name);
    request.push_str(": ");
    request.push_str(value);
    request.push_str("\r\n");
  }
  request.push_str("\r\n");
  Ok(request)
}

/// The parsed server response, as handed to the [`HandshakeHook`].
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
  /// First header with the given name, case-insensitive.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  fn headers_named<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Iterator<Item = &'a str> {
    self
      .headers
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Everything the handshake produced: the negotiated session parameters
/// and any bytes that arrived after the response head.
pub(crate) struct Negotiated {
  pub response: HandshakeResponse,
  pub protocol: Option<String>,
  pub extensions: Vec<Box<dyn Extension>>,
  /// First inbound frame bytes, to be fed to the codec verbatim.
  pub remaining: BytesMut,
}

pub(crate) enum Progress {
  /// The response head is incomplete; feed more bytes.
  NeedMore,
  Complete(Negotiated),
}

/// Incremental response parser. Owns the receive buffer until the
/// handshake completes.
pub(crate) struct Handshake {
  accept: String,
  protocols: Vec<String>,
  extensions: Vec<Arc<dyn ExtensionConfig>>,
  hook: Option<HandshakeHook>,
  buf: BytesMut,
}

impl Handshake {
  pub fn new(
    key: &str,
    protocols: Vec<String>,
    extensions: Vec<Arc<dyn ExtensionConfig>>,
    hook: Option<HandshakeHook>,
  ) -> Self {
    Self {
      accept: accept_key(key),
      protocols,
      extensions,
      hook,
      buf: BytesMut::with_capacity(1024),
    }
  }

  pub fn feed(&mut self, chunk: &[u8]) -> Result<Progress, WebSocketError> {
    self.buf.extend_from_slice(chunk);

    let head_end = match find_head_end(&self.buf) {
      Some(end) => end,
      None => {
        if self.buf.len() > MAX_RESPONSE_HEAD {
          return Err(WebSocketError::ResponseHeadTooLarge(MAX_RESPONSE_HEAD));
        }
        return Ok(Progress::NeedMore);
      }
    };

    let response = parse_head(&self.buf[..head_end])?;
    self.validate(&response)?;
    let protocol = self.negotiate_protocol(&response)?;
    let extensions = self.negotiate_extensions(&response)?;

    if let Some(hook) = &self.hook {
      hook(&response).map_err(WebSocketError::HandshakeRejected)?;
    }

    let mut head = std::mem::take(&mut self.buf);
    let remaining = head.split_off(head_end);
    Ok(Progress::Complete(Negotiated {
      response,
      protocol,
      extensions,
      remaining,
    }))
  }

  fn validate(
    &self,
    response: &HandshakeResponse,
  ) -> Result<(), WebSocketError> {
    if response.status != 101 {
      return Err(WebSocketError::UnexpectedStatus(response.status));
    }

    let upgrade = response.header("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
      return Err(WebSocketError::InvalidUpgradeHeader("Upgrade"));
    }

    let connection = response.header("connection").unwrap_or_default();
    if !connection
      .split(',')
      .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
      return Err(WebSocketError::InvalidUpgradeHeader("Connection"));
    }

    match response.header("sec-websocket-accept") {
      Some(accept) if accept.trim() == self.accept => Ok(()),
      _ => Err(WebSocketError::AcceptMismatch),
    }
  }

  fn negotiate_protocol(
    &self,
    response: &HandshakeResponse,
  ) -> Result<Option<String>, WebSocketError> {
    match response.header("sec-websocket-protocol") {
      // An offer the server ignored entirely is a failed negotiation.
      None if !self.protocols.is_empty() => {
        Err(WebSocketError::MissingSubprotocol)
      }
      None => Ok(None),
      Some(selected) => {
        let selected = selected.trim();
        if self.protocols.iter().any(|offered| offered == selected) {
          Ok(Some(selected.to_owned()))
        } else {
          Err(WebSocketError::SubprotocolNotOffered(selected.to_owned()))
        }
      }
    }
  }

  fn negotiate_extensions(
    &self,
    response: &HandshakeResponse,
  ) -> Result<Vec<Box<dyn Extension>>, WebSocketError> {
    let mut negotiated = Vec::new();
    for value in response.headers_named("sec-websocket-extensions") {
      for token in parse_extensions_header(value)? {
        let config = self
          .extensions
          .iter()
          .find(|config| config.name() == token.name)
          .ok_or_else(|| {
            WebSocketError::ExtensionNotOffered(token.name.clone())
          })?;
        negotiated.push(config.negotiate(&token.params)?);
      }
    }
    Ok(negotiated)
  }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
  buf
    .windows(4)
    .position(|window| window == b"\r\n\r\n")
    .map(|pos| pos + 4)
}

fn parse_head(head: &[u8]) -> Result<HandshakeResponse, WebSocketError> {
  let mut headers = [httparse::EMPTY_HEADER; 64];
  let mut response = httparse::Response::new(&mut headers);
  match response.parse(head)? {
    httparse::Status::Partial => {
      // find_head_end saw the terminator; a partial parse here means the
      // head is malformed in a way httparse could not reject outright.
      Err(WebSocketError::UnexpectedStatus(0))
    }
    httparse::Status::Complete(_) => {
      let status = response.code.unwrap_or(0);
      if response.version != Some(1) {
        return Err(WebSocketError::UnexpectedStatus(status));
      }
      let headers = response
        .headers
        .iter()
        .map(|header| {
          (
            header.name.to_owned(),
            String::from_utf8_lossy(header.value).into_owned(),
          )
        })
        .collect();
      Ok(HandshakeResponse { status, headers })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deflate::DeflateConfig;

  const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
  const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

  fn handshake(key: &str) -> Handshake {
    Handshake::new(key, Vec::new(), Vec::new(), None)
  }

  fn ok_response(extra: &str) -> Vec<u8> {
    format!(
      "HTTP/1.1 101 Switching Protocols\r\n\
       Upgrade: websocket\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\
       {extra}\r\n"
    )
    .into_bytes()
  }

  #[test]
  fn accept_key_matches_rfc_fixture() {
    assert_eq!(accept_key(SAMPLE_KEY), SAMPLE_ACCEPT);
  }

  #[test]
  fn generated_keys_decode_to_sixteen_bytes() {
    let key = generate_key();
    assert_eq!(BASE64_STANDARD.decode(key).unwrap().len(), 16);
  }

  #[test]
  fn request_has_required_headers() {
    let url = Url::parse("ws://example.com/chat?room=1").unwrap();
    let request = build_request(
      &url,
      SAMPLE_KEY,
      &["v1.chat".to_owned()],
      &["permessage-deflate; client_max_window_bits".to_owned()],
      &[("X-Auth".to_owned(), "token".to_owned())],
    )
    .unwrap();
    assert!(request.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
    assert!(request.contains("Host: example.com\r\n"));
    assert!(request.contains("Upgrade: websocket\r\n"));
    assert!(request.contains("Connection: Upgrade\r\n"));
    assert!(request.contains(&format!("Sec-WebSocket-Key: {SAMPLE_KEY}\r\n")));
    assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(request.contains("Sec-WebSocket-Protocol: v1.chat\r\n"));
    assert!(request
      .contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n"));
    assert!(request.contains("X-Auth: token\r\n"));
    assert!(request.ends_with("\r\n\r\n"));
  }

  #[test]
  fn non_default_port_appears_in_host() {
    let url = Url::parse("ws://example.com:9001/").unwrap();
    let request =
      build_request(&url, SAMPLE_KEY, &[], &[], &[]).unwrap();
    assert!(request.contains("Host: example.com:9001\r\n"));

    let url = Url::parse("ws://example.com:80/").unwrap();
    let request =
      build_request(&url, SAMPLE_KEY, &[], &[], &[]).unwrap();
    assert!(request.contains("Host: example.com\r\n"));
  }

  #[test]
  fn needs_more_until_terminator() {
    let mut handshake = handshake(SAMPLE_KEY);
    let response = ok_response("");
    let (first, second) = response.split_at(20);
    assert!(matches!(
      handshake.feed(first).unwrap(),
      Progress::NeedMore
    ));
    match handshake.feed(second).unwrap() {
      Progress::Complete(negotiated) => {
        assert_eq!(negotiated.response.status, 101);
        assert!(negotiated.protocol.is_none());
        assert!(negotiated.remaining.is_empty());
      }
      Progress::NeedMore => panic!("handshake did not complete"),
    }
  }

  #[test]
  fn bytes_after_terminator_are_preserved() {
    let mut handshake = handshake(SAMPLE_KEY);
    let mut response = ok_response("");
    response.extend_from_slice(&[0x81, 0x01, b'x']);
    match handshake.feed(&response).unwrap() {
      Progress::Complete(negotiated) => {
        assert_eq!(&negotiated.remaining[..], &[0x81, 0x01, b'x']);
      }
      Progress::NeedMore => panic!("handshake did not complete"),
    }
  }

  #[test]
  fn rejects_non_101_status() {
    let mut handshake = handshake(SAMPLE_KEY);
    let response = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
    assert!(matches!(
      handshake.feed(response),
      Err(WebSocketError::UnexpectedStatus(200))
    ));
  }

  #[test]
  fn rejects_missing_upgrade_header() {
    let mut handshake = handshake(SAMPLE_KEY);
    let response = format!(
      "HTTP/1.1 101 Switching Protocols\r\n\
       Connection: Upgrade\r\n\
       Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\r\n"
    );
    assert!(matches!(
      handshake.feed(response.as_bytes()),
      Err(WebSocketError::InvalidUpgradeHeader("Upgrade"))
    ));
  }

  #[test]
  fn connection_header_is_token_matched() {
    let mut handshake = handshake(SAMPLE_KEY);
    let response = format!(
      "HTTP/1.1 101 Switching Protocols\r\n\
       Upgrade: WebSocket\r\n\
       Connection: keep-alive, UPGRADE\r\n\
       Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\r\n"
    );
    assert!(matches!(
      handshake.feed(response.as_bytes()).unwrap(),
      Progress::Complete(_)
    ));
  }

  #[test]
  fn rejects_accept_mismatch() {
    let mut handshake = handshake("c29tZSBvdGhlciBub25jZSE=");
    let response = ok_response("");
    assert!(matches!(
      handshake.feed(&response),
      Err(WebSocketError::AcceptMismatch)
    ));
  }

  #[test]
  fn accepts_offered_subprotocol() {
    let mut handshake = Handshake::new(
      SAMPLE_KEY,
      vec!["v1.test.protocol".to_owned()],
      Vec::new(),
      None,
    );
    let response =
      ok_response("Sec-WebSocket-Protocol: v1.test.protocol\r\n");
    match handshake.feed(&response).unwrap() {
      Progress::Complete(negotiated) => {
        assert_eq!(negotiated.protocol.as_deref(), Some("v1.test.protocol"));
      }
      Progress::NeedMore => panic!("handshake did not complete"),
    }
  }

  #[test]
  fn rejects_unoffered_subprotocol() {
    let mut handshake = Handshake::new(
      SAMPLE_KEY,
      vec!["dummy.protocol".to_owned()],
      Vec::new(),
      None,
    );
    let response = ok_response("Sec-WebSocket-Protocol: sneaky\r\n");
    assert!(matches!(
      handshake.feed(&response),
      Err(WebSocketError::SubprotocolNotOffered(_))
    ));
  }

  #[test]
  fn rejects_ignored_subprotocol_offer() {
    let mut handshake = Handshake::new(
      SAMPLE_KEY,
      vec!["dummy.protocol".to_owned()],
      Vec::new(),
      None,
    );
    assert!(matches!(
      handshake.feed(&ok_response("")),
      Err(WebSocketError::MissingSubprotocol)
    ));
  }

  #[test]
  fn negotiates_offered_extension() {
    let mut handshake = Handshake::new(
      SAMPLE_KEY,
      Vec::new(),
      vec![Arc::new(DeflateConfig::new())],
      None,
    );
    let response = ok_response(
      "Sec-WebSocket-Extensions: permessage-deflate; server_max_window_bits=12\r\n",
    );
    match handshake.feed(&response).unwrap() {
      Progress::Complete(negotiated) => {
        assert_eq!(negotiated.extensions.len(), 1);
        assert_eq!(negotiated.extensions[0].name(), "permessage-deflate");
      }
      Progress::NeedMore => panic!("handshake did not complete"),
    }
  }

  #[test]
  fn rejects_unknown_extension_token() {
    let mut handshake = handshake(SAMPLE_KEY);
    let response = ok_response("Sec-WebSocket-Extensions: x-snappy\r\n");
    assert!(matches!(
      handshake.feed(&response),
      Err(WebSocketError::ExtensionNotOffered(_))
    ));
  }

  #[test]
  fn hook_can_reject() {
    let hook: HandshakeHook =
      Arc::new(|_| Err("server looks fishy".to_owned()));
    let mut handshake =
      Handshake::new(SAMPLE_KEY, Vec::new(), Vec::new(), Some(hook));
    assert!(matches!(
      handshake.feed(&ok_response("")),
      Err(WebSocketError::HandshakeRejected(_))
    ));
  }

  #[test]
  fn oversized_head_fails() {
    let mut handshake = handshake(SAMPLE_KEY);
    let filler = vec![b'a'; MAX_RESPONSE_HEAD + 1];
    assert!(matches!(
      handshake.feed(&filler),
      Err(WebSocketError::ResponseHeadTooLarge(_))
    ));
  }
}
