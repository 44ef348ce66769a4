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

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use url::Url;

use crate::close::CloseCode;
use crate::codec::FrameEncoder;
use crate::config::SessionConfig;
use crate::error::WebSocketError;
use crate::handler::Handler;
use crate::handshake;
use crate::handshake::Handshake;
use crate::handshake::Negotiated;
use crate::handshake::Progress;
use crate::logging as wslog;
use crate::reactor::Reactor;
use crate::session;
use crate::session::Session;
use crate::session::SessionInner;

const TAG: &str = "factory";

/// Opens sessions and owns the machinery they run on.
///
/// Sessions opened here stay tied to the factory: `destroy` drops every
/// live connection (each delivers its `on_closed`) and waits for all of
/// their tasks to exit. Construct the factory inside a tokio runtime.
pub struct WebSocketFactory {
  reactor: Arc<Reactor>,
  sessions: Mutex<Vec<Weak<SessionInner>>>,
}

impl WebSocketFactory {
  pub fn new() -> Self {
    Self {
      reactor: Arc::new(Reactor::new()),
      sessions: Mutex::new(Vec::new()),
    }
  }

  /// Dials a `ws://` URL and performs the opening handshake.
  ///
  /// The whole open (TCP connect plus handshake) runs under
  /// [`SessionConfig::open_timeout`]. For TLS or any other transport,
  /// bring an established stream to [`connect_with_stream`].
  ///
  /// [`connect_with_stream`]: WebSocketFactory::connect_with_stream
  pub async fn connect(
    &self,
    url: &str,
    handler: Arc<dyn Handler>,
    config: SessionConfig,
  ) -> Result<Session, WebSocketError> {
    let parsed = parse_ws_url(url)?;
    if parsed.scheme() != "ws" {
      return Err(WebSocketError::UnsupportedUrl(format!(
        "{url}: connect dials plain ws; use connect_with_stream for {}",
        parsed.scheme()
      )));
    }
    let host = parsed
      .host_str()
      .ok_or_else(|| WebSocketError::UnsupportedUrl(url.to_owned()))?
      .to_owned();
    let port = parsed.port().unwrap_or(80);

    let open = async {
      let stream = TcpStream::connect((host.as_str(), port)).await?;
      stream.set_nodelay(true)?;
      self.open_stream(stream, &parsed, handler, &config).await
    };
    match tokio::time::timeout(config.open_timeout, open).await {
      Ok(result) => result,
      Err(_) => Err(WebSocketError::OpenTimeout),
    }
  }

  /// Performs the opening handshake over an established stream (e.g. a
  /// TLS connection). The URL supplies the request target and Host.
  pub async fn connect_with_stream<S>(
    &self,
    stream: S,
    url: &str,
    handler: Arc<dyn Handler>,
    config: SessionConfig,
  ) -> Result<Session, WebSocketError>
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    let parsed = parse_ws_url(url)?;
    match tokio::time::timeout(
      config.open_timeout,
      self.open_stream(stream, &parsed, handler, &config),
    )
    .await
    {
      Ok(result) => result,
      Err(_) => Err(WebSocketError::OpenTimeout),
    }
  }

  async fn open_stream<S>(
    &self,
    mut stream: S,
    url: &Url,
    handler: Arc<dyn Handler>,
    config: &SessionConfig,
  ) -> Result<Session, WebSocketError>
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    if !self.reactor.is_alive() {
      return Err(WebSocketError::FactoryDestroyed);
    }

    let key = handshake::generate_key();
    let offers: Vec<String> =
      config.extensions.iter().map(|ext| ext.offer()).collect();
    let request = handshake::build_request(
      url,
      &key,
      &config.protocols,
      &offers,
      &config.extra_headers,
    )?;
    wslog::v(TAG, &format!("opening {url}"));
    stream.write_all(request.as_bytes()).await?;

    let mut machine = Handshake::new(
      &key,
      config.protocols.clone(),
      config.extensions.clone(),
      config.handshake_hook.clone(),
    );
    let negotiated = loop {
      let mut chunk = [0u8; 4096];
      let n = stream.read(&mut chunk).await?;
      if n == 0 {
        return Err(WebSocketError::UnexpectedEOF);
      }
      match machine.feed(&chunk[..n])? {
        Progress::Complete(negotiated) => break negotiated,
        Progress::NeedMore => {}
      }
    };

    Ok(self.install(stream, url, handler, config, negotiated))
  }

  /// Wires up the session state and driver tasks once the handshake is
  /// done.
  fn install<S>(
    &self,
    stream: S,
    url: &Url,
    handler: Arc<dyn Handler>,
    config: &SessionConfig,
    negotiated: Negotiated,
  ) -> Session
  where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
  {
    let encoder =
      FrameEncoder::new(negotiated.extensions, config.fragment_size);
    let allowed_rsv = encoder.allowed_rsv();
    let (tx, rx) = mpsc::unbounded_channel();
    let inner = Arc::new(SessionInner::new(
      url.to_string(),
      negotiated.protocol,
      encoder,
      tx,
      handler.clone(),
      self.reactor.clone(),
      config.close_grace_period,
    ));

    {
      let mut sessions = lock_sessions(&self.sessions);
      sessions.retain(|weak| weak.strong_count() > 0);
      sessions.push(Arc::downgrade(&inner));
    }

    session::spawn_io(
      &self.reactor,
      stream,
      inner.clone(),
      negotiated.remaining,
      rx,
      config.max_response_payload_size,
      allowed_rsv,
    );

    let session = Session::new(inner);
    wslog::d(TAG, &format!("session open: {url}"));
    handler.on_connected(&session);
    session
  }

  /// Tears everything down: every live session is dropped (delivering its
  /// `on_closed`), pending timers are purged, and the call returns only
  /// once no more work can run. Idempotent; subsequent `connect` calls
  /// fail with [`WebSocketError::FactoryDestroyed`].
  pub async fn destroy(&self) {
    let sessions: Vec<_> = lock_sessions(&self.sessions).drain(..).collect();
    for weak in sessions {
      if let Some(inner) = weak.upgrade() {
        inner.drop_connection(CloseCode::Abnormal, "factory destroyed");
      }
    }
    self.reactor.destroy().await;
  }
}

impl Default for WebSocketFactory {
  fn default() -> Self {
    Self::new()
  }
}

fn lock_sessions(
  sessions: &Mutex<Vec<Weak<SessionInner>>>,
) -> std::sync::MutexGuard<'_, Vec<Weak<SessionInner>>> {
  sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn parse_ws_url(url: &str) -> Result<Url, WebSocketError> {
  let parsed = Url::parse(url)
    .map_err(|_| WebSocketError::UnsupportedUrl(url.to_owned()))?;
  match parsed.scheme() {
    "ws" | "wss" => Ok(parsed),
    other => Err(WebSocketError::UnsupportedUrl(format!(
      "{url}: unsupported scheme {other:?}"
    ))),
  }
}
