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

//! _tether_ is an RFC 6455 WebSocket client with permessage-deflate
//! (RFC 7692) support.
//!
//! A [`WebSocketFactory`] dials servers and hands back [`Session`]s; a
//! [`Handler`] receives the traffic. Inbound frames are parsed,
//! reassembled, run through the negotiated extensions and delivered in
//! wire order on one task per session. Sends are non-blocking from any
//! thread and are linearized by the session's write queue.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether::{
//!   CloseCode, DeflateConfig, Handler, SessionConfig, WebSocketFactory,
//! };
//! use anyhow::Result;
//!
//! struct Echo;
//!
//! impl Handler for Echo {
//!   fn on_text(&self, text: String) {
//!     println!("< {text}");
//!   }
//!
//!   fn on_closed(&self, code: CloseCode, reason: &str) {
//!     println!("closed: {code:?} {reason}");
//!   }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let factory = WebSocketFactory::new();
//!   let config = SessionConfig {
//!     extensions: vec![Arc::new(DeflateConfig::new())],
//!     ..SessionConfig::default()
//!   };
//!   let session = factory
//!     .connect("ws://localhost:9001/chat", Arc::new(Echo), config)
//!     .await?;
//!
//!   session.send_text("hello")?;
//!   session.check_connection(Duration::from_secs(5))?;
//!   session.close();
//!
//!   factory.destroy().await;
//!   Ok(())
//! }
//! ```
//!
//! # Fragmented sends
//!
//! [`Session::new_partial_writer`] streams one message as explicit
//! fragments when the payload is not known up front:
//!
//! ```no_run
//! use tether::{MessageKind, Session, WebSocketError};
//!
//! fn stream_out(session: &Session) -> Result<(), WebSocketError> {
//!   let mut writer = session.new_partial_writer(MessageKind::Binary)?;
//!   writer.write(b"chunk one", false)?;
//!   writer.write(b"chunk two", false)?;
//!   writer.write(b"tail", true)?;
//!   Ok(())
//! }
//! ```
//!
//! # Diagnostics
//!
//! Internals log through [`logging`]: a leveled sink that defaults to the
//! [`log`] facade. The random source behind mask keys and handshake
//! nonces lives in [`random`] and can be seeded in tests.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod close;
mod codec;
mod config;
mod deflate;
mod error;
mod extension;
mod factory;
mod fragment;
mod frame;
mod handler;
/// Opening handshake pieces, exposed for handshake hooks and tests.
pub mod handshake;
/// Leveled diagnostics sink.
pub mod logging;
mod mask;
/// Process-wide seedable random source.
pub mod random;
mod reactor;
mod session;

pub use crate::close::CloseCode;
pub use crate::config::SessionConfig;
pub use crate::deflate::DeflateConfig;
pub use crate::error::WebSocketError;
pub use crate::extension::Extension;
pub use crate::extension::ExtensionConfig;
pub use crate::extension::Param;
pub use crate::factory::WebSocketFactory;
pub use crate::frame::Frame;
pub use crate::frame::OpCode;
pub use crate::handler::Handler;
pub use crate::handshake::HandshakeHook;
pub use crate::handshake::HandshakeResponse;
pub use crate::logging::LogLevel;
pub use crate::logging::LogSink;
pub use crate::mask::unmask;
pub use crate::session::MessageKind;
pub use crate::session::PartialWriter;
pub use crate::session::Session;
