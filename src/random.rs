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

//! Process-wide random source for mask keys and handshake nonces.
//!
//! Backed by [`rand::rngs::StdRng`], seeded from the OS on first use.
//! [`seed`] replaces the generator with a deterministic one; reseeding
//! after the first session is undefined as an API contract and exists
//! for tests.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::RngCore;
use rand::SeedableRng;

static RNG: Mutex<Option<StdRng>> = Mutex::new(None);

/// Replaces the process-wide generator with a deterministically seeded one.
pub fn seed(seed: u64) {
  let mut guard = RNG.lock().unwrap_or_else(|e| e.into_inner());
  *guard = Some(StdRng::seed_from_u64(seed));
}

fn fill(buf: &mut [u8]) {
  let mut guard = RNG.lock().unwrap_or_else(|e| e.into_inner());
  guard.get_or_insert_with(StdRng::from_entropy).fill_bytes(buf);
}

/// A fresh 4-byte mask key for an outgoing frame.
pub(crate) fn mask_key() -> [u8; 4] {
  let mut key = [0u8; 4];
  fill(&mut key);
  key
}

/// The 16 raw bytes behind a `Sec-WebSocket-Key` nonce.
pub(crate) fn nonce() -> [u8; 16] {
  let mut nonce = [0u8; 16];
  fill(&mut nonce);
  nonce
}
