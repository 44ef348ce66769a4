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

/// (Un)masks a frame payload in place: `payload[i] ^= mask[i % 4]`.
///
/// XOR is an involution, so the same routine serves both directions.
pub fn unmask(payload: &mut [u8], mask: [u8; 4]) {
  for (i, byte) in payload.iter_mut().enumerate() {
    *byte ^= mask[i & 3];
  }
}
