//! Configuration management for the RTP/RTCP protocol engine
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;

/// MTU-derived default media payload size: 1492 B MTU minus 20 B IPv4,
/// 8 B UDP, 12 B RTP header.
pub const DEFAULT_MTU: usize = 1492;
pub const DEFAULT_MAX_FRAME_DELAY_MS: u64 = 100;
pub const DEFAULT_RING_BUFFER_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_SEND_BUFFER_BYTES: usize = 256 * 1024;
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 256 * 1024;
pub const DEFAULT_FPS_NUM: u32 = 30;
pub const DEFAULT_FPS_DEN: u32 = 1;

/// Session-wide defaults, resolved `.env`-then-environment-then-default
/// the way configuration is resolved elsewhere in this codebase family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mtu: usize,
    pub max_frame_delay_ms: u64,
    pub ring_buffer_bytes: usize,
    pub send_buffer_bytes: usize,
    pub recv_buffer_bytes: usize,
    pub fps_num: u32,
    pub fps_den: u32,
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            mtu: DEFAULT_MTU,
            max_frame_delay_ms: DEFAULT_MAX_FRAME_DELAY_MS,
            ring_buffer_bytes: DEFAULT_RING_BUFFER_BYTES,
            send_buffer_bytes: DEFAULT_SEND_BUFFER_BYTES,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
            fps_num: DEFAULT_FPS_NUM,
            fps_den: DEFAULT_FPS_DEN,
            log_level: "info".to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl SessionConfig {
    /// Load configuration from a `.env` file (if present) then the
    /// process environment, falling back to the documented defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = SessionConfig::default();

        SessionConfig {
            mtu: env_or("RTP_MTU", defaults.mtu),
            max_frame_delay_ms: env_or("RTP_MAX_FRAME_DELAY_MS", defaults.max_frame_delay_ms),
            ring_buffer_bytes: env_or("RTP_RING_BUFFER_BYTES", defaults.ring_buffer_bytes),
            send_buffer_bytes: env_or("RTP_SEND_BUFFER_BYTES", defaults.send_buffer_bytes),
            recv_buffer_bytes: env_or("RTP_RECV_BUFFER_BYTES", defaults.recv_buffer_bytes),
            fps_num: env_or("RTP_FPS_NUM", defaults.fps_num),
            fps_den: env_or("RTP_FPS_DEN", defaults.fps_den),
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Media payload size after subtracting IPv4/UDP/RTP header overhead.
    pub fn media_payload_size(&self) -> usize {
        self.mtu.saturating_sub(20 + 8 + 12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SessionConfig::default();
        assert_eq!(config.mtu, 1492);
        assert_eq!(config.max_frame_delay_ms, 100);
        assert_eq!(config.media_payload_size(), 1452);
    }

    #[test]
    fn env_override_takes_effect() {
        std::env::set_var("RTP_MTU", "1200");
        let config = SessionConfig::from_env();
        assert_eq!(config.mtu, 1200);
        std::env::remove_var("RTP_MTU");
    }
}
