//! ZRTP demux stub (§4.10, explicitly partial).
//!
//! Recognizes ZRTP traffic by its magic cookie so the reception chain
//! can route it away from the RTP validator; no key-agreement
//! cryptography is implemented here.
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

use crate::reception::HandlerOutcome;
use std::net::SocketAddr;
use tracing::debug;

/// ZRTP Hello/Commit/etc. messages carry this 4-byte cookie where an
/// RTP packet would carry its version bits and first CSRC/extension
/// word (RFC 6189 §5.2).
const ZRTP_MAGIC_COOKIE: u32 = 0x5a52_5450;

/// Offset of the magic cookie within a ZRTP message.
const COOKIE_OFFSET: usize = 4;

/// Recognize ZRTP traffic and route it away from the RTP validator.
///
/// Ordinary RTP packets return `PktNotHandled` so the validator, which
/// runs later in the chain, still gets a chance to match them.
pub fn demux(bytes: &[u8], _from: SocketAddr) -> HandlerOutcome {
    if bytes.len() < COOKIE_OFFSET + 4 {
        return HandlerOutcome::PktNotHandled;
    }
    let cookie = u32::from_be_bytes([
        bytes[COOKIE_OFFSET],
        bytes[COOKIE_OFFSET + 1],
        bytes[COOKIE_OFFSET + 2],
        bytes[COOKIE_OFFSET + 3],
    ]);

    if cookie == ZRTP_MAGIC_COOKIE {
        debug!("ZRTP packet recognized, routing away from RTP validator");
        // No ZRTP engine is implemented; return a terminal outcome so
        // the packet is dropped here rather than falling through to
        // SRTP decrypt / RTP validation like unrecognized traffic.
        return HandlerOutcome::GenericError(
            "zrtp: no key-agreement engine implemented".into(),
        );
    }

    HandlerOutcome::PktNotHandled
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn recognizes_zrtp_cookie() {
        let mut bytes = vec![0u8; 16];
        bytes[COOKIE_OFFSET..COOKIE_OFFSET + 4].copy_from_slice(&ZRTP_MAGIC_COOKIE.to_be_bytes());
        match demux(&bytes, addr()) {
            HandlerOutcome::GenericError(_) => {}
            other => panic!("expected GenericError, got {:?}", other),
        }
    }

    #[test]
    fn short_packet_is_not_handled() {
        let bytes = [0u8; 2];
        match demux(&bytes, addr()) {
            HandlerOutcome::PktNotHandled => {}
            other => panic!("expected PktNotHandled, got {:?}", other),
        }
    }
}
