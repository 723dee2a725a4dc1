//! RTP validator handler (§4.6): the primary handler near the front of
//! the chain that turns raw bytes into a typed, validated frame.
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
use crate::wire::RtpPacket;
use std::net::SocketAddr;
use tracing::trace;

/// Decode `bytes` as RTP and report the outcome for the handler chain.
///
/// A version mismatch or any other parse failure returns
/// `PktNotHandled` rather than `GenericError`: ZRTP packets also reach
/// this point in the chain and do not carry RTP's version-2 marker, so
/// the validator must yield to the next handler rather than treat
/// every non-RTP datagram as damaged.
pub fn validate(bytes: &[u8], _from: SocketAddr) -> HandlerOutcome {
    match RtpPacket::parse(bytes) {
        Ok(packet) => {
            trace!(
                seq = packet.header.sequence_number,
                ssrc = packet.header.ssrc,
                "validated RTP packet"
            );
            HandlerOutcome::PktModified(packet.serialize().to_vec())
        }
        Err(_) => HandlerOutcome::PktNotHandled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RtpHeader;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn valid_packet_passes_through_modified() {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1,
            ssrc: 1,
            csrc: vec![],
            extension_header: None,
        };
        let mut buf = header.serialize();
        buf.extend_from_slice(b"payload");

        match validate(&buf, addr()) {
            HandlerOutcome::PktModified(_) => {}
            other => panic!("expected PktModified, got {:?}", other),
        }
    }

    #[test]
    fn non_rtp_version_is_not_handled() {
        let garbage = [0x00u8; 12];
        match validate(&garbage, addr()) {
            HandlerOutcome::PktNotHandled => {}
            other => panic!("expected PktNotHandled, got {:?}", other),
        }
    }

    #[test]
    fn truncated_packet_is_not_handled() {
        let truncated = [0x80u8, 0x60, 0x00];
        match validate(&truncated, addr()) {
            HandlerOutcome::PktNotHandled => {}
            other => panic!("expected PktNotHandled, got {:?}", other),
        }
    }
}
