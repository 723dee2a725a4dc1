//! V3C (visual volumetric video-based coding) RTP payload framing.
//!
//! Framed isomorphically to H.266 (2-byte payload/NAL header, 1-byte FU
//! header) but with its own AP/FU type constants.
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

use super::{H26xFormat, NalSemantic};

/// Aggregation packet.
pub const V3C_PKT_AGGR: u8 = 56;
/// Fragmentation unit.
pub const V3C_PKT_FRAG: u8 = 57;

/// V3C NAL unit type: random-access ("BLA") picture.
pub const NAL_BLA_W_LP: u8 = 0;
/// V3C NAL unit type: reserved IRAP range.
pub const NAL_RSV_IRAP_ACL_29: u8 = 1;

/// The NAL-type extraction mandated here reads bits 1-6 of the first
/// header byte, matching the H.266 family's bit layout rather than the
/// single-byte-exceeding mask `data[0] & 0x10F447` used upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct V3cFormat;

impl H26xFormat for V3cFormat {
    fn payload_header_size(&self) -> usize {
        2
    }

    fn nal_header_size(&self) -> usize {
        2
    }

    fn fu_header_size(&self) -> usize {
        1
    }

    fn get_nal_type(&self, nal_bytes: &[u8]) -> Option<u8> {
        nal_bytes.first().map(|b| (b >> 1) & 0x3F)
    }

    fn nal_semantic(&self, nal_type: u8) -> NalSemantic {
        match nal_type {
            t if t == NAL_BLA_W_LP as u8 => NalSemantic::Intra,
            t if t == NAL_RSV_IRAP_ACL_29 as u8 => NalSemantic::Intra,
            _ => NalSemantic::Other,
        }
    }

    fn ap_type(&self) -> u8 {
        V3C_PKT_AGGR
    }

    fn fu_type(&self) -> u8 {
        V3C_PKT_FRAG
    }

    fn fu_header_nal_type(&self, fu_header: u8) -> u8 {
        fu_header & 0x3F
    }

    fn nal_header_from_fu(&self, payload: &[u8]) -> Vec<u8> {
        let fu_header = payload[2];
        let nal_type = fu_header & 0x3F;
        let byte0 = (payload[0] & 0x81) | (nal_type << 1);
        vec![byte0, payload[1]]
    }

    fn make_type_header(&self, nal_bytes: &[u8], type_value: u8) -> Vec<u8> {
        let byte0 = (nal_bytes[0] & 0x81) | ((type_value & 0x3F) << 1);
        vec![byte0, nal_bytes[1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nal_type_within_one_byte() {
        let fmt = V3cFormat;
        let byte0 = NAL_BLA_W_LP << 1;
        assert_eq!(fmt.get_nal_type(&[byte0, 0x00]), Some(NAL_BLA_W_LP));
        assert_eq!(fmt.nal_semantic(NAL_BLA_W_LP), NalSemantic::Intra);
    }

    #[test]
    fn ap_and_fu_types_differ_from_h266() {
        let fmt = V3cFormat;
        assert_eq!(fmt.ap_type(), 56);
        assert_eq!(fmt.fu_type(), 57);
    }
}
