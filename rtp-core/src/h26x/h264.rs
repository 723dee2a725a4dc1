//! H.264 RTP payload framing (RFC 6184).
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

/// STAP-A (single-time aggregation packet).
pub const STAP_A: u8 = 24;
/// FU-A (fragmentation unit).
pub const FU_A: u8 = 28;

/// H.264 framing per RFC 6184: 1-byte NAL/payload header, AP type 24,
/// FU type 28.
#[derive(Debug, Default, Clone, Copy)]
pub struct H264Format;

impl H26xFormat for H264Format {
    fn payload_header_size(&self) -> usize {
        1
    }

    fn nal_header_size(&self) -> usize {
        1
    }

    fn fu_header_size(&self) -> usize {
        1
    }

    fn get_nal_type(&self, nal_bytes: &[u8]) -> Option<u8> {
        nal_bytes.first().map(|b| b & 0x1F)
    }

    fn nal_semantic(&self, nal_type: u8) -> NalSemantic {
        match nal_type {
            5 => NalSemantic::Intra, // IDR slice
            1 => NalSemantic::Inter, // non-IDR slice
            _ => NalSemantic::Other,
        }
    }

    fn ap_type(&self) -> u8 {
        STAP_A
    }

    fn fu_type(&self) -> u8 {
        FU_A
    }

    fn fu_header_nal_type(&self, fu_header: u8) -> u8 {
        fu_header & 0x1F
    }

    fn nal_header_from_fu(&self, payload: &[u8]) -> Vec<u8> {
        // payload[0] = FU indicator (F, NRI, type=28), payload[1] = FU header.
        let fu_indicator = payload[0];
        let fu_header = payload[1];
        let nal_type = fu_header & 0x1F;
        vec![(fu_indicator & 0xE0) | nal_type]
    }

    fn make_type_header(&self, nal_bytes: &[u8], type_value: u8) -> Vec<u8> {
        vec![(nal_bytes[0] & 0xE0) | (type_value & 0x1F)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_idr_as_intra() {
        let fmt = H264Format;
        assert_eq!(fmt.nal_semantic(5), NalSemantic::Intra);
        assert_eq!(fmt.nal_semantic(1), NalSemantic::Inter);
        assert_eq!(fmt.nal_semantic(7), NalSemantic::Other);
    }

    #[test]
    fn reconstructs_nal_header_from_fu() {
        let fmt = H264Format;
        let fu_indicator = 0x60; // NRI=3
        let fu_header = 0x85; // S-bit + type 5 (IDR)
        let header = fmt.nal_header_from_fu(&[fu_indicator, fu_header, 0xAB]);
        assert_eq!(header, vec![0x65]);
    }

    #[test]
    fn type_header_preserves_framing_bits() {
        let fmt = H264Format;
        let nal = [0x65u8, 0xAB]; // F=0, NRI=3, type=5 (IDR)
        let header = fmt.make_type_header(&nal, FU_A);
        assert_eq!(header, vec![0x60 | FU_A]);
    }
}
