//! H.266/VVC RTP payload framing (RFC 9328).
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

/// Aggregation Packet.
pub const AP: u8 = 28;
/// Fragmentation Unit.
pub const FU: u8 = 29;

/// H.266 framing per RFC 9328: 2-byte payload/NAL header, 1-byte FU
/// header, AP type 28, FU type 29.
///
/// NAL unit header layout (16 bits, network order):
/// `F(1) Z(1) layer_id(6) | nal_unit_type(5) tid_plus1(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct H266Format;

impl H26xFormat for H266Format {
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
        nal_bytes.get(1).map(|b| (b >> 3) & 0x1F)
    }

    fn nal_semantic(&self, nal_type: u8) -> NalSemantic {
        match nal_type {
            // IDR_W_RADL, IDR_N_LP, CRA_NUT, GDR_NUT (VVC Table 5)
            7..=10 => NalSemantic::Intra,
            0..=5 => NalSemantic::Inter,
            _ => NalSemantic::Other,
        }
    }

    fn ap_type(&self) -> u8 {
        AP
    }

    fn fu_type(&self) -> u8 {
        FU
    }

    fn fu_header_nal_type(&self, fu_header: u8) -> u8 {
        fu_header & 0x1F
    }

    fn nal_header_from_fu(&self, payload: &[u8]) -> Vec<u8> {
        let fu_header = payload[2];
        let nal_type = fu_header & 0x1F;
        let byte1 = (payload[1] & 0x07) | (nal_type << 3);
        vec![payload[0], byte1]
    }

    fn make_type_header(&self, nal_bytes: &[u8], type_value: u8) -> Vec<u8> {
        let byte1 = (nal_bytes[1] & 0x07) | ((type_value & 0x1F) << 3);
        vec![nal_bytes[0], byte1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_nal_type_from_second_header_byte() {
        let fmt = H266Format;
        let idr_type = 7u8;
        let byte1 = idr_type << 3;
        assert_eq!(fmt.get_nal_type(&[0x00, byte1]), Some(idr_type));
        assert_eq!(fmt.nal_semantic(idr_type), NalSemantic::Intra);
    }

    #[test]
    fn type_header_overwrites_second_byte_only() {
        let fmt = H266Format;
        let nal = [0x81u8, (3 << 3) | 0x02]; // layer_id bits + tid bits set
        let header = fmt.make_type_header(&nal, FU);
        assert_eq!(header[0], nal[0]);
        assert_eq!(header[1] & 0x07, nal[1] & 0x07);
        assert_eq!((header[1] >> 3) & 0x1F, FU);
    }
}
