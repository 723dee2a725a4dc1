//! H.265/HEVC RTP payload framing (RFC 7798).
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
pub const AP: u8 = 48;
/// Fragmentation Unit.
pub const FU: u8 = 49;

/// H.265 framing per RFC 7798: 2-byte payload/NAL header, AP type 48,
/// FU type 49.
#[derive(Debug, Default, Clone, Copy)]
pub struct H265Format;

impl H26xFormat for H265Format {
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
            // BLA_W_LP .. RSV_IRAP_VCL23 (RFC 7798 table, NAL types 16-23)
            16..=23 => NalSemantic::Intra,
            0..=9 => NalSemantic::Inter, // TRAIL_N .. RASL_R
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
        fu_header & 0x3F
    }

    fn nal_header_from_fu(&self, payload: &[u8]) -> Vec<u8> {
        // payload[0..2] = payload header (F, type=49, layer_id, tid),
        // payload[2] = FU header carrying the real type.
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
    fn classifies_idr_as_intra() {
        let fmt = H265Format;
        assert_eq!(fmt.nal_semantic(19), NalSemantic::Intra);
        assert_eq!(fmt.nal_semantic(1), NalSemantic::Inter);
        assert_eq!(fmt.nal_semantic(32), NalSemantic::Other);
    }

    #[test]
    fn reads_two_byte_nal_type() {
        let fmt = H265Format;
        // type 19 (IDR_W_RADL) -> byte0 bit layout: 0 type(6) layerid_msb(1)
        let byte0 = 19 << 1;
        assert_eq!(fmt.get_nal_type(&[byte0, 0x01]), Some(19));
    }

    #[test]
    fn type_header_overwrites_type_keeps_framing_bits() {
        let fmt = H265Format;
        let nal = [0x02u8, 0x01]; // type 1, layer_id/tid bits set
        let header = fmt.make_type_header(&nal, FU);
        assert_eq!(header[0] & 0x81, nal[0] & 0x81);
        assert_eq!((header[0] >> 1) & 0x3F, FU);
        assert_eq!(header[1], nal[1]);
    }
}
