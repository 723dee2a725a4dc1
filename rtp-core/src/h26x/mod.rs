//! H.26x / V3C fragmentation-and-reassembly engine.
//!
//! Format-specific framing differences (H.264/H.265/H.266/V3C) are
//! encapsulated entirely behind the [`H26xFormat`] capability trait; the
//! sender and receiver state machines in this module are written once
//! against that trait.
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

pub mod h264;
pub mod h265;
pub mod h266;
pub mod v3c;
pub mod receiver;
pub mod sender;

use crate::wire::RtpPacket;

/// How one RTP packet's payload relates to the NAL unit(s) it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragType {
    /// One whole NAL unit.
    Single,
    /// Several whole NAL units packed together (AP / STAP-A).
    Aggregate,
    /// First fragment of a NAL unit.
    FragmentStart,
    /// Interior fragment of a NAL unit.
    FragmentMiddle,
    /// Last fragment of a NAL unit.
    FragmentEnd,
    /// Payload does not parse as any of the above.
    Invalid,
}

/// Coarse semantic category of a NAL unit, used only by the intra-delay
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NalSemantic {
    Intra,
    Inter,
    Other,
}

/// Capability set implemented once per payload family (H.264 / H.265 /
/// H.266 / V3C). Dispatch happens once per stream at construction time,
/// never per packet.
pub trait H26xFormat: Send + Sync {
    /// Size in bytes of the payload header carried by every AP/FU packet
    /// (1 for H.264, 2 for H.265/H.266/V3C).
    fn payload_header_size(&self) -> usize;

    /// Size in bytes of the NAL header proper (reconstructed on the
    /// receive side).
    fn nal_header_size(&self) -> usize;

    /// Size in bytes of the FU header that follows the payload header in
    /// a fragmentation-unit packet.
    fn fu_header_size(&self) -> usize;

    /// Number of bytes the start-code scanner advances per iteration
    /// (always 4 here; kept as a capability for parity with the source).
    fn start_code_range(&self) -> usize {
        4
    }

    /// NAL type field (format-specific width) read from the first bytes
    /// of a whole NAL unit (post start-code).
    fn get_nal_type(&self, nal_bytes: &[u8]) -> Option<u8>;

    /// Semantic category derived from a NAL type value.
    fn nal_semantic(&self, nal_type: u8) -> NalSemantic;

    /// This family's aggregation-packet type value.
    fn ap_type(&self) -> u8;

    /// This family's fragmentation-unit type value.
    fn fu_type(&self) -> u8;

    /// Classify a received RTP packet's payload.
    fn fragment_type(&self, payload: &[u8]) -> FragType {
        if payload.len() < self.payload_header_size() {
            return FragType::Invalid;
        }
        let Some(nal_type) = self.get_nal_type(payload) else {
            return FragType::Invalid;
        };
        if nal_type == self.ap_type() {
            return FragType::Aggregate;
        }
        if nal_type == self.fu_type() {
            let fu_header_offset = self.payload_header_size();
            if payload.len() <= fu_header_offset {
                return FragType::Invalid;
            }
            let fu_header = payload[fu_header_offset];
            let start = fu_header & 0x80 != 0;
            let end = fu_header & 0x40 != 0;
            return match (start, end) {
                (true, _) => FragType::FragmentStart,
                (_, true) => FragType::FragmentEnd,
                _ => FragType::FragmentMiddle,
            };
        }
        FragType::Single
    }

    /// The FU header's embedded original NAL type field.
    fn fu_header_nal_type(&self, fu_header: u8) -> u8;

    /// Build an FU header byte for one fragment.
    fn make_fu_header(&self, original_nal_type: u8, start: bool, end: bool) -> u8 {
        let mut b = original_nal_type & 0x3F;
        if start {
            b |= 0x80;
        }
        if end {
            b |= 0x40;
        }
        b
    }

    /// Reconstruct the original NAL header bytes from the payload header
    /// and FU header of the first fragment.
    fn nal_header_from_fu(&self, payload: &[u8]) -> Vec<u8>;

    /// Build the payload header carried ahead of an AP or FU packet:
    /// the framing bits (`F`/`NRI`/layer id/`tid`) copied from
    /// `nal_bytes`'s own header, with the type field overwritten to
    /// `type_value` (the family's AP or FU type).
    fn make_type_header(&self, nal_bytes: &[u8], type_value: u8) -> Vec<u8>;
}

/// A captured location of a NAL unit inside a raw bytestream, produced by
/// the start-code scanner step of the sender pipeline.
#[derive(Debug, Clone, Copy)]
pub struct NalLocation {
    pub offset: usize,
    pub prefix_len: u8,
    pub size: usize,
    pub aggregatable: bool,
}

/// One fully reconstructed or pass-through frame handed back to the
/// caller of the receiver.
#[derive(Debug, Clone)]
pub struct ReassembledFrame {
    pub packet: RtpPacket,
}
