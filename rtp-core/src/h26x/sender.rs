//! H26x sender: split one encoded frame into wire-ready payloads.
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

use super::{H26xFormat, NalLocation};
use crate::error::{RtpError, RtpResult};
use crate::start_code::find_start_code;
use bytes::{BufMut, Bytes, BytesMut};

/// Flags affecting a single `push_frame` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushFlags {
    /// Caller already knows NAL boundaries; treat the whole input as one
    /// NAL unit instead of scanning for start codes.
    pub no_start_code_scan: bool,
}

/// One sendable unit: the raw bytes to go out as an RTP payload, and
/// whether this is the last packet of the frame (marker bit).
#[derive(Debug, Clone)]
pub struct OutgoingPayload {
    pub bytes: Bytes,
    pub is_last: bool,
}

/// Locate NAL units in `data` and compute which are small enough to be
/// aggregated together under `payload_budget`.
fn locate_nals(data: &[u8], flags: PushFlags) -> Vec<NalLocation> {
    if flags.no_start_code_scan {
        return vec![NalLocation {
            offset: 0,
            prefix_len: 0,
            size: data.len(),
            aggregatable: false,
        }];
    }

    let mut starts = Vec::new();
    let mut pos = 0;
    while let Some(sc) = find_start_code(data, pos) {
        starts.push((sc.offset, sc.prefix_len));
        pos = sc.offset;
    }

    let mut locations = Vec::with_capacity(starts.len());
    for (i, &(offset, prefix_len)) in starts.iter().enumerate() {
        let size = if i + 1 < starts.len() {
            let (next_offset, next_prefix_len) = starts[i + 1];
            next_offset - next_prefix_len as usize - offset
        } else {
            data.len() - offset
        };
        locations.push(NalLocation {
            offset,
            prefix_len,
            size,
            aggregatable: false,
        });
    }
    locations
}

/// Mark which NAL units fit in a shared aggregation packet under
/// `payload_budget` (§4.3 step 2). Mirrors the source's `scl` sizing
/// pass: a NAL is aggregatable iff its 16-bit-length-prefixed size keeps
/// the running total within budget.
fn mark_aggregatable(nals: &mut [NalLocation], payload_header_size: usize, payload_budget: usize) -> bool {
    let budget = payload_budget.saturating_sub(payload_header_size);
    let mut running = 0usize;
    let mut count = 0;
    for nal in nals.iter_mut() {
        if running + nal.size + 2 <= budget {
            running += nal.size + 2;
            nal.aggregatable = true;
            count += 1;
        }
    }
    count >= 2
}

/// Build one aggregation packet payload from the aggregatable NALs.
fn build_aggregate(fmt: &dyn H26xFormat, data: &[u8], nals: &[NalLocation]) -> Bytes {
    let mut buf = BytesMut::new();
    let first = &data[nals[0].offset..nals[0].offset + nals[0].size];
    let header = fmt.make_type_header(first, fmt.ap_type());
    buf.put_slice(&header);

    for nal in nals.iter().filter(|n| n.aggregatable) {
        let nal_bytes = &data[nal.offset..nal.offset + nal.size];
        buf.put_u16(nal_bytes.len() as u16);
        buf.put_slice(nal_bytes);
    }
    buf.freeze()
}

/// Fragment one NAL unit into a sequence of FU payloads.
fn fragment_nal(fmt: &dyn H26xFormat, nal_bytes: &[u8], payload_budget: usize) -> RtpResult<Vec<Bytes>> {
    let payload_header_size = fmt.payload_header_size();
    let fu_header_size = fmt.fu_header_size();
    let overhead = payload_header_size + fu_header_size;
    if payload_budget <= overhead {
        return Err(RtpError::InvalidValue(
            "payload budget too small for FU headers".into(),
        ));
    }
    let slice_size = payload_budget - overhead;
    let nal_header_size = fmt.nal_header_size();
    let original_nal_type = fmt
        .get_nal_type(nal_bytes)
        .ok_or_else(|| RtpError::InvalidValue("cannot classify NAL type for fragmentation".into()))?;
    let payload_header = fmt.make_type_header(nal_bytes, fmt.fu_type());
    let body = &nal_bytes[nal_header_size..];

    let mut out = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + slice_size).min(body.len());
        let is_start = offset == 0;
        let is_end = end == body.len();
        let mut buf = BytesMut::with_capacity(overhead + (end - offset));
        buf.put_slice(&payload_header);
        buf.put_u8(fmt.make_fu_header(original_nal_type, is_start, is_end));
        buf.put_slice(&body[offset..end]);
        out.push(buf.freeze());
        offset = end;
    }
    Ok(out)
}

/// Split one encoded frame into the scatter-gather list of RTP payloads
/// the frame queue should send, per §4.3.
pub fn push_frame(
    fmt: &dyn H26xFormat,
    data: &[u8],
    payload_budget: usize,
    flags: PushFlags,
) -> RtpResult<Vec<OutgoingPayload>> {
    if data.is_empty() {
        return Err(RtpError::InvalidValue("empty frame".into()));
    }

    let mut nals = locate_nals(data, flags);
    if nals.is_empty() {
        return Err(RtpError::InvalidValue("no NAL units found".into()));
    }

    let can_aggregate = mark_aggregatable(&mut nals, fmt.payload_header_size(), payload_budget);

    let mut payloads: Vec<Bytes> = Vec::new();
    if can_aggregate {
        payloads.push(build_aggregate(fmt, data, &nals));
    }

    for nal in &nals {
        if can_aggregate && nal.aggregatable {
            continue;
        }
        let nal_bytes = &data[nal.offset..nal.offset + nal.size];
        if nal.size <= payload_budget {
            payloads.push(Bytes::copy_from_slice(nal_bytes));
        } else {
            payloads.extend(fragment_nal(fmt, nal_bytes, payload_budget)?);
        }
    }

    let last_index = payloads.len() - 1;
    Ok(payloads
        .into_iter()
        .enumerate()
        .map(|(i, bytes)| OutgoingPayload {
            bytes,
            is_last: i == last_index,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h26x::h265::H265Format;

    fn nal(start_code: &[u8], header: [u8; 2], body_len: usize) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(start_code);
        v.extend_from_slice(&header);
        v.extend(std::iter::repeat(0xAB).take(body_len));
        v
    }

    #[test]
    fn single_nal_fits_in_one_packet() {
        let fmt = H265Format;
        let data = nal(&[0, 0, 0, 1], [0x26, 0x01], 50); // type 19 = IDR
        let out = push_frame(&fmt, &data, 1452, PushFlags::default()).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_last);
    }

    #[test]
    fn large_nal_fragments_into_two_packets() {
        let fmt = H265Format;
        let data = nal(&[0, 0, 0, 1], [0x02, 0x01], 3000); // type 1, trailing
        let out = push_frame(&fmt, &data, 1452, PushFlags::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert!(!out[0].is_last);
        assert!(out[1].is_last);
        let fu_header_first = out[0].bytes[2];
        let fu_header_last = out[1].bytes[2];
        assert_ne!(fu_header_first & 0x80, 0); // S-bit
        assert_ne!(fu_header_last & 0x40, 0); // E-bit
    }

    #[test]
    fn three_small_nals_aggregate() {
        let fmt = H265Format;
        let mut data = Vec::new();
        data.extend(nal(&[0, 0, 0, 1], [0x26, 0x01], 40));
        data.extend(nal(&[0, 0, 0, 1], [0x02, 0x01], 50));
        data.extend(nal(&[0, 0, 0, 1], [0x02, 0x01], 60));
        let out = push_frame(&fmt, &data, 2000, PushFlags::default()).unwrap();
        assert_eq!(out.len(), 1);
    }
}
