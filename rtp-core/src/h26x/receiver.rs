//! H26x receiver — the heart of the system (§4.7).
//!
//! Buckets incoming fragments by RTP timestamp, tracks first/last
//! fragment, detects duplicates, reconstructs NAL units, enforces
//! intra-dependency discipline, and garbage-collects stalled frames.
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

use super::{FragType, H26xFormat, NalSemantic};
use crate::reception::HandlerOutcome;
use crate::wire::{RtpHeader, RtpPacket};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often `garbage_collect` is allowed to actually walk the table,
/// amortizing the cost of the sweep (§4.7 step 9).
const GARBAGE_COLLECTION_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed-size fragment store: one owning slot per possible sequence
/// number. Collisions on wrap are resolved by freeing the stale entry.
const FRAGMENT_STORE_SIZE: usize = 1 << 16;

/// Feature flags that gate optional receiver behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiverFlags {
    /// Prepend a 4-byte start code to reconstructed/passthrough NALs.
    pub prepend_start_code: bool,
    /// Drop inter frames depending on a missing reference until a fresh
    /// intra frame is seen (the "H26x-intra-delay" flag).
    pub intra_delay: bool,
}

/// Result of feeding one validated RTP packet to the receiver.
#[derive(Debug)]
pub enum H26xOutcome {
    /// One frame is ready, returned directly.
    Ready(RtpPacket),
    /// One or more frames were queued; drain with `drain_queued`.
    MultipleReady,
    /// The fragment was absorbed; no frame completed yet.
    Continue,
    /// The packet was dropped; reason is logged, not surfaced as an
    /// error per the contained-failure propagation policy (§7).
    Dropped,
}

struct FrameRecord {
    start_time: Instant,
    nal_semantic: NalSemantic,
    start_received: bool,
    end_received: bool,
    start_seq: u16,
    end_seq: u16,
    total_size: usize,
    received_seqs: HashSet<u16>,
}

impl FrameRecord {
    fn new(nal_semantic: NalSemantic) -> Self {
        Self {
            start_time: Instant::now(),
            nal_semantic,
            start_received: false,
            end_received: false,
            start_seq: 0,
            end_seq: 0,
            total_size: 0,
            received_seqs: HashSet::new(),
        }
    }
}

pub struct H26xReceiver<F: H26xFormat> {
    fmt: F,
    flags: ReceiverFlags,
    max_frame_delay: Duration,
    fragments: Box<[Option<RtpPacket>]>,
    frames: HashMap<u32, FrameRecord>,
    dropped: HashSet<u32>,
    discard_until_intra: bool,
    last_gc: Instant,
    queued: VecDeque<RtpPacket>,
}

impl<F: H26xFormat> H26xReceiver<F> {
    pub fn new(fmt: F, max_frame_delay: Duration, flags: ReceiverFlags) -> Self {
        let fragments: Vec<Option<RtpPacket>> = (0..FRAGMENT_STORE_SIZE).map(|_| None).collect();
        Self {
            fmt,
            flags,
            max_frame_delay,
            fragments: fragments.into_boxed_slice(),
            frames: HashMap::new(),
            dropped: HashSet::new(),
            discard_until_intra: true,
            last_gc: Instant::now(),
            queued: VecDeque::new(),
        }
    }

    /// Drain one queued frame produced by an aggregation packet.
    pub fn drain_queued(&mut self) -> Option<RtpPacket> {
        self.queued.pop_front()
    }

    /// Adapt this receiver as a handler-chain entry: parse raw bytes as
    /// RTP and feed the result to `packet_handler`.
    pub fn handle_packet_bytes(&mut self, bytes: &[u8]) -> HandlerOutcome {
        let packet = match RtpPacket::parse(bytes) {
            Ok(packet) => packet,
            Err(_) => return HandlerOutcome::PktNotHandled,
        };

        match self.packet_handler(packet) {
            H26xOutcome::Ready(packet) => HandlerOutcome::PktReady(packet),
            H26xOutcome::MultipleReady => {
                let mut packets = Vec::new();
                while let Some(packet) = self.drain_queued() {
                    packets.push(packet);
                }
                HandlerOutcome::MultiplePktsReady(packets)
            }
            H26xOutcome::Continue => HandlerOutcome::Ok,
            H26xOutcome::Dropped => HandlerOutcome::PktNotHandled,
        }
    }

    fn free_fragment(&mut self, seq: u16) {
        self.fragments[seq as usize] = None;
    }

    fn maybe_prepend_start_code(&self, nal: Vec<u8>) -> Vec<u8> {
        if !self.flags.prepend_start_code {
            return nal;
        }
        let mut out = Vec::with_capacity(nal.len() + 4);
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&nal);
        out
    }

    fn drop_frame(&mut self, ts: u32) {
        if let Some(record) = self.frames.remove(&ts) {
            for seq in &record.received_seqs {
                self.free_fragment(*seq);
            }
        }
        self.dropped.insert(ts);
        self.discard_until_intra = true;
    }

    /// Feed one validated RTP packet whose payload belongs to this
    /// format family.
    pub fn packet_handler(&mut self, frame: RtpPacket) -> H26xOutcome {
        let frag_type = self.fmt.fragment_type(&frame.payload);

        match frag_type {
            FragType::Aggregate => return self.handle_aggregation_packet(frame),
            FragType::Single => {
                let nal = self.maybe_prepend_start_code(frame.payload.to_vec());
                return H26xOutcome::Ready(RtpPacket {
                    header: frame.header,
                    payload: nal.into(),
                });
            }
            FragType::Invalid => {
                warn!("invalid H26x frame received");
                return H26xOutcome::Dropped;
            }
            _ => {}
        }

        let ts = frame.header.timestamp;
        let seq = frame.header.sequence_number;

        if self.dropped.contains(&ts) {
            debug!(timestamp = ts, "fragment belonging to a dropped frame");
            return H26xOutcome::Dropped;
        }

        let payload_header_size = self.fmt.payload_header_size();
        let fu_header_size = self.fmt.fu_header_size();
        let overhead = payload_header_size + fu_header_size;
        if frame.payload.len() <= overhead {
            warn!("fragment too short to carry payload/FU headers");
            return H26xOutcome::Dropped;
        }
        let fu_header = frame.payload[payload_header_size];
        let nal_type = self.fmt.fu_header_nal_type(fu_header);
        let semantic = self.fmt.nal_semantic(nal_type);

        if !self.frames.contains_key(&ts) {
            self.frames.insert(ts, FrameRecord::new(semantic));
        }

        {
            let record = self.frames.get(&ts).unwrap();
            if record.received_seqs.contains(&seq) {
                debug!(seq, "duplicate fragment dropped");
                return H26xOutcome::Dropped;
            }
            if record.nal_semantic != semantic {
                warn!("fragment has inconsistent NAL semantic for this frame");
                return H26xOutcome::Dropped;
            }
        }

        if self.fragments[seq as usize].is_some() {
            warn!(seq, "wrap collision in fragment store, freeing stale entry");
            self.free_fragment(seq);
        }
        self.fragments[seq as usize] = Some(frame.clone());

        let record = self.frames.get_mut(&ts).unwrap();
        record.received_seqs.insert(seq);
        record.total_size += frame.payload.len() - overhead;

        match frag_type {
            FragType::FragmentStart => {
                record.start_seq = seq;
                record.start_received = true;
            }
            FragType::FragmentEnd => {
                record.end_seq = seq;
                record.end_received = true;
            }
            _ => {}
        }

        if record.start_received && record.end_received {
            let expected = (record.end_seq.wrapping_sub(record.start_seq) as u32) + 1;
            if record.received_seqs.len() as u32 == expected {
                if self.flags.intra_delay && self.discard_until_intra {
                    let nal_semantic = record.nal_semantic;
                    if nal_semantic == NalSemantic::Inter {
                        warn!(timestamp = ts, "dropping frame, missing reference");
                        self.drop_frame(ts);
                        return H26xOutcome::Dropped;
                    } else if nal_semantic == NalSemantic::Intra {
                        info!(timestamp = ts, "found a key frame, clearing intra-delay latch");
                        self.discard_until_intra = false;
                    }
                }
                return self.reconstruct(ts, overhead);
            }
        }

        self.garbage_collect();
        H26xOutcome::Continue
    }

    fn reconstruct(&mut self, ts: u32, overhead: usize) -> H26xOutcome {
        let (start_seq, end_seq, total_size) = {
            let record = self.frames.get(&ts).unwrap();
            (record.start_seq, record.end_seq, record.total_size)
        };

        let start_fragment = match &self.fragments[start_seq as usize] {
            Some(f) => f.clone(),
            None => {
                warn!("missing start fragment in reconstruction");
                self.frames.remove(&ts);
                return H26xOutcome::Dropped;
            }
        };

        let nal_header = self.fmt.nal_header_from_fu(&start_fragment.payload);
        let mut complete = Vec::with_capacity(nal_header.len() + total_size);
        complete.extend_from_slice(&nal_header);

        let mut s = start_seq;
        loop {
            match self.fragments[s as usize].take() {
                Some(fragment) => {
                    complete.extend_from_slice(&fragment.payload[overhead..]);
                }
                None => {
                    warn!(
                        start_seq,
                        end_seq, missing = s, "missing fragment in reconstruction"
                    );
                    self.frames.remove(&ts);
                    return H26xOutcome::Dropped;
                }
            }
            if s == end_seq {
                break;
            }
            s = s.wrapping_add(1);
        }

        let header = start_fragment.header.clone();
        self.frames.remove(&ts);

        H26xOutcome::Ready(RtpPacket {
            header,
            payload: self.maybe_prepend_start_code(complete).into(),
        })
    }

    fn handle_aggregation_packet(&mut self, frame: RtpPacket) -> H26xOutcome {
        let header_size = self.fmt.payload_header_size();
        let payload = &frame.payload;
        if payload.len() < header_size {
            return H26xOutcome::Dropped;
        }

        let mut i = header_size;
        let mut runs = Vec::new();
        let mut size_seen = 0usize;
        while i + 2 <= payload.len() {
            let run_len = u16::from_be_bytes([payload[i], payload[i + 1]]) as usize;
            i += 2;
            size_seen += run_len;
            if size_seen > payload.len() {
                warn!("aggregation packet claims to be larger than the packet");
                return H26xOutcome::Dropped;
            }
            if i + run_len > payload.len() {
                warn!("aggregation packet run exceeds remaining payload");
                return H26xOutcome::Dropped;
            }
            runs.push((i, run_len));
            i += run_len;
        }

        for (offset, len) in runs {
            let nal = self.maybe_prepend_start_code(payload[offset..offset + len].to_vec());
            self.queued.push_back(RtpPacket {
                header: frame.header.clone(),
                payload: nal.into(),
            });
        }

        H26xOutcome::MultipleReady
    }

    /// Walk all in-flight records and drop any older than
    /// `max_frame_delay`, at most once per 100 ms.
    pub fn garbage_collect(&mut self) -> usize {
        if self.last_gc.elapsed() < GARBAGE_COLLECTION_INTERVAL {
            return 0;
        }

        let stale: Vec<u32> = self
            .frames
            .iter()
            .filter(|(_, r)| r.start_time.elapsed() > self.max_frame_delay)
            .map(|(ts, _)| *ts)
            .collect();

        let mut reclaimed = 0;
        for ts in stale {
            warn!(timestamp = ts, "garbage-collecting stalled frame");
            if let Some(record) = self.frames.get(&ts) {
                reclaimed += record.total_size;
            }
            self.drop_frame(ts);
        }

        if reclaimed > 0 {
            info!(bytes = reclaimed, "garbage collection reclaimed fragments");
        }
        self.last_gc = Instant::now();
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h26x::h265::H265Format;
    use crate::h26x::sender::{push_frame, PushFlags};
    use bytes::Bytes;

    fn header(seq: u16, ts: u32) -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: seq,
            timestamp: ts,
            ssrc: 0xBEEF,
            csrc: vec![],
            extension_header: None,
        }
    }

    fn packets_for(data: &[u8], budget: usize, ts: u32, start_seq: u16) -> Vec<RtpPacket> {
        let fmt = H265Format;
        let outgoing = push_frame(&fmt, data, budget, PushFlags::default()).unwrap();
        outgoing
            .into_iter()
            .enumerate()
            .map(|(i, p)| RtpPacket {
                header: header(start_seq.wrapping_add(i as u16), ts),
                payload: p.bytes,
            })
            .collect()
    }

    #[test]
    fn round_trips_single_nal() {
        let mut data = vec![0, 0, 0, 1, 0x26, 0x01];
        data.extend(std::iter::repeat(0xCD).take(50));
        let packets = packets_for(&data, 1452, 1000, 1);
        assert_eq!(packets.len(), 1);

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(100), ReceiverFlags::default());
        match recv.packet_handler(packets[0].clone()) {
            H26xOutcome::Ready(out) => {
                assert_eq!(out.payload, Bytes::copy_from_slice(&data[4..]));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn reassembles_out_of_order_fragments() {
        let mut data = vec![0, 0, 0, 1, 0x02, 0x01];
        data.extend(std::iter::repeat(0xAB).take(4000));
        let packets = packets_for(&data, 1452, 2000, 10);
        assert!(packets.len() >= 3);

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(100), ReceiverFlags::default());
        let mut reordered = packets.clone();
        reordered.rotate_left(1); // deliver middle(s) then end, then start last-ish
        reordered.swap(reordered.len() - 1, 0);

        let mut last = None;
        for p in reordered {
            if let H26xOutcome::Ready(out) = recv.packet_handler(p) {
                last = Some(out);
            }
        }
        let out = last.expect("frame should complete once all fragments arrive");
        assert_eq!(out.payload, Bytes::copy_from_slice(&data[4..]));
    }

    #[test]
    fn duplicate_fragment_is_dropped_without_affecting_result() {
        let mut data = vec![0, 0, 0, 1, 0x02, 0x01];
        data.extend(std::iter::repeat(0xAB).take(3000));
        let packets = packets_for(&data, 1452, 3000, 5);
        assert_eq!(packets.len(), 2);

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(100), ReceiverFlags::default());
        assert!(matches!(
            recv.packet_handler(packets[0].clone()),
            H26xOutcome::Continue
        ));
        // duplicate of the first fragment
        assert!(matches!(
            recv.packet_handler(packets[0].clone()),
            H26xOutcome::Dropped
        ));
        match recv.packet_handler(packets[1].clone()) {
            H26xOutcome::Ready(out) => assert_eq!(out.payload, Bytes::copy_from_slice(&data[4..])),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn late_frame_never_completes() {
        let mut data = vec![0, 0, 0, 1, 0x02, 0x01];
        data.extend(std::iter::repeat(0xAB).take(3000));
        let packets = packets_for(&data, 1452, 4000, 20);

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(1), ReceiverFlags::default());
        assert!(matches!(
            recv.packet_handler(packets[0].clone()),
            H26xOutcome::Continue
        ));
        std::thread::sleep(Duration::from_millis(120));
        recv.garbage_collect();
        match recv.packet_handler(packets[1].clone()) {
            H26xOutcome::Dropped => {}
            other => panic!("expected Dropped for straggler, got {:?}", other),
        }
    }

    #[test]
    fn sequence_wrap_reconstructs_correctly() {
        let mut data = vec![0, 0, 0, 1, 0x02, 0x01];
        data.extend(std::iter::repeat(0xAB).take(3000));
        // start_seq = 65534 wraps past 65535 into the new cycle.
        let packets = packets_for(&data, 1452, 5000, 65534);

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(100), ReceiverFlags::default());
        assert!(matches!(
            recv.packet_handler(packets[0].clone()),
            H26xOutcome::Continue
        ));
        match recv.packet_handler(packets[1].clone()) {
            H26xOutcome::Ready(out) => assert_eq!(out.payload, Bytes::copy_from_slice(&data[4..])),
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[test]
    fn aggregation_packet_expands_to_multiple_frames() {
        let fmt = H265Format;
        let mut data = Vec::new();
        for len in [40usize, 50, 60] {
            data.extend_from_slice(&[0, 0, 0, 1, 0x26, 0x01]);
            data.extend(std::iter::repeat(0xEE).take(len));
        }
        let outgoing = push_frame(&fmt, &data, 2000, PushFlags::default()).unwrap();
        assert_eq!(outgoing.len(), 1);

        let packet = RtpPacket {
            header: header(1, 6000),
            payload: outgoing[0].bytes.clone(),
        };

        let mut recv = H26xReceiver::new(H265Format, Duration::from_millis(100), ReceiverFlags::default());
        match recv.packet_handler(packet) {
            H26xOutcome::MultipleReady => {}
            other => panic!("expected MultipleReady, got {:?}", other),
        }
        let mut count = 0;
        while recv.drain_queued().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
