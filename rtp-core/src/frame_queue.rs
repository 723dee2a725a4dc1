//! Frame queue: send-path packet assembly for one encoded frame (§4.4).
//!
//! Wraps the scatter-gather payload list produced by the H26x sender
//! with freshly sequenced RTP headers, optionally paces the burst, and
//! writes each packet to the socket.
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

use crate::error::{RtpError, RtpResult};
use crate::h26x::sender::OutgoingPayload;
use crate::srtp_pipeline::SrtpPipeline;
use crate::wire::{RtpHeader, RtpPacket};
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How a transaction's packets are spread over time on `flush`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Pacing {
    /// Emit the whole burst back-to-back.
    #[default]
    None,
    /// Block until the next frame's scheduled send time.
    FrameRate,
    /// Spread this frame's packets over 80% of the frame interval.
    FragmentPacing,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameQueueConfig {
    pub pacing: Pacing,
    pub fps_numerator: u32,
    pub fps_denominator: u32,
    /// Append a zeroed 10-byte SRTP authentication tag placeholder.
    pub srtp_authenticate: bool,
    /// Hand the whole burst to `sendmmsg(2)` instead of one `sendto(2)`
    /// per packet. Ignored when fragment pacing spaces packets out in
    /// time, since clustering requires them to leave back-to-back.
    pub syscall_clustering: bool,
}

impl Default for FrameQueueConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::None,
            fps_numerator: 30,
            fps_denominator: 1,
            srtp_authenticate: false,
            syscall_clustering: false,
        }
    }
}

/// Builds and sends one frame's RTP packets sharing a common SSRC and
/// payload type, incrementing the sequence counter as it goes.
pub struct FrameQueue {
    ssrc: u32,
    payload_type: u8,
    next_seq: u16,
    config: FrameQueueConfig,
    frame_interval: Duration,
    sync_point: Option<Instant>,
    frames_since_sync: u32,
    /// When set, each packet is run through the SRTP transform instead
    /// of the plaintext placeholder-tag path.
    srtp: Option<Arc<SrtpPipeline>>,
}

impl FrameQueue {
    pub fn new(ssrc: u32, payload_type: u8, config: FrameQueueConfig) -> Self {
        let frame_interval = Self::compute_interval(config.fps_numerator, config.fps_denominator);
        Self {
            ssrc,
            payload_type,
            next_seq: 0,
            config,
            frame_interval,
            sync_point: None,
            frames_since_sync: 0,
            srtp: None,
        }
    }

    /// Route every outgoing packet through an SRTP transform.
    pub fn with_srtp(mut self, srtp: Arc<SrtpPipeline>) -> Self {
        self.srtp = Some(srtp);
        self
    }

    fn compute_interval(numerator: u32, denominator: u32) -> Duration {
        if numerator > 0 && denominator > 0 {
            Duration::from_secs_f64(denominator as f64 / numerator as f64)
        } else {
            Duration::from_millis(33)
        }
    }

    /// Re-derive the frame interval and force a pacing resync on the
    /// next `flush`.
    pub fn set_fps(&mut self, numerator: u32, denominator: u32) {
        self.frame_interval = Self::compute_interval(numerator, denominator);
        self.sync_point = None;
        self.frames_since_sync = 0;
    }

    pub fn next_sequence(&self) -> u16 {
        self.next_seq
    }

    /// Build, pace, and send one frame's scatter-gather payload list.
    pub fn flush(
        &mut self,
        socket: &UdpSocket,
        addr: SocketAddr,
        timestamp: u32,
        payloads: Vec<OutgoingPayload>,
    ) -> RtpResult<()> {
        if payloads.is_empty() {
            return Err(RtpError::InvalidValue("empty transaction".into()));
        }
        let packet_count = payloads.len();

        if self.config.pacing == Pacing::FrameRate {
            self.wait_for_sync_point();
        }

        let per_packet_gap = if self.config.pacing == Pacing::FragmentPacing && packet_count > 1 {
            Some(self.frame_interval.mul_f64(0.8) / (packet_count as u32 - 1))
        } else {
            None
        };

        let mut bufs = Vec::with_capacity(packet_count);
        let mut last_seq = self.next_seq;
        for payload in &payloads {
            let header = RtpHeader {
                version: 2,
                padding: false,
                extension: false,
                csrc_count: 0,
                marker: payload.is_last,
                payload_type: self.payload_type,
                sequence_number: self.next_seq,
                timestamp,
                ssrc: self.ssrc,
                csrc: vec![],
                extension_header: None,
            };
            last_seq = self.next_seq;
            self.next_seq = self.next_seq.wrapping_add(1);

            let buf = if let Some(srtp) = &self.srtp {
                let packet = RtpPacket {
                    header: header.clone(),
                    payload: payload.bytes.clone(),
                };
                srtp.encrypt(&packet)?
            } else {
                let mut buf = header.serialize().to_vec();
                buf.extend_from_slice(&payload.bytes);
                if self.config.srtp_authenticate {
                    buf.extend_from_slice(&[0u8; 10]);
                }
                buf
            };
            bufs.push(buf);
        }

        if self.config.syscall_clustering && per_packet_gap.is_none() && bufs.len() > 1 {
            send_batch(socket, addr, &bufs)?;
            trace!(packet_count, last_seq, "sent packet batch");
        } else {
            for (i, buf) in bufs.iter().enumerate() {
                if let Err(err) = socket.send_to(buf, addr) {
                    return Err(RtpError::SendFailed(err.to_string()));
                }
                trace!(len = buf.len(), "sent packet");

                if let Some(gap) = per_packet_gap {
                    if i + 1 < packet_count {
                        std::thread::sleep(gap);
                    }
                }
            }
        }

        if self.config.pacing == Pacing::FrameRate {
            self.frames_since_sync += 1;
        }
        debug!(packet_count, timestamp, "frame flushed");
        Ok(())
    }

    fn wait_for_sync_point(&mut self) {
        let now = Instant::now();
        match self.sync_point {
            None => {
                self.sync_point = Some(now);
                self.frames_since_sync = 0;
            }
            Some(sync) => {
                let target = sync + self.frame_interval * self.frames_since_sync;
                if now < target {
                    std::thread::sleep(target - now);
                } else if now > target + self.frame_interval / 2 {
                    warn!("frame-rate pacing fell behind schedule, resyncing");
                    self.sync_point = Some(now);
                    self.frames_since_sync = 0;
                }
            }
        }
    }
}

/// Send a whole burst in one `sendmmsg(2)` call instead of one
/// `sendto(2)` per packet (§9 redesign: batch the send-path syscalls).
fn send_batch(socket: &UdpSocket, addr: SocketAddr, bufs: &[Vec<u8>]) -> RtpResult<()> {
    let fd = socket.as_raw_fd();
    let (storage, addr_len) = socket_addr_to_storage(addr);

    let mut iovecs: Vec<libc::iovec> = bufs
        .iter()
        .map(|b| libc::iovec {
            iov_base: b.as_ptr() as *mut _,
            iov_len: b.len(),
        })
        .collect();

    let mut msgs: Vec<libc::mmsghdr> = iovecs
        .iter_mut()
        .map(|iov| {
            let msg_hdr = libc::msghdr {
                msg_name: &storage as *const _ as *mut _,
                msg_namelen: addr_len,
                msg_iov: iov as *mut _,
                msg_iovlen: 1,
                msg_control: std::ptr::null_mut(),
                msg_controllen: 0,
                msg_flags: 0,
            };
            libc::mmsghdr { msg_hdr, msg_len: 0 }
        })
        .collect();

    let sent = unsafe { libc::sendmmsg(fd, msgs.as_mut_ptr(), msgs.len() as u32, 0) };
    if sent < 0 {
        return Err(RtpError::SendFailed(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    if (sent as usize) < msgs.len() {
        return Err(RtpError::SendFailed(format!(
            "sendmmsg sent {} of {} packets",
            sent,
            msgs.len()
        )));
    }
    Ok(())
}

fn socket_addr_to_storage(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let len = match addr {
            SocketAddr::V4(v4) => {
                let sin = libc::sockaddr_in {
                    sin_family: libc::AF_INET as libc::sa_family_t,
                    sin_port: v4.port().to_be(),
                    sin_addr: libc::in_addr {
                        s_addr: u32::from_ne_bytes(v4.ip().octets()),
                    },
                    sin_zero: [0; 8],
                };
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
            }
            SocketAddr::V6(v6) => {
                let sin6 = libc::sockaddr_in6 {
                    sin6_family: libc::AF_INET6 as libc::sa_family_t,
                    sin6_port: v6.port().to_be(),
                    sin6_flowinfo: 0,
                    sin6_addr: libc::in6_addr {
                        s6_addr: v6.ip().octets(),
                    },
                    sin6_scope_id: v6.scope_id(),
                };
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
                std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
            }
        };
        (storage, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn payloads(n: usize) -> Vec<OutgoingPayload> {
        (0..n)
            .map(|i| OutgoingPayload {
                bytes: Bytes::from(vec![0xAB; 8]),
                is_last: i == n - 1,
            })
            .collect()
    }

    #[test]
    fn sequence_numbers_increment_across_flushes() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        let mut queue = FrameQueue::new(0xCAFE, 96, FrameQueueConfig::default());
        queue.flush(&sender, addr, 1000, payloads(2)).unwrap();
        queue.flush(&sender, addr, 2000, payloads(1)).unwrap();

        assert_eq!(queue.next_sequence(), 3);
    }

    #[test]
    fn marker_bit_set_only_on_last_packet() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        let mut queue = FrameQueue::new(1, 96, FrameQueueConfig::default());
        queue.flush(&sender, addr, 1000, payloads(3)).unwrap();

        let mut buf = [0u8; 1500];
        for expect_marker in [false, false, true] {
            let (n, _) = receiver.recv_from(&mut buf).unwrap();
            let (header, _) = RtpHeader::parse(&buf[..n]).unwrap();
            assert_eq!(header.marker, expect_marker);
        }
    }

    #[test]
    fn empty_transaction_is_rejected() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let mut queue = FrameQueue::new(1, 96, FrameQueueConfig::default());
        assert!(queue.flush(&sender, addr, 0, vec![]).is_err());
    }

    #[test]
    fn srtp_enabled_queue_produces_decryptable_packets() {
        use crate::srtp_pipeline::SrtpConfig;

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        let srtp = Arc::new(
            SrtpPipeline::new(SrtpConfig {
                master_key: vec![0u8; 16],
                master_salt: vec![0u8; 14],
                ssrc: 42,
                roc: 0,
                null_cipher: false,
                authenticate: true,
            })
            .unwrap(),
        );

        let mut queue = FrameQueue::new(42, 96, FrameQueueConfig::default()).with_srtp(srtp.clone());
        queue.flush(&sender, addr, 1000, payloads(1)).unwrap();

        let mut buf = [0u8; 1500];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        let decrypted = srtp.decrypt(&buf[..n]).unwrap();
        assert_eq!(&decrypted.payload[..], &[0xABu8; 8][..]);
    }

    #[test]
    fn syscall_clustering_delivers_every_packet_in_the_burst() {
        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = receiver.local_addr().unwrap();

        let config = FrameQueueConfig {
            syscall_clustering: true,
            ..FrameQueueConfig::default()
        };
        let mut queue = FrameQueue::new(7, 96, config);
        queue.flush(&sender, addr, 1000, payloads(4)).unwrap();

        let mut buf = [0u8; 1500];
        for expect_seq in 0..4u16 {
            let (n, _) = receiver.recv_from(&mut buf).unwrap();
            let (header, _) = RtpHeader::parse(&buf[..n]).unwrap();
            assert_eq!(header.sequence_number, expect_seq);
        }
    }
}
