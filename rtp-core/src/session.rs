//! Public surface (§6): `RtpContext` → `Session` → `MediaStream`.
//!
//! `MediaStream` is the thing applications actually hold: one UDP
//! socket pair, one send-side `FrameQueue`, one receive-side
//! `ReceptionFlow` wired with the handler chain in the order RTCP demux
//! → ZRTP demux → RTP validator → H26x reassembly, plus an optional
//! SRTP transform inserted ahead of the validator when enabled.
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
use crate::frame_queue::{FrameQueue, FrameQueueConfig, Pacing};
use crate::h26x::h264::H264Format;
use crate::h26x::h265::H265Format;
use crate::h26x::h266::H266Format;
use crate::h26x::sender::{push_frame, PushFlags};
use crate::h26x::v3c::V3cFormat;
use crate::h26x::{H26xFormat, ReassembledFrame};
use crate::h26x::receiver::{H26xReceiver, ReceiverFlags};
use crate::reception::{HandlerOutcome, ReceptionFlow};
use crate::srtp_pipeline::{SrtpConfig, SrtpPipeline};
use crate::{rtcp, validator, zrtp};
use rtp_config::SessionConfig;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Which H.26x family a stream carries. Chosen once at construction and
/// dispatched via this enum rather than per-packet virtual calls, per
/// the trait-object-vs-enum decision recorded in the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    H264,
    H265,
    H266,
    V3c,
}

impl MediaFormat {
    fn boxed(self) -> Box<dyn H26xFormat> {
        match self {
            MediaFormat::H264 => Box::new(H264Format),
            MediaFormat::H265 => Box::new(H265Format),
            MediaFormat::H266 => Box::new(H266Format),
            MediaFormat::V3c => Box::new(V3cFormat),
        }
    }
}

/// One receiver state machine per format family, boxed behind a single
/// enum so `MediaStream` does not need to be generic over `F`.
enum ReceiverState {
    H264(H26xReceiver<H264Format>),
    H265(H26xReceiver<H265Format>),
    H266(H26xReceiver<H266Format>),
    V3c(H26xReceiver<V3cFormat>),
}

impl ReceiverState {
    fn new(format: MediaFormat, max_frame_delay: Duration, flags: ReceiverFlags) -> Self {
        match format {
            MediaFormat::H264 => ReceiverState::H264(H26xReceiver::new(H264Format, max_frame_delay, flags)),
            MediaFormat::H265 => ReceiverState::H265(H26xReceiver::new(H265Format, max_frame_delay, flags)),
            MediaFormat::H266 => ReceiverState::H266(H26xReceiver::new(H266Format, max_frame_delay, flags)),
            MediaFormat::V3c => ReceiverState::V3c(H26xReceiver::new(V3cFormat, max_frame_delay, flags)),
        }
    }

    fn handle_packet_bytes(&mut self, bytes: &[u8]) -> HandlerOutcome {
        match self {
            ReceiverState::H264(r) => r.handle_packet_bytes(bytes),
            ReceiverState::H265(r) => r.handle_packet_bytes(bytes),
            ReceiverState::H266(r) => r.handle_packet_bytes(bytes),
            ReceiverState::V3c(r) => r.handle_packet_bytes(bytes),
        }
    }
}

/// Reception-chain enables, set at `MediaStream::new` and adjustable
/// later through `configure` where noted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamFlags {
    pub rtcp_mux: bool,
    pub srtp: bool,
    pub srtp_null_cipher: bool,
    pub srtp_authenticate: bool,
    pub h26x_dependency_enforcement: bool,
    pub h26x_prepend_start_code: bool,
    pub h26x_intra_delay: bool,
    pub fragment_generic_frames: bool,
    pub syscall_clustering: bool,
    pub frame_rate: bool,
    pub pace_fragment_sending: bool,
}

/// Per-`push_frame` call flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PushOptions {
    pub no_start_code_scan: bool,
    pub copy_input: bool,
}

/// Options settable through `MediaStream::configure`.
#[derive(Debug, Clone)]
pub enum ConfigOption {
    SendBufferBytes(usize),
    RecvBufferBytes(usize),
    RingBufferBytes(usize),
    Mtu(usize),
    MaxFrameDelayMs(u64),
    RemoteSsrcFilter(Option<u32>),
    Fps { numerator: u32, denominator: u32 },
    FrameRatePacing(bool),
    FragmentPacing(bool),
}

/// Process-wide initialization; the factory applications start from.
///
/// Owns nothing stateful beyond the resolved `SessionConfig` — it is
/// cheap to construct more than one, but only the first call in a
/// process should actually install the global logging subscriber.
pub struct RtpContext {
    config: SessionConfig,
}

impl RtpContext {
    /// Resolve configuration from `.env`/environment and install the
    /// process-wide tracing subscriber.
    pub fn init(service_name: &str) -> RtpResult<Self> {
        let config = SessionConfig::from_env();
        rtp_logging::init_console_logging(service_name, &config.log_level);
        info!(mtu = config.mtu, log_level = %config.log_level, "rtp context initialized");
        Ok(RtpContext { config })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session toward `remote_addr`, optionally bound to a
    /// specific local address.
    pub fn session(&self, remote_addr: SocketAddr, local_addr: Option<SocketAddr>) -> RtpResult<Session> {
        Session::new(self.config.clone(), remote_addr, local_addr)
    }
}

/// One peer relationship; factory for `MediaStream`s toward that peer.
pub struct Session {
    config: SessionConfig,
    remote_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
}

impl Session {
    pub fn new(config: SessionConfig, remote_addr: SocketAddr, local_addr: Option<SocketAddr>) -> RtpResult<Self> {
        Ok(Session {
            config,
            remote_addr,
            local_addr,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Open one media stream bound to `src_port`, sending toward
    /// `dst_port` on the session's remote address.
    pub fn media_stream(
        &self,
        ssrc: u32,
        src_port: u16,
        dst_port: u16,
        payload_type: u8,
        format: MediaFormat,
        flags: StreamFlags,
    ) -> RtpResult<MediaStream> {
        let bind_ip = self.local_addr.map(|a| a.ip()).unwrap_or(self.remote_addr.ip());
        let bind_addr = SocketAddr::new(bind_ip, src_port);
        let mut dst_addr = self.remote_addr;
        dst_addr.set_port(dst_port);

        MediaStream::new(bind_addr, dst_addr, ssrc, payload_type, format, flags, self.config.clone())
    }
}

/// One bidirectional elementary-stream transport: a send-side
/// `FrameQueue` plus a receive-side `ReceptionFlow` sharing a socket.
pub struct MediaStream {
    socket: UdpSocket,
    dst_addr: SocketAddr,
    send_queue: Mutex<FrameQueue>,
    reception: ReceptionFlow,
    format: MediaFormat,
    flags: Mutex<StreamFlags>,
    config: Mutex<SessionConfig>,
    srtp: Arc<Mutex<Option<Arc<SrtpPipeline>>>>,
}

impl MediaStream {
    pub fn new(
        bind_addr: SocketAddr,
        dst_addr: SocketAddr,
        ssrc: u32,
        payload_type: u8,
        format: MediaFormat,
        flags: StreamFlags,
        config: SessionConfig,
    ) -> RtpResult<Self> {
        let socket = UdpSocket::bind(bind_addr).map_err(|e| RtpError::BindFailed(e.to_string()))?;
        socket
            .set_nonblocking(false)
            .map_err(|e| RtpError::SocketFailed(e.to_string()))?;

        let queue_config = FrameQueueConfig {
            pacing: if flags.frame_rate {
                Pacing::FrameRate
            } else if flags.pace_fragment_sending {
                Pacing::FragmentPacing
            } else {
                Pacing::None
            },
            fps_numerator: config.fps_num,
            fps_denominator: config.fps_den,
            srtp_authenticate: flags.srtp && flags.srtp_authenticate,
            syscall_clustering: flags.syscall_clustering,
        };
        let send_queue = FrameQueue::new(ssrc, payload_type, queue_config);

        let ring_capacity = (config.ring_buffer_bytes / config.media_payload_size().max(1)).max(16);
        let mut reception = ReceptionFlow::new(ring_capacity, config.media_payload_size());

        let recv_socket = socket
            .try_clone()
            .map_err(|e| RtpError::SocketFailed(e.to_string()))?;
        reception.start(recv_socket);

        let srtp_slot: Arc<Mutex<Option<Arc<SrtpPipeline>>>> = Arc::new(Mutex::new(None));

        let stream = MediaStream {
            socket,
            dst_addr,
            send_queue: Mutex::new(send_queue),
            reception,
            format,
            flags: Mutex::new(flags),
            config: Mutex::new(config.clone()),
            srtp: srtp_slot.clone(),
        };

        stream.install_handler_chain(ssrc, config.max_frame_delay_ms, srtp_slot)?;
        Ok(stream)
    }

    fn install_handler_chain(
        &self,
        remote_ssrc_filter: u32,
        max_frame_delay_ms: u64,
        srtp_slot: Arc<Mutex<Option<Arc<SrtpPipeline>>>>,
    ) -> RtpResult<()> {
        let flags = *self.flags.lock().unwrap();

        // RTCP demux runs first: RTCP packet types never collide with
        // RTP's version-2 first-byte framing, so this is a cheap look
        // before the rest of the chain runs.
        self.reception.install_handler(
            0,
            Box::new(|bytes, _from| {
                let is_rtcp = bytes.len() >= 2
                    && matches!(
                        bytes[1],
                        x if x == rtcp::RtcpPacketType::SenderReport as u8
                            || x == rtcp::RtcpPacketType::ReceiverReport as u8
                            || x == rtcp::RtcpPacketType::SourceDescription as u8
                            || x == rtcp::RtcpPacketType::Goodbye as u8
                            || x == rtcp::RtcpPacketType::ApplicationDefined as u8
                    );
                if is_rtcp {
                    HandlerOutcome::PktNotHandled
                } else {
                    HandlerOutcome::Ok
                }
            }),
        );

        self.reception.install_handler(0, Box::new(zrtp::demux));

        if flags.srtp {
            self.reception.install_handler(
                remote_ssrc_filter,
                Box::new(move |bytes, _from| {
                    let guard = srtp_slot.lock().unwrap();
                    let Some(srtp) = guard.as_ref() else {
                        return HandlerOutcome::Ok;
                    };
                    match srtp.decrypt(bytes) {
                        Ok(packet) => HandlerOutcome::PktModified(packet.serialize().to_vec()),
                        Err(err) => HandlerOutcome::GenericError(err.to_string()),
                    }
                }),
            );
        }

        self.reception.install_handler(0, Box::new(validator::validate));

        let max_frame_delay = Duration::from_millis(max_frame_delay_ms);
        let receiver_flags = ReceiverFlags {
            prepend_start_code: flags.h26x_prepend_start_code,
            intra_delay: flags.h26x_intra_delay || flags.h26x_dependency_enforcement,
        };
        let format = self.format;
        let receiver_state = Mutex::new(ReceiverState::new(format, max_frame_delay, receiver_flags));
        self.reception.install_handler(
            0,
            Box::new(move |bytes, _from| receiver_state.lock().unwrap().handle_packet_bytes(bytes)),
        );

        Ok(())
    }

    /// Attach (or replace) the SRTP transform used on both directions
    /// of this stream. The receive-side handler installed at
    /// construction reads through the same shared slot, so this takes
    /// effect immediately for both directions; `flags.srtp` must still
    /// have been set at construction for the receive handler to exist.
    pub fn with_srtp(self, srtp: Arc<SrtpPipeline>) -> Self {
        *self.srtp.lock().unwrap() = Some(srtp.clone());

        let mut queue_guard = self.send_queue.lock().unwrap();
        let placeholder = FrameQueue::new(0, 0, FrameQueueConfig::default());
        let taken = std::mem::replace(&mut *queue_guard, placeholder);
        *queue_guard = taken.with_srtp(srtp);

        drop(queue_guard);
        self
    }

    /// Build and send one encoded frame.
    pub fn push_frame(&self, data: &[u8], timestamp: u32, options: PushOptions) -> RtpResult<()> {
        let fmt = self.format.boxed();
        let payload_budget = self.config.lock().unwrap().media_payload_size();
        let push_flags = PushFlags {
            no_start_code_scan: options.no_start_code_scan,
        };
        let payloads = push_frame(fmt.as_ref(), data, payload_budget, push_flags)?;

        let mut queue = self.send_queue.lock().unwrap();
        queue.flush(&self.socket, self.dst_addr, timestamp, payloads)
    }

    /// Block up to `timeout` for the next reassembled frame.
    pub fn pull_frame(&self, timeout: Duration) -> RtpResult<ReassembledFrame> {
        match self.reception.pull_frame(timeout) {
            Some(packet) => Ok(ReassembledFrame { packet }),
            None => Err(RtpError::Timeout),
        }
    }

    /// Block up to `timeout` for the next frame from a specific remote
    /// SSRC (the "remote SSRC filter" `configure` option acts on the
    /// default, unfiltered `pull_frame` instead of requiring this call).
    pub fn pull_frame_from(&self, remote_ssrc: u32, timeout: Duration) -> RtpResult<ReassembledFrame> {
        match self.reception.pull_frame_from(remote_ssrc, timeout) {
            Some(packet) => Ok(ReassembledFrame { packet }),
            None => Err(RtpError::Timeout),
        }
    }

    /// Adjust one configuration option at runtime.
    pub fn configure(&self, option: ConfigOption) -> RtpResult<()> {
        match option {
            ConfigOption::Mtu(mtu) => {
                self.config.lock().unwrap().mtu = mtu;
            }
            ConfigOption::MaxFrameDelayMs(ms) => {
                self.config.lock().unwrap().max_frame_delay_ms = ms;
            }
            ConfigOption::SendBufferBytes(bytes) => {
                self.config.lock().unwrap().send_buffer_bytes = bytes;
            }
            ConfigOption::RecvBufferBytes(bytes) => {
                self.config.lock().unwrap().recv_buffer_bytes = bytes;
            }
            ConfigOption::RingBufferBytes(bytes) => {
                self.config.lock().unwrap().ring_buffer_bytes = bytes;
            }
            ConfigOption::Fps { numerator, denominator } => {
                let mut cfg = self.config.lock().unwrap();
                cfg.fps_num = numerator;
                cfg.fps_den = denominator;
                self.send_queue.lock().unwrap().set_fps(numerator, denominator);
            }
            ConfigOption::FrameRatePacing(_) | ConfigOption::FragmentPacing(_) => {
                warn!("pacing mode changes after construction are not retroactive to an in-flight FrameQueue");
            }
            ConfigOption::RemoteSsrcFilter(_) => {
                // Filtering is applied by pull_frame_from; nothing to mutate here.
            }
        }
        Ok(())
    }

    /// Tear down both reception threads. Dropping `MediaStream` without
    /// calling this leaves the threads running until the process exits,
    /// since `ReceptionFlow` does not stop itself on drop.
    pub fn shutdown(&mut self) {
        self.reception.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port_a: u16, port_b: u16) -> (SocketAddr, SocketAddr) {
        (
            format!("127.0.0.1:{port_a}").parse().unwrap(),
            format!("127.0.0.1:{port_b}").parse().unwrap(),
        )
    }

    #[test]
    fn push_then_pull_delivers_frame_in_process() {
        let config = SessionConfig::default();
        let (a, b) = loopback(0, 0);

        let mut receiver = MediaStream::new(b, a, 0xAAAA, 96, MediaFormat::H265, StreamFlags::default(), config.clone()).unwrap();
        let receiver_addr = receiver.socket.local_addr().unwrap();

        let sender = MediaStream::new(a, receiver_addr, 0xAAAA, 96, MediaFormat::H265, StreamFlags::default(), config).unwrap();

        let mut data = vec![0, 0, 0, 1, 0x26, 0x01];
        data.extend(std::iter::repeat(0xCD).take(40));
        sender.push_frame(&data, 1000, PushOptions::default()).unwrap();

        let frame = receiver.pull_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(&frame.packet.payload[..], &data[4..]);

        receiver.shutdown();
    }

    #[test]
    fn srtp_round_trips_through_media_stream() {
        let config = SessionConfig::default();
        let (a, b) = loopback(0, 0);
        let srtp_flags = StreamFlags {
            srtp: true,
            srtp_authenticate: true,
            ..Default::default()
        };

        let mut receiver =
            MediaStream::new(b, a, 0xBEEF, 96, MediaFormat::H265, srtp_flags, config.clone()).unwrap();
        let receiver_addr = receiver.socket.local_addr().unwrap();
        let sender = MediaStream::new(a, receiver_addr, 0xBEEF, 96, MediaFormat::H265, srtp_flags, config).unwrap();

        let key_pair = || SrtpConfig {
            master_key: vec![0x11u8; 16],
            master_salt: vec![0x22u8; 14],
            ssrc: 0xBEEF,
            roc: 0,
            null_cipher: false,
            authenticate: true,
        };
        let sender = sender.with_srtp(Arc::new(SrtpPipeline::new(key_pair()).unwrap()));
        receiver = receiver.with_srtp(Arc::new(SrtpPipeline::new(key_pair()).unwrap()));

        let mut data = vec![0, 0, 0, 1, 0x26, 0x01];
        data.extend(std::iter::repeat(0xCD).take(40));
        sender.push_frame(&data, 1000, PushOptions::default()).unwrap();

        let frame = receiver.pull_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(&frame.packet.payload[..], &data[4..]);

        receiver.shutdown();
    }

    #[test]
    fn configure_updates_mtu() {
        let config = SessionConfig::default();
        let (a, b) = loopback(0, 0);
        let stream = MediaStream::new(a, b, 1, 96, MediaFormat::H264, StreamFlags::default(), config).unwrap();
        stream.configure(ConfigOption::Mtu(1000)).unwrap();
        assert_eq!(stream.config.lock().unwrap().mtu, 1000);
    }
}
