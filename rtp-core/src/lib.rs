//! RTP/RTCP protocol engine for H.264/H.265/H.266/V3C media transport.
//!
//! Provides:
//! - RTP/RTCP wire codecs (RFC 3550)
//! - H.264/H.265/H.266/V3C payload fragmentation and reassembly
//! - SRTP encryption/decryption (RFC 3711 / RFC 7714)
//! - A ring-buffered, threaded reception pipeline with an ordered
//!   handler chain
//! - Integration with `rtp-keys` for opaque SRTP key supply
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

pub mod error;
pub mod wire;
pub mod start_code;
pub mod rtcp;
pub mod zrtp;
pub mod srtp_pipeline;
pub mod key_integration;
pub mod h26x;
pub mod frame_queue;
pub mod reception;
pub mod validator;
pub mod session;

pub use error::{RtpError, RtpResult};
pub use wire::{ExtensionHeader, RtpHeader, RtpPacket};
pub use rtcp::{
    ApplicationDefined, Goodbye, ReceiverReport, ReceptionReport, RtcpHeader, RtcpPacketType,
    SdesChunk, SdesItem, SdesItemType, SenderReport, SequenceTracker, SourceDescription,
};
pub use srtp_pipeline::{SrtpConfig, SrtpPipeline};
pub use key_integration::SrtpKeyManager;
pub use h26x::{FragType, H26xFormat, NalLocation, NalSemantic, ReassembledFrame};
pub use h26x::receiver::{H26xOutcome, H26xReceiver, ReceiverFlags};
pub use h26x::sender::{push_frame, OutgoingPayload, PushFlags};
pub use frame_queue::{FrameQueue, FrameQueueConfig, Pacing};
pub use reception::{HandlerOutcome, ReceptionFlow};
pub use session::{ConfigOption, MediaFormat, MediaStream, PushOptions, RtpContext, Session, StreamFlags};
