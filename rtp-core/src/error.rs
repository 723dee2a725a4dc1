//! Error types for the RTP/RTCP protocol engine
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


use std::io;
use thiserror::Error;

/// Result type for protocol engine operations
pub type RtpResult<T> = Result<T, RtpError>;

/// Error kinds a public operation may return.
#[derive(Error, Debug)]
pub enum RtpError {
    /// A blocking call did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A caller-supplied value was out of range or otherwise malformed.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Binding a local UDP socket failed.
    #[error("bind failed: {0}")]
    BindFailed(String),

    /// A socket operation other than bind failed.
    #[error("socket error: {0}")]
    SocketFailed(String),

    /// Sending a packet failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A fixed-size resource (ring buffer, fragment store) is exhausted.
    #[error("memory exhausted: {0}")]
    MemoryExhausted(String),

    /// A lookup (stream, handler, key) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested data is not yet available.
    #[error("not ready")]
    NotReady,

    /// The stream or session was used before it was initialized.
    #[error("not initialized")]
    NotInitialized,

    /// A blocking syscall was interrupted.
    #[error("interrupted")]
    Interrupted,

    /// Catch-all for conditions with no dedicated kind.
    #[error("{0}")]
    Generic(String),

    /// A remote peer asserted the same SSRC this stream is using.
    #[error("SSRC collision on {ssrc:#x}")]
    SsrcCollision { ssrc: u32 },
}

impl From<io::Error> for RtpError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => RtpError::Timeout,
            io::ErrorKind::Interrupted => RtpError::Interrupted,
            io::ErrorKind::WouldBlock => RtpError::NotReady,
            _ => RtpError::SocketFailed(err.to_string()),
        }
    }
}

impl From<rtp_keys::KeyError> for RtpError {
    fn from(err: rtp_keys::KeyError) -> Self {
        RtpError::Generic(err.to_string())
    }
}
