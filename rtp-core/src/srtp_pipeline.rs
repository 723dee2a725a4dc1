//! SRTP (Secure Real-time Transport Protocol) transform (§4.9).
//!
//! Key agreement (DTLS-SRTP, ZRTP) is out of scope; this pipeline only
//! consumes an opaque master key/salt pair and performs the AES-128-GCM
//! transform itself, per RFC 3711 / RFC 7714.
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
use crate::wire::{RtpHeader, RtpPacket};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque key material supplied by the key-management boundary (§3).
#[derive(Debug, Clone)]
pub struct SrtpConfig {
    /// Master key, 16 bytes for AES-128.
    pub master_key: Vec<u8>,
    /// Master salt, 14 bytes.
    pub master_salt: Vec<u8>,
    pub ssrc: u32,
    pub roc: u32,
    /// Skip encryption; still produces/consumes the authentication tag
    /// framing. Corresponds to the `SRTP-null-cipher` reception flag.
    pub null_cipher: bool,
    /// Whether to attach/verify the GCM authentication tag at all.
    /// Corresponds to the `SRTP-authenticate` reception flag.
    pub authenticate: bool,
}

impl Default for SrtpConfig {
    fn default() -> Self {
        SrtpConfig {
            master_key: vec![0u8; 16],
            master_salt: vec![0u8; 14],
            ssrc: 0,
            roc: 0,
            null_cipher: false,
            authenticate: true,
        }
    }
}

/// AES-128-GCM SRTP transform bound to one SSRC's key material.
pub struct SrtpPipeline {
    #[allow(dead_code)]
    encryption_key: Vec<u8>,
    #[allow(dead_code)]
    auth_key: Vec<u8>,
    salt_key: Vec<u8>,
    ssrc: u32,
    sequence_number: AtomicU64,
    roc: AtomicU64,
    cipher: Aes128Gcm,
    null_cipher: bool,
    authenticate: bool,
}

impl SrtpPipeline {
    pub fn new(config: SrtpConfig) -> RtpResult<Self> {
        if config.master_key.len() != 16 {
            return Err(RtpError::InvalidValue(format!(
                "master key must be 16 bytes, got {}",
                config.master_key.len()
            )));
        }
        if config.master_salt.len() != 14 {
            return Err(RtpError::InvalidValue(format!(
                "master salt must be 14 bytes, got {}",
                config.master_salt.len()
            )));
        }

        let hkdf = Hkdf::<Sha256>::new(None, &config.master_key);
        let mut encryption_key = vec![0u8; 16];
        hkdf.expand(b"SRTP encryption key", &mut encryption_key)
            .map_err(|e| RtpError::InvalidValue(format!("HKDF error: {}", e)))?;

        let mut auth_key = vec![0u8; 16];
        hkdf.expand(b"SRTP authentication key", &mut auth_key)
            .map_err(|e| RtpError::InvalidValue(format!("HKDF error: {}", e)))?;

        let mut salt_key = vec![0u8; 14];
        let hkdf_salt = Hkdf::<Sha256>::new(None, &config.master_salt);
        hkdf_salt
            .expand(b"SRTP salt key", &mut salt_key)
            .map_err(|e| RtpError::InvalidValue(format!("HKDF error: {}", e)))?;

        let cipher = Aes128Gcm::new_from_slice(&encryption_key)
            .map_err(|e| RtpError::InvalidValue(format!("cipher init error: {}", e)))?;

        Ok(SrtpPipeline {
            encryption_key,
            auth_key,
            salt_key,
            ssrc: config.ssrc,
            sequence_number: AtomicU64::new(0),
            roc: AtomicU64::new(config.roc as u64),
            cipher,
            null_cipher: config.null_cipher,
            authenticate: config.authenticate,
        })
    }

    fn track_sequence(&self, seq_low: u16) -> u32 {
        let roc = self.roc.load(Ordering::SeqCst) as u32;
        let current_seq = self.sequence_number.load(Ordering::SeqCst);
        let seq_combined = (roc as u64) << 16 | (seq_low as u64);

        if seq_combined > current_seq {
            self.sequence_number.store(seq_combined, Ordering::SeqCst);
            if seq_low < (current_seq & 0xFFFF) as u16 {
                self.roc.fetch_add(1, Ordering::SeqCst);
            }
        }
        roc
    }

    /// Transform an RTP packet into SRTP on the wire.
    pub fn encrypt(&self, packet: &RtpPacket) -> RtpResult<Vec<u8>> {
        let seq_low = packet.header.sequence_number;
        let roc = self.track_sequence(seq_low);

        let mut srtp_packet = packet.header.serialize().to_vec();

        if self.null_cipher {
            srtp_packet.extend_from_slice(&packet.payload);
            if self.authenticate {
                srtp_packet.extend_from_slice(&[0u8; 16]);
            }
            return Ok(srtp_packet);
        }

        let iv = self.generate_iv(seq_low, roc);
        let nonce = Nonce::from_slice(&iv);
        let ciphertext = self
            .cipher
            .encrypt(nonce, packet.payload.as_ref())
            .map_err(|e| RtpError::InvalidValue(format!("encryption error: {}", e)))?;

        srtp_packet.extend_from_slice(&ciphertext);
        Ok(srtp_packet)
    }

    /// Recover an RTP packet from SRTP bytes received off the wire.
    pub fn decrypt(&self, srtp_data: &[u8]) -> RtpResult<RtpPacket> {
        let (header, encrypted_payload) = RtpHeader::parse(srtp_data)?;
        let seq_low = header.sequence_number;
        let roc = self.track_sequence(seq_low);

        if self.null_cipher {
            let payload = if self.authenticate {
                if encrypted_payload.len() < 16 {
                    return Err(RtpError::InvalidValue(
                        "SRTP packet too short for authentication tag".into(),
                    ));
                }
                &encrypted_payload[..encrypted_payload.len() - 16]
            } else {
                encrypted_payload
            };
            return Ok(RtpPacket {
                header,
                payload: payload.to_vec().into(),
            });
        }

        if encrypted_payload.len() < 16 {
            return Err(RtpError::InvalidValue(
                "SRTP packet too short for authentication tag".into(),
            ));
        }

        let iv = self.generate_iv(seq_low, roc);
        let nonce = Nonce::from_slice(&iv);
        let plaintext = self
            .cipher
            .decrypt(nonce, encrypted_payload)
            .map_err(|e| RtpError::InvalidValue(format!("decryption error: {}", e)))?;

        Ok(RtpPacket {
            header,
            payload: plaintext.into(),
        })
    }

    /// IV = salt XOR (SSRC(32) || ROC(32) || seq(16) || 0(16)), per RFC
    /// 3711 §4.1.1 adapted to AES-GCM's 96-bit nonce (RFC 7714 §8.1).
    fn generate_iv(&self, seq_low: u16, roc: u32) -> Vec<u8> {
        let mut iv = vec![0u8; 12];
        iv[0..4].copy_from_slice(&self.ssrc.to_be_bytes());
        iv[4..8].copy_from_slice(&roc.to_be_bytes());
        iv[8..10].copy_from_slice(&seq_low.to_be_bytes());

        for i in 0..12.min(self.salt_key.len()) {
            iv[i] ^= self.salt_key[i];
        }
        iv
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence_number.load(Ordering::SeqCst)
    }

    pub fn current_roc(&self) -> u32 {
        self.roc.load(Ordering::SeqCst) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn create_test_packet() -> RtpPacket {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1000,
            ssrc: 12345,
            csrc: vec![],
            extension_header: None,
        };

        RtpPacket {
            header,
            payload: Bytes::from("test payload data"),
        }
    }

    fn config() -> SrtpConfig {
        SrtpConfig {
            master_key: vec![0u8; 16],
            master_salt: vec![0u8; 14],
            ssrc: 12345,
            roc: 0,
            null_cipher: false,
            authenticate: true,
        }
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let pipeline = SrtpPipeline::new(config()).unwrap();
        let packet = create_test_packet();

        let encrypted = pipeline.encrypt(&packet).unwrap();
        let decrypted = pipeline.decrypt(&encrypted).unwrap();

        assert_eq!(packet.header.sequence_number, decrypted.header.sequence_number);
        assert_eq!(packet.header.timestamp, decrypted.header.timestamp);
        assert_eq!(packet.header.ssrc, decrypted.header.ssrc);
        assert_eq!(packet.payload, decrypted.payload);
    }

    #[test]
    fn null_cipher_skips_encryption_but_keeps_tag_slot() {
        let mut cfg = config();
        cfg.null_cipher = true;
        let pipeline = SrtpPipeline::new(cfg).unwrap();
        let packet = create_test_packet();

        let encrypted = pipeline.encrypt(&packet).unwrap();
        let header_len = packet.header.serialize().len();
        assert_eq!(encrypted.len(), header_len + packet.payload.len() + 16);

        let decrypted = pipeline.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.payload, packet.payload);
    }

    #[test]
    fn rejects_non_16_byte_master_key() {
        let mut cfg = config();
        cfg.master_key = vec![0u8; 8];
        assert!(SrtpPipeline::new(cfg).is_err());
    }

    #[test]
    fn sequence_tracking_advances_across_packets() {
        let pipeline = SrtpPipeline::new(config()).unwrap();
        for i in 0..10 {
            let mut packet = create_test_packet();
            packet.header.sequence_number = i + 1;
            pipeline.encrypt(&packet).unwrap();
        }
        assert!(pipeline.current_sequence() >= 10);
    }
}
