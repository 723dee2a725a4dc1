//! RTP wire codec
//!
//! Bit-exact encode/decode of the RFC 3550 §5.1 fixed header, CSRC list,
//! extension header and padding.
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
use bytes::{BufMut, Bytes, BytesMut};

/// RTP header as defined in RFC 3550 §5.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension_header: Option<ExtensionHeader>,
}

/// RTP header extension (RFC 3550 §5.3.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    pub profile: u16,
    pub data: Bytes,
}

/// A decoded RTP packet: header plus owned, padding-stripped payload.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpHeader {
    /// Size of the fixed header, before CSRC/extension.
    pub const MIN_SIZE: usize = 12;

    /// Decode a header from the front of `data`, returning the header and
    /// the remaining bytes (payload + padding).
    pub fn parse(mut data: &[u8]) -> RtpResult<(Self, &[u8])> {
        if data.len() < Self::MIN_SIZE {
            return Err(RtpError::InvalidValue(format!(
                "RTP header too short: {} bytes",
                data.len()
            )));
        }

        let first_byte = data[0];
        let version = (first_byte >> 6) & 0x03;
        if version != 2 {
            return Err(RtpError::InvalidValue(format!(
                "unsupported RTP version: {}",
                version
            )));
        }
        let padding = (first_byte & 0x20) != 0;
        let extension = (first_byte & 0x10) != 0;
        let csrc_count = first_byte & 0x0F;

        let second_byte = data[1];
        let marker = (second_byte & 0x80) != 0;
        let payload_type = second_byte & 0x7F;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        data = &data[Self::MIN_SIZE..];

        let mut csrc = Vec::with_capacity(csrc_count as usize);
        for _ in 0..csrc_count {
            if data.len() < 4 {
                return Err(RtpError::InvalidValue("truncated CSRC list".into()));
            }
            csrc.push(u32::from_be_bytes([data[0], data[1], data[2], data[3]]));
            data = &data[4..];
        }

        let extension_header = if extension {
            if data.len() < 4 {
                return Err(RtpError::InvalidValue("truncated extension header".into()));
            }
            let profile = u16::from_be_bytes([data[0], data[1]]);
            let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
            let ext_data_len = length_words * 4;

            if data.len() < 4 + ext_data_len {
                return Err(RtpError::InvalidValue("truncated extension data".into()));
            }

            let ext_data = Bytes::copy_from_slice(&data[4..4 + ext_data_len]);
            data = &data[4 + ext_data_len..];

            Some(ExtensionHeader {
                profile,
                data: ext_data,
            })
        } else {
            None
        };

        Ok((
            RtpHeader {
                version,
                padding,
                extension,
                csrc_count,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
                extension_header,
            },
            data,
        ))
    }

    /// Serialize the header, in the same layout `parse` reads.
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());

        let mut first_byte = (self.version & 0x03) << 6;
        if self.padding {
            first_byte |= 0x20;
        }
        if self.extension {
            first_byte |= 0x10;
        }
        first_byte |= self.csrc.len() as u8 & 0x0F;
        buf.put_u8(first_byte);

        let mut second_byte = self.payload_type & 0x7F;
        if self.marker {
            second_byte |= 0x80;
        }
        buf.put_u8(second_byte);

        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        for &csrc_id in &self.csrc {
            buf.put_u32(csrc_id);
        }

        if let Some(ref ext) = self.extension_header {
            buf.put_u16(ext.profile);
            let length_words = (ext.data.len() + 3) / 4;
            buf.put_u16(length_words as u16);
            buf.put_slice(&ext.data);
            let pad = (4 - (ext.data.len() % 4)) % 4;
            for _ in 0..pad {
                buf.put_u8(0);
            }
        }

        buf
    }

    /// Wire size of the header in bytes, including CSRC list and extension.
    pub fn size(&self) -> usize {
        let mut size = Self::MIN_SIZE + self.csrc.len() * 4;
        if let Some(ref ext) = self.extension_header {
            size += 4 + ext.data.len() + (4 - (ext.data.len() % 4)) % 4;
        }
        size
    }
}

impl RtpPacket {
    /// Decode a full packet, stripping any trailing padding.
    pub fn parse(data: &[u8]) -> RtpResult<Self> {
        let (mut header, rest) = RtpHeader::parse(data)?;

        let payload = if header.padding {
            if rest.is_empty() {
                return Err(RtpError::InvalidValue(
                    "padding flag set but no payload bytes".into(),
                ));
            }
            let padding_len = rest[rest.len() - 1] as usize;
            if padding_len == 0 || padding_len > rest.len() {
                return Err(RtpError::InvalidValue(format!(
                    "invalid padding length: {}",
                    padding_len
                )));
            }
            header.padding = false;
            Bytes::copy_from_slice(&rest[..rest.len() - padding_len])
        } else {
            Bytes::copy_from_slice(rest)
        };

        Ok(RtpPacket { header, payload })
    }

    /// Encode header + payload; never emits padding (senders that want
    /// padding build it into the payload slice themselves).
    pub fn serialize(&self) -> BytesMut {
        let mut buf = self.header.serialize();
        buf.put_slice(&self.payload);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 1,
            ssrc: 1,
            csrc: vec![],
            extension_header: None,
        }
    }

    #[test]
    fn parse_minimal_header() {
        let data = [
            0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        let (header, remaining) = RtpHeader::parse(&data).unwrap();
        assert_eq!(header.version, 2);
        assert!(!header.padding);
        assert!(!header.extension);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.sequence_number, 1);
        assert_eq!(remaining.len(), 0);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut data = [
            0x80, 0x60, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
        ];
        data[0] = 0x40; // version 1
        assert!(RtpHeader::parse(&data).is_err());
    }

    #[test]
    fn rejects_short_buffer() {
        let data = [0x80, 0x60, 0x00, 0x01];
        assert!(RtpHeader::parse(&data).is_err());
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let serialized = header.serialize();
        let (parsed, _) = RtpHeader::parse(&serialized).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn header_with_csrc_and_extension_round_trips() {
        let header = RtpHeader {
            csrc_count: 2,
            csrc: vec![0x1111_1111, 0x2222_2222],
            extension: true,
            extension_header: Some(ExtensionHeader {
                profile: 0xBEDE,
                data: Bytes::from_static(&[1, 2, 3, 4]),
            }),
            ..sample_header()
        };
        let serialized = header.serialize();
        let (parsed, _) = RtpHeader::parse(&serialized).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn packet_round_trips() {
        let packet = RtpPacket {
            header: sample_header(),
            payload: Bytes::from_static(b"test payload"),
        };
        let serialized = packet.serialize();
        let parsed = RtpPacket::parse(&serialized).unwrap();
        assert_eq!(packet.header, parsed.header);
        assert_eq!(packet.payload, parsed.payload);
    }

    #[test]
    fn rejects_padding_length_zero() {
        let mut header = sample_header();
        header.padding = true;
        let mut buf = header.serialize();
        buf.put_slice(b"payload");
        buf.put_u8(0); // invalid: padding length zero
        assert!(RtpPacket::parse(&buf).is_err());
    }

    #[test]
    fn rejects_padding_length_exceeding_payload() {
        let mut header = sample_header();
        header.padding = true;
        let mut buf = header.serialize();
        buf.put_slice(b"ab");
        buf.put_u8(200); // invalid: larger than available bytes
        assert!(RtpPacket::parse(&buf).is_err());
    }

    #[test]
    fn strips_valid_padding() {
        let mut header = sample_header();
        header.padding = true;
        let mut buf = header.serialize();
        buf.put_slice(b"payload");
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(3); // 3 bytes of padding including the length byte
        let packet = RtpPacket::parse(&buf).unwrap();
        assert_eq!(packet.payload, Bytes::from_static(b"payload"));
    }
}
