/*
 * Copyright 2019 The Regents of the University of California
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 *
 */

//! Real-time Transport Protocol headers
//!
//! Only the fields the receiver uses are modeled: version, payload type,
//! sequence number, timestamp and SSRC. Padding, extensions and CSRC lists
//! are never generated and are rejected only when they would make the
//! header longer than the datagram.

use std::error::Error;
use std::fmt;

use byteorder::{BigEndian, ByteOrder};

/// RTP protocol version
pub const RTP_VERSION: u8 = 2;
/// Length in bytes of the fixed RTP header
pub const RTP_HEADER_LENGTH: usize = 12;

/// Payload type for 16-bit big-endian linear PCM, stereo
pub const PAYLOAD_TYPE_PCM_STEREO: u8 = 10;
/// Payload type for 16-bit big-endian linear PCM, mono
pub const PAYLOAD_TYPE_PCM_MONO: u8 = 11;
/// Dynamic payload type used for Opus frames
pub const PAYLOAD_TYPE_OPUS: u8 = 20;

/// The fixed fields of an RTP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Payload type, 7 bits
    pub payload_type: u8,
    /// Marker bit
    pub marker: bool,
    /// Packet sequence number, wrapping
    pub sequence: u16,
    /// Media timestamp in samples
    pub timestamp: u32,
    /// Synchronization source identifier
    pub ssrc: u32,
}

impl RtpHeader {
    /// Writes this header into the first RTP_HEADER_LENGTH bytes of a buffer
    ///
    /// Panics if the buffer is too short.
    pub fn write_to(&self, buffer: &mut [u8]) {
        assert!(buffer.len() >= RTP_HEADER_LENGTH, "buffer too short");
        buffer[0] = RTP_VERSION << 6;
        buffer[1] = (self.payload_type & 0x7f) | (u8::from(self.marker) << 7);
        BigEndian::write_u16(&mut buffer[2..4], self.sequence);
        BigEndian::write_u32(&mut buffer[4..8], self.timestamp);
        BigEndian::write_u32(&mut buffer[8..12], self.ssrc);
    }

    /// Parses an RTP header and returns it along with the payload
    pub fn parse(datagram: &[u8]) -> Result<(RtpHeader, &[u8]), RtpError> {
        if datagram.len() < RTP_HEADER_LENGTH {
            return Err(RtpError::TooShort);
        }
        let version = datagram[0] >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::Version(version));
        }
        let header = RtpHeader {
            payload_type: datagram[1] & 0x7f,
            marker: datagram[1] & 0x80 != 0,
            sequence: BigEndian::read_u16(&datagram[2..4]),
            timestamp: BigEndian::read_u32(&datagram[4..8]),
            ssrc: BigEndian::read_u32(&datagram[8..12]),
        };
        Ok((header, &datagram[RTP_HEADER_LENGTH..]))
    }
}

/// RTP parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// The datagram is shorter than an RTP header
    TooShort,
    /// The version field is not 2
    Version(u8),
}

impl fmt::Display for RtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtpError::TooShort => write!(f, "datagram shorter than an RTP header"),
            RtpError::Version(version) => write!(f, "unsupported RTP version {}", version),
        }
    }
}

impl Error for RtpError {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let header = RtpHeader {
            payload_type: PAYLOAD_TYPE_PCM_MONO,
            marker: false,
            sequence: 0xbeef,
            timestamp: 0x01020304,
            ssrc: 0xdeadbeef,
        };
        let mut buffer = [0u8; RTP_HEADER_LENGTH + 4];
        header.write_to(&mut buffer);
        let (parsed, payload) = RtpHeader::parse(&buffer).expect("parse failed");
        assert_eq!(parsed, header);
        assert_eq!(payload.len(), 4);
    }

    #[test]
    fn network_byte_order() {
        let header = RtpHeader {
            payload_type: PAYLOAD_TYPE_OPUS,
            marker: true,
            sequence: 0x0102,
            timestamp: 0x0a0b0c0d,
            ssrc: 0,
        };
        let mut buffer = [0u8; RTP_HEADER_LENGTH];
        header.write_to(&mut buffer);
        assert_eq!(buffer[0], 0x80);
        assert_eq!(buffer[1], 0x80 | PAYLOAD_TYPE_OPUS);
        assert_eq!(&buffer[2..4], &[0x01, 0x02]);
        assert_eq!(&buffer[4..8], &[0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn rejects_bad_version() {
        let mut buffer = [0u8; RTP_HEADER_LENGTH];
        buffer[0] = 1 << 6;
        assert_eq!(
            RtpHeader::parse(&buffer),
            Err(RtpError::Version(1))
        );
    }

    #[test]
    fn rejects_short_datagram() {
        assert_eq!(RtpHeader::parse(&[0x80u8; 5]), Err(RtpError::TooShort));
    }
}
