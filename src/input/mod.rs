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

//!
//! The I/Q input stream from the front end
//!
//! Each datagram carries an RTP header, a front end status record, and
//! interleaved 16-bit little-endian I/Q sample pairs.
//!

pub mod udp;

use std::error::Error;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex32;

use crate::rtp::{RtpError, RtpHeader};

/// Length in bytes of the front end status record
pub const STATUS_LENGTH: usize = 14;

/// Scale applied to 16-bit samples to map full scale to +-1.0
const SAMPLE_SCALE: f32 = 1.0 / 32768.0;

/// Front end state reported in every I/Q datagram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrontEndStatus {
    /// First LO frequency in Hz
    pub first_lo: f64,
    /// LNA gain in dB
    pub lna_gain: i16,
    /// Mixer gain in dB
    pub mixer_gain: i16,
    /// IF gain in dB
    pub if_gain: i16,
}

/// A parsed I/Q sample datagram
#[derive(Debug, Clone, PartialEq)]
pub struct IqPacket {
    /// RTP sequence number
    pub sequence: u16,
    /// RTP timestamp, in samples
    pub timestamp: u32,
    /// RTP synchronization source
    pub ssrc: u32,
    /// Front end status
    pub status: FrontEndStatus,
    /// Complex samples scaled to +-1.0 full scale
    pub samples: Vec<Complex32>,
}

/// I/Q datagram parse errors
#[derive(Debug, Clone, PartialEq)]
pub enum PacketError {
    /// The RTP header could not be parsed
    Rtp(RtpError),
    /// The datagram ends before the status record does
    TooShort,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::Rtp(e) => write!(f, "invalid RTP header: {}", e),
            PacketError::TooShort => write!(f, "datagram shorter than the status record"),
        }
    }
}

impl Error for PacketError {}

impl From<RtpError> for PacketError {
    fn from(inner: RtpError) -> Self {
        PacketError::Rtp(inner)
    }
}

/// Parses an I/Q datagram
///
/// Trailing bytes that do not form a whole sample pair are discarded.
pub fn parse_iq_packet(datagram: &[u8]) -> Result<IqPacket, PacketError> {
    let (header, payload) = RtpHeader::parse(datagram)?;
    if payload.len() < STATUS_LENGTH {
        return Err(PacketError::TooShort);
    }
    let status = FrontEndStatus {
        first_lo: LittleEndian::read_f64(&payload[0..8]),
        lna_gain: LittleEndian::read_i16(&payload[8..10]),
        mixer_gain: LittleEndian::read_i16(&payload[10..12]),
        if_gain: LittleEndian::read_i16(&payload[12..14]),
    };
    let sample_bytes = &payload[STATUS_LENGTH..];
    let mut samples = Vec::with_capacity(sample_bytes.len() / 4);
    for pair in sample_bytes.chunks_exact(4) {
        let i = LittleEndian::read_i16(&pair[0..2]);
        let q = LittleEndian::read_i16(&pair[2..4]);
        samples.push(Complex32::new(
            f32::from(i) * SAMPLE_SCALE,
            f32::from(q) * SAMPLE_SCALE,
        ));
    }
    Ok(IqPacket {
        sequence: header.sequence,
        timestamp: header.timestamp,
        ssrc: header.ssrc,
        status,
        samples,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rtp::RTP_HEADER_LENGTH;

    fn build_packet(sequence: u16, samples: &[(i16, i16)]) -> Vec<u8> {
        let mut datagram = vec![0u8; RTP_HEADER_LENGTH + STATUS_LENGTH + samples.len() * 4];
        RtpHeader {
            payload_type: 97,
            marker: false,
            sequence,
            timestamp: 1000,
            ssrc: 42,
        }
        .write_to(&mut datagram);
        let status = &mut datagram[RTP_HEADER_LENGTH..];
        LittleEndian::write_f64(&mut status[0..8], 146_500_000.0);
        LittleEndian::write_i16(&mut status[8..10], 10);
        LittleEndian::write_i16(&mut status[10..12], 12);
        LittleEndian::write_i16(&mut status[12..14], 20);
        for (index, (i, q)) in samples.iter().enumerate() {
            let offset = RTP_HEADER_LENGTH + STATUS_LENGTH + index * 4;
            LittleEndian::write_i16(&mut datagram[offset..offset + 2], *i);
            LittleEndian::write_i16(&mut datagram[offset + 2..offset + 4], *q);
        }
        datagram
    }

    #[test]
    fn parses_samples_and_status() {
        let datagram = build_packet(7, &[(16384, -16384), (32767, 0)]);
        let packet = parse_iq_packet(&datagram).expect("parse failed");
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.status.first_lo, 146_500_000.0);
        assert_eq!(packet.status.lna_gain, 10);
        assert_eq!(packet.samples.len(), 2);
        assert!((packet.samples[0].re - 0.5).abs() < 1e-4);
        assert!((packet.samples[0].im + 0.5).abs() < 1e-4);
        assert!((packet.samples[1].re - 1.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_short_datagram() {
        let datagram = build_packet(0, &[]);
        assert_eq!(
            parse_iq_packet(&datagram[..RTP_HEADER_LENGTH + 4]),
            Err(PacketError::TooShort)
        );
    }

    #[test]
    fn discards_partial_sample_pair() {
        let mut datagram = build_packet(0, &[(100, 200)]);
        datagram.extend_from_slice(&[1, 2, 3]);
        let packet = parse_iq_packet(&datagram).expect("parse failed");
        assert_eq!(packet.samples.len(), 1);
    }
}
