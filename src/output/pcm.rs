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
//! Linear PCM RTP streams, 16-bit big-endian
//!

use std::collections::VecDeque;
use std::io;

use byteorder::{BigEndian, ByteOrder};
use num_complex::Complex32;

use super::{scale_clip, PacketSink, StreamStats};
use crate::rtp::{
    RtpHeader, PAYLOAD_TYPE_PCM_MONO, PAYLOAD_TYPE_PCM_STEREO, RTP_HEADER_LENGTH,
};

/// Mono samples per RTP packet
pub const MONO_SAMPLES_PER_PACKET: usize = 256;
/// Stereo frames per RTP packet
pub const STEREO_FRAMES_PER_PACKET: usize = 128;

/// Packetizes mono audio as RTP payload type 11
pub struct MonoPcmStream<S> {
    sink: S,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    /// Samples waiting to fill the next packet
    queue: VecDeque<f32>,
    stats: StreamStats,
    /// Per-packet bitrate smoothing factor
    decay: f32,
}

impl<S: PacketSink> MonoPcmStream<S> {
    /// Creates a mono PCM stream
    pub fn new(sink: S, ssrc: u32, sample_rate: u32) -> Self {
        MonoPcmStream {
            sink,
            sequence: 0,
            timestamp: 0,
            ssrc,
            queue: VecDeque::new(),
            stats: StreamStats::default(),
            decay: (-(MONO_SAMPLES_PER_PACKET as f32) / sample_rate as f32).exp(),
        }
    }

    /// Queues samples and sends every complete packet
    pub fn push(&mut self, samples: &[f32]) -> io::Result<()> {
        self.queue.extend(samples);
        while self.queue.len() >= MONO_SAMPLES_PER_PACKET {
            let mut datagram = [0u8; RTP_HEADER_LENGTH + 2 * MONO_SAMPLES_PER_PACKET];
            RtpHeader {
                payload_type: PAYLOAD_TYPE_PCM_MONO,
                marker: false,
                sequence: self.sequence,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
            }
            .write_to(&mut datagram);
            for (index, sample) in self.queue.drain(..MONO_SAMPLES_PER_PACKET).enumerate() {
                let offset = RTP_HEADER_LENGTH + 2 * index;
                BigEndian::write_i16(&mut datagram[offset..offset + 2], scale_clip(sample));
            }
            self.sink.send(&datagram)?;
            self.sequence = self.sequence.wrapping_add(1);
            self.timestamp = self.timestamp.wrapping_add(MONO_SAMPLES_PER_PACKET as u32);
            self.stats.packets += 1;
            self.stats.bitrate = self.decay * self.stats.bitrate
                + 8.0 * 2.0 * MONO_SAMPLES_PER_PACKET as f32;
        }
        Ok(())
    }

    /// Returns the stream counters
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

/// Packetizes stereo audio as RTP payload type 10, left/right interleaved
pub struct StereoPcmStream<S> {
    sink: S,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    /// Frames waiting to fill the next packet
    queue: VecDeque<Complex32>,
    stats: StreamStats,
    decay: f32,
}

impl<S: PacketSink> StereoPcmStream<S> {
    /// Creates a stereo PCM stream
    pub fn new(sink: S, ssrc: u32, sample_rate: u32) -> Self {
        StereoPcmStream {
            sink,
            sequence: 0,
            timestamp: 0,
            ssrc,
            queue: VecDeque::new(),
            stats: StreamStats::default(),
            decay: (-(STEREO_FRAMES_PER_PACKET as f32) / sample_rate as f32).exp(),
        }
    }

    /// Queues frames (left on the real part, right on the imaginary part)
    /// and sends every complete packet
    pub fn push(&mut self, frames: &[Complex32]) -> io::Result<()> {
        self.queue.extend(frames);
        while self.queue.len() >= STEREO_FRAMES_PER_PACKET {
            let mut datagram = [0u8; RTP_HEADER_LENGTH + 4 * STEREO_FRAMES_PER_PACKET];
            RtpHeader {
                payload_type: PAYLOAD_TYPE_PCM_STEREO,
                marker: false,
                sequence: self.sequence,
                timestamp: self.timestamp,
                ssrc: self.ssrc,
            }
            .write_to(&mut datagram);
            for (index, frame) in self.queue.drain(..STEREO_FRAMES_PER_PACKET).enumerate() {
                let offset = RTP_HEADER_LENGTH + 4 * index;
                BigEndian::write_i16(&mut datagram[offset..offset + 2], scale_clip(frame.re));
                BigEndian::write_i16(&mut datagram[offset + 2..offset + 4], scale_clip(frame.im));
            }
            self.sink.send(&datagram)?;
            self.sequence = self.sequence.wrapping_add(1);
            self.timestamp = self
                .timestamp
                .wrapping_add(STEREO_FRAMES_PER_PACKET as u32);
            self.stats.packets += 1;
            self.stats.bitrate = self.decay * self.stats.bitrate
                + 8.0 * 4.0 * STEREO_FRAMES_PER_PACKET as f32;
        }
        Ok(())
    }

    /// Returns the stream counters
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f32::consts::PI;

    /// Collects datagrams instead of sending them
    struct CollectSink<'p>(&'p mut Vec<Vec<u8>>);

    impl<'p> PacketSink for CollectSink<'p> {
        fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.0.push(datagram.to_vec());
            Ok(())
        }
    }

    /// A full-scale-0.7 tone must reconstruct from the packets with at most
    /// one LSB of error, in big-endian byte order
    #[test]
    fn mono_round_trip() {
        let mut packets = Vec::new();
        let tone: Vec<f32> = (0..MONO_SAMPLES_PER_PACKET * 3)
            .map(|n| 0.7 * (2.0 * PI * 1000.0 * n as f32 / 48000.0).sin())
            .collect();
        {
            let mut stream = MonoPcmStream::new(CollectSink(&mut packets), 1234, 48000);
            stream.push(&tone).expect("push failed");
            assert_eq!(stream.stats().packets, 3);
        }
        assert_eq!(packets.len(), 3);

        let mut decoded = Vec::new();
        for (index, packet) in packets.iter().enumerate() {
            let (header, payload) = RtpHeader::parse(packet).expect("bad RTP header");
            assert_eq!(header.payload_type, PAYLOAD_TYPE_PCM_MONO);
            assert_eq!(header.sequence, index as u16);
            assert_eq!(
                header.timestamp,
                (index * MONO_SAMPLES_PER_PACKET) as u32
            );
            assert_eq!(header.ssrc, 1234);
            for pair in payload.chunks_exact(2) {
                decoded.push(f32::from(BigEndian::read_i16(pair)) / f32::from(i16::MAX));
            }
        }
        assert_eq!(decoded.len(), tone.len());
        let lsb = 1.0 / f32::from(i16::MAX);
        let rms_error = (decoded
            .iter()
            .zip(tone.iter())
            .map(|(a, b)| ((a - b) as f64).powi(2))
            .sum::<f64>()
            / tone.len() as f64)
            .sqrt();
        assert!(rms_error <= lsb as f64, "rms error {} above one LSB", rms_error);
    }

    #[test]
    fn stereo_interleaves_left_then_right() {
        let mut packets = Vec::new();
        let frames: Vec<Complex32> = (0..STEREO_FRAMES_PER_PACKET)
            .map(|n| Complex32::new(0.25, -0.25) * (n as f32 / STEREO_FRAMES_PER_PACKET as f32))
            .collect();
        {
            let mut stream = StereoPcmStream::new(CollectSink(&mut packets), 7, 48000);
            stream.push(&frames).expect("push failed");
        }
        assert_eq!(packets.len(), 1);
        let (header, payload) = RtpHeader::parse(&packets[0]).expect("bad RTP header");
        assert_eq!(header.payload_type, PAYLOAD_TYPE_PCM_STEREO);
        for (index, quad) in payload.chunks_exact(4).enumerate() {
            let left = BigEndian::read_i16(&quad[0..2]);
            let right = BigEndian::read_i16(&quad[2..4]);
            assert_eq!(left, scale_clip(frames[index].re));
            assert_eq!(right, scale_clip(frames[index].im));
        }
    }

    #[test]
    fn partial_packets_wait_for_more_samples() {
        let mut packets = Vec::new();
        {
            let mut stream = MonoPcmStream::new(CollectSink(&mut packets), 0, 48000);
            stream.push(&[0.0; 100]).expect("push failed");
            assert_eq!(stream.stats().packets, 0);
            stream.push(&[0.0; 156]).expect("push failed");
            assert_eq!(stream.stats().packets, 1);
        }
        assert_eq!(packets.len(), 1);
    }
}
