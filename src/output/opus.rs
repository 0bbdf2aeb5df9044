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
//! The Opus RTP stream
//!
//! The encoder itself is reached through the [`AudioEncoder`] trait; an
//! implementation backed by libopus is available with the `opus` cargo
//! feature. The packetizer handles framing, discontinuous transmission, and
//! encoder failures: a failed frame is dropped without consuming a sequence
//! number, but its timestamp still advances so receivers can detect the gap.
//!

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::io;

use num_complex::Complex32;

use super::{PacketSink, StreamStats};
use crate::block::AudioSamples;
use crate::rtp::{RtpHeader, PAYLOAD_TYPE_OPUS, RTP_HEADER_LENGTH};

/// Frame durations the codec accepts, in milliseconds
pub const BLOCK_DURATIONS_MS: [f32; 9] = [2.5, 5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 100.0, 120.0];

/// Returns the frame length in samples for a block duration, or None if the
/// duration is not one the codec accepts
pub fn frame_samples(block_ms: f32, sample_rate: u32) -> Option<usize> {
    if BLOCK_DURATIONS_MS.iter().any(|valid| *valid == block_ms) {
        Some((block_ms * sample_rate as f32 / 1000.0).round() as usize)
    } else {
        None
    }
}

/// An encoder failure; the affected frame is dropped
#[derive(Debug, Clone)]
pub struct CodecError(pub String);

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec error: {}", self.0)
    }
}

impl Error for CodecError {}

/// Compresses one stereo frame to a codec payload
pub trait AudioEncoder {
    /// Encodes exactly one frame of stereo samples (left on the real part,
    /// right on the imaginary part) and returns the payload bytes
    fn encode(&mut self, frame: &[Complex32]) -> Result<Vec<u8>, CodecError>;
}

impl<E> AudioEncoder for Box<E>
where
    E: AudioEncoder + ?Sized,
{
    fn encode(&mut self, frame: &[Complex32]) -> Result<Vec<u8>, CodecError> {
        (**self).encode(frame)
    }
}

/// Packetizes compressed audio as RTP payload type 20, one codec frame per
/// packet
pub struct OpusStream<S, E> {
    sink: S,
    encoder: E,
    /// Samples per codec frame
    frame_samples: usize,
    /// When set, frames the encoder compresses to 2 bytes or fewer are not
    /// transmitted
    dtx: bool,
    sequence: u16,
    timestamp: u32,
    ssrc: u32,
    queue: VecDeque<Complex32>,
    frame: Vec<Complex32>,
    stats: StreamStats,
    decay: f32,
}

impl<S: PacketSink, E: AudioEncoder> OpusStream<S, E> {
    /// Creates an Opus stream sending frames of `frame_samples` samples
    pub fn new(
        sink: S,
        encoder: E,
        frame_samples: usize,
        dtx: bool,
        ssrc: u32,
        sample_rate: u32,
    ) -> Self {
        OpusStream {
            sink,
            encoder,
            frame_samples,
            dtx,
            sequence: 0,
            timestamp: 0,
            ssrc,
            queue: VecDeque::new(),
            frame: Vec::with_capacity(frame_samples),
            stats: StreamStats::default(),
            decay: (-(frame_samples as f32) / sample_rate as f32).exp(),
        }
    }

    /// Queues audio (mono is duplicated into both channels) and encodes and
    /// sends every complete frame
    pub fn push(&mut self, samples: &AudioSamples) -> io::Result<()> {
        match samples {
            AudioSamples::Mono(mono) => self
                .queue
                .extend(mono.iter().map(|s| Complex32::new(*s, *s))),
            AudioSamples::Stereo(stereo) => self.queue.extend(stereo.iter().copied()),
        }
        while self.queue.len() >= self.frame_samples {
            self.frame.clear();
            self.frame.extend(self.queue.drain(..self.frame_samples));
            match self.encoder.encode(&self.frame) {
                Ok(payload) => {
                    if !self.dtx || payload.len() > 2 {
                        let mut datagram =
                            Vec::with_capacity(RTP_HEADER_LENGTH + payload.len());
                        datagram.resize(RTP_HEADER_LENGTH, 0);
                        RtpHeader {
                            payload_type: PAYLOAD_TYPE_OPUS,
                            marker: false,
                            sequence: self.sequence,
                            timestamp: self.timestamp,
                            ssrc: self.ssrc,
                        }
                        .write_to(&mut datagram);
                        datagram.extend_from_slice(&payload);
                        self.sink.send(&datagram)?;
                        self.sequence = self.sequence.wrapping_add(1);
                        self.stats.packets += 1;
                        self.stats.bitrate =
                            self.decay * self.stats.bitrate + 8.0 * payload.len() as f32;
                    }
                }
                Err(e) => {
                    // Drop the frame; the sequence number is not consumed
                    error!("opus encode failed: {}", e);
                }
            }
            // The timestamp always advances so receivers can measure what
            // was suppressed or dropped
            self.timestamp = self.timestamp.wrapping_add(self.frame_samples as u32);
        }
        Ok(())
    }

    /// Returns the stream counters
    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

/// Stereo Opus encoder backed by libopus
#[cfg(feature = "opus")]
pub struct OpusEncoder {
    encoder: ::opus::Encoder,
    interleaved: Vec<f32>,
    output: Vec<u8>,
}

#[cfg(feature = "opus")]
impl OpusEncoder {
    /// Creates a stereo encoder at the provided rate and bitrate
    // TODO: enable encoder-side DTX once the opus crate exposes OPUS_SET_DTX
    pub fn new(sample_rate: u32, bitrate: i32) -> Result<Self, ::opus::Error> {
        let mut encoder = ::opus::Encoder::new(
            sample_rate,
            ::opus::Channels::Stereo,
            ::opus::Application::Audio,
        )?;
        encoder.set_bitrate(::opus::Bitrate::Bits(bitrate))?;
        Ok(OpusEncoder {
            encoder,
            interleaved: Vec::new(),
            output: vec![0u8; 2048],
        })
    }
}

#[cfg(feature = "opus")]
impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, frame: &[Complex32]) -> Result<Vec<u8>, CodecError> {
        self.interleaved.clear();
        for sample in frame {
            self.interleaved.push(sample.re);
            self.interleaved.push(sample.im);
        }
        let length = self
            .encoder
            .encode_float(&self.interleaved, &mut self.output)
            .map_err(|e| CodecError(e.to_string()))?;
        Ok(self.output[..length].to_vec())
    }
}
