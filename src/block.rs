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
//! Blocks of samples passed between pipeline stages
//!
//! Each block is owned by exactly one stage at a time; sending it over a
//! channel transfers ownership to the next stage.
//!

use num_complex::Complex32;

/// A block of L mixed complex baseband samples at the input rate
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// Index of the first sample, counted at the input rate from engine start
    pub time: u64,
    /// Interleaved I/Q samples, scaled to +-1.0 full scale
    pub samples: Vec<Complex32>,
}

/// A block of L/D channelized samples at the decimated rate
#[derive(Debug, Clone)]
pub struct ChannelBlock {
    /// Index of the first sample, counted at the decimated rate
    pub time: u64,
    /// Index into the mode table of the mode the channel filter was built
    /// for when this block was produced
    pub mode_index: usize,
    /// Complex channel samples (for cross-conjugate filters, the two
    /// sidebands ride on the real and imaginary parts)
    pub samples: Vec<Complex32>,
}

/// Demodulated audio, mono or stereo
#[derive(Debug, Clone)]
pub enum AudioSamples {
    /// Mono samples
    Mono(Vec<f32>),
    /// Stereo samples, left on the real part and right on the imaginary part
    Stereo(Vec<Complex32>),
}

impl AudioSamples {
    /// Returns the number of mono samples or stereo frames
    pub fn len(&self) -> usize {
        match self {
            AudioSamples::Mono(samples) => samples.len(),
            AudioSamples::Stereo(samples) => samples.len(),
        }
    }

    /// Returns true if this frame contains no samples
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A frame of demodulated audio at the decimated rate
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Index of the first sample, counted at the decimated rate
    pub time: u64,
    /// The samples
    pub samples: AudioSamples,
}
