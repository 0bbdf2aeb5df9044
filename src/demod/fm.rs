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

//! FM demodulation and squelch
//!
//! The SNR estimate comes from the amplitude statistics of the block: the
//! magnitude of a complex Gaussian is chi-squared with 2 degrees of freedom,
//! so mean^2 / (2 * variance) - 1 approximates the carrier-to-noise power
//! ratio. The squelch gates on it with a two-block tail.

use std::f32::consts::FRAC_1_PI;

use num_complex::Complex32;

use crate::block::AudioSamples;
use crate::telemetry::TelemetryCell;

/// SNR power ratio above which the squelch opens
const SQUELCH_THRESHOLD: f32 = 4.0;
/// Blocks the squelch stays open after the SNR drops
const SQUELCH_TAIL_BLOCKS: u32 = 2;
/// De-emphasis integrator leak, 1/e at roughly 300 Hz
const DEEMPHASIS_LEAK: f32 = 0.993_769_49;
/// Empirical de-emphasis audio scale
const DEEMPHASIS_GAIN: f32 = 0.114;

/// FM demodulator with hysteretic squelch and optional de-emphasis
pub struct FmDemod {
    /// Previous channel sample, for the phase difference
    prev: Complex32,
    /// De-emphasis integrator state, also decayed while squelched to avoid a
    /// thump when the squelch closes
    last_audio: f32,
    /// Blocks of squelch tail remaining; 0 means closed
    squelch_open: u32,
    /// Straight FM output without de-emphasis
    flat: bool,
    headroom: f32,
    sample_rate: f32,
    /// Amplitude scratch reused across blocks
    amplitudes: Vec<f32>,
}

impl FmDemod {
    /// Creates an FM demodulator running at the decimated sample rate
    pub fn new(flat: bool, headroom: f32, sample_rate: f32) -> Self {
        FmDemod {
            prev: Complex32::default(),
            last_audio: 0.0,
            squelch_open: 0,
            flat,
            headroom,
            sample_rate,
            amplitudes: Vec::new(),
        }
    }

    /// Demodulates one block of channel samples to mono audio
    ///
    /// `low` and `high` are the current filter cutoffs in Hz; the loop gain
    /// is derived from them every block so bandwidth changes track
    /// immediately.
    pub fn process_block(
        &mut self,
        samples: &[Complex32],
        low: f32,
        high: f32,
        telemetry: &TelemetryCell,
    ) -> AudioSamples {
        let len = samples.len();
        debug_assert!(len > 1);

        // Constant loop gain; adjusted only by the filter bandwidth, the
        // AGC plays no part in FM
        let gain = (self.headroom * FRAC_1_PI * self.sample_rate) / (low - high).abs();

        // Two passes for amplitude mean and variance
        let mut bb_power = 0.0f32;
        let mut mean = 0.0f32;
        self.amplitudes.clear();
        for sample in samples {
            let power = sample.norm_sqr();
            bb_power += power;
            let amplitude = power.sqrt();
            self.amplitudes.push(amplitude);
            mean += amplitude;
        }
        bb_power /= len as f32;
        mean /= len as f32;

        let mut variance = 0.0f32;
        for amplitude in &self.amplitudes {
            variance += (amplitude - mean) * (amplitude - mean);
        }
        variance /= (len - 1) as f32;

        let snr = (mean * mean / (2.0 * variance) - 1.0).max(0.0);

        if snr > SQUELCH_THRESHOLD {
            self.squelch_open = SQUELCH_TAIL_BLOCKS;
        }

        let mut audio = Vec::with_capacity(len);
        let mut foffset = None;
        let mut pdeviation = None;
        if self.squelch_open > 0 {
            self.squelch_open -= 1;

            let mut pdev_pos = 0.0f32;
            let mut pdev_neg = 0.0f32;
            let mut avg_f = 0.0f32;
            for (n, sample) in samples.iter().enumerate() {
                let p = sample * self.prev.conj();
                self.prev = *sample;

                let angle = p.arg();
                // Threshold extension weighting after Harris
                let amp = (p.norm() / variance).min(1.0);

                avg_f += angle;
                if n == 0 {
                    pdev_pos = angle;
                    pdev_neg = angle;
                } else if angle > pdev_pos {
                    pdev_pos = angle;
                } else if self.last_audio < pdev_neg {
                    pdev_neg = angle;
                }

                if self.flat {
                    audio.push(angle * gain);
                } else {
                    // Integrate to turn FM into PM: -6 dB/octave de-emphasis
                    self.last_audio =
                        self.last_audio * DEEMPHASIS_LEAK + angle * DEEMPHASIS_GAIN * gain * amp;
                    audio.push(self.last_audio);
                }
            }
            avg_f /= len as f32;
            foffset = Some(self.sample_rate * avg_f * FRAC_1_PI / 2.0);

            // Remove the frequency offset from the deviation peaks
            pdev_pos -= avg_f;
            pdev_neg -= avg_f;
            pdeviation =
                Some(self.sample_rate * pdev_pos.max(-pdev_neg) * FRAC_1_PI / 2.0);
        } else {
            self.prev = Complex32::default();
            for _ in 0..len {
                if self.flat {
                    audio.push(0.0);
                } else {
                    // Keep decaying the integrator so the squelch closing
                    // does not thump
                    audio.push(self.last_audio);
                    self.last_audio *= DEEMPHASIS_LEAK;
                }
            }
        }

        let output_level = audio.iter().map(|s| s * s).sum::<f32>() / len as f32;
        telemetry.update(|t| {
            t.snr = snr;
            t.bb_power = bb_power;
            t.gain = gain;
            t.output_level = output_level;
            if let Some(foffset) = foffset {
                t.foffset = foffset;
            }
            if let Some(pdeviation) = pdeviation {
                t.pdeviation = pdeviation;
            }
        });
        AudioSamples::Mono(audio)
    }

    #[cfg(test)]
    fn squelch_is_open(&self) -> bool {
        self.squelch_open > 0
    }
}
