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

//! AM envelope demodulator
//!
//! Keeping the carrier at constant amplitude fails when selective fading
//! takes out the carrier, so the AGC is driven by the tracked carrier level
//! rather than the envelope peaks.

use num_complex::Complex32;

use crate::block::AudioSamples;
use crate::steps::agc::{Agc, AgcSettings};
use crate::telemetry::TelemetryCell;

/// Carrier DC tracking coefficient, per sample
const DC_COEFF: f32 = 1e-4;
/// Noise floor smoothing coefficient, per block
const NOISE_COEFF: f32 = 1e-3;

/// Envelope detection of AM
pub struct AmDemod {
    agc: Agc,
    /// Tracked carrier level; always positive once samples have been seen
    dc: f32,
    /// Smoothed noise floor estimate; NaN until the first block
    noise_floor: f32,
}

impl AmDemod {
    /// Creates an AM demodulator running at the decimated sample rate
    pub fn new(agc: AgcSettings, sample_rate: f32) -> Self {
        AmDemod {
            agc: Agc::new(agc, sample_rate),
            dc: 0.0,
            noise_floor: f32::NAN,
        }
    }

    /// Demodulates one block of channel samples to mono audio
    pub fn process_block(
        &mut self,
        samples: &[Complex32],
        telemetry: &TelemetryCell,
    ) -> AudioSamples {
        let mut signal = 0.0f32;
        let mut audio = Vec::with_capacity(samples.len());
        for sample in samples {
            let power = sample.norm_sqr();
            signal += power;
            let amplitude = power.sqrt();

            // Remove carrier DC from the audio; dc stays positive because
            // the amplitude is positive
            self.dc += DC_COEFF * (amplitude - self.dc);
            let gain = self.agc.process(self.dc);
            audio.push((amplitude - self.dc) * gain);
        }

        let block_power = signal / samples.len() as f32;
        if self.noise_floor.is_nan() {
            self.noise_floor = block_power;
        } else {
            self.noise_floor += NOISE_COEFF * (block_power - self.noise_floor);
        }

        let output_level =
            audio.iter().map(|s| s * s).sum::<f32>() / audio.len() as f32;
        let gain = self.agc.gain();
        let noise_floor = self.noise_floor;
        telemetry.update(|t| {
            // Scaled to each sample so baseband power displays correctly
            t.bb_power = signal / (2 * samples.len()) as f32;
            t.noise_floor = noise_floor;
            t.gain = gain;
            t.output_level = output_level;
        });
        AudioSamples::Mono(audio)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f32::consts::PI;

    const SAMPLE_RATE: f32 = 48000.0;
    const BLOCK: usize = 1024;

    /// 100% AM: carrier amplitude `carrier`, 1 kHz tone, at 0 Hz offset
    fn modulated(carrier: f32, n: u64) -> Complex32 {
        let envelope = 1.0 + (2.0 * PI * 1000.0 * n as f32 / SAMPLE_RATE).cos();
        Complex32::new(carrier * envelope, 0.0)
    }

    #[test]
    fn recovers_tone_and_removes_carrier() {
        let telemetry = TelemetryCell::new();
        let mut demod = AmDemod::new(AgcSettings::default(), SAMPLE_RATE);
        let carrier = 0.1; // -20 dBFS

        let mut n = 0u64;
        let mut block = vec![Complex32::default(); BLOCK];
        let mut tone_amplitude_at_200ms = 0.0f32;
        let mut late_audio = Vec::new();
        let blocks = (2.0 * SAMPLE_RATE) as usize / BLOCK;
        for index in 0..blocks {
            for slot in block.iter_mut() {
                *slot = modulated(carrier, n);
                n += 1;
            }
            let audio = match demod.process_block(&block, &telemetry) {
                AudioSamples::Mono(audio) => audio,
                _ => panic!("AM must produce mono audio"),
            };
            if index == (0.2 * SAMPLE_RATE) as usize / BLOCK {
                // Tone amplitude from RMS, after removing the residual DC
                let mean = audio.iter().sum::<f32>() / audio.len() as f32;
                let rms = (audio.iter().map(|s| (s - mean) * (s - mean)).sum::<f32>()
                    / audio.len() as f32)
                    .sqrt();
                tone_amplitude_at_200ms = rms * std::f32::consts::SQRT_2;
            }
            if index == blocks - 1 {
                late_audio = audio;
            }
        }

        // At least -12 dBFS within 200 ms of start
        assert!(
            tone_amplitude_at_200ms >= 0.251,
            "tone amplitude {} below -12 dBFS",
            tone_amplitude_at_200ms
        );

        // Residual DC at least 40 dB below the recovered carrier level
        let dc = late_audio.iter().sum::<f32>() / late_audio.len() as f32;
        let carrier_level = demod.dc * demod.agc.gain();
        assert!(
            dc.abs() <= 0.01 * carrier_level,
            "output DC {} not 40 dB below carrier level {}",
            dc,
            carrier_level
        );
    }

    #[test]
    fn reports_baseband_power() {
        let telemetry = TelemetryCell::new();
        let mut demod = AmDemod::new(AgcSettings::default(), SAMPLE_RATE);
        let block = vec![Complex32::new(0.5, 0.0); BLOCK];
        demod.process_block(&block, &telemetry);
        let measured = telemetry.snapshot().bb_power;
        assert!((measured - 0.125).abs() < 1e-6, "bb_power {}", measured);
    }
}
