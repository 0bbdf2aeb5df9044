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

//! Numerically controlled oscillator

use std::f32::consts::PI;

use num_complex::Complex32;
use num_traits::One;

//
// In the basic implementation, sample n is multiplied by
// e^(i * 2 * pi * frequency * n). When n is 0, this is 1. Every time n
// increases, this value gets multiplied by e^(i * 2 * pi * frequency).
//
// By starting at 1 and multiplying by a constant step for each new sample,
// the per-sample work decreases from a complex exponent and a complex
// multiply to one or two complex multiplications. Rounding error accumulates
// in the phasor magnitude, so it is renormalized to unit length periodically.
//

/// Renormalize the phasor after this many steps
const RENORM_INTERVAL: u32 = 16384;

/// A complex oscillator advanced one sample at a time, with an optional
/// linear frequency ramp
#[derive(Debug, Clone)]
pub struct Nco {
    /// The multiplier to apply to the next sample
    phasor: Complex32,
    /// Per-sample phasor advance, e^(i * 2 * pi * frequency)
    step: Complex32,
    /// Per-sample advance of the step itself, for frequency sweeps
    rate: Option<Complex32>,
    /// Steps since the last renormalization
    count: u32,
}

impl Nco {
    /// Creates an oscillator at the provided frequency in cycles per sample
    pub fn new(frequency: f32) -> Self {
        Nco {
            phasor: Complex32::one(),
            step: step_for(frequency),
            rate: None,
            count: 0,
        }
    }

    /// Sets the frequency in cycles per sample, and the frequency change
    /// rate in cycles per sample per sample
    ///
    /// The phase is continuous across the change.
    pub fn set_frequency(&mut self, frequency: f32, rate: f32) {
        self.step = step_for(frequency);
        self.rate = if rate != 0.0 {
            Some(step_for(rate))
        } else {
            None
        };
    }

    /// Returns the oscillator value for the current sample and advances one
    /// sample
    pub fn step(&mut self) -> Complex32 {
        let value = self.phasor;
        self.phasor *= self.step;
        if let Some(rate) = self.rate {
            self.step *= rate;
        }
        self.count += 1;
        if self.count >= RENORM_INTERVAL {
            self.count = 0;
            self.phasor = self.phasor / self.phasor.norm();
            if self.rate.is_some() {
                self.step = self.step / self.step.norm();
            }
        }
        value
    }
}

fn step_for(frequency: f32) -> Complex32 {
    Complex32::from_polar(1.0, 2.0 * PI * frequency)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_reference_phase() {
        let frequency = 0.01f32;
        let mut nco = Nco::new(frequency);
        for n in 0..1000u32 {
            let expected = Complex32::from_polar(1.0, 2.0 * PI * frequency * n as f32);
            let actual = nco.step();
            assert!(
                (expected - actual).norm() < 1e-3,
                "phase drift at sample {}: {} vs {}",
                n,
                actual,
                expected
            );
        }
    }

    #[test]
    fn magnitude_stays_normalized() {
        let mut nco = Nco::new(0.3791);
        let mut last = Complex32::one();
        for _ in 0..200_000 {
            last = nco.step();
        }
        assert!((last.norm() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn frequency_change_keeps_phase_continuous() {
        let mut nco = Nco::new(0.1);
        for _ in 0..99 {
            nco.step();
        }
        let before = nco.step();
        nco.set_frequency(0.2, 0.0);
        let after = nco.step();
        // One step at the old frequency separates the two samples
        let expected = before * Complex32::from_polar(1.0, 2.0 * PI * 0.1);
        assert!((after - expected).norm() < 1e-4);
    }
}
