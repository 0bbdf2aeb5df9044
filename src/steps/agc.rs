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

//! Automatic gain control
//!
//! On a new amplitude peak the gain drops immediately so the output stays at
//! the headroom target, then holds for the hang time, then recovers at a
//! fixed rate in dB per second.

/// Converts decibels to a voltage ratio
pub fn db_to_voltage(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// Converts a power ratio to decibels
pub fn power_to_db(power: f32) -> f32 {
    10.0 * power.log10()
}

/// AGC configuration
#[derive(Debug, Clone, Copy)]
pub struct AgcSettings {
    /// Output amplitude target, as a fraction of full scale
    pub headroom: f32,
    /// Seconds to hold the gain after a peak before recovery starts
    pub hang_time: f32,
    /// Gain recovery rate in dB per second
    pub recovery_rate: f32,
    /// Gain reduction rate in dB per second during attack, or 0 for an
    /// immediate attack
    pub attack_rate: f32,
}

impl Default for AgcSettings {
    fn default() -> Self {
        AgcSettings {
            headroom: db_to_voltage(-10.0),
            hang_time: 1.1,
            recovery_rate: 6.0,
            attack_rate: 0.0,
        }
    }
}

/// Per-sample AGC state
#[derive(Debug, Clone)]
pub struct Agc {
    gain: f32,
    headroom: f32,
    /// Samples of hang remaining before recovery resumes
    hang: u32,
    /// Hang duration in samples
    hang_max: u32,
    /// Per-sample gain multiplier while recovering, > 1
    recovery_per_sample: f32,
    /// Per-sample gain multiplier while attacking, < 1, or 0 for an
    /// immediate attack
    attack_per_sample: f32,
}

impl Agc {
    /// Creates an AGC running at the provided sample rate
    ///
    /// The gain starts unset; the first sample establishes it at
    /// headroom / amplitude.
    pub fn new(settings: AgcSettings, sample_rate: f32) -> Self {
        let sample_time = 1.0 / sample_rate;
        let attack_per_sample = if settings.attack_rate > 0.0 {
            db_to_voltage(-settings.attack_rate * sample_time)
        } else {
            0.0
        };
        Agc {
            gain: f32::NAN,
            headroom: settings.headroom,
            hang: 0,
            hang_max: (settings.hang_time * sample_rate) as u32,
            recovery_per_sample: db_to_voltage(settings.recovery_rate * sample_time),
            attack_per_sample,
        }
    }

    /// Returns the current gain
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Updates the loop with the amplitude driving it and returns the gain to
    /// apply to the current sample
    pub fn process(&mut self, amplitude: f32) -> f32 {
        if self.gain.is_nan() {
            if amplitude > 0.0 {
                self.gain = self.headroom / amplitude;
            }
            return if self.gain.is_nan() { 0.0 } else { self.gain };
        }
        if amplitude * self.gain > self.headroom {
            let floor = self.headroom / amplitude;
            if self.attack_per_sample > 0.0 {
                self.gain = (self.gain * self.attack_per_sample).max(floor);
            } else {
                self.gain = floor;
            }
            self.hang = self.hang_max;
        } else if self.hang > 0 {
            self.hang -= 1;
        } else {
            self.gain *= self.recovery_per_sample;
        }
        self.gain
    }

    /// Forgets the gain so the next sample re-establishes it
    pub fn reset(&mut self) {
        self.gain = f32::NAN;
        self.hang = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn settings() -> AgcSettings {
        AgcSettings {
            headroom: db_to_voltage(-10.0),
            hang_time: 0.01,
            recovery_rate: 6.0,
            attack_rate: 0.0,
        }
    }

    #[test]
    fn first_sample_sets_gain() {
        let mut agc = Agc::new(settings(), 48000.0);
        let gain = agc.process(0.5);
        assert!((gain * 0.5 - db_to_voltage(-10.0)).abs() < 1e-6);
    }

    /// A +6 dBFS step must pull the output back to the headroom target at
    /// once, hold for the hang time, then recover at the configured rate
    #[test]
    fn attack_hang_and_recovery() {
        let sample_rate = 48000.0f32;
        let headroom = db_to_voltage(-10.0);
        let mut agc = Agc::new(settings(), sample_rate);

        // Establish gain on a signal 20 dB below the coming peak
        let quiet = 0.2f32;
        let reference_gain = agc.process(quiet);

        // +6 dBFS impulse
        let loud = db_to_voltage(6.0);
        let gain = agc.process(loud);
        assert!(
            loud * gain <= headroom * 1.0001,
            "output {} above headroom {}",
            loud * gain,
            headroom
        );

        // Hold: gain must not rise during the hang period
        let hang_samples = (0.01 * sample_rate) as usize;
        for _ in 0..hang_samples {
            assert!(agc.process(quiet) <= gain * 1.0001);
        }

        // Recovery at 6 dB/s: the 20 dB reduction is recovered within 20/6
        // seconds
        let recovery_samples = (sample_rate * 20.0 / 6.0) as usize + 100;
        let mut recovered = false;
        for _ in 0..recovery_samples {
            if agc.process(quiet) >= reference_gain {
                recovered = true;
                break;
            }
        }
        assert!(recovered, "gain did not recover in 20/rate seconds");
    }

    #[test]
    fn reset_forgets_gain() {
        let mut agc = Agc::new(settings(), 48000.0);
        agc.process(0.5);
        agc.reset();
        let gain = agc.process(0.25);
        assert!((gain * 0.25 - db_to_voltage(-10.0)).abs() < 1e-6);
    }
}
