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

//! General purpose linear demodulator
//!
//! Handles USB/LSB/CW/ISB/raw I/Q, and with the carrier-tracking PLL also
//! coherent AM, DSB and BPSK. The PLL oscillator is split into coarse and
//! fine parts: an FFT search of the incoming samples steers the coarse part
//! during acquisition, and a second-order loop filter drives the fine part
//! from the block phase, so small-angle updates suffice once near lock.

use std::f32::consts::PI;
use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::block::AudioSamples;
use crate::modes::ModeEntry;
use crate::steps::agc::{Agc, AgcSettings};
use crate::steps::nco::Nco;
use crate::telemetry::TelemetryCell;

/// PLL loop damping factor; 1/sqrt(2) is critical damping
const DAMPING: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Linear demodulator options, fixed for the lifetime of a mode
#[derive(Debug, Clone)]
pub struct LinearConfig {
    /// 1 for mono audio, 2 for stereo (I left, Q right)
    pub channels: u8,
    /// Envelope detection instead of a linear output
    pub envelope: bool,
    /// Enable the carrier-tracking PLL
    pub pll: bool,
    /// Square samples ahead of the carrier search and phase detector, to
    /// strip BPSK or DSB modulation
    pub square: bool,
    /// Audio frequency shift in Hz applied at the output
    pub shift: f32,
    /// PLL loop bandwidth in Hz
    pub loop_bw: f32,
    /// Seconds of good (or bad) signal before the lock flag flips
    pub lock_time: f32,
    /// Lock threshold in dB SNR
    pub snr_threshold_db: f32,
    /// Carrier search FFT length
    pub fft_size: usize,
    /// Carrier search limits in Hz (doubled when squaring)
    pub search_low: f32,
    /// Upper carrier search limit in Hz
    pub search_high: f32,
    /// Acquisition frequency sweep rate; 0 disables sweeping
    pub ramp_rate: f32,
    /// AGC settings
    pub agc: AgcSettings,
}

impl Default for LinearConfig {
    fn default() -> Self {
        LinearConfig {
            channels: 1,
            envelope: false,
            pll: false,
            square: false,
            shift: 0.0,
            loop_bw: 1.0,
            lock_time: 1.0,
            snr_threshold_db: 3.0,
            fft_size: 1 << 16,
            search_low: -300.0,
            search_high: 300.0,
            ramp_rate: 0.0,
            agc: AgcSettings::default(),
        }
    }
}

impl LinearConfig {
    /// Derives a linear configuration from a mode table entry
    pub fn from_mode(entry: &ModeEntry) -> Self {
        LinearConfig {
            channels: if entry.options.conj { 2 } else { 1 },
            envelope: entry.options.envelope,
            pll: entry.options.coherent || entry.options.calibrate || entry.options.square,
            square: entry.options.square,
            shift: entry.shift,
            ..LinearConfig::default()
        }
    }
}

/// Linear demodulation with optional coherent carrier tracking
pub struct LinearDemod {
    config: LinearConfig,
    sample_time: f32,

    agc: Agc,
    /// Output audio shift oscillator
    shift_osc: Nco,

    // Coherent mode state
    /// FFT-steered offset oscillator
    coarse: Nco,
    /// Loop-filter-steered oscillator
    fine: Nco,
    /// Second-order loop integrator
    integrator: f32,
    /// FFT-derived frequency offset in Hz
    delta_f: f32,
    /// Acquisition sweep state
    ramp: f32,
    /// Samples of good signal minus samples of bad signal, clamped
    lock_count: i64,
    pll_lock: bool,
    /// SNR of the previous block as a power ratio; drives the lock detector
    snr: f32,
    /// Smoothed frequency offset estimate in Hz; NaN until tracking starts
    foffset: f32,
    cphase: f32,

    /// Carrier search FFT state, allocated only when the PLL is enabled
    search: Option<CarrierSearch>,

    // Derived loop constants
    integrator_gain: f32,
    prop_gain: f32,
    snr_thresh: f32,
    lock_limit: i64,
    bin_size: f32,
    low_limit: i64,
    high_limit: i64,
}

impl LinearDemod {
    /// Creates a linear demodulator running at the decimated sample rate
    pub fn new(config: LinearConfig, sample_rate: f32) -> Self {
        let sample_time = 1.0 / sample_rate;

        // Second-order loop filter constants (Gardner): unity phase detector
        // gain, 2 pi radians/sec/Hz oscillator gain
        let natural_freq = config.loop_bw * 2.0 * PI;
        let tau1 = 2.0 * PI / (natural_freq * natural_freq);
        let tau2 = 2.0 * DAMPING / natural_freq;

        let snr_thresh = 10.0f32.powf(config.snr_threshold_db / 10.0);
        let lock_limit = (config.lock_time / sample_time).round() as i64;
        let bin_size = 1.0 / (config.fft_size as f32 * sample_time);

        let agc = Agc::new(config.agc, sample_rate);
        let shift_osc = Nco::new(config.shift * sample_time);
        let search = if config.pll {
            Some(CarrierSearch::new(config.fft_size))
        } else {
            None
        };
        let low_limit = (config.search_low / bin_size).round() as i64;
        let high_limit = (config.search_high / bin_size).round() as i64;

        LinearDemod {
            config,
            sample_time,
            agc,
            shift_osc,
            coarse: Nco::new(0.0),
            fine: Nco::new(0.0),
            integrator: 0.0,
            delta_f: 0.0,
            ramp: 0.0,
            lock_count: 0,
            pll_lock: false,
            snr: 0.0,
            foffset: f32::NAN,
            cphase: 0.0,
            search,
            integrator_gain: 1.0 / tau1,
            prop_gain: tau2 / tau1,
            snr_thresh,
            lock_limit,
            bin_size,
            low_limit,
            high_limit,
        }
    }

    /// Returns true if this demodulator produces stereo audio
    pub fn stereo(&self) -> bool {
        self.config.channels == 2 && !self.config.envelope
    }

    /// Returns true when the carrier-tracking loop is locked
    pub fn locked(&self) -> bool {
        self.pll_lock
    }

    /// Demodulates one block of channel samples
    ///
    /// The samples are mutated in place by the carrier tracking and, for
    /// stereo output, reused as the output buffer.
    pub fn process_block(
        &mut self,
        samples: &mut Vec<Complex32>,
        telemetry: &TelemetryCell,
    ) -> AudioSamples {
        if self.config.pll {
            self.track_carrier(samples);
        }

        let len = samples.len();
        let mut energy = 0.0f32;
        let mut output_level = 0.0f32;
        let mono = self.config.envelope || self.config.channels == 1;
        let mut audio = if mono {
            Vec::with_capacity(len)
        } else {
            Vec::new()
        };
        for sample in samples.iter_mut() {
            let s = *sample * self.shift_osc.step();
            let norm = s.norm_sqr();
            energy += norm;
            let amplitude = norm.sqrt();
            let gain = self.agc.process(amplitude);
            if self.config.envelope {
                let value = amplitude * gain;
                output_level += value * value;
                audio.push(value);
            } else if self.config.channels == 1 {
                let value = s.re * gain;
                output_level += value * value;
                audio.push(value);
            } else {
                let value = s * gain;
                output_level += value.norm_sqr();
                *sample = value;
            }
        }

        let gain = self.agc.gain();
        let snr = self.snr;
        let foffset = self.foffset;
        let cphase = self.cphase;
        let pll_lock = self.pll_lock;
        let pll = self.config.pll;
        telemetry.update(|t| {
            t.bb_power = energy / len as f32;
            t.output_level = output_level / (len * usize::from(self.config.channels)) as f32;
            t.gain = gain;
            if pll {
                t.snr = snr;
                t.foffset = if foffset.is_nan() { 0.0 } else { foffset };
                t.cphase = cphase;
                t.pll_lock = pll_lock;
            }
        });

        if mono {
            AudioSamples::Mono(audio)
        } else {
            AudioSamples::Stereo(std::mem::take(samples))
        }
    }

    /// Carrier (or regenerated carrier) tracking
    fn track_carrier(&mut self, samples: &mut [Complex32]) {
        let len = samples.len();

        // Keep a circular history in case acquisition needs it
        if let Some(search) = &mut self.search {
            search.push(samples, self.config.square);
        }

        // Lock detector with hysteresis: the SNR must stay on the other side
        // of the threshold for lock_time before the flag flips
        if self.snr < self.snr_thresh {
            self.lock_count -= len as i64;
        } else {
            self.lock_count += len as i64;
        }
        if self.lock_count >= self.lock_limit {
            self.lock_count = self.lock_limit;
            self.pll_lock = true;
        }
        if self.lock_count <= -self.lock_limit {
            self.lock_count = -self.lock_limit;
            self.pll_lock = false;
        }

        if !self.pll_lock {
            // Out of lock: search for the carrier, no more often than every
            // half FFT length
            let sqterm: i64 = if self.config.square { 2 } else { 1 };
            let low_bin = sqterm * self.low_limit;
            let high_bin = sqterm * self.high_limit;
            let found = self
                .search
                .as_mut()
                .and_then(|search| search.strongest_bin(low_bin, high_bin));
            if let Some(max_bin) = found {
                let mut new_delta_f = self.bin_size * max_bin as f32;
                if self.config.square {
                    // The squared signal carries the doubled frequency
                    new_delta_f /= 2.0;
                }
                if new_delta_f != self.delta_f {
                    debug!("carrier search moved to {} Hz", new_delta_f);
                    self.delta_f = new_delta_f;
                    self.integrator = 0.0;
                    self.coarse
                        .set_frequency(-self.sample_time * self.delta_f, 0.0);
                }
            }
            if self.ramp == 0.0 {
                self.ramp = self.config.ramp_rate;
            }
        } else {
            self.ramp = 0.0;
        }

        // Apply the coarse and fine offsets, estimate SNR, and gather the
        // block phase
        let mut signal = 0.0f32;
        let mut noise = 0.0f32;
        let mut accum = Complex32::default();
        for sample in samples.iter_mut() {
            let s = *sample * self.coarse.step() * self.fine.step();
            *sample = s;
            signal += s.re * s.re;
            noise += s.im * s.im;
            accum += if self.config.square { s * s } else { s };
        }
        let mut cphase = accum.arg();
        if cphase.is_nan() {
            cphase = 0.0;
        }
        if self.config.square {
            cphase /= 2.0;
        }
        self.cphase = cphase;

        // Fine PLL on a block basis: lag-lead (integral plus proportional),
        // with the ramp generator added for acquisition sweeps
        let block_time = len as f32 * self.sample_time;
        self.integrator += cphase * block_time + self.ramp;
        let feedback = self.integrator_gain * self.integrator + self.prop_gain * cphase;
        debug_assert!(!feedback.is_nan());
        self.fine.set_frequency(-feedback * self.sample_time, 0.0);

        if feedback >= self.bin_size && self.ramp > 0.0 {
            self.ramp = -self.config.ramp_rate;
        } else if feedback <= self.bin_size && self.ramp < 0.0 {
            self.ramp = self.config.ramp_rate;
        }

        if self.foffset.is_nan() {
            self.foffset = feedback + self.delta_f;
        } else {
            self.foffset += 0.01 * (feedback + self.delta_f - self.foffset);
        }
        self.snr = if noise != 0.0 {
            (signal / noise - 1.0).max(0.0)
        } else {
            f32::NAN
        };
    }
}

/// A circular sample history and FFT for locating the carrier during
/// acquisition
struct CarrierSearch {
    ring: Vec<Complex32>,
    ptr: usize,
    /// New samples pushed since the last transform
    new_samples: usize,
    work: Vec<Complex32>,
    scratch: Vec<Complex32>,
    plan: Arc<dyn Fft<f32>>,
}

impl CarrierSearch {
    fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let plan = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex32::default(); plan.get_inplace_scratch_len()];
        CarrierSearch {
            ring: vec![Complex32::default(); fft_size],
            ptr: 0,
            new_samples: 0,
            work: vec![Complex32::default(); fft_size],
            scratch,
            plan,
        }
    }

    /// Adds samples (or their squares) to the circular history
    fn push(&mut self, samples: &[Complex32], square: bool) {
        let fft_size = self.ring.len();
        self.new_samples = (self.new_samples + samples.len()).min(fft_size);
        for sample in samples {
            self.ring[self.ptr] = if square {
                // Squaring strips BPSK or DSB modulation and forms a carrier
                // component at twice its actual frequency
                sample * sample
            } else {
                *sample
            };
            self.ptr += 1;
            if self.ptr >= fft_size {
                self.ptr = 0;
            }
        }
    }

    /// Transforms the history and returns the bin with the most energy in
    /// [low_bin, high_bin], with negative bins counting down from the top
    ///
    /// The transform is expensive, so it runs only once at least half an FFT
    /// length of new samples has accumulated; otherwise (or when the search
    /// range holds no energy at all) this returns None.
    fn strongest_bin(&mut self, low_bin: i64, high_bin: i64) -> Option<i64> {
        let fft_size = self.ring.len();
        if self.new_samples <= fft_size / 2 {
            return None;
        }
        self.new_samples = 0;
        self.work.copy_from_slice(&self.ring);
        self.plan
            .process_with_scratch(&mut self.work, &mut self.scratch);

        let mut max_bin = None;
        let mut max_energy = 0.0f32;
        for bin in low_bin..=high_bin {
            let index = bin.rem_euclid(fft_size as i64) as usize;
            let energy = self.work[index].norm_sqr();
            if energy > max_energy {
                max_energy = energy;
                max_bin = Some(bin);
            }
        }
        max_bin
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI as PI64;

    const SAMPLE_RATE: f32 = 48000.0;
    const BLOCK: usize = 1024;

    fn pll_config() -> LinearConfig {
        LinearConfig {
            pll: true,
            // A small search FFT and short lock time keep the test fast; the
            // wider loop covers the coarser bin quantization
            loop_bw: 3.0,
            lock_time: 0.25,
            fft_size: 4096,
            ..LinearConfig::default()
        }
    }

    /// CW carrier with phase-continuous frequency changes
    struct Carrier {
        phase: f64,
        frequency: f64,
        amplitude: f64,
    }

    impl Carrier {
        fn fill(&mut self, block: &mut [Complex32]) {
            for slot in block.iter_mut() {
                *slot = Complex32::new(
                    (self.amplitude * self.phase.cos()) as f32,
                    (self.amplitude * self.phase.sin()) as f32,
                );
                self.phase += 2.0 * PI64 * self.frequency / SAMPLE_RATE as f64;
                self.phase %= 2.0 * PI64;
            }
        }
    }

    fn run_until_locked(
        demod: &mut LinearDemod,
        carrier: &mut Carrier,
        telemetry: &TelemetryCell,
        max_blocks: usize,
    ) -> usize {
        let mut block = vec![Complex32::default(); BLOCK];
        for index in 0..max_blocks {
            carrier.fill(&mut block);
            let mut samples = block.clone();
            demod.process_block(&mut samples, telemetry);
            if demod.locked() {
                return index;
            }
        }
        panic!("PLL failed to lock within {} blocks", max_blocks);
    }

    #[test]
    fn pll_acquires_and_reacquires() {
        let telemetry = TelemetryCell::new();
        let config = pll_config();
        // lock_time + fft_size / sample rate, in blocks, with sweep margin
        let budget_seconds = config.lock_time + config.fft_size as f32 / SAMPLE_RATE;
        let budget_blocks = (3.0 * budget_seconds * SAMPLE_RATE / BLOCK as f32) as usize;

        let mut demod = LinearDemod::new(config, SAMPLE_RATE);
        let mut carrier = Carrier {
            phase: 0.3,
            frequency: 150.0,
            amplitude: 0.5,
        };
        run_until_locked(&mut demod, &mut carrier, &telemetry, budget_blocks);

        // Let the loop and the smoothed frequency estimate settle, then
        // check the steady-state phase error
        let mut block = vec![Complex32::default(); BLOCK];
        for _ in 0..400 {
            carrier.fill(&mut block);
            let mut samples = block.clone();
            demod.process_block(&mut samples, &telemetry);
        }
        let measurements = telemetry.snapshot();
        assert!(measurements.pll_lock);
        assert!(
            measurements.cphase.abs() <= PI / 64.0,
            "steady-state phase error {} above pi/64",
            measurements.cphase
        );
        assert!(
            (measurements.foffset - 150.0).abs() < 10.0,
            "frequency estimate {} far from 150 Hz",
            measurements.foffset
        );

        // A -200 Hz disturbance must cause reacquisition on its own
        carrier.frequency = -50.0;
        let mut unlocked = false;
        for _ in 0..60 {
            carrier.fill(&mut block);
            let mut samples = block.clone();
            demod.process_block(&mut samples, &telemetry);
            if !demod.locked() {
                unlocked = true;
                break;
            }
        }
        assert!(unlocked, "PLL never noticed the frequency step");
        run_until_locked(&mut demod, &mut carrier, &telemetry, 4 * budget_blocks);
        for _ in 0..30 {
            carrier.fill(&mut block);
            let mut samples = block.clone();
            demod.process_block(&mut samples, &telemetry);
        }
        assert!(
            telemetry.snapshot().cphase.abs() <= PI / 64.0,
            "phase error after reacquisition too large"
        );
    }

    #[test]
    fn envelope_output_tracks_headroom() {
        let telemetry = TelemetryCell::new();
        let config = LinearConfig {
            envelope: true,
            ..LinearConfig::default()
        };
        let mut demod = LinearDemod::new(config, SAMPLE_RATE);
        let mut audio = Vec::new();
        for _ in 0..4 {
            let mut samples = vec![Complex32::new(0.25, 0.0); BLOCK];
            match demod.process_block(&mut samples, &telemetry) {
                AudioSamples::Mono(mono) => audio = mono,
                _ => panic!("envelope output must be mono"),
            }
        }
        let headroom = AgcSettings::default().headroom;
        for value in &audio {
            assert!(
                (value - headroom).abs() < 0.01,
                "envelope sample {} not at headroom {}",
                value,
                headroom
            );
        }
    }

    #[test]
    fn stereo_passes_both_channels() {
        let telemetry = TelemetryCell::new();
        let config = LinearConfig {
            channels: 2,
            ..LinearConfig::default()
        };
        let mut demod = LinearDemod::new(config, SAMPLE_RATE);
        assert!(demod.stereo());
        let input: Vec<Complex32> = (0..BLOCK)
            .map(|n| Complex32::from_polar(0.2, 2.0 * PI * 777.0 * n as f32 / SAMPLE_RATE))
            .collect();
        let mut samples = input.clone();
        let output = match demod.process_block(&mut samples, &telemetry) {
            AudioSamples::Stereo(stereo) => stereo,
            _ => panic!("two-channel output must be stereo"),
        };
        assert_eq!(output.len(), BLOCK);
        // The gain is uniform, so the phase structure must be preserved
        let gain = demod.agc.gain();
        for (input, output) in input.iter().zip(output.iter()).skip(1) {
            assert!((input * gain - output).norm() < 1e-3);
        }
    }

    #[test]
    fn shift_moves_audio_frequency() {
        let telemetry = TelemetryCell::new();
        let config = LinearConfig {
            shift: 1000.0,
            ..LinearConfig::default()
        };
        let mut demod = LinearDemod::new(config, SAMPLE_RATE);
        // A carrier at 0 Hz comes out as a 1 kHz tone
        let mut audio = Vec::new();
        for _ in 0..4 {
            let mut samples = vec![Complex32::new(0.3, 0.0); BLOCK];
            match demod.process_block(&mut samples, &telemetry) {
                AudioSamples::Mono(mono) => audio = mono,
                _ => panic!("single-channel output must be mono"),
            }
        }
        // Project onto the expected tone
        let mut in_phase = 0.0f64;
        let mut quadrature = 0.0f64;
        let mut power = 0.0f64;
        for (n, sample) in audio.iter().enumerate() {
            let angle = 2.0 * PI64 * 1000.0 * n as f64 / SAMPLE_RATE as f64;
            in_phase += f64::from(*sample) * angle.cos();
            quadrature += f64::from(*sample) * angle.sin();
            power += f64::from(*sample) * f64::from(*sample);
        }
        let tone_power =
            2.0 * (in_phase * in_phase + quadrature * quadrature) / (audio.len() as f64).powi(2);
        assert!(
            tone_power > 0.8 * power / audio.len() as f64,
            "audio is not concentrated at 1 kHz"
        );
    }
}
