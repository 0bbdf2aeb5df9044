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
//! Per-block receiver measurements for display and status reports
//!
//! Each field has a single writer (the demodulator or intake stage); readers
//! take snapshots between blocks.
//!

use std::sync::Mutex;

/// Live receiver measurements
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Front end first LO frequency in Hz, from the input stream status
    pub first_lo: f64,
    /// Front end gains in dB, from the input stream status
    pub lna_gain: i16,
    /// Mixer gain in dB
    pub mixer_gain: i16,
    /// IF gain in dB
    pub if_gain: i16,
    /// Estimated SNR as a power ratio (not dB)
    pub snr: f32,
    /// Carrier frequency offset estimate in Hz
    pub foffset: f32,
    /// FM peak deviation in Hz
    pub pdeviation: f32,
    /// Baseband signal power per sample
    pub bb_power: f32,
    /// Smoothed noise floor estimate
    pub noise_floor: f32,
    /// Current AGC or FM loop gain
    pub gain: f32,
    /// Mean squared audio output level
    pub output_level: f32,
    /// Carrier phase at the PLL phase detector, radians
    pub cphase: f32,
    /// True when the carrier-tracking PLL is locked
    pub pll_lock: bool,
    /// Input RTP sequence gaps seen
    pub skips: u64,
    /// Input packets that arrived out of order and were dropped
    pub delayed: u64,
}

/// Shared cell holding the latest telemetry
///
/// Writers update whole groups of fields at once; a snapshot is therefore
/// always internally consistent.
#[derive(Debug, Default)]
pub struct TelemetryCell {
    inner: Mutex<Telemetry>,
}

impl TelemetryCell {
    /// Creates a cell with all measurements zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates fields under the lock
    pub fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut Telemetry),
    {
        let mut guard = self.inner.lock().expect("telemetry lock poisoned");
        update(&mut guard);
    }

    /// Returns a copy of the current measurements
    pub fn snapshot(&self) -> Telemetry {
        self.inner.lock().expect("telemetry lock poisoned").clone()
    }
}
