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
//! Demodulators
//!
//! One demodulator is active per engine. A mode switch replaces the state at
//! a block boundary; demodulator state never survives a mode change.
//!

pub mod am;
pub mod fm;
pub mod linear;

use crate::block::{AudioFrame, ChannelBlock};
use crate::control::TuningState;
use crate::modes::{DemodKind, ModeEntry};
use crate::steps::agc::AgcSettings;
use crate::telemetry::TelemetryCell;

pub use self::am::AmDemod;
pub use self::fm::FmDemod;
pub use self::linear::{LinearConfig, LinearDemod};

/// The active demodulator
pub enum Demodulator {
    /// AM envelope detection
    Am(AmDemod),
    /// FM with squelch and optional de-emphasis
    Fm(FmDemod),
    /// Linear modes: SSB, DSB, coherent AM, BPSK, raw I/Q
    Linear(Box<LinearDemod>),
}

impl Demodulator {
    /// Creates a freshly initialized demodulator for a mode
    ///
    /// `sample_rate` is the decimated (channel) sample rate in Hz.
    pub fn from_mode(entry: &ModeEntry, sample_rate: f32) -> Self {
        let agc = AgcSettings::default();
        match entry.demod {
            DemodKind::Am => Demodulator::Am(AmDemod::new(agc, sample_rate)),
            DemodKind::Fm => Demodulator::Fm(FmDemod::new(
                entry.options.flat,
                agc.headroom,
                sample_rate,
            )),
            DemodKind::Linear => Demodulator::Linear(Box::new(LinearDemod::new(
                LinearConfig::from_mode(entry),
                sample_rate,
            ))),
        }
    }

    /// Demodulates one channel block into an audio frame
    pub fn process_block(
        &mut self,
        block: ChannelBlock,
        tuning: &TuningState,
        telemetry: &TelemetryCell,
    ) -> AudioFrame {
        let ChannelBlock {
            time, mut samples, ..
        } = block;
        let samples = match self {
            Demodulator::Am(demod) => demod.process_block(&samples, telemetry),
            Demodulator::Fm(demod) => {
                demod.process_block(&samples, tuning.low, tuning.high, telemetry)
            }
            Demodulator::Linear(demod) => demod.process_block(&mut samples, telemetry),
        };
        AudioFrame { time, samples }
    }

    /// Returns true if this demodulator produces stereo audio
    pub fn stereo(&self) -> bool {
        match self {
            Demodulator::Linear(demod) => demod.stereo(),
            _ => false,
        }
    }
}

/// Keeps a demodulator matched to the mode table, replacing it when the mode
/// index changes
pub struct DemodSelector {
    current: Demodulator,
    mode_index: usize,
}

impl DemodSelector {
    /// Creates a selector starting in the given mode
    pub fn new(entry: &ModeEntry, mode_index: usize, sample_rate: f32) -> Self {
        DemodSelector {
            current: Demodulator::from_mode(entry, sample_rate),
            mode_index,
        }
    }

    /// Returns the demodulator for a block, reinitializing it first if the
    /// block was filtered for a different mode
    pub fn for_block(
        &mut self,
        block_mode: usize,
        modes: &[ModeEntry],
        sample_rate: f32,
    ) -> &mut Demodulator {
        if block_mode != self.mode_index && block_mode < modes.len() {
            info!(
                "switching demodulator to mode {} ({})",
                block_mode, modes[block_mode].name
            );
            self.current = Demodulator::from_mode(&modes[block_mode], sample_rate);
            self.mode_index = block_mode;
        }
        &mut self.current
    }
}
