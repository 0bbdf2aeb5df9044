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

//! Reception modes: a named demodulator with filter cutoffs and options

/// Which demodulator a mode runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemodKind {
    /// Envelope detection of AM
    Am,
    /// NBFM and noncoherent PM
    Fm,
    /// Coherent demodulation of SSB, DSB, AM and BPSK
    Linear,
}

/// Option flags from the mode table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeOptions {
    /// Flat FM audio, no de-emphasis
    pub flat: bool,
    /// Enable the carrier-tracking PLL
    pub coherent: bool,
    /// Square samples before carrier search and phase detection, for DSB
    /// and BPSK
    pub square: bool,
    /// Independent sideband via a cross-conjugate filter, stereo output
    pub conj: bool,
    /// Envelope output from the linear demodulator
    pub envelope: bool,
    /// Calibration mode; implies coherent carrier tracking
    pub calibrate: bool,
}

/// One entry of the mode table
#[derive(Debug, Clone, PartialEq)]
pub struct ModeEntry {
    /// Mode name as written in the modes file
    pub name: String,
    /// The demodulator this mode runs
    pub demod: DemodKind,
    /// Lower filter cutoff in Hz at the decimated rate, negative for the
    /// lower sideband
    pub low: f32,
    /// Upper filter cutoff in Hz at the decimated rate
    pub high: f32,
    /// Audio frequency shift in Hz applied at the demodulator output
    pub shift: f32,
    /// Option flags
    pub options: ModeOptions,
}
