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
//! Runtime control of tuning, mode, and filter shape
//!
//! The control plane mutates a staging record under a lock and publishes by
//! bumping a generation counter. The DSP stages compare the generation
//! against the last one they saw, only between blocks, so every change takes
//! effect exactly at a block boundary.
//!

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use crate::modes::ModeEntry;
use crate::telemetry::TelemetryCell;

/// Size in bytes of a binary command record
pub const COMMAND_LENGTH: usize = 40;

/// Command code: reply with a status report
const CMD_SEND_STATUS: u32 = 0;
/// Command code: update tuning state
const CMD_SET_STATE: u32 = 1;

/// The tuning state read by the DSP stages at block boundaries
#[derive(Debug, Clone)]
pub struct TuningState {
    /// Front end first LO frequency in Hz (informational; the front end is
    /// tuned out of band)
    pub first_lo: f64,
    /// Second LO frequency in Hz; the intake mixer spins the spectrum by
    /// -second_lo to bring the channel to baseband
    pub second_lo: f64,
    /// Second LO frequency sweep rate in Hz per second
    pub second_lo_rate: f64,
    /// Oscillator calibration offset as a fraction (parsed and stored, not
    /// applied)
    pub calibrate: f64,
    /// Index of the active mode in the mode table
    pub mode_index: usize,
    /// Lower channel filter cutoff in Hz
    pub low: f32,
    /// Upper channel filter cutoff in Hz
    pub high: f32,
    /// Kaiser window shape parameter for the channel filter
    pub kaiser_beta: f32,
}

/// Shared control state: a staging record plus a publication generation
/// counter
pub struct ControlState {
    modes: Arc<Vec<ModeEntry>>,
    staging: Mutex<TuningState>,
    generation: AtomicU64,
}

impl ControlState {
    /// Creates control state starting in the given mode
    ///
    /// Panics if the mode table is empty or the start index is out of range.
    pub fn new(
        modes: Arc<Vec<ModeEntry>>,
        start_mode: usize,
        second_lo: f64,
        kaiser_beta: f32,
    ) -> Self {
        let entry = &modes[start_mode];
        let staging = TuningState {
            first_lo: 0.0,
            second_lo,
            second_lo_rate: 0.0,
            calibrate: 0.0,
            mode_index: start_mode,
            low: entry.low,
            high: entry.high,
            kaiser_beta,
        };
        ControlState {
            modes,
            staging: Mutex::new(staging),
            generation: AtomicU64::new(1),
        }
    }

    /// Returns the mode table
    pub fn modes(&self) -> &Arc<Vec<ModeEntry>> {
        &self.modes
    }

    /// Returns the current generation and a copy of the tuning state
    pub fn read(&self) -> (u64, TuningState) {
        let staging = self.staging.lock().expect("control lock poisoned");
        (self.generation.load(Ordering::Acquire), staging.clone())
    }

    /// Returns the tuning state if it has been republished since
    /// `last_generation`, updating `last_generation`
    pub fn read_if_changed(&self, last_generation: &mut u64) -> Option<TuningState> {
        if self.generation.load(Ordering::Acquire) == *last_generation {
            return None;
        }
        let (generation, state) = self.read();
        *last_generation = generation;
        Some(state)
    }

    fn publish<F>(&self, mutate: F)
    where
        F: FnOnce(&mut TuningState),
    {
        let mut staging = self.staging.lock().expect("control lock poisoned");
        mutate(&mut staging);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Selects a mode by table index, resetting the filter cutoffs to the
    /// mode's table values
    ///
    /// An out-of-range index is ignored.
    pub fn set_mode(&self, mode_index: usize) {
        if mode_index >= self.modes.len() {
            return;
        }
        let entry = &self.modes[mode_index];
        self.publish(|staging| {
            staging.mode_index = mode_index;
            staging.low = entry.low;
            staging.high = entry.high;
        });
    }

    /// Retunes the second LO
    pub fn set_second_lo(&self, frequency: f64, rate: f64) {
        self.publish(|staging| {
            staging.second_lo = frequency;
            staging.second_lo_rate = rate;
        });
    }

    /// Adjusts the channel filter passband without changing modes
    ///
    /// Takes effect at the next block boundary; the filter's overlap-save
    /// history is preserved across the change.
    pub fn set_filter(&self, low: f32, high: f32, kaiser_beta: f32) {
        self.publish(|staging| {
            staging.low = low;
            staging.high = high;
            staging.kaiser_beta = kaiser_beta;
        });
    }

    /// Applies a SetState command, ignoring any out-of-range field
    pub fn apply_command(&self, command: &StateCommand, sample_rate: f64) {
        let modes = &self.modes;
        self.publish(|staging| {
            if command.first_lo > 0.0 && command.first_lo < 2e9 {
                staging.first_lo = command.first_lo;
            }
            if command.second_lo.abs() <= sample_rate / 2.0 {
                staging.second_lo = command.second_lo;
            }
            if command.second_lo_rate.abs() < 1e9 {
                staging.second_lo_rate = command.second_lo_rate;
            }
            if command.calibrate.abs() < 1.0 {
                staging.calibrate = command.calibrate;
            }
            // Mode 0 leaves the mode unchanged; selecting a mode resets the
            // filter cutoffs to the mode's table values
            if command.mode > 0 && (command.mode as usize) <= modes.len() {
                let index = command.mode as usize - 1;
                staging.mode_index = index;
                staging.low = modes[index].low;
                staging.high = modes[index].high;
            }
        });
    }
}

/// A binary control command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Request a status report
    SendStatus,
    /// Update tuning state
    SetState(StateCommand),
}

/// Payload of a SetState command
#[derive(Debug, Clone, PartialEq)]
pub struct StateCommand {
    /// First LO frequency in Hz; out of (0, 2 GHz) means no change
    pub first_lo: f64,
    /// Second LO frequency in Hz; outside +-sample_rate/2 means no change
    pub second_lo: f64,
    /// Second LO sweep rate in Hz/s
    pub second_lo_rate: f64,
    /// 1-based mode table index; 0 means no change
    pub mode: u32,
    /// Oscillator calibration offset
    pub calibrate: f64,
}

/// Parses a binary command record
///
/// Returns None for short datagrams and unknown command codes, which are
/// silently ignored per the control protocol.
pub fn parse_command(bytes: &[u8]) -> Option<Command> {
    if bytes.len() < COMMAND_LENGTH {
        return None;
    }
    let code = LittleEndian::read_u32(&bytes[0..4]);
    match code {
        CMD_SEND_STATUS => Some(Command::SendStatus),
        CMD_SET_STATE => Some(Command::SetState(StateCommand {
            first_lo: LittleEndian::read_f64(&bytes[4..12]),
            second_lo: LittleEndian::read_f64(&bytes[12..20]),
            second_lo_rate: LittleEndian::read_f64(&bytes[20..28]),
            mode: LittleEndian::read_u32(&bytes[28..32]),
            calibrate: LittleEndian::read_f64(&bytes[32..40]),
        })),
        _ => None,
    }
}

/// Size in bytes of a status report datagram
pub const STATUS_LENGTH: usize = 40;

/// Encodes a status snapshot for a SendStatus reply
pub fn encode_status(control: &ControlState, telemetry: &TelemetryCell) -> [u8; STATUS_LENGTH] {
    let (_, tuning) = control.read();
    let measurements = telemetry.snapshot();
    let mut buffer = [0u8; STATUS_LENGTH];
    LittleEndian::write_f64(&mut buffer[0..8], measurements.first_lo);
    LittleEndian::write_f64(&mut buffer[8..16], tuning.second_lo);
    LittleEndian::write_u32(&mut buffer[16..20], tuning.mode_index as u32 + 1);
    LittleEndian::write_f32(&mut buffer[20..24], measurements.snr);
    LittleEndian::write_f32(&mut buffer[24..28], measurements.foffset);
    LittleEndian::write_f32(&mut buffer[28..32], measurements.bb_power);
    LittleEndian::write_f32(&mut buffer[32..36], measurements.output_level);
    LittleEndian::write_u32(
        &mut buffer[36..40],
        u32::from(measurements.pll_lock),
    );
    buffer
}

/// Serves the control socket until the stop flag is set
///
/// In-range SetState fields take effect at the next block boundary;
/// SendStatus replies to the sender with a status snapshot.
pub fn run_control_socket(
    socket: UdpSocket,
    control: &ControlState,
    telemetry: &TelemetryCell,
    sample_rate: f64,
    stop: &AtomicBool,
) -> io::Result<()> {
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    let mut buffer = [0u8; 1500];
    while !stop.load(Ordering::Relaxed) {
        let (length, sender) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e),
        };
        match parse_command(&buffer[..length]) {
            Some(Command::SetState(command)) => {
                debug!("control: set state {:?}", command);
                control.apply_command(&command, sample_rate);
            }
            Some(Command::SendStatus) => {
                let status = encode_status(control, telemetry);
                if let Err(e) = socket.send_to(&status, sender) {
                    warn!("control: status reply to {} failed: {}", sender, e);
                }
            }
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::modes::{DemodKind, ModeOptions};

    fn test_modes() -> Arc<Vec<ModeEntry>> {
        Arc::new(vec![
            ModeEntry {
                name: "fm".to_owned(),
                demod: DemodKind::Fm,
                low: -8000.0,
                high: 8000.0,
                shift: 0.0,
                options: ModeOptions::default(),
            },
            ModeEntry {
                name: "usb".to_owned(),
                demod: DemodKind::Linear,
                low: 300.0,
                high: 3000.0,
                shift: 0.0,
                options: ModeOptions::default(),
            },
        ])
    }

    #[test]
    fn command_round_trip() {
        let mut bytes = [0u8; COMMAND_LENGTH];
        LittleEndian::write_u32(&mut bytes[0..4], CMD_SET_STATE);
        LittleEndian::write_f64(&mut bytes[4..12], 147_000_000.0);
        LittleEndian::write_f64(&mut bytes[12..20], 48_000.0);
        LittleEndian::write_f64(&mut bytes[20..28], 0.0);
        LittleEndian::write_u32(&mut bytes[28..32], 2);
        LittleEndian::write_f64(&mut bytes[32..40], 0.0);

        match parse_command(&bytes) {
            Some(Command::SetState(command)) => {
                assert_eq!(command.first_lo, 147_000_000.0);
                assert_eq!(command.second_lo, 48_000.0);
                assert_eq!(command.mode, 2);
            }
            other => panic!("unexpected parse result {:?}", other),
        }
    }

    #[test]
    fn short_and_unknown_commands_ignored() {
        assert_eq!(parse_command(&[0u8; 10]), None);
        let mut bytes = [0u8; COMMAND_LENGTH];
        LittleEndian::write_u32(&mut bytes[0..4], 99);
        assert_eq!(parse_command(&bytes), None);
    }

    #[test]
    fn out_of_range_fields_ignored() {
        let control = ControlState::new(test_modes(), 0, -48_000.0, 3.0);
        let command = StateCommand {
            first_lo: -5.0,
            second_lo: 1e9,
            second_lo_rate: 2e9,
            mode: 17,
            calibrate: 3.0,
        };
        let (generation_before, before) = control.read();
        control.apply_command(&command, 192_000.0);
        let (generation_after, after) = control.read();
        // The publish still happened, but no field changed
        assert!(generation_after > generation_before);
        assert_eq!(after.second_lo, before.second_lo);
        assert_eq!(after.mode_index, before.mode_index);
        assert_eq!(after.calibrate, before.calibrate);
    }

    #[test]
    fn mode_change_resolves_cutoffs() {
        let control = ControlState::new(test_modes(), 0, -48_000.0, 3.0);
        let command = StateCommand {
            first_lo: 0.0,
            second_lo: 1e9,
            second_lo_rate: 0.0,
            mode: 2,
            calibrate: 0.0,
        };
        control.apply_command(&command, 192_000.0);
        let (_, state) = control.read();
        assert_eq!(state.mode_index, 1);
        assert_eq!(state.low, 300.0);
        assert_eq!(state.high, 3000.0);
    }

    #[test]
    fn generation_gates_rereads() {
        let control = ControlState::new(test_modes(), 0, -48_000.0, 3.0);
        let mut generation = 0;
        assert!(control.read_if_changed(&mut generation).is_some());
        assert!(control.read_if_changed(&mut generation).is_none());
        control.set_filter(-5000.0, 5000.0, 2.0);
        let state = control
            .read_if_changed(&mut generation)
            .expect("change not visible");
        assert_eq!(state.low, -5000.0);
        assert!(control.read_if_changed(&mut generation).is_none());
    }
}
