/*
 * Copyright 2020 The Regents of the University of California
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
//! Receiver configuration: a TOML file, command-line overrides, and the
//! modes table
//!

extern crate clap;
extern crate log;
extern crate serde;
extern crate toml;

mod cli;
pub mod modes;

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;

pub use crate::cli::config_from_command_line;

/// A configuration file for mcast_radio
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Config {
    /// Where the I/Q sample stream comes from
    pub input: Input,
    /// Where the audio streams go
    pub outputs: Outputs,
    /// Block geometry and sample rates
    pub engine: Engine,
    /// Opus stream settings
    pub opus: Opus,
    /// Control channel settings
    pub control: Control,
    /// User interface settings
    pub ui: UserInterface,
    /// Path of the modes table file
    pub modes_file: PathBuf,
    /// Name of the mode to start in
    pub start_mode: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input: Input::default(),
            outputs: Outputs::default(),
            engine: Engine::default(),
            opus: Opus::default(),
            control: Control::default(),
            ui: UserInterface::default(),
            modes_file: PathBuf::from("modes.txt"),
            start_mode: "fm".to_owned(),
        }
    }
}

/// The I/Q multicast source
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Input {
    /// Multicast group carrying the I/Q stream
    pub group: Ipv4Addr,
    /// UDP port
    pub port: u16,
    /// Second LO frequency in Hz: where the desired channel sits in the
    /// wideband input
    pub second_if: f64,
}

impl Default for Input {
    fn default() -> Self {
        Input {
            group: Ipv4Addr::new(239, 1, 2, 3),
            port: 5004,
            second_if: 48_000.0,
        }
    }
}

/// The audio multicast destinations
///
/// All streams share one socket, port and TTL; an empty group disables a
/// stream.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Outputs {
    /// Mono PCM multicast group, or None to disable
    pub pcm_mono_group: Option<Ipv4Addr>,
    /// Stereo PCM multicast group, or None to disable
    pub pcm_stereo_group: Option<Ipv4Addr>,
    /// Opus multicast group, or None to disable
    pub opus_group: Option<Ipv4Addr>,
    /// UDP destination port shared by all streams
    pub port: u16,
    /// Multicast TTL
    pub ttl: u32,
}

impl Default for Outputs {
    fn default() -> Self {
        Outputs {
            pcm_mono_group: Some(Ipv4Addr::new(239, 1, 2, 5)),
            pcm_stereo_group: Some(Ipv4Addr::new(239, 1, 2, 5)),
            opus_group: Some(Ipv4Addr::new(239, 1, 2, 6)),
            port: 5004,
            ttl: 2,
        }
    }
}

/// Block geometry and sample rates
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Engine {
    /// Input samples per block
    pub block_size: usize,
    /// Filter impulse response length
    pub impulse_length: usize,
    /// Input (A/D) sample rate in Hz
    pub sample_rate: f64,
    /// Audio (D/A) sample rate in Hz; the decimation ratio is the quotient
    pub audio_rate: f64,
    /// Kaiser window shape parameter
    pub kaiser_beta: f32,
    /// Stage channel capacity in blocks
    pub channel_capacity: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Engine {
            block_size: 4096,
            impulse_length: 4097,
            sample_rate: 192_000.0,
            audio_rate: 48_000.0,
            kaiser_beta: 3.0,
            channel_capacity: 2,
        }
    }
}

impl Engine {
    /// Returns the integer decimation ratio
    pub fn decimate(&self) -> usize {
        (self.sample_rate / self.audio_rate).round() as usize
    }
}

/// Opus stream settings
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Opus {
    /// Bitrate in bits per second; 0 disables the Opus stream
    pub bitrate: i32,
    /// Frame duration in milliseconds
    pub block_ms: f32,
    /// Discontinuous transmission
    pub dtx: bool,
}

impl Default for Opus {
    fn default() -> Self {
        Opus {
            bitrate: 32_000,
            block_ms: 20.0,
            dtx: false,
        }
    }
}

/// Control channel settings
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct Control {
    /// UDP port the control socket listens on
    pub port: u16,
}

impl Default for Control {
    fn default() -> Self {
        Control { port: 4159 }
    }
}

/// User interface options
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(test, derive(PartialEq))]
#[serde(default)]
pub struct UserInterface {
    /// Minimum log level to print
    pub log_level: LevelFilter,
}

impl Default for UserInterface {
    fn default() -> Self {
        UserInterface {
            log_level: LevelFilter::Info,
        }
    }
}

impl Config {
    /// Checks cross-field constraints that serde cannot express
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let engine = &self.engine;
        if engine.audio_rate <= 0.0 || engine.sample_rate <= 0.0 {
            return Err("sample rates must be positive".to_owned());
        }
        if (engine.sample_rate % engine.audio_rate).abs() > f64::EPSILON {
            return Err(format!(
                "A/D rate {} is not an integer multiple of D/A rate {}",
                engine.sample_rate, engine.audio_rate
            ));
        }
        if engine.block_size % engine.decimate() != 0 {
            return Err(format!(
                "block size {} is not divisible by the decimation ratio {}",
                engine.block_size,
                engine.decimate()
            ));
        }
        if engine.impulse_length < 2 {
            return Err("impulse length must be at least 2".to_owned());
        }
        if self.start_mode.is_empty() {
            return Err("a start mode is required".to_owned());
        }
        Ok(())
    }
}
