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
//! Configuration from command-line arguments
//!

use std::error::Error;
use std::ffi::OsStr;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{crate_authors, crate_name, crate_version, App, Arg, ArgMatches};
use log::LevelFilter;

use crate::Config;

const ABOUT: &str = "This program receives a wideband I/Q sample stream from a multicast group, \
demodulates one channel, and multicasts the audio as PCM and Opus RTP streams. Command-line \
arguments cover the common options; a configuration file can set everything else.";

/// Reads command-line options and either reads a configuration from a file or
/// builds one from the defaults plus any command-line overrides
///
/// This function returns an error if the configuration file could not be read
/// or parsed, or if the resulting configuration is inconsistent. It causes
/// the process to exit if a command-line argument is invalid, or if `--help`
/// or `--version` is passed.
pub fn config_from_command_line() -> Result<Config, Box<dyn Error>> {
    let matches = build_app().get_matches();

    let mut config = if let Some(path) = matches.value_of_os("config_file") {
        read_config_file(path)?
    } else {
        Config::default()
    };
    apply_overrides(&mut config, &matches);
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &OsStr) -> Result<Config, Box<dyn Error>> {
    let text = fs::read_to_string(path)?;
    let config = toml::from_str(&text)?;
    Ok(config)
}

fn apply_overrides(config: &mut Config, matches: &ArgMatches<'_>) {
    if let Some(group) = matches.value_of("iq_address") {
        config.input.group = group.parse().expect("validated address");
    }
    if let Some(frequency) = matches.value_of("second_if") {
        config.input.second_if = frequency.parse().expect("validated frequency");
    }
    if let Some(group) = matches.value_of("pcm_address") {
        let group: Ipv4Addr = group.parse().expect("validated address");
        config.outputs.pcm_mono_group = Some(group);
        config.outputs.pcm_stereo_group = Some(group);
    }
    if let Some(group) = matches.value_of("opus_address") {
        config.outputs.opus_group = Some(group.parse().expect("validated address"));
    }
    if let Some(size) = matches.value_of("block_size") {
        config.engine.block_size = size.parse().expect("validated size");
    }
    if let Some(length) = matches.value_of("impulse_length") {
        config.engine.impulse_length = length.parse().expect("validated length");
    }
    if let Some(beta) = matches.value_of("kaiser_beta") {
        config.engine.kaiser_beta = beta.parse().expect("validated beta");
    }
    if let Some(bitrate) = matches.value_of("opus_bitrate") {
        config.opus.bitrate = bitrate.parse().expect("validated bitrate");
    }
    if let Some(block_ms) = matches.value_of("opus_block_ms") {
        config.opus.block_ms = block_ms.parse().expect("validated duration");
    }
    if let Some(port) = matches.value_of("control_port") {
        config.control.port = port.parse().expect("validated port");
    }
    if let Some(mode) = matches.value_of("mode") {
        config.start_mode = mode.to_owned();
    }
    if let Some(path) = matches.value_of_os("modes_file") {
        config.modes_file = PathBuf::from(path);
    }
    if let Some(level) = matches.value_of("log_level") {
        config.ui.log_level = level.parse().expect("validated level");
    }
}

/// Creates and returns an App with command-line arguments
fn build_app() -> App<'static, 'static> {
    App::new(crate_name!())
        .version(crate_version!())
        .about(ABOUT)
        .author(crate_authors!())
        .arg(
            Arg::with_name("config_file")
                .long("config-file")
                .short("c")
                .takes_value(true)
                .value_name("path")
                .help(
                    "The path to a configuration file to read. Command-line \
                     arguments override values from the file.",
                ),
        )
        .arg(
            Arg::with_name("iq_address")
                .long("iq-address")
                .short("I")
                .takes_value(true)
                .value_name("group")
                .validator(validate::<Ipv4Addr>)
                .help("The multicast group carrying the I/Q sample stream"),
        )
        .arg(
            Arg::with_name("second_if")
                .long("second-if")
                .short("i")
                .takes_value(true)
                .value_name("hertz")
                .validator(validate::<f64>)
                .help(
                    "Where the desired channel sits in the wideband input, \
                     in Hz relative to its center",
                ),
        )
        .arg(
            Arg::with_name("pcm_address")
                .long("pcm-address")
                .short("P")
                .takes_value(true)
                .value_name("group")
                .validator(validate::<Ipv4Addr>)
                .help("The multicast group for both linear PCM audio streams"),
        )
        .arg(
            Arg::with_name("opus_address")
                .long("opus-address")
                .short("O")
                .takes_value(true)
                .value_name("group")
                .validator(validate::<Ipv4Addr>)
                .help("The multicast group for the Opus audio stream"),
        )
        .arg(
            Arg::with_name("block_size")
                .long("block-size")
                .short("L")
                .takes_value(true)
                .value_name("samples")
                .validator(validate::<usize>)
                .help("Input samples per processing block"),
        )
        .arg(
            Arg::with_name("impulse_length")
                .long("impulse-length")
                .short("M")
                .takes_value(true)
                .value_name("samples")
                .validator(validate::<usize>)
                .help("Filter impulse response length in samples"),
        )
        .arg(
            Arg::with_name("kaiser_beta")
                .long("kaiser-beta")
                .short("k")
                .takes_value(true)
                .value_name("beta")
                .validator(validate::<f32>)
                .help("Kaiser window shape parameter for the channel filter"),
        )
        .arg(
            Arg::with_name("opus_bitrate")
                .long("opus-bitrate")
                .short("r")
                .takes_value(true)
                .value_name("bits_per_second")
                .validator(validate::<i32>)
                .help("Opus bitrate; 0 disables the Opus stream"),
        )
        .arg(
            Arg::with_name("opus_block_ms")
                .long("opus-block-ms")
                .short("B")
                .takes_value(true)
                .value_name("milliseconds")
                .validator(validate::<f32>)
                .help("Opus frame duration (2.5/5/10/20/40/60/80/100/120)"),
        )
        .arg(
            Arg::with_name("control_port")
                .long("control-port")
                .short("p")
                .takes_value(true)
                .value_name("port")
                .validator(validate::<u16>)
                .help("UDP port to listen on for control commands"),
        )
        .arg(
            Arg::with_name("mode")
                .long("mode")
                .short("m")
                .takes_value(true)
                .value_name("name")
                .help("Name of the mode to start in, from the modes file"),
        )
        .arg(
            Arg::with_name("modes_file")
                .long("modes-file")
                .takes_value(true)
                .value_name("path")
                .help("The path of the modes table file"),
        )
        .arg(
            Arg::with_name("log_level")
                .long("log-level")
                .takes_value(true)
                .value_name("level")
                .validator(validate::<LevelFilter>)
                .help("Minimum log level to print (off/error/warn/info/debug/trace)"),
        )
}

/// Validates that a string can be parsed into T
fn validate<T>(value: String) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map(drop)
        .map_err(|e| format!("{}", e))
}
