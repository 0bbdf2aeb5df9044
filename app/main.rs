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
//! This binary receives a multicast I/Q stream, demodulates one channel, and
//! multicasts the audio as PCM and Opus RTP streams.
//!

#![warn(
    bad_style,
    dead_code,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2018_idioms
)]
#![warn(clippy::all)]

mod setup;

use std::error::Error;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::info;
use signal_hook::{flag::register, SIGHUP, SIGINT, SIGTERM};
use simplelog::{Config as LogConfig, SimpleLogger, TermLogger, TerminalMode};

use mcast_radio::control::run_control_socket;
use mcast_radio::telemetry::TelemetryCell;
use mcast_radio::ReceiverSetup;

use self::setup::Setup;

fn run() -> Result<(), Box<dyn Error>> {
    let config = mcast_radio_config::config_from_command_line()?;
    // Logging
    let log_status = TermLogger::init(
        config.ui.log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
    )
    .or_else(|_| SimpleLogger::init(config.ui.log_level, LogConfig::default()));
    if let Err(e) = log_status {
        eprintln!("Failed to set up logger: {}", e);
    }

    let setup = Setup::from_config(&config)?;
    let engine = setup.settings;
    info!(
        "A/D sample rate {}, D/A sample rate {}, decimation ratio {}",
        engine.sample_rate,
        engine.channel_rate(),
        engine.decimate
    );
    info!(
        "block size {} samples ({:.1} ms), impulse response {} samples, bin size {:.1} Hz",
        engine.block_size,
        1000.0 * engine.block_size as f64 / engine.sample_rate,
        engine.impulse_length,
        engine.sample_rate / (engine.block_size + engine.impulse_length - 1) as f64
    );

    // SIGINT, SIGTERM or SIGHUP stops every stage at the next block boundary
    let stop = Arc::new(AtomicBool::new(false));
    register(SIGINT, Arc::clone(&stop))?;
    register(SIGTERM, Arc::clone(&stop))?;
    register(SIGHUP, Arc::clone(&stop))?;

    let telemetry = Arc::new(TelemetryCell::new());

    // Control channel on its own thread
    let control_thread = {
        let control = Arc::clone(&setup.control);
        let telemetry = Arc::clone(&telemetry);
        let stop = Arc::clone(&stop);
        let socket = setup.control_socket.try_clone()?;
        let sample_rate = engine.sample_rate;
        thread::Builder::new()
            .name("control".to_owned())
            .spawn(move || run_control_socket(socket, &control, &telemetry, sample_rate, &stop))?
    };

    let report = mcast_radio::run(ReceiverSetup {
        source: setup.source,
        settings: engine,
        control: setup.control,
        telemetry,
        stop: Arc::clone(&stop),
        outputs: setup.outputs,
        ssrc: setup.ssrc,
    })?;

    // Shut the control thread down too
    stop.store(true, Ordering::Relaxed);
    match control_thread.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err("control thread panicked".into()),
    }

    info!(
        "processed {} packets ({} samples) into {} blocks; {} sequence gaps, {} reordered",
        report.packets, report.samples, report.blocks, report.skips, report.delayed
    );
    for (name, stats) in [
        ("pcm mono", report.pcm_mono),
        ("pcm stereo", report.pcm_stereo),
        ("opus", report.opus),
    ]
    .iter()
    {
        if let Some(stats) = stats {
            info!(
                "{}: {} packets, {:.0} bit/s",
                name, stats.packets, stats.bitrate
            );
        }
    }
    Ok(())
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{}", e);
            process::exit(-1);
        }
    }
}
