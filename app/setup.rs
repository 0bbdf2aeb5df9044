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
//! Converts a configuration into sockets, mode tables, and an engine setup
//!

use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;

use mcast_radio::control::ControlState;
use mcast_radio::input::udp::UdpSource;
use mcast_radio::modes::{DemodKind, ModeEntry, ModeOptions};
use mcast_radio::output::opus::frame_samples;
use mcast_radio::output::udp::UdpSink;
use mcast_radio::output::PacketSink;
use mcast_radio::{AudioOutputs, EngineSettings};
use mcast_radio_config::modes::{read_modes_file, DemodName, ModeLine, ModeOption};
use mcast_radio_config::Config;

/// Everything the application assembles before starting the engine
pub struct Setup {
    /// I/Q packets from the input multicast group
    pub source: UdpSource,
    /// Audio stream destinations
    pub outputs: AudioOutputs,
    /// The bound control socket
    pub control_socket: UdpSocket,
    /// Shared control state, preloaded with the start mode
    pub control: Arc<ControlState>,
    /// Engine geometry
    pub settings: EngineSettings,
    /// RTP synchronization source for the audio streams
    pub ssrc: u32,
}

impl Setup {
    /// Builds sockets and shared state from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self, Box<dyn Error>> {
        let modes = load_modes(config)?;
        let start_mode = modes
            .iter()
            .position(|mode| mode.name.eq_ignore_ascii_case(&config.start_mode))
            .unwrap_or_else(|| {
                warn!(
                    "start mode {:?} is not in the modes table; using {:?}",
                    config.start_mode, modes[0].name
                );
                0
            });

        // Input socket, joined to the I/Q multicast group
        let input_socket = UdpSocket::bind(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            config.input.port,
        ))?;
        input_socket.join_multicast_v4(&config.input.group, &Ipv4Addr::UNSPECIFIED)?;
        let source = UdpSource::new(input_socket)?;

        // One output socket shared by all audio streams
        let output_socket =
            UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
        output_socket.set_multicast_ttl_v4(config.outputs.ttl)?;
        type Sink = Option<Box<dyn PacketSink + Send>>;
        let sink_to = |group: Option<Ipv4Addr>| -> Result<Sink, Box<dyn Error>> {
            match group {
                Some(group) => {
                    let destination =
                        SocketAddr::from(SocketAddrV4::new(group, config.outputs.port));
                    let socket = output_socket.try_clone()?;
                    Ok(Some(Box::new(UdpSink::new(socket, destination))))
                }
                None => Ok(None),
            }
        };
        let outputs = AudioOutputs {
            pcm_mono: sink_to(config.outputs.pcm_mono_group)?,
            pcm_stereo: sink_to(config.outputs.pcm_stereo_group)?,
            opus: opus_output(config, &output_socket)?,
        };

        let control_socket = UdpSocket::bind(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            config.control.port,
        ))?;

        let control = Arc::new(ControlState::new(
            Arc::new(modes),
            start_mode,
            config.input.second_if,
            config.engine.kaiser_beta,
        ));

        let settings = EngineSettings {
            block_size: config.engine.block_size,
            impulse_length: config.engine.impulse_length,
            decimate: config.engine.decimate(),
            sample_rate: config.engine.sample_rate,
            channel_capacity: config.engine.channel_capacity,
        };

        let ssrc = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(1);

        Ok(Setup {
            source,
            outputs,
            control_socket,
            control,
            settings,
            ssrc,
        })
    }
}

/// Loads the modes table, refusing to start without at least one valid mode
fn load_modes(config: &Config) -> Result<Vec<ModeEntry>, Box<dyn Error>> {
    let lines = read_modes_file(&config.modes_file).map_err(|e| {
        format!(
            "can't read mode table {}: {}",
            config.modes_file.display(),
            e
        )
    })?;
    if lines.is_empty() {
        return Err(format!(
            "mode table {} contains no usable modes",
            config.modes_file.display()
        )
        .into());
    }
    Ok(lines.iter().map(mode_entry).collect())
}

fn mode_entry(line: &ModeLine) -> ModeEntry {
    let mut options = ModeOptions::default();
    for option in &line.options {
        match option {
            ModeOption::Conj => options.conj = true,
            ModeOption::Flat => options.flat = true,
            ModeOption::Cal => options.calibrate = true,
            ModeOption::Square => options.square = true,
            ModeOption::Coherent => options.coherent = true,
            ModeOption::Envelope => options.envelope = true,
        }
    }
    ModeEntry {
        name: line.name.clone(),
        demod: match line.demod {
            DemodName::Fm => DemodKind::Fm,
            DemodName::Am => DemodKind::Am,
            DemodName::Linear => DemodKind::Linear,
        },
        low: line.low,
        high: line.high,
        shift: line.shift,
        options,
    }
}

/// Assembles the Opus output, if it is enabled and this build carries the
/// encoder
fn opus_output(
    config: &Config,
    output_socket: &UdpSocket,
) -> Result<Option<mcast_radio::OpusOutput>, Box<dyn Error>> {
    let group = match config.outputs.opus_group {
        Some(group) if config.opus.bitrate > 0 => group,
        _ => return Ok(None),
    };
    let audio_rate = config.engine.audio_rate as u32;
    let frame_samples = frame_samples(config.opus.block_ms, audio_rate).ok_or_else(|| {
        format!(
            "opus block time must be 2.5/5/10/20/40/60/80/100/120 ms, not {}",
            config.opus.block_ms
        )
    })?;
    build_opus_output(config, output_socket, group, frame_samples)
}

#[cfg(feature = "opus")]
fn build_opus_output(
    config: &Config,
    output_socket: &UdpSocket,
    group: Ipv4Addr,
    frame_samples: usize,
) -> Result<Option<mcast_radio::OpusOutput>, Box<dyn Error>> {
    use log::info;
    use mcast_radio::output::opus::OpusEncoder;

    let destination = SocketAddr::from(SocketAddrV4::new(group, config.outputs.port));
    let socket = output_socket.try_clone()?;
    let encoder = OpusEncoder::new(config.engine.audio_rate as u32, config.opus.bitrate)?;
    info!(
        "opus stream to {} at {} bit/s, {} ms frames",
        destination, config.opus.bitrate, config.opus.block_ms
    );
    Ok(Some(mcast_radio::OpusOutput {
        sink: Box::new(UdpSink::new(socket, destination)),
        encoder: Box::new(encoder),
        frame_samples,
        dtx: config.opus.dtx,
    }))
}

#[cfg(not(feature = "opus"))]
fn build_opus_output(
    _config: &Config,
    _output_socket: &UdpSocket,
    _group: Ipv4Addr,
    _frame_samples: usize,
) -> Result<Option<mcast_radio::OpusOutput>, Box<dyn Error>> {
    warn!("this build does not include the opus encoder; opus stream disabled");
    Ok(None)
}
