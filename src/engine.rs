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
//! Top-level receiver engine
//!
//! Wires the four pipeline stages together with bounded channels, runs the
//! intake stage on the calling thread and the others on scoped worker
//! threads, and collects their counters into a single report.
//!

use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_utils::thread::{self, ScopedJoinHandle};

use crate::control::ControlState;
use crate::flow;
use crate::input::IqPacket;
use crate::output::opus::{AudioEncoder, OpusStream};
use crate::output::pcm::{MonoPcmStream, StereoPcmStream};
use crate::output::{PacketSink, StreamStats};
use crate::stages::audio_out::{
    run_mono_pcm_stage, run_opus_stage, run_stereo_pcm_stage, AudioStageReport,
};
use crate::stages::channelize::{run_channelize_stage, ChannelizeSetup};
use crate::stages::demodulate::{run_demodulate_stage, DemodulateSetup};
use crate::stages::intake::{run_intake_stage, IntakeSetup};
use crate::telemetry::TelemetryCell;

/// Default capacity of the stage-to-stage channels, in blocks
const DEFAULT_CHANNEL_CAPACITY: usize = 2;

/// Block geometry and rates of an engine
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Input samples per block (L)
    pub block_size: usize,
    /// Filter impulse response length (M)
    pub impulse_length: usize,
    /// Decimation ratio (D), the input to output sample rate ratio
    pub decimate: usize,
    /// Input sample rate in Hz
    pub sample_rate: f64,
    /// Capacity of the stage channels, in blocks
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            block_size: 4096,
            impulse_length: 4097,
            decimate: 4,
            sample_rate: 192_000.0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineSettings {
    /// Returns the decimated (audio) sample rate in Hz
    pub fn channel_rate(&self) -> f64 {
        self.sample_rate / self.decimate as f64
    }
}

/// The Opus output stream pieces
pub struct OpusOutput {
    /// Datagram destination
    pub sink: Box<dyn PacketSink + Send>,
    /// The frame encoder
    pub encoder: Box<dyn AudioEncoder + Send>,
    /// Samples per codec frame
    pub frame_samples: usize,
    /// Suppress frames the encoder compressed to 2 bytes or fewer
    pub dtx: bool,
}

/// Destinations for the audio streams; any stream may be disabled
#[derive(Default)]
pub struct AudioOutputs {
    /// Mono PCM destination
    pub pcm_mono: Option<Box<dyn PacketSink + Send>>,
    /// Stereo PCM destination
    pub pcm_stereo: Option<Box<dyn PacketSink + Send>>,
    /// Opus destination and encoder
    pub opus: Option<OpusOutput>,
}

/// Everything needed to run one receiver engine
pub struct ReceiverSetup<I> {
    /// Source of parsed I/Q packets
    pub source: I,
    /// Block geometry and rates
    pub settings: EngineSettings,
    /// Shared control state
    pub control: Arc<ControlState>,
    /// Shared measurements
    pub telemetry: Arc<TelemetryCell>,
    /// Set to stop every stage at the next block boundary
    pub stop: Arc<AtomicBool>,
    /// Audio stream destinations
    pub outputs: AudioOutputs,
    /// RTP synchronization source for the audio streams
    pub ssrc: u32,
}

/// Counters from a completed engine run
#[derive(Debug)]
pub struct Report {
    /// I/Q packets consumed
    pub packets: u64,
    /// I/Q samples consumed
    pub samples: u64,
    /// Input sequence gaps
    pub skips: u64,
    /// Out-of-order input packets dropped
    pub delayed: u64,
    /// Blocks channelized
    pub blocks: u64,
    /// Mono PCM stream counters, if that stream was enabled
    pub pcm_mono: Option<StreamStats>,
    /// Stereo PCM stream counters
    pub pcm_stereo: Option<StreamStats>,
    /// Opus stream counters
    pub opus: Option<StreamStats>,
    /// Wall-clock run time
    pub run_time: Duration,
    /// Threads used, including the caller's
    pub threads: usize,
}

/// Runs a receiver until its input ends or the stop flag is set
///
/// The intake stage runs on the calling thread; the channelizer, the
/// demodulator, and one thread per enabled audio stream are spawned in a
/// scope, so everything is joined before this returns.
pub fn run<I>(setup: ReceiverSetup<I>) -> Result<Report>
where
    I: IntoIterator<Item = Result<IqPacket>>,
{
    let ReceiverSetup {
        source,
        settings,
        control,
        telemetry,
        stop,
        outputs,
        ssrc,
    } = setup;

    let capacity = settings.channel_capacity.max(1);
    let channel_rate = settings.channel_rate();
    let start_time = Instant::now();
    let mut threads = 1usize;

    let (intake_tx, channelize_rx) = flow::bounded(capacity);
    let (channelize_tx, demodulate_rx) = flow::bounded(capacity);

    let mut mono_channel = outputs.pcm_mono.map(|sink| {
        let (tx, rx) = flow::bounded(capacity);
        (Some(tx), rx, sink)
    });
    let mut stereo_channel = outputs.pcm_stereo.map(|sink| {
        let (tx, rx) = flow::bounded(capacity);
        (Some(tx), rx, sink)
    });
    let mut opus_channel = outputs.opus.map(|opus| {
        let (tx, rx) = flow::bounded(capacity);
        (Some(tx), rx, opus)
    });

    let (intake_report, channelize_report, audio_reports) = thread::scope(|scope| {
        let channelize_setup = ChannelizeSetup {
            rx: channelize_rx,
            tx: channelize_tx,
            control: Arc::clone(&control),
            stop: Arc::clone(&stop),
            block_size: settings.block_size,
            impulse_length: settings.impulse_length,
            decimate: settings.decimate,
            channel_rate: channel_rate as f32,
        };
        let channelize_thread = scope
            .builder()
            .name("channelize".to_owned())
            .spawn(move |_| run_channelize_stage(channelize_setup))
            .expect("failed to spawn channelizer thread");
        threads += 1;

        let demodulate_setup = DemodulateSetup {
            rx: demodulate_rx,
            mono_pcm_tx: mono_channel.as_mut().and_then(|c| c.0.take()),
            stereo_pcm_tx: stereo_channel.as_mut().and_then(|c| c.0.take()),
            opus_tx: opus_channel.as_mut().and_then(|c| c.0.take()),
            control: Arc::clone(&control),
            telemetry: Arc::clone(&telemetry),
            stop: Arc::clone(&stop),
            channel_rate: channel_rate as f32,
        };
        let demodulate_thread = scope
            .builder()
            .name("demodulate".to_owned())
            .spawn(move |_| run_demodulate_stage(demodulate_setup))
            .expect("failed to spawn demodulator thread");
        threads += 1;

        let audio_rate = channel_rate as u32;
        let mono_thread: Option<ScopedJoinHandle<'_, AudioStageReport>> =
            mono_channel.map(|(_, rx, sink)| {
                threads += 1;
                let stream = MonoPcmStream::new(sink, ssrc, audio_rate);
                let stop = Arc::clone(&stop);
                scope
                    .builder()
                    .name("pcm-mono".to_owned())
                    .spawn(move |_| run_mono_pcm_stage(rx, stream, stop))
                    .expect("failed to spawn mono PCM thread")
            });
        let stereo_thread: Option<ScopedJoinHandle<'_, AudioStageReport>> =
            stereo_channel.map(|(_, rx, sink)| {
                threads += 1;
                let stream = StereoPcmStream::new(sink, ssrc, audio_rate);
                let stop = Arc::clone(&stop);
                scope
                    .builder()
                    .name("pcm-stereo".to_owned())
                    .spawn(move |_| run_stereo_pcm_stage(rx, stream, stop))
                    .expect("failed to spawn stereo PCM thread")
            });
        let opus_thread: Option<ScopedJoinHandle<'_, AudioStageReport>> =
            opus_channel.map(|(_, rx, opus)| {
                threads += 1;
                let stream = OpusStream::new(
                    opus.sink,
                    opus.encoder,
                    opus.frame_samples,
                    opus.dtx,
                    ssrc,
                    audio_rate,
                );
                let stop = Arc::clone(&stop);
                scope
                    .builder()
                    .name("opus".to_owned())
                    .spawn(move |_| run_opus_stage(rx, stream, stop))
                    .expect("failed to spawn opus thread")
            });

        // The intake runs right here; dropping its sender when it finishes
        // lets the downstream stages drain and exit
        let intake_setup = IntakeSetup {
            packets: source,
            block_size: settings.block_size,
            sample_rate: settings.sample_rate,
            control: Arc::clone(&control),
            telemetry: Arc::clone(&telemetry),
            stop: Arc::clone(&stop),
            tx: intake_tx,
        };
        let intake_report = run_intake_stage(intake_setup)?;

        let channelize_report = channelize_thread
            .join()
            .map_err(|_| panic_error("channelizer"))?;
        let demodulate_report = demodulate_thread
            .join()
            .map_err(|_| panic_error("demodulator"))?;
        debug!(
            "demodulator processed {} blocks, waited {:?}",
            demodulate_report.blocks,
            demodulate_report.receive_blocks.block_duration
        );

        let mut audio_reports: [Option<AudioStageReport>; 3] = [None, None, None];
        for (slot, handle) in audio_reports
            .iter_mut()
            .zip([mono_thread, stereo_thread, opus_thread])
        {
            if let Some(handle) = handle {
                *slot = Some(handle.join().map_err(|_| panic_error("audio"))?);
            }
        }

        Ok::<_, Error>((intake_report, channelize_report, audio_reports))
    })
    .expect("unjoined thread panic")?;

    let [mono_report, stereo_report, opus_report] = audio_reports;
    debug!(
        "intake blocked {:?} on the channelizer; channelizer blocked {:?} on the demodulator",
        intake_report.send_blocks.block_duration, channelize_report.send_blocks.block_duration
    );

    Ok(Report {
        packets: intake_report.packets,
        samples: intake_report.samples,
        skips: intake_report.skips,
        delayed: intake_report.delayed,
        blocks: channelize_report.blocks,
        pcm_mono: mono_report.map(|r| r.stats),
        pcm_stereo: stereo_report.map(|r| r.stats),
        opus: opus_report.map(|r| r.stats),
        run_time: start_time.elapsed(),
        threads,
    })
}

fn panic_error(stage: &str) -> Error {
    Error::new(ErrorKind::Other, format!("the {} thread panicked", stage))
}
