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

//! The demodulator stage
//!
//! Runs exactly one demodulator at a time, replacing its state when a block
//! arrives that the channelizer filtered for a different mode. Audio frames
//! fan out to the packetizer stages; a packetizer that has exited only loses
//! its own stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;

use crate::block::{AudioFrame, AudioSamples, ChannelBlock};
use crate::control::ControlState;
use crate::demod::DemodSelector;
use crate::flow::{BlockReceiver, BlockSender, FlowLogs};
use crate::telemetry::TelemetryCell;

use super::STOP_POLL_INTERVAL;

/// Setup for the demodulator stage
pub struct DemodulateSetup {
    /// Channelized blocks from the channelizer
    pub rx: BlockReceiver<ChannelBlock>,
    /// Mono audio to the mono PCM packetizer
    pub mono_pcm_tx: Option<BlockSender<AudioFrame>>,
    /// Stereo audio to the stereo PCM packetizer
    pub stereo_pcm_tx: Option<BlockSender<AudioFrame>>,
    /// All audio to the Opus packetizer
    pub opus_tx: Option<BlockSender<AudioFrame>>,
    /// Shared control state, re-read at block boundaries
    pub control: Arc<ControlState>,
    /// Shared measurements
    pub telemetry: Arc<TelemetryCell>,
    /// Set to stop the stage
    pub stop: Arc<AtomicBool>,
    /// Decimated sample rate in Hz
    pub channel_rate: f32,
}

/// Counters from a completed demodulator stage
#[derive(Debug, Default)]
pub struct DemodulateReport {
    /// Blocks demodulated
    pub blocks: u64,
    /// Waits on the channelizer
    pub receive_blocks: FlowLogs,
}

/// Runs the demodulator stage until the input ends or the stop flag is set
pub fn run_demodulate_stage(setup: DemodulateSetup) -> DemodulateReport {
    let DemodulateSetup {
        rx,
        mut mono_pcm_tx,
        mut stereo_pcm_tx,
        mut opus_tx,
        control,
        telemetry,
        stop,
        channel_rate,
    } = setup;

    let mut report = DemodulateReport::default();
    let (mut generation, mut tuning) = control.read();
    let modes = Arc::clone(control.modes());
    let mut selector = DemodSelector::new(
        &modes[tuning.mode_index],
        tuning.mode_index,
        channel_rate,
    );

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let block = match rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(new_tuning) = control.read_if_changed(&mut generation) {
            tuning = new_tuning;
        }

        // The demodulator follows the mode the block was filtered for, so a
        // mode change never mixes old filtering with new demodulation
        let demod = selector.for_block(block.mode_index, &modes, channel_rate);
        let frame = demod.process_block(block, &tuning, &telemetry);
        report.blocks += 1;

        match &frame.samples {
            AudioSamples::Mono(_) => {
                send_or_disable(&mut mono_pcm_tx, &frame, "mono PCM");
            }
            AudioSamples::Stereo(_) => {
                send_or_disable(&mut stereo_pcm_tx, &frame, "stereo PCM");
            }
        }
        send_or_disable(&mut opus_tx, &frame, "opus");
        if mono_pcm_tx.is_none() && stereo_pcm_tx.is_none() && opus_tx.is_none() {
            // Every audio stream is gone
            break;
        }
    }

    report.receive_blocks = rx.logs();
    report
}

/// Sends a frame to a packetizer, disabling the stream if it has exited
fn send_or_disable(
    tx: &mut Option<BlockSender<AudioFrame>>,
    frame: &AudioFrame,
    name: &str,
) {
    if let Some(sender) = tx {
        if sender.send(frame.clone()).is_err() {
            warn!("{} stream exited; dropping its audio", name);
            *tx = None;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::flow;
    use crate::modes::{DemodKind, ModeEntry, ModeOptions};
    use num_complex::Complex32;

    fn test_control() -> Arc<ControlState> {
        let modes = Arc::new(vec![
            ModeEntry {
                name: "am".to_owned(),
                demod: DemodKind::Am,
                low: -5000.0,
                high: 5000.0,
                shift: 0.0,
                options: ModeOptions::default(),
            },
            ModeEntry {
                name: "iq".to_owned(),
                demod: DemodKind::Linear,
                low: -5000.0,
                high: 5000.0,
                shift: 0.0,
                options: ModeOptions {
                    conj: true,
                    ..ModeOptions::default()
                },
            },
        ]);
        Arc::new(ControlState::new(modes, 0, 0.0, 3.0))
    }

    /// Audio routing follows the frame shape, and a mode change in the
    /// block stream reinitializes the demodulator between blocks
    #[test]
    fn routes_audio_and_switches_modes() {
        let control = test_control();
        let (block_tx, block_rx) = flow::bounded(8);
        let (mono_tx, mono_rx) = flow::bounded(8);
        let (stereo_tx, stereo_rx) = flow::bounded(8);
        let (opus_tx, opus_rx) = flow::bounded(8);
        let stop = Arc::new(AtomicBool::new(false));
        let setup = DemodulateSetup {
            rx: block_rx,
            mono_pcm_tx: Some(mono_tx),
            stereo_pcm_tx: Some(stereo_tx),
            opus_tx: Some(opus_tx),
            control: Arc::clone(&control),
            telemetry: Arc::new(TelemetryCell::new()),
            stop: Arc::clone(&stop),
            channel_rate: 48_000.0,
        };
        let handle = std::thread::spawn(move || run_demodulate_stage(setup));

        let samples = vec![Complex32::new(0.2, 0.0); 256];
        block_tx
            .send(ChannelBlock {
                time: 0,
                mode_index: 0,
                samples: samples.clone(),
            })
            .expect("stage exited");
        block_tx
            .send(ChannelBlock {
                time: 256,
                mode_index: 1,
                samples,
            })
            .expect("stage exited");
        drop(block_tx);
        let report = handle.join().expect("stage panicked");
        assert_eq!(report.blocks, 2);

        // AM block becomes mono audio, I/Q block becomes stereo audio
        let mono = mono_rx.recv().expect("no mono frame");
        assert!(matches!(mono.samples, AudioSamples::Mono(_)));
        assert!(mono_rx.recv().is_err());
        let stereo = stereo_rx.recv().expect("no stereo frame");
        assert!(matches!(stereo.samples, AudioSamples::Stereo(_)));
        // Opus receives both
        assert!(opus_rx.recv().is_ok());
        assert!(opus_rx.recv().is_ok());
        assert!(opus_rx.recv().is_err());
    }

    /// A dead packetizer does not stop the others
    #[test]
    fn dead_stream_is_disabled() {
        let control = test_control();
        let (block_tx, block_rx) = flow::bounded(8);
        let (mono_tx, mono_rx) = flow::bounded(8);
        let (opus_tx, opus_rx) = flow::bounded(8);
        drop(opus_rx);
        let stop = Arc::new(AtomicBool::new(false));
        let setup = DemodulateSetup {
            rx: block_rx,
            mono_pcm_tx: Some(mono_tx),
            stereo_pcm_tx: None,
            opus_tx: Some(opus_tx),
            control,
            telemetry: Arc::new(TelemetryCell::new()),
            stop,
            channel_rate: 48_000.0,
        };
        let handle = std::thread::spawn(move || run_demodulate_stage(setup));
        for index in 0..3u64 {
            block_tx
                .send(ChannelBlock {
                    time: index * 256,
                    mode_index: 0,
                    samples: vec![Complex32::new(0.2, 0.0); 256],
                })
                .expect("stage exited");
        }
        drop(block_tx);
        handle.join().expect("stage panicked");
        let mut mono_frames = 0;
        while mono_rx.recv().is_ok() {
            mono_frames += 1;
        }
        assert_eq!(mono_frames, 3);
    }
}
