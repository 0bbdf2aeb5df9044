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

//! The audio packetizer stages, one thread per codec
//!
//! Each stream runs independently so an unhealthy encoder or socket cannot
//! block the others. Send failures are logged and the affected packet
//! dropped; the engine keeps running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;

use crate::block::{AudioFrame, AudioSamples};
use crate::flow::{BlockReceiver, FlowLogs};
use crate::output::opus::{AudioEncoder, OpusStream};
use crate::output::pcm::{MonoPcmStream, StereoPcmStream};
use crate::output::{PacketSink, StreamStats};

use super::STOP_POLL_INTERVAL;

/// Counters from a completed audio stage
#[derive(Debug, Default)]
pub struct AudioStageReport {
    /// Packets sent and smoothed bitrate
    pub stats: StreamStats,
    /// Waits on the demodulator
    pub receive_blocks: FlowLogs,
}

/// Runs the mono PCM packetizer until its input ends or the stop flag is set
pub fn run_mono_pcm_stage<S: PacketSink>(
    rx: BlockReceiver<AudioFrame>,
    mut stream: MonoPcmStream<S>,
    stop: Arc<AtomicBool>,
) -> AudioStageReport {
    loop {
        match next_frame(&rx, &stop) {
            Some(frame) => {
                if let AudioSamples::Mono(samples) = &frame.samples {
                    if let Err(e) = stream.push(samples) {
                        warn!("mono PCM send failed: {}", e);
                    }
                }
            }
            None => break,
        }
    }
    AudioStageReport {
        stats: stream.stats(),
        receive_blocks: rx.logs(),
    }
}

/// Runs the stereo PCM packetizer until its input ends or the stop flag is
/// set
pub fn run_stereo_pcm_stage<S: PacketSink>(
    rx: BlockReceiver<AudioFrame>,
    mut stream: StereoPcmStream<S>,
    stop: Arc<AtomicBool>,
) -> AudioStageReport {
    loop {
        match next_frame(&rx, &stop) {
            Some(frame) => {
                if let AudioSamples::Stereo(frames) = &frame.samples {
                    if let Err(e) = stream.push(frames) {
                        warn!("stereo PCM send failed: {}", e);
                    }
                }
            }
            None => break,
        }
    }
    AudioStageReport {
        stats: stream.stats(),
        receive_blocks: rx.logs(),
    }
}

/// Runs the Opus packetizer until its input ends or the stop flag is set
pub fn run_opus_stage<S: PacketSink, E: AudioEncoder>(
    rx: BlockReceiver<AudioFrame>,
    mut stream: OpusStream<S, E>,
    stop: Arc<AtomicBool>,
) -> AudioStageReport {
    loop {
        match next_frame(&rx, &stop) {
            Some(frame) => {
                if let Err(e) = stream.push(&frame.samples) {
                    warn!("opus send failed: {}", e);
                }
            }
            None => break,
        }
    }
    AudioStageReport {
        stats: stream.stats(),
        receive_blocks: rx.logs(),
    }
}

/// Waits for the next frame, returning None when the stage should exit
fn next_frame(rx: &BlockReceiver<AudioFrame>, stop: &AtomicBool) -> Option<AudioFrame> {
    loop {
        if stop.load(Ordering::Relaxed) {
            return None;
        }
        match rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(frame) => return Some(frame),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}
