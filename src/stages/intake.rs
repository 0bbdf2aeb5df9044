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

//! The intake stage: reads I/Q packets, tracks the RTP sequence, applies the
//! second LO, and assembles fixed-size blocks for the channelizer

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::block::SampleBlock;
use crate::control::ControlState;
use crate::flow::{BlockSender, FlowLogs};
use crate::input::IqPacket;
use crate::steps::nco::Nco;
use crate::telemetry::TelemetryCell;

/// Setup for the intake stage
pub struct IntakeSetup<I> {
    /// Source of parsed I/Q packets
    pub packets: I,
    /// Samples per block (L)
    pub block_size: usize,
    /// Input sample rate in Hz
    pub sample_rate: f64,
    /// Shared control state; the second LO is re-read at block boundaries
    pub control: Arc<ControlState>,
    /// Shared measurements
    pub telemetry: Arc<TelemetryCell>,
    /// Set to stop the stage
    pub stop: Arc<AtomicBool>,
    /// Mixed blocks to the channelizer
    pub tx: BlockSender<SampleBlock>,
}

/// Counters from a completed intake stage
#[derive(Debug, Default)]
pub struct IntakeReport {
    /// Packets consumed
    pub packets: u64,
    /// Samples consumed
    pub samples: u64,
    /// Sequence gaps seen
    pub skips: u64,
    /// Out-of-order packets dropped
    pub delayed: u64,
    /// Backpressure from the channelizer
    pub send_blocks: FlowLogs,
}

/// Runs the intake stage until the source ends or the stop flag is set
pub fn run_intake_stage<I>(setup: IntakeSetup<I>) -> io::Result<IntakeReport>
where
    I: IntoIterator<Item = io::Result<IqPacket>>,
{
    let IntakeSetup {
        packets,
        block_size,
        sample_rate,
        control,
        telemetry,
        stop,
        tx,
    } = setup;

    let mut report = IntakeReport::default();
    let mut mixer = Nco::new(0.0);
    let mut generation = 0u64;
    if let Some(tuning) = control.read_if_changed(&mut generation) {
        set_mixer(&mut mixer, tuning.second_lo, tuning.second_lo_rate, sample_rate);
    }

    let mut expected_sequence: Option<u16> = None;
    let mut block = Vec::with_capacity(block_size);
    let mut time = 0u64;

    for packet in packets {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let packet = match packet {
            Ok(packet) => packet,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                // Idle source; go around and recheck the stop flag
                continue;
            }
            Err(e) => {
                // Transient receive failure: log it and keep going
                warn!("I/Q receive error: {}", e);
                continue;
            }
        };

        // Sequence bookkeeping: count gaps, drop reordered packets
        if let Some(expected) = expected_sequence {
            let advance = packet.sequence.wrapping_sub(expected) as i16;
            if advance > 0 {
                report.skips += 1;
            } else if advance < 0 {
                report.delayed += 1;
                let skips = report.skips;
                let delayed = report.delayed;
                telemetry.update(|t| {
                    t.skips = skips;
                    t.delayed = delayed;
                });
                continue;
            }
        }
        expected_sequence = Some(packet.sequence.wrapping_add(1));
        report.packets += 1;
        report.samples += packet.samples.len() as u64;

        let skips = report.skips;
        let delayed = report.delayed;
        telemetry.update(|t| {
            t.first_lo = packet.status.first_lo;
            t.lna_gain = packet.status.lna_gain;
            t.mixer_gain = packet.status.mixer_gain;
            t.if_gain = packet.status.if_gain;
            t.skips = skips;
            t.delayed = delayed;
        });

        for sample in packet.samples {
            block.push(sample * mixer.step());
            if block.len() == block_size {
                let full = mem::replace(&mut block, Vec::with_capacity(block_size));
                if tx
                    .send(SampleBlock {
                        time,
                        samples: full,
                    })
                    .is_err()
                {
                    // The channelizer exited; nothing more to do here
                    report.send_blocks = tx.logs();
                    return Ok(report);
                }
                time += block_size as u64;

                // Block boundary: pick up any retune
                if let Some(tuning) = control.read_if_changed(&mut generation) {
                    set_mixer(
                        &mut mixer,
                        tuning.second_lo,
                        tuning.second_lo_rate,
                        sample_rate,
                    );
                }
            }
        }
    }

    report.send_blocks = tx.logs();
    Ok(report)
}

/// Points the mixer at -second_lo so the selected channel lands at baseband
fn set_mixer(mixer: &mut Nco, second_lo: f64, second_lo_rate: f64, sample_rate: f64) {
    let frequency = (-second_lo / sample_rate) as f32;
    let rate = (-second_lo_rate / (sample_rate * sample_rate)) as f32;
    mixer.set_frequency(frequency, rate);
}
