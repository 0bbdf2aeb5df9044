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

//! The channelizer stage: overlap-save filtering and decimation
//!
//! A mode change replaces the filter (cross-conjugate modes need a different
//! output domain); a cutoff change only rebuilds the response, preserving
//! the overlap-save history so there is no discontinuity in the output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::RecvTimeoutError;

use crate::block::{ChannelBlock, SampleBlock};
use crate::control::{ControlState, TuningState};
use crate::filter::{FastConvolver, FilterParams, InputDomain, OutputDomain};
use crate::flow::{BlockReceiver, BlockSender, FlowLogs};
use crate::modes::ModeEntry;

use super::STOP_POLL_INTERVAL;

/// Setup for the channelizer stage
pub struct ChannelizeSetup {
    /// Mixed blocks from the intake stage
    pub rx: BlockReceiver<SampleBlock>,
    /// Channelized blocks to the demodulator
    pub tx: BlockSender<ChannelBlock>,
    /// Shared control state, re-read at block boundaries
    pub control: Arc<ControlState>,
    /// Set to stop the stage
    pub stop: Arc<AtomicBool>,
    /// Samples per input block (L)
    pub block_size: usize,
    /// Impulse response length (M)
    pub impulse_length: usize,
    /// Decimation ratio (D)
    pub decimate: usize,
    /// Decimated sample rate in Hz, for normalizing the cutoffs
    pub channel_rate: f32,
}

/// Counters from a completed channelizer stage
#[derive(Debug, Default)]
pub struct ChannelizeReport {
    /// Blocks processed
    pub blocks: u64,
    /// Waits on the intake stage
    pub receive_blocks: FlowLogs,
    /// Backpressure from the demodulator
    pub send_blocks: FlowLogs,
}

/// Runs the channelizer stage until the input ends or the stop flag is set
pub fn run_channelize_stage(setup: ChannelizeSetup) -> ChannelizeReport {
    let mut report = ChannelizeReport::default();
    let (mut generation, initial_tuning) = setup.control.read();
    let mut mode_index = initial_tuning.mode_index;
    let mut convolver =
        build_filter(&setup, &setup.control.modes()[mode_index], &initial_tuning);

    let output_size = setup.block_size / setup.decimate;
    let mut out_time = 0u64;

    loop {
        if setup.stop.load(Ordering::Relaxed) {
            break;
        }
        let block = match setup.rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(block) => block,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Block boundary: apply any pending reconfiguration
        if let Some(new_tuning) = setup.control.read_if_changed(&mut generation) {
            if new_tuning.mode_index != mode_index
                && new_tuning.mode_index < setup.control.modes().len()
            {
                mode_index = new_tuning.mode_index;
                convolver =
                    build_filter(&setup, &setup.control.modes()[mode_index], &new_tuning);
            } else {
                set_passband(&mut convolver, &new_tuning, setup.channel_rate);
            }
        }

        debug_assert_eq!(block.samples.len(), setup.block_size);
        convolver
            .input_complex_mut()
            .copy_from_slice(&block.samples);
        convolver.execute();

        let samples = convolver.output_complex().to_vec();
        if setup
            .tx
            .send(ChannelBlock {
                time: out_time,
                mode_index,
                samples,
            })
            .is_err()
        {
            break;
        }
        out_time += output_size as u64;
        report.blocks += 1;
    }

    report.receive_blocks = setup.rx.logs();
    report.send_blocks = setup.tx.logs();
    report
}

fn build_filter(
    setup: &ChannelizeSetup,
    entry: &ModeEntry,
    tuning: &TuningState,
) -> FastConvolver {
    let output_domain = if entry.options.conj {
        OutputDomain::CrossConj
    } else {
        OutputDomain::Complex
    };
    let mut convolver = FastConvolver::new(FilterParams {
        block_size: setup.block_size,
        impulse_length: setup.impulse_length,
        decimate: setup.decimate,
        input_domain: InputDomain::Complex,
        output_domain,
    });
    set_passband(&mut convolver, tuning, setup.channel_rate);
    convolver
}

fn set_passband(convolver: &mut FastConvolver, tuning: &TuningState, channel_rate: f32) {
    convolver.set_passband(
        tuning.low / channel_rate,
        tuning.high / channel_rate,
        tuning.kaiser_beta,
    );
}
