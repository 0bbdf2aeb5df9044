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
//! This library receives a wideband I/Q sample stream over RTP multicast,
//! channelizes one channel with a fast-convolution filter, demodulates it,
//! and emits the audio as PCM and Opus RTP multicast streams. A control
//! channel retunes, switches modes, and adjusts filters at runtime.
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

extern crate byteorder;
extern crate crossbeam_channel;
extern crate crossbeam_utils;
#[macro_use]
extern crate log;
extern crate num_complex;
extern crate num_traits;
extern crate realfft;
extern crate rustfft;

// Public modules
pub mod block;
pub mod control;
pub mod demod;
pub mod filter;
pub mod flow;
pub mod input;
pub mod modes;
pub mod output;
pub mod rtp;
pub mod steps;
pub mod telemetry;

// Private modules
mod engine;
mod stages;

pub use crate::engine::{
    run, AudioOutputs, EngineSettings, OpusOutput, ReceiverSetup, Report,
};
