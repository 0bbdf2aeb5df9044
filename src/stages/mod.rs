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
//! The four long-lived pipeline stages
//!
//! intake/mixer -> channelizer -> demodulator -> audio packetizers, coupled
//! by bounded channels. Each stage checks the stop flag and the control
//! generation only between blocks.
//!

pub mod audio_out;
pub mod channelize;
pub mod demodulate;
pub mod intake;

use std::time::Duration;

/// How long a stage waits for a block before rechecking its stop flag
///
/// Kept well under one block period so termination is prompt.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(10);
