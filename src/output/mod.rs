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
//! Audio output streams: linear PCM and Opus over RTP
//!

pub mod opus;
pub mod pcm;
pub mod udp;

use std::io;

/// A destination for assembled RTP datagrams
pub trait PacketSink {
    /// Sends one datagram
    fn send(&mut self, datagram: &[u8]) -> io::Result<()>;
}

impl<S> PacketSink for Box<S>
where
    S: PacketSink + ?Sized,
{
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        (**self).send(datagram)
    }
}

/// Converts a float sample to 16 bits, saturating outside +-1.0
pub fn scale_clip(sample: f32) -> i16 {
    if sample >= 1.0 {
        i16::MAX
    } else if sample <= -1.0 {
        i16::MIN
    } else {
        (f32::from(i16::MAX) * sample) as i16
    }
}

/// Packet and bitrate counters for one output stream
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Datagrams sent
    pub packets: u64,
    /// Smoothed payload bitrate in bits per second
    pub bitrate: f32,
}
