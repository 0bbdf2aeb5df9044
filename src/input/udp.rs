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
//! I/Q packets from a UDP socket
//!

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use super::{parse_iq_packet, IqPacket};

/// Largest datagram the front end sends
const MAX_PACKET: usize = 1500;

/// Reads I/Q packets from a bound (and typically multicast-joined) socket
///
/// Malformed datagrams are logged and skipped. Read timeouts surface as
/// `WouldBlock`/`TimedOut` errors so the caller can poll its stop flag.
pub struct UdpSource {
    socket: UdpSocket,
    buffer: Box<[u8]>,
    /// Malformed datagrams seen
    bad_packets: u64,
}

impl UdpSource {
    /// Wraps a socket, applying a short read timeout
    pub fn new(socket: UdpSocket) -> io::Result<Self> {
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        Ok(UdpSource {
            socket,
            buffer: vec![0u8; MAX_PACKET].into_boxed_slice(),
            bad_packets: 0,
        })
    }
}

impl Iterator for UdpSource {
    type Item = io::Result<IqPacket>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let length = match self.socket.recv(&mut self.buffer) {
                Ok(length) => length,
                Err(e) => return Some(Err(e)),
            };
            match parse_iq_packet(&self.buffer[..length]) {
                Ok(packet) => return Some(Ok(packet)),
                Err(e) => {
                    // Transient: drop the datagram and keep receiving
                    self.bad_packets += 1;
                    if self.bad_packets % 1000 == 1 {
                        warn!("{} malformed I/Q datagrams, latest: {}", self.bad_packets, e);
                    } else {
                        debug!("dropping malformed I/Q datagram: {}", e);
                    }
                }
            }
        }
    }
}
