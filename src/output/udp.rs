/*
 * Copyright 2020 The Regents of the University of California
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
//! Output over a UDP socket
//!

use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::PacketSink;

/// Sends datagrams to one destination over a (typically shared) socket
///
/// All audio streams clone one socket so they share the multicast TTL and
/// outgoing interface chosen at startup.
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UdpSink {
    /// Creates a sink sending to the provided destination
    pub fn new(socket: UdpSocket, destination: SocketAddr) -> Self {
        UdpSink {
            socket,
            destination,
        }
    }
}

impl PacketSink for UdpSink {
    fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, self.destination)?;
        if sent != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!(
                    "tried to send {} bytes as a UDP packet, but only {} were sent",
                    datagram.len(),
                    sent
                ),
            ));
        }
        Ok(())
    }
}
