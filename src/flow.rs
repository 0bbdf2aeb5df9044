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
//! Bounded channels between pipeline stages, with backpressure accounting
//!
//! Producers block when a stage falls behind. Each side counts how often and
//! for how long it blocked; the engine collects the counts into its final
//! report so a slow stage can be identified.
//!

use std::cell::Cell;
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvError, RecvTimeoutError, SendError, Sender, TryRecvError, TrySendError,
};

/// Creates a bounded stage-to-stage channel
///
/// The capacity is in blocks; it must be at least 1 so a producer can always
/// finish the block it is working on.
pub fn bounded<T>(capacity: usize) -> (BlockSender<T>, BlockReceiver<T>) {
    assert!(capacity >= 1, "stage channels must buffer at least one block");
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        BlockSender {
            sender: tx,
            blocked: BlockCounter::default(),
        },
        BlockReceiver {
            receiver: rx,
            blocked: BlockCounter::default(),
        },
    )
}

/// Counts blocking operations and the time they took
#[derive(Debug, Default)]
struct BlockCounter {
    count: Cell<u64>,
    duration: Cell<Duration>,
}

impl BlockCounter {
    fn record<F, R>(&self, operation: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = operation();
        self.duration.set(self.duration.get() + start.elapsed());
        self.count.set(self.count.get().saturating_add(1));
        result
    }

    fn logs(&self) -> FlowLogs {
        FlowLogs {
            block_count: self.count.get(),
            block_duration: self.duration.get(),
        }
    }
}

/// Blocking statistics for one side of a channel
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowLogs {
    /// Number of operations that had to block
    pub block_count: u64,
    /// Total time spent blocked
    pub block_duration: Duration,
}

/// The sending half of a stage channel
pub struct BlockSender<T> {
    sender: Sender<T>,
    blocked: BlockCounter,
}

impl<T> BlockSender<T> {
    /// Sends a block, blocking when the receiving stage is behind
    ///
    /// Returns Err when the receiver has exited.
    pub fn send(&self, block: T) -> Result<(), SendError<T>> {
        match self.sender.try_send(block) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(block)) => self.blocked.record(|| self.sender.send(block)),
            Err(TrySendError::Disconnected(block)) => Err(SendError(block)),
        }
    }

    /// Returns the backpressure statistics recorded so far
    pub fn logs(&self) -> FlowLogs {
        self.blocked.logs()
    }
}

/// The receiving half of a stage channel
pub struct BlockReceiver<T> {
    receiver: Receiver<T>,
    blocked: BlockCounter,
}

impl<T> BlockReceiver<T> {
    /// Receives a block, blocking until one arrives
    ///
    /// Returns Err when the sending stage has exited and the channel is
    /// drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        match self.receiver.try_recv() {
            Ok(block) => Ok(block),
            Err(TryRecvError::Empty) => self.blocked.record(|| self.receiver.recv()),
            Err(TryRecvError::Disconnected) => Err(RecvError),
        }
    }

    /// Receives a block, giving up after a timeout so the caller can check
    /// its stop flag
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        match self.receiver.try_recv() {
            Ok(block) => Ok(block),
            Err(TryRecvError::Empty) => {
                self.blocked.record(|| self.receiver.recv_timeout(timeout))
            }
            Err(TryRecvError::Disconnected) => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Returns the wait statistics recorded so far
    pub fn logs(&self) -> FlowLogs {
        self.blocked.logs()
    }
}
