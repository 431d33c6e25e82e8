// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use tokio::sync::broadcast::{self, error::TryRecvError};

/// One task's view of a client's (or the echo server's) stop broadcast.
///
/// Latches: after the broadcast fired, or every sender was dropped, the signal stays stopped.
/// A subscriber must be created before the broadcast is sent, otherwise it never sees it.
#[derive(Debug)]
pub struct StopSignal {
    receiver: broadcast::Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    pub fn subscribe(sender: &broadcast::Sender<()>) -> StopSignal {
        StopSignal {
            receiver: sender.subscribe(),
            stopped: false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Checks for the broadcast without waiting.
    pub fn poll_stopped(&mut self) -> bool {
        if !self.stopped {
            match self.receiver.try_recv() {
                Err(TryRecvError::Empty) => {}
                // fired, lagged behind a fire, or all senders gone
                _ => self.stopped = true,
            }
        }
        self.stopped
    }

    /// Resolves once the stop broadcast has been seen.
    pub async fn stopped(&mut self) {
        if self.stopped {
            return;
        }
        let _ = self.receiver.recv().await;
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_latches_after_broadcast() {
        let (tx, _) = broadcast::channel(1);
        let mut signal = StopSignal::subscribe(&tx);
        assert!(!signal.poll_stopped());

        tx.send(()).unwrap();
        signal.stopped().await;
        assert!(signal.is_stopped());
        assert!(signal.poll_stopped());
        signal.stopped().await;
    }

    #[test]
    fn test_poll_sees_broadcast_without_runtime() {
        let (tx, _) = broadcast::channel(1);
        let mut signal = StopSignal::subscribe(&tx);
        tx.send(()).unwrap();
        assert!(!signal.is_stopped());
        assert!(signal.poll_stopped());
    }

    #[tokio::test]
    async fn test_dropped_senders_stop_the_signal() {
        let (tx, _) = broadcast::channel::<()>(1);
        let mut waiting = StopSignal::subscribe(&tx);
        let mut polling = StopSignal::subscribe(&tx);
        drop(tx);
        waiting.stopped().await;
        assert!(waiting.is_stopped());
        assert!(polling.poll_stopped());
    }
}
