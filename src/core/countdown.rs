//! Countdown join that carries each worker's exit status
//!
//! Every worker owns one [`CountdownSignal`]. Completing it, or dropping it
//! on an unwinding thread, sends exactly one status to the [`Countdown`],
//! which blocks until all signals have arrived and folds them into the
//! worst status.

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, warn};

use super::exit_status::WorkerExitStatus;

pub struct Countdown {
    receiver: Receiver<WorkerExitStatus>,
    expected: usize,
}

/// One-shot completion handle held by a single worker
pub struct CountdownSignal {
    sender: Option<Sender<WorkerExitStatus>>,
}

impl Countdown {
    /// Create a countdown expecting `count` signals
    pub fn new(count: usize) -> (Self, Vec<CountdownSignal>) {
        let (sender, receiver) = bounded(count);
        let signals = (0..count)
            .map(|_| CountdownSignal {
                sender: Some(sender.clone()),
            })
            .collect();
        (
            Self {
                receiver,
                expected: count,
            },
            signals,
        )
    }

    /// Block until every signal has fired; returns the worst status seen
    pub fn wait(self) -> WorkerExitStatus {
        let mut worst = WorkerExitStatus::Valid;
        for received in 0..self.expected {
            match self.receiver.recv() {
                Ok(status) => {
                    debug!(
                        status = %status,
                        remaining = self.expected - received - 1,
                        "worker signalled completion"
                    );
                    worst = worst.worst(status);
                }
                Err(_) => {
                    // Every sender dropped without signalling
                    warn!(received, expected = self.expected, "countdown disconnected early");
                    worst = worst.worst(WorkerExitStatus::InternalError);
                    break;
                }
            }
        }
        worst
    }
}

impl CountdownSignal {
    /// Signal completion with the worker's final status
    pub fn complete(mut self, status: WorkerExitStatus) {
        self.send(status);
    }

    fn send(&mut self, status: WorkerExitStatus) {
        if let Some(sender) = self.sender.take() {
            // Capacity equals the signal count, so this never blocks
            let _ = sender.send(status);
        }
    }
}

impl Drop for CountdownSignal {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!("worker finished without reporting a status");
            self.send(WorkerExitStatus::InternalError);
        }
    }
}
