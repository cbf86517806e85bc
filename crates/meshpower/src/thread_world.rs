//! A multi-worker [`Communicator`] backend built from scoped threads.
//!
//! Each worker owns the receiving end of one unbounded channel and a sender
//! for every other worker's channel. Since all messages addressed to a worker
//! share a single channel, the worker sorts incoming messages into per-source
//! queues, which gives us FIFO delivery per (source, destination) pair.
//!
//! When a worker finishes (successfully, with an error, or by panicking) it
//! tells every peer that it departed. A peer that is blocked on a message
//! from the departed worker (or later asks for one) gets a collective failure
//! instead of waiting forever.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::comm::{Communicator, Payload};
use crate::error::Error;

enum Envelope {
    Payload(Payload),
    /// the source worker has finished. `failed` is true when it finished
    /// with an error (or a panic).
    Departed { failed: bool },
}

struct Message {
    source: usize,
    envelope: Envelope,
}

/// The [`Communicator`] handed to each worker by [`ThreadWorld::run`]
pub struct ThreadComm {
    rank: usize,
    senders: Vec<Sender<Message>>,
    receiver: Receiver<Message>,
    pending: RefCell<Vec<VecDeque<Envelope>>>,
    saw_departure: Cell<bool>,
}

impl ThreadComm {
    fn new(rank: usize, senders: Vec<Sender<Message>>, receiver: Receiver<Message>) -> Self {
        let pending = (0..senders.len()).map(|_| VecDeque::new()).collect();
        Self {
            rank,
            senders,
            receiver,
            pending: RefCell::new(pending),
            saw_departure: Cell::new(false),
        }
    }

    /// notify every peer that this worker is done
    fn depart(&self, failed: bool) {
        for (dest, sender) in self.senders.iter().enumerate() {
            if dest != self.rank {
                // a peer that already finished has dropped its receiver,
                // which is fine
                let _ = sender.send(Message {
                    source: self.rank,
                    envelope: Envelope::Departed { failed },
                });
            }
        }
    }

    fn departure_error(&self, source: usize, failed: bool) -> Error {
        self.saw_departure.set(true);
        let what = if failed {
            format!("rank {source} failed")
        } else {
            format!("rank {source} exited without participating")
        };
        tracing::warn!(rank = self.rank, peer = source, failed, "peer departed during a collective");
        Error::collective_failure(self.rank, what)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, dest: usize, payload: Payload) -> Result<(), Error> {
        let sender = self
            .senders
            .get(dest)
            .ok_or_else(|| Error::collective_failure(self.rank, format!("rank {dest} doesn't exist")))?;
        sender
            .send(Message {
                source: self.rank,
                envelope: Envelope::Payload(payload),
            })
            .map_err(|_| {
                self.saw_departure.set(true);
                Error::collective_failure(self.rank, format!("rank {dest} has departed"))
            })
    }

    fn recv(&self, source: usize) -> Result<Payload, Error> {
        if source >= self.size() {
            return Err(Error::collective_failure(
                self.rank,
                format!("rank {source} doesn't exist"),
            ));
        }
        loop {
            {
                let mut pending = self.pending.borrow_mut();
                match pending[source].front() {
                    Some(Envelope::Departed { failed }) => {
                        // leave the marker in place so later calls fail too
                        let failed = *failed;
                        drop(pending);
                        return Err(self.departure_error(source, failed));
                    }
                    Some(Envelope::Payload(_)) => {
                        if let Some(Envelope::Payload(payload)) = pending[source].pop_front() {
                            return Ok(payload);
                        }
                    }
                    None => {}
                }
            }
            let message = self.receiver.recv().map_err(|_| {
                Error::collective_failure(self.rank, "every peer has disconnected")
            })?;
            self.pending.borrow_mut()[message.source].push_back(message.envelope);
        }
    }
}

/// Runs SPMD computations on a fixed number of threads.
pub struct ThreadWorld;

impl ThreadWorld {
    /// Executes `f` once per worker (each on its own thread) and returns the
    /// per-rank results, in rank order.
    ///
    /// If any worker fails, the whole computation fails. In that case, we
    /// report the root cause: the error of a worker that failed on its own
    /// rather than because a peer departed.
    pub fn run<T, F>(n_workers: usize, f: F) -> Result<Vec<T>, Error>
    where
        T: Send,
        F: Fn(&ThreadComm) -> Result<T, Error> + Sync,
    {
        if n_workers == 0 {
            return Err(Error::integer_range("n_workers", 0, 1, i64::MAX));
        }
        let (senders, receivers): (Vec<Sender<Message>>, Vec<Receiver<Message>>) =
            (0..n_workers).map(|_| unbounded()).unzip();
        let comms: Vec<ThreadComm> = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadComm::new(rank, senders.clone(), receiver))
            .collect();
        drop(senders);
        tracing::debug!(n_workers, "starting thread world");

        // each entry holds the outcome and whether the worker observed a
        // departed peer
        let outcomes: Vec<(Result<T, Error>, bool)> = std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let rank = comm.rank;
                        let outcome = match catch_unwind(AssertUnwindSafe(|| f(&comm))) {
                            Ok(result) => result,
                            Err(panic) => Err(Error::collective_failure(
                                rank,
                                format!("worker panicked: {}", panic_message(panic.as_ref())),
                            )),
                        };
                        comm.depart(outcome.is_err());
                        (outcome, comm.saw_departure.get())
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        (Err(Error::collective_failure(rank, "worker thread panicked")), false)
                    })
                })
                .collect()
        });

        let mut results = Vec::with_capacity(n_workers);
        let mut root_cause: Option<Error> = None;
        let mut secondary: Option<Error> = None;
        for (outcome, saw_departure) in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(err) if !saw_departure && root_cause.is_none() => root_cause = Some(err),
                Err(err) => {
                    if secondary.is_none() {
                        secondary = Some(err);
                    }
                }
            }
        }
        match root_cause.or(secondary) {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
