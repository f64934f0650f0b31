//! Communication between the partitions of a distributed mesh.
//!
//! A distributed computation consists of one process (rank) per partition. The estimators only
//! need two kinds of communication: global reductions of scalars, and point-to-point exchange
//! of data with neighboring ranks. [`SerialCommunicator`] is the trivial single-rank
//! implementation, [`ThreadCommunicator`] runs each rank on its own thread.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

/// Communication failed because a peer is no longer reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommError {
    peer: usize,
}

impl CommError {
    pub fn peer(&self) -> usize {
        self.peer
    }
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lost connection to rank {}", self.peer)
    }
}

impl Error for CommError {}

pub trait Communicator: fmt::Debug + Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sums a value over all ranks. Every rank obtains the same result.
    fn all_reduce_sum(&self, value: f64) -> f64;

    /// Computes the maximum of a value over all ranks.
    fn all_reduce_max(&self, value: f64) -> f64;

    /// Sends one message to each listed peer, and receives one message from each of them.
    ///
    /// The neighbor relation must be symmetric: a rank that sends to `q` must also be listed
    /// as a peer by `q`. Messages between any two ranks are delivered in order.
    fn exchange(&self, outgoing: Vec<(usize, Vec<f64>)>) -> Result<Vec<(usize, Vec<f64>)>, CommError>;
}

/// The communicator of a non-distributed computation.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        value
    }

    fn exchange(&self, outgoing: Vec<(usize, Vec<f64>)>) -> Result<Vec<(usize, Vec<f64>)>, CommError> {
        outgoing
            .into_iter()
            .map(|(peer, data)| if peer == 0 { Ok((peer, data)) } else { Err(CommError { peer }) })
            .collect()
    }
}

#[derive(Debug)]
struct ReductionState {
    barrier: Barrier,
    slots: Mutex<Vec<f64>>,
}

/// A communicator for ranks running as threads within a single process.
///
/// Reductions combine the contributions in rank order, so that all ranks obtain bitwise
/// identical results.
pub struct ThreadCommunicator {
    rank: usize,
    reduction: Arc<ReductionState>,
    senders: Vec<Mutex<Sender<(usize, Vec<f64>)>>>,
    receiver: Mutex<Receiver<(usize, Vec<f64>)>>,
    // Messages received while waiting for a different peer, per sender
    pending: Mutex<Vec<VecDeque<Vec<f64>>>>,
}

impl fmt::Debug for ThreadCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.senders.len())
            .finish()
    }
}

impl ThreadCommunicator {
    /// Creates connected communicators for `size` ranks. The communicator at index `i` has
    /// rank `i` and must be moved to the thread running that rank.
    pub fn create(size: usize) -> Vec<ThreadCommunicator> {
        let reduction = Arc::new(ReductionState {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![0.0; size]),
        });
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| ThreadCommunicator {
                rank,
                reduction: Arc::clone(&reduction),
                senders: senders.iter().cloned().map(Mutex::new).collect(),
                receiver: Mutex::new(receiver),
                pending: Mutex::new(vec![VecDeque::new(); size]),
            })
            .collect()
    }

    fn all_reduce(&self, value: f64, init: f64, op: impl Fn(f64, f64) -> f64) -> f64 {
        self.reduction.slots.lock()[self.rank] = value;
        self.reduction.barrier.wait();
        let result = self.reduction.slots.lock().iter().fold(init, |acc, &v| op(acc, v));
        // Nobody may overwrite their slot before everyone has read the result
        self.reduction.barrier.wait();
        result
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_reduce_sum(&self, value: f64) -> f64 {
        self.all_reduce(value, 0.0, |a, b| a + b)
    }

    fn all_reduce_max(&self, value: f64) -> f64 {
        self.all_reduce(value, f64::NEG_INFINITY, f64::max)
    }

    fn exchange(&self, outgoing: Vec<(usize, Vec<f64>)>) -> Result<Vec<(usize, Vec<f64>)>, CommError> {
        let peers: Vec<usize> = outgoing.iter().map(|(peer, _)| *peer).collect();
        for (peer, data) in outgoing {
            let sender = self.senders.get(peer).ok_or(CommError { peer })?;
            sender
                .lock()
                .send((self.rank, data))
                .map_err(|_| CommError { peer })?;
        }

        let mut pending = self.pending.lock();
        let receiver = self.receiver.lock();
        let mut incoming = Vec::with_capacity(peers.len());
        for peer in peers {
            let data = loop {
                if let Some(data) = pending[peer].pop_front() {
                    break data;
                }
                let (from, data) = receiver.recv().map_err(|_| CommError { peer })?;
                pending[from].push_back(data);
            };
            incoming.push((peer, data));
        }
        Ok(incoming)
    }
}
