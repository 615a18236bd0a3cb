//! Blocking star-topology transport between workers and the coordinator.
//!
//! One uplink channel per worker rank into the coordinator and one downlink
//! per rank back out; workers never talk to each other. Receives block until
//! the expected frame arrives, and a disconnected peer surfaces as a
//! [`SearchError::Transport`] naming the rank, which aborts the whole run —
//! there is no timeout and no partial-success mode.

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

use crate::domain::Rank;
use crate::error::SearchError;

/// A worker's two channel endpoints.
#[derive(Debug)]
pub struct WorkerLink {
    rank: Rank,
    uplink: Sender<Vec<u8>>,
    downlink: Receiver<Vec<u8>>,
}

impl WorkerLink {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Send one frame to the coordinator.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), SearchError> {
        trace!(rank = %self.rank, bytes = frame.len(), "worker send");
        self.uplink.send(frame).map_err(|_| {
            SearchError::Transport(format!("{}: coordinator is gone", self.rank))
        })
    }

    /// Block until the next broadcast frame from the coordinator arrives.
    pub fn recv(&self) -> Result<Vec<u8>, SearchError> {
        self.downlink.recv().map_err(|_| {
            SearchError::Transport(format!(
                "{}: coordinator closed the downlink before broadcasting",
                self.rank
            ))
        })
    }
}

/// The coordinator's endpoints: one receiver and one sender per worker rank.
#[derive(Debug)]
pub struct CoordinatorLink {
    uplinks: Vec<Receiver<Vec<u8>>>,
    downlinks: Vec<Sender<Vec<u8>>>,
}

impl CoordinatorLink {
    pub fn worker_count(&self) -> usize {
        self.uplinks.len()
    }

    /// Block until a frame from the given rank arrives.
    pub fn recv_from(&self, rank: Rank) -> Result<Vec<u8>, SearchError> {
        let receiver = self.uplinks.get(rank.index()).ok_or_else(|| {
            SearchError::Transport(format!("no uplink for {rank}"))
        })?;
        receiver.recv().map_err(|_| {
            SearchError::Transport(format!("{rank} died before sending its frame"))
        })
    }

    /// Collective broadcast: deliver the same frame to every worker. Returns
    /// an error if any worker is gone, since a partial broadcast would leave
    /// the barrier undefined.
    pub fn broadcast(&self, frame: &[u8]) -> Result<(), SearchError> {
        for (index, sender) in self.downlinks.iter().enumerate() {
            sender.send(frame.to_vec()).map_err(|_| {
                SearchError::Transport(format!(
                    "worker #{index} died before receiving the broadcast"
                ))
            })?;
        }
        trace!(workers = self.downlinks.len(), bytes = frame.len(), "broadcast");
        Ok(())
    }
}

/// Build the star topology for `worker_count` ranks.
pub fn channel_topology(worker_count: usize) -> (CoordinatorLink, Vec<WorkerLink>) {
    let mut uplinks = Vec::with_capacity(worker_count);
    let mut downlinks = Vec::with_capacity(worker_count);
    let mut workers = Vec::with_capacity(worker_count);

    for index in 0..worker_count {
        let (up_tx, up_rx) = unbounded();
        let (down_tx, down_rx) = unbounded();
        uplinks.push(up_rx);
        downlinks.push(down_tx);
        workers.push(WorkerLink {
            rank: Rank(index as u16),
            uplink: up_tx,
            downlink: down_rx,
        });
    }

    (
        CoordinatorLink { uplinks, downlinks },
        workers,
    )
}
