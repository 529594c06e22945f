//! ICE candidate relay
//!
//! Candidates may reach us before the offer they belong to. Until the remote
//! description is applied they wait here, in arrival order; afterwards the
//! relay is a pass-through.

use crate::types::IceCandidate;
use std::collections::VecDeque;

/// FIFO buffer for candidates that arrive before the remote description
#[derive(Debug, Default)]
pub struct CandidateRelay {
    pending: VecDeque<IceCandidate>,
    drained: bool,
    total_buffered: u64,
    total_drained: u64,
}

/// Where an enqueued candidate went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relayed {
    /// Held until the remote description is applied
    Buffered,
    /// The relay has already drained; apply the candidate now
    Forward(IceCandidate),
}

impl CandidateRelay {
    /// Create an empty relay
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a candidate
    ///
    /// Before the drain the candidate is buffered. After the drain it is
    /// handed straight back to the caller.
    pub fn enqueue(&mut self, candidate: IceCandidate) -> Relayed {
        if self.drained {
            return Relayed::Forward(candidate);
        }
        self.pending.push_back(candidate);
        self.total_buffered += 1;
        Relayed::Buffered
    }

    /// Release all buffered candidates in arrival order
    ///
    /// Returns nothing until `remote_ready`; the first call with
    /// `remote_ready == true` empties the buffer, and every call after that
    /// returns an empty vector.
    pub fn drain_if_ready(&mut self, remote_ready: bool) -> Vec<IceCandidate> {
        if !remote_ready || self.drained {
            return Vec::new();
        }
        self.drained = true;
        let drained: Vec<IceCandidate> = self.pending.drain(..).collect();
        self.total_drained += drained.len() as u64;
        drained
    }

    /// Whether the one-time drain has happened
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// Candidates currently waiting
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Candidates ever buffered
    pub fn total_buffered(&self) -> u64 {
        self.total_buffered
    }

    /// Candidates released by the drain
    pub fn total_drained(&self) -> u64 {
        self.total_drained
    }
}
