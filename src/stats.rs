//! Stream tracking statistics
//!
//! Counters are kept in an explicit context owned by the worker that
//! processes a set of flows, so each worker (and each test) sees only its
//! own counts. Workers merge into a global view when reporting.

use serde::{Deserialize, Serialize};

use crate::state::TcpState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Segments handed to the state machine
    pub segments: u64,
    /// Segments rejected before dispatch
    pub rejected: u64,
    /// Packets discarded for a protocol anomaly
    pub discards: u64,
    /// Window slams detected
    pub window_slams: u64,
    /// RSTs that failed validation
    pub bad_rsts: u64,
    /// Sessions closed by a valid RST
    pub sessions_reset: u64,
    /// SYN or SYN-ACK segments carrying payload
    pub data_on_syn: u64,
    /// Segments below the acknowledged edge
    pub stale_segments: u64,
    /// Segments failing the PAWS check
    pub paws_failures: u64,
    /// Flows picked up without a handshake
    pub midstream_pickups: u64,
    /// Segments dropped by the normalizer
    pub normalizer_drops: u64,
    /// Forced flushes issued to reassembly
    pub forced_flushes: u64,
    /// Transitions into each state, indexed by `TcpState::index`
    pub transitions: [u64; TcpState::COUNT],
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_tcp_discards(&mut self) {
        self.discards += 1;
    }

    pub fn record_transition(&mut self, to: TcpState) {
        self.transitions[to.index()] += 1;
    }

    pub fn transitions_to(&self, state: TcpState) -> u64 {
        self.transitions[state.index()]
    }

    /// Fold another worker's counters into this one
    pub fn merge(&mut self, other: &StreamStats) {
        self.segments += other.segments;
        self.rejected += other.rejected;
        self.discards += other.discards;
        self.window_slams += other.window_slams;
        self.bad_rsts += other.bad_rsts;
        self.sessions_reset += other.sessions_reset;
        self.data_on_syn += other.data_on_syn;
        self.stale_segments += other.stale_segments;
        self.paws_failures += other.paws_failures;
        self.midstream_pickups += other.midstream_pickups;
        self.normalizer_drops += other.normalizer_drops;
        self.forced_flushes += other.forced_flushes;
        for (mine, theirs) in self.transitions.iter_mut().zip(other.transitions.iter()) {
            *mine += theirs;
        }
    }
}
