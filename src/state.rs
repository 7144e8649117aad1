//! Per-direction TCP connection state

use std::fmt;

use serde::{Deserialize, Serialize};

/// TCP connection state as inferred for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TcpState {
    /// Nothing seen from this endpoint yet
    Listen = 0,
    /// SYN sent, waiting for SYN-ACK
    SynSent = 1,
    /// SYN received (server side)
    SynRecv = 2,
    /// Connection established
    Established = 3,
    /// FIN sent, waiting for ACK
    FinWait1 = 4,
    /// FIN sent and ACKed, waiting for FIN from peer
    FinWait2 = 5,
    /// Received FIN, own side still open
    CloseWait = 6,
    /// Both sides sent FIN, ours not yet acknowledged
    Closing = 7,
    /// Sent FIN after receiving FIN
    LastAck = 8,
    /// Waiting for timeout after close
    TimeWait = 9,
    Closed = 10,
}

impl TcpState {
    pub const COUNT: usize = 11;

    pub const ALL: [TcpState; TcpState::COUNT] = [
        TcpState::Listen,
        TcpState::SynSent,
        TcpState::SynRecv,
        TcpState::Established,
        TcpState::FinWait1,
        TcpState::FinWait2,
        TcpState::CloseWait,
        TcpState::Closing,
        TcpState::LastAck,
        TcpState::TimeWait,
        TcpState::Closed,
    ];

    /// Index into per-state tables
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            TcpState::Listen => "LISTEN",
            TcpState::SynSent => "SYN_SENT",
            TcpState::SynRecv => "SYN_RECV",
            TcpState::Established => "ESTABLISHED",
            TcpState::FinWait1 => "FIN_WAIT1",
            TcpState::FinWait2 => "FIN_WAIT2",
            TcpState::CloseWait => "CLOSE_WAIT",
            TcpState::Closing => "CLOSING",
            TcpState::LastAck => "LAST_ACK",
            TcpState::TimeWait => "TIME_WAIT",
            TcpState::Closed => "CLOSED",
        }
    }

    /// Handshake finished from this endpoint's point of view
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, TcpState::Listen | TcpState::SynSent | TcpState::SynRecv)
    }

    /// Endpoint has started or finished tearing down
    pub fn is_closing(&self) -> bool {
        *self >= TcpState::FinWait1
    }
}

impl Default for TcpState {
    fn default() -> Self {
        TcpState::Listen
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_table_order() {
        for (i, state) in TcpState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }

    #[test]
    fn test_state_predicates() {
        assert!(!TcpState::SynRecv.is_synchronized());
        assert!(TcpState::Established.is_synchronized());
        assert!(!TcpState::Established.is_closing());
        assert!(TcpState::FinWait1.is_closing());
        assert!(TcpState::Closed.is_closing());
        assert_eq!(TcpState::default(), TcpState::Listen);
    }
}
