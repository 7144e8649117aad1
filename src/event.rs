//! Segment event classification
//!
//! Each segment is classified twice: once for the tracker of the endpoint
//! that sent it (a "sent" event) and once for the tracker of the endpoint
//! that receives it (a "recv" event).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::segment::{SegmentDescriptor, TcpFlags};

/// Event kind fed to a state handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TcpEvent {
    SynSent,
    SynRecv,
    SynAckSent,
    SynAckRecv,
    AckSent,
    AckRecv,
    DataSegSent,
    DataSegRecv,
    FinSent,
    FinRecv,
    RstSent,
    RstRecv,
}

impl TcpEvent {
    pub const ALL: [TcpEvent; 12] = [
        TcpEvent::SynSent,
        TcpEvent::SynRecv,
        TcpEvent::SynAckSent,
        TcpEvent::SynAckRecv,
        TcpEvent::AckSent,
        TcpEvent::AckRecv,
        TcpEvent::DataSegSent,
        TcpEvent::DataSegRecv,
        TcpEvent::FinSent,
        TcpEvent::FinRecv,
        TcpEvent::RstSent,
        TcpEvent::RstRecv,
    ];

    /// Classify from flags and payload length.
    ///
    /// Precedence is RST, SYN (with or without ACK), FIN, payload, then ACK.
    /// A segment carrying no recognised flag and no payload is treated as a
    /// bare ACK so every segment maps to exactly one kind.
    pub fn classify_flags(flags: TcpFlags, seg_len: u32, sent: bool) -> Self {
        let (s, r) = if flags.rst {
            (TcpEvent::RstSent, TcpEvent::RstRecv)
        } else if flags.syn && flags.ack {
            (TcpEvent::SynAckSent, TcpEvent::SynAckRecv)
        } else if flags.syn {
            (TcpEvent::SynSent, TcpEvent::SynRecv)
        } else if flags.fin {
            (TcpEvent::FinSent, TcpEvent::FinRecv)
        } else if seg_len > 0 {
            (TcpEvent::DataSegSent, TcpEvent::DataSegRecv)
        } else {
            (TcpEvent::AckSent, TcpEvent::AckRecv)
        };

        if sent {
            s
        } else {
            r
        }
    }

    /// Classify a segment relative to the tracker being updated
    pub fn classify(tsd: &SegmentDescriptor<'_>, sent: bool) -> Self {
        Self::classify_flags(tsd.flags(), tsd.seg_len(), sent)
    }

    pub fn is_sent(&self) -> bool {
        matches!(
            self,
            TcpEvent::SynSent
                | TcpEvent::SynAckSent
                | TcpEvent::AckSent
                | TcpEvent::DataSegSent
                | TcpEvent::FinSent
                | TcpEvent::RstSent
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            TcpEvent::SynSent => "syn_sent",
            TcpEvent::SynRecv => "syn_recv",
            TcpEvent::SynAckSent => "syn_ack_sent",
            TcpEvent::SynAckRecv => "syn_ack_recv",
            TcpEvent::AckSent => "ack_sent",
            TcpEvent::AckRecv => "ack_recv",
            TcpEvent::DataSegSent => "data_seg_sent",
            TcpEvent::DataSegRecv => "data_seg_recv",
            TcpEvent::FinSent => "fin_sent",
            TcpEvent::FinRecv => "fin_recv",
            TcpEvent::RstSent => "rst_sent",
            TcpEvent::RstRecv => "rst_recv",
        }
    }
}

impl fmt::Display for TcpEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rst_wins_over_everything() {
        assert_eq!(TcpEvent::classify_flags(TcpFlags::all(), 10, true), TcpEvent::RstSent);
        assert_eq!(TcpEvent::classify_flags(TcpFlags::rst_ack(), 0, false), TcpEvent::RstRecv);
    }

    #[test]
    fn test_syn_before_fin() {
        let flags = TcpFlags { syn: true, fin: true, ..Default::default() };
        assert_eq!(TcpEvent::classify_flags(flags, 0, true), TcpEvent::SynSent);
        let flags = TcpFlags { syn: true, ack: true, fin: true, ..Default::default() };
        assert_eq!(TcpEvent::classify_flags(flags, 0, false), TcpEvent::SynAckRecv);
    }

    #[test]
    fn test_data_and_ack() {
        assert_eq!(TcpEvent::classify_flags(TcpFlags::psh_ack(), 5, true), TcpEvent::DataSegSent);
        assert_eq!(TcpEvent::classify_flags(TcpFlags::ack(), 0, false), TcpEvent::AckRecv);
        assert_eq!(TcpEvent::classify_flags(TcpFlags::fin_ack(), 5, false), TcpEvent::FinRecv);
    }

    #[test]
    fn test_null_segment_is_bare_ack() {
        assert_eq!(TcpEvent::classify_flags(TcpFlags::default(), 0, true), TcpEvent::AckSent);
        // payload without ACK is still data
        assert_eq!(TcpEvent::classify_flags(TcpFlags::default(), 3, false), TcpEvent::DataSegRecv);
    }

    #[test]
    fn test_sent_recv_pairs() {
        for event in TcpEvent::ALL {
            let recv = event.name().ends_with("_recv");
            assert_eq!(event.is_sent(), !recv, "{}", event);
        }
    }
}
