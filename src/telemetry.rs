//! Per-session anomaly telemetry and packet actions
//!
//! Anomalies never abort processing. They are accumulated on the session
//! for the alerting layer and may additionally mark the current packet
//! with a blocking action.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Protocol anomaly recorded against a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamEvent {
    /// SYN seen after the handshake completed
    SynOnEstablished,
    /// Payload carried on a SYN or SYN-ACK
    DataOnSyn,
    /// Payload sent to an endpoint that is already closed
    DataOnClosed,
    /// Timestamp older than the last one seen (PAWS)
    BadTimestamp,
    /// RST failed sequence validation
    BadRst,
    /// Zero window advertised as the ACK catches up
    WindowSlam,
    /// Advertised window above the configured maximum
    WindowTooLarge,
    /// Payload carried on a RST
    DataAfterRstRcvd,
    /// Payload sent after the sender's own FIN
    DataAfterFin,
    /// Non-SYN segment on a flow that requires a handshake
    NoHandshake,
    /// New SYN on a flow whose trackers are closed
    SessionReused,
    /// Segment entirely below the acknowledged edge
    StaleSegment,
}

impl StreamEvent {
    pub const COUNT: usize = 12;

    pub const ALL: [StreamEvent; StreamEvent::COUNT] = [
        StreamEvent::SynOnEstablished,
        StreamEvent::DataOnSyn,
        StreamEvent::DataOnClosed,
        StreamEvent::BadTimestamp,
        StreamEvent::BadRst,
        StreamEvent::WindowSlam,
        StreamEvent::WindowTooLarge,
        StreamEvent::DataAfterRstRcvd,
        StreamEvent::DataAfterFin,
        StreamEvent::NoHandshake,
        StreamEvent::SessionReused,
        StreamEvent::StaleSegment,
    ];

    /// Index into per-event tables
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::SynOnEstablished => "syn_on_established",
            StreamEvent::DataOnSyn => "data_on_syn",
            StreamEvent::DataOnClosed => "data_on_closed",
            StreamEvent::BadTimestamp => "bad_timestamp",
            StreamEvent::BadRst => "bad_rst",
            StreamEvent::WindowSlam => "window_slam",
            StreamEvent::WindowTooLarge => "window_too_large",
            StreamEvent::DataAfterRstRcvd => "data_after_rst_rcvd",
            StreamEvent::DataAfterFin => "data_after_fin",
            StreamEvent::NoHandshake => "no_handshake",
            StreamEvent::SessionReused => "session_reused",
            StreamEvent::StaleSegment => "stale_segment",
        }
    }
}

impl fmt::Display for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Telemetry accumulator for one session.
///
/// One saturating counter per event kind, so a flood of anomalies on a
/// single session costs no extra memory.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    counts: [u32; StreamEvent::COUNT],
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tcp_event(&mut self, event: StreamEvent) {
        debug!(event = %event, "stream anomaly");
        let slot = &mut self.counts[event.index()];
        *slot = slot.saturating_add(1);
    }

    pub fn has_event(&self, event: StreamEvent) -> bool {
        self.counts[event.index()] != 0
    }

    pub fn count(&self, event: StreamEvent) -> u32 {
        self.counts[event.index()]
    }

    /// Event kinds raised at least once
    pub fn events(&self) -> impl Iterator<Item = StreamEvent> + '_ {
        StreamEvent::ALL.into_iter().filter(|e| self.has_event(*e))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|c| *c == 0)
    }

    /// Hand accumulated events to the alerting layer and start over
    pub fn drain(&mut self) -> Vec<(StreamEvent, u32)> {
        let raised = self.events().map(|e| (e, self.count(e))).collect();
        self.counts = [0; StreamEvent::COUNT];
        raised
    }
}

/// Actions requested for the packet currently being processed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacketActions {
    /// Drop the packet (inline mode)
    pub drop: bool,
    /// Raise an alert for the packet
    pub alert: bool,
    /// Connection was reset by this packet
    pub reset: bool,
    /// Packet failed validation and must not be inspected further
    pub bad_packet: bool,
}

/// Single action flag, for `set_pkt_action_flag`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketAction {
    Drop,
    Alert,
    Reset,
    BadPacket,
}

impl PacketActions {
    pub fn set(&mut self, action: PacketAction) {
        match action {
            PacketAction::Drop => self.drop = true,
            PacketAction::Alert => self.alert = true,
            PacketAction::Reset => self.reset = true,
            PacketAction::BadPacket => self.bad_packet = true,
        }
    }

    pub fn contains(&self, action: PacketAction) -> bool {
        match action {
            PacketAction::Drop => self.drop,
            PacketAction::Alert => self.alert,
            PacketAction::Reset => self.reset,
            PacketAction::BadPacket => self.bad_packet,
        }
    }

    /// Packet must not be passed on for inspection
    pub fn is_blocking(&self) -> bool {
        self.drop || self.bad_packet
    }

    pub fn is_empty(&self) -> bool {
        !(self.drop || self.alert || self.reset || self.bad_packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_accumulates() {
        let mut tel = Telemetry::new();
        assert!(tel.is_empty());
        tel.set_tcp_event(StreamEvent::BadRst);
        tel.set_tcp_event(StreamEvent::BadRst);
        tel.set_tcp_event(StreamEvent::WindowSlam);
        assert_eq!(tel.count(StreamEvent::BadRst), 2);
        assert!(tel.has_event(StreamEvent::WindowSlam));
        assert_eq!(
            tel.drain(),
            vec![(StreamEvent::BadRst, 2), (StreamEvent::WindowSlam, 1)]
        );
        assert!(tel.is_empty());
    }

    #[test]
    fn test_event_table_order() {
        for (i, event) in StreamEvent::ALL.iter().enumerate() {
            assert_eq!(event.index(), i);
        }
    }

    #[test]
    fn test_counts_saturate() {
        let mut tel = Telemetry::new();
        tel.counts[StreamEvent::BadRst.index()] = u32::MAX - 1;
        tel.set_tcp_event(StreamEvent::BadRst);
        tel.set_tcp_event(StreamEvent::BadRst);
        assert_eq!(tel.count(StreamEvent::BadRst), u32::MAX);
        assert_eq!(tel.events().count(), 1);
    }

    #[test]
    fn test_packet_actions() {
        let mut actions = PacketActions::default();
        assert!(actions.is_empty());
        actions.set(PacketAction::Reset);
        assert!(!actions.is_blocking());
        actions.set(PacketAction::BadPacket);
        assert!(actions.is_blocking());
        assert!(actions.contains(PacketAction::Reset));
        assert!(!actions.contains(PacketAction::Drop));
    }
}
