//! Shared fixtures for unit tests

use std::sync::Arc;

use crate::config::StreamConfig;
use crate::normalizer::PolicyNormalizer;
use crate::segment::{FlowFacts, PacketDirection, SegmentDescriptor, TcpFlags};
use crate::session::{Reassembler, SegmentVerdict, StreamEnv, TcpSession};
use crate::state::TcpState;
use crate::state_machine::StateMachine;
use crate::stats::StreamStats;
use crate::tracker::TrackerRole;

/// Records reassembly requests as `(receiver, seq, len)`
#[derive(Debug, Default)]
pub(crate) struct RecordingReassembler {
    pub queued: Vec<(TrackerRole, u32, u32)>,
    pub flushes: Vec<TrackerRole>,
}

impl Reassembler for RecordingReassembler {
    fn queue_segment(&mut self, receiver: TrackerRole, tsd: &SegmentDescriptor<'_>) {
        self.queued.push((receiver, tsd.seq(), tsd.seg_len()));
    }

    fn flush(&mut self, receiver: TrackerRole) {
        self.flushes.push(receiver);
    }
}

pub(crate) fn client_seg(flow: &FlowFacts, seq: u32, ack: u32, flags: TcpFlags) -> SegmentDescriptor<'_> {
    SegmentDescriptor::new(flow, PacketDirection::FromClient, seq, ack, flags).with_window(65535)
}

pub(crate) fn server_seg(flow: &FlowFacts, seq: u32, ack: u32, flags: TcpFlags) -> SegmentDescriptor<'_> {
    SegmentDescriptor::new(flow, PacketDirection::FromServer, seq, ack, flags).with_window(65535)
}

/// One session plus everything it needs to process segments
pub(crate) struct Harness {
    pub normalizer: PolicyNormalizer,
    pub reassembler: RecordingReassembler,
    pub stats: StreamStats,
    pub machine: StateMachine,
    pub session: TcpSession,
}

impl Harness {
    pub fn new(normalizer: PolicyNormalizer) -> Self {
        Self::with_config(normalizer, StreamConfig::default())
    }

    pub fn with_config(normalizer: PolicyNormalizer, config: StreamConfig) -> Self {
        Self {
            normalizer,
            reassembler: RecordingReassembler::default(),
            stats: StreamStats::new(),
            machine: StateMachine::new(),
            session: TcpSession::new(Arc::new(config)),
        }
    }

    pub fn send(&mut self, tsd: &SegmentDescriptor<'_>) -> SegmentVerdict {
        let mut env = StreamEnv::new(&self.normalizer, &mut self.reassembler, &mut self.stats);
        self.session.process_segment(tsd, &self.machine, &mut env)
    }

    /// SYN, SYN-ACK, ACK with the given initial sequence numbers
    pub fn handshake(&mut self, flow: &FlowFacts, client_isn: u32, server_isn: u32) {
        let c = client_isn.wrapping_add(1);
        let s = server_isn.wrapping_add(1);
        self.send(&client_seg(flow, client_isn, 0, TcpFlags::syn()));
        self.send(&server_seg(flow, server_isn, c, TcpFlags::syn_ack()));
        self.send(&client_seg(flow, c, s, TcpFlags::ack()));
        assert_eq!(self.session.client().state(), TcpState::Established);
        assert_eq!(self.session.server().state(), TcpState::Established);
    }
}
