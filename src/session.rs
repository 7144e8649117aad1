//! TCP session: the pair of trackers plus session-wide state
//!
//! [`TcpSession`] owns the client and server [`StreamTracker`]s and the
//! [`SessionCore`] they share. Collaborators that live outside the session
//! (normalizer, reassembly, counters) are lent per call through
//! [`StreamEnv`], so a session never holds references into its owner.
//!
//! While a handler runs it sees the session through a [`TrackerCtx`]: the
//! tracker being driven, its peer, the shared core and the environment.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::StreamConfig;
use crate::normalizer::{NormAnomaly, Normalizer, OsPolicy, PawsVerdict, PAWS_24DAYS};
use crate::segment::SegmentDescriptor;
use crate::seq::{seq_geq, seq_leq};
use crate::state::TcpState;
use crate::state_machine::StateMachine;
use crate::stats::StreamStats;
use crate::telemetry::{PacketAction, PacketActions, StreamEvent, Telemetry};
use crate::tracker::{StreamTracker, TrackerFlag, TrackerRole};

/// Windows at or below this on the handshake ACK count as a slam
pub const SLAM_MAX: u16 = 4;

/// Downstream reassembly, keyed by the endpoint that receives the data
pub trait Reassembler {
    /// Queue payload carried by `tsd` for delivery to `receiver`
    fn queue_segment(&mut self, receiver: TrackerRole, tsd: &SegmentDescriptor<'_>);

    /// Deliver everything queued for `receiver` now
    fn flush(&mut self, receiver: TrackerRole);
}

/// Reassembler that discards everything, for callers that only want
/// state tracking
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReassembler;

impl Reassembler for NullReassembler {
    fn queue_segment(&mut self, _receiver: TrackerRole, _tsd: &SegmentDescriptor<'_>) {}

    fn flush(&mut self, _receiver: TrackerRole) {}
}

/// Collaborators lent to a session for one call
pub struct StreamEnv<'e> {
    pub normalizer: &'e dyn Normalizer,
    pub reassembler: &'e mut dyn Reassembler,
    pub stats: &'e mut StreamStats,
}

impl<'e> StreamEnv<'e> {
    pub fn new(
        normalizer: &'e dyn Normalizer,
        reassembler: &'e mut dyn Reassembler,
        stats: &'e mut StreamStats,
    ) -> Self {
        Self {
            normalizer,
            reassembler,
            stats,
        }
    }
}

/// Session-wide state shared by both trackers
#[derive(Debug, Clone)]
pub struct SessionCore {
    config: Arc<StreamConfig>,
    pub tel: Telemetry,
    pkt_actions: PacketActions,
    ecn: bool,
    perf_base_state: TcpState,
    established: bool,
    midstream: bool,
    reset: bool,
}

impl SessionCore {
    pub fn new(config: Arc<StreamConfig>) -> Self {
        Self {
            config,
            tel: Telemetry::new(),
            pkt_actions: PacketActions::default(),
            ecn: false,
            perf_base_state: TcpState::Listen,
            established: false,
            midstream: false,
            reset: false,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn set_pkt_action_flag(&mut self, action: PacketAction) {
        self.pkt_actions.set(action);
    }

    pub fn pkt_actions(&self) -> PacketActions {
        self.pkt_actions
    }

    pub fn is_bad_packet(&self) -> bool {
        self.pkt_actions.bad_packet
    }

    /// Coarse lifecycle state used for performance accounting
    pub fn update_perf_base_state(&mut self, state: TcpState) {
        if self.perf_base_state != state {
            trace!(from = %self.perf_base_state, to = %state, "perf base state");
            self.perf_base_state = state;
        }
    }

    pub fn perf_base_state(&self) -> TcpState {
        self.perf_base_state
    }

    pub fn is_ecn(&self) -> bool {
        self.ecn
    }

    pub fn set_established(&mut self) {
        self.established = true;
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn is_midstream(&self) -> bool {
        self.midstream
    }

    pub fn is_reset(&self) -> bool {
        self.reset
    }

    fn begin_packet(&mut self) {
        self.pkt_actions = PacketActions::default();
    }
}

/// Per-dispatch view of a session from one tracker's side
pub struct TrackerCtx<'a, 'e> {
    pub trk: &'a mut StreamTracker,
    pub peer: &'a mut StreamTracker,
    pub session: &'a mut SessionCore,
    pub env: &'a mut StreamEnv<'e>,
}

impl<'a, 'e> TrackerCtx<'a, 'e> {
    pub fn new(
        trk: &'a mut StreamTracker,
        peer: &'a mut StreamTracker,
        session: &'a mut SessionCore,
        env: &'a mut StreamEnv<'e>,
    ) -> Self {
        Self {
            trk,
            peer,
            session,
            env,
        }
    }

    /// Record an anomaly that the normalizer may turn into a drop.
    /// Returns true when the packet was marked bad.
    fn discard(&mut self, tsd: &SegmentDescriptor<'_>, event: StreamEvent, anomaly: NormAnomaly) -> bool {
        self.session.tel.set_tcp_event(event);
        self.env.stats.inc_tcp_discards();
        if self.env.normalizer.packet_dropper(tsd, anomaly) {
            self.env.stats.normalizer_drops += 1;
            self.session.set_pkt_action_flag(PacketAction::BadPacket);
            return true;
        }
        false
    }

    /// Queue payload received by this tracker for reassembly
    pub fn handle_data_segment(&mut self, tsd: &SegmentDescriptor<'_>) {
        if !tsd.has_payload() {
            return;
        }
        trace!(
            receiver = %self.trk.role(),
            seq = tsd.seq(),
            len = tsd.seg_len(),
            "queue segment"
        );
        self.env.reassembler.queue_segment(self.trk.role(), tsd);
    }

    /// Payload on a SYN or SYN-ACK received by this tracker
    pub fn handle_data_on_syn(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.env.stats.data_on_syn += 1;
        // MacOS delivers SYN payload to the application
        if self.env.normalizer.os_policy() == OsPolicy::MacOs {
            self.handle_data_segment(tsd);
        } else {
            self.session.tel.set_tcp_event(StreamEvent::DataOnSyn);
            self.session.set_pkt_action_flag(PacketAction::BadPacket);
        }
    }

    /// Track ECN negotiation from a handshake segment
    pub fn ecn_tracker(&mut self, tsd: &SegmentDescriptor<'_>) {
        let require_3whs = self.session.config.require_3whs;
        self.session.ecn = self.env.normalizer.ecn_tracker(tsd, require_3whs, self.session.ecn);
    }

    /// ECN bits on a session that never negotiated ECN
    pub fn check_ecn(&mut self, tsd: &SegmentDescriptor<'_>) {
        let flags = tsd.flags();
        if flags.syn || self.session.is_ecn() || !(flags.ece || flags.cwr) {
            return;
        }
        if self.env.normalizer.packet_dropper(tsd, NormAnomaly::Ecn) {
            trace!(flags = %flags, "ECN bits without negotiation");
            self.env.stats.normalizer_drops += 1;
            self.session.set_pkt_action_flag(PacketAction::BadPacket);
        }
    }

    /// SYN sent by this tracker after its handshake
    pub fn check_for_repeated_syn(&mut self, tsd: &SegmentDescriptor<'_>) {
        if tsd.seq() != self.trk.iss() && self.env.normalizer.packet_dropper(tsd, NormAnomaly::Block) {
            self.session.tel.set_tcp_event(StreamEvent::SynOnEstablished);
            self.session.set_pkt_action_flag(PacketAction::BadPacket);
            self.env.stats.normalizer_drops += 1;
        } else if self.trk.state().is_synchronized() && self.trk.state() != TcpState::Closed {
            self.session.tel.set_tcp_event(StreamEvent::SynOnEstablished);
        }
    }

    /// A valid RST closed this tracker; close the peer as well
    pub fn update_session_on_rst(&mut self, flush: bool) {
        if flush {
            self.trk.set_tf_flags(TrackerFlag::ForceFlush);
            self.peer.set_tf_flags(TrackerFlag::ForceFlush);
        }
        self.peer.set_tcp_state(TcpState::Closed);
        self.session.reset = true;
        self.env.stats.sessions_reset += 1;
        debug!(receiver = %self.trk.role(), "session reset");
    }

    /// Start tracking without a handshake. Returns false when the
    /// configuration requires one.
    pub fn allow_midstream(&mut self) -> bool {
        if self.session.config.require_3whs {
            self.session.tel.set_tcp_event(StreamEvent::NoHandshake);
            return false;
        }
        if !self.session.midstream {
            self.session.midstream = true;
            self.env.stats.midstream_pickups += 1;
            debug!(role = %self.trk.role(), "midstream pickup");
        }
        self.session.set_established();
        true
    }

    /// Pre-dispatch checks on the sending tracker: PAWS and stale
    /// sequence space. Returns false when the segment must not be
    /// dispatched.
    pub fn validate_packet_established_session(&mut self, tsd: &SegmentDescriptor<'_>) -> bool {
        if let Some(ts) = tsd.timestamp() {
            let ts_last = self.trk.ts_last();
            let zero_ts = ts.tsval == 0 && ts_last != 0 && self.session.config.paws_drop_zero_ts;
            let verdict = self.env.normalizer.validate_paws(tsd, ts_last, self.trk.ts_last_packet());
            if zero_ts || verdict == PawsVerdict::Stale {
                self.env.stats.paws_failures += 1;
                self.discard(tsd, StreamEvent::BadTimestamp, NormAnomaly::Paws);
            }
        }

        if self.trk.state().is_synchronized()
            && self.trk.is_send_initialized()
            && !tsd.flags().rst
            && !tsd.flags().syn
            && tsd.end_seq() != tsd.seq()
            && seq_leq(tsd.end_seq(), self.trk.snd_una())
        {
            trace!(
                role = %self.trk.role(),
                end_seq = tsd.end_seq(),
                snd_una = self.trk.snd_una(),
                "stale segment"
            );
            self.session.tel.set_tcp_event(StreamEvent::StaleSegment);
            self.env.stats.stale_segments += 1;
            return false;
        }

        !self.session.is_bad_packet()
    }

    /// Remember the newest timestamp from the peer (the segment's sender)
    pub fn update_paws_timestamps(&mut self, tsd: &SegmentDescriptor<'_>) {
        let ts = match tsd.timestamp() {
            Some(ts) => ts,
            None => return,
        };
        if self.session.is_bad_packet() {
            return;
        }
        let ts_last = self.peer.ts_last();
        let idle = tsd.pkt_time() >= self.peer.ts_last_packet().saturating_add(PAWS_24DAYS);
        if ts_last == 0 || seq_geq(ts.tsval, ts_last) || idle {
            self.peer.set_ts_last(ts.tsval, tsd.pkt_time());
        }
    }

    /// Session-level window checks on a segment received by this tracker
    pub fn check_for_window_slam(&mut self, tsd: &SegmentDescriptor<'_>) {
        let max_window = self.session.config.max_window;
        let window = self.peer.scaled_window(tsd);

        if max_window != 0 && window > max_window {
            debug!(window, max_window, "window too large");
            self.discard(tsd, StreamEvent::WindowTooLarge, NormAnomaly::Block);
        } else if tsd.is_from_client()
            && tsd.flags().ack
            && tsd.window() <= SLAM_MAX
            && self.trk.is_send_initialized()
            && tsd.ack() == self.trk.iss().wrapping_add(1)
            && !(tsd.flags().fin || tsd.flags().rst)
            && !self.session.midstream
        {
            debug!(window = tsd.window(), "window slam on handshake ACK");
            self.env.stats.window_slams += 1;
            self.discard(tsd, StreamEvent::WindowSlam, NormAnomaly::Block);
        }
    }

    pub(crate) fn mark_window_slam(&mut self, tsd: &SegmentDescriptor<'_>) -> bool {
        self.env.stats.window_slams += 1;
        self.discard(tsd, StreamEvent::WindowSlam, NormAnomaly::Block)
    }
}

/// Outcome of processing one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentVerdict {
    /// The segment passed validation and reached the state handlers
    pub processed: bool,
    /// Actions requested for the packet
    pub actions: PacketActions,
}

impl SegmentVerdict {
    pub fn is_blocking(&self) -> bool {
        self.actions.is_blocking()
    }
}

/// TCP session between a client and a server
#[derive(Debug, Clone)]
pub struct TcpSession {
    client: StreamTracker,
    server: StreamTracker,
    core: SessionCore,
}

impl TcpSession {
    pub fn new(config: Arc<StreamConfig>) -> Self {
        Self {
            client: StreamTracker::new(TrackerRole::Client),
            server: StreamTracker::new(TrackerRole::Server),
            core: SessionCore::new(config),
        }
    }

    pub fn client(&self) -> &StreamTracker {
        &self.client
    }

    pub fn server(&self) -> &StreamTracker {
        &self.server
    }

    pub fn client_mut(&mut self) -> &mut StreamTracker {
        &mut self.client
    }

    pub fn server_mut(&mut self) -> &mut StreamTracker {
        &mut self.server
    }

    pub fn tracker(&self, role: TrackerRole) -> &StreamTracker {
        match role {
            TrackerRole::Client => &self.client,
            TrackerRole::Server => &self.server,
        }
    }

    pub fn core(&self) -> &SessionCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    /// Run one segment through the state machine
    pub fn process_segment(
        &mut self,
        tsd: &SegmentDescriptor<'_>,
        machine: &StateMachine,
        env: &mut StreamEnv<'_>,
    ) -> SegmentVerdict {
        self.core.begin_packet();

        let (talker, listener) = if tsd.is_from_client() {
            (&mut self.client, &mut self.server)
        } else {
            (&mut self.server, &mut self.client)
        };

        let processed = machine.eval(tsd, talker, listener, &mut self.core, env);

        for trk in [&mut self.client, &mut self.server] {
            if trk.has_tf_flag(TrackerFlag::ForceFlush) {
                debug!(receiver = %trk.role(), "forced flush");
                env.reassembler.flush(trk.role());
                env.stats.forced_flushes += 1;
                trk.clear_tf_flags(TrackerFlag::ForceFlush);
            }
        }

        SegmentVerdict {
            processed,
            actions: self.core.pkt_actions(),
        }
    }

    /// Tear the session down from outside (flow expiry, eviction)
    pub fn close(&mut self, env: &mut StreamEnv<'_>) {
        for trk in [&mut self.client, &mut self.server] {
            if trk.state() != TcpState::Closed {
                trk.force_state(TcpState::Closed);
                env.stats.record_transition(TcpState::Closed);
            }
            env.reassembler.flush(trk.role());
        }
        self.core.update_perf_base_state(TcpState::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.client.state() == TcpState::Closed && self.server.state() == TcpState::Closed
    }
}
