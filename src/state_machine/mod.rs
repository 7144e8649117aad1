//! Per-state event dispatch
//!
//! Each TCP state has a handler implementing [`StateHandler`]. For every
//! segment the machine:
//!
//! 1. runs the pre-dispatch checks against the sending tracker (talker)
//! 2. dispatches the "sent" event to the talker's current state handler
//! 3. if the talker accepted it, dispatches the "recv" event to the
//!    receiving tracker (listener)
//! 4. runs the post-dispatch session checks
//!
//! Handlers request transitions with `set_tcp_state`; the request is
//! applied after the handler returns, in [`StateMachine::default_state_action`].

mod close_wait;
mod closed;
mod closing;
mod common;
mod established;
mod fin_wait1;
mod fin_wait2;
mod last_ack;
mod listen;
mod syn_recv;
mod syn_sent;
mod time_wait;

pub use close_wait::CloseWaitHandler;
pub use closed::ClosedHandler;
pub use closing::ClosingHandler;
pub use established::EstablishedHandler;
pub use fin_wait1::FinWait1Handler;
pub use fin_wait2::FinWait2Handler;
pub use last_ack::LastAckHandler;
pub use listen::ListenHandler;
pub use syn_recv::SynRecvHandler;
pub use syn_sent::SynSentHandler;
pub use time_wait::TimeWaitHandler;

use tracing::{debug, trace};

use crate::event::TcpEvent;
use crate::segment::SegmentDescriptor;
use crate::session::{SessionCore, StreamEnv, TrackerCtx};
use crate::state::TcpState;
use crate::tracker::StreamTracker;

pub type Ctx<'a, 'b, 'e> = &'a mut TrackerCtx<'b, 'e>;

/// Event handlers for one TCP state.
///
/// Every handler returns whether the segment may continue through the
/// machine; `false` stops the listener from seeing it.
pub trait StateHandler: Send + Sync {
    /// State this handler serves
    fn state(&self) -> TcpState;

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;
    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool;

    /// Route an event to its handler
    fn eval(&self, event: TcpEvent, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        match event {
            TcpEvent::SynSent => self.syn_sent(tsd, ctx),
            TcpEvent::SynRecv => self.syn_recv(tsd, ctx),
            TcpEvent::SynAckSent => self.syn_ack_sent(tsd, ctx),
            TcpEvent::SynAckRecv => self.syn_ack_recv(tsd, ctx),
            TcpEvent::AckSent => self.ack_sent(tsd, ctx),
            TcpEvent::AckRecv => self.ack_recv(tsd, ctx),
            TcpEvent::DataSegSent => self.data_seg_sent(tsd, ctx),
            TcpEvent::DataSegRecv => self.data_seg_recv(tsd, ctx),
            TcpEvent::FinSent => self.fin_sent(tsd, ctx),
            TcpEvent::FinRecv => self.fin_recv(tsd, ctx),
            TcpEvent::RstSent => self.rst_sent(tsd, ctx),
            TcpEvent::RstRecv => self.rst_recv(tsd, ctx),
        }
    }
}

/// Explicit "nothing to do" for events a state ignores
pub fn no_action(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    trace!(
        role = %ctx.trk.role(),
        state = %ctx.trk.state(),
        flags = %tsd.flags(),
        "no action"
    );
    true
}

fn handler_for(state: TcpState) -> Box<dyn StateHandler> {
    match state {
        TcpState::Listen => Box::new(ListenHandler),
        TcpState::SynSent => Box::new(SynSentHandler),
        TcpState::SynRecv => Box::new(SynRecvHandler),
        TcpState::Established => Box::new(EstablishedHandler),
        TcpState::FinWait1 => Box::new(FinWait1Handler),
        TcpState::FinWait2 => Box::new(FinWait2Handler),
        TcpState::CloseWait => Box::new(CloseWaitHandler),
        TcpState::Closing => Box::new(ClosingHandler),
        TcpState::LastAck => Box::new(LastAckHandler),
        TcpState::TimeWait => Box::new(TimeWaitHandler),
        TcpState::Closed => Box::new(ClosedHandler),
    }
}

/// Handler table plus the dispatch loop. Stateless, so one instance can be
/// shared by every session on a worker.
pub struct StateMachine {
    handlers: [Box<dyn StateHandler>; TcpState::COUNT],
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            handlers: TcpState::ALL.map(handler_for),
        }
    }

    pub fn handler(&self, state: TcpState) -> &dyn StateHandler {
        self.handlers[state.index()].as_ref()
    }

    /// Drive one segment through both trackers. Returns whether the talker
    /// accepted it.
    pub fn eval(
        &self,
        tsd: &SegmentDescriptor<'_>,
        talker: &mut StreamTracker,
        listener: &mut StreamTracker,
        session: &mut SessionCore,
        env: &mut StreamEnv<'_>,
    ) -> bool {
        env.stats.segments += 1;
        let talker_event = TcpEvent::classify(tsd, true);
        let listener_event = TcpEvent::classify(tsd, false);

        let handled = {
            let mut ctx = TrackerCtx::new(&mut *talker, &mut *listener, &mut *session, &mut *env);
            if !Self::do_pre_sm_packet_actions(tsd, &mut ctx) {
                ctx.env.stats.rejected += 1;
                return false;
            }
            self.dispatch(talker_event, tsd, &mut ctx)
        };

        let mut ctx = TrackerCtx::new(listener, talker, session, env);
        if handled {
            self.dispatch(listener_event, tsd, &mut ctx);
        }
        Self::do_post_sm_packet_actions(tsd, &mut ctx);

        handled
    }

    /// Run one event through the handler for the tracker's current state
    pub fn dispatch(&self, event: TcpEvent, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        let state = ctx.trk.state();
        ctx.trk.set_tcp_event(event);
        trace!(role = %ctx.trk.role(), state = %state, event = %event, "dispatch");

        let handled = self.handler(state).eval(event, tsd, &mut *ctx);
        Self::default_state_action(ctx, handled)
    }

    /// Apply transitions queued by the handler on either tracker
    pub fn default_state_action(ctx: Ctx<'_, '_, '_>, handled: bool) -> bool {
        for trk in [&mut *ctx.trk, &mut *ctx.peer] {
            if let Some((from, to)) = trk.apply_pending_state() {
                debug!(role = %trk.role(), from = %from, to = %to, "state transition");
                ctx.env.stats.record_transition(to);
            }
        }
        handled
    }

    fn do_pre_sm_packet_actions(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.validate_packet_established_session(tsd)
    }

    fn do_post_sm_packet_actions(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) {
        ctx.update_paws_timestamps(tsd);
        ctx.check_for_window_slam(tsd);
        ctx.check_ecn(tsd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{OsPolicy, PolicyNormalizer};
    use crate::segment::{FlowFacts, PacketDirection, TcpFlags};
    use crate::testutil::{client_seg, server_seg, Harness};

    #[test]
    fn test_handler_table_matches_states() {
        let machine = StateMachine::new();
        for state in TcpState::ALL {
            assert_eq!(machine.handler(state).state(), state);
        }
    }

    #[test]
    fn test_three_way_handshake() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));

        assert!(h.send(&client_seg(&flow, 100, 0, TcpFlags::syn())).processed);
        assert_eq!(h.session.client().state(), TcpState::SynSent);
        assert_eq!(h.session.server().state(), TcpState::SynRecv);

        assert!(h.send(&server_seg(&flow, 500, 101, TcpFlags::syn_ack())).processed);
        assert_eq!(h.session.client().state(), TcpState::Established);
        assert_eq!(h.session.server().state(), TcpState::SynRecv);

        assert!(h.send(&client_seg(&flow, 101, 501, TcpFlags::ack())).processed);
        assert_eq!(h.session.client().state(), TcpState::Established);
        assert_eq!(h.session.server().state(), TcpState::Established);

        assert_eq!(h.session.client().snd_nxt(), 101);
        assert_eq!(h.session.server().snd_nxt(), 501);
        assert!(h.session.core().is_established());
        assert_eq!(h.stats.segments, 3);
        assert_eq!(h.stats.transitions_to(TcpState::Established), 2);
        assert!(h.session.core().tel.is_empty());
    }

    #[test]
    fn test_bad_syn_ack_marks_packet() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.send(&client_seg(&flow, 100, 0, TcpFlags::syn()));

        let verdict = h.send(&server_seg(&flow, 500, 7777, TcpFlags::syn_ack()));
        assert!(verdict.actions.bad_packet);
        assert_eq!(h.session.client().state(), TcpState::SynSent);
    }

    #[test]
    fn test_talker_rejection_skips_listener() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        let data = [0u8; 10];
        h.send(&client_seg(&flow, 101, 501, TcpFlags::psh_ack()).with_payload(&data));
        h.send(&server_seg(&flow, 501, 111, TcpFlags::ack()));
        assert_eq!(h.reassembler.queued.len(), 1);

        // retransmission of data the server already acknowledged
        let verdict = h.send(&client_seg(&flow, 101, 501, TcpFlags::psh_ack()).with_payload(&data));
        assert!(!verdict.processed);
        assert_eq!(h.reassembler.queued.len(), 1);
        assert_eq!(h.stats.rejected, 1);
        assert_eq!(h.stats.stale_segments, 1);
    }

    #[test]
    fn test_paws_stale_timestamp() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::inline(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        let data = [0u8; 4];
        let fresh = client_seg(&flow, 101, 501, TcpFlags::psh_ack())
            .with_payload(&data)
            .with_timestamp(5000, 0)
            .with_time(10);
        assert!(h.send(&fresh).processed);
        assert_eq!(h.session.client().ts_last(), 5000);

        let old = client_seg(&flow, 105, 501, TcpFlags::psh_ack())
            .with_payload(&data)
            .with_timestamp(4000, 0)
            .with_time(11);
        let verdict = h.send(&old);
        assert!(!verdict.processed);
        assert!(verdict.actions.bad_packet);
        assert!(h.session.core().tel.has_event(crate::telemetry::StreamEvent::BadTimestamp));
        assert_eq!(h.session.client().ts_last(), 5000);
        assert_eq!(h.stats.paws_failures, 1);
    }

    #[test]
    fn test_transition_visible_after_dispatch_only() {
        let flow = FlowFacts::two_way();
        let normalizer = PolicyNormalizer::default();
        let mut reassembler = crate::testutil::RecordingReassembler::default();
        let mut stats = crate::stats::StreamStats::new();
        let mut env = StreamEnv::new(&normalizer, &mut reassembler, &mut stats);
        let mut session = SessionCore::new(std::sync::Arc::new(crate::config::StreamConfig::default()));
        let mut client = StreamTracker::new(crate::tracker::TrackerRole::Client);
        let mut server = StreamTracker::new(crate::tracker::TrackerRole::Server);

        let syn = SegmentDescriptor::new(&flow, PacketDirection::FromClient, 1, 0, TcpFlags::syn());
        let machine = StateMachine::new();
        let mut ctx = TrackerCtx::new(&mut client, &mut server, &mut session, &mut env);

        assert!(machine.handler(TcpState::Listen).syn_sent(&syn, &mut ctx));
        assert_eq!(ctx.trk.state(), TcpState::Listen);
        assert_eq!(ctx.trk.pending_state(), Some(TcpState::SynSent));

        StateMachine::default_state_action(&mut ctx, true);
        assert_eq!(ctx.trk.state(), TcpState::SynSent);
    }
}
