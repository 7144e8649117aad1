use crate::segment::SegmentDescriptor;
use crate::state::TcpState;

use super::{common, no_action, Ctx, StateHandler};

pub struct EstablishedHandler;

impl StateHandler for EstablishedHandler {
    fn state(&self) -> TcpState {
        TcpState::Established
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.check_for_repeated_syn(tsd);
        true
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::late_syn_recv(tsd, ctx)
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if ctx.session.is_midstream() {
            ctx.trk.update_tracker_ack_sent(tsd);
        } else {
            ctx.check_for_repeated_syn(tsd);
        }
        true
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if ctx.session.is_midstream() {
            ctx.trk.update_tracker_ack_recv(tsd);
        }
        if tsd.has_payload() {
            ctx.handle_data_on_syn(tsd);
        }
        true
    }

    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_recv(tsd);
        true
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_recv(tsd);
        ctx.handle_data_segment(tsd);
        true
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_on_fin_sent(tsd);
        ctx.session.update_perf_base_state(TcpState::Closing);
        ctx.trk.set_tcp_state(TcpState::FinWait1);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_recv(tsd);
        ctx.handle_data_segment(tsd);
        if ctx.trk.update_on_fin_recv(tsd) {
            ctx.session.update_perf_base_state(TcpState::Closing);
            ctx.trk.set_tcp_state(TcpState::CloseWait);
        }
        true
    }

    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::rst_recv(tsd, ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::normalizer::{OsPolicy, PolicyNormalizer};
    use crate::segment::{FlowFacts, TcpFlags};
    use crate::state::TcpState;
    use crate::telemetry::StreamEvent;
    use crate::testutil::{client_seg, server_seg, Harness};

    #[test]
    fn test_data_both_directions() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        let request = [1u8; 40];
        let response = [2u8; 200];
        h.send(&client_seg(&flow, 101, 501, TcpFlags::psh_ack()).with_payload(&request));
        h.send(&server_seg(&flow, 501, 141, TcpFlags::psh_ack()).with_payload(&response));
        h.send(&client_seg(&flow, 141, 701, TcpFlags::ack()));

        assert_eq!(h.session.client().snd_una(), 141);
        assert_eq!(h.session.server().snd_una(), 701);
        assert_eq!(h.session.client().r_nxt_ack(), 701);
        assert_eq!(h.session.server().r_nxt_ack(), 141);
        assert_eq!(h.reassembler.queued.len(), 2);
    }

    #[test]
    fn test_repeated_syn_on_established() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        h.send(&client_seg(&flow, 100, 0, TcpFlags::syn()));
        assert!(h.session.core().tel.has_event(StreamEvent::SynOnEstablished));
        assert_eq!(h.session.client().state(), TcpState::Established);
    }

    #[test]
    fn test_repeated_syn_new_isn_dropped_inline() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::inline(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        let verdict = h.send(&client_seg(&flow, 31337, 0, TcpFlags::syn()));
        assert!(verdict.actions.bad_packet);
        assert!(h.session.core().tel.has_event(StreamEvent::SynOnEstablished));
    }

    #[test]
    fn test_fin_starts_teardown() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);

        h.send(&client_seg(&flow, 101, 501, TcpFlags::fin_ack()));
        assert_eq!(h.session.client().state(), TcpState::FinWait1);
        assert_eq!(h.session.client().snd_nxt(), 102);
        assert_eq!(h.session.server().state(), TcpState::CloseWait);
        assert_eq!(h.session.server().fin_final_seq(), 101);
        assert_eq!(h.session.core().perf_base_state(), TcpState::Closing);
    }
}
