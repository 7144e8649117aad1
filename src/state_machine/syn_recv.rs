use crate::segment::SegmentDescriptor;
use crate::state::TcpState;

use super::{common, no_action, Ctx, StateHandler};

/// Server side after receiving the SYN, waiting for the final ACK
pub struct SynRecvHandler;

impl SynRecvHandler {
    /// Final ACK of the handshake received by the server
    fn complete_handshake(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !tsd.flags().ack || !ctx.trk.is_ack_valid(tsd.ack()) {
            return false;
        }
        if !ctx.trk.is_send_initialized() {
            // SYN-ACK not observed; the ACK tells us where it ended
            ctx.trk.set_iss(tsd.ack().wrapping_sub(1));
            ctx.trk.set_snd_una(tsd.ack());
            ctx.trk.set_snd_nxt(tsd.ack());
        }
        ctx.trk.update_tracker_ack_recv(tsd);
        ctx.session.set_established();
        ctx.session.update_perf_base_state(TcpState::Established);
        ctx.trk.set_tcp_state(TcpState::Established);
        true
    }
}

impl StateHandler for SynRecvHandler {
    fn state(&self) -> TcpState {
        TcpState::SynRecv
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        // the receive side stays anchored to the first SYN
        common::late_syn_recv(tsd, ctx)
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.finish_server_init(tsd);
        ctx.ecn_tracker(tsd);
        ctx.session.update_perf_base_state(TcpState::SynRecv);
        true
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
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
        Self::complete_handshake(tsd, ctx);
        true
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if Self::complete_handshake(tsd, ctx) {
            ctx.handle_data_segment(tsd);
        }
        true
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_on_fin_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::FinWait1);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if Self::complete_handshake(tsd, ctx) {
            ctx.handle_data_segment(tsd);
            if ctx.trk.update_on_fin_recv(tsd) {
                ctx.trk.set_tcp_state(TcpState::CloseWait);
            }
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
    use crate::testutil::{client_seg, server_seg, Harness};

    #[test]
    fn test_invalid_final_ack_keeps_state() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.send(&client_seg(&flow, 100, 0, TcpFlags::syn()));
        h.send(&server_seg(&flow, 500, 101, TcpFlags::syn_ack()));

        h.send(&client_seg(&flow, 101, 9999, TcpFlags::ack()));
        assert_eq!(h.session.server().state(), TcpState::SynRecv);
        assert!(!h.session.core().is_established());
    }

    #[test]
    fn test_data_completes_handshake() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.send(&client_seg(&flow, 100, 0, TcpFlags::syn()));
        h.send(&server_seg(&flow, 500, 101, TcpFlags::syn_ack()));

        let data = *b"GET / HTTP/1.1\r\n";
        h.send(&client_seg(&flow, 101, 501, TcpFlags::psh_ack()).with_payload(&data));
        assert_eq!(h.session.server().state(), TcpState::Established);
        assert_eq!(h.session.server().r_nxt_ack(), 101 + data.len() as u32);
        assert_eq!(h.reassembler.queued.len(), 1);
    }

    #[test]
    fn test_syn_ack_not_observed() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.send(&client_seg(&flow, 100, 0, TcpFlags::syn()));
        h.send(&client_seg(&flow, 101, 501, TcpFlags::ack()));

        assert_eq!(h.session.server().state(), TcpState::Established);
        assert_eq!(h.session.server().iss(), 500);
        assert_eq!(h.session.server().snd_nxt(), 501);
    }
}
