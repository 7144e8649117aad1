use crate::segment::SegmentDescriptor;
use crate::state::TcpState;

use super::{common, no_action, Ctx, StateHandler};

/// Both FINs sent, ours not yet acknowledged.
///
/// FIN_WAIT1 goes straight to TIME_WAIT on the peer's FIN, so trackers only
/// sit here when placed in the state from outside the machine.
pub struct ClosingHandler;

impl StateHandler for ClosingHandler {
    fn state(&self) -> TcpState {
        TcpState::Closing
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.check_for_repeated_syn(tsd);
        true
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::late_syn_recv(tsd, ctx)
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::ack_of_fin(tsd, ctx, TcpState::TimeWait)
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::data_after_fin(tsd, ctx);
        common::ack_of_fin(tsd, ctx, TcpState::TimeWait)
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_on_fin_sent(tsd);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::ack_of_fin(tsd, ctx, TcpState::TimeWait)
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
    fn test_ack_of_fin_enters_time_wait() {
        let flow = FlowFacts::two_way();
        let mut h = Harness::new(PolicyNormalizer::passive(OsPolicy::Linux));
        h.handshake(&flow, 100, 500);
        h.send(&client_seg(&flow, 101, 501, TcpFlags::fin_ack()));
        h.session.client_mut().force_state(TcpState::Closing);

        // ACK that does not cover the FIN
        h.send(&server_seg(&flow, 501, 101, TcpFlags::ack()));
        assert_eq!(h.session.client().state(), TcpState::Closing);

        h.send(&server_seg(&flow, 501, 102, TcpFlags::ack()));
        assert_eq!(h.session.client().state(), TcpState::TimeWait);
    }
}
