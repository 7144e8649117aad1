use crate::segment::SegmentDescriptor;
use crate::state::TcpState;

use super::{common, no_action, Ctx, StateHandler};

/// Peer's FIN received; this endpoint may still send
pub struct CloseWaitHandler;

impl StateHandler for CloseWaitHandler {
    fn state(&self) -> TcpState {
        TcpState::CloseWait
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
        common::data_after_fin(tsd, ctx)
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_on_fin_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::LastAck);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        // retransmitted peer FIN
        ctx.trk.update_tracker_ack_recv(tsd);
        true
    }

    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::rst_recv(tsd, ctx)
    }
}
