use crate::segment::SegmentDescriptor;
use crate::state::TcpState;
use crate::telemetry::PacketAction;

use super::{common, no_action, Ctx, StateHandler};

/// Client side after its SYN, waiting for the SYN-ACK
pub struct SynSentHandler;

impl StateHandler for SynSentHandler {
    fn state(&self) -> TcpState {
        TcpState::SynSent
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.check_for_repeated_syn(tsd);
        true
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        // simultaneous open
        ctx.trk.finish_client_init(tsd);
        ctx.trk.set_tcp_state(TcpState::SynRecv);
        if tsd.has_payload() {
            ctx.handle_data_on_syn(tsd);
        }
        true
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.trk.update_on_3whs_ack(tsd) {
            ctx.session.set_pkt_action_flag(PacketAction::BadPacket);
            return true;
        }
        if tsd.wscale().is_some() && ctx.trk.wscale() != 0 {
            ctx.trk.negotiate_wscale();
            ctx.peer.negotiate_wscale();
        }
        ctx.ecn_tracker(tsd);
        if tsd.has_payload() {
            ctx.handle_data_on_syn(tsd);
        }
        true
    }

    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        // handshake completed without the SYN-ACK being observed
        ctx.trk.update_tracker_ack_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::Established);
        true
    }

    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::Established);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_on_fin_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::FinWait1);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::rst_recv(tsd, ctx)
    }
}
