use crate::segment::SegmentDescriptor;
use crate::state::TcpState;

use super::{common, no_action, Ctx, StateHandler};

/// Tracker with nothing observed yet. Handshake segments start normal
/// tracking; anything else is a midstream pickup when allowed.
pub struct ListenHandler;

impl StateHandler for ListenHandler {
    fn state(&self) -> TcpState {
        TcpState::Listen
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.init_on_syn_sent(tsd);
        ctx.ecn_tracker(tsd);
        ctx.session.update_perf_base_state(TcpState::SynSent);
        true
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.init_on_syn_recv(tsd);
        ctx.ecn_tracker(tsd);
        if tsd.has_payload() {
            ctx.handle_data_on_syn(tsd);
        }
        true
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if ctx.session.config().require_3whs {
            ctx.session.tel.set_tcp_event(crate::telemetry::StreamEvent::NoHandshake);
            return false;
        }
        ctx.trk.init_on_synack_sent(tsd);
        ctx.ecn_tracker(tsd);
        ctx.session.update_perf_base_state(TcpState::SynRecv);
        true
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if ctx.session.config().require_3whs {
            return false;
        }
        ctx.trk.init_on_synack_recv(tsd);
        if tsd.has_payload() {
            ctx.handle_data_on_syn(tsd);
        }
        true
    }

    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_3whs_ack_sent(tsd);
        ctx.session.update_perf_base_state(TcpState::Established);
        true
    }

    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_3whs_ack_recv(tsd);
        true
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_data_seg_sent(tsd);
        ctx.session.update_perf_base_state(TcpState::Established);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_data_seg_recv(tsd);
        ctx.handle_data_segment(tsd);
        true
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_data_seg_sent(tsd);
        ctx.trk.set_tcp_state(TcpState::FinWait1);
        ctx.session.update_perf_base_state(TcpState::Closing);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if !ctx.allow_midstream() {
            return false;
        }
        ctx.trk.init_on_data_seg_recv(tsd);
        ctx.handle_data_segment(tsd);
        ctx.trk.update_on_fin_recv(tsd);
        ctx.trk.set_tcp_state(TcpState::CloseWait);
        true
    }

    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::rst_recv(tsd, ctx)
    }
}
