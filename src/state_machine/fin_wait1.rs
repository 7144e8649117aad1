//! FIN_WAIT1: this endpoint has sent its FIN and waits for it to be
//! acknowledged.
//!
//! The ACK of our FIN moves the tracker to FIN_WAIT2, unless the ACK also
//! slams the window shut on a Windows-like host; a FIN from the peer moves
//! it straight to TIME_WAIT (the simultaneous-close CLOSING step is not
//! modelled separately).

use tracing::debug;

use crate::segment::SegmentDescriptor;
use crate::state::TcpState;
use crate::tracker::TrackerFlag;

use super::{common, no_action, Ctx, StateHandler};

pub struct FinWait1Handler;

/// Decide whether an ACK of our FIN completes FIN_WAIT1.
///
/// Returns false only when the segment was a window slam and the
/// normalizer dropped it; the caller must then not deliver its payload.
pub(crate) fn check_for_window_slam(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    if tsd.ack() != ctx.trk.snd_nxt() {
        return true;
    }

    if ctx.env.normalizer.os_policy().is_windows() && tsd.window() == 0 {
        debug!(
            role = %ctx.trk.role(),
            ack = tsd.ack(),
            snd_nxt = ctx.trk.snd_nxt(),
            "zero window on ACK of FIN"
        );
        if ctx.mark_window_slam(tsd) {
            return false;
        }
    }

    ctx.trk.set_tcp_state(TcpState::FinWait2);
    true
}

impl StateHandler for FinWait1Handler {
    fn state(&self) -> TcpState {
        TcpState::FinWait1
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
        check_for_window_slam(tsd, ctx);
        true
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_recv(tsd);
        if check_for_window_slam(tsd, ctx) {
            ctx.handle_data_segment(tsd);
        }
        true
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_sent(tsd);
        true
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        ctx.trk.update_tracker_ack_recv(tsd);
        ctx.trk.update_on_fin_recv(tsd);

        if check_for_window_slam(tsd, ctx) {
            ctx.handle_data_segment(tsd);

            if !tsd.flow().two_way_traffic() {
                ctx.trk.set_tf_flags(TrackerFlag::ForceFlush);
            }

            ctx.trk.set_tcp_state(TcpState::TimeWait);
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
