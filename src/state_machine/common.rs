//! Behaviour shared by several state handlers

use tracing::debug;

use crate::segment::SegmentDescriptor;
use crate::seq::seq_geq;
use crate::state::TcpState;
use crate::telemetry::{PacketAction, StreamEvent};
use crate::tracker::FinSeqStatus;

use super::Ctx;

/// RST received by this tracker, validated against the protected host's
/// OS policy. A valid RST closes the session; an invalid one is recorded
/// and otherwise ignored.
pub(crate) fn rst_recv(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    let rule = ctx.env.normalizer.rst_rule();
    if ctx.trk.update_on_rst_recv(tsd, rule) {
        ctx.update_session_on_rst(true);
        ctx.session.update_perf_base_state(TcpState::Closing);
        ctx.session.set_pkt_action_flag(PacketAction::Reset);
    } else {
        debug!(
            role = %ctx.trk.role(),
            seq = tsd.seq(),
            r_nxt_ack = ctx.trk.r_nxt_ack(),
            ?rule,
            "RST outside window"
        );
        ctx.session.tel.set_tcp_event(StreamEvent::BadRst);
        ctx.env.stats.bad_rsts += 1;
    }

    if tsd.has_payload() {
        ctx.session.tel.set_tcp_event(StreamEvent::DataAfterRstRcvd);
    }

    true
}

/// SYN or SYN-ACK received on a tracker past the handshake
pub(crate) fn late_syn_recv(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    ctx.ecn_tracker(tsd);
    if tsd.has_payload() {
        ctx.handle_data_on_syn(tsd);
    }
    true
}

/// Payload received after the sender's FIN: record it, do not deliver it
pub(crate) fn data_after_fin(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    if !tsd.has_payload() {
        return true;
    }
    if ctx.trk.fin_seq_status() != FinSeqStatus::None
        && seq_geq(tsd.seq(), ctx.trk.fin_final_seq().wrapping_add(1))
    {
        ctx.session.tel.set_tcp_event(StreamEvent::DataAfterFin);
    } else {
        // retransmission of data ahead of the FIN
        ctx.handle_data_segment(tsd);
    }
    true
}

/// ACK received while waiting for our own FIN to be acknowledged
pub(crate) fn ack_of_fin(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>, next: TcpState) -> bool {
    ctx.trk.update_tracker_ack_recv(tsd);
    if tsd.flags().ack && seq_geq(tsd.ack(), ctx.trk.snd_nxt()) {
        ctx.trk.set_tcp_state(next);
    }
    true
}

/// SYN sent by a tracker whose previous connection is over
pub(crate) fn syn_on_closed(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
    debug!(role = %ctx.trk.role(), seq = tsd.seq(), "SYN on closed tracker");
    ctx.session.tel.set_tcp_event(StreamEvent::SessionReused);
    true
}
