use crate::segment::SegmentDescriptor;
use crate::state::TcpState;
use crate::telemetry::StreamEvent;

use super::{common, no_action, Ctx, StateHandler};

/// Terminal state. Segments are observed but change nothing; any payload
/// other than on a RST is recorded.
pub struct ClosedHandler;

impl ClosedHandler {
    fn data_on_closed(tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        if tsd.has_payload() {
            ctx.session.tel.set_tcp_event(StreamEvent::DataOnClosed);
        }
        true
    }
}

impl StateHandler for ClosedHandler {
    fn state(&self) -> TcpState {
        TcpState::Closed
    }

    fn syn_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::syn_on_closed(tsd, ctx);
        Self::data_on_closed(tsd, ctx)
    }

    fn syn_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn syn_ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn syn_ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn ack_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn ack_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn data_seg_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn data_seg_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn fin_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn fin_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        Self::data_on_closed(tsd, ctx)
    }

    fn rst_sent(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        no_action(tsd, ctx)
    }

    fn rst_recv(&self, tsd: &SegmentDescriptor<'_>, ctx: Ctx<'_, '_, '_>) -> bool {
        common::rst_recv(tsd, ctx)
    }
}
