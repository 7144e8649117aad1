//! Per-direction stream tracker
//!
//! One [`StreamTracker`] exists for each endpoint of a session. It owns that
//! endpoint's inferred protocol state and sequence/window bookkeeping:
//!
//! - send side (`iss`, `snd_una`, `snd_nxt`, `snd_wnd`): what this endpoint
//!   has transmitted and what the peer has acknowledged
//! - receive side (`irs`, `r_nxt_ack`, `r_win_base`, `rcv_wnd`): what this
//!   endpoint has received from the peer and acknowledged
//!
//! State changes requested by a handler are queued with
//! [`StreamTracker::set_tcp_state`] and applied once the handler returns.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::event::TcpEvent;
use crate::normalizer::RstRule;
use crate::segment::SegmentDescriptor;
use crate::seq::{seq_geq, seq_gt, seq_in_range, seq_leq, seq_lt};
use crate::state::TcpState;

/// Largest shift allowed by the window scale option
pub const MAX_WSCALE: u8 = 14;

/// Endpoint a tracker describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerRole {
    Client,
    Server,
}

impl fmt::Display for TrackerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerRole::Client => f.write_str("client"),
            TrackerRole::Server => f.write_str("server"),
        }
    }
}

/// Progress of the peer's FIN through this endpoint's acknowledgments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FinSeqStatus {
    #[default]
    None,
    Seen,
    Acked,
}

/// Transient tracker flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerFlag {
    /// Deliver buffered data without waiting for an acknowledgment
    ForceFlush,
    /// Tracking started without observing the handshake
    Midstream,
    /// Window scaling negotiated in both directions
    WscaleNegotiated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerFlags {
    pub force_flush: bool,
    pub midstream: bool,
    pub wscale_negotiated: bool,
}

impl TrackerFlags {
    fn slot(&mut self, flag: TrackerFlag) -> &mut bool {
        match flag {
            TrackerFlag::ForceFlush => &mut self.force_flush,
            TrackerFlag::Midstream => &mut self.midstream,
            TrackerFlag::WscaleNegotiated => &mut self.wscale_negotiated,
        }
    }

    pub fn has(&self, flag: TrackerFlag) -> bool {
        match flag {
            TrackerFlag::ForceFlush => self.force_flush,
            TrackerFlag::Midstream => self.midstream,
            TrackerFlag::WscaleNegotiated => self.wscale_negotiated,
        }
    }
}

/// Inferred TCP state of one endpoint
#[derive(Debug, Clone)]
pub struct StreamTracker {
    role: TrackerRole,
    state: TcpState,
    pending_state: Option<TcpState>,
    last_event: Option<TcpEvent>,

    // send side
    iss: u32,
    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u32,
    snd_initialized: bool,

    // receive side
    irs: u32,
    r_nxt_ack: u32,
    r_win_base: u32,
    rcv_wnd: u32,
    rcv_initialized: bool,

    wscale: u8,
    mss: u16,

    fin_final_seq: u32,
    fin_seq_status: FinSeqStatus,

    // PAWS
    ts_last: u32,
    ts_last_packet: u64,

    flags: TrackerFlags,
}

impl StreamTracker {
    pub fn new(role: TrackerRole) -> Self {
        Self {
            role,
            state: TcpState::Listen,
            pending_state: None,
            last_event: None,
            iss: 0,
            snd_una: 0,
            snd_nxt: 0,
            snd_wnd: 0,
            snd_initialized: false,
            irs: 0,
            r_nxt_ack: 0,
            r_win_base: 0,
            rcv_wnd: 0,
            rcv_initialized: false,
            wscale: 0,
            mss: 0,
            fin_final_seq: 0,
            fin_seq_status: FinSeqStatus::None,
            ts_last: 0,
            ts_last_packet: 0,
            flags: TrackerFlags::default(),
        }
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    pub fn role(&self) -> TrackerRole {
        self.role
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn pending_state(&self) -> Option<TcpState> {
        self.pending_state
    }

    pub fn last_event(&self) -> Option<TcpEvent> {
        self.last_event
    }

    pub fn iss(&self) -> u32 {
        self.iss
    }

    pub fn irs(&self) -> u32 {
        self.irs
    }

    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> u32 {
        self.snd_nxt
    }

    pub fn snd_wnd(&self) -> u32 {
        self.snd_wnd
    }

    pub fn r_nxt_ack(&self) -> u32 {
        self.r_nxt_ack
    }

    pub fn r_win_base(&self) -> u32 {
        self.r_win_base
    }

    pub fn rcv_wnd(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn wscale(&self) -> u8 {
        self.wscale
    }

    pub fn mss(&self) -> u16 {
        self.mss
    }

    pub fn fin_final_seq(&self) -> u32 {
        self.fin_final_seq
    }

    pub fn fin_seq_status(&self) -> FinSeqStatus {
        self.fin_seq_status
    }

    pub fn ts_last(&self) -> u32 {
        self.ts_last
    }

    pub fn ts_last_packet(&self) -> u64 {
        self.ts_last_packet
    }

    pub fn is_send_initialized(&self) -> bool {
        self.snd_initialized
    }

    pub fn is_recv_initialized(&self) -> bool {
        self.rcv_initialized
    }

    pub fn flags(&self) -> TrackerFlags {
        self.flags
    }

    // ------------------------------------------------------------------
    // mutators
    // ------------------------------------------------------------------

    /// Queue a transition, applied after the current handler returns.
    /// A later request in the same handler replaces an earlier one.
    pub fn set_tcp_state(&mut self, state: TcpState) {
        self.pending_state = Some(state);
    }

    /// Apply a queued transition, returning `(from, to)` when the state changed
    pub fn apply_pending_state(&mut self) -> Option<(TcpState, TcpState)> {
        let next = self.pending_state.take()?;
        if next == self.state {
            return None;
        }
        let prev = self.state;
        self.state = next;
        Some((prev, next))
    }

    /// Set the state immediately, outside of segment dispatch (flow
    /// teardown, table restore)
    pub fn force_state(&mut self, state: TcpState) {
        self.pending_state = None;
        self.state = state;
    }

    pub fn set_tcp_event(&mut self, event: TcpEvent) {
        self.last_event = Some(event);
    }

    pub fn set_tf_flags(&mut self, flag: TrackerFlag) {
        *self.flags.slot(flag) = true;
    }

    pub fn clear_tf_flags(&mut self, flag: TrackerFlag) {
        *self.flags.slot(flag) = false;
    }

    pub fn has_tf_flag(&self, flag: TrackerFlag) -> bool {
        self.flags.has(flag)
    }

    pub fn set_iss(&mut self, iss: u32) {
        self.iss = iss;
    }

    pub fn set_snd_una(&mut self, snd_una: u32) {
        self.snd_una = snd_una;
        self.snd_initialized = true;
    }

    pub fn set_snd_nxt(&mut self, snd_nxt: u32) {
        self.snd_nxt = snd_nxt;
        self.snd_initialized = true;
    }

    pub fn set_r_nxt_ack(&mut self, r_nxt_ack: u32) {
        self.r_nxt_ack = r_nxt_ack;
        self.rcv_initialized = true;
    }

    pub fn set_r_win_base(&mut self, r_win_base: u32) {
        self.r_win_base = r_win_base;
        self.rcv_initialized = true;
    }

    pub fn set_rcv_wnd(&mut self, rcv_wnd: u32) {
        self.rcv_wnd = rcv_wnd;
    }

    pub fn set_ts_last(&mut self, ts: u32, pkt_time: u64) {
        self.ts_last = ts;
        self.ts_last_packet = pkt_time;
    }

    /// Window advertised in a segment sent by this endpoint, with scaling
    /// applied once both sides agreed on it
    pub fn scaled_window(&self, tsd: &SegmentDescriptor<'_>) -> u32 {
        let window = u32::from(tsd.window());
        if tsd.flags().syn || !self.flags.wscale_negotiated {
            window
        } else {
            window << self.wscale
        }
    }

    fn record_options(&mut self, tsd: &SegmentDescriptor<'_>) {
        if let Some(ws) = tsd.wscale() {
            self.wscale = ws.min(MAX_WSCALE);
        }
        if let Some(mss) = tsd.mss() {
            self.mss = mss;
        }
    }

    fn init_send_side(&mut self, iss: u32, snd_nxt: u32) {
        self.iss = iss;
        self.snd_una = iss;
        self.snd_nxt = snd_nxt;
        self.snd_initialized = true;
    }

    fn init_recv_side(&mut self, irs: u32, r_nxt_ack: u32) {
        self.irs = irs;
        self.r_nxt_ack = r_nxt_ack;
        self.r_win_base = r_nxt_ack;
        self.rcv_initialized = true;
    }

    // ------------------------------------------------------------------
    // handshake initialisation
    // ------------------------------------------------------------------

    /// This endpoint sent the opening SYN
    pub fn init_on_syn_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_send_side(tsd.seq(), tsd.end_seq());
        self.rcv_wnd = u32::from(tsd.window());
        self.record_options(tsd);
        self.set_tcp_state(TcpState::SynSent);
    }

    /// This endpoint received the opening SYN
    pub fn init_on_syn_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_recv_side(tsd.seq(), tsd.end_seq());
        self.snd_wnd = u32::from(tsd.window());
        self.set_tcp_state(TcpState::SynRecv);
    }

    /// This endpoint sent a SYN-ACK for a SYN that was not observed
    pub fn init_on_synack_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_send_side(tsd.seq(), tsd.end_seq());
        self.init_recv_side(tsd.ack().wrapping_sub(1), tsd.ack());
        self.rcv_wnd = u32::from(tsd.window());
        self.record_options(tsd);
        self.set_tcp_state(TcpState::SynRecv);
    }

    /// This endpoint received a SYN-ACK for a SYN that was not observed
    pub fn init_on_synack_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_recv_side(tsd.seq(), tsd.end_seq());
        self.init_send_side(tsd.ack().wrapping_sub(1), tsd.ack());
        self.snd_una = tsd.ack();
        self.snd_wnd = u32::from(tsd.window());
        self.set_tcp_state(TcpState::Established);
    }

    /// Server side finishing its half of the handshake with a SYN-ACK
    pub fn finish_server_init(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_send_side(tsd.seq(), tsd.end_seq());
        if tsd.flags().ack && seq_gt(tsd.ack(), self.r_win_base) {
            self.r_win_base = tsd.ack();
        }
        self.rcv_wnd = u32::from(tsd.window());
        self.record_options(tsd);
    }

    /// Client side learning the server's initial sequence from the SYN-ACK
    pub fn finish_client_init(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_recv_side(tsd.seq(), tsd.end_seq());
    }

    /// Client side validating the SYN-ACK against its own SYN.
    /// Returns false when the SYN-ACK does not acknowledge our SYN.
    pub fn update_on_3whs_ack(&mut self, tsd: &SegmentDescriptor<'_>) -> bool {
        if self.snd_initialized && tsd.ack() != self.snd_nxt {
            trace!(
                role = %self.role,
                ack = tsd.ack(),
                snd_nxt = self.snd_nxt,
                "SYN-ACK does not acknowledge SYN"
            );
            return false;
        }
        if !self.snd_initialized {
            self.init_send_side(tsd.ack().wrapping_sub(1), tsd.ack());
        }
        self.finish_client_init(tsd);
        self.update_tracker_ack_recv(tsd);
        self.set_tcp_state(TcpState::Established);
        true
    }

    // ------------------------------------------------------------------
    // midstream pickup
    // ------------------------------------------------------------------

    /// First observed segment was sent by this endpoint
    fn init_midstream_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_send_side(tsd.seq(), tsd.end_seq());
        if tsd.flags().ack {
            self.init_recv_side(tsd.ack(), tsd.ack());
        }
        self.rcv_wnd = u32::from(tsd.window());
        self.flags.midstream = true;
    }

    /// First observed segment was received by this endpoint
    fn init_midstream_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_recv_side(tsd.seq(), tsd.end_seq());
        self.r_win_base = tsd.seq();
        if tsd.flags().ack {
            self.init_send_side(tsd.ack(), tsd.ack());
        }
        self.snd_wnd = u32::from(tsd.window());
        self.flags.midstream = true;
    }

    pub fn init_on_3whs_ack_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_midstream_sent(tsd);
        self.set_tcp_state(TcpState::Established);
    }

    pub fn init_on_3whs_ack_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_midstream_recv(tsd);
        self.set_tcp_state(TcpState::Established);
    }

    pub fn init_on_data_seg_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_midstream_sent(tsd);
        self.set_tcp_state(TcpState::Established);
    }

    pub fn init_on_data_seg_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        self.init_midstream_recv(tsd);
        self.set_tcp_state(TcpState::Established);
    }

    // ------------------------------------------------------------------
    // steady state bookkeeping
    // ------------------------------------------------------------------

    /// Whether `ack` acknowledges something this endpoint actually sent
    pub fn is_ack_valid(&self, ack: u32) -> bool {
        if !self.snd_initialized {
            return true;
        }
        seq_geq(ack, self.snd_una) && seq_leq(ack, self.snd_nxt)
    }

    /// Segment sent by this endpoint
    pub fn update_tracker_ack_sent(&mut self, tsd: &SegmentDescriptor<'_>) {
        if !self.snd_initialized {
            self.init_send_side(tsd.seq(), tsd.end_seq());
        } else if seq_gt(tsd.end_seq(), self.snd_nxt) {
            self.snd_nxt = tsd.end_seq();
        }

        if tsd.flags().ack {
            if !self.rcv_initialized {
                self.init_recv_side(tsd.ack(), tsd.ack());
            } else if seq_gt(tsd.ack(), self.r_win_base) {
                self.r_win_base = tsd.ack();
            }
        }

        if self.fin_seq_status == FinSeqStatus::Seen && seq_gt(self.r_win_base, self.fin_final_seq) {
            self.fin_seq_status = FinSeqStatus::Acked;
        }

        self.rcv_wnd = self.scaled_window(tsd);
    }

    /// Segment received from the peer
    pub fn update_tracker_ack_recv(&mut self, tsd: &SegmentDescriptor<'_>) {
        if tsd.flags().ack
            && self.snd_initialized
            && seq_gt(tsd.ack(), self.snd_una)
            && seq_leq(tsd.ack(), self.snd_nxt)
        {
            self.snd_una = tsd.ack();
        }

        if self.rcv_initialized
            && seq_leq(tsd.seq(), self.r_nxt_ack)
            && seq_gt(tsd.end_seq(), self.r_nxt_ack)
        {
            self.r_nxt_ack = tsd.end_seq();
        }

        self.snd_wnd = u32::from(tsd.window());
    }

    /// FIN sent by this endpoint; the FIN's sequence slot is part of `end_seq`
    pub fn update_on_fin_sent(&mut self, tsd: &SegmentDescriptor<'_>) -> bool {
        self.update_tracker_ack_sent(tsd);
        true
    }

    /// FIN received from the peer. Returns false for a FIN entirely below
    /// what this endpoint already acknowledged.
    pub fn update_on_fin_recv(&mut self, tsd: &SegmentDescriptor<'_>) -> bool {
        if self.rcv_initialized && seq_lt(tsd.end_seq(), self.r_win_base) {
            return false;
        }

        if self.fin_seq_status == FinSeqStatus::None {
            self.fin_final_seq = tsd.seq().wrapping_add(tsd.seg_len());
            self.fin_seq_status = FinSeqStatus::Seen;
        }

        true
    }

    /// Validate a RST sent by the peer. An accepted RST closes this endpoint;
    /// a rejected one leaves the tracker untouched.
    pub fn update_on_rst_recv(&mut self, tsd: &SegmentDescriptor<'_>, rule: RstRule) -> bool {
        let good_rst = self.validate_rst(tsd, rule);
        if good_rst {
            self.set_tcp_state(TcpState::Closed);
        }
        good_rst
    }

    fn validate_rst(&self, tsd: &SegmentDescriptor<'_>, rule: RstRule) -> bool {
        // nothing known about the peer's sequence space yet
        if !self.rcv_initialized {
            return true;
        }

        let wnd = self.rcv_wnd.max(1);
        let right_edge = self.r_nxt_ack.wrapping_add(wnd);
        match rule {
            RstRule::SeqInWindow => seq_in_range(tsd.seq(), self.r_nxt_ack, right_edge),
            RstRule::SeqEqNext => tsd.seq() == self.r_nxt_ack,
            RstRule::EndSeqInWindow => {
                seq_geq(tsd.end_seq(), self.r_win_base) && seq_lt(tsd.end_seq(), right_edge)
            }
        }
    }

    pub(crate) fn negotiate_wscale(&mut self) {
        self.flags.wscale_negotiated = true;
    }
}
