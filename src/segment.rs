//! Parsed per-packet view of a TCP segment
//!
//! The decoding layer builds one [`SegmentDescriptor`] per captured packet.
//! Everything the state machine derives (event kind, end sequence) is
//! computed from it, never written back into it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// TCP flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub psh: bool,
    pub ack: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
}

impl TcpFlags {
    pub fn syn() -> Self {
        Self { syn: true, ..Default::default() }
    }

    pub fn syn_ack() -> Self {
        Self { syn: true, ack: true, ..Default::default() }
    }

    pub fn ack() -> Self {
        Self { ack: true, ..Default::default() }
    }

    pub fn psh_ack() -> Self {
        Self { psh: true, ack: true, ..Default::default() }
    }

    pub fn fin_ack() -> Self {
        Self { fin: true, ack: true, ..Default::default() }
    }

    pub fn rst() -> Self {
        Self { rst: true, ..Default::default() }
    }

    pub fn rst_ack() -> Self {
        Self { rst: true, ack: true, ..Default::default() }
    }

    /// Every flag set ("christmas tree")
    pub fn all() -> Self {
        Self::from_u8(0xff)
    }

    /// Create from the raw flags byte of the TCP header
    pub fn from_u8(flags: u8) -> Self {
        Self {
            fin: flags & 0x01 != 0,
            syn: flags & 0x02 != 0,
            rst: flags & 0x04 != 0,
            psh: flags & 0x08 != 0,
            ack: flags & 0x10 != 0,
            urg: flags & 0x20 != 0,
            ece: flags & 0x40 != 0,
            cwr: flags & 0x80 != 0,
        }
    }

    /// Convert back to the raw flags byte
    pub fn to_u8(&self) -> u8 {
        let mut flags = 0u8;
        if self.fin { flags |= 0x01; }
        if self.syn { flags |= 0x02; }
        if self.rst { flags |= 0x04; }
        if self.psh { flags |= 0x08; }
        if self.ack { flags |= 0x10; }
        if self.urg { flags |= 0x20; }
        if self.ece { flags |= 0x40; }
        if self.cwr { flags |= 0x80; }
        flags
    }

    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }

    /// SYN without ACK
    pub fn is_syn_only(&self) -> bool {
        self.syn && !self.ack
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.cwr, 'C'),
            (self.ece, 'E'),
            (self.urg, 'U'),
            (self.ack, 'A'),
            (self.psh, 'P'),
            (self.rst, 'R'),
            (self.syn, 'S'),
            (self.fin, 'F'),
        ];
        for (set, c) in names {
            write!(f, "{}", if set { c } else { '*' })?;
        }
        Ok(())
    }
}

/// TCP timestamp option (RFC 7323)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpTimestamp {
    pub tsval: u32,
    pub tsecr: u32,
}

/// Which endpoint sent a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketDirection {
    /// Sent by the connection initiator
    FromClient,
    /// Sent by the responder
    FromServer,
}

/// Read-only view of the upstream flow-table entry
pub trait Flow {
    /// Whether packets have been seen in both directions on this flow
    fn two_way_traffic(&self) -> bool;
}

/// Plain flow facts, for callers that keep flow state as values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowFacts {
    pub two_way_traffic: bool,
}

impl FlowFacts {
    pub fn one_way() -> Self {
        Self { two_way_traffic: false }
    }

    pub fn two_way() -> Self {
        Self { two_way_traffic: true }
    }
}

impl Flow for FlowFacts {
    fn two_way_traffic(&self) -> bool {
        self.two_way_traffic
    }
}

/// Immutable per-packet segment view
#[derive(Clone, Copy)]
pub struct SegmentDescriptor<'a> {
    seq: u32,
    ack: u32,
    window: u16,
    flags: TcpFlags,
    payload: &'a [u8],
    timestamp: Option<TcpTimestamp>,
    wscale: Option<u8>,
    mss: Option<u16>,
    /// Capture time, whole seconds
    pkt_time: u64,
    direction: PacketDirection,
    flow: &'a dyn Flow,
}

impl<'a> SegmentDescriptor<'a> {
    pub fn new(
        flow: &'a dyn Flow,
        direction: PacketDirection,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
    ) -> Self {
        Self {
            seq,
            ack,
            window: 0,
            flags,
            payload: &[],
            timestamp: None,
            wscale: None,
            mss: None,
            pkt_time: 0,
            direction,
            flow,
        }
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn with_payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_timestamp(mut self, tsval: u32, tsecr: u32) -> Self {
        self.timestamp = Some(TcpTimestamp { tsval, tsecr });
        self
    }

    pub fn with_wscale(mut self, wscale: u8) -> Self {
        self.wscale = Some(wscale);
        self
    }

    pub fn with_mss(mut self, mss: u16) -> Self {
        self.mss = Some(mss);
        self
    }

    pub fn with_time(mut self, secs: u64) -> Self {
        self.pkt_time = secs;
        self
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn ack(&self) -> u32 {
        self.ack
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    pub fn flags(&self) -> TcpFlags {
        self.flags
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Payload byte count, saturated to the 32-bit sequence space
    pub fn seg_len(&self) -> u32 {
        u32::try_from(self.payload.len()).unwrap_or(u32::MAX)
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn timestamp(&self) -> Option<TcpTimestamp> {
        self.timestamp
    }

    pub fn wscale(&self) -> Option<u8> {
        self.wscale
    }

    pub fn mss(&self) -> Option<u16> {
        self.mss
    }

    pub fn pkt_time(&self) -> u64 {
        self.pkt_time
    }

    pub fn direction(&self) -> PacketDirection {
        self.direction
    }

    pub fn is_from_client(&self) -> bool {
        self.direction == PacketDirection::FromClient
    }

    pub fn flow(&self) -> &'a dyn Flow {
        self.flow
    }

    /// Sequence number following this segment: SYN and FIN each occupy one
    pub fn end_seq(&self) -> u32 {
        let mut end = self.seq.wrapping_add(self.seg_len());
        if self.flags.syn {
            end = end.wrapping_add(1);
        }
        if self.flags.fin {
            end = end.wrapping_add(1);
        }
        end
    }
}

impl fmt::Debug for SegmentDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentDescriptor")
            .field("direction", &self.direction)
            .field("flags", &format_args!("{}", self.flags))
            .field("seq", &self.seq)
            .field("ack", &self.ack)
            .field("len", &self.payload.len())
            .field("window", &self.window)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
