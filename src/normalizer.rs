//! Normalizer policy
//!
//! The normalizer captures how the protected end host interprets TCP
//! corner cases (OS policy) and whether the sensor is allowed to drop
//! anomalous packets. The state machine only consults it; a single
//! normalizer is shared read-only by every flow it applies to.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::StreamError;
use crate::segment::SegmentDescriptor;
use crate::seq::seq_lt;

/// Idle period after which an older timestamp is accepted again (RFC 7323)
pub const PAWS_24DAYS: u64 = 24 * 24 * 60 * 60;

/// Target host TCP stack personality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsPolicy {
    First,
    Last,
    Linux,
    OldLinux,
    Bsd,
    MacOs,
    Solaris,
    Irix,
    Hpux11,
    Hpux10,
    Windows,
    Win2003,
    Vista,
    Proxy,
}

impl OsPolicy {
    /// Windows stacks accept a zero window as the final ACK catches up
    pub fn is_windows(&self) -> bool {
        matches!(self, OsPolicy::Windows | OsPolicy::Win2003 | OsPolicy::Vista)
    }

    /// How this stack validates an incoming RST
    pub fn rst_rule(&self) -> RstRule {
        match self {
            OsPolicy::Linux | OsPolicy::OldLinux | OsPolicy::Hpux11 | OsPolicy::MacOs => {
                RstRule::SeqEqNext
            }
            OsPolicy::Solaris | OsPolicy::Hpux10 | OsPolicy::Irix => RstRule::EndSeqInWindow,
            _ => RstRule::SeqInWindow,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OsPolicy::First => "first",
            OsPolicy::Last => "last",
            OsPolicy::Linux => "linux",
            OsPolicy::OldLinux => "old_linux",
            OsPolicy::Bsd => "bsd",
            OsPolicy::MacOs => "mac_os",
            OsPolicy::Solaris => "solaris",
            OsPolicy::Irix => "irix",
            OsPolicy::Hpux11 => "hpux11",
            OsPolicy::Hpux10 => "hpux10",
            OsPolicy::Windows => "windows",
            OsPolicy::Win2003 => "win2003",
            OsPolicy::Vista => "vista",
            OsPolicy::Proxy => "proxy",
        }
    }
}

impl Default for OsPolicy {
    fn default() -> Self {
        OsPolicy::Bsd
    }
}

impl fmt::Display for OsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OsPolicy {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let policy = match s.to_ascii_lowercase().as_str() {
            "first" => OsPolicy::First,
            "last" => OsPolicy::Last,
            "linux" => OsPolicy::Linux,
            "old_linux" | "old-linux" => OsPolicy::OldLinux,
            "bsd" => OsPolicy::Bsd,
            "mac_os" | "macos" => OsPolicy::MacOs,
            "solaris" => OsPolicy::Solaris,
            "irix" => OsPolicy::Irix,
            "hpux11" => OsPolicy::Hpux11,
            "hpux10" => OsPolicy::Hpux10,
            "windows" => OsPolicy::Windows,
            "win2003" | "win_2003" => OsPolicy::Win2003,
            "vista" => OsPolicy::Vista,
            "proxy" => OsPolicy::Proxy,
            _ => return Err(StreamError::UnknownPolicy(s.to_string())),
        };
        Ok(policy)
    }
}

/// RST sequence validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RstRule {
    /// RST sequence inside the receive window
    SeqInWindow,
    /// RST sequence exactly the next expected sequence
    SeqEqNext,
    /// RST end sequence inside the receive window
    EndSeqInWindow,
}

/// Normalization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormMode {
    /// Never drop
    Off,
    /// Report what would be dropped
    Test,
    /// Drop (inline deployments)
    On,
}

impl FromStr for NormMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(NormMode::Off),
            "test" => Ok(NormMode::Test),
            "on" => Ok(NormMode::On),
            _ => Err(StreamError::UnknownMode(s.to_string())),
        }
    }
}

/// Anomaly class a drop decision is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormAnomaly {
    /// Window slam, window too large and similar blocking anomalies
    Block,
    /// Timestamp failed the PAWS check
    Paws,
    /// ECN bits on a session that did not negotiate ECN
    Ecn,
}

/// Result of the PAWS timestamp check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PawsVerdict {
    Valid,
    Stale,
}

/// Normalizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Target stack personality
    pub os_policy: OsPolicy,

    /// Whether the normalizer may drop packets
    pub mode: NormMode,

    /// Anomaly classes eligible for dropping
    pub block_anomalies: Vec<NormAnomaly>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            os_policy: OsPolicy::Bsd,
            mode: NormMode::Off,
            block_anomalies: vec![NormAnomaly::Block, NormAnomaly::Paws],
        }
    }
}

/// Decision points the state machine consults
pub trait Normalizer: Send + Sync {
    /// Active OS policy for the protected host
    fn os_policy(&self) -> OsPolicy;

    /// Whether to drop the packet for the given anomaly class
    fn packet_dropper(&self, tsd: &SegmentDescriptor<'_>, anomaly: NormAnomaly) -> bool;

    /// Updated ECN-negotiated flag after seeing a handshake segment
    fn ecn_tracker(&self, tsd: &SegmentDescriptor<'_>, require_3whs: bool, ecn: bool) -> bool {
        let flags = tsd.flags();
        if flags.is_syn_ack() {
            if !require_3whs || ecn {
                return flags.ece && !flags.cwr;
            }
            ecn
        } else if flags.syn {
            flags.ece && flags.cwr
        } else {
            ecn
        }
    }

    /// PAWS check against the last timestamp seen from the sender
    fn validate_paws(&self, tsd: &SegmentDescriptor<'_>, ts_last: u32, ts_last_packet: u64) -> PawsVerdict {
        let ts = match tsd.timestamp() {
            Some(ts) => ts,
            None => return PawsVerdict::Valid,
        };
        if ts_last == 0 || !seq_lt(ts.tsval, ts_last) {
            return PawsVerdict::Valid;
        }
        // sender idle long enough that its clock may have wrapped
        if tsd.pkt_time() > ts_last_packet.saturating_add(PAWS_24DAYS) {
            return PawsVerdict::Valid;
        }
        PawsVerdict::Stale
    }

    /// RST validation rule for the protected host
    fn rst_rule(&self) -> RstRule {
        self.os_policy().rst_rule()
    }
}

/// Configuration-driven normalizer
#[derive(Debug, Clone, Default)]
pub struct PolicyNormalizer {
    config: NormalizerConfig,
}

impl PolicyNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizer for `policy` that drops every blockable anomaly
    pub fn inline(policy: OsPolicy) -> Self {
        Self::new(NormalizerConfig {
            os_policy: policy,
            mode: NormMode::On,
            block_anomalies: vec![NormAnomaly::Block, NormAnomaly::Paws, NormAnomaly::Ecn],
        })
    }

    /// Normalizer for `policy` that never drops
    pub fn passive(policy: OsPolicy) -> Self {
        Self::new(NormalizerConfig {
            os_policy: policy,
            mode: NormMode::Off,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }
}

impl Normalizer for PolicyNormalizer {
    fn os_policy(&self) -> OsPolicy {
        self.config.os_policy
    }

    fn packet_dropper(&self, tsd: &SegmentDescriptor<'_>, anomaly: NormAnomaly) -> bool {
        if !self.config.block_anomalies.contains(&anomaly) {
            return false;
        }
        match self.config.mode {
            NormMode::On => {
                trace!(?anomaly, seq = tsd.seq(), "normalizer dropping packet");
                true
            }
            NormMode::Test => {
                trace!(?anomaly, seq = tsd.seq(), "normalizer would drop packet");
                false
            }
            NormMode::Off => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{FlowFacts, PacketDirection, TcpFlags};

    #[test]
    fn test_policy_parse() {
        assert_eq!("Windows".parse::<OsPolicy>().unwrap(), OsPolicy::Windows);
        assert_eq!("old-linux".parse::<OsPolicy>().unwrap(), OsPolicy::OldLinux);
        assert!("beos".parse::<OsPolicy>().is_err());
        assert!(OsPolicy::Vista.is_windows());
        assert!(!OsPolicy::Linux.is_windows());
    }

    #[test]
    fn test_rst_rules() {
        assert_eq!(OsPolicy::Linux.rst_rule(), RstRule::SeqEqNext);
        assert_eq!(OsPolicy::Solaris.rst_rule(), RstRule::EndSeqInWindow);
        assert_eq!(OsPolicy::Windows.rst_rule(), RstRule::SeqInWindow);
    }

    #[test]
    fn test_packet_dropper_modes() {
        let flow = FlowFacts::two_way();
        let tsd = SegmentDescriptor::new(&flow, PacketDirection::FromClient, 1, 1, TcpFlags::ack());

        assert!(PolicyNormalizer::inline(OsPolicy::Windows).packet_dropper(&tsd, NormAnomaly::Block));
        assert!(!PolicyNormalizer::passive(OsPolicy::Windows).packet_dropper(&tsd, NormAnomaly::Block));

        let test_mode = PolicyNormalizer::new(NormalizerConfig {
            mode: NormMode::Test,
            ..Default::default()
        });
        assert!(!test_mode.packet_dropper(&tsd, NormAnomaly::Block));

        let ecn_off = PolicyNormalizer::new(NormalizerConfig {
            mode: NormMode::On,
            ..Default::default()
        });
        assert!(!ecn_off.packet_dropper(&tsd, NormAnomaly::Ecn));
    }

    #[test]
    fn test_ecn_tracking() {
        let norm = PolicyNormalizer::default();
        let flow = FlowFacts::two_way();

        let syn_flags = TcpFlags { syn: true, ece: true, cwr: true, ..Default::default() };
        let syn = SegmentDescriptor::new(&flow, PacketDirection::FromClient, 1, 0, syn_flags);
        assert!(norm.ecn_tracker(&syn, false, false));

        let synack_flags = TcpFlags { syn: true, ack: true, ece: true, ..Default::default() };
        let synack = SegmentDescriptor::new(&flow, PacketDirection::FromServer, 1, 2, synack_flags);
        assert!(norm.ecn_tracker(&synack, true, true));
        // a 3WHS-requiring session that never saw an ECN SYN stays off
        assert!(!norm.ecn_tracker(&synack, true, false));
    }

    #[test]
    fn test_paws() {
        let norm = PolicyNormalizer::default();
        let flow = FlowFacts::two_way();
        let base = SegmentDescriptor::new(&flow, PacketDirection::FromClient, 1, 1, TcpFlags::ack());

        assert_eq!(norm.validate_paws(&base, 500, 0), PawsVerdict::Valid);

        let old = base.with_timestamp(400, 0).with_time(100);
        assert_eq!(norm.validate_paws(&old, 500, 50), PawsVerdict::Stale);
        assert_eq!(norm.validate_paws(&old, 0, 50), PawsVerdict::Valid);

        let idle = base.with_timestamp(400, 0).with_time(PAWS_24DAYS + 100);
        assert_eq!(norm.validate_paws(&idle, 500, 50), PawsVerdict::Valid);

        let newer = base.with_timestamp(600, 0);
        assert_eq!(norm.validate_paws(&newer, 500, 50), PawsVerdict::Valid);
    }
}
