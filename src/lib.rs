//! Passive TCP stream tracking
//!
//! Infers the TCP state of both endpoints of a connection from observed
//! segments, the way an inline or passive intrusion detection sensor must:
//! without ever sending a packet, and while staying robust against
//! crafted traffic (window slams, out-of-window RSTs, stale timestamps).
//!
//! A [`StreamInspector`] owns the configuration, normalizer policy and
//! per-worker statistics. Each connection is a [`TcpSession`] created by
//! the inspector and fed one [`SegmentDescriptor`] at a time.

pub mod config;
pub mod error;
pub mod event;
pub mod normalizer;
pub mod segment;
pub mod seq;
pub mod session;
pub mod state;
pub mod state_machine;
pub mod stats;
pub mod telemetry;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testutil;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use config::StreamConfig;
pub use error::StreamError;
pub use event::TcpEvent;
pub use normalizer::{Normalizer, OsPolicy, PolicyNormalizer};
pub use segment::{Flow, FlowFacts, PacketDirection, SegmentDescriptor, TcpFlags};
pub use session::{NullReassembler, Reassembler, SegmentVerdict, StreamEnv, TcpSession};
pub use state::TcpState;
pub use state_machine::StateMachine;
pub use stats::StreamStats;
pub use telemetry::{PacketAction, PacketActions, StreamEvent};
pub use tracker::{StreamTracker, TrackerRole};

/// Per-worker stream tracking instance
pub struct StreamInspector {
    config: Arc<StreamConfig>,
    normalizer: Box<dyn Normalizer>,
    machine: StateMachine,
    stats: StreamStats,
}

impl StreamInspector {
    /// Create an inspector using the configured normalizer policy
    pub fn new(config: StreamConfig) -> Self {
        let normalizer = PolicyNormalizer::new(config.normalizer.clone());
        Self::with_normalizer(config, Box::new(normalizer))
    }

    /// Create an inspector with a custom normalizer
    pub fn with_normalizer(config: StreamConfig, normalizer: Box<dyn Normalizer>) -> Self {
        info!(
            "Stream inspector ready (policy={}, mode={:?}, require_3whs={})",
            normalizer.os_policy(),
            config.normalizer.mode,
            config.require_3whs
        );
        Self {
            config: Arc::new(config),
            normalizer,
            machine: StateMachine::new(),
            stats: StreamStats::new(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = StreamConfig::load(path)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &dyn Normalizer {
        self.normalizer.as_ref()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Hand the counters to the reporting layer and start over
    pub fn take_stats(&mut self) -> StreamStats {
        std::mem::take(&mut self.stats)
    }

    /// New session sharing this inspector's configuration
    pub fn new_session(&self) -> TcpSession {
        TcpSession::new(Arc::clone(&self.config))
    }

    /// Process one segment of `session`
    pub fn process(
        &mut self,
        session: &mut TcpSession,
        tsd: &SegmentDescriptor<'_>,
        reassembler: &mut dyn Reassembler,
    ) -> SegmentVerdict {
        let mut env = StreamEnv::new(self.normalizer.as_ref(), reassembler, &mut self.stats);
        session.process_segment(tsd, &self.machine, &mut env)
    }

    /// Tear down `session` from outside the protocol (expiry, eviction)
    pub fn close(&mut self, session: &mut TcpSession, reassembler: &mut dyn Reassembler) {
        let mut env = StreamEnv::new(self.normalizer.as_ref(), reassembler, &mut self.stats);
        session.close(&mut env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::NormMode;
    use tempfile::TempDir;

    #[test]
    fn test_inspector_tracks_sessions_independently() {
        let flow = FlowFacts::two_way();
        let mut inspector = StreamInspector::new(StreamConfig::default());
        let mut reassembler = NullReassembler;

        let mut a = inspector.new_session();
        let mut b = inspector.new_session();
        let syn = SegmentDescriptor::new(&flow, PacketDirection::FromClient, 1, 0, TcpFlags::syn()).with_window(1024);
        inspector.process(&mut a, &syn, &mut reassembler);

        assert_eq!(a.client().state(), TcpState::SynSent);
        assert_eq!(b.client().state(), TcpState::Listen);
        assert_eq!(inspector.stats().segments, 1);

        inspector.close(&mut b, &mut reassembler);
        assert!(b.is_closed());

        let stats = inspector.take_stats();
        assert_eq!(stats.segments, 1);
        assert_eq!(inspector.stats().segments, 0);
    }

    #[test]
    fn test_inspector_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.toml");
        std::fs::write(
            &path,
            "require_3whs = true\n[normalizer]\nos_policy = \"solaris\"\nmode = \"test\"\n",
        )
        .unwrap();

        let inspector = StreamInspector::from_file(&path).unwrap();
        assert!(inspector.config().require_3whs);
        assert_eq!(inspector.normalizer().os_policy(), OsPolicy::Solaris);
        assert_eq!(inspector.config().normalizer.mode, NormMode::Test);
    }
}
