#![allow(dead_code)]

use tcp_stream_tracker::{
    FlowFacts, PacketDirection, Reassembler, SegmentDescriptor, TcpFlags, TrackerRole,
};

/// Reassembler that keeps the bytes it is handed, per receiver
#[derive(Debug, Default)]
pub struct ByteCollector {
    pub to_client: Vec<u8>,
    pub to_server: Vec<u8>,
    pub flushes: Vec<TrackerRole>,
}

impl Reassembler for ByteCollector {
    fn queue_segment(&mut self, receiver: TrackerRole, tsd: &SegmentDescriptor<'_>) {
        match receiver {
            TrackerRole::Client => self.to_client.extend_from_slice(tsd.payload()),
            TrackerRole::Server => self.to_server.extend_from_slice(tsd.payload()),
        }
    }

    fn flush(&mut self, receiver: TrackerRole) {
        self.flushes.push(receiver);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn from_client(flow: &FlowFacts, seq: u32, ack: u32, flags: TcpFlags) -> SegmentDescriptor<'_> {
    SegmentDescriptor::new(flow, PacketDirection::FromClient, seq, ack, flags).with_window(29200)
}

pub fn from_server(flow: &FlowFacts, seq: u32, ack: u32, flags: TcpFlags) -> SegmentDescriptor<'_> {
    SegmentDescriptor::new(flow, PacketDirection::FromServer, seq, ack, flags).with_window(29200)
}
