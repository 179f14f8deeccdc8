use rustc_hash::FxHashMap;
use tracing::trace;

use crate::{
    packet::Packet,
    queue::{Admit, LinkQueue},
    topology::LeafId,
};

/// A core port towards one leaf. Aggregates in-band telemetry but never originates it.
#[derive(Debug, Clone)]
pub struct SpinePort {
    queue: LinkQueue,
    /// Utilization last seen by packets from each source leaf.
    load: FxHashMap<LeafId, f64>,
}

impl SpinePort {
    pub fn new(queue: LinkQueue) -> Self {
        Self {
            queue,
            load: FxHashMap::default(),
        }
    }

    pub fn admit(&mut self, pkt: Packet) -> Admit {
        let admit = self.queue.admit(pkt);
        if admit.is_enqueued() {
            let utilization = self.queue.utilization();
            if let Some(telemetry) = self
                .queue
                .tail_mut()
                .and_then(|pkt| pkt.telemetry.as_mut())
            {
                debug_assert!(telemetry.metric.is_finite() && telemetry.metric >= 0.0);
                self.load.insert(telemetry.src_leaf, utilization);
                telemetry.metric = telemetry.metric.max(utilization);
                trace!(
                    src_leaf = %telemetry.src_leaf,
                    core = %telemetry.core,
                    utilization,
                    metric = telemetry.metric,
                    "aggregate telemetry"
                );
            }
        }
        admit
    }

    pub fn load_from(&self, leaf: LeafId) -> Option<f64> {
        self.load.get(&leaf).copied()
    }

    pub fn queue(&self) -> &LinkQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut LinkQueue {
        &mut self.queue
    }
}

/// A core switch: one [`SpinePort`] per leaf.
#[derive(Debug, Clone)]
pub struct SpineSwitch {
    ports: Vec<SpinePort>,
}

impl SpineSwitch {
    pub fn new(queues: impl IntoIterator<Item = LinkQueue>) -> Self {
        Self {
            ports: queues.into_iter().map(SpinePort::new).collect(),
        }
    }

    pub fn receive(&mut self, leaf: LeafId, pkt: Packet) -> Admit {
        self.ports[leaf.into_usize()].admit(pkt)
    }

    pub fn port(&self, leaf: LeafId) -> &SpinePort {
        &self.ports[leaf.into_usize()]
    }

    pub fn port_mut(&mut self, leaf: LeafId) -> &mut SpinePort {
        &mut self.ports[leaf.into_usize()]
    }

    pub fn ports(&self) -> impl Iterator<Item = &SpinePort> {
        self.ports.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        flow::FlowId,
        packet::{mk_data, Telemetry},
        topology::CoreId,
        units::{Bytes, Gbps},
    };

    use super::*;

    fn mk_port(capacity: u64) -> SpinePort {
        SpinePort::new(
            LinkQueue::builder()
                .name("q-core-leaf-0-1")
                .rate(Gbps::new(40))
                .capacity(Bytes::new(capacity))
                .build(),
        )
    }

    fn stamped(id: usize, size: u64, metric: f64) -> Packet {
        let mut pkt = mk_data(id, FlowId::ZERO, Bytes::new(size));
        pkt.telemetry = Some(Telemetry {
            src_leaf: LeafId::new(3),
            core: CoreId::ZERO,
            dst_leaf: LeafId::new(1),
            metric,
        });
        pkt
    }

    #[test]
    fn raises_metric_to_local_utilization() {
        let mut port = mk_port(10_000);
        let _ = port.admit(stamped(0, 2_000, 0.05));
        let _ = port.admit(stamped(1, 3_000, 0.05));
        let t = port.queue_mut().complete_service().unwrap().pkt.telemetry.unwrap();
        assert!((t.metric - 0.2).abs() < 1e-12);
        let t = port.queue_mut().complete_service().unwrap().pkt.telemetry.unwrap();
        assert!((t.metric - 0.5).abs() < 1e-12);
        assert_eq!(t.src_leaf, LeafId::new(3));
        assert_eq!(t.dst_leaf, LeafId::new(1));
        assert_eq!(port.load_from(LeafId::new(3)), Some(0.5));
    }

    #[test]
    fn keeps_larger_upstream_metric() {
        let mut port = mk_port(10_000);
        let _ = port.admit(stamped(0, 1_000, 0.7));
        let t = port.queue_mut().complete_service().unwrap().pkt.telemetry.unwrap();
        assert_eq!(t.metric, 0.7);
    }

    #[test]
    fn passes_untagged_packets_through() {
        let mut port = mk_port(10_000);
        let _ = port.admit(mk_data(0, FlowId::ZERO, Bytes::new(1_000)));
        let pkt = port.queue_mut().complete_service().unwrap().pkt;
        assert_eq!(pkt.telemetry, None);
        assert_eq!(port.load_from(LeafId::new(3)), None);
    }
}
