use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    flow::FlowId,
    packet::{Packet, PacketFlag},
    time::Delta,
    units::{BitsPerSec, Bytes, Gbps},
};

/// A FIFO, drop-tail, byte-serviced queue with DCTCP-style ECN marking.
///
/// Every switch port in the fabric is one of these. The queue does not schedule anything itself:
/// callers start service when [`LinkQueue::admit`] reports that the queue was idle and call
/// [`LinkQueue::complete_service`] once the head packet's drain time has elapsed.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct LinkQueue {
    #[builder(setter(into))]
    name: String,
    #[builder(setter(into))]
    rate: BitsPerSec,
    #[builder(setter(into))]
    capacity: Bytes,
    #[builder(default = true)]
    ecn: bool,

    #[builder(default, setter(skip))]
    occupancy: Bytes,
    #[builder(default, setter(skip))]
    inner: VecDeque<Packet>,
    #[builder(default, setter(skip))]
    stats: QueueStats,
}

/// The outcome of offering a packet to a queue.
#[derive(Debug)]
#[must_use]
pub enum Admit {
    /// The packet was appended. If the queue was idle, the caller must begin service.
    Enqueued { start_service: bool },
    /// The packet did not fit and is handed back to be discarded.
    Dropped(Packet),
}

impl Admit {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, Admit::Enqueued { .. })
    }
}

/// The packet leaving a queue, plus the drain time of the next head packet if there is one.
#[derive(Debug)]
pub struct Departure {
    pub pkt: Packet,
    pub next: Option<Delta>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dropped: u64,
    pub serviced: u64,
    pub marked: u64,
    pub peak_occupancy: Bytes,
}

impl LinkQueue {
    pub fn admit(&mut self, pkt: Packet) -> Admit {
        if self.occupancy + pkt.size > self.capacity {
            self.stats.dropped += 1;
            debug!(
                queue = %self.name,
                occupancy = %self.occupancy,
                size = %pkt.size,
                capacity = %self.capacity,
                flow = %pkt.flow_id,
                "dropped packet due to overflow"
            );
            return Admit::Dropped(pkt);
        }
        let was_empty = self.inner.is_empty();
        self.occupancy += pkt.size;
        self.inner.push_back(pkt);
        self.stats.enqueued += 1;
        self.stats.peak_occupancy = self.stats.peak_occupancy.max(self.occupancy);
        trace!(queue = %self.name, occupancy = %self.occupancy, pkt = %pkt.id, "enqueue");
        Admit::Enqueued {
            start_service: was_empty,
        }
    }

    /// Removes the head packet and applies ECN marking against the remaining occupancy.
    pub fn complete_service(&mut self) -> Option<Departure> {
        let mut pkt = self.inner.pop_front()?;
        self.occupancy -= pkt.size;
        self.stats.serviced += 1;
        self.apply_ecn_mark(&mut pkt);
        trace!(queue = %self.name, occupancy = %self.occupancy, pkt = %pkt.id, "service");
        let next = self.head_drain_time();
        Some(Departure { pkt, next })
    }

    fn apply_ecn_mark(&mut self, pkt: &mut Packet) {
        if self.ecn && self.occupancy > self.ecn_threshold() {
            pkt.flags.set(PacketFlag::EcnFwd);
            self.stats.marked += 1;
            trace!(queue = %self.name, pkt = %pkt.id, "ecn mark");
        }
    }

    /// The DCTCP marking threshold for this queue's link rate.
    pub fn ecn_threshold(&self) -> Bytes {
        let mss = Packet::MSS.into_u64();
        if self.rate <= Gbps::new(1).into_bps() {
            Bytes::new(10 * mss)
        } else if self.rate <= Gbps::new(10).into_bps() {
            Bytes::new(30 * mss)
        } else {
            Bytes::new(90 * mss)
        }
    }

    pub fn drain_time(&self, pkt: &Packet) -> Delta {
        self.rate
            .ps_per_byte()
            .into_delta()
            .saturating_mul(pkt.size.into_u64())
    }

    pub fn head_drain_time(&self) -> Option<Delta> {
        self.inner.front().map(|pkt| self.drain_time(pkt))
    }

    pub fn utilization(&self) -> f64 {
        self.occupancy.into_f64() / self.capacity.into_f64()
    }

    /// Number of queued packets per flow.
    pub fn flow_counts(&self) -> FxHashMap<FlowId, usize> {
        let mut counts = FxHashMap::default();
        for pkt in &self.inner {
            *counts.entry(pkt.flow_id).or_insert(0) += 1;
        }
        counts
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn occupancy(&self) -> Bytes {
        self.occupancy
    }

    pub fn capacity(&self) -> Bytes {
        self.capacity
    }

    pub fn rate(&self) -> BitsPerSec {
        self.rate
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    delegate::delegate! {
        to self.inner {
            pub fn len(&self) -> usize;
            pub fn is_empty(&self) -> bool;
            #[call(back_mut)]
            pub(crate) fn tail_mut(&mut self) -> Option<&mut Packet>;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{packet::mk_data, units::Picosecs};

    use super::*;

    fn mk_queue(rate: Gbps, capacity: u64) -> LinkQueue {
        LinkQueue::builder()
            .name("q-test")
            .rate(rate)
            .capacity(Bytes::new(capacity))
            .build()
    }

    #[test]
    fn admission_is_all_or_nothing_at_capacity() -> anyhow::Result<()> {
        let mut q = mk_queue(Gbps::new(10), 150_000);
        for i in 0..100 {
            let admit = q.admit(mk_data(i, FlowId::ZERO, Packet::MSS));
            assert!(admit.is_enqueued(), "packet {i} should fit");
        }
        assert_eq!(q.occupancy(), Bytes::new(150_000));
        match q.admit(mk_data(100, FlowId::ZERO, Packet::MSS)) {
            Admit::Dropped(pkt) => assert_eq!(pkt.id.into_usize(), 100),
            Admit::Enqueued { .. } => anyhow::bail!("101st packet must be rejected"),
        }
        assert_eq!(q.occupancy(), Bytes::new(150_000));
        assert_eq!(q.len(), 100);
        assert_eq!(q.stats().dropped, 1);
        Ok(())
    }

    #[test]
    fn small_packet_fits_after_large_one_is_rejected() {
        let mut q = mk_queue(Gbps::new(10), 2_000);
        assert!(q.admit(mk_data(0, FlowId::ZERO, Packet::MSS)).is_enqueued());
        assert!(!q.admit(mk_data(1, FlowId::ZERO, Packet::MSS)).is_enqueued());
        assert!(q.admit(mk_data(2, FlowId::ZERO, Bytes::new(500))).is_enqueued());
        assert_eq!(q.occupancy(), Bytes::new(2_000));
    }

    #[test]
    fn service_starts_only_when_idle() {
        let mut q = mk_queue(Gbps::new(10), 100_000);
        assert!(matches!(
            q.admit(mk_data(0, FlowId::ZERO, Packet::MSS)),
            Admit::Enqueued {
                start_service: true
            }
        ));
        assert!(matches!(
            q.admit(mk_data(1, FlowId::ZERO, Packet::MSS)),
            Admit::Enqueued {
                start_service: false
            }
        ));
    }

    #[test]
    fn fifo_regardless_of_size() {
        let mut q = mk_queue(Gbps::new(10), 100_000);
        let sizes = [1_500, 64, 900, 64, 1_500];
        for (i, &sz) in sizes.iter().enumerate() {
            let _ = q.admit(mk_data(i, FlowId::ZERO, Bytes::new(sz)));
        }
        let mut order = Vec::new();
        while let Some(dep) = q.complete_service() {
            order.push(dep.pkt.id.into_usize());
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(q.occupancy(), Bytes::ZERO);
    }

    #[test]
    fn departure_reports_next_drain_time() {
        let mut q = mk_queue(Gbps::new(10), 100_000);
        let _ = q.admit(mk_data(0, FlowId::ZERO, Packet::MSS));
        let _ = q.admit(mk_data(1, FlowId::ZERO, Bytes::new(100)));
        let first = q.complete_service().unwrap();
        assert_eq!(first.next, Some(Picosecs::new(80_000).into_delta()));
        let second = q.complete_service().unwrap();
        assert_eq!(second.next, None);
        assert!(q.complete_service().is_none());
    }

    #[test]
    fn drain_time_is_size_times_per_byte_time() {
        let q = mk_queue(Gbps::new(10), 100_000);
        let pkt = mk_data(0, FlowId::ZERO, Packet::MSS);
        // 1500 B at 800 ps/B
        assert_eq!(q.drain_time(&pkt), Picosecs::new(1_200_000).into_delta());
    }

    #[test]
    fn ecn_threshold_tiers() {
        assert_eq!(mk_queue(Gbps::new(1), 1).ecn_threshold(), Bytes::new(15_000));
        assert_eq!(mk_queue(Gbps::new(10), 1).ecn_threshold(), Bytes::new(45_000));
        assert_eq!(mk_queue(Gbps::new(40), 1).ecn_threshold(), Bytes::new(135_000));
    }

    fn serve_head_with_remaining(remaining: usize) -> Packet {
        let mut q = mk_queue(Gbps::new(1), 100_000);
        let _ = q.admit(mk_data(0, FlowId::ZERO, Packet::MSS));
        for i in 0..remaining {
            let _ = q.admit(mk_data(i + 1, FlowId::ONE, Bytes::new(1_000)));
        }
        q.complete_service().unwrap().pkt
    }

    #[test]
    fn ecn_marks_above_threshold_after_dequeue() {
        // 16 000 B remain behind the departing packet; the 1 Gbps threshold is 15 000 B.
        let pkt = serve_head_with_remaining(16);
        assert!(pkt.flags.contains(PacketFlag::EcnFwd));
    }

    #[test]
    fn ecn_does_not_mark_below_threshold() {
        let pkt = serve_head_with_remaining(14);
        assert!(!pkt.flags.contains(PacketFlag::EcnFwd));
    }

    #[test]
    fn ecn_disabled_never_marks() {
        let mut q = LinkQueue::builder()
            .name("q-test")
            .rate(Gbps::new(1))
            .capacity(Bytes::new(100_000))
            .ecn(false)
            .build();
        for i in 0..40 {
            let _ = q.admit(mk_data(i, FlowId::ZERO, Packet::MSS));
        }
        let pkt = q.complete_service().unwrap().pkt;
        assert!(!pkt.flags.contains(PacketFlag::EcnFwd));
        assert_eq!(q.stats().marked, 0);
    }

    #[test]
    fn flow_counts_group_queued_packets() {
        let mut q = mk_queue(Gbps::new(10), 100_000);
        for i in 0..3 {
            let _ = q.admit(mk_data(i, FlowId::ZERO, Packet::MSS));
        }
        let _ = q.admit(mk_data(3, FlowId::ONE, Packet::MSS));
        let counts = q.flow_counts();
        assert_eq!(counts.get(&FlowId::ZERO), Some(&3));
        assert_eq!(counts.get(&FlowId::ONE), Some(&1));
    }
}
