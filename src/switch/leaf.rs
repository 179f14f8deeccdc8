use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    flow::FlowKey,
    packet::{Feedback, Packet, PacketKind, Telemetry},
    queue::{Admit, LinkQueue},
    switch::{dre::Dre, table::CongestionTable, CongaParams},
    time::Time,
    topology::{CoreId, LeafId, ServerId, Topology},
};

/// Which port of a leaf a packet is offered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    /// Towards a core switch.
    Uplink(CoreId),
    /// Towards one of this leaf's servers.
    Downlink(ServerId),
}

/// A CONGA leaf switch.
///
/// A leaf owns one uplink queue per core and one downlink queue per attached server, together with
/// all of its congestion state. It never reads or writes another leaf's state; everything it knows
/// about remote paths arrives in-band on packets.
///
/// When adaptive routing is off the leaf behaves as a set of plain [`LinkQueue`]s.
#[derive(Debug, Clone)]
pub struct LeafSwitch {
    id: LeafId,
    topo: Topology,
    params: CongaParams,
    adaptive: bool,

    uplinks: Vec<LinkQueue>,
    downlinks: Vec<LinkQueue>,

    // Per-uplink rate estimators, created on first use
    dre: FxHashMap<CoreId, Dre>,
    // Congestion towards (remote leaf, core), learned from feedback
    to_leaf: CongestionTable<(LeafId, CoreId)>,
    // Congestion from (remote leaf, core), measured on arriving data
    from_leaf: CongestionTable<(LeafId, CoreId)>,
    pins: FxHashMap<u64, CoreId>,
    cursors: FxHashMap<LeafId, usize>,
}

impl LeafSwitch {
    /// `uplinks` is indexed by core id and `downlinks` by the servers' local index.
    pub fn new(
        id: LeafId,
        topo: Topology,
        params: CongaParams,
        adaptive: bool,
        uplinks: Vec<LinkQueue>,
        downlinks: Vec<LinkQueue>,
    ) -> Self {
        assert_eq!(uplinks.len(), topo.cores);
        assert_eq!(downlinks.len(), topo.servers_per_leaf);
        let timeout = params.entry_timeout.into_delta();
        Self {
            id,
            topo,
            params,
            adaptive,
            uplinks,
            downlinks,
            dre: FxHashMap::default(),
            to_leaf: CongestionTable::new(timeout),
            from_leaf: CongestionTable::new(timeout),
            pins: FxHashMap::default(),
            cursors: FxHashMap::default(),
        }
    }

    pub fn receive(&mut self, role: PortRole, pkt: Packet, now: Time) -> Admit {
        let admit = self.port_mut(role).admit(pkt);
        if self.adaptive && admit.is_enqueued() {
            self.process(role, now);
        }
        admit
    }

    // Runs after the packet has been accounted for, so the port's own occupancy includes it.
    fn process(&mut self, role: PortRole, now: Time) {
        let Some(pkt) = self.port_mut(role).tail_mut().map(|pkt| *pkt) else {
            return;
        };
        match (role, pkt.kind) {
            (PortRole::Uplink(core), PacketKind::Data) if pkt.telemetry.is_none() => {
                let dst_leaf = self.topo.leaf_of(pkt.key.dst);
                let metric = self.measure_local_congestion(core, dst_leaf, now);
                let telemetry = Telemetry {
                    src_leaf: self.id,
                    core,
                    dst_leaf,
                    metric,
                };
                trace!(leaf = %self.id, %core, %dst_leaf, metric, "stamp telemetry");
                if let Some(tail) = self.port_mut(role).tail_mut() {
                    tail.telemetry = Some(telemetry);
                }
            }
            (PortRole::Downlink(_), PacketKind::Data) => {
                if let Some(t) = pkt.telemetry.filter(|t| t.dst_leaf == self.id) {
                    debug_assert!(t.metric.is_finite() && t.metric >= 0.0);
                    self.from_leaf.insert((t.src_leaf, t.core), t.metric, now);
                }
            }
            (PortRole::Uplink(_), PacketKind::Ack { echo: Some(echo), .. })
                if echo.dst_leaf == self.id =>
            {
                let selected = self.select_feedback(echo.src_leaf, now);
                if let Some(PacketKind::Ack { feedback, .. }) =
                    self.port_mut(role).tail_mut().map(|pkt| &mut pkt.kind)
                {
                    *feedback = selected;
                }
            }
            (
                PortRole::Downlink(_),
                PacketKind::Ack {
                    echo: Some(echo),
                    feedback: Some(fb),
                    ..
                },
            ) if echo.src_leaf == self.id => {
                self.to_leaf.insert((fb.leaf, fb.core), fb.metric, now);
            }
            _ => {}
        }
    }

    /// Picks the uplink for a new flow, or returns the one the flow is already pinned to.
    ///
    /// Each core is scored by the worse of the local uplink estimate and the remote path metric
    /// towards the destination leaf; the lowest score wins and ties go to the lowest core id.
    pub fn select_uplink(&mut self, key: FlowKey, now: Time) -> CoreId {
        let hash = key.stable_hash();
        if let Some(&core) = self.pins.get(&hash) {
            return core;
        }
        self.evict_stale(now);
        let dst_leaf = self.topo.leaf_of(key.dst);
        let mut best = (CoreId::ZERO, f64::INFINITY);
        for core in self.topo.core_ids() {
            let metric = self.measure_local_congestion(core, dst_leaf, now);
            if metric < best.1 {
                best = (core, metric);
            }
        }
        let (core, metric) = best;
        self.pins.insert(hash, core);
        debug!(leaf = %self.id, %dst_leaf, %core, metric, "conga chose core switch");
        core
    }

    pub fn pinned(&self, key: FlowKey) -> Option<CoreId> {
        self.pins.get(&key.stable_hash()).copied()
    }

    /// Forgets a finished flow's pin.
    pub fn release(&mut self, key: FlowKey) {
        self.pins.remove(&key.stable_hash());
    }

    pub fn measure_local_congestion(&mut self, core: CoreId, dst_leaf: LeafId, now: Time) -> f64 {
        let local = self.dre_at(core, now);
        local.max(self.path_congestion(dst_leaf, core, now))
    }

    fn dre_at(&mut self, core: CoreId, now: Time) -> f64 {
        let utilization = self.uplinks[core.into_usize()].utilization();
        let CongaParams {
            alpha,
            update_interval,
            ..
        } = self.params;
        self.dre
            .entry(core)
            .or_insert_with(|| Dre::new(alpha, update_interval.into_delta()))
            .sample(now, utilization)
    }

    /// The last fed-back congestion towards `dst_leaf` through `core`, or zero if unknown or
    /// expired.
    pub fn path_congestion(&self, dst_leaf: LeafId, core: CoreId, now: Time) -> f64 {
        self.to_leaf.get((dst_leaf, core), now).unwrap_or(0.0)
    }

    // Round-robins over the fresh observations from `remote`, one per core.
    fn select_feedback(&mut self, remote: LeafId, now: Time) -> Option<Feedback> {
        let fresh = self
            .topo
            .core_ids()
            .filter_map(|core| {
                self.from_leaf
                    .get((remote, core), now)
                    .map(|metric| (core, metric))
            })
            .collect::<smallvec::SmallVec<[(CoreId, f64); 8]>>();
        if fresh.is_empty() {
            return None;
        }
        let cursor = self.cursors.entry(remote).or_default();
        let (core, metric) = fresh[*cursor % fresh.len()];
        *cursor = cursor.wrapping_add(1);
        trace!(leaf = %self.id, %remote, %core, metric, "select feedback");
        Some(Feedback {
            leaf: self.id,
            core,
            metric,
        })
    }

    /// Physically drops expired table entries. Reads already ignore them.
    pub fn evict_stale(&mut self, now: Time) {
        let evicted = self.to_leaf.evict_stale(now) + self.from_leaf.evict_stale(now);
        if evicted > 0 {
            trace!(leaf = %self.id, evicted, "evict stale entries");
        }
    }

    pub fn port(&self, role: PortRole) -> &LinkQueue {
        match role {
            PortRole::Uplink(core) => &self.uplinks[core.into_usize()],
            PortRole::Downlink(server) => &self.downlinks[self.topo.local_index(server)],
        }
    }

    pub fn port_mut(&mut self, role: PortRole) -> &mut LinkQueue {
        match role {
            PortRole::Uplink(core) => &mut self.uplinks[core.into_usize()],
            PortRole::Downlink(server) => &mut self.downlinks[self.topo.local_index(server)],
        }
    }

    pub fn ports(&self) -> impl Iterator<Item = &LinkQueue> {
        self.uplinks.iter().chain(self.downlinks.iter())
    }
}
