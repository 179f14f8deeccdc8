use rand::{rngs::StdRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    data::QueueRecord,
    driver::Config,
    entities::host::HostCmd,
    flow::{FlowDesc, FlowId, FlowKey},
    packet::Packet,
    queue::{Admit, Departure, LinkQueue},
    routing::{Ecmp, PathPolicy, Route, RouteBuilder},
    simulation::{event::EventList, Context},
    switch::{
        leaf::{LeafSwitch, PortRole},
        spine::SpineSwitch,
    },
    time::{Delta, Time},
    topology::{CoreId, Hop, LeafId, ServerId, Topology},
    units::{BitsPerSec, Bytes},
};

/// Every queue between the servers, and the routes installed through them.
#[derive(Debug)]
pub(crate) struct Fabric {
    topo: Topology,
    policy: PathPolicy,
    builder: RouteBuilder,
    ecmp: Ecmp,
    rng: StdRng,
    link_delay: Delta,

    // Server NICs, indexed by server id
    nics: Vec<LinkQueue>,
    leaves: Vec<LeafSwitch>,
    spines: Vec<SpineSwitch>,

    routes: FxHashMap<FlowId, Route>,
}

impl Fabric {
    pub(crate) fn new(cfg: &Config) -> Self {
        let topo = cfg.topology();
        let mk_queue = |hop: Hop, rate: BitsPerSec, capacity: Bytes| {
            let queue = LinkQueue::builder()
                .name(hop.name(&topo))
                .rate(rate)
                .capacity(capacity)
                .ecn(cfg.ecn)
                .build();
            debug!(queue = queue.name(), %rate, %capacity, "register queue");
            queue
        };
        let nics = (0..topo.total_servers())
            .map(|s| {
                let hop = Hop::new_host_up(ServerId::new(s));
                mk_queue(hop, cfg.host_link_rate, cfg.host_buffer)
            })
            .collect();
        let leaves = (0..topo.leaves)
            .map(LeafId::new)
            .map(|leaf| {
                let uplinks = topo
                    .core_ids()
                    .map(|core| {
                        let hop = Hop::new_leaf_up(leaf, core);
                        mk_queue(hop, cfg.core_link_rate, cfg.leaf_buffer)
                    })
                    .collect();
                let downlinks = (0..topo.servers_per_leaf)
                    .map(|local| {
                        let hop = Hop::new_leaf_down(leaf, topo.server(leaf, local));
                        mk_queue(hop, cfg.host_link_rate, cfg.leaf_buffer)
                    })
                    .collect();
                let adaptive = cfg.policy == PathPolicy::Conga;
                LeafSwitch::new(leaf, topo, cfg.conga, adaptive, uplinks, downlinks)
            })
            .collect();
        let spines = topo
            .core_ids()
            .map(|core| {
                let ports = (0..topo.leaves).map(|leaf| {
                    let hop = Hop::new_spine_down(core, LeafId::new(leaf));
                    mk_queue(hop, cfg.core_link_rate, cfg.core_buffer)
                });
                SpineSwitch::new(ports)
            })
            .collect();
        Self {
            topo,
            policy: cfg.policy,
            builder: RouteBuilder::new(topo),
            ecmp: Ecmp::new(topo.cores),
            rng: StdRng::seed_from_u64(cfg.seed),
            link_delay: cfg.link_delay.into_delta(),
            nics,
            leaves,
            spines,
            routes: FxHashMap::default(),
        }
    }

    /// Resolves a new flow's endpoints, picks its core under the configured policy and installs
    /// its route.
    pub(crate) fn open_route(&mut self, desc: &FlowDesc, now: Time) -> Route {
        let (src, dst) = self.builder.resolve(desc.src, desc.dst, &mut self.rng);
        let key = FlowKey::new(src, dst, desc.sport, desc.dport);
        let route = match self.policy {
            PathPolicy::Ecmp => self.ecmp.route(&self.builder, key),
            PathPolicy::Conga => {
                let leaf = &mut self.leaves[self.topo.leaf_of(src).into_usize()];
                self.builder.build(key, |key| leaf.select_uplink(*key, now))
            }
            PathPolicy::Random => {
                let (rng, cores) = (&mut self.rng, self.topo.cores);
                self.builder
                    .build(key, |_| CoreId::new(rng.gen_range(0..cores)))
            }
        };
        debug!(
            flow = %desc.id,
            %src,
            %dst,
            core = ?route.core,
            policy = ?self.policy,
            "install route"
        );
        self.routes.insert(desc.id, route.clone());
        route
    }

    /// Uninstalls a finished flow's route and releases its pin at the source leaf.
    pub(crate) fn close_route(&mut self, id: FlowId) {
        let Some(route) = self.routes.remove(&id) else {
            return;
        };
        if route.core.is_some() {
            let leaf = self.topo.leaf_of(route.key.src);
            self.leaves[leaf.into_usize()].release(route.key);
        }
    }

    #[cfg(test)]
    pub(crate) fn route(&self, id: FlowId) -> Option<&Route> {
        self.routes.get(&id)
    }

    fn hop_of(&self, pkt: &Packet) -> Option<Hop> {
        self.routes
            .get(&pkt.flow_id)
            .and_then(|route| route.chain(pkt.direction).get(pkt.hop))
            .copied()
    }

    /// Offers a packet to the queue at its current hop.
    #[must_use]
    pub(crate) fn receive(&mut self, pkt: Packet, mut ctx: Context) -> EventList {
        let Some(hop) = self.hop_of(&pkt) else {
            debug!(flow = %pkt.flow_id, pkt = %pkt.id, "discarded packet without a route");
            return ctx.into_events();
        };
        let now = ctx.cur_time;
        let admit = match hop {
            Hop::HostUp { server } => self.nics[server.into_usize()].admit(pkt),
            Hop::LeafUp { leaf, core } => {
                self.leaves[leaf.into_usize()].receive(PortRole::Uplink(core), pkt, now)
            }
            Hop::SpineDown { core, leaf } => self.spines[core.into_usize()].receive(leaf, pkt),
            Hop::LeafDown { leaf, server } => {
                self.leaves[leaf.into_usize()].receive(PortRole::Downlink(server), pkt, now)
            }
        };
        match admit {
            Admit::Enqueued {
                start_service: true,
            } => {
                if let Some(delta) = self.queue(hop).head_drain_time() {
                    ctx.schedule(delta, FabricCmd::new_step(hop));
                }
            }
            Admit::Enqueued {
                start_service: false,
            } => {}
            // The queue has already accounted for the drop
            Admit::Dropped(_) => {}
        }
        ctx.into_events()
    }

    /// Finishes serializing the head packet at `hop` and puts it on the wire.
    #[must_use]
    pub(crate) fn step(&mut self, hop: Hop, mut ctx: Context) -> EventList {
        let Some(Departure { mut pkt, next }) = self.queue_mut(hop).complete_service() else {
            return ctx.into_events();
        };
        if let Some(delta) = next {
            ctx.schedule(delta, FabricCmd::new_step(hop));
        }
        pkt.hop += 1;
        let remaining = self
            .routes
            .get(&pkt.flow_id)
            .map_or(0, |route| route.chain(pkt.direction).len().saturating_sub(pkt.hop));
        trace!(flow = %pkt.flow_id, pkt = %pkt.id, ?hop, remaining, "transmit");
        if remaining > 0 {
            ctx.schedule(self.link_delay, FabricCmd::new_receive(pkt));
        } else {
            ctx.schedule(self.link_delay, HostCmd::new_deliver(pkt));
        }
        ctx.into_events()
    }

    pub(crate) fn queue(&self, hop: Hop) -> &LinkQueue {
        match hop {
            Hop::HostUp { server } => &self.nics[server.into_usize()],
            Hop::LeafUp { leaf, core } => self.leaves[leaf.into_usize()].port(PortRole::Uplink(core)),
            Hop::SpineDown { core, leaf } => self.spines[core.into_usize()].port(leaf).queue(),
            Hop::LeafDown { leaf, server } => {
                self.leaves[leaf.into_usize()].port(PortRole::Downlink(server))
            }
        }
    }

    fn queue_mut(&mut self, hop: Hop) -> &mut LinkQueue {
        match hop {
            Hop::HostUp { server } => &mut self.nics[server.into_usize()],
            Hop::LeafUp { leaf, core } => {
                self.leaves[leaf.into_usize()].port_mut(PortRole::Uplink(core))
            }
            Hop::SpineDown { core, leaf } => {
                self.spines[core.into_usize()].port_mut(leaf).queue_mut()
            }
            Hop::LeafDown { leaf, server } => {
                self.leaves[leaf.into_usize()].port_mut(PortRole::Downlink(server))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn leaf(&self, leaf: LeafId) -> &LeafSwitch {
        &self.leaves[leaf.into_usize()]
    }

    pub(crate) fn queue_records(&self) -> Vec<QueueRecord> {
        let spine_queues = self
            .spines
            .iter()
            .flat_map(|spine| spine.ports().map(|port| port.queue()));
        self.nics
            .iter()
            .chain(self.leaves.iter().flat_map(|leaf| leaf.ports()))
            .chain(spine_queues)
            .map(|queue| QueueRecord {
                name: queue.name().to_owned(),
                stats: queue.stats(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, derive_new::new)]
pub(crate) enum FabricCmd {
    Receive(Packet),
    Step(Hop),
    Release(FlowId),
}

#[cfg(test)]
mod tests {
    use crate::{
        packet::{PacketId, PacketKind},
        simulation::Command,
        switch::CongaParams,
        units::{Gbps, Nanosecs},
    };

    use super::*;

    fn config(policy: PathPolicy) -> Config {
        Config::builder()
            .cores(2)
            .leaves(3)
            .servers_per_leaf(4)
            .policy(policy)
            .conga(
                CongaParams::builder()
                    .update_interval(Nanosecs::new(1))
                    .build(),
            )
            .build()
    }

    fn flow(id: usize, src: usize, dst: usize) -> FlowDesc {
        FlowDesc {
            id: FlowId::new(id),
            src,
            dst,
            sport: 0,
            dport: 0,
            size: Bytes::new(10_000),
            start: Nanosecs::ZERO,
        }
    }

    fn data(id: usize, flow: FlowId, key: FlowKey) -> Packet {
        Packet::builder()
            .id(PacketId::new(id))
            .flow_id(flow)
            .key(key)
            .size(Packet::MSS)
            .kind(PacketKind::Data)
            .build()
    }

    /// Pushes one packet hop by hop through an otherwise idle fabric, returning it after every
    /// departure.
    fn walk(fabric: &mut Fabric, pkt: Packet, mut now: Time) -> anyhow::Result<Vec<Packet>> {
        let mut seen = Vec::new();
        let mut pending = Some(pkt);
        while let Some(pkt) = pending.take() {
            let events = fabric.receive(pkt, Context::new(now));
            let step = events
                .into_iter()
                .find_map(|ev| match ev.cmd {
                    Command::Fabric(FabricCmd::Step(hop)) => Some((ev.time(), hop)),
                    _ => None,
                })
                .ok_or_else(|| anyhow::anyhow!("an idle queue must start service"))?;
            now = step.0;
            for ev in fabric.step(step.1, Context::new(now)) {
                now = ev.time();
                match ev.cmd {
                    Command::Fabric(FabricCmd::Receive(pkt)) => {
                        seen.push(pkt);
                        pending = Some(pkt);
                    }
                    Command::Host(HostCmd::Deliver(pkt)) => seen.push(pkt),
                    _ => {}
                }
            }
        }
        Ok(seen)
    }

    #[test]
    fn registers_every_queue() {
        let fabric = Fabric::new(&config(PathPolicy::Ecmp));
        let records = fabric.queue_records();
        // 12 NICs, 3 leaves * (2 up + 4 down), 2 cores * 3 down
        assert_eq!(records.len(), 12 + 18 + 6);
        let names = records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert!(names.contains(&"q-server-leaf-2-3"));
        assert!(names.contains(&"q-leaf-core-1-2"));
        assert!(names.contains(&"q-core-leaf-0-2"));
        assert!(names.contains(&"q-leaf-server-0-1"));
    }

    #[test]
    fn queues_follow_configured_rates() {
        let fabric = Fabric::new(&config(PathPolicy::Ecmp));
        let nic = fabric.queue(Hop::new_host_up(ServerId::new(1)));
        assert_eq!(nic.rate(), Gbps::new(10).into_bps());
        assert_eq!(nic.capacity(), Bytes::new(8_192_000));
        let up = fabric.queue(Hop::new_leaf_up(LeafId::new(0), CoreId::ONE));
        assert_eq!(up.rate(), Gbps::new(40).into_bps());
        assert_eq!(up.capacity(), Bytes::new(512_000));
        let down = fabric.queue(Hop::new_spine_down(CoreId::ONE, LeafId::new(2)));
        assert_eq!(down.capacity(), Bytes::new(1_024_000));
    }

    #[test]
    fn ecmp_route_uses_xor_core() {
        let mut fabric = Fabric::new(&config(PathPolicy::Ecmp));
        let route = fabric.open_route(&flow(0, 1, 6), Time::ZERO);
        // 1 ^ 6 = 7
        assert_eq!(route.core, Some(CoreId::ONE));
        assert_eq!(route.fwd.len(), 4);
        assert_eq!(fabric.route(FlowId::ZERO), Some(&route));
    }

    #[test]
    fn conga_pins_until_release() {
        let mut fabric = Fabric::new(&config(PathPolicy::Conga));
        let route = fabric.open_route(&flow(0, 1, 6), Time::ZERO);
        let core = route.core;
        assert_eq!(core, Some(CoreId::ZERO));
        assert_eq!(fabric.leaf(LeafId::new(0)).pinned(route.key), core);
        fabric.close_route(FlowId::ZERO);
        assert_eq!(fabric.leaf(LeafId::new(0)).pinned(route.key), None);
        assert_eq!(fabric.route(FlowId::ZERO), None);
    }

    #[test]
    fn same_leaf_flows_skip_the_core() {
        let mut fabric = Fabric::new(&config(PathPolicy::Conga));
        let route = fabric.open_route(&flow(0, 1, 2), Time::ZERO);
        assert_eq!(route.core, None);
        assert_eq!(fabric.leaf(LeafId::new(0)).pinned(route.key), None);
    }

    #[test]
    fn data_packet_is_stamped_and_delivered() -> anyhow::Result<()> {
        let mut fabric = Fabric::new(&config(PathPolicy::Conga));
        let route = fabric.open_route(&flow(0, 1, 6), Time::ZERO);
        let seen = walk(&mut fabric, data(0, FlowId::ZERO, route.key), Time::ZERO)?;
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].telemetry, None);
        let stamped = seen[1].telemetry.ok_or_else(|| anyhow::anyhow!("missing telemetry"))?;
        assert_eq!(stamped.src_leaf, LeafId::new(0));
        assert_eq!(stamped.dst_leaf, LeafId::new(1));
        assert_eq!(Some(stamped.core), route.core);
        // Metrics never decrease along the path
        let metrics = seen[1..]
            .iter()
            .filter_map(|pkt| pkt.telemetry.map(|t| t.metric))
            .collect::<Vec<_>>();
        assert_eq!(metrics.len(), 3);
        assert!(metrics.windows(2).all(|w| w[0] <= w[1]));
        assert!(metrics[1] > 0.0);
        Ok(())
    }

    #[test]
    fn ack_carries_feedback_back_to_source() -> anyhow::Result<()> {
        let mut fabric = Fabric::new(&config(PathPolicy::Conga));
        let route = fabric.open_route(&flow(0, 1, 6), Time::ZERO);
        let seen = walk(&mut fabric, data(0, FlowId::ZERO, route.key), Time::ZERO)?;
        let delivered = seen[seen.len() - 1];
        let metric = delivered.telemetry.map(|t| t.metric).unwrap_or_default();

        let ack = delivered.ack(PacketId::new(1));
        let seen = walk(&mut fabric, ack, Time::new(10_000_000))?;
        assert_eq!(seen.len(), 4);
        let feedback = seen[1]
            .feedback()
            .ok_or_else(|| anyhow::anyhow!("destination leaf must attach feedback"))?;
        assert_eq!(feedback.leaf, LeafId::new(1));
        assert_eq!(Some(feedback.core), route.core);
        assert_eq!(feedback.metric, metric);
        // Acks never pick up telemetry of their own
        assert!(seen.iter().all(|pkt| pkt.telemetry.is_none()));

        let core = route.core.unwrap_or_default();
        let now = Time::new(20_000_000);
        assert_eq!(
            fabric.leaf(LeafId::new(0)).path_congestion(LeafId::new(1), core, now),
            metric
        );
        Ok(())
    }

    #[test]
    fn ecmp_fabric_never_stamps() -> anyhow::Result<()> {
        let mut fabric = Fabric::new(&config(PathPolicy::Ecmp));
        let route = fabric.open_route(&flow(0, 1, 6), Time::ZERO);
        let seen = walk(&mut fabric, data(0, FlowId::ZERO, route.key), Time::ZERO)?;
        assert!(seen.iter().all(|pkt| pkt.telemetry.is_none()));
        Ok(())
    }

    #[test]
    fn unrouted_packets_are_discarded() {
        let mut fabric = Fabric::new(&config(PathPolicy::Ecmp));
        let key = FlowKey::new(ServerId::new(1), ServerId::new(6), 0, 0);
        let events = fabric.receive(data(0, FlowId::new(9), key), Context::new(Time::ZERO));
        assert!(events.is_empty());
    }
}
