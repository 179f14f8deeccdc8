//! Turning a flow's endpoints into forward and reverse hop chains.

mod ecmp;

use rand::Rng;
use smallvec::{smallvec, SmallVec};

pub use self::ecmp::Ecmp;
use crate::{
    flow::FlowKey,
    packet::Direction,
    topology::{CoreId, Hop, ServerId, Topology},
};

/// At most four queues between two servers in a two-tier fabric.
pub type HopChain = SmallVec<[Hop; 4]>;

/// How the source leaf picks a core for a new flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathPolicy {
    /// Static hash of the endpoints.
    Ecmp,
    /// Adaptive, driven by in-band congestion feedback.
    Conga,
    /// Uniformly random core per flow.
    Random,
}

/// A flow's installed path. Both directions cross the same core, so feedback carried on acks
/// describes the path the data took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub key: FlowKey,
    /// `None` when both servers share a leaf.
    pub core: Option<CoreId>,
    pub fwd: HopChain,
    pub rev: HopChain,
}

impl Route {
    pub fn chain(&self, direction: Direction) -> &HopChain {
        match direction {
            Direction::Forward => &self.fwd,
            Direction::Reverse => &self.rev,
        }
    }
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct RouteBuilder {
    topo: Topology,
}

impl RouteBuilder {
    pub fn topology(&self) -> Topology {
        self.topo
    }

    /// Resolves raw endpoint ids, where zero means "pick at random", into two distinct servers.
    ///
    /// A random destination is drawn from the other servers. An explicit destination equal to the
    /// source is moved to the next server.
    pub fn resolve(&self, src: usize, dst: usize, rng: &mut impl Rng) -> (ServerId, ServerId) {
        let total = self.topo.total_servers();
        debug_assert!(total >= 2);
        let src = if src == 0 {
            rng.gen_range(0..total)
        } else {
            src
        };
        let dst = if dst == 0 {
            let dst = rng.gen_range(0..total - 1);
            if dst >= src {
                dst + 1
            } else {
                dst
            }
        } else if dst == src {
            (dst + 1) % total
        } else {
            dst
        };
        (ServerId::new(src), ServerId::new(dst))
    }

    /// Builds both chains for `key`. `select` is asked for a core only if the servers sit on
    /// different leaves.
    pub fn build(&self, key: FlowKey, select: impl FnOnce(&FlowKey) -> CoreId) -> Route {
        let crosses = self.topo.leaf_of(key.src) != self.topo.leaf_of(key.dst);
        let core = crosses.then(|| select(&key));
        Route {
            key,
            core,
            fwd: self.chain(key.src, key.dst, core),
            rev: self.chain(key.dst, key.src, core),
        }
    }

    fn chain(&self, from: ServerId, to: ServerId, core: Option<CoreId>) -> HopChain {
        let src_leaf = self.topo.leaf_of(from);
        let dst_leaf = self.topo.leaf_of(to);
        let mut hops: HopChain = smallvec![Hop::new_host_up(from)];
        if let Some(core) = core.filter(|_| src_leaf != dst_leaf) {
            hops.push(Hop::new_leaf_up(src_leaf, core));
            hops.push(Hop::new_spine_down(core, dst_leaf));
        }
        hops.push(Hop::new_leaf_down(dst_leaf, to));
        hops
    }
}
