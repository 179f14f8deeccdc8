//! Leaf-spine topology: identifiers, fan-out and queue addressing.

identifier!(ServerId);
identifier!(LeafId);
identifier!(CoreId);

/// Fan-out of a two-tier leaf-spine fabric.
///
/// Servers are numbered globally; server `s` hangs off leaf `s / servers_per_leaf` at local port
/// `s % servers_per_leaf`. Every leaf has one uplink to every core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct Topology {
    pub cores: usize,
    pub leaves: usize,
    pub servers_per_leaf: usize,
}

impl Topology {
    pub fn total_servers(&self) -> usize {
        self.leaves * self.servers_per_leaf
    }

    pub fn leaf_of(&self, server: ServerId) -> LeafId {
        LeafId::new(server.into_usize() / self.servers_per_leaf)
    }

    pub fn local_index(&self, server: ServerId) -> usize {
        server.into_usize() % self.servers_per_leaf
    }

    pub fn server(&self, leaf: LeafId, local: usize) -> ServerId {
        ServerId::new(leaf.into_usize() * self.servers_per_leaf + local)
    }

    pub fn core_ids(&self) -> impl Iterator<Item = CoreId> {
        (0..self.cores).map(CoreId::new)
    }
}

/// One queue in the fabric. Every queue is followed by a fixed-delay link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_new::new)]
pub enum Hop {
    /// Server NIC towards its leaf.
    HostUp { server: ServerId },
    /// Leaf port towards a core.
    LeafUp { leaf: LeafId, core: CoreId },
    /// Core port towards a leaf.
    SpineDown { core: CoreId, leaf: LeafId },
    /// Leaf port towards one of its servers.
    LeafDown { leaf: LeafId, server: ServerId },
}

impl Hop {
    /// The registered name of the queue at this hop.
    pub fn name(&self, topo: &Topology) -> String {
        match *self {
            Hop::HostUp { server } => format!(
                "q-server-leaf-{}-{}",
                topo.leaf_of(server),
                topo.local_index(server)
            ),
            Hop::LeafUp { leaf, core } => format!("q-leaf-core-{core}-{leaf}"),
            Hop::SpineDown { core, leaf } => format!("q-core-leaf-{core}-{leaf}"),
            Hop::LeafDown { leaf, server } => {
                format!("q-leaf-server-{leaf}-{}", topo.local_index(server))
            }
        }
    }
}
