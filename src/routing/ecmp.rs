use super::{Route, RouteBuilder};
use crate::{flow::FlowKey, topology::CoreId};

/// Stateless hash-based core selection.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct Ecmp {
    cores: usize,
}

impl Ecmp {
    pub fn select_core(&self, key: &FlowKey) -> CoreId {
        CoreId::new((key.src.into_usize() ^ key.dst.into_usize()) % self.cores)
    }

    pub fn route(&self, builder: &RouteBuilder, key: FlowKey) -> Route {
        builder.build(key, |key| self.select_core(key))
    }
}
