use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::{
    topology::ServerId,
    units::{Bytes, Nanosecs},
};

identifier!(FlowId);

/// The 4-tuple identity of a flow.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    derive_new::new,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct FlowKey {
    pub src: ServerId,
    pub dst: ServerId,
    pub sport: u16,
    pub dport: u16,
}

impl FlowKey {
    /// A hash of the 4-tuple that is identical across runs and processes, used to pin flows to
    /// paths.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// A flow to be injected into the fabric.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FlowDesc {
    pub id: FlowId,
    /// Source server, or zero to pick one at random.
    pub src: usize,
    /// Destination server, or zero to pick one at random.
    pub dst: usize,
    #[serde(default)]
    pub sport: u16,
    #[serde(default)]
    pub dport: u16,
    pub size: Bytes,
    pub start: Nanosecs,
}
