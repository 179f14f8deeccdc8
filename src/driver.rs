use std::path::Path;

use rustc_hash::FxHashSet;
use tracing::info;

use crate::{
    data::Output,
    entities::{fabric::Fabric, host::Hosts, workload::Workload},
    routing::PathPolicy,
    simulation::Simulation,
    switch::CongaParams,
    topology::Topology,
    units::{BitsPerSec, Bytes, Gbps, Kilobytes, Nanosecs},
    FlowDesc, FlowId,
};

/// Simulation parameters. Every field has a default, so a partial JSON document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    // Topology
    #[builder(default = 2)]
    pub cores: usize,
    #[builder(default = 24)]
    pub leaves: usize,
    #[builder(default = 32)]
    pub servers_per_leaf: usize,

    // Buffers
    #[builder(default = Bytes::new(8_192_000), setter(into))]
    pub host_buffer: Bytes,
    #[builder(default = Bytes::new(512_000), setter(into))]
    pub leaf_buffer: Bytes,
    #[builder(default = Bytes::new(1_024_000), setter(into))]
    pub core_buffer: Bytes,

    // Links
    #[builder(default = Gbps::new(10).into_bps(), setter(into))]
    pub host_link_rate: BitsPerSec,
    #[builder(default = Gbps::new(40).into_bps(), setter(into))]
    pub core_link_rate: BitsPerSec,
    #[builder(default = Nanosecs::new(100), setter(into))]
    pub link_delay: Nanosecs,
    #[builder(default = true)]
    pub ecn: bool,

    // Load balancing
    #[builder(default = PathPolicy::Conga)]
    pub policy: PathPolicy,
    #[builder(default)]
    pub conga: CongaParams,

    // Transport
    #[builder(default = Kilobytes::new(100).into_bytes(), setter(into))]
    pub window: Bytes,

    #[builder(default)]
    pub seed: u64,
    #[builder(default, setter(into, strip_option))]
    pub timeout: Option<Nanosecs>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    pub fn topology(&self) -> Topology {
        Topology::new(self.cores, self.leaves, self.servers_per_leaf)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cores == 0 {
            return Err(Error::EmptyTier("core"));
        }
        if self.leaves == 0 {
            return Err(Error::EmptyTier("leaf"));
        }
        if self.servers_per_leaf == 0 {
            return Err(Error::EmptyTier("server per leaf"));
        }
        if self.topology().total_servers() < 2 {
            return Err(Error::TooFewServers);
        }
        let nonzero = [
            ("host link rate", self.host_link_rate.into_u64()),
            ("core link rate", self.core_link_rate.into_u64()),
            ("host buffer", self.host_buffer.into_u64()),
            ("leaf buffer", self.leaf_buffer.into_u64()),
            ("core buffer", self.core_buffer.into_u64()),
            ("window", self.window.into_u64()),
        ];
        if let Some(&(what, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(Error::Zero(what));
        }
        let alpha = self.conga.alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(Error::Alpha(alpha));
        }
        Ok(())
    }

    fn validate_flows(&self, flows: &[FlowDesc]) -> Result<(), Error> {
        let total = self.topology().total_servers();
        let mut ids = FxHashSet::default();
        for flow in flows {
            if !ids.insert(flow.id) {
                return Err(Error::DuplicateFlow(flow.id));
            }
            if let Some(server) = [flow.src, flow.dst].into_iter().find(|&s| s >= total) {
                return Err(Error::UnknownServer {
                    flow: flow.id,
                    server,
                    total,
                });
            }
        }
        Ok(())
    }
}

/// Runs a simulation to completion, or until the configured timeout.
pub fn run(cfg: Config, mut flows: Vec<FlowDesc>) -> Result<Output, Error> {
    cfg.validate()?;
    cfg.validate_flows(&flows)?;
    info!(
        cores = cfg.cores,
        leaves = cfg.leaves,
        servers_per_leaf = cfg.servers_per_leaf,
        policy = ?cfg.policy,
        flows = flows.len(),
        "starting simulation"
    );
    flows.sort_by_key(|f| f.start);
    let workload = Workload::new(flows.into());
    let hosts = Hosts::builder().window(cfg.window).build();
    let fabric = Fabric::new(&cfg);
    let sim = Simulation::builder()
        .workload(workload)
        .hosts(hosts)
        .fabric(fabric)
        .timeout(cfg.timeout.map(|v| v.into_time()))
        .build();
    Ok(sim.run())
}

pub fn read_flows(path: impl AsRef<Path>) -> Result<Vec<FlowDesc>, Error> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

pub fn read_config(path: impl AsRef<Path>) -> Result<Config, Error> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serde error")]
    Serde(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("the fabric needs at least one {0}")]
    EmptyTier(&'static str),

    #[error("the fabric needs at least two servers")]
    TooFewServers,

    #[error("{0} must be nonzero")]
    Zero(&'static str),

    #[error("smoothing factor {0} is outside (0, 1]")]
    Alpha(f64),

    #[error("flow {flow} names server {server}, but the fabric has {total}")]
    UnknownServer {
        flow: FlowId,
        server: usize,
        total: usize,
    },

    #[error("flow {0} is listed more than once")]
    DuplicateFlow(FlowId),
}
