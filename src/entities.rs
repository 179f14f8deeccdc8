pub(crate) mod fabric;
pub(crate) mod host;
pub(crate) mod workload;
