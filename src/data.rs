use crate::{
    flow::FlowId,
    queue::QueueStats,
    topology::{CoreId, ServerId},
    units::{Bytes, Nanosecs},
};

/// A flow completion time record.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    /// The flow ID.
    pub id: FlowId,
    /// The resolved source server.
    pub src: ServerId,
    /// The resolved destination server.
    pub dst: ServerId,
    /// The flow size.
    pub size: Bytes,
    /// The start time of the flow.
    pub start: Nanosecs,
    /// The flow completion time. A flow is complete when all of its bytes have been acknowledged
    /// to the source.
    pub fct: Nanosecs,
    /// The core switch the flow crossed, if its servers sit on different leaves.
    pub core: Option<CoreId>,
    /// Acknowledgments that echoed an ECN mark.
    pub ecn_echoes: usize,
}

impl Record {
    /// Goodput in bits per second.
    pub fn throughput(&self) -> f64 {
        if self.fct == Nanosecs::ZERO {
            return 0.0;
        }
        self.size.into_f64() * 8.0 / (self.fct.into_f64() / 1e9)
    }
}

/// Final counters of one fabric queue.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueueRecord {
    pub name: String,
    pub stats: QueueStats,
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Output {
    /// Completed flows, ordered by flow ID.
    pub records: Vec<Record>,
    pub queues: Vec<QueueRecord>,
}

impl Output {
    pub fn queue(&self, name: &str) -> Option<&QueueRecord> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn total_drops(&self) -> u64 {
        self.queues.iter().map(|q| q.stats.dropped).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_of_a_record() {
        let record = Record {
            id: FlowId::ZERO,
            src: ServerId::new(1),
            dst: ServerId::new(2),
            size: Bytes::new(125_000),
            start: Nanosecs::ZERO,
            fct: Nanosecs::new(100_000),
            core: None,
            ecn_echoes: 0,
        };
        assert!((record.throughput() - 10e9).abs() < 1.0);
    }
}
