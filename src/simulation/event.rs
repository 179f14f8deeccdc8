#![allow(clippy::non_canonical_partial_ord_impl)]

use std::cmp::Reverse;

use smallvec::SmallVec;

use crate::time::Time;

use super::Command;

// Most handlers will not yield very many events
pub(crate) type EventList = SmallVec<[Event; 4]>;

/// A command due at a point in time. Events due at the same time fire in the order they were
/// scheduled.
#[derive(Debug, derivative::Derivative)]
#[derivative(PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Event {
    time: Reverse<Time>,
    seq: Reverse<u64>,
    #[derivative(PartialEq = "ignore", PartialOrd = "ignore", Ord = "ignore")]
    pub(crate) cmd: Command,
}

impl Event {
    pub(crate) fn new(time: Time, cmd: impl Into<Command>) -> Self {
        Self {
            time: Reverse(time),
            seq: Reverse(0),
            cmd: cmd.into(),
        }
    }

    pub(crate) fn time(&self) -> Time {
        self.time.0
    }

    pub(crate) fn with_seq(self, seq: u64) -> Self {
        Self {
            seq: Reverse(seq),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::entities::workload::WorkloadCmd;

    use super::*;

    #[test]
    fn earlier_time_first() {
        let e1 = Event::new(Time::ZERO, WorkloadCmd::new_step()).with_seq(5);
        let e2 = Event::new(Time::ONE, WorkloadCmd::new_step()).with_seq(0);
        assert!(e1 > e2);
    }

    #[test]
    fn ties_broken_by_sequence() {
        let e1 = Event::new(Time::ONE, WorkloadCmd::new_step()).with_seq(1);
        let e2 = Event::new(Time::ONE, WorkloadCmd::new_step()).with_seq(2);
        assert!(e1 > e2);
    }
}
