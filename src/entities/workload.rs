use std::collections::VecDeque;

use crate::{
    entities::host::HostCmd,
    flow::FlowDesc,
    simulation::{event::EventList, Context},
};

/// Injects flows at their start times. Flows must be sorted by start time.
#[derive(Debug, Clone, derive_new::new)]
pub(crate) struct Workload {
    flows: VecDeque<FlowDesc>,
}

impl Workload {
    #[must_use]
    pub(crate) fn step(&mut self, mut ctx: Context) -> EventList {
        if let Some(desc) = self.flows.pop_front() {
            let delta = desc.start.into_time().saturating_since(ctx.cur_time);
            ctx.schedule(delta, HostCmd::new_flow_arrive(desc));

            // Reschedule the next flow arrival
            if let Some(&FlowDesc {
                start: next_start, ..
            }) = self.flows.front()
            {
                let delta = next_start.into_time().saturating_since(ctx.cur_time);
                ctx.schedule(delta, WorkloadCmd::new_step());
            }
        }
        ctx.into_events()
    }
}

#[derive(Debug, Copy, Clone, derive_new::new)]
pub(crate) enum WorkloadCmd {
    Step,
}
