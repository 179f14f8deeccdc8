pub(crate) mod event;
mod schedule;

use tracing::{debug, info};

use crate::{
    data::Output,
    entities::{
        fabric::{Fabric, FabricCmd},
        host::{HostCmd, Hosts},
        workload::{Workload, WorkloadCmd},
    },
    time::{Delta, Time},
};

use self::{
    event::{Event, EventList},
    schedule::Schedule,
};

#[derive(Debug, typed_builder::TypedBuilder)]
pub(crate) struct Simulation {
    // Run-time
    #[builder(default, setter(skip))]
    cur_time: Time,
    #[builder(default, setter(skip))]
    schedule: Schedule,
    #[builder(default, setter(skip))]
    nr_events: u64,

    // Entities
    workload: Workload,
    hosts: Hosts,
    fabric: Fabric,

    // Used for termination
    timeout: Option<Time>,
}

impl Simulation {
    pub(crate) fn run(mut self) -> Output {
        // Kick off the simulation by starting the workload
        let ev = Event::new(Time::ZERO, WorkloadCmd::new_step());
        self.schedule.push(ev);
        // Run the simulation
        while !self.should_stop() {
            self.step();
        }
        info!(
            time = %self.cur_time.into_nanos(),
            events = self.nr_events,
            pending = self.schedule.len(),
            "simulation finished"
        );
        self.finish()
    }

    fn step(&mut self) {
        let Some(next) = self.schedule.pop() else {
            return;
        };

        let (time, cmd) = (next.time(), next.cmd);
        assert!(self.cur_time <= time);
        self.cur_time = time;
        self.nr_events += 1;

        let events = self.apply(cmd);
        for ev in events.into_iter() {
            self.schedule.push(ev);
        }
    }

    fn should_stop(&self) -> bool {
        self.schedule.is_empty() || self.cur_time > self.timeout.unwrap_or(Time::MAX)
    }

    fn context(&self) -> Context {
        Context::new(self.cur_time)
    }

    fn finish(self) -> Output {
        let mut records = self.hosts.into_records();
        records.sort_by_key(|r| r.id);
        Output {
            records,
            queues: self.fabric.queue_records(),
        }
    }
}

// Command handlers
impl Simulation {
    fn apply(&mut self, cmd: Command) -> EventList {
        match cmd {
            Command::Workload(cmd) => self.apply_workload(cmd),
            Command::Host(cmd) => self.apply_host(cmd),
            Command::Fabric(cmd) => self.apply_fabric(cmd),
        }
    }

    fn apply_workload(&mut self, cmd: WorkloadCmd) -> EventList {
        let ctx = self.context();
        match cmd {
            WorkloadCmd::Step => self.workload.step(ctx),
        }
    }

    fn apply_host(&mut self, cmd: HostCmd) -> EventList {
        let ctx = self.context();
        match cmd {
            HostCmd::FlowArrive(desc) => {
                let route = self.fabric.open_route(&desc, ctx.cur_time);
                self.hosts.flow_arrive(&desc, &route, ctx)
            }
            HostCmd::Deliver(pkt) => self.hosts.deliver(pkt, ctx),
        }
    }

    fn apply_fabric(&mut self, cmd: FabricCmd) -> EventList {
        let ctx = self.context();
        match cmd {
            FabricCmd::Receive(pkt) => self.fabric.receive(pkt, ctx),
            FabricCmd::Step(hop) => self.fabric.step(hop, ctx),
            FabricCmd::Release(id) => {
                debug!(flow = %id, "release route");
                self.fabric.close_route(id);
                ctx.into_events()
            }
        }
    }
}

#[derive(Debug, Clone, derive_more::From)]
pub(crate) enum Command {
    Workload(WorkloadCmd),
    Host(HostCmd),
    Fabric(FabricCmd),
}

#[derive(Debug)]
pub(crate) struct Context {
    pub(crate) cur_time: Time,
    events: EventList,
}

impl Context {
    pub(crate) fn new(cur_time: Time) -> Self {
        Self {
            cur_time,
            events: EventList::new(),
        }
    }

    pub(crate) fn schedule(&mut self, delta: Delta, cmd: impl Into<Command>) {
        let time = self.cur_time + delta;
        self.events.push(Event::new(time, cmd.into()));
    }

    pub(crate) fn schedule_now(&mut self, cmd: impl Into<Command>) {
        self.schedule(Delta::ZERO, cmd);
    }

    pub(crate) fn into_events(self) -> EventList {
        self.events
    }
}
