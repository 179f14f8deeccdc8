use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    data::Record,
    entities::fabric::FabricCmd,
    flow::{FlowDesc, FlowId, FlowKey},
    packet::{Packet, PacketFlag, PacketId, PacketKind},
    routing::Route,
    simulation::{event::EventList, Context},
    time::Time,
    topology::CoreId,
    units::Bytes,
};

/// The servers' transport endpoints.
///
/// Senders keep a fixed window of unacknowledged bytes in flight and receivers acknowledge every
/// data packet immediately. There is no loss recovery: a flow that loses a packet never
/// completes.
#[derive(Debug, typed_builder::TypedBuilder)]
pub(crate) struct Hosts {
    #[builder(setter(into))]
    window: Bytes,
    #[builder(default, setter(skip))]
    flows: FxHashMap<FlowId, FlowState>,
    #[builder(default, setter(skip))]
    next_id: PacketId,
    #[builder(default, setter(skip))]
    records: Vec<Record>,
}

#[derive(Debug, Clone)]
struct FlowState {
    id: FlowId,
    key: FlowKey,
    size: Bytes,
    start: Time,
    core: Option<CoreId>,
    snd_nxt: Bytes,
    snd_una: Bytes,
    ecn_echoes: usize,
}

impl FlowState {
    fn bytes_left(&self) -> Bytes {
        self.size - self.snd_nxt
    }

    fn next_segment(&self, window: Bytes) -> Option<Bytes> {
        let in_flight = self.snd_nxt - self.snd_una;
        let size = self
            .bytes_left()
            .min(Packet::MSS)
            .min(window.saturating_sub(in_flight));
        (size > Bytes::ZERO).then_some(size)
    }

    fn is_complete(&self) -> bool {
        self.snd_una >= self.size
    }

    fn record(&self, now: Time) -> Record {
        Record {
            id: self.id,
            src: self.key.src,
            dst: self.key.dst,
            size: self.size,
            start: self.start.into_nanos(),
            fct: now.saturating_since(self.start).into_nanos(),
            core: self.core,
            ecn_echoes: self.ecn_echoes,
        }
    }
}

impl Hosts {
    #[must_use]
    pub(crate) fn flow_arrive(
        &mut self,
        desc: &FlowDesc,
        route: &Route,
        mut ctx: Context,
    ) -> EventList {
        let flow = FlowState {
            id: desc.id,
            key: route.key,
            size: desc.size,
            start: ctx.cur_time,
            core: route.core,
            snd_nxt: Bytes::ZERO,
            snd_una: Bytes::ZERO,
            ecn_echoes: 0,
        };
        debug!(
            flow = %desc.id,
            src = %route.key.src,
            dst = %route.key.dst,
            size = %desc.size,
            "flow arrived"
        );
        if flow.is_complete() {
            self.complete(flow, &mut ctx);
        } else {
            self.flows.insert(desc.id, flow);
            self.pump(desc.id, &mut ctx);
        }
        ctx.into_events()
    }

    /// Hands a packet that left the fabric to its destination server.
    #[must_use]
    pub(crate) fn deliver(&mut self, pkt: Packet, mut ctx: Context) -> EventList {
        match pkt.kind {
            PacketKind::Data => {
                let ack = pkt.ack(self.alloc_id());
                trace!(flow = %pkt.flow_id, pkt = %pkt.id, ack = %ack.id, "acknowledge");
                ctx.schedule_now(FabricCmd::new_receive(ack));
            }
            PacketKind::Ack { nr_bytes, .. } => self.rcv_ack(&pkt, nr_bytes, &mut ctx),
        }
        ctx.into_events()
    }

    fn rcv_ack(&mut self, ack: &Packet, nr_bytes: Bytes, ctx: &mut Context) {
        let Some(flow) = self.flows.get_mut(&ack.flow_id) else {
            return;
        };
        flow.snd_una += nr_bytes;
        if ack.flags.contains(PacketFlag::EcnRev) {
            flow.ecn_echoes += 1;
        }
        if flow.is_complete() {
            if let Some(flow) = self.flows.remove(&ack.flow_id) {
                self.complete(flow, ctx);
            }
        } else {
            self.pump(ack.flow_id, ctx);
        }
    }

    fn complete(&mut self, flow: FlowState, ctx: &mut Context) {
        let record = flow.record(ctx.cur_time);
        debug!(flow = %record.id, fct = %record.fct, ecn_echoes = record.ecn_echoes, "flow completed");
        self.records.push(record);
        ctx.schedule_now(FabricCmd::new_release(flow.id));
    }

    // Sends as much of the flow as the window allows.
    fn pump(&mut self, id: FlowId, ctx: &mut Context) {
        let Some(flow) = self.flows.get_mut(&id) else {
            return;
        };
        while let Some(size) = flow.next_segment(self.window) {
            let pkt_id = self.next_id;
            self.next_id += PacketId::ONE;
            flow.snd_nxt += size;
            let pkt = Packet::builder()
                .id(pkt_id)
                .flow_id(id)
                .key(flow.key)
                .size(size)
                .kind(PacketKind::Data)
                .build();
            ctx.schedule_now(FabricCmd::new_receive(pkt));
        }
    }

    fn alloc_id(&mut self) -> PacketId {
        let id = self.next_id;
        self.next_id += PacketId::ONE;
        id
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}

#[derive(Debug, Clone, derive_new::new)]
pub(crate) enum HostCmd {
    FlowArrive(FlowDesc),
    Deliver(Packet),
}
