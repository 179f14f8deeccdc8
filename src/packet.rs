use typed_builder::TypedBuilder;

use crate::{
    flow::{FlowId, FlowKey},
    topology::{CoreId, LeafId},
    units::Bytes,
};

identifier!(PacketId);

/// Congestion telemetry carried by a data packet across the fabric.
///
/// Stamped once by the source leaf; every spine port it crosses raises `metric` to at least its
/// own utilization, so the value only grows along the path.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Telemetry {
    pub src_leaf: LeafId,
    pub core: CoreId,
    pub dst_leaf: LeafId,
    pub metric: f64,
}

/// A leaf's remote congestion observation, carried back to the flow's source leaf on an ack.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Feedback {
    pub leaf: LeafId,
    pub core: CoreId,
    pub metric: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketKind {
    Data,
    Ack {
        nr_bytes: Bytes,
        /// Telemetry of the data packet being acknowledged.
        echo: Option<Telemetry>,
        feedback: Option<Feedback>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFlag {
    EcnFwd = 0,
    EcnRev = 1,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Flags(u8);

impl Flags {
    pub fn set(&mut self, flag: PacketFlag) {
        self.0 |= 1 << flag as u8;
    }

    pub fn unset(&mut self, flag: PacketFlag) {
        self.0 &= !(1 << flag as u8);
    }

    pub fn contains(&self, flag: PacketFlag) -> bool {
        self.0 & (1 << flag as u8) != 0
    }
}

/// Which of a flow's two hop chains a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derivative::Derivative)]
#[derivative(Default)]
pub enum Direction {
    #[derivative(Default)]
    Forward,
    Reverse,
}

/// A packet. Each queue exclusively owns the packets it holds and hands them on by value.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct Packet {
    pub(crate) id: PacketId,
    pub(crate) flow_id: FlowId,
    pub(crate) key: FlowKey,
    pub(crate) size: Bytes,
    pub(crate) kind: PacketKind,
    #[builder(default)]
    pub(crate) flags: Flags,
    #[builder(default)]
    pub(crate) priority: u32,
    #[builder(default)]
    pub(crate) telemetry: Option<Telemetry>,
    #[builder(default)]
    pub(crate) direction: Direction,
    #[builder(default, setter(skip))]
    pub(crate) hop: usize,
}

impl Packet {
    /// The maximum segment size. Caps data packet sizes and scales ECN thresholds.
    pub const MSS: Bytes = Bytes::new(1_500);
    /// The size of an acknowledgment.
    pub const SZ_ACK: Bytes = Bytes::new(64);

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn size(&self) -> Bytes {
        self.size
    }

    pub fn kind(&self) -> PacketKind {
        self.kind
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn telemetry(&self) -> Option<Telemetry> {
        self.telemetry
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.kind, PacketKind::Ack { .. })
    }

    pub fn feedback(&self) -> Option<Feedback> {
        match self.kind {
            PacketKind::Ack { feedback, .. } => feedback,
            PacketKind::Data => None,
        }
    }

    /// Builds the acknowledgment for this data packet. The ack echoes the packet's telemetry and
    /// its forward ECN mark, and starts at the head of the reverse chain.
    pub fn ack(&self, id: PacketId) -> Packet {
        debug_assert!(!self.is_ack());
        let mut flags = Flags::default();
        if self.flags.contains(PacketFlag::EcnFwd) {
            flags.set(PacketFlag::EcnRev);
        }
        Packet::builder()
            .id(id)
            .flow_id(self.flow_id)
            .key(self.key)
            .size(Self::SZ_ACK)
            .kind(PacketKind::Ack {
                nr_bytes: self.size,
                echo: self.telemetry,
                feedback: None,
            })
            .flags(flags)
            .priority(self.priority)
            .direction(Direction::Reverse)
            .build()
    }
}

#[cfg(test)]
pub(crate) fn mk_data(id: usize, flow_id: FlowId, size: Bytes) -> Packet {
    Packet::builder()
        .id(PacketId::new(id))
        .flow_id(flow_id)
        .key(FlowKey::default())
        .size(size)
        .kind(PacketKind::Data)
        .build()
}
