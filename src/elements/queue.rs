//! 队列元件
//!
//! 输入侧被 push（Consumer），输出侧被 pull（Provider），内部是一个 DropTail 队列。
//! 队列满时新到达的 packet 被丢弃；空变非空时通知 collector，满变不满时通知 producer。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, DropReason, Element, ElementId, FlowEventKind, FlowNet, FlowResult,
    GateSpec, PortRef, ProtocolError,
};
use crate::packet::{Packet, PacketInfo};
use crate::queue::{DropTailQueue, PacketQueue};
use crate::sim::Simulator;
use tracing::{debug, trace};

pub const IN: usize = 0;
pub const OUT: usize = 1;

static GATES: [GateSpec; 2] = [
    GateSpec::input("in", Capabilities::CONSUMER),
    GateSpec::output("out", Capabilities::PROVIDER),
];

#[derive(Debug)]
pub struct QueueElement {
    name: String,
    q: DropTailQueue,
    producer: Option<PortRef>,
    collector: Option<PortRef>,
    pub dropped: u64,
}

impl QueueElement {
    pub fn new(name: impl Into<String>, capacity_bits: u64) -> Self {
        Self {
            name: name.into(),
            q: DropTailQueue::new(capacity_bits),
            producer: None,
            collector: None,
            dropped: 0,
        }
    }

    fn room_regained(&self, was_full: bool, net: &mut FlowNet) {
        if was_full && self.q.has_room() {
            if let Some(p) = self.producer {
                net.notify_can_push_changed(p);
            }
        }
    }
}

impl Element for QueueElement {
    fn name(&self) -> &str {
        &self.name
    }

    fn gates(&self) -> &'static [GateSpec] {
        &GATES
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn initialize(&mut self, me: ElementId, _sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        self.producer = net.peer_with(PortRef::new(me, IN), Capability::Producer);
        self.collector = net.peer_with(PortRef::new(me, OUT), Capability::Collector);
        Ok(())
    }

    fn can_push_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Ok(self.q.has_room())
    }

    fn can_push_packet(&self, pkt: &Packet, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Ok(self.q.fits(pkt))
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, pkt_id = pkt.id))]
    fn push_packet(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        let was_empty = self.q.is_empty();
        let info = pkt.info();
        match self.q.enqueue(pkt) {
            Ok(()) => {
                trace!(queue_len = self.q.len(), queue_bits = self.q.total_bits(), "入队");
                net.record_info(
                    sim.now(),
                    &self.name,
                    Some(info),
                    FlowEventKind::Enqueued {
                        queue_len: self.q.len(),
                        queue_bits: self.q.total_bits(),
                    },
                );
                if was_empty {
                    if let Some(c) = self.collector {
                        net.notify_can_pull_changed(c);
                    }
                }
            }
            Err(dropped) => {
                debug!(pkt_id = dropped.id, queue_bits = self.q.total_bits(), "🗑️  队列满，丢弃");
                self.dropped += 1;
                net.record(
                    sim.now(),
                    &self.name,
                    Some(&dropped),
                    FlowEventKind::Dropped {
                        reason: DropReason::QueueOverflow,
                    },
                );
            }
        }
        Ok(())
    }

    fn can_pull_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Ok(!self.q.is_empty())
    }

    fn can_pull_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<Option<PacketInfo>> {
        Ok(self.q.peek().map(Packet::info))
    }

    fn pull_packet(&mut self, _gate: usize, _sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Packet> {
        let was_full = !self.q.has_room();
        let pkt = self.q.dequeue().ok_or_else(|| ProtocolError::NothingToPull {
            element: self.name.clone(),
        })?;
        trace!(name = %self.name, pkt_id = pkt.id, queue_len = self.q.len(), "出队");
        self.room_regained(was_full, net);
        Ok(pkt)
    }

    fn as_queue(&self) -> Option<&dyn PacketQueue> {
        Some(&self.q)
    }

    fn remove_all_packets(&mut self, _sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Vec<Packet>> {
        let was_full = !self.q.has_room();
        let mut removed = Vec::with_capacity(self.q.len());
        while let Some(pkt) = self.q.dequeue() {
            removed.push(pkt);
        }
        debug!(name = %self.name, removed = removed.len(), "清空队列");
        self.room_regained(was_full, net);
        Ok(removed)
    }
}
