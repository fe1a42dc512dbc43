//! 主动数据源（Active Packet Source）
//!
//! 按固定间隔生成固定长度的 packet 并 push 给 consumer。consumer 没有容量时暂停，
//! 等到容量变化通知再继续。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, Element, ElementId, ElementTimer, FlowEventKind, FlowNet, FlowResult,
    GateSpec, PortRef, unsupported,
};
use crate::sim::{EventId, SimTime, Simulator};
use tracing::{debug, trace};

pub const OUT: usize = 0;

const PRODUCE: u32 = 0;

static GATES: [GateSpec; 1] = [GateSpec::output("out", Capabilities::PRODUCER)];

#[derive(Debug)]
pub struct ActivePacketSource {
    name: String,
    packet_bits: u64,
    interval: SimTime,
    /// 还要生成的 packet 数
    remaining: u64,
    me: ElementId,
    consumer: Option<PortRef>,
    timer: Option<EventId>,
    /// 被反压挡住，等待容量通知
    blocked: bool,
    pub produced: u64,
}

impl ActivePacketSource {
    pub fn new(name: impl Into<String>, packet_bits: u64, count: u64, interval: SimTime) -> Self {
        Self {
            name: name.into(),
            packet_bits,
            interval,
            remaining: count,
            me: ElementId(usize::MAX),
            consumer: None,
            timer: None,
            blocked: false,
            produced: 0,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    fn schedule_next(&mut self, delay: SimTime, sim: &mut Simulator) {
        if self.remaining > 0 && self.timer.is_none() {
            self.timer = Some(sim.schedule_after(
                delay,
                ElementTimer {
                    element: self.me,
                    timer: PRODUCE,
                },
            ));
        }
    }

    fn produce(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if self.remaining == 0 {
            return Ok(());
        }
        let consumer = self
            .consumer
            .ok_or_else(|| unsupported(&self.name, "produce before initialize"))?;
        if !net.can_push_some_packet(consumer)? {
            trace!(name = %self.name, "consumer 无容量，暂停生成");
            self.blocked = true;
            return Ok(());
        }
        self.blocked = false;
        let pkt = net.make_packet(format!("{}-{}", self.name, self.produced), self.packet_bits);
        debug!(name = %self.name, pkt_id = pkt.id, len_bits = pkt.length_bits, "生成 packet");
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::Produced);
        self.produced += 1;
        self.remaining -= 1;
        net.push_packet(consumer, pkt, sim)?;
        self.schedule_next(self.interval, sim);
        Ok(())
    }
}

impl Element for ActivePacketSource {
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

    fn initialize(&mut self, me: ElementId, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        self.me = me;
        self.consumer = Some(net.require_peer(PortRef::new(me, OUT), Capability::Consumer)?);
        self.schedule_next(SimTime::ZERO, sim);
        Ok(())
    }

    fn handle_timer(&mut self, timer: u32, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if timer != PRODUCE {
            return Err(unsupported(&self.name, "unknown timer"));
        }
        self.timer = None;
        self.produce(sim, net)
    }

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if self.blocked && self.timer.is_none() {
            self.produce(sim, net)?;
        }
        Ok(())
    }
}
