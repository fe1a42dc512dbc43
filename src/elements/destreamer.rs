//! 去流化元件（Packet Destreamer）
//!
//! 把上游 push 过来的流收齐，在流结束时作为一个原子 packet 转发。下游暂时不能接收时，
//! 结尾 packet 先留在元件里，等下游容量恢复再转发；留有 packet 期间不接受新的 packet。
//! pull 方向：一次原子 pull 变成对上游的 start + end。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, Datarate, Element, ElementId, FlowEventKind, FlowNet, FlowResult,
    GateSpec, PortRef, ProtocolError, StreamProgress,
};
use crate::packet::{Packet, PacketInfo};
use crate::sim::Simulator;
use tracing::{debug, trace};

pub const IN: usize = 0;
pub const OUT: usize = 1;

static GATES: [GateSpec; 2] = [
    GateSpec::input("in", Capabilities::CONSUMER.union(Capabilities::COLLECTOR)),
    GateSpec::output("out", Capabilities::PRODUCER.union(Capabilities::PROVIDER)),
];

#[derive(Debug)]
pub struct PacketDestreamer {
    name: String,
    /// pull 方向向上游发起流时用的速率；None 表示不限速，上游整包交出
    datarate: Option<Datarate>,
    me: ElementId,
    producer: Option<PortRef>,
    provider: Option<PortRef>,
    consumer: Option<PortRef>,
    collector: Option<PortRef>,
    streamed: Option<Packet>,
    /// 等待下游容量的完整 packet
    held: Option<Packet>,
    pub num_processed: u64,
    pub processed_bits: u64,
}

impl PacketDestreamer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            datarate: None,
            me: ElementId(usize::MAX),
            producer: None,
            provider: None,
            consumer: None,
            collector: None,
            streamed: None,
            held: None,
            num_processed: 0,
            processed_bits: 0,
        }
    }

    /// pull 方向使用的速率。上游是可抢占的流化元件时，start 和 end 之间没有时间流逝，
    /// 按这个速率算出的已传长度会让它把 packet 拆成最小分片。
    pub fn with_datarate(mut self, datarate: Datarate) -> Self {
        self.datarate = Some(datarate);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streamed.is_some()
    }

    pub fn held_packet(&self) -> Option<PacketInfo> {
        self.held.as_ref().map(Packet::info)
    }

    fn check_stream(&self, pkt: &Packet) -> FlowResult<()> {
        match &self.streamed {
            Some(open) if open.tree_id != pkt.tree_id => Err(ProtocolError::AnotherStreamInProgress {
                element: self.name.clone(),
                open: open.tree_id,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// 下游能接收就立即转发，否则先留着
    fn forward(&mut self, pkt: Packet, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if self.held.is_some() {
            return Err(ProtocolError::NotAccepting {
                element: self.name.clone(),
                at: sim.now(),
            }
            .into());
        }
        let consumer = net.require_peer(PortRef::new(self.me, OUT), Capability::Consumer)?;
        if net.can_push_packet(consumer, &pkt)? {
            self.num_processed += 1;
            self.processed_bits = self.processed_bits.saturating_add(pkt.length_bits);
            net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedOut);
            net.push_or_send(PortRef::new(self.me, OUT), pkt, sim)
        } else {
            debug!(name = %self.name, pkt_id = pkt.id, "下游暂不可接收，保留 packet");
            self.held = Some(pkt);
            Ok(())
        }
    }
}

impl Element for PacketDestreamer {
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
        self.me = me;
        let input = PortRef::new(me, IN);
        let output = PortRef::new(me, OUT);
        self.producer = net.peer_with(input, Capability::Producer);
        self.provider = net.peer_with(input, Capability::Provider);
        self.consumer = net.peer_with(output, Capability::Consumer);
        self.collector = net.peer_with(output, Capability::Collector);
        Ok(())
    }

    fn upstream_gate(&self, out_gate: usize) -> Option<usize> {
        (out_gate == OUT).then_some(IN)
    }

    // ---- push ----

    fn can_push_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.consumer {
            Some(c) => Ok(self.held.is_none() && net.can_push_some_packet(c)?),
            None => Ok(false),
        }
    }

    fn push_packet(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_stream(&pkt)?;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedIn);
        self.forward(pkt, sim, net)
    }

    fn push_packet_start(
        &mut self,
        pkt: Packet,
        _gate: usize,
        _datarate: Datarate,
        sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_stream(&pkt)?;
        trace!(name = %self.name, tree_id = pkt.tree_id, at = ?sim.now(), "开始收集流");
        self.streamed = Some(pkt);
        Ok(())
    }

    fn push_packet_progress(
        &mut self,
        pkt: Packet,
        _gate: usize,
        _datarate: Datarate,
        progress: StreamProgress,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_stream(&pkt)?;
        if progress.completes(pkt.length_bits) {
            self.streamed = None;
            net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedIn);
            self.forward(pkt, sim, net)
        } else {
            self.streamed = Some(pkt);
            Ok(())
        }
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, tree_id = pkt.tree_id))]
    fn push_packet_end(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_stream(&pkt)?;
        self.streamed = None;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedIn);
        self.forward(pkt, sim, net)
    }

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(pkt) = self.held.take() {
            self.forward(pkt, sim, net)?;
        }
        if let Some(p) = self.producer {
            if self.held.is_none() {
                net.notify_can_push_changed(p);
            }
        }
        Ok(())
    }

    fn handle_push_packet_processed(
        &mut self,
        packet: PacketInfo,
        _gate: usize,
        successful: bool,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(p) = self.producer {
            net.notify_push_processed(p, packet, successful);
        }
        Ok(())
    }

    // ---- pull ----

    fn can_pull_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.provider {
            Some(p) => Ok(!self.is_streaming() && net.can_pull_some_packet(p)?),
            None => Ok(false),
        }
    }

    fn can_pull_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<Option<PacketInfo>> {
        match self.provider {
            Some(p) if !self.is_streaming() => net.can_pull_packet(p),
            _ => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet(&mut self, _gate: usize, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Packet> {
        let provider = net.require_peer(PortRef::new(self.me, IN), Capability::Provider)?;
        let rate = self.datarate.unwrap_or(Datarate::UNLIMITED);
        let start = net.pull_packet_start(provider, rate, sim)?;
        self.streamed = Some(start);
        let pkt = net.pull_packet_end(provider, sim)?;
        self.streamed = None;
        self.num_processed += 1;
        self.processed_bits = self.processed_bits.saturating_add(pkt.length_bits);
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledOut);
        Ok(pkt)
    }

    fn handle_can_pull_packet_changed(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(c) = self.collector {
            net.notify_can_pull_changed(c);
        }
        Ok(())
    }

    fn handle_pull_packet_processed(
        &mut self,
        packet: PacketInfo,
        _gate: usize,
        successful: bool,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(c) = self.collector {
            net.notify_pull_processed(c, packet, successful);
        }
        Ok(())
    }
}
