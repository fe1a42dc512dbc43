//! 透传处理元件（Packet Flow Stage）
//!
//! 一个输入一个输出：packet（原子或流式）经过处理步骤后原样转发；容量变化双向透传。
//! 同一时刻最多处理一个流，完成钩子对每个流只触发一次。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, Datarate, Element, ElementId, FlowEventKind, FlowNet, FlowResult,
    GateSpec, PortRef, ProtocolError, StreamProgress,
};
use crate::packet::{Packet, PacketInfo};
use crate::sim::Simulator;
use tracing::{debug, trace};

/// 处理步骤：原地修改 packet
pub trait PacketProcessor: Send + 'static {
    fn process(&mut self, pkt: &mut Packet);
}

impl<F> PacketProcessor for F
where
    F: FnMut(&mut Packet) + Send + 'static,
{
    fn process(&mut self, pkt: &mut Packet) {
        self(pkt)
    }
}

/// 给 packet 加上固定长度的头部
#[derive(Debug, Clone, Copy)]
pub struct HeaderInserter {
    pub header_bits: u64,
}

impl PacketProcessor for HeaderInserter {
    fn process(&mut self, pkt: &mut Packet) {
        pkt.length_bits = pkt.length_bits.saturating_add(self.header_bits);
    }
}

pub const IN: usize = 0;
pub const OUT: usize = 1;

static GATES: [GateSpec; 2] = [
    GateSpec::input("in", Capabilities::CONSUMER.union(Capabilities::COLLECTOR)),
    GateSpec::output("out", Capabilities::PRODUCER.union(Capabilities::PROVIDER)),
];

/// 透传处理元件
pub struct PacketFlow<P: PacketProcessor> {
    name: String,
    processor: P,
    me: ElementId,
    producer: Option<PortRef>,
    provider: Option<PortRef>,
    consumer: Option<PortRef>,
    collector: Option<PortRef>,
    /// 正在处理的流的 tree id
    in_progress_stream: Option<u64>,
    pub num_processed: u64,
    pub processed_bits: u64,
}

impl<P: PacketProcessor> PacketFlow<P> {
    pub fn new(name: impl Into<String>, processor: P) -> Self {
        Self {
            name: name.into(),
            processor,
            me: ElementId(usize::MAX),
            producer: None,
            provider: None,
            consumer: None,
            collector: None,
            in_progress_stream: None,
            num_processed: 0,
            processed_bits: 0,
        }
    }

    pub fn in_progress_stream(&self) -> Option<u64> {
        self.in_progress_stream
    }

    fn out_port(&self) -> PortRef {
        PortRef::new(self.me, OUT)
    }

    /// `pkt` 为 None 表示原子操作：此时不能有任何流在处理
    fn check_packet_streaming(&self, pkt: Option<&Packet>) -> FlowResult<()> {
        match self.in_progress_stream {
            Some(open) if pkt.is_none_or(|p| p.tree_id != open) => {
                Err(ProtocolError::AnotherStreamInProgress {
                    element: self.name.clone(),
                    open,
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// 进入流处理；已有同一个流时只做一致性检查
    fn enter_stream(&mut self, pkt: &Packet) -> FlowResult<()> {
        match self.in_progress_stream {
            None => {
                self.in_progress_stream = Some(pkt.tree_id);
                Ok(())
            }
            Some(_) => self.check_packet_streaming(Some(pkt)),
        }
    }

    fn handle_packet_processed(&mut self, pkt: &Packet) {
        self.num_processed += 1;
        self.processed_bits = self.processed_bits.saturating_add(pkt.length_bits);
    }

    fn end_packet_streaming(&mut self, pkt: &Packet) {
        if self.in_progress_stream.take().is_some() {
            self.handle_packet_processed(pkt);
        }
    }

    fn consumer(&self, net: &FlowNet) -> FlowResult<PortRef> {
        self.consumer
            .map(Ok)
            .unwrap_or_else(|| net.require_peer(self.out_port(), Capability::Consumer))
    }

    fn provider(&self, net: &FlowNet) -> FlowResult<PortRef> {
        self.provider
            .map(Ok)
            .unwrap_or_else(|| net.require_peer(PortRef::new(self.me, IN), Capability::Provider))
    }
}

impl<P: PacketProcessor> Element for PacketFlow<P> {
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
        debug!(
            name = %self.name,
            push = self.producer.is_some(),
            pull = self.collector.is_some(),
            "flow stage 初始化"
        );
        Ok(())
    }

    fn upstream_gate(&self, out_gate: usize) -> Option<usize> {
        (out_gate == OUT).then_some(IN)
    }

    // ---- push ----

    fn can_push_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.consumer {
            Some(c) => net.can_push_some_packet(c),
            None => Ok(true),
        }
    }

    fn can_push_packet(&self, pkt: &Packet, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.consumer {
            Some(c) => net.can_push_packet(c, pkt),
            None => Ok(true),
        }
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, pkt_id = pkt.id))]
    fn push_packet(
        &mut self,
        mut pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_packet_streaming(None)?;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedIn);
        self.processor.process(&mut pkt);
        self.handle_packet_processed(&pkt);
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedOut);
        trace!(len_bits = pkt.length_bits, "转发 packet");
        net.push_or_send(self.out_port(), pkt, sim)
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, tree_id = pkt.tree_id))]
    fn push_packet_start(
        &mut self,
        mut pkt: Packet,
        _gate: usize,
        datarate: Datarate,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_packet_streaming(Some(&pkt))?;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedIn);
        self.in_progress_stream = Some(pkt.tree_id);
        self.processor.process(&mut pkt);
        let consumer = self.consumer(net)?;
        net.push_packet_start(consumer, pkt, datarate, sim)
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, tree_id = pkt.tree_id))]
    fn push_packet_progress(
        &mut self,
        mut pkt: Packet,
        _gate: usize,
        datarate: Datarate,
        progress: StreamProgress,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.enter_stream(&pkt)?;
        // 处理步骤可能改变长度，先判断
        let is_end = progress.completes(pkt.length_bits);
        self.processor.process(&mut pkt);
        let consumer = self.consumer(net)?;
        if is_end {
            net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedOut);
            self.end_packet_streaming(&pkt);
            net.push_packet_end(consumer, pkt, sim)
        } else {
            net.push_packet_progress(consumer, pkt, datarate, progress, sim)
        }
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, tree_id = pkt.tree_id))]
    fn push_packet_end(
        &mut self,
        mut pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.enter_stream(&pkt)?;
        self.processor.process(&mut pkt);
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PushedOut);
        self.end_packet_streaming(&pkt);
        let consumer = self.consumer(net)?;
        net.push_packet_end(consumer, pkt, sim)
    }

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(p) = self.producer {
            net.notify_can_push_changed(p);
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
        if self.in_progress_stream == Some(packet.tree_id) {
            debug!(name = %self.name, tree_id = packet.tree_id, successful, "下游结束了正在处理的流");
            self.in_progress_stream = None;
            if successful {
                self.num_processed += 1;
                self.processed_bits = self.processed_bits.saturating_add(packet.length_bits);
            }
        }
        if let Some(p) = self.producer {
            net.notify_push_processed(p, packet, successful);
        }
        Ok(())
    }

    // ---- pull ----

    fn can_pull_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.provider {
            Some(p) => net.can_pull_some_packet(p),
            None => Ok(false),
        }
    }

    fn can_pull_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<Option<PacketInfo>> {
        match self.provider {
            Some(p) => net.can_pull_packet(p),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet(&mut self, _gate: usize, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Packet> {
        self.check_packet_streaming(None)?;
        let provider = self.provider(net)?;
        let mut pkt = net.pull_packet(provider, sim)?;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledIn);
        self.processor.process(&mut pkt);
        self.handle_packet_processed(&pkt);
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledOut);
        Ok(pkt)
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet_start(
        &mut self,
        _gate: usize,
        datarate: Datarate,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        self.check_packet_streaming(None)?;
        let provider = self.provider(net)?;
        let mut pkt = net.pull_packet_start(provider, datarate, sim)?;
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledIn);
        self.in_progress_stream = Some(pkt.tree_id);
        self.processor.process(&mut pkt);
        Ok(pkt)
    }

    fn pull_packet_progress(
        &mut self,
        _gate: usize,
        datarate: Datarate,
        progress: StreamProgress,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        let provider = self.provider(net)?;
        let mut pkt = net.pull_packet_progress(provider, datarate, progress, sim)?;
        self.enter_stream(&pkt)?;
        let is_end = progress.completes(pkt.length_bits);
        self.processor.process(&mut pkt);
        if is_end {
            net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledOut);
            self.end_packet_streaming(&pkt);
        }
        Ok(pkt)
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet_end(&mut self, _gate: usize, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Packet> {
        let provider = self.provider(net)?;
        let mut pkt = net.pull_packet_end(provider, sim)?;
        self.enter_stream(&pkt)?;
        self.processor.process(&mut pkt);
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::PulledOut);
        self.end_packet_streaming(&pkt);
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
        if self.in_progress_stream == Some(packet.tree_id) {
            self.in_progress_stream = None;
        }
        if let Some(c) = self.collector {
            net.notify_pull_processed(c, packet, successful);
        }
        Ok(())
    }
}
