//! 可抢占的流化元件（Preemptable Streamer）
//!
//! pull 方向：把上游的原子 pull 变成流；流被提前结束时，按已经传出的长度把 packet 拆成
//! 已发送分片和剩余分片，剩余分片在下一次 pull 时优先交出。
//! push 方向：收到原子 push 后向下游发起一个定速的流，由定时器结束。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, Datarate, Element, ElementId, ElementTimer, FlowEventKind, FlowNet,
    FlowResult, GateSpec, PortRef, ProtocolError, StreamProgress, unsupported,
};
use crate::packet::{FragmentTag, Packet, PacketInfo};
use crate::sim::{EventId, SimTime, Simulator};
use tracing::{debug, info, trace};

pub const IN: usize = 0;
pub const OUT: usize = 1;

const END_STREAMING: u32 = 0;

static GATES: [GateSpec; 2] = [
    GateSpec::input("in", Capabilities::CONSUMER.union(Capabilities::COLLECTOR)),
    GateSpec::output("out", Capabilities::PRODUCER.union(Capabilities::PROVIDER)),
];

/// 分片名：`base-fragN`，已经是分片的名字先去掉旧后缀
fn fragment_name(name: &str, number: u32) -> String {
    let base = name.split("-frag").next().unwrap_or(name);
    format!("{base}-frag{number}")
}

#[derive(Debug)]
pub struct PreemptableStreamer {
    name: String,
    /// push 方向的发送速率；None 表示 start 之后立即 end
    datarate: Option<Datarate>,
    min_packet_bits: u64,
    rounding_bits: u64,
    me: ElementId,
    producer: Option<PortRef>,
    provider: Option<PortRef>,
    consumer: Option<PortRef>,
    collector: Option<PortRef>,
    streamed: Option<Packet>,
    remaining: Option<Packet>,
    stream_datarate: Option<Datarate>,
    stream_start: SimTime,
    timer: Option<EventId>,
    pub num_processed: u64,
    pub processed_bits: u64,
    pub num_fragmented: u64,
}

impl PreemptableStreamer {
    pub fn new(name: impl Into<String>, min_packet_bits: u64, rounding_bits: u64) -> Self {
        Self {
            name: name.into(),
            datarate: None,
            min_packet_bits,
            rounding_bits: rounding_bits.max(1),
            me: ElementId(usize::MAX),
            producer: None,
            provider: None,
            consumer: None,
            collector: None,
            streamed: None,
            remaining: None,
            stream_datarate: None,
            stream_start: SimTime::ZERO,
            timer: None,
            num_processed: 0,
            processed_bits: 0,
            num_fragmented: 0,
        }
    }

    /// push 方向使用的发送速率
    pub fn with_datarate(mut self, datarate: Datarate) -> Self {
        self.datarate = Some(datarate);
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streamed.is_some()
    }

    /// 等待下一次 pull 的剩余分片
    pub fn remaining_packet(&self) -> Option<PacketInfo> {
        self.remaining.as_ref().map(Packet::info)
    }

    fn not_streaming(&self) -> ProtocolError {
        ProtocolError::NotStreaming {
            element: self.name.clone(),
        }
    }

    fn handle_packet_processed(&mut self, pkt: &Packet) {
        self.num_processed += 1;
        self.processed_bits = self.processed_bits.saturating_add(pkt.length_bits);
    }

    /// 按已传出的长度计算分片点（向上取整到 rounding，且不小于最小长度）
    fn preempted_length(&self, pulled_bits: u64) -> u64 {
        let r = self.rounding_bits;
        let rounded = pulled_bits.div_ceil(r).saturating_mul(r);
        rounded.max(self.min_packet_bits)
    }

    /// 流被提前结束时拆分 packet；返回是否拆分
    fn split(&mut self, pkt: &mut Packet, pulled_bits: u64, net: &mut FlowNet) -> bool {
        let total = pkt.length_bits;
        let preempted = self.preempted_length(pulled_bits);
        if preempted == 0 || preempted >= total || preempted.saturating_add(self.min_packet_bits) > total {
            return false;
        }
        let tag = pkt.fragment.get_or_insert_with(FragmentTag::whole);
        let number = tag.number;
        tag.last = false;
        let sent_name = fragment_name(&pkt.name, number);
        let rest_name = fragment_name(&pkt.name, number + 1);
        pkt.name = sent_name;
        pkt.length_bits = preempted;

        let mut rest = net.make_packet(rest_name, total - preempted);
        rest.fragment = Some(FragmentTag {
            first: false,
            last: true,
            number: number + 1,
        });
        debug!(
            sent = %pkt.name,
            remaining = %rest.name,
            sent_bits = preempted,
            remaining_bits = rest.length_bits,
            "✂️  拆分被抢占的 packet"
        );
        self.remaining = Some(rest);
        self.num_fragmented += 1;
        true
    }

    /// push 方向：结束当前流
    fn end_streaming(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        let pkt = self.streamed.take().ok_or_else(|| self.not_streaming())?;
        let consumer = net.require_peer(PortRef::new(self.me, OUT), Capability::Consumer)?;
        self.stream_datarate = None;
        self.handle_packet_processed(&pkt);
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::StreamEnded {
                sent_bits: pkt.length_bits,
            },
        );
        net.push_packet_end(consumer, pkt, sim)?;
        if let Some(p) = self.producer {
            net.notify_can_push_changed(p);
        }
        Ok(())
    }
}

impl Element for PreemptableStreamer {
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

    fn handle_timer(&mut self, timer: u32, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if timer != END_STREAMING {
            return Err(unsupported(&self.name, "unknown timer"));
        }
        self.timer = None;
        self.end_streaming(sim, net)
    }

    // ---- push ----

    fn can_push_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.consumer {
            Some(c) => Ok(!self.is_streaming() && net.can_push_some_packet(c)?),
            None => Ok(false),
        }
    }

    fn can_push_packet(&self, pkt: &Packet, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        match self.consumer {
            Some(c) => Ok(!self.is_streaming() && net.can_push_packet(c, pkt)?),
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self, pkt, sim, net), fields(name = %self.name, pkt_id = pkt.id))]
    fn push_packet(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if self.is_streaming() {
            return Err(ProtocolError::AlreadyStreaming {
                element: self.name.clone(),
            }
            .into());
        }
        let consumer = net.require_peer(PortRef::new(self.me, OUT), Capability::Consumer)?;
        let copy = net.dup_packet(&pkt);
        let len = pkt.length_bits;
        info!(len_bits = len, "▶️  开始流式转发");
        self.stream_datarate = self.datarate;
        self.stream_start = sim.now();
        self.streamed = Some(pkt);
        match self.datarate {
            Some(rate) => {
                net.push_packet_start(consumer, copy, rate, sim)?;
                self.timer = Some(sim.schedule_after(
                    rate.tx_time(len),
                    ElementTimer {
                        element: self.me,
                        timer: END_STREAMING,
                    },
                ));
                Ok(())
            }
            None => {
                net.push_packet_start(consumer, copy, Datarate::UNLIMITED, sim)?;
                self.end_streaming(sim, net)
            }
        }
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
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        // 下游提前结束了正在发送的流：会话已关闭，不能再发结尾
        let in_flight = self.streamed.as_ref().map(|p| p.tree_id);
        if in_flight == Some(packet.tree_id) {
            if let Some(t) = self.timer.take() {
                sim.cancel(t);
            }
            self.streamed = None;
            self.stream_datarate = None;
            debug!(name = %self.name, tree_id = packet.tree_id, successful, "下游结束了正在转发的流");
        }
        if let Some(p) = self.producer {
            net.notify_push_processed(p, packet, successful);
            if in_flight == Some(packet.tree_id) {
                net.notify_can_push_changed(p);
            }
        }
        Ok(())
    }

    // ---- pull ----

    fn can_pull_some_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<bool> {
        if self.is_streaming() {
            return Ok(false);
        }
        if self.remaining.is_some() {
            return Ok(true);
        }
        match self.provider {
            Some(p) => net.can_pull_some_packet(p),
            None => Ok(false),
        }
    }

    fn can_pull_packet(&self, _gate: usize, net: &FlowNet) -> FlowResult<Option<PacketInfo>> {
        if self.is_streaming() {
            return Ok(None);
        }
        if let Some(r) = &self.remaining {
            return Ok(Some(r.info()));
        }
        match self.provider {
            Some(p) => net.can_pull_packet(p),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet_start(
        &mut self,
        _gate: usize,
        datarate: Datarate,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        if self.is_streaming() {
            return Err(ProtocolError::AlreadyStreaming {
                element: self.name.clone(),
            }
            .into());
        }
        let mut pkt = match self.remaining.take() {
            Some(rest) => rest,
            None => {
                let provider = net.require_peer(PortRef::new(self.me, IN), Capability::Provider)?;
                net.pull_packet(provider, sim)?
            }
        };
        pkt.fragment.get_or_insert_with(FragmentTag::whole);
        self.stream_datarate = Some(datarate);
        self.stream_start = sim.now();
        let copy = net.dup_packet(&pkt);
        trace!(pkt_id = pkt.id, len_bits = pkt.length_bits, "开始流式交出");
        self.streamed = Some(pkt);
        Ok(copy)
    }

    fn pull_packet_progress(
        &mut self,
        _gate: usize,
        datarate: Datarate,
        progress: StreamProgress,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        self.stream_datarate = Some(datarate);
        let pkt = self.streamed.as_ref().ok_or_else(|| self.not_streaming())?;
        if !progress.completes(pkt.length_bits) {
            return Ok(net.dup_packet(pkt));
        }
        // 到达末尾的 progress 等同于 end：会话随之关闭，不再拆分
        let pkt = self.streamed.take().ok_or_else(|| self.not_streaming())?;
        self.stream_datarate = None;
        trace!(pkt_id = pkt.id, len_bits = pkt.length_bits, "progress 完成整个 packet");
        self.handle_packet_processed(&pkt);
        Ok(pkt)
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn pull_packet_end(&mut self, _gate: usize, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<Packet> {
        let mut pkt = self.streamed.take().ok_or_else(|| self.not_streaming())?;
        let rate = self.stream_datarate.take().unwrap_or(Datarate::UNLIMITED);
        let pulled_bits = rate.bits_in(sim.now().since(self.stream_start));
        let total = pkt.length_bits;
        if !rate.is_unlimited() && self.split(&mut pkt, pulled_bits, net) {
            let remaining_bits = total - pkt.length_bits;
            net.record(
                sim.now(),
                &self.name,
                Some(&pkt),
                FlowEventKind::Fragmented {
                    sent_bits: pkt.length_bits,
                    remaining_bits,
                },
            );
        }
        self.handle_packet_processed(&pkt);
        Ok(pkt)
    }

    fn handle_can_pull_packet_changed(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if let Some(c) = self.collector {
            if !self.is_streaming() {
                net.notify_can_pull_changed(c);
            }
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
