//! 可抢占的流式服务器（Preempting Server）
//!
//! 从 provider 以流的方式 pull 一个 packet，按固定速率把它的副本流式 push 给 consumer，
//! 用定时器在 `length / datarate` 之后结束。状态由是否持有在途 packet 决定：
//!
//! - Idle -> Streaming：provider 可 pull 且 consumer 可 push
//! - Streaming -> Idle：定时器到期；下游失去容量（抢占）；上游可 pull 状态变化（抢占）；
//!   下游异步中止了这个流（截断）
//!
//! 每次回到 Idle 都会重新检查启动条件。

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, ConfigError, Datarate, Element, ElementId, ElementTimer,
    FlowEventKind, FlowNet, FlowResult, GateSpec, PortRef, PreemptCause, ProtocolError,
    unsupported,
};
use crate::packet::{Packet, PacketInfo};
use crate::sim::{EventId, SimTime, Simulator};
use tracing::{debug, info, warn};

pub const IN: usize = 0;
pub const OUT: usize = 1;

const END_STREAMING: u32 = 0;

static GATES: [GateSpec; 2] = [
    GateSpec::input("in", Capabilities::COLLECTOR),
    GateSpec::output("out", Capabilities::PRODUCER),
];

/// 服务器统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServerStats {
    pub started: u64,
    pub completed: u64,
    pub preempted: u64,
    pub truncated: u64,
    pub sent_bits: u64,
}

#[derive(Debug)]
pub struct PreemptingServer {
    name: String,
    datarate: Datarate,
    me: ElementId,
    provider: Option<PortRef>,
    consumer: Option<PortRef>,
    /// 在途 packet（Streaming 状态）
    streamed: Option<Packet>,
    timer: Option<EventId>,
    stream_start: SimTime,
    pub stats: ServerStats,
}

impl PreemptingServer {
    pub fn new(name: impl Into<String>, datarate: Datarate) -> Self {
        Self {
            name: name.into(),
            datarate,
            me: ElementId(usize::MAX),
            provider: None,
            consumer: None,
            streamed: None,
            timer: None,
            stream_start: SimTime::ZERO,
            stats: ServerStats::default(),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.streamed.is_some()
    }

    /// 在途 packet 的摘要
    pub fn streamed_packet(&self) -> Option<PacketInfo> {
        self.streamed.as_ref().map(Packet::info)
    }

    /// 结束定时器是否仍在等待
    pub fn timer_pending(&self) -> bool {
        self.timer.is_some()
    }

    fn ports(&self) -> FlowResult<(PortRef, PortRef)> {
        match (self.provider, self.consumer) {
            (Some(p), Some(c)) => Ok((p, c)),
            _ => Err(unsupported(&self.name, "streaming before initialize")),
        }
    }

    fn sent_so_far(&self, now: SimTime) -> u64 {
        self.datarate.bits_in(now.since(self.stream_start))
    }

    fn can_start_streaming(&self, net: &FlowNet) -> FlowResult<bool> {
        let (provider, consumer) = self.ports()?;
        Ok(net.can_pull_some_packet(provider)? && net.can_push_some_packet(consumer)?)
    }

    /// Idle 时检查启动条件，满足就开始
    fn try_start(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if !self.is_streaming() && self.can_start_streaming(net)? {
            self.start_streaming(sim, net)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, sim, net), fields(name = %self.name))]
    fn start_streaming(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if self.is_streaming() {
            return Err(ProtocolError::AlreadyStreaming {
                element: self.name.clone(),
            }
            .into());
        }
        let (provider, consumer) = self.ports()?;
        let pkt = net.pull_packet_start(provider, self.datarate, sim)?;
        let copy = net.dup_packet(&pkt);
        let duration = self.datarate.tx_time(pkt.length_bits);
        info!(
            pkt_id = pkt.id,
            tree_id = pkt.tree_id,
            len_bits = pkt.length_bits,
            ?duration,
            "▶️  开始流式发送"
        );
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::StreamStarted {
                datarate_bps: self.datarate.0,
            },
        );
        self.stream_start = sim.now();
        self.streamed = Some(pkt);
        self.stats.started += 1;
        net.push_packet_start(consumer, copy, self.datarate, sim)?;
        self.timer = Some(sim.schedule_after(
            duration,
            ElementTimer {
                element: self.me,
                timer: END_STREAMING,
            },
        ));
        Ok(())
    }

    /// 从 provider 取流的结尾并作为结尾 push 给 consumer，返回实际发送的 bit 数
    fn end_streaming(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<u64> {
        let (provider, consumer) = self.ports()?;
        if self.streamed.take().is_none() {
            return Err(ProtocolError::NotStreaming {
                element: self.name.clone(),
            }
            .into());
        }
        let pkt = net.pull_packet_end(provider, sim)?;
        let sent_bits = pkt.length_bits;
        debug!(pkt_id = pkt.id, sent_bits, "结束流式发送");
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::StreamEnded { sent_bits },
        );
        self.stats.sent_bits = self.stats.sent_bits.saturating_add(sent_bits);
        net.push_packet_end(consumer, pkt, sim)?;
        Ok(sent_bits)
    }

    fn preempt(&mut self, cause: PreemptCause, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if let Some(t) = self.timer.take() {
            sim.cancel(t);
        }
        let elapsed_bits = self.sent_so_far(sim.now());
        let info = self.streamed_packet();
        self.end_streaming(sim, net)?;
        info!(?cause, sent_bits = elapsed_bits, "⏸️  传输被抢占");
        net.record_info(
            sim.now(),
            &self.name,
            info,
            FlowEventKind::Preempted {
                sent_bits: elapsed_bits,
                cause,
            },
        );
        self.stats.preempted += 1;
        self.try_start(sim, net)
    }

    /// 下游中止了在途的流：丢掉在途 packet，从 provider 取回结尾以关闭输入侧会话，不再向下游发送
    fn abort_streaming(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        let (provider, _) = self.ports()?;
        if let Some(t) = self.timer.take() {
            sim.cancel(t);
        }
        self.streamed = None;
        let end = net.pull_packet_end(provider, sim)?;
        let sent_bits = self.sent_so_far(sim.now());
        warn!(
            pkt_id = end.id,
            tree_id = end.tree_id,
            sent_bits,
            "✂️  下游中止了流，已发送部分作废"
        );
        net.record(
            sim.now(),
            &self.name,
            Some(&end),
            FlowEventKind::Truncated { sent_bits },
        );
        self.stats.truncated += 1;
        self.try_start(sim, net)
    }
}

impl Element for PreemptingServer {
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
        if self.datarate.0 == 0 {
            return Err(ConfigError::ZeroDatarate {
                element: self.name.clone(),
            }
            .into());
        }
        self.me = me;
        self.provider = Some(net.require_peer(PortRef::new(me, IN), Capability::Provider)?);
        self.consumer = Some(net.require_peer(PortRef::new(me, OUT), Capability::Consumer)?);
        debug!(name = %self.name, datarate = %self.datarate, "server 初始化");
        self.try_start(sim, net)
    }

    fn handle_timer(&mut self, timer: u32, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if timer != END_STREAMING {
            return Err(unsupported(&self.name, "unknown timer"));
        }
        self.timer = None;
        self.end_streaming(sim, net)?;
        self.stats.completed += 1;
        self.try_start(sim, net)
    }

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if !self.is_streaming() {
            return self.try_start(sim, net);
        }
        let (_, consumer) = self.ports()?;
        if !net.can_push_some_packet(consumer)? {
            self.preempt(PreemptCause::ConsumerCapacity, sim, net)?;
        }
        Ok(())
    }

    fn handle_can_pull_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if self.is_streaming() {
            self.preempt(PreemptCause::ProviderChanged, sim, net)
        } else {
            self.try_start(sim, net)
        }
    }

    fn handle_push_packet_processed(
        &mut self,
        packet: PacketInfo,
        _gate: usize,
        successful: bool,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        let in_flight = self.streamed.as_ref().map(|p| p.tree_id);
        if in_flight == Some(packet.tree_id) {
            debug!(tree_id = packet.tree_id, successful, "在途的流被下游结束");
            self.abort_streaming(sim, net)
        } else {
            Ok(())
        }
    }
}
