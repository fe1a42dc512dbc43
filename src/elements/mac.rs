//! MAC 风格的队列持有者
//!
//! 从上游队列原子地 pull packet，作为当前发送占用 `length / datarate`，结束后交给下层。
//! 队列由初始化时沿拓扑往上游查找得到，当前发送槽和队列互不重叠。
//!
//! 生命周期：
//! - Stop（接口关闭）：丢弃当前发送（取消定时器）和队列里的所有 packet，每个都记一次
//!   `InterfaceDown` 丢包；载波关闭
//! - Crash：同样清空，但不产生丢包记录
//! - Start：恢复接口并继续发送

use std::any::Any;

use crate::flow::{
    Capabilities, Capability, ConfigError, Datarate, DropReason, Element, ElementId, ElementTimer,
    FlowEventKind, FlowNet, FlowResult, GateSpec, LifecycleOp, PortRef, unsupported,
};
use crate::packet::{Packet, PacketInfo};
use crate::sim::{EventId, Simulator};
use tracing::{debug, info, trace};

pub const UPPER_IN: usize = 0;
pub const LOWER_OUT: usize = 1;
pub const LOWER_IN: usize = 2;

const TX_END: u32 = 0;

static GATES: [GateSpec; 3] = [
    GateSpec::input("upperLayerIn", Capabilities::COLLECTOR),
    GateSpec::output("lowerLayerOut", Capabilities::PRODUCER),
    GateSpec::input("lowerLayerIn", Capabilities::CONSUMER),
];

/// 接口状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Up,
    Down,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MacStats {
    pub sent: u64,
    pub received: u64,
    /// 接口关闭时从发送槽和队列里丢弃的 packet 数
    pub dropped_down: u64,
    /// 接口关闭期间从下层到达、被丢弃的 packet 数
    pub rx_dropped_down: u64,
    /// 崩溃时静默丢弃的 packet 数
    pub cleared_on_crash: u64,
}

#[derive(Debug)]
pub struct MacQueueOwner {
    name: String,
    datarate: Datarate,
    me: ElementId,
    state: InterfaceState,
    carrier: bool,
    tx_queue: Option<ElementId>,
    provider: Option<PortRef>,
    lower: Option<PortRef>,
    current_tx: Option<Packet>,
    tx_timer: Option<EventId>,
    pub stats: MacStats,
}

impl MacQueueOwner {
    pub fn new(name: impl Into<String>, datarate: Datarate) -> Self {
        Self {
            name: name.into(),
            datarate,
            me: ElementId(usize::MAX),
            state: InterfaceState::Down,
            carrier: false,
            tx_queue: None,
            provider: None,
            lower: None,
            current_tx: None,
            tx_timer: None,
            stats: MacStats::default(),
        }
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn carrier(&self) -> bool {
        self.carrier
    }

    /// 初始化时找到的发送队列
    pub fn tx_queue(&self) -> Option<ElementId> {
        self.tx_queue
    }

    pub fn current_tx(&self) -> Option<PacketInfo> {
        self.current_tx.as_ref().map(Packet::info)
    }

    pub fn tx_timer_pending(&self) -> bool {
        self.tx_timer.is_some()
    }

    fn record_drop(&self, pkt: &Packet, sim: &Simulator, net: &mut FlowNet) {
        net.record(
            sim.now(),
            &self.name,
            Some(pkt),
            FlowEventKind::Dropped {
                reason: DropReason::InterfaceDown,
            },
        );
    }

    fn try_transmit(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if self.state != InterfaceState::Up || self.current_tx.is_some() {
            return Ok(());
        }
        let Some(provider) = self.provider else {
            return Ok(());
        };
        if !net.can_pull_some_packet(provider)? {
            return Ok(());
        }
        if let Some(lower) = self.lower {
            if !net.can_push_some_packet(lower)? {
                trace!(name = %self.name, "下层暂不可接收");
                return Ok(());
            }
        }
        let pkt = net.pull_packet(provider, sim)?;
        let duration = self.datarate.tx_time(pkt.length_bits);
        debug!(name = %self.name, pkt_id = pkt.id, ?duration, "📤 开始发送");
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::TxStart {
                duration_ns: duration.0,
            },
        );
        self.current_tx = Some(pkt);
        self.tx_timer = Some(sim.schedule_after(
            duration,
            ElementTimer {
                element: self.me,
                timer: TX_END,
            },
        ));
        Ok(())
    }

    /// 清空当前发送和队列；`notify` 为真时每个 packet 记一次丢包
    fn clear(&mut self, notify: bool, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<u64> {
        if let Some(t) = self.tx_timer.take() {
            sim.cancel(t);
        }
        let mut cleared = 0;
        if let Some(pkt) = self.current_tx.take() {
            if notify {
                self.stats.dropped_down += 1;
                self.record_drop(&pkt, sim, net);
            }
            cleared += 1;
        }
        if let Some(q) = self.tx_queue {
            for pkt in net.remove_all_packets(q, sim)? {
                if notify {
                    self.stats.dropped_down += 1;
                    self.record_drop(&pkt, sim, net);
                }
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

impl Element for MacQueueOwner {
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
        let upper = PortRef::new(me, UPPER_IN);
        self.tx_queue = Some(net.find_queue(upper)?);
        self.provider = Some(net.require_peer(upper, Capability::Provider)?);
        self.lower = net.peer_with(PortRef::new(me, LOWER_OUT), Capability::Consumer);
        self.state = InterfaceState::Up;
        self.carrier = true;
        info!(name = %self.name, queue = ?self.tx_queue, "MAC 初始化，接口启用");
        self.try_transmit(sim, net)
    }

    fn handle_timer(&mut self, timer: u32, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        if timer != TX_END {
            return Err(unsupported(&self.name, "unknown timer"));
        }
        self.tx_timer = None;
        let Some(pkt) = self.current_tx.take() else {
            return Ok(());
        };
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::TxEnd);
        self.stats.sent += 1;
        match self.lower {
            Some(_) => net.push_or_send(PortRef::new(self.me, LOWER_OUT), pkt, sim)?,
            None => trace!(name = %self.name, pkt_id = pkt.id, "没有下层，发送完成即丢弃"),
        }
        self.try_transmit(sim, net)
    }

    fn handle_lifecycle(&mut self, op: LifecycleOp, sim: &mut Simulator, net: &mut FlowNet) -> FlowResult<()> {
        net.record(sim.now(), &self.name, None, FlowEventKind::Lifecycle { op });
        match op {
            LifecycleOp::Start => {
                self.state = InterfaceState::Up;
                self.carrier = true;
                info!(name = %self.name, "🟢 接口启用");
                self.try_transmit(sim, net)
            }
            LifecycleOp::Stop => {
                let dropped = self.clear(true, sim, net)?;
                self.carrier = false;
                self.state = InterfaceState::Down;
                info!(name = %self.name, dropped, "🔴 接口关闭");
                Ok(())
            }
            LifecycleOp::Crash => {
                let cleared = self.clear(false, sim, net)?;
                self.stats.cleared_on_crash += cleared;
                self.carrier = false;
                self.state = InterfaceState::Down;
                info!(name = %self.name, cleared, "💥 节点崩溃");
                Ok(())
            }
        }
    }

    fn handle_can_pull_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.try_transmit(sim, net)
    }

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.try_transmit(sim, net)
    }

    fn can_push_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Ok(true)
    }

    fn push_packet(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        if self.state == InterfaceState::Down {
            debug!(name = %self.name, pkt_id = pkt.id, "接口关闭，丢弃下层来的 packet");
            self.stats.rx_dropped_down += 1;
            self.record_drop(&pkt, sim, net);
            return Ok(());
        }
        self.stats.received += 1;
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::Received {
                complete: pkt.is_complete(),
                streamed: false,
            },
        );
        Ok(())
    }
}
