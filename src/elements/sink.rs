//! 被动接收端（Packet Sink）
//!
//! 接收原子 packet 和流式 packet。可以在运行中切换是否接收（产生反压），
//! 也可以中止正在接收的流（下游异步中止）。

use std::any::Any;

use serde::Serialize;

use crate::flow::{
    Capabilities, Capability, Datarate, Element, ElementId, FlowEventKind, FlowNet, FlowResult,
    GateSpec, PortRef, ProtocolError, StreamProgress, abort_run, flow_net,
};
use crate::packet::{Packet, PacketInfo};
use crate::sim::{Event, SimTime, Simulator, World};
use tracing::{debug, info, warn};

pub const IN: usize = 0;

static GATES: [GateSpec; 1] = [GateSpec::input("in", Capabilities::CONSUMER)];

/// 收到的一个 packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedPacket {
    pub at: SimTime,
    pub name: String,
    pub info: PacketInfo,
    pub complete: bool,
    pub streamed: bool,
}

#[derive(Debug)]
pub struct PacketSink {
    name: String,
    producer: Option<PortRef>,
    available: bool,
    receiving: Option<Packet>,
    pub received: Vec<ReceivedPacket>,
    pub received_bits: u64,
    pub aborted: u64,
}

impl PacketSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: None,
            available: true,
            receiving: None,
            received: Vec::new(),
            received_bits: 0,
            aborted: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving.is_some()
    }

    /// 切换是否接收；只有状态真正变化时才通知 producer
    pub fn set_available(&mut self, available: bool, sim: &mut Simulator, net: &mut FlowNet) {
        if self.available == available {
            return;
        }
        self.available = available;
        info!(name = %self.name, available, now = ?sim.now(), "接收状态变化");
        if let Some(p) = self.producer {
            net.notify_can_push_changed(p);
        }
    }

    /// 中止正在接收的流，通知 producer 处理失败；返回是否真的中止了什么
    pub fn abort_reception(&mut self, sim: &mut Simulator, net: &mut FlowNet) -> bool {
        let Some(pkt) = self.receiving.take() else {
            return false;
        };
        warn!(name = %self.name, tree_id = pkt.tree_id, "中止接收");
        net.record(sim.now(), &self.name, Some(&pkt), FlowEventKind::ReceptionAborted);
        self.aborted += 1;
        if let Some(p) = self.producer {
            net.notify_push_processed(p, pkt.info(), false);
        }
        true
    }

    fn check_available(&self, sim: &Simulator) -> FlowResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(ProtocolError::NotAccepting {
                element: self.name.clone(),
                at: sim.now(),
            }
            .into())
        }
    }

    fn check_stream(&self, pkt: &Packet) -> FlowResult<()> {
        match &self.receiving {
            Some(open) if open.tree_id != pkt.tree_id => Err(ProtocolError::AnotherStreamInProgress {
                element: self.name.clone(),
                open: open.tree_id,
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn accept(&mut self, pkt: Packet, streamed: bool, sim: &mut Simulator, net: &mut FlowNet) {
        let complete = pkt.is_complete();
        debug!(name = %self.name, pkt_id = pkt.id, len_bits = pkt.length_bits, complete, streamed, "📥 收到 packet");
        net.record(
            sim.now(),
            &self.name,
            Some(&pkt),
            FlowEventKind::Received { complete, streamed },
        );
        self.received_bits = self.received_bits.saturating_add(pkt.length_bits);
        self.received.push(ReceivedPacket {
            at: sim.now(),
            name: pkt.name.clone(),
            info: pkt.info(),
            complete,
            streamed,
        });
        if streamed {
            if let Some(p) = self.producer {
                net.notify_push_processed(p, pkt.info(), true);
            }
        }
    }
}

impl Element for PacketSink {
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
        Ok(())
    }

    fn can_push_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Ok(self.available)
    }

    fn push_packet(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_available(sim)?;
        self.check_stream(&pkt)?;
        self.accept(pkt, false, sim, net);
        Ok(())
    }

    fn push_packet_start(
        &mut self,
        pkt: Packet,
        _gate: usize,
        _datarate: Datarate,
        sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_available(sim)?;
        self.check_stream(&pkt)?;
        self.receiving = Some(pkt);
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
            self.receiving = None;
            self.accept(pkt, true, sim, net);
        } else {
            self.receiving = Some(pkt);
        }
        Ok(())
    }

    fn push_packet_end(
        &mut self,
        pkt: Packet,
        _gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.check_stream(&pkt)?;
        self.receiving = None;
        self.accept(pkt, true, sim, net);
        Ok(())
    }
}

/// 事件：在指定时间切换 sink 的接收状态
#[derive(Debug)]
pub struct SetSinkAvailable {
    pub sink: ElementId,
    pub available: bool,
}

impl Event for SetSinkAvailable {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let net = flow_net(world);
        let available = self.available;
        let r = net.invoke::<PacketSink, _>(self.sink, sim, |s, sim, net| {
            s.set_available(available, sim, net);
            Ok(())
        });
        if let Err(err) = r {
            abort_run(net, sim, err);
        }
    }
}

/// 事件：在指定时间中止 sink 正在接收的流
#[derive(Debug)]
pub struct AbortReception {
    pub sink: ElementId,
}

impl Event for AbortReception {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let net = flow_net(world);
        let r = net.invoke::<PacketSink, _>(self.sink, sim, |s, sim, net| {
            s.abort_reception(sim, net);
            Ok(())
        });
        if let Err(err) = r {
            abort_run(net, sim, err);
        }
    }
}
