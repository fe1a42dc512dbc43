//! 流仿真世界与事件
//!
//! `FlowWorld` 持有元件图；元件定时器、延迟链路投递和生命周期操作都以事件形式进入仿真器。
//! 事件执行中出现的配置/协议错误是致命的：记录到 `FlowNet::fault` 并终止仿真。

use std::any::Any;

use super::error::FlowError;
use super::id::{ElementId, PortRef};
use super::log::LifecycleOp;
use super::net::FlowNet;
use crate::packet::Packet;
use crate::sim::{Event, Simulator, World};
use tracing::{debug, error};

/// 持有元件图的仿真世界
#[derive(Default)]
pub struct FlowWorld {
    pub net: FlowNet,
}

impl World for FlowWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 从 `World` 取出元件图
pub(crate) fn flow_net(world: &mut dyn World) -> &mut FlowNet {
    &mut world
        .as_any_mut()
        .downcast_mut::<FlowWorld>()
        .expect("world must be FlowWorld")
        .net
}

/// 事件里遇到致命错误：记录并终止仿真
pub(crate) fn abort_run(net: &mut FlowNet, sim: &mut Simulator, err: FlowError) {
    error!(now = ?sim.now(), %err, "❌ 致命错误，终止仿真");
    net.record_fault(err);
    sim.stop();
}

/// 事件：元件自己调度的定时器
#[derive(Debug)]
pub struct ElementTimer {
    pub element: ElementId,
    pub timer: u32,
}

impl Event for ElementTimer {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let net = flow_net(world);
        if let Err(err) = net.fire_timer(self.element, self.timer, sim) {
            abort_run(net, sim, err);
        }
    }
}

/// 事件：packet 经延迟链路到达输入端口
#[derive(Debug)]
pub struct DeliverPacket {
    pub to: PortRef,
    pub pkt: Packet,
}

impl Event for DeliverPacket {
    #[tracing::instrument(skip(self, sim, world), fields(pkt_id = self.pkt.id, to = %self.to))]
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let DeliverPacket { to, pkt } = *self;
        debug!(now = ?sim.now(), len_bits = pkt.length_bits, "📨 packet 到达");
        let net = flow_net(world);
        if let Err(err) = net.deliver_message(to, pkt, sim) {
            abort_run(net, sim, err);
        }
    }
}

/// 事件：在指定时间对元件执行生命周期操作
#[derive(Debug)]
pub struct LifecycleEvent {
    pub element: ElementId,
    pub op: LifecycleOp,
}

impl Event for LifecycleEvent {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let net = flow_net(world);
        if let Err(err) = net.lifecycle(self.element, self.op, sim) {
            abort_run(net, sim, err);
        }
    }
}
