//! 元件 trait
//!
//! 所有参与 push/pull 协议的元件都实现 [`Element`]。四种端口能力对应四组方法：
//!
//! - **Consumer**（被 push）：`can_push_*`、`push_packet*`
//! - **Producer**（主动 push）：`handle_can_push_packet_changed`、`handle_push_packet_processed`
//! - **Provider**（被 pull）：`can_pull_*`、`pull_packet*`
//! - **Collector**（主动 pull）：`handle_can_pull_packet_changed`、`handle_pull_packet_processed`
//!
//! 元件只需要覆盖自己声明的能力；其余协议操作默认返回 `ConfigError::Unsupported`，
//! 通知回调默认忽略。元件之间从不直接持有对方，一律经由 [`FlowNet`] 按端口调用。

use std::any::Any;

use super::datarate::Datarate;
use super::error::{ConfigError, FlowError, FlowResult};
use super::id::ElementId;
use super::capability::GateSpec;
use super::log::LifecycleOp;
use super::net::FlowNet;
use super::session::StreamProgress;
use crate::packet::{Packet, PacketInfo};
use crate::queue::PacketQueue;
use crate::sim::Simulator;

pub(crate) fn unsupported(element: &str, operation: &'static str) -> FlowError {
    ConfigError::Unsupported {
        element: element.to_string(),
        operation,
    }
    .into()
}

/// 元件接口
pub trait Element: Any + Send {
    /// 获取元件名称
    fn name(&self) -> &str;

    /// 静态声明的 gate，下标即 gate 编号
    fn gates(&self) -> &'static [GateSpec];

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// 所有连接建立后调用一次：解析对端端口、启动定时器。
    fn initialize(
        &mut self,
        _me: ElementId,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    /// packet 经由延迟链路到达（“send” 而不是直接 push）
    fn handle_message(
        &mut self,
        pkt: Packet,
        gate: usize,
        sim: &mut Simulator,
        net: &mut FlowNet,
    ) -> FlowResult<()> {
        self.push_packet(pkt, gate, sim, net)
    }

    /// 自己调度的定时器到期
    fn handle_timer(&mut self, _timer: u32, _sim: &mut Simulator, _net: &mut FlowNet) -> FlowResult<()> {
        Err(unsupported(self.name(), "handle_timer"))
    }

    /// 生命周期操作（启动/关闭/崩溃）
    fn handle_lifecycle(
        &mut self,
        _op: LifecycleOp,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    // ---- Consumer ----

    fn can_push_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Err(unsupported(self.name(), "can_push_some_packet"))
    }

    fn can_push_packet(&self, _pkt: &Packet, gate: usize, net: &FlowNet) -> FlowResult<bool> {
        self.can_push_some_packet(gate, net)
    }

    fn push_packet(
        &mut self,
        _pkt: Packet,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Err(unsupported(self.name(), "push_packet"))
    }

    fn push_packet_start(
        &mut self,
        _pkt: Packet,
        _gate: usize,
        _datarate: Datarate,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Err(unsupported(self.name(), "push_packet_start"))
    }

    fn push_packet_progress(
        &mut self,
        _pkt: Packet,
        _gate: usize,
        _datarate: Datarate,
        _progress: StreamProgress,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Err(unsupported(self.name(), "push_packet_progress"))
    }

    fn push_packet_end(
        &mut self,
        _pkt: Packet,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Err(unsupported(self.name(), "push_packet_end"))
    }

    // ---- Producer ----

    fn handle_can_push_packet_changed(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    fn handle_push_packet_processed(
        &mut self,
        _packet: PacketInfo,
        _gate: usize,
        _successful: bool,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    // ---- Provider ----

    fn can_pull_some_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<bool> {
        Err(unsupported(self.name(), "can_pull_some_packet"))
    }

    fn can_pull_packet(&self, _gate: usize, _net: &FlowNet) -> FlowResult<Option<PacketInfo>> {
        Err(unsupported(self.name(), "can_pull_packet"))
    }

    fn pull_packet(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        Err(unsupported(self.name(), "pull_packet"))
    }

    fn pull_packet_start(
        &mut self,
        _gate: usize,
        _datarate: Datarate,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        Err(unsupported(self.name(), "pull_packet_start"))
    }

    fn pull_packet_progress(
        &mut self,
        _gate: usize,
        _datarate: Datarate,
        _progress: StreamProgress,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        Err(unsupported(self.name(), "pull_packet_progress"))
    }

    fn pull_packet_end(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<Packet> {
        Err(unsupported(self.name(), "pull_packet_end"))
    }

    // ---- Collector ----

    fn handle_can_pull_packet_changed(
        &mut self,
        _gate: usize,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    fn handle_pull_packet_processed(
        &mut self,
        _packet: PacketInfo,
        _gate: usize,
        _successful: bool,
        _sim: &mut Simulator,
        _net: &mut FlowNet,
    ) -> FlowResult<()> {
        Ok(())
    }

    // ---- Queue 能力与拓扑 ----

    fn as_queue(&self) -> Option<&dyn PacketQueue> {
        None
    }

    /// 清空队列并交出全部 packet（队列所有者关闭接口时用）
    fn remove_all_packets(&mut self, _sim: &mut Simulator, _net: &mut FlowNet) -> FlowResult<Vec<Packet>> {
        Err(unsupported(self.name(), "remove_all_packets"))
    }

    /// 拓扑遍历用：从输出 gate 往回对应的输入 gate（透传元件才有）
    fn upstream_gate(&self, _out_gate: usize) -> Option<usize> {
        None
    }
}
