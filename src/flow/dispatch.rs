//! 端口操作分发
//!
//! 元件通过这些方法调用对端，而不是直接持有对方。分发层负责：
//! - 按端口找到目标元件并取出调用
//! - 在会话表上检查并更新流会话（每个端口对最多一个）
//! - 延迟链路上的原子 push 改为调度 `DeliverPacket` 事件
//! - 通知入队，并在最外层调用返回时依次投递
//!
//! 约定：push 方向的 `to` 是 consumer 的输入端口，pull 方向的 `from` 是 provider 的输出端口，
//! 会话也以这两个端口为键。

use super::capability::Capability;
use super::datarate::Datarate;
use super::error::{FlowResult, ProtocolError};
use super::id::PortRef;
use super::net::FlowNet;
use super::notify::Notification;
use super::session::StreamProgress;
use super::world::DeliverPacket;
use crate::packet::{Packet, PacketInfo};
use crate::sim::Simulator;
use tracing::{debug, trace};

impl FlowNet {
    // ---- push ----

    /// consumer 是否还能接收 packet（无副作用）
    pub fn can_push_some_packet(&self, to: PortRef) -> FlowResult<bool> {
        self.probe(to.element, |e, net| e.can_push_some_packet(to.gate, net))
    }

    pub fn can_push_packet(&self, to: PortRef, pkt: &Packet) -> FlowResult<bool> {
        self.probe(to.element, |e, net| e.can_push_packet(pkt, to.gate, net))
    }

    /// 原子 push。延迟链路上以事件形式投递（“send”）。
    #[tracing::instrument(skip(self, pkt, sim), fields(to = %to, pkt_id = pkt.id))]
    pub fn push_packet(&mut self, to: PortRef, pkt: Packet, sim: &mut Simulator) -> FlowResult<()> {
        let label = self.port_label(to);
        self.sessions.check_atomic(to, &label)?;
        let delay = self.link_delay(to);
        if delay.0 > 0 {
            debug!(to = %label, ?delay, "📨 经延迟链路发送");
            sim.schedule_after(delay, DeliverPacket { to, pkt });
            return Ok(());
        }
        self.call(to.element, sim, |e, sim, net| e.push_packet(pkt, to.gate, sim, net))
    }

    /// 从自己的输出端口 `from` 把 packet 交给对端 consumer
    pub fn push_or_send(&mut self, from: PortRef, pkt: Packet, sim: &mut Simulator) -> FlowResult<()> {
        let to = self.require_peer(from, Capability::Consumer)?;
        self.push_packet(to, pkt, sim)
    }

    /// 延迟链路上的 packet 到达
    pub(crate) fn deliver_message(&mut self, to: PortRef, pkt: Packet, sim: &mut Simulator) -> FlowResult<()> {
        trace!(to = %to, pkt_id = pkt.id, "📬 packet 到达");
        self.call(to.element, sim, |e, sim, net| e.handle_message(pkt, to.gate, sim, net))
    }

    #[tracing::instrument(skip(self, pkt, sim), fields(to = %to, tree_id = pkt.tree_id))]
    pub fn push_packet_start(
        &mut self,
        to: PortRef,
        pkt: Packet,
        datarate: Datarate,
        sim: &mut Simulator,
    ) -> FlowResult<()> {
        let label = self.port_label(to);
        if self.link_delay(to).0 > 0 {
            return Err(ProtocolError::StreamingOverDelayedLink { port: label }.into());
        }
        let tree_id = pkt.tree_id;
        self.sessions
            .open(to, &label, tree_id, pkt.length_bits, Some(datarate))?;
        let r = self.call(to.element, sim, |e, sim, net| {
            e.push_packet_start(pkt, to.gate, datarate, sim, net)
        });
        if r.is_err() {
            // consumer 拒绝了这个流，会话不能留在表里
            self.sessions.close_matching(to, tree_id);
        }
        r
    }

    #[tracing::instrument(skip(self, pkt, sim), fields(to = %to, tree_id = pkt.tree_id))]
    pub fn push_packet_progress(
        &mut self,
        to: PortRef,
        pkt: Packet,
        datarate: Datarate,
        progress: StreamProgress,
        sim: &mut Simulator,
    ) -> FlowResult<()> {
        let label = self.port_label(to);
        let done = self
            .sessions
            .advance(to, &label, pkt.tree_id, datarate, progress)?;
        trace!(to = %label, done, position = progress.position_bits, "推进流");
        self.call(to.element, sim, |e, sim, net| {
            e.push_packet_progress(pkt, to.gate, datarate, progress, sim, net)
        })
    }

    #[tracing::instrument(skip(self, pkt, sim), fields(to = %to, tree_id = pkt.tree_id))]
    pub fn push_packet_end(&mut self, to: PortRef, pkt: Packet, sim: &mut Simulator) -> FlowResult<()> {
        let label = self.port_label(to);
        self.sessions.close(to, &label, pkt.tree_id)?;
        self.call(to.element, sim, |e, sim, net| e.push_packet_end(pkt, to.gate, sim, net))
    }

    // ---- pull ----

    pub fn can_pull_some_packet(&self, from: PortRef) -> FlowResult<bool> {
        self.probe(from.element, |e, net| e.can_pull_some_packet(from.gate, net))
    }

    pub fn can_pull_packet(&self, from: PortRef) -> FlowResult<Option<PacketInfo>> {
        self.probe(from.element, |e, net| e.can_pull_packet(from.gate, net))
    }

    #[tracing::instrument(skip(self, sim), fields(from = %from))]
    pub fn pull_packet(&mut self, from: PortRef, sim: &mut Simulator) -> FlowResult<Packet> {
        let label = self.port_label(from);
        self.sessions.check_atomic(from, &label)?;
        self.call(from.element, sim, |e, sim, net| e.pull_packet(from.gate, sim, net))
    }

    #[tracing::instrument(skip(self, sim), fields(from = %from))]
    pub fn pull_packet_start(
        &mut self,
        from: PortRef,
        datarate: Datarate,
        sim: &mut Simulator,
    ) -> FlowResult<Packet> {
        let label = self.port_label(from);
        if let Some(open) = self.sessions.get(from) {
            return Err(ProtocolError::SessionAlreadyOpen {
                port: label,
                open: open.tree_id,
                attempted: None,
            }
            .into());
        }
        let pkt = self.call(from.element, sim, |e, sim, net| {
            e.pull_packet_start(from.gate, datarate, sim, net)
        })?;
        self.sessions
            .open(from, &label, pkt.tree_id, pkt.length_bits, Some(datarate))?;
        Ok(pkt)
    }

    #[tracing::instrument(skip(self, sim), fields(from = %from))]
    pub fn pull_packet_progress(
        &mut self,
        from: PortRef,
        datarate: Datarate,
        progress: StreamProgress,
        sim: &mut Simulator,
    ) -> FlowResult<Packet> {
        let label = self.port_label(from);
        self.sessions.require_open(from, &label)?;
        let pkt = self.call(from.element, sim, |e, sim, net| {
            e.pull_packet_progress(from.gate, datarate, progress, sim, net)
        })?;
        self.sessions
            .advance(from, &label, pkt.tree_id, datarate, progress)?;
        Ok(pkt)
    }

    #[tracing::instrument(skip(self, sim), fields(from = %from))]
    pub fn pull_packet_end(&mut self, from: PortRef, sim: &mut Simulator) -> FlowResult<Packet> {
        let label = self.port_label(from);
        self.sessions.require_open(from, &label)?;
        let pkt = self.call(from.element, sim, |e, sim, net| e.pull_packet_end(from.gate, sim, net))?;
        self.sessions.close(from, &label, pkt.tree_id)?;
        Ok(pkt)
    }

    // ---- 通知 ----

    /// consumer 容量变化；`to` 是 producer 的输出端口
    pub fn notify_can_push_changed(&mut self, to: PortRef) {
        if !self.pending.push(Notification::CanPushChanged { to }) {
            trace!(to = %to, "合并重复的容量通知");
        }
    }

    /// provider 容量变化；`to` 是 collector 的输入端口
    pub fn notify_can_pull_changed(&mut self, to: PortRef) {
        if !self.pending.push(Notification::CanPullChanged { to }) {
            trace!(to = %to, "合并重复的容量通知");
        }
    }

    /// consumer 处理完（或中止）一个 packet；`to` 是 producer 的输出端口。
    /// 对应端口对上 tree id 匹配的会话随即关闭。
    pub fn notify_push_processed(&mut self, to: PortRef, packet: PacketInfo, successful: bool) {
        if let Some(key) = self.peer(to) {
            if self.sessions.close_matching(key, packet.tree_id) {
                debug!(port = %self.port_label(key), tree_id = packet.tree_id, "完成通知关闭会话");
            }
        }
        self.pending.push(Notification::PushProcessed {
            to,
            packet,
            successful,
        });
    }

    /// provider 处理完一个 packet；`to` 是 collector 的输入端口
    pub fn notify_pull_processed(&mut self, to: PortRef, packet: PacketInfo, successful: bool) {
        if let Some(key) = self.peer(to) {
            if self.sessions.close_matching(key, packet.tree_id) {
                debug!(port = %self.port_label(key), tree_id = packet.tree_id, "完成通知关闭会话");
            }
        }
        self.pending.push(Notification::PullProcessed {
            to,
            packet,
            successful,
        });
    }

    /// 依次投递积压的通知，直到队列为空
    pub(crate) fn flush(&mut self, sim: &mut Simulator) -> FlowResult<()> {
        if self.flushing {
            return Ok(());
        }
        self.flushing = true;
        let r = self.flush_pending(sim);
        self.flushing = false;
        r
    }

    fn flush_pending(&mut self, sim: &mut Simulator) -> FlowResult<()> {
        while let Some(n) = self.pending.pop() {
            let to = n.target();
            trace!(?n, "投递通知");
            match n {
                Notification::CanPushChanged { .. } => self.call(to.element, sim, |e, sim, net| {
                    e.handle_can_push_packet_changed(to.gate, sim, net)
                })?,
                Notification::CanPullChanged { .. } => self.call(to.element, sim, |e, sim, net| {
                    e.handle_can_pull_packet_changed(to.gate, sim, net)
                })?,
                Notification::PushProcessed {
                    packet, successful, ..
                } => self.call(to.element, sim, |e, sim, net| {
                    e.handle_push_packet_processed(packet, to.gate, successful, sim, net)
                })?,
                Notification::PullProcessed {
                    packet, successful, ..
                } => self.call(to.element, sim, |e, sim, net| {
                    e.handle_pull_packet_processed(packet, to.gate, successful, sim, net)
                })?,
            }
        }
        Ok(())
    }
}
