//! 元件图
//!
//! `FlowNet` 持有所有元件、连接、流会话表和待投递通知。调用某个元件的操作时先把它从
//! 槽位里取出（避免 `&mut self` 与 `&mut element` 的重叠借用），执行完再放回；
//! 取出期间再次调用它会得到 `FlowError::Reentrant`。

use std::collections::HashMap;

use super::capability::{Capability, Direction, GateSpec, link_is_compatible};
use super::element::{Element, unsupported};
use super::error::{ConfigError, FlowError, FlowResult};
use super::id::{ElementId, PortRef};
use super::log::{FlowEvent, FlowEventKind, FlowLog, LifecycleOp};
use super::notify::NotificationQueue;
use super::session::SessionTable;
use crate::packet::{Packet, PacketInfo};
use crate::queue::PacketQueue;
use crate::sim::{SimTime, Simulator};
use tracing::{debug, info, trace};

/// 一条连接的一端
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkEnd {
    pub(crate) peer: PortRef,
    pub(crate) delay: SimTime,
}

/// 元件图
#[derive(Default)]
pub struct FlowNet {
    elements: Vec<Option<Box<dyn Element>>>,
    names: Vec<String>,
    gates: Vec<&'static [GateSpec]>,
    links: HashMap<PortRef, LinkEnd>,
    pub(crate) sessions: SessionTable,
    pub(crate) pending: NotificationQueue,
    /// 当前嵌套调用深度；回到 0 时投递待处理通知
    pub(crate) depth: usize,
    pub(crate) flushing: bool,
    next_pkt_id: u64,
    fault: Option<FlowError>,
    pub log: Option<FlowLog>,
}

impl FlowNet {
    /// 添加元件
    pub fn add<E: Element>(&mut self, element: E) -> ElementId {
        let id = ElementId(self.elements.len());
        debug!(id = id.0, name = element.name(), "添加元件");
        self.names.push(element.name().to_string());
        self.gates.push(element.gates());
        self.elements.push(Some(Box::new(element)));
        id
    }

    /// 元件数量
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// 获取元件名称
    pub fn name_of(&self, id: ElementId) -> &str {
        self.names.get(id.0).map(String::as_str).unwrap_or("?")
    }

    /// 人类可读的端口名，例如 `server.out`
    pub fn port_label(&self, port: PortRef) -> String {
        let gate = self
            .gates
            .get(port.element.0)
            .and_then(|g| g.get(port.gate))
            .map(|g| g.name)
            .unwrap_or("?");
        format!("{}.{}", self.name_of(port.element), gate)
    }

    pub(crate) fn gate_spec(&self, port: PortRef) -> FlowResult<&'static GateSpec> {
        let gates = self
            .gates
            .get(port.element.0)
            .ok_or(ConfigError::UnknownElement(port.element.0))?;
        gates.get(port.gate).ok_or_else(|| {
            ConfigError::UnknownGate {
                element: self.name_of(port.element).to_string(),
                gate: port.gate,
            }
            .into()
        })
    }

    /// 直连两个 gate（output -> input）
    pub fn connect(&mut self, from: PortRef, to: PortRef) -> FlowResult<()> {
        self.connect_with_delay(from, to, SimTime::ZERO)
    }

    /// 用带传播时延的链路连接两个 gate。延迟链路上的原子 push 以事件形式投递。
    #[tracing::instrument(skip(self), fields(from = %from, to = %to))]
    pub fn connect_with_delay(&mut self, from: PortRef, to: PortRef, delay: SimTime) -> FlowResult<()> {
        let out = self.gate_spec(from)?;
        let input = self.gate_spec(to)?;
        if out.direction != Direction::Output {
            return Err(ConfigError::DirectionMismatch {
                port: self.port_label(from),
                expected: "output",
            }
            .into());
        }
        if input.direction != Direction::Input {
            return Err(ConfigError::DirectionMismatch {
                port: self.port_label(to),
                expected: "input",
            }
            .into());
        }
        for port in [from, to] {
            if self.links.contains_key(&port) {
                return Err(ConfigError::AlreadyConnected {
                    port: self.port_label(port),
                }
                .into());
            }
        }
        if !link_is_compatible(out, input) {
            return Err(ConfigError::CapabilityMismatch {
                from: self.port_label(from),
                to: self.port_label(to),
            }
            .into());
        }
        self.links.insert(from, LinkEnd { peer: to, delay });
        self.links.insert(to, LinkEnd { peer: from, delay });
        debug!(from = %self.port_label(from), to = %self.port_label(to), ?delay, "🔗 建立连接");
        Ok(())
    }

    /// 对端端口
    pub fn peer(&self, port: PortRef) -> Option<PortRef> {
        self.links.get(&port).map(|l| l.peer)
    }

    /// 对端端口，仅当对端 gate 具备 `cap` 能力时返回
    pub fn peer_with(&self, port: PortRef, cap: Capability) -> Option<PortRef> {
        let peer = self.peer(port)?;
        let spec = self.gate_spec(peer).ok()?;
        spec.capabilities.contains(cap).then_some(peer)
    }

    /// 同 `peer_with`，但对端缺失时报配置错误
    pub fn require_peer(&self, port: PortRef, cap: Capability) -> FlowResult<PortRef> {
        self.peer_with(port, cap).ok_or_else(|| {
            ConfigError::NotConnected {
                port: self.port_label(port),
                capability: cap.to_string(),
            }
            .into()
        })
    }

    pub(crate) fn link_delay(&self, port: PortRef) -> SimTime {
        self.links.get(&port).map(|l| l.delay).unwrap_or(SimTime::ZERO)
    }

    /// 按添加顺序初始化所有元件
    #[tracing::instrument(skip(self, sim))]
    pub fn initialize(&mut self, sim: &mut Simulator) -> FlowResult<()> {
        info!(elements = self.elements.len(), links = self.links.len() / 2, "初始化元件图");
        for idx in 0..self.elements.len() {
            let id = ElementId(idx);
            self.call(id, sim, |e, sim, net| e.initialize(id, sim, net))?;
        }
        Ok(())
    }

    /// 创建数据包
    pub fn make_packet(&mut self, name: impl Into<String>, length_bits: u64) -> Packet {
        let id = self.next_id();
        Packet::new(id, id, name, length_bits)
    }

    /// 复制数据包：新的实例 id，保留 tree id / transmission id 和标签
    pub fn dup_packet(&mut self, pkt: &Packet) -> Packet {
        let id = self.next_id();
        Packet {
            id,
            tree_id: pkt.tree_id,
            transmission_id: pkt.transmission_id,
            name: pkt.name.clone(),
            length_bits: pkt.length_bits,
            fragment: pkt.fragment,
            truncated: pkt.truncated,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_pkt_id;
        self.next_pkt_id = self.next_pkt_id.wrapping_add(1);
        id
    }

    /// 记录流事件（未开启日志时忽略）
    pub fn record(&mut self, now: SimTime, element: &str, pkt: Option<&Packet>, kind: FlowEventKind) {
        self.record_info(now, element, pkt.map(Packet::info), kind);
    }

    /// 同 `record`，packet 已经交出时只带摘要
    pub fn record_info(
        &mut self,
        now: SimTime,
        element: &str,
        pkt: Option<PacketInfo>,
        kind: FlowEventKind,
    ) {
        if let Some(log) = &mut self.log {
            log.push(FlowEvent {
                t_ns: now.0,
                element: element.to_string(),
                pkt,
                kind,
            });
        }
    }

    /// 取出元件执行 `f`，再放回；最外层返回时投递积压的通知。
    pub(crate) fn call<R>(
        &mut self,
        id: ElementId,
        sim: &mut Simulator,
        f: impl FnOnce(&mut dyn Element, &mut Simulator, &mut FlowNet) -> FlowResult<R>,
    ) -> FlowResult<R> {
        let slot = self
            .elements
            .get_mut(id.0)
            .ok_or(ConfigError::UnknownElement(id.0))?;
        let mut element = slot.take().ok_or_else(|| FlowError::Reentrant {
            element: self.names[id.0].clone(),
        })?;
        self.depth += 1;
        trace!(element = %self.names[id.0], depth = self.depth, "取出元件");

        let r = f(element.as_mut(), sim, self);

        self.depth -= 1;
        self.elements[id.0] = Some(element);
        trace!(element = %self.names[id.0], depth = self.depth, "放回元件");

        if r.is_ok() && self.depth == 0 {
            self.flush(sim)?;
        }
        r
    }

    /// 以只读方式访问元件（能力查询用）
    pub(crate) fn probe<R>(
        &self,
        id: ElementId,
        f: impl FnOnce(&dyn Element, &FlowNet) -> FlowResult<R>,
    ) -> FlowResult<R> {
        let slot = self
            .elements
            .get(id.0)
            .ok_or(ConfigError::UnknownElement(id.0))?;
        let element = slot.as_deref().ok_or_else(|| FlowError::Reentrant {
            element: self.names[id.0].clone(),
        })?;
        f(element, self)
    }

    /// 以具体类型调用元件上的方法（测试、场景脚本、生命周期驱动用）
    pub fn invoke<T: Element, R>(
        &mut self,
        id: ElementId,
        sim: &mut Simulator,
        f: impl FnOnce(&mut T, &mut Simulator, &mut FlowNet) -> FlowResult<R>,
    ) -> FlowResult<R> {
        self.call(id, sim, |e, sim, net| {
            let name = e.name().to_string();
            let typed = e
                .as_any_mut()
                .downcast_mut::<T>()
                .ok_or_else(|| unsupported(&name, "invoke"))?;
            f(typed, sim, net)
        })
    }

    /// 以具体类型读取元件状态
    pub fn element<T: Element>(&self, id: ElementId) -> Option<&T> {
        self.elements
            .get(id.0)?
            .as_deref()?
            .as_any()
            .downcast_ref::<T>()
    }

    /// 通过 Queue 能力访问元件持有的队列
    pub fn queue(&self, id: ElementId) -> Option<&dyn PacketQueue> {
        self.elements.get(id.0)?.as_deref()?.as_queue()
    }

    /// 对元件执行生命周期操作
    #[tracing::instrument(skip(self, sim), fields(element = %self.name_of(id)))]
    pub fn lifecycle(&mut self, id: ElementId, op: LifecycleOp, sim: &mut Simulator) -> FlowResult<()> {
        info!(?op, now = ?sim.now(), "生命周期操作");
        self.call(id, sim, |e, sim, net| e.handle_lifecycle(op, sim, net))
    }

    /// 元件定时器到期
    pub(crate) fn fire_timer(&mut self, id: ElementId, timer: u32, sim: &mut Simulator) -> FlowResult<()> {
        trace!(element = %self.name_of(id), timer, "⏰ 定时器到期");
        self.call(id, sim, |e, sim, net| e.handle_timer(timer, sim, net))
    }

    /// 清空某个队列元件，返回被移除的 packet
    pub fn remove_all_packets(&mut self, id: ElementId, sim: &mut Simulator) -> FlowResult<Vec<Packet>> {
        self.call(id, sim, |e, sim, net| e.remove_all_packets(sim, net))
    }

    /// 记录致命错误（只保留第一个）
    pub fn record_fault(&mut self, err: FlowError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    pub fn fault(&self) -> Option<&FlowError> {
        self.fault.as_ref()
    }

    /// 当前打开的流会话数
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// 是否存在以 `port` 为接收侧的打开会话
    pub fn session_open(&self, port: PortRef) -> bool {
        self.sessions.is_open(port)
    }

    /// 被合并掉的重复容量通知数
    pub fn coalesced_notifications(&self) -> u64 {
        self.pending.coalesced()
    }
}
