//! 事件、世界与事件队列条目
//!
//! 元件定时器、延迟链路上的投递和生命周期操作都以 [`Event`] 的形式进入仿真器；
//! 事件执行时拿到的 [`World`] 由业务层提供（例如 `FlowWorld` 持有元件图）。

use super::simulator::Simulator;
use super::time::SimTime;
use std::any::Any;
use std::cmp::Ordering;

/// 事件：执行时消费自身，可以把 packet 等资源的所有权带进目标元件。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World);
}

/// 仿真世界。事件通过 `as_any_mut` 向下转型取得具体类型。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// 每执行完一个事件调用一次
    fn on_tick(&mut self, _sim: &mut Simulator) {}
}

/// 已调度事件的句柄，可用于 [`Simulator::cancel`](super::Simulator::cancel)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(pub u64);

/// 队列条目：按 (时间, 调度序号) 升序排列，同一时刻先调度的先执行。
pub(crate) struct Entry {
    pub(crate) at: SimTime,
    pub(crate) id: EventId,
    pub(crate) ev: Box<dyn Event>,
}

impl Entry {
    fn key(&self) -> (SimTime, u64) {
        (self.at, self.id.0)
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}
