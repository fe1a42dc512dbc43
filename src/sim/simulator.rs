//! 仿真器
//!
//! 维护当前时间与事件队列。已调度的事件可以通过 [`EventId`] 取消：
//! 被取消的事件留在堆里，出队时直接丢弃，不计入 tick。

use super::event::{Entry, Event, EventId, World};
use super::time::SimTime;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use tracing::{debug, info, trace, warn};

#[derive(Default)]
pub struct Simulator {
    now: SimTime,
    next_id: u64,
    q: BinaryHeap<Reverse<Entry>>,
    /// 尚未执行且未被取消的事件
    live: HashSet<EventId>,
    stopped: bool,
}

impl Simulator {
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 调度事件在 `at` 执行
    #[tracing::instrument(skip(self, ev), fields(event_type = std::any::type_name::<E>(), schedule_at = ?at))]
    pub fn schedule<E: Event>(&mut self, at: SimTime, ev: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.q.push(Reverse(Entry {
            at,
            id,
            ev: Box::new(ev),
        }));
        self.live.insert(id);
        trace!(now = ?self.now, seq = id.0, queue_size = self.q.len(), "调度事件");
        id
    }

    /// 在当前时间之后 `delay` 调度事件
    pub fn schedule_after<E: Event>(&mut self, delay: SimTime, ev: E) -> EventId {
        let at = self.now.saturating_add(delay);
        self.schedule(at, ev)
    }

    /// 取消尚未执行的事件。事件已执行或已取消时返回 false。
    pub fn cancel(&mut self, id: EventId) -> bool {
        let removed = self.live.remove(&id);
        trace!(seq = id.0, removed, "取消事件");
        removed
    }

    pub fn is_pending(&self, id: EventId) -> bool {
        self.live.contains(&id)
    }

    /// 等待执行的事件数（不含已取消的）
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    /// 在当前事件执行完后终止运行。
    pub fn stop(&mut self) {
        warn!(now = ?self.now, "⛔ 仿真被终止");
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// 弹出并执行下一个时间不晚于 `until` 的有效事件；没有可执行的事件时返回 false。
    fn step(&mut self, until: SimTime, world: &mut dyn World) -> bool {
        loop {
            if self.stopped {
                return false;
            }
            match self.q.peek() {
                Some(Reverse(top)) if top.at <= until => {}
                _ => return false,
            }
            let Some(Reverse(entry)) = self.q.pop() else {
                return false;
            };
            if !self.live.remove(&entry.id) {
                trace!(seq = entry.id.0, "跳过已取消事件");
                continue;
            }
            self.now = entry.at;
            debug!(now = ?self.now, seq = entry.id.0, remaining_queue = self.q.len(), "执行事件");
            entry.ev.execute(self, world);
            world.on_tick(self);
            return true;
        }
    }

    /// 运行直到没有时间不晚于 `until` 的事件，然后把时钟推进到 `until`。
    /// 被终止时时钟停在最后执行的事件上。
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) {
        while self.step(until, world) {}
        if !self.stopped {
            self.now = self.now.max(until);
        }
    }

    /// 运行所有事件直到队列为空或被终止。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) {
        info!(now = ?self.now, queue_size = self.q.len(), "▶️  开始运行仿真");
        let mut event_count = 0u64;
        while self.step(SimTime(u64::MAX), world) {
            event_count += 1;
        }
        info!(
            total_events = event_count,
            final_time = ?self.now,
            stopped = self.stopped,
            "✅ 仿真完成"
        );
    }
}
