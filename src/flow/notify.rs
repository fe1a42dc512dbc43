//! 通知队列
//!
//! 容量变化和处理完成通知不直接回调，而是排队，等最外层调用返回（调用深度回到零）时
//! 依次投递。这样通知永远不会打到一个正在执行的元件上，回调链也一定收敛。

use std::collections::VecDeque;

use crate::packet::PacketInfo;

use super::id::PortRef;

/// 一条待投递的通知，`to` 是接收通知的端口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// consumer 容量变化，投递给 producer 的输出 gate
    CanPushChanged { to: PortRef },
    /// provider 容量变化，投递给 collector 的输入 gate
    CanPullChanged { to: PortRef },
    /// consumer 处理完（或中止）一个 packet，投递给 producer
    PushProcessed {
        to: PortRef,
        packet: PacketInfo,
        successful: bool,
    },
    /// provider 处理完一个 packet，投递给 collector
    PullProcessed {
        to: PortRef,
        packet: PacketInfo,
        successful: bool,
    },
}

impl Notification {
    pub fn target(&self) -> PortRef {
        match *self {
            Notification::CanPushChanged { to }
            | Notification::CanPullChanged { to }
            | Notification::PushProcessed { to, .. }
            | Notification::PullProcessed { to, .. } => to,
        }
    }

    fn is_capacity_change(&self) -> bool {
        matches!(
            self,
            Notification::CanPushChanged { .. } | Notification::CanPullChanged { .. }
        )
    }
}

/// FIFO 通知队列；相同的容量变化通知在队列里只保留一条。
#[derive(Debug, Default)]
pub struct NotificationQueue {
    q: VecDeque<Notification>,
    coalesced: u64,
}

impl NotificationQueue {
    /// 入队；被合并时返回 false
    pub fn push(&mut self, n: Notification) -> bool {
        if n.is_capacity_change() && self.q.contains(&n) {
            self.coalesced += 1;
            return false;
        }
        self.q.push_back(n);
        true
    }

    pub fn pop(&mut self) -> Option<Notification> {
        self.q.pop_front()
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// 被合并掉的通知数
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}
