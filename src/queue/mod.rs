//! 队列策略（Queue disciplines）
//!
//! 提供 DropTail（尾丢弃）存储。队列元件和 MAC 队列持有者都通过 [`PacketQueue`]
//! 这一 Queue 能力访问队列内容。

use crate::packet::Packet;

mod drop_tail;

pub use drop_tail::DropTailQueue;

/// Packet 队列抽象
pub trait PacketQueue: std::fmt::Debug + Send {
    /// 入队：成功返回 Ok；若被丢弃则返回 Err(pkt)
    fn enqueue(&mut self, pkt: Packet) -> Result<(), Packet>;
    /// 出队：按队列策略返回下一个 packet
    fn dequeue(&mut self) -> Option<Packet>;
    /// 查看下一个将出队的 packet
    fn peek(&self) -> Option<&Packet>;

    fn len(&self) -> usize;
    fn total_bits(&self) -> u64;
    fn capacity_bits(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否还能容纳 `pkt`
    fn fits(&self, pkt: &Packet) -> bool {
        self.total_bits().saturating_add(pkt.length_bits) <= self.capacity_bits()
    }

    /// 是否还有剩余容量
    fn has_room(&self) -> bool {
        self.total_bits() < self.capacity_bits()
    }
}
