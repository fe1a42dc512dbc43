//! DropTail（尾丢弃）队列
//!
//! 当队列容量不足时，直接拒绝新到达的 packet，由调用方决定如何记录丢包。

use std::collections::VecDeque;

use crate::packet::Packet;

use super::PacketQueue;

#[derive(Debug)]
pub struct DropTailQueue {
    max_bits: u64,
    cur_bits: u64,
    q: VecDeque<Packet>,
}

impl DropTailQueue {
    pub fn new(max_bits: u64) -> Self {
        Self {
            max_bits,
            cur_bits: 0,
            q: VecDeque::new(),
        }
    }

    /// 容量不限的队列
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }
}

impl PacketQueue for DropTailQueue {
    fn enqueue(&mut self, pkt: Packet) -> Result<(), Packet> {
        if !self.fits(&pkt) {
            return Err(pkt);
        }
        self.cur_bits = self.cur_bits.saturating_add(pkt.length_bits);
        self.q.push_back(pkt);
        Ok(())
    }

    fn dequeue(&mut self) -> Option<Packet> {
        let pkt = self.q.pop_front()?;
        self.cur_bits = self.cur_bits.saturating_sub(pkt.length_bits);
        Some(pkt)
    }

    fn peek(&self) -> Option<&Packet> {
        self.q.front()
    }

    fn len(&self) -> usize {
        self.q.len()
    }

    fn total_bits(&self) -> u64 {
        self.cur_bits
    }

    fn capacity_bits(&self) -> u64 {
        self.max_bits
    }
}
