//! 数据速率
//!
//! 把 packet 长度换算成传输时长，或反过来算出一段时间内能传多少 bit。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::sim::SimTime;

/// 数据速率（bit/s）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Datarate(pub u64);

impl Datarate {
    /// 不限速：流的接收方不关心时长，可抢占的流化元件不会据此拆分
    pub const UNLIMITED: Datarate = Datarate(u64::MAX);

    pub fn is_unlimited(self) -> bool {
        self == Self::UNLIMITED
    }

    pub fn bps(bps: u64) -> Self {
        Datarate(bps)
    }

    pub fn mbps(mbps: u64) -> Self {
        Datarate(mbps.saturating_mul(1_000_000))
    }

    pub fn gbps(gbps: u64) -> Self {
        Datarate(gbps.saturating_mul(1_000_000_000))
    }

    /// 传输 `bits` 所需的时间
    pub fn tx_time(self, bits: u64) -> SimTime {
        // ceil(bits / bps) 秒 -> 纳秒
        if self.0 == 0 {
            return SimTime(u64::MAX / 4);
        }
        let nanos = ((bits as u128).saturating_mul(1_000_000_000u128) + (self.0 as u128 - 1))
            / self.0 as u128;
        SimTime(nanos.min(u64::MAX as u128) as u64)
    }

    /// `elapsed` 时间内传出的 bit 数（向下取整）
    pub fn bits_in(self, elapsed: SimTime) -> u64 {
        let bits = (elapsed.0 as u128).saturating_mul(self.0 as u128) / 1_000_000_000u128;
        bits.min(u64::MAX as u128) as u64
    }
}

impl fmt::Display for Datarate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
