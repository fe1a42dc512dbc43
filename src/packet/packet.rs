//! 数据包类型
//!
//! 定义数据包、分片标签和用于通知的数据包摘要。

use serde::{Deserialize, Serialize};

/// 分片标签：被抢占的 packet 拆成已发送部分和剩余部分时打上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentTag {
    pub first: bool,
    pub last: bool,
    pub number: u32,
}

impl FragmentTag {
    /// 未被拆分的完整 packet
    pub fn whole() -> Self {
        Self {
            first: true,
            last: true,
            number: 0,
        }
    }
}

/// 网络数据包
#[derive(Debug)]
pub struct Packet {
    /// 实例 id，每次 dup 都会分配新的
    pub id: u64,
    /// 流/树 id：同一个 packet 的所有副本共享，用来标识流会话
    pub tree_id: u64,
    /// 传输 id：区分同一 packet 的多次（重）传输
    pub transmission_id: u64,
    pub name: String,
    pub length_bits: u64,
    pub fragment: Option<FragmentTag>,
    /// 传输被截断（异步中止）时置位
    pub truncated: bool,
}

impl Packet {
    pub(crate) fn new(id: u64, tree_id: u64, name: impl Into<String>, length_bits: u64) -> Self {
        Self {
            id,
            tree_id,
            transmission_id: id,
            name: name.into(),
            length_bits,
            fragment: None,
            truncated: false,
        }
    }

    /// 按字节长度换算成 bit
    pub fn bytes_to_bits(bytes: u64) -> u64 {
        bytes.saturating_mul(8)
    }

    /// 获取数据包摘要
    pub fn info(&self) -> PacketInfo {
        PacketInfo {
            id: self.id,
            tree_id: self.tree_id,
            transmission_id: self.transmission_id,
            length_bits: self.length_bits,
        }
    }

    /// 是否为完整 packet（不是被抢占切下的前半段，也没有被截断）
    pub fn is_complete(&self) -> bool {
        !self.truncated && self.fragment.is_none_or(|f| f.last)
    }
}

/// 数据包摘要：通知回调里只携带它，不转移 packet 所有权。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub id: u64,
    pub tree_id: u64,
    pub transmission_id: u64,
    pub length_bits: u64,
}
