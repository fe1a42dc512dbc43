//! 数据包模块
//!
//! 元件之间传递的 packet 及其摘要信息。packet 不实现 `Clone`：
//! 任意时刻只有一个元件持有它，复制必须显式调用 `FlowNet::dup_packet`。

mod packet;

pub use packet::{FragmentTag, Packet, PacketInfo};
