//! 流事件记录
//!
//! 设计目标：
//! - **结构化**：用 JSON 事件而不是解析文本日志
//! - **轻量**：事件存在内存里，仿真结束由调用方决定是否写文件
//! - **可断言**：测试直接按元件名/事件类型过滤

use serde::{Deserialize, Serialize};

use crate::packet::PacketInfo;

/// 丢包原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// 队列满（尾丢弃）
    QueueOverflow,
    /// 接口被关闭
    InterfaceDown,
    /// 节点崩溃
    Crash,
}

/// 生命周期操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOp {
    Start,
    Stop,
    Crash,
}

/// 抢占原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptCause {
    /// 下游 consumer 失去容量
    ConsumerCapacity,
    /// 上游 provider 的可 pull 状态发生变化
    ProviderChanged,
}

/// 流事件类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowEventKind {
    /// 源元件生成了一个 packet
    Produced,
    /// packet 进入流处理元件（处理之前）
    PushedIn,
    /// packet 离开流处理元件（处理之后）
    PushedOut,
    PulledIn,
    PulledOut,
    /// packet 入队
    Enqueued { queue_len: usize, queue_bits: u64 },
    /// packet 被丢弃
    Dropped { reason: DropReason },
    /// 开始流式传输
    StreamStarted { datarate_bps: u64 },
    /// 流式传输结束（正常完成或被抢占后收尾）
    StreamEnded { sent_bits: u64 },
    /// 传输被抢占
    Preempted { sent_bits: u64, cause: PreemptCause },
    /// 传输被对端异步中止，已发送部分作废
    Truncated { sent_bits: u64 },
    /// packet 被拆成已发送分片和剩余分片
    Fragmented { sent_bits: u64, remaining_bits: u64 },
    /// sink 收到 packet
    Received { complete: bool, streamed: bool },
    /// sink 中止正在接收的流
    ReceptionAborted,
    /// MAC 开始发送
    TxStart { duration_ns: u64 },
    /// MAC 发送完成
    TxEnd,
    /// 生命周期操作
    Lifecycle { op: LifecycleOp },
}

/// 一个可回放的事件（JSON）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    /// 仿真时间（纳秒，和 `SimTime.0` 同口径）
    pub t_ns: u64,
    pub element: String,
    pub pkt: Option<PacketInfo>,
    #[serde(flatten)]
    pub kind: FlowEventKind,
}

/// 一个简单的事件收集器（存内存，仿真结束写 JSON 文件）
#[derive(Debug, Default)]
pub struct FlowLog {
    pub events: Vec<FlowEvent>,
}

impl FlowLog {
    pub fn push(&mut self, ev: FlowEvent) {
        self.events.push(ev);
    }

    /// 某个元件产生的全部事件
    pub fn of<'a>(&'a self, element: &'a str) -> impl Iterator<Item = &'a FlowEvent> + 'a {
        self.events.iter().filter(move |e| e.element == element)
    }

    /// 满足条件的事件数
    pub fn count(&self, pred: impl Fn(&FlowEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// 丢包数（可按原因过滤）
    pub fn drops(&self, reason: Option<DropReason>) -> usize {
        self.count(|e| match &e.kind {
            FlowEventKind::Dropped { reason: r } => reason.is_none_or(|want| want == *r),
            _ => false,
        })
    }
}
