//! 拓扑构建模块
//!
//! 此模块提供演示和测试用的线性元件拓扑（可抢占流水线、MAC 队列持有者）。

mod line;

pub use line::{LineSpec, MacLine, PreemptingLine, SpecError, build_mac_line, build_preempting_line};
