//! 端口能力（Producer / Consumer / Provider / Collector）
//!
//! 每个元件静态声明自己的 gate 以及 gate 上提供的能力。连接时检查两端能力是否互补：
//! push 流要求 Producer -> Consumer，pull 流要求 Provider -> Collector。

use std::fmt;

/// gate 方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// 端口能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// 主动 push（输出 gate）
    Producer,
    /// 被动接收 push（输入 gate）
    Consumer,
    /// 被动供 pull（输出 gate）
    Provider,
    /// 主动 pull（输入 gate）
    Collector,
}

impl Capability {
    /// 对端必须具备的能力
    pub fn complement(self) -> Capability {
        match self {
            Capability::Producer => Capability::Consumer,
            Capability::Consumer => Capability::Producer,
            Capability::Provider => Capability::Collector,
            Capability::Collector => Capability::Provider,
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Capability::Producer => 0b0001,
            Capability::Consumer => 0b0010,
            Capability::Provider => 0b0100,
            Capability::Collector => 0b1000,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::Producer => "producer",
            Capability::Consumer => "consumer",
            Capability::Provider => "provider",
            Capability::Collector => "collector",
        };
        f.write_str(s)
    }
}

/// 能力集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    pub const PRODUCER: Capabilities = Capabilities(Capability::Producer.bit());
    pub const CONSUMER: Capabilities = Capabilities(Capability::Consumer.bit());
    pub const PROVIDER: Capabilities = Capabilities(Capability::Provider.bit());
    pub const COLLECTOR: Capabilities = Capabilities(Capability::Collector.bit());

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub fn contains(self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }
}

/// gate 声明
#[derive(Debug, Clone, Copy)]
pub struct GateSpec {
    pub name: &'static str,
    pub direction: Direction,
    pub capabilities: Capabilities,
}

impl GateSpec {
    pub const fn input(name: &'static str, capabilities: Capabilities) -> Self {
        Self {
            name,
            direction: Direction::Input,
            capabilities,
        }
    }

    pub const fn output(name: &'static str, capabilities: Capabilities) -> Self {
        Self {
            name,
            direction: Direction::Output,
            capabilities,
        }
    }
}

/// 一条 output -> input 连接是否合法：至少有一对互补能力。
pub fn link_is_compatible(out: &GateSpec, input: &GateSpec) -> bool {
    let push = out.capabilities.contains(Capability::Producer)
        && input.capabilities.contains(Capability::Consumer);
    let pull = out.capabilities.contains(Capability::Provider)
        && input.capabilities.contains(Capability::Collector);
    push || pull
}
