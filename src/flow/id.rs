//! 标识符类型
//!
//! 定义元件和端口的标识符。

use std::fmt;

/// 元件标识符（在 `FlowNet` 中的下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub usize);

/// 端口引用：某个元件上的某个 gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub element: ElementId,
    pub gate: usize,
}

impl PortRef {
    pub fn new(element: ElementId, gate: usize) -> Self {
        Self { element, gate }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.element.0, self.gate)
    }
}
