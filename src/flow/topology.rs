//! 静态拓扑查询
//!
//! 从某个输入端口出发沿连接往上游走，找到第一个具备 Queue 能力的元件。

use super::error::{ConfigError, FlowResult};
use super::id::{ElementId, PortRef};
use super::net::FlowNet;
use tracing::debug;

impl FlowNet {
    /// 查找 `input` 上游的队列元件。
    ///
    /// 对端元件有队列就返回它；否则若对端是透传元件（声明了 `upstream_gate`），
    /// 从它的输入端口继续往上游找。走到链路尽头仍未找到时返回 `ConfigError::NoQueue`。
    pub fn find_queue(&self, input: PortRef) -> FlowResult<ElementId> {
        let mut port = input;
        // 每个元件最多经过一次，防止环路
        for _ in 0..=self.len() {
            let Some(out) = self.peer(port) else {
                break;
            };
            if self.queue(out.element).is_some() {
                debug!(from = %self.port_label(input), queue = self.name_of(out.element), "找到队列");
                return Ok(out.element);
            }
            let upstream = self
                .probe(out.element, |e, _| Ok(e.upstream_gate(out.gate)))?;
            match upstream {
                Some(gate) => port = PortRef::new(out.element, gate),
                None => break,
            }
        }
        Err(ConfigError::NoQueue {
            port: self.port_label(input),
        }
        .into())
    }
}
