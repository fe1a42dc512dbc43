//! 流会话（Streaming Session）
//!
//! 每个端口对同一时刻最多只有一个打开的流会话，以 packet 的 tree id 标识。
//! 会话以接收侧端口为键：push 方向是 consumer 的输入 gate，pull 方向是 provider 的输出 gate。

use std::collections::HashMap;

use super::datarate::Datarate;
use super::error::{FlowResult, ProtocolError};
use super::id::PortRef;

/// `position + extra` 是否到达 packet 末尾
pub fn is_packet_end(total_bits: u64, position_bits: u64, extra_bits: u64) -> bool {
    position_bits.saturating_add(extra_bits) >= total_bits
}

/// 一个打开的流会话
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSession {
    pub tree_id: u64,
    pub length_bits: u64,
    pub datarate: Option<Datarate>,
    /// 已交付的 bit 数
    pub position_bits: u64,
}

/// 所有端口对上的会话表
#[derive(Debug, Default)]
pub struct SessionTable {
    open: HashMap<PortRef, StreamSession>,
}

impl SessionTable {
    pub fn get(&self, port: PortRef) -> Option<&StreamSession> {
        self.open.get(&port)
    }

    pub fn is_open(&self, port: PortRef) -> bool {
        self.open.contains_key(&port)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// 原子传输前检查：不能有打开的会话
    pub fn check_atomic(&self, port: PortRef, label: &str) -> FlowResult<()> {
        match self.open.get(&port) {
            Some(s) => Err(ProtocolError::AtomicDuringStream {
                port: label.to_string(),
                open: s.tree_id,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// 打开会话。同一 tree id 重新打开视为重新开始。
    pub fn open(
        &mut self,
        port: PortRef,
        label: &str,
        tree_id: u64,
        length_bits: u64,
        datarate: Option<Datarate>,
    ) -> FlowResult<()> {
        if let Some(s) = self.open.get(&port) {
            if s.tree_id != tree_id {
                return Err(ProtocolError::SessionAlreadyOpen {
                    port: label.to_string(),
                    open: s.tree_id,
                    attempted: Some(tree_id),
                }
                .into());
            }
        }
        self.open.insert(
            port,
            StreamSession {
                tree_id,
                length_bits,
                datarate,
                position_bits: 0,
            },
        );
        Ok(())
    }

    /// 推进会话；返回这次推进是否完成了整个 packet（完成时会话随即关闭）。
    pub fn advance(
        &mut self,
        port: PortRef,
        label: &str,
        tree_id: u64,
        datarate: Datarate,
        progress: StreamProgress,
    ) -> FlowResult<bool> {
        let session = self.expect_open(port, label, tree_id)?;
        session.datarate = Some(datarate);
        session.position_bits = progress.position_bits.saturating_add(progress.extra_bits);
        let done = progress.completes(session.length_bits);
        if done {
            self.open.remove(&port);
        }
        Ok(done)
    }

    /// 关闭会话；没有会话或 tree id 不符都是协议错误。
    pub fn close(&mut self, port: PortRef, label: &str, tree_id: u64) -> FlowResult<StreamSession> {
        let session = *self.expect_open(port, label, tree_id)?;
        self.open.remove(&port);
        Ok(session)
    }

    /// 只检查不修改（pull 方向在取回 packet 之前用）
    pub fn require_open(&self, port: PortRef, label: &str) -> FlowResult<StreamSession> {
        self.open.get(&port).copied().ok_or_else(|| {
            ProtocolError::NoSession {
                port: label.to_string(),
            }
            .into()
        })
    }

    /// 完成通知到达时强制关闭 tree id 匹配的会话
    pub fn close_matching(&mut self, port: PortRef, tree_id: u64) -> bool {
        if self.open.get(&port).is_some_and(|s| s.tree_id == tree_id) {
            self.open.remove(&port);
            return true;
        }
        false
    }

    fn expect_open(
        &mut self,
        port: PortRef,
        label: &str,
        tree_id: u64,
    ) -> FlowResult<&mut StreamSession> {
        match self.open.get_mut(&port) {
            None => Err(ProtocolError::NoSession {
                port: label.to_string(),
            }
            .into()),
            Some(s) if s.tree_id != tree_id => Err(ProtocolError::StreamMismatch {
                port: label.to_string(),
                open: s.tree_id,
                got: tree_id,
            }
            .into()),
            Some(s) => Ok(s),
        }
    }
}

/// 一次 progress 调用携带的位置信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProgress {
    /// 已交付的 bit 数
    pub position_bits: u64,
    /// 本次额外可处理的 bit 数
    pub extra_bits: u64,
}

impl StreamProgress {
    pub fn new(position_bits: u64, extra_bits: u64) -> Self {
        Self {
            position_bits,
            extra_bits,
        }
    }

    /// 是否到达长度为 `total_bits` 的 packet 末尾
    pub fn completes(&self, total_bits: u64) -> bool {
        is_packet_end(total_bits, self.position_bits, self.extra_bits)
    }
}
