//! 线性拓扑构建
//!
//! - 可抢占流水线：source -> queue -> streamer -> server -> stage -> destreamer -> sink
//! - MAC 线路：source -> queue -> stage -> mac -> sink

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::elements::{
    AbortReception, ActivePacketSource, HeaderInserter, MacQueueOwner, PacketDestreamer,
    PacketFlow, PacketSink, PreemptableStreamer, PreemptingServer, QueueElement,
    SetSinkAvailable, destreamer, flow_stage, mac, preempting_server, queue, sink, source,
    streamer,
};
use crate::flow::{Datarate, ElementId, FlowResult, FlowWorld, PortRef};
use crate::sim::{SimTime, Simulator};

/// 读取线路配置失败
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid line spec `{path}`: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 线性拓扑配置（JSON，缺省字段取默认值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSpec {
    pub datarate_bps: u64,
    pub queue_capacity_bits: u64,
    pub packet_bits: u64,
    pub packets: u64,
    /// 相邻两个 packet 的生成间隔
    pub gap_ns: u64,
    /// 流处理阶段插入的头部长度
    pub header_bits: u64,
    pub min_fragment_bits: u64,
    pub rounding_bits: u64,
    /// 为 false 时 stage 直接把流交给 sink（不经过 destreamer）
    pub destream: bool,
    pub pause_at_ns: Option<u64>,
    pub resume_at_ns: Option<u64>,
    /// sink 在该时刻中止正在接收的流（仅在 `destream = false` 时有意义）
    pub abort_at_ns: Option<u64>,
}

impl Default for LineSpec {
    fn default() -> Self {
        Self {
            datarate_bps: 1_000_000,
            queue_capacity_bits: 100 * 1000,
            packet_bits: 1000,
            packets: 10,
            gap_ns: 0,
            header_bits: 0,
            min_fragment_bits: 64,
            rounding_bits: 8,
            destream: true,
            pause_at_ns: None,
            resume_at_ns: None,
            abort_at_ns: None,
        }
    }
}

impl LineSpec {
    /// 从 JSON 文件读取
    pub fn from_path(path: &Path) -> Result<Self, SpecError> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SpecError::Json {
            path: display,
            source,
        })
    }

    pub fn datarate(&self) -> Datarate {
        Datarate::bps(self.datarate_bps)
    }

    pub fn gap(&self) -> SimTime {
        SimTime(self.gap_ns)
    }
}

/// 可抢占流水线中各元件的 id
#[derive(Debug, Clone, Copy)]
pub struct PreemptingLine {
    pub source: ElementId,
    pub queue: ElementId,
    pub streamer: ElementId,
    pub server: ElementId,
    pub stage: ElementId,
    pub destreamer: Option<ElementId>,
    pub sink: ElementId,
}

impl PreemptingLine {
    /// 按配置调度 sink 的暂停/恢复/中止事件
    pub fn schedule_scenario(&self, sim: &mut Simulator, spec: &LineSpec) {
        if let Some(t) = spec.pause_at_ns {
            sim.schedule(
                SimTime(t),
                SetSinkAvailable {
                    sink: self.sink,
                    available: false,
                },
            );
        }
        if let Some(t) = spec.resume_at_ns {
            sim.schedule(
                SimTime(t),
                SetSinkAvailable {
                    sink: self.sink,
                    available: true,
                },
            );
        }
        if let Some(t) = spec.abort_at_ns {
            sim.schedule(SimTime(t), AbortReception { sink: self.sink });
        }
    }
}

/// 构建可抢占流水线
///
/// 拓扑结构：source -> queue -> streamer -> server -> stage -> [destreamer ->] sink
/// queue 到 server 之间是 pull 方向，server 之后是 push 方向。
pub fn build_preempting_line(world: &mut FlowWorld, spec: &LineSpec) -> FlowResult<PreemptingLine> {
    let net = &mut world.net;
    let datarate = spec.datarate();

    let src = net.add(ActivePacketSource::new(
        "source",
        spec.packet_bits,
        spec.packets,
        spec.gap(),
    ));
    let q = net.add(QueueElement::new("queue", spec.queue_capacity_bits));
    let st = net.add(PreemptableStreamer::new(
        "streamer",
        spec.min_fragment_bits,
        spec.rounding_bits,
    ));
    let srv = net.add(PreemptingServer::new("server", datarate));
    let stage = net.add(PacketFlow::new(
        "stage",
        HeaderInserter {
            header_bits: spec.header_bits,
        },
    ));
    let ds = spec
        .destream
        .then(|| net.add(PacketDestreamer::new("destreamer")));
    let snk = net.add(PacketSink::new("sink"));

    net.connect(PortRef::new(src, source::OUT), PortRef::new(q, queue::IN))?;
    net.connect(PortRef::new(q, queue::OUT), PortRef::new(st, streamer::IN))?;
    net.connect(
        PortRef::new(st, streamer::OUT),
        PortRef::new(srv, preempting_server::IN),
    )?;
    net.connect(
        PortRef::new(srv, preempting_server::OUT),
        PortRef::new(stage, flow_stage::IN),
    )?;
    match ds {
        Some(ds) => {
            net.connect(
                PortRef::new(stage, flow_stage::OUT),
                PortRef::new(ds, destreamer::IN),
            )?;
            net.connect(PortRef::new(ds, destreamer::OUT), PortRef::new(snk, sink::IN))?;
        }
        None => {
            net.connect(PortRef::new(stage, flow_stage::OUT), PortRef::new(snk, sink::IN))?;
        }
    }

    info!(datarate = %datarate, packets = spec.packets, destream = spec.destream, "构建可抢占流水线");
    Ok(PreemptingLine {
        source: src,
        queue: q,
        streamer: st,
        server: srv,
        stage,
        destreamer: ds,
        sink: snk,
    })
}

/// MAC 线路中各元件的 id
#[derive(Debug, Clone, Copy)]
pub struct MacLine {
    pub source: ElementId,
    pub queue: ElementId,
    pub stage: ElementId,
    pub mac: ElementId,
    pub sink: ElementId,
}

/// 构建 MAC 线路
///
/// 拓扑结构：source -> queue -> stage -> mac -> sink
/// queue 和 mac 之间隔着一个透传阶段，mac 初始化时要沿拓扑往上游找到队列。
pub fn build_mac_line(world: &mut FlowWorld, spec: &LineSpec) -> FlowResult<MacLine> {
    let net = &mut world.net;

    let src = net.add(ActivePacketSource::new(
        "source",
        spec.packet_bits,
        spec.packets,
        spec.gap(),
    ));
    let q = net.add(QueueElement::new("queue", spec.queue_capacity_bits));
    let stage = net.add(PacketFlow::new(
        "stage",
        HeaderInserter {
            header_bits: spec.header_bits,
        },
    ));
    let m = net.add(MacQueueOwner::new("mac", spec.datarate()));
    let snk = net.add(PacketSink::new("sink"));

    net.connect(PortRef::new(src, source::OUT), PortRef::new(q, queue::IN))?;
    net.connect(PortRef::new(q, queue::OUT), PortRef::new(stage, flow_stage::IN))?;
    net.connect(PortRef::new(stage, flow_stage::OUT), PortRef::new(m, mac::UPPER_IN))?;
    net.connect(PortRef::new(m, mac::LOWER_OUT), PortRef::new(snk, sink::IN))?;

    info!(datarate = %spec.datarate(), packets = spec.packets, "构建 MAC 线路");
    Ok(MacLine {
        source: src,
        queue: q,
        stage,
        mac: m,
        sink: snk,
    })
}
