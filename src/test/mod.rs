mod flow_log;
mod flow_stage;
mod sessions;
mod sim_time;
mod simulator;
mod streamer;

use crate::elements::{PacketSink, ReceivedPacket};
use crate::flow::{ElementId, FlowEventKind, FlowLog, FlowWorld};
use crate::sim::Simulator;
use crate::topo::{LineSpec, MacLine, PreemptingLine, build_mac_line, build_preempting_line};

/// 构建并初始化可抢占流水线，开启事件记录并调度场景事件
fn preempting_line(spec: &LineSpec) -> (Simulator, FlowWorld, PreemptingLine) {
    let mut sim = Simulator::default();
    let mut world = FlowWorld::default();
    world.net.log = Some(FlowLog::default());
    let line = build_preempting_line(&mut world, spec).expect("build line");
    world.net.initialize(&mut sim).expect("initialize");
    line.schedule_scenario(&mut sim, spec);
    (sim, world, line)
}

fn mac_line(spec: &LineSpec) -> (Simulator, FlowWorld, MacLine) {
    let mut sim = Simulator::default();
    let mut world = FlowWorld::default();
    world.net.log = Some(FlowLog::default());
    let line = build_mac_line(&mut world, spec).expect("build line");
    world.net.initialize(&mut sim).expect("initialize");
    (sim, world, line)
}

fn received(world: &FlowWorld, sink: ElementId) -> &[ReceivedPacket] {
    &world.net.element::<PacketSink>(sink).expect("sink").received
}

/// 某个元件某类事件的时间戳（纳秒）
fn event_times(world: &FlowWorld, element: &str, pred: impl Fn(&FlowEventKind) -> bool) -> Vec<u64> {
    world
        .net
        .log
        .as_ref()
        .expect("log enabled")
        .of(element)
        .filter(|e| pred(&e.kind))
        .map(|e| e.t_ns)
        .collect()
}
