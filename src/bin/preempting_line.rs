//! 可抢占流水线仿真
//!
//! source -> queue -> streamer -> server -> stage -> destreamer -> sink，
//! 可以在指定时刻暂停/恢复 sink 以触发抢占。

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use flowsim_rs::elements::{PacketSink, PreemptableStreamer, PreemptingServer};
use flowsim_rs::flow::{FlowLog, FlowWorld};
use flowsim_rs::sim::{SimTime, Simulator};
use flowsim_rs::topo::{LineSpec, build_preempting_line};

#[derive(Debug, Parser)]
#[command(
    name = "preempting-line",
    about = "可抢占流水线仿真：server 以固定速率流式发送，下游失去容量时抢占"
)]
struct Args {
    /// LineSpec JSON 文件（命令行参数覆盖其中的字段）
    #[arg(long)]
    spec: Option<PathBuf>,
    #[arg(long)]
    datarate_bps: Option<u64>,
    #[arg(long)]
    packet_bits: Option<u64>,
    #[arg(long)]
    packets: Option<u64>,
    /// sink 暂停接收的时刻（微秒）
    #[arg(long)]
    pause_at_us: Option<u64>,
    /// sink 恢复接收的时刻（微秒）
    #[arg(long)]
    resume_at_us: Option<u64>,
    /// sink 中止当前接收的时刻（微秒），需要配合 --no-destream
    #[arg(long)]
    abort_at_us: Option<u64>,
    /// 不经过 destreamer，stage 直接把流交给 sink
    #[arg(long, default_value_t = false)]
    no_destream: bool,
    /// 仿真运行到多少毫秒
    #[arg(long, default_value_t = 1000)]
    until_ms: u64,
    /// 输出流事件 JSON
    #[arg(long)]
    log_json: Option<PathBuf>,
    /// 输出 sink 收到的 packet 列表 JSON
    #[arg(long)]
    received_json: Option<PathBuf>,
}

fn main() {
    // 初始化 tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut spec = match &args.spec {
        Some(path) => LineSpec::from_path(path).unwrap_or_else(|e| {
            eprintln!("{e}");
            std::process::exit(2);
        }),
        None => LineSpec::default(),
    };
    if let Some(v) = args.datarate_bps {
        spec.datarate_bps = v;
    }
    if let Some(v) = args.packet_bits {
        spec.packet_bits = v;
    }
    if let Some(v) = args.packets {
        spec.packets = v;
    }
    let us_to_ns = |us: u64| SimTime::from_micros(us).0;
    if let Some(v) = args.pause_at_us {
        spec.pause_at_ns = Some(us_to_ns(v));
    }
    if let Some(v) = args.resume_at_us {
        spec.resume_at_ns = Some(us_to_ns(v));
    }
    if let Some(v) = args.abort_at_us {
        spec.abort_at_ns = Some(us_to_ns(v));
    }
    if args.no_destream {
        spec.destream = false;
    }

    let mut sim = Simulator::default();
    let mut world = FlowWorld::default();
    world.net.log = Some(FlowLog::default());

    let line = build_preempting_line(&mut world, &spec)
        .and_then(|line| world.net.initialize(&mut sim).map(|_| line))
        .unwrap_or_else(|e| {
            eprintln!("setup failed: {e}");
            std::process::exit(2);
        });
    line.schedule_scenario(&mut sim, &spec);

    sim.run_until(SimTime::from_millis(args.until_ms), &mut world);

    let net = &world.net;
    let (received, complete) = net
        .element::<PacketSink>(line.sink)
        .map(|s| (s.received.len(), s.received.iter().filter(|r| r.complete).count()))
        .unwrap_or_default();
    let stats = net
        .element::<PreemptingServer>(line.server)
        .map(|s| s.stats)
        .unwrap_or_default();
    let fragmented = net
        .element::<PreemptableStreamer>(line.streamer)
        .map(|s| s.num_fragmented)
        .unwrap_or_default();

    println!(
        "done @ {:?}, received={}, complete={}, started={}, preempted={}, truncated={}, fragmented={}",
        sim.now(),
        received,
        complete,
        stats.started,
        stats.preempted,
        stats.truncated,
        fragmented
    );

    if let Some(path) = args.log_json {
        if let Some(log) = &world.net.log {
            let json = serde_json::to_string_pretty(&log.events).expect("serialize flow events");
            fs::write(&path, json).expect("write flow log json");
            eprintln!("wrote flow events to {}", path.display());
        }
    }
    if let Some(path) = args.received_json {
        if let Some(s) = world.net.element::<PacketSink>(line.sink) {
            let json = serde_json::to_string_pretty(&s.received).expect("serialize received packets");
            fs::write(&path, json).expect("write received json");
            eprintln!("wrote received packets to {}", path.display());
        }
    }

    if let Some(err) = world.net.fault() {
        eprintln!("simulation aborted: {err}");
        std::process::exit(1);
    }
}
