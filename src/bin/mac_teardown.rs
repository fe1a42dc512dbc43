//! MAC 队列持有者关闭/崩溃仿真
//!
//! source -> queue -> stage -> mac -> sink，在指定时刻对 mac 执行 stop 或 crash，
//! 可选地再在之后重新启用。

use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use flowsim_rs::elements::{MacQueueOwner, PacketSink};
use flowsim_rs::flow::{FlowLog, FlowWorld, LifecycleEvent, LifecycleOp};
use flowsim_rs::sim::{SimTime, Simulator};
use flowsim_rs::topo::{LineSpec, build_mac_line};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Teardown {
    Stop,
    Crash,
}

#[derive(Debug, Parser)]
#[command(name = "mac-teardown", about = "MAC 队列持有者仿真：发送途中关闭或崩溃")]
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
    #[arg(long, value_enum, default_value_t = Teardown::Stop)]
    op: Teardown,
    /// 执行关闭/崩溃的时刻（微秒）
    #[arg(long, default_value_t = 1500)]
    at_us: u64,
    /// 重新启用的时刻（微秒）
    #[arg(long)]
    restart_at_us: Option<u64>,
    /// 仿真运行到多少毫秒
    #[arg(long, default_value_t = 1000)]
    until_ms: u64,
    /// 输出流事件 JSON
    #[arg(long)]
    log_json: Option<PathBuf>,
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

    let mut sim = Simulator::default();
    let mut world = FlowWorld::default();
    world.net.log = Some(FlowLog::default());

    let line = build_mac_line(&mut world, &spec)
        .and_then(|line| world.net.initialize(&mut sim).map(|_| line))
        .unwrap_or_else(|e| {
            eprintln!("setup failed: {e}");
            std::process::exit(2);
        });

    let op = match args.op {
        Teardown::Stop => LifecycleOp::Stop,
        Teardown::Crash => LifecycleOp::Crash,
    };
    sim.schedule(
        SimTime::from_micros(args.at_us),
        LifecycleEvent {
            element: line.mac,
            op,
        },
    );
    if let Some(t) = args.restart_at_us {
        sim.schedule(
            SimTime::from_micros(t),
            LifecycleEvent {
                element: line.mac,
                op: LifecycleOp::Start,
            },
        );
    }

    sim.run_until(SimTime::from_millis(args.until_ms), &mut world);

    let net = &world.net;
    let stats = net
        .element::<MacQueueOwner>(line.mac)
        .map(|m| m.stats)
        .unwrap_or_default();
    let received = net
        .element::<PacketSink>(line.sink)
        .map(|s| s.received.len())
        .unwrap_or_default();
    let queue_len = net.queue(line.queue).map(|q| q.len()).unwrap_or_default();

    println!(
        "done @ {:?}, sent={}, received={}, dropped_down={}, cleared_on_crash={}, queue_len={}",
        sim.now(),
        stats.sent,
        received,
        stats.dropped_down,
        stats.cleared_on_crash,
        queue_len
    );

    if let Some(path) = args.log_json {
        if let Some(log) = &world.net.log {
            let json = serde_json::to_string_pretty(&log.events).expect("serialize flow events");
            fs::write(&path, json).expect("write flow log json");
            eprintln!("wrote flow events to {}", path.display());
        }
    }

    if let Some(err) = world.net.fault() {
        eprintln!("simulation aborted: {err}");
        std::process::exit(1);
    }
}
