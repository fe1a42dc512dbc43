use super::{preempting_line, received};
use crate::elements::{
    ActivePacketSource, HeaderInserter, PacketDestreamer, PacketFlow, PacketSink,
    PreemptableStreamer, QueueElement, destreamer, flow_stage, queue, sink, source, streamer,
};
use crate::flow::{
    Datarate, ElementId, FlowError, FlowNet, PortRef, ProtocolError, StreamProgress,
};
use crate::packet::Packet;
use crate::sim::{SimTime, Simulator};
use crate::topo::LineSpec;

type Stage = PacketFlow<HeaderInserter>;

/// source -> stage -> sink，不运行仿真，直接驱动端口操作
fn wired(header_bits: u64) -> (Simulator, FlowNet, ElementId, ElementId) {
    let mut sim = Simulator::default();
    let mut net = FlowNet::default();
    let src = net.add(ActivePacketSource::new("source", 8, 0, SimTime::ZERO));
    let stage = net.add(PacketFlow::new("stage", HeaderInserter { header_bits }));
    let snk = net.add(PacketSink::new("sink"));
    net.connect(PortRef::new(src, source::OUT), PortRef::new(stage, flow_stage::IN))
        .expect("src -> stage");
    net.connect(PortRef::new(stage, flow_stage::OUT), PortRef::new(snk, sink::IN))
        .expect("stage -> sink");
    net.initialize(&mut sim).expect("init");
    (sim, net, stage, snk)
}

#[test]
fn atomic_push_is_processed_and_forwarded() {
    let (mut sim, mut net, stage, snk) = wired(16);
    let pkt = net.make_packet("p", 100);
    net.push_packet(PortRef::new(stage, flow_stage::IN), pkt, &mut sim)
        .expect("push");

    let s = net.element::<Stage>(stage).expect("stage");
    assert_eq!(s.num_processed, 1);
    assert_eq!(s.processed_bits, 116);
    let rx = &net.element::<PacketSink>(snk).expect("sink").received;
    assert_eq!(rx.len(), 1);
    assert_eq!(rx[0].info.length_bits, 116);
}

#[test]
fn stream_completion_by_progress_fires_once() {
    let (mut sim, mut net, stage, snk) = wired(0);
    let input = PortRef::new(stage, flow_stage::IN);
    let rate = Datarate::mbps(1);
    let pkt = net.make_packet("s", 1000);
    let tree = pkt.tree_id;
    let copy = net.dup_packet(&pkt);
    net.push_packet_start(input, pkt, rate, &mut sim).expect("start");
    assert_eq!(net.element::<Stage>(stage).expect("stage").in_progress_stream(), Some(tree));
    assert!(net.session_open(input));
    assert!(net.session_open(PortRef::new(snk, sink::IN)));

    let mid = net.dup_packet(&copy);
    net.push_packet_progress(input, mid, rate, StreamProgress::new(500, 0), &mut sim)
        .expect("progress");
    assert_eq!(net.element::<Stage>(stage).expect("stage").num_processed, 0);

    let last = net.dup_packet(&copy);
    net.push_packet_progress(input, last, rate, StreamProgress::new(900, 100), &mut sim)
        .expect("final progress");

    let s = net.element::<Stage>(stage).expect("stage");
    assert_eq!(s.num_processed, 1);
    assert_eq!(s.in_progress_stream(), None);
    assert_eq!(net.open_sessions(), 0);
    let rx = &net.element::<PacketSink>(snk).expect("sink").received;
    assert_eq!(rx.len(), 1);
    assert!(rx[0].streamed);

    // 已经完成的流不能再结束一次
    assert!(matches!(
        net.push_packet_end(input, copy, &mut sim),
        Err(FlowError::Protocol(ProtocolError::NoSession { .. }))
    ));
    assert_eq!(net.element::<Stage>(stage).expect("stage").num_processed, 1);
}

#[test]
fn atomic_pull_rejected_while_a_stream_is_in_progress() {
    let (mut sim, mut net, stage, _snk) = wired(0);
    let pkt = net.make_packet("s", 1000);
    let tree = pkt.tree_id;
    net.push_packet_start(PortRef::new(stage, flow_stage::IN), pkt, Datarate::mbps(1), &mut sim)
        .expect("start");

    let err = net
        .pull_packet(PortRef::new(stage, flow_stage::OUT), &mut sim)
        .expect_err("stage is busy");
    assert_eq!(
        err,
        FlowError::Protocol(ProtocolError::AnotherStreamInProgress {
            element: "stage".into(),
            open: tree,
        })
    );
}

#[test]
fn atomic_push_during_open_stream_is_rejected_by_the_port() {
    let (mut sim, mut net, stage, _snk) = wired(0);
    let input = PortRef::new(stage, flow_stage::IN);
    let a = net.make_packet("a", 1000);
    net.push_packet_start(input, a, Datarate::mbps(1), &mut sim)
        .expect("start");

    let b: Packet = net.make_packet("b", 10);
    assert!(matches!(
        net.push_packet(input, b, &mut sim),
        Err(FlowError::Protocol(ProtocolError::AtomicDuringStream { .. }))
    ));
    let c = net.make_packet("c", 10);
    assert!(matches!(
        net.push_packet_start(input, c, Datarate::mbps(1), &mut sim),
        Err(FlowError::Protocol(ProtocolError::SessionAlreadyOpen { .. }))
    ));
}

#[test]
fn header_is_added_to_streamed_packets_in_the_line() {
    let spec = LineSpec {
        packets: 2,
        header_bits: 16,
        ..LineSpec::default()
    };
    let (mut sim, mut world, line) = preempting_line(&spec);
    sim.run(&mut world);

    let lens: Vec<_> = received(&world, line.sink)
        .iter()
        .map(|r| r.info.length_bits)
        .collect();
    assert_eq!(lens, [1016, 1016]);
    let s = world.net.element::<Stage>(line.stage).expect("stage");
    assert_eq!(s.num_processed, 2);
    assert_eq!(s.processed_bits, 2032);
}

/// queue -> streamer -> stage -> destreamer，队列里预先放两个 1000 bit 的 packet
fn pulled_through_streamer() -> (Simulator, FlowNet, ElementId, ElementId) {
    let mut sim = Simulator::default();
    let mut net = FlowNet::default();
    let q = net.add(QueueElement::new("queue", 100_000));
    let st = net.add(PreemptableStreamer::new("streamer", 64, 8));
    let stage = net.add(PacketFlow::new("stage", HeaderInserter { header_bits: 0 }));
    let ds = net.add(PacketDestreamer::new("destreamer"));
    net.connect(PortRef::new(q, queue::OUT), PortRef::new(st, streamer::IN))
        .expect("queue -> streamer");
    net.connect(PortRef::new(st, streamer::OUT), PortRef::new(stage, flow_stage::IN))
        .expect("streamer -> stage");
    net.connect(PortRef::new(stage, flow_stage::OUT), PortRef::new(ds, destreamer::IN))
        .expect("stage -> destreamer");
    net.initialize(&mut sim).expect("init");
    for name in ["p0", "p1"] {
        let pkt = net.make_packet(name, 1000);
        net.push_packet(PortRef::new(q, queue::IN), pkt, &mut sim)
            .expect("enqueue");
    }
    (sim, net, st, stage)
}

#[test]
fn pull_stream_completion_by_progress_fires_once() {
    let (mut sim, mut net, st, stage) = pulled_through_streamer();
    let out = PortRef::new(stage, flow_stage::OUT);
    let upstream = PortRef::new(st, streamer::OUT);
    let rate = Datarate::mbps(1);

    let first = net.pull_packet_start(out, rate, &mut sim).expect("start");
    assert_eq!(first.name, "p0");
    assert_eq!(
        net.element::<Stage>(stage).expect("stage").in_progress_stream(),
        Some(first.tree_id)
    );
    assert!(net.session_open(out));
    assert!(net.session_open(upstream));

    net.pull_packet_progress(out, rate, StreamProgress::new(0, 400), &mut sim)
        .expect("progress");
    assert_eq!(net.element::<Stage>(stage).expect("stage").num_processed, 0);

    let last = net
        .pull_packet_progress(out, rate, StreamProgress::new(400, 600), &mut sim)
        .expect("final progress");
    assert_eq!(last.length_bits, 1000);

    let s = net.element::<Stage>(stage).expect("stage");
    assert_eq!(s.num_processed, 1);
    assert_eq!(s.in_progress_stream(), None);
    assert!(!net.session_open(out));
    assert!(!net.session_open(upstream));
    let up = net.element::<PreemptableStreamer>(st).expect("streamer");
    assert!(!up.is_streaming());
    assert_eq!(up.num_processed, 1);
    assert_eq!(up.num_fragmented, 0);
    assert!(net.can_pull_some_packet(out).expect("can pull"));

    // 已经完成的流不能再结束一次
    assert_eq!(
        net.pull_packet_end(out, &mut sim).expect_err("already finished"),
        FlowError::Protocol(ProtocolError::NoSession {
            port: "stage.out".into()
        })
    );
    assert_eq!(net.element::<Stage>(stage).expect("stage").num_processed, 1);

    let next = net.pull_packet_start(out, rate, &mut sim).expect("next start");
    assert_eq!(next.name, "p1");
}

#[test]
fn pull_processed_notice_closes_the_stream_along_the_chain() {
    let (mut sim, mut net, st, stage) = pulled_through_streamer();
    let out = PortRef::new(stage, flow_stage::OUT);
    let pkt = net
        .pull_packet_start(out, Datarate::mbps(1), &mut sim)
        .expect("start");
    assert_eq!(net.open_sessions(), 2);

    // 上游 provider 宣布这个 packet 已处理完（例如被丢弃）
    net.notify_pull_processed(PortRef::new(stage, flow_stage::IN), pkt.info(), false);
    net.flush(&mut sim).expect("flush");

    assert_eq!(net.element::<Stage>(stage).expect("stage").in_progress_stream(), None);
    assert!(!net.session_open(PortRef::new(st, streamer::OUT)));
    assert!(!net.session_open(out));
    assert_eq!(net.open_sessions(), 0);
}
