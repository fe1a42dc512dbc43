use super::{preempting_line, received};
use crate::elements::{
    AbortReception, ActivePacketSource, PacketDestreamer, PacketSink, PreemptableStreamer,
    PreemptingServer, QueueElement, destreamer, queue, sink, source, streamer,
};
use crate::flow::{
    Datarate, ElementId, FlowError, FlowEventKind, FlowLog, FlowNet, FlowWorld, PortRef,
    ProtocolError, StreamProgress,
};
use crate::sim::{SimTime, Simulator};
use crate::topo::LineSpec;

/// 单个 packet，sink 在 [pause, resume) 微秒内暂停接收
fn paused(pause: u64, resume: u64) -> LineSpec {
    LineSpec {
        packets: 1,
        pause_at_ns: Some(SimTime::from_micros(pause).0),
        resume_at_ns: Some(SimTime::from_micros(resume).0),
        ..LineSpec::default()
    }
}

#[test]
fn short_preemption_is_rounded_up_to_minimum_fragment() {
    let spec = paused(20, 50);
    let (mut sim, mut world, line) = preempting_line(&spec);
    sim.run(&mut world);

    let got: Vec<_> = received(&world, line.sink)
        .iter()
        .map(|r| (r.name.as_str(), r.info.length_bits, r.at.0))
        .collect();
    assert_eq!(
        got,
        [("source-0-frag0", 64, 50_000), ("source-0-frag1", 936, 986_000)]
    );

    let log = world.net.log.as_ref().expect("log");
    assert_eq!(
        log.count(|e| matches!(
            e.kind,
            FlowEventKind::Fragmented {
                sent_bits: 64,
                remaining_bits: 936
            }
        )),
        1
    );
    let st = world
        .net
        .element::<PreemptableStreamer>(line.streamer)
        .expect("streamer");
    assert_eq!(st.num_fragmented, 1);
    assert!(st.remaining_packet().is_none());
    assert!(!st.is_streaming());
}

#[test]
fn preemption_near_the_end_keeps_the_packet_whole() {
    // 剩余部分不足最小分片长度时不拆分
    let spec = paused(960, 970);
    let (mut sim, mut world, line) = preempting_line(&spec);
    sim.run(&mut world);

    let rx = received(&world, line.sink);
    assert_eq!(rx.len(), 1);
    assert_eq!(rx[0].name, "source-0");
    assert_eq!(rx[0].info.length_bits, 1000);
    assert_eq!(rx[0].at, SimTime::from_micros(970));
    assert!(rx[0].complete);

    let st = world
        .net
        .element::<PreemptableStreamer>(line.streamer)
        .expect("streamer");
    assert_eq!(st.num_fragmented, 0);
    let srv = world
        .net
        .element::<PreemptingServer>(line.server)
        .expect("server");
    assert_eq!(srv.stats.preempted, 1);
    assert_eq!(srv.stats.started, 1);
    assert_eq!(srv.stats.completed, 0);
}

#[test]
fn repeated_preemption_numbers_fragments_in_order() {
    use crate::elements::SetSinkAvailable;

    let spec = paused(400, 500);
    let (mut sim, mut world, line) = preempting_line(&spec);
    // 第二次暂停
    for (at_us, available) in [(700, false), (800, true)] {
        sim.schedule(
            SimTime::from_micros(at_us),
            SetSinkAvailable {
                sink: line.sink,
                available,
            },
        );
    }
    sim.run(&mut world);

    let got: Vec<_> = received(&world, line.sink)
        .iter()
        .map(|r| (r.name.as_str(), r.info.length_bits, r.complete, r.at.0))
        .collect();
    assert_eq!(
        got,
        [
            ("source-0-frag0", 400, false, 500_000),
            ("source-0-frag1", 200, false, 800_000),
            ("source-0-frag2", 400, true, 1_200_000),
        ]
    );
    let st = world
        .net
        .element::<PreemptableStreamer>(line.streamer)
        .expect("streamer");
    assert_eq!(st.num_fragmented, 2);
    assert_eq!(st.num_processed, 3);
    assert_eq!(st.processed_bits, 1000);
}

/// source -> streamer（push 方向）-> sink；`rate` 为 None 时 start 之后立即 end
fn push_streamer(packets: u64, rate: Option<Datarate>) -> (Simulator, FlowWorld, ElementId, ElementId) {
    let mut sim = Simulator::default();
    let mut world = FlowWorld::default();
    world.net.log = Some(FlowLog::default());
    let net = &mut world.net;
    let src = net.add(ActivePacketSource::new("source", 1000, packets, SimTime::ZERO));
    let st = PreemptableStreamer::new("streamer", 64, 8);
    let st = net.add(match rate {
        Some(r) => st.with_datarate(r),
        None => st,
    });
    let snk = net.add(PacketSink::new("sink"));
    net.connect(PortRef::new(src, source::OUT), PortRef::new(st, streamer::IN))
        .expect("source -> streamer");
    net.connect(PortRef::new(st, streamer::OUT), PortRef::new(snk, sink::IN))
        .expect("streamer -> sink");
    net.initialize(&mut sim).expect("initialize");
    (sim, world, st, snk)
}

#[test]
fn push_mode_streams_each_packet_for_its_transmission_time() {
    let (mut sim, mut world, st, snk) = push_streamer(2, Some(Datarate::mbps(1)));
    sim.run(&mut world);

    assert!(world.net.fault().is_none(), "{:?}", world.net.fault());
    let got: Vec<_> = received(&world, snk)
        .iter()
        .map(|r| (r.name.as_str(), r.at.0, r.streamed))
        .collect();
    assert_eq!(got, [("source-0", 1_000_000, true), ("source-1", 2_000_000, true)]);
    let s = world.net.element::<PreemptableStreamer>(st).expect("streamer");
    assert_eq!(s.num_processed, 2);
    assert!(!s.is_streaming());
    assert_eq!(sim.pending(), 0);
}

#[test]
fn push_mode_without_datarate_ends_the_stream_immediately() {
    let (mut sim, mut world, _st, snk) = push_streamer(2, None);
    sim.run(&mut world);

    assert!(world.net.fault().is_none(), "{:?}", world.net.fault());
    let at: Vec<_> = received(&world, snk).iter().map(|r| r.at.0).collect();
    assert_eq!(at, [0, 0]);
    assert_eq!(world.net.open_sessions(), 0);
}

#[test]
fn push_mode_downstream_abort_cancels_the_stream_and_resumes_the_source() {
    let (mut sim, mut world, st, snk) = push_streamer(2, Some(Datarate::mbps(1)));
    sim.schedule(SimTime::from_micros(400), AbortReception { sink: snk });
    sim.run(&mut world);

    assert!(world.net.fault().is_none(), "{:?}", world.net.fault());
    let sink_state = world.net.element::<PacketSink>(snk).expect("sink");
    assert_eq!(sink_state.aborted, 1);
    let got: Vec<_> = sink_state
        .received
        .iter()
        .map(|r| (r.name.as_str(), r.at.0))
        .collect();
    // 第二个 packet 在中止时立即开始
    assert_eq!(got, [("source-1", 1_400_000)]);

    let s = world.net.element::<PreemptableStreamer>(st).expect("streamer");
    assert_eq!(s.num_processed, 1);
    assert!(!s.is_streaming());
    assert_eq!(sim.now(), SimTime(1_400_000));
    assert_eq!(sim.pending(), 0);
}

/// queue -> streamer -> destreamer，队列里预先放好 `packets` 个 1000 bit 的 packet
fn pull_chain(packets: u64, destreamer_rate: Option<Datarate>) -> (Simulator, FlowNet, ElementId, ElementId) {
    let mut sim = Simulator::default();
    let mut net = FlowNet::default();
    let q = net.add(QueueElement::new("queue", 100_000));
    let st = net.add(PreemptableStreamer::new("streamer", 64, 8));
    let ds = PacketDestreamer::new("destreamer");
    let ds = net.add(match destreamer_rate {
        Some(r) => ds.with_datarate(r),
        None => ds,
    });
    net.connect(PortRef::new(q, queue::OUT), PortRef::new(st, streamer::IN))
        .expect("queue -> streamer");
    net.connect(PortRef::new(st, streamer::OUT), PortRef::new(ds, destreamer::IN))
        .expect("streamer -> destreamer");
    net.initialize(&mut sim).expect("initialize");
    for i in 0..packets {
        let pkt = net.make_packet(format!("p{i}"), 1000);
        net.push_packet(PortRef::new(q, queue::IN), pkt, &mut sim)
            .expect("enqueue");
    }
    (sim, net, st, ds)
}

#[test]
fn pull_progress_reaching_the_end_finishes_the_stream() {
    let (mut sim, mut net, st, _ds) = pull_chain(2, None);
    let out = PortRef::new(st, streamer::OUT);
    let rate = Datarate::mbps(1);

    let first = net.pull_packet_start(out, rate, &mut sim).expect("start");
    assert_eq!(first.name, "p0");
    net.pull_packet_progress(out, rate, StreamProgress::new(0, 400), &mut sim)
        .expect("progress");
    assert!(net.session_open(out));

    let last = net
        .pull_packet_progress(out, rate, StreamProgress::new(400, 600), &mut sim)
        .expect("final progress");
    assert_eq!(last.length_bits, 1000);
    assert!(last.is_complete());
    assert!(!net.session_open(out));

    let s = net.element::<PreemptableStreamer>(st).expect("streamer");
    assert!(!s.is_streaming());
    assert_eq!(s.num_processed, 1);
    assert_eq!(s.num_fragmented, 0);
    assert!(net.can_pull_some_packet(out).expect("can pull"));

    assert_eq!(
        net.pull_packet_end(out, &mut sim).expect_err("already finished"),
        FlowError::Protocol(ProtocolError::NoSession {
            port: "streamer.out".into()
        })
    );
    let next = net.pull_packet_start(out, rate, &mut sim).expect("next start");
    assert_eq!(next.name, "p1");
}

#[test]
fn atomic_pull_through_destreamer_returns_the_whole_packet() {
    let (mut sim, mut net, st, ds) = pull_chain(1, None);
    let pkt = net
        .pull_packet(PortRef::new(ds, destreamer::OUT), &mut sim)
        .expect("pull");
    assert_eq!(pkt.name, "p0");
    assert_eq!(pkt.length_bits, 1000);
    assert!(pkt.is_complete());
    assert_eq!(net.open_sessions(), 0);

    let s = net.element::<PreemptableStreamer>(st).expect("streamer");
    assert_eq!(s.num_fragmented, 0);
    assert!(s.remaining_packet().is_none());
    let d = net.element::<PacketDestreamer>(ds).expect("destreamer");
    assert_eq!(d.num_processed, 1);
    assert_eq!(d.processed_bits, 1000);
}

#[test]
fn atomic_pull_with_datarate_cuts_a_minimum_fragment() {
    // start 和 end 之间没有时间流逝：按速率只传出了 0 bit，向上取到最小分片
    let (mut sim, mut net, st, ds) = pull_chain(1, Some(Datarate::mbps(1)));
    let pkt = net
        .pull_packet(PortRef::new(ds, destreamer::OUT), &mut sim)
        .expect("pull");
    assert_eq!(pkt.name, "p0-frag0");
    assert_eq!(pkt.length_bits, 64);
    assert!(!pkt.is_complete());

    let rest = net
        .element::<PreemptableStreamer>(st)
        .and_then(PreemptableStreamer::remaining_packet)
        .expect("remaining fragment");
    assert_eq!(rest.length_bits, 936);
    assert_eq!(net.open_sessions(), 0);
}
