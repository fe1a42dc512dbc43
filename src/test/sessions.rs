use crate::flow::{
    Datarate, ElementId, FlowError, Notification, NotificationQueue, PortRef, ProtocolError,
    SessionTable, StreamProgress, is_packet_end,
};
use crate::packet::PacketInfo;

fn port(e: usize, g: usize) -> PortRef {
    PortRef::new(ElementId(e), g)
}

#[test]
fn only_one_session_per_port() {
    let mut t = SessionTable::default();
    let p = port(1, 0);
    t.open(p, "x.in", 7, 1000, Some(Datarate::mbps(1))).expect("open");
    assert!(t.is_open(p));

    let err = t.open(p, "x.in", 8, 1000, None).expect_err("second stream");
    assert_eq!(
        err,
        FlowError::Protocol(ProtocolError::SessionAlreadyOpen {
            port: "x.in".into(),
            open: 7,
            attempted: Some(8),
        })
    );

    // 同一个 tree id 重新打开视为重新开始
    t.open(p, "x.in", 7, 1000, None).expect("restart");
    assert_eq!(t.len(), 1);

    // 其他端口不受影响
    t.open(port(2, 0), "y.in", 8, 10, None).expect("other port");
    assert_eq!(t.len(), 2);
}

#[test]
fn atomic_transfer_rejected_while_stream_open() {
    let mut t = SessionTable::default();
    let p = port(1, 0);
    t.check_atomic(p, "x.in").expect("no session");
    t.open(p, "x.in", 3, 100, None).expect("open");
    assert!(matches!(
        t.check_atomic(p, "x.in"),
        Err(FlowError::Protocol(ProtocolError::AtomicDuringStream { open: 3, .. }))
    ));
}

#[test]
fn progress_reaching_length_closes_session_exactly_once() {
    let mut t = SessionTable::default();
    let p = port(1, 0);
    let rate = Datarate::mbps(1);
    t.open(p, "x.in", 5, 1000, Some(rate)).expect("open");

    let done = t
        .advance(p, "x.in", 5, rate, StreamProgress::new(400, 0))
        .expect("advance");
    assert!(!done);
    assert_eq!(t.get(p).expect("open").position_bits, 400);

    let done = t
        .advance(p, "x.in", 5, rate, StreamProgress::new(900, 100))
        .expect("advance");
    assert!(done);
    assert!(!t.is_open(p));

    // 已完成的流再推进或结束都是错误
    assert!(matches!(
        t.advance(p, "x.in", 5, rate, StreamProgress::new(1000, 0)),
        Err(FlowError::Protocol(ProtocolError::NoSession { .. }))
    ));
    assert!(matches!(
        t.close(p, "x.in", 5),
        Err(FlowError::Protocol(ProtocolError::NoSession { .. }))
    ));
}

#[test]
fn end_with_wrong_tree_id_is_a_mismatch() {
    let mut t = SessionTable::default();
    let p = port(1, 0);
    t.open(p, "x.in", 5, 1000, None).expect("open");
    assert_eq!(
        t.close(p, "x.in", 6),
        Err(FlowError::Protocol(ProtocolError::StreamMismatch {
            port: "x.in".into(),
            open: 5,
            got: 6,
        }))
    );
    assert!(t.is_open(p));
    let closed = t.close(p, "x.in", 5).expect("close");
    assert_eq!(closed.length_bits, 1000);
    assert!(t.is_empty());
}

#[test]
fn close_matching_only_closes_same_tree() {
    let mut t = SessionTable::default();
    let p = port(1, 0);
    t.open(p, "x.in", 5, 1000, None).expect("open");
    assert!(!t.close_matching(p, 6));
    assert!(t.is_open(p));
    assert!(t.close_matching(p, 5));
    assert!(!t.close_matching(p, 5));
    assert!(t.require_open(p, "x.in").is_err());
}

#[test]
fn packet_end_detection() {
    assert!(is_packet_end(1000, 1000, 0));
    assert!(is_packet_end(1000, 900, 100));
    assert!(!is_packet_end(1000, 900, 99));
    assert!(is_packet_end(0, 0, 0));
    assert!(is_packet_end(10, u64::MAX, u64::MAX));
}

#[test]
fn duplicate_capacity_notifications_are_coalesced() {
    let mut q = NotificationQueue::default();
    let a = port(1, 1);
    let b = port(2, 0);
    assert!(q.push(Notification::CanPushChanged { to: a }));
    assert!(!q.push(Notification::CanPushChanged { to: a }));
    assert!(q.push(Notification::CanPullChanged { to: a }));
    assert!(q.push(Notification::CanPushChanged { to: b }));
    assert_eq!(q.len(), 3);
    assert_eq!(q.coalesced(), 1);

    // 完成通知从不合并
    let info = PacketInfo {
        id: 1,
        tree_id: 1,
        transmission_id: 1,
        length_bits: 8,
    };
    let done = Notification::PushProcessed {
        to: a,
        packet: info,
        successful: true,
    };
    assert!(q.push(done));
    assert!(q.push(done));
    assert_eq!(q.len(), 5);

    assert_eq!(q.pop(), Some(Notification::CanPushChanged { to: a }));
    assert_eq!(q.pop().map(|n| n.target()), Some(a));
    assert_eq!(q.pop().map(|n| n.target()), Some(b));

    // 出队之后同样的通知可以再次入队
    assert!(q.push(Notification::CanPushChanged { to: a }));
}
