use std::path::Path;

use crate::flow::{DropReason, FlowEvent, FlowEventKind, FlowLog, PreemptCause};
use crate::packet::PacketInfo;
use crate::topo::{LineSpec, SpecError};

#[test]
fn flow_events_serialize_with_flat_snake_case_kind() {
    let ev = FlowEvent {
        t_ns: 400_000,
        element: "server".into(),
        pkt: Some(PacketInfo {
            id: 3,
            tree_id: 1,
            transmission_id: 1,
            length_bits: 1000,
        }),
        kind: FlowEventKind::Preempted {
            sent_bits: 400,
            cause: PreemptCause::ConsumerCapacity,
        },
    };
    let v = serde_json::to_value(&ev).expect("serialize");
    assert_eq!(v["kind"], "preempted");
    assert_eq!(v["cause"], "consumer_capacity");
    assert_eq!(v["sent_bits"], 400);
    assert_eq!(v["pkt"]["tree_id"], 1);

    let back: FlowEvent = serde_json::from_value(v).expect("deserialize");
    assert_eq!(back, ev);
}

#[test]
fn unit_kinds_serialize_as_tag_only() {
    let ev = FlowEvent {
        t_ns: 0,
        element: "mac".into(),
        pkt: None,
        kind: FlowEventKind::TxEnd,
    };
    let json = serde_json::to_string(&ev).expect("serialize");
    assert_eq!(json, r#"{"t_ns":0,"element":"mac","pkt":null,"kind":"tx_end"}"#);
}

#[test]
fn flow_log_filters_by_element_and_drop_reason() {
    let mut log = FlowLog::default();
    for (element, reason) in [
        ("queue", DropReason::QueueOverflow),
        ("mac", DropReason::InterfaceDown),
        ("mac", DropReason::InterfaceDown),
    ] {
        log.push(FlowEvent {
            t_ns: 1,
            element: element.into(),
            pkt: None,
            kind: FlowEventKind::Dropped { reason },
        });
    }
    log.push(FlowEvent {
        t_ns: 2,
        element: "mac".into(),
        pkt: None,
        kind: FlowEventKind::TxEnd,
    });

    assert_eq!(log.of("mac").count(), 3);
    assert_eq!(log.drops(None), 3);
    assert_eq!(log.drops(Some(DropReason::InterfaceDown)), 2);
    assert_eq!(log.drops(Some(DropReason::Crash)), 0);
}

#[test]
fn line_spec_fills_missing_fields_with_defaults() {
    let spec: LineSpec = serde_json::from_str(r#"{"packets": 3, "pause_at_ns": 1000}"#).expect("parse");
    assert_eq!(spec.packets, 3);
    assert_eq!(spec.pause_at_ns, Some(1000));
    assert_eq!(spec.datarate_bps, LineSpec::default().datarate_bps);
    assert!(spec.destream);
    assert_eq!(spec.resume_at_ns, None);
}

#[test]
fn line_spec_from_missing_file_is_an_io_error() {
    let err = LineSpec::from_path(Path::new("/nonexistent/flowsim/line.json")).expect_err("missing");
    assert!(matches!(err, SpecError::Io { .. }));
}
