use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "flowsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn summary_line(stdout: &str) -> String {
    stdout
        .lines()
        .find(|line| line.starts_with("done @"))
        .map(str::to_string)
        .expect("summary line")
}

fn read_json_array(path: &PathBuf) -> Vec<Value> {
    let raw = fs::read_to_string(path).expect("read json");
    let v: Value = serde_json::from_str(&raw).expect("parse json");
    v.as_array().expect("must be a JSON array").clone()
}

#[test]
fn preempting_line_delivers_fragments_after_pause() {
    let dir = unique_temp_dir("preempting-line-pause");
    let log_json = dir.join("log.json");
    let rx_json = dir.join("received.json");

    let output = Command::new(env!("CARGO_BIN_EXE_preempting_line"))
        .args([
            "--packets",
            "1",
            "--pause-at-us",
            "400",
            "--resume-at-us",
            "600",
            "--log-json",
            log_json.to_str().unwrap(),
            "--received-json",
            rx_json.to_str().unwrap(),
        ])
        .output()
        .expect("run preempting_line");
    assert!(
        output.status.success(),
        "preempting_line failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary = summary_line(&String::from_utf8_lossy(&output.stdout));
    assert!(summary.contains("received=2"), "{summary}");
    assert!(summary.contains("preempted=1"), "{summary}");
    assert!(summary.contains("fragmented=1"), "{summary}");

    let events = read_json_array(&log_json);
    let preempted: Vec<_> = events
        .iter()
        .filter(|e| e.get("kind").and_then(|k| k.as_str()) == Some("preempted"))
        .collect();
    assert_eq!(preempted.len(), 1);
    assert_eq!(preempted[0]["t_ns"], 400_000);
    assert_eq!(preempted[0]["cause"], "consumer_capacity");

    let received = read_json_array(&rx_json);
    let names: Vec<_> = received
        .iter()
        .filter_map(|r| r.get("name").and_then(|n| n.as_str()))
        .collect();
    assert_eq!(names, ["source-0-frag0", "source-0-frag1"]);
    assert_eq!(received[1]["complete"], true);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn preempting_line_reads_spec_file_and_cli_overrides_it() {
    let dir = unique_temp_dir("preempting-line-spec");
    let spec = write_file(
        &dir,
        "line.json",
        r#"
{
    "datarate_bps": 2000000,
    "packet_bits": 1000,
    "packets": 5,
    "header_bits": 24
}
        "#,
    );
    let rx_json = dir.join("received.json");

    let output = Command::new(env!("CARGO_BIN_EXE_preempting_line"))
        .args([
            "--spec",
            spec.to_str().unwrap(),
            "--packets",
            "2",
            "--received-json",
            rx_json.to_str().unwrap(),
        ])
        .output()
        .expect("run preempting_line");
    assert!(
        output.status.success(),
        "preempting_line failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let received = read_json_array(&rx_json);
    assert_eq!(received.len(), 2);
    // 2 Mbit/s 下 1000 bit 需要 0.5ms
    assert_eq!(received[0]["at"], 500_000);
    assert_eq!(received[1]["at"], 1_000_000);
    assert_eq!(received[0]["info"]["length_bits"], 1024);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn preempting_line_rejects_invalid_spec() {
    let dir = unique_temp_dir("preempting-line-bad-spec");
    let spec = write_file(&dir, "line.json", r#"{ "packets": "many" }"#);

    let output = Command::new(env!("CARGO_BIN_EXE_preempting_line"))
        .args(["--spec", spec.to_str().unwrap()])
        .output()
        .expect("run preempting_line");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid line spec"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn preempting_line_zero_datarate_fails_setup() {
    let output = Command::new(env!("CARGO_BIN_EXE_preempting_line"))
        .args(["--datarate-bps", "0"])
        .output()
        .expect("run preempting_line");
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("setup failed"));
}
