use crate::sim::SimTime;

#[test]
fn sim_time_unit_conversions() {
    assert_eq!(SimTime::from_micros(1), SimTime(1_000));
    assert_eq!(SimTime::from_millis(1), SimTime(1_000_000));
    assert_eq!(SimTime::from_secs(1), SimTime(1_000_000_000));
}

#[test]
fn sim_time_unit_conversions_saturate_on_overflow() {
    assert_eq!(SimTime::from_micros(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_millis(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_secs(u64::MAX), SimTime(u64::MAX));
}

#[test]
fn sim_time_since_clamps_to_zero() {
    assert_eq!(SimTime(10).since(SimTime(4)), SimTime(6));
    assert_eq!(SimTime(4).since(SimTime(10)), SimTime::ZERO);
    assert_eq!(SimTime(u64::MAX).saturating_add(SimTime(1)), SimTime(u64::MAX));
}

#[test]
fn datarate_tx_time_rounds_up_and_bits_in_rounds_down() {
    use crate::flow::Datarate;

    let rate = Datarate::mbps(1);
    assert_eq!(rate.tx_time(1000), SimTime::from_millis(1));
    // 1 bit @ 3 bit/s: 333_333_333.33ns -> 向上取整
    assert_eq!(Datarate::bps(3).tx_time(1), SimTime(333_333_334));
    assert_eq!(rate.bits_in(SimTime::from_micros(400)), 400);
    assert_eq!(Datarate::bps(3).bits_in(SimTime(333_333_333)), 0);
    assert_eq!(Datarate::gbps(10).to_string(), "10000000000bps");
}
