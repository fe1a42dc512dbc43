use crate::sim::{Event, SimTime, Simulator, World};
use std::any::Any;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CountingWorld {
    ticks: usize,
}

impl World for CountingWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_tick(&mut self, _sim: &mut Simulator) {
        self.ticks = self.ticks.saturating_add(1);
    }
}

type Log = Arc<Mutex<Vec<u32>>>;

struct Mark {
    id: u32,
    log: Log,
}

impl Event for Mark {
    fn execute(self: Box<Self>, _sim: &mut Simulator, _world: &mut dyn World) {
        self.log.lock().expect("log lock").push(self.id);
    }
}

/// 执行时停止仿真
struct Halt {
    log: Log,
}

impl Event for Halt {
    fn execute(self: Box<Self>, sim: &mut Simulator, _world: &mut dyn World) {
        self.log.lock().expect("log lock").push(0);
        sim.stop();
    }
}

fn mark(id: u32, log: &Log) -> Mark {
    Mark {
        id,
        log: Arc::clone(log),
    }
}

#[test]
fn events_run_in_time_then_schedule_order() {
    let log = Log::default();
    let mut sim = Simulator::default();
    sim.schedule(SimTime(10), mark(1, &log));
    sim.schedule(SimTime(5), mark(2, &log));
    sim.schedule(SimTime(10), mark(3, &log));

    let mut world = CountingWorld::default();
    sim.run(&mut world);

    assert_eq!(&*log.lock().expect("log lock"), &[2, 1, 3]);
    assert_eq!(world.ticks, 3);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn run_until_stops_at_deadline_and_advances_time() {
    let log = Log::default();
    let mut sim = Simulator::default();
    sim.schedule(SimTime(5), mark(1, &log));
    sim.schedule(SimTime(10), mark(2, &log));

    let mut world = CountingWorld::default();
    sim.run_until(SimTime(5), &mut world);
    assert_eq!(&*log.lock().expect("log lock"), &[1]);
    assert_eq!(sim.now(), SimTime(5));

    sim.run_until(SimTime(7), &mut world);
    assert_eq!(sim.now(), SimTime(7));
    assert_eq!(sim.pending(), 1);

    sim.run(&mut world);
    assert_eq!(&*log.lock().expect("log lock"), &[1, 2]);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn cancelled_events_are_skipped_and_not_ticked() {
    let log = Log::default();
    let mut sim = Simulator::default();
    let a = sim.schedule(SimTime(1), mark(1, &log));
    let b = sim.schedule_after(SimTime(2), mark(2, &log));
    assert!(sim.is_pending(a));
    assert_eq!(sim.pending(), 2);

    assert!(sim.cancel(a));
    assert!(!sim.cancel(a));
    assert!(!sim.is_pending(a));
    assert_eq!(sim.pending(), 1);

    let mut world = CountingWorld::default();
    sim.run(&mut world);
    assert_eq!(&*log.lock().expect("log lock"), &[2]);
    assert_eq!(world.ticks, 1);
    assert!(!sim.is_pending(b));
    assert!(!sim.cancel(b));
    assert_eq!(sim.pending(), 0);
}

#[test]
fn stop_halts_after_current_event() {
    let log = Log::default();
    let mut sim = Simulator::default();
    sim.schedule(
        SimTime(1),
        Halt {
            log: Arc::clone(&log),
        },
    );
    sim.schedule(SimTime(2), mark(2, &log));

    let mut world = CountingWorld::default();
    sim.run_until(SimTime(100), &mut world);

    assert!(sim.is_stopped());
    assert_eq!(&*log.lock().expect("log lock"), &[0]);
    // 被终止时不推进到 until
    assert_eq!(sim.now(), SimTime(1));
    assert_eq!(sim.pending(), 1);
}
