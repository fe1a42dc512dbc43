//! 离散事件内核
//!
//! 仿真时间、事件与世界接口，以及支持取消和终止的仿真器。

mod event;
mod simulator;
mod time;

pub use event::{Event, EventId, World};
pub use simulator::Simulator;
pub use time::SimTime;
