//! Packet push/pull 协议
//!
//! 此模块包含端口能力、流会话、通知队列、元件 trait 和持有元件的 `FlowNet`。

mod capability;
mod datarate;
mod dispatch;
mod element;
mod error;
mod id;
mod log;
mod net;
mod notify;
mod session;
mod topology;
mod world;

pub use capability::{Capabilities, Capability, Direction, GateSpec, link_is_compatible};
pub use datarate::Datarate;
pub use element::Element;
pub(crate) use element::unsupported;
pub use error::{ConfigError, FlowError, FlowResult, ProtocolError};
pub use id::{ElementId, PortRef};
pub use log::{DropReason, FlowEvent, FlowEventKind, FlowLog, LifecycleOp, PreemptCause};
pub use net::FlowNet;
pub use notify::{Notification, NotificationQueue};
pub use session::{SessionTable, StreamProgress, StreamSession, is_packet_end};
pub use world::{DeliverPacket, ElementTimer, FlowWorld, LifecycleEvent};
pub(crate) use world::{abort_run, flow_net};
