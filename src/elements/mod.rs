//! 元件
//!
//! 实现 [`Element`](crate::flow::Element) 的具体元件：透传处理、可抢占服务器、流化/去流化、
//! 队列、数据源、接收端和 MAC 队列持有者。

pub mod destreamer;
pub mod flow_stage;
pub mod mac;
pub mod preempting_server;
pub mod queue;
pub mod sink;
pub mod source;
pub mod streamer;

pub use destreamer::PacketDestreamer;
pub use flow_stage::{HeaderInserter, PacketFlow, PacketProcessor};
pub use mac::{InterfaceState, MacQueueOwner, MacStats};
pub use preempting_server::{PreemptingServer, ServerStats};
pub use queue::QueueElement;
pub use sink::{AbortReception, PacketSink, ReceivedPacket, SetSinkAvailable};
pub use source::ActivePacketSource;
pub use streamer::PreemptableStreamer;
