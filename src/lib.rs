/// KCP Tunnel 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod control_protocol;
pub mod error;
pub mod event_loop;
pub mod io_util;
pub mod mux;
pub mod protocol;
pub mod server;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod transport;

// 重新导出常用类型
pub use channel::ReliableChannel;
pub use config::{AppConfig, ChannelConfig, ClientFullConfig, KcpMode, LimitsConfig, ServerFullConfig};
pub use connection::{ConnectionTable, Connector, LocalSocket};
pub use error::{Result, TunnelError};
pub use mux::{FlowLimits, Multiplexer};
pub use session::{Role, Session, SessionClock};
pub use stats::{TunnelStats, TunnelStatsSnapshot};
pub use supervisor::{HeartbeatAction, KeepaliveAction, SessionSupervisor};
