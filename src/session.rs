/// 会话上下文
///
/// 显式持有可靠通道、连接表、会话时钟、包传输句柄和统计信息，
/// 多路复用器与会话监督器都以 `&mut Session` 的形式操作这些状态。
use crate::channel::ReliableChannel;
use crate::config::{ChannelConfig, LimitsConfig};
use crate::connection::{ConnectionTable, Connector, LocalSocket};
use crate::control_protocol::PacketTag;
use crate::error::{Result, TunnelError};
use crate::stats::{TunnelStats, TunnelStatsSnapshot};
use crate::transport::{SharedPacketTransport, TransportFactory};
use tracing::{debug, info, trace};

/// 会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// 发起方：接受本地连接，发送心跳与 INIT_KCP
    Initiating,
    /// 接受方：为每个 CONNECT 打开本地连接，响应 INIT_KCP
    Accepting,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initiating => write!(f, "initiating"),
            Role::Accepting => write!(f, "accepting"),
        }
    }
}

/// 会话时钟（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionClock {
    pub last_heartbeat_received: u64,
    pub last_channel_data_received: u64,
}

impl SessionClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            last_heartbeat_received: now_ms,
            last_channel_data_received: now_ms,
        }
    }
}

pub struct Session<F: TransportFactory, S: LocalSocket> {
    role: Role,
    pub channel: ReliableChannel<F>,
    pub table: ConnectionTable<S>,
    pub clock: SessionClock,
    pub stats: TunnelStats,
    packets: SharedPacketTransport,
    connector: Option<Box<dyn Connector<S>>>,
}

impl<F: TransportFactory, S: LocalSocket> Session<F, S> {
    /// 创建发起方会话
    pub fn initiating(
        factory: F,
        config: ChannelConfig,
        packets: SharedPacketTransport,
        limits: &LimitsConfig,
        now_ms: u64,
    ) -> Self {
        Self::build(Role::Initiating, factory, config, packets, limits, None, now_ms)
    }

    /// 创建接受方会话
    pub fn accepting(
        factory: F,
        config: ChannelConfig,
        packets: SharedPacketTransport,
        limits: &LimitsConfig,
        connector: Box<dyn Connector<S>>,
        now_ms: u64,
    ) -> Self {
        Self::build(
            Role::Accepting,
            factory,
            config,
            packets,
            limits,
            Some(connector),
            now_ms,
        )
    }

    fn build(
        role: Role,
        factory: F,
        config: ChannelConfig,
        packets: SharedPacketTransport,
        limits: &LimitsConfig,
        connector: Option<Box<dyn Connector<S>>>,
        now_ms: u64,
    ) -> Self {
        let channel = ReliableChannel::new(factory, config, packets.clone(), limits.buffer_size);
        Self {
            role,
            channel,
            table: ConnectionTable::new(limits.max_connections),
            clock: SessionClock::new(now_ms),
            stats: TunnelStats::new(),
            packets,
            connector,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// 包传输句柄
    pub fn packets(&self) -> &SharedPacketTransport {
        &self.packets
    }

    /// 接受方为 conv 打开本地连接
    pub fn open_local(&mut self, conv: u32) -> Result<()> {
        let connector = self
            .connector
            .as_mut()
            .ok_or_else(|| TunnelError::transport("no connector configured for this role"))?;
        self.table.connect(conv, connector.as_mut())
    }

    /// 包传输层收到数据包
    ///
    /// `HEART_BEAT` 与 `PUSH_DATA` 都刷新心跳时间；`PUSH_DATA` 负载送入可靠传输；
    /// 接受方收到 `INIT_KCP` 时无条件重建通道。
    pub fn on_packet_received(&mut self, packet: &[u8], now_ms: u64) {
        let Some((tag, body)) = PacketTag::parse(packet) else {
            trace!("Ignored packet of {} bytes without a known tag", packet.len());
            return;
        };

        match tag {
            PacketTag::HeartBeat => {
                self.clock.last_heartbeat_received = now_ms;
            }
            PacketTag::PushData => {
                if body.is_empty() {
                    return;
                }
                self.clock.last_heartbeat_received = now_ms;
                self.channel.input(body);
            }
            PacketTag::InitKcp => match self.role {
                Role::Accepting => {
                    info!("Remote notifies re-init KCP connection.");
                    self.reinit_channel();
                }
                Role::Initiating => {
                    debug!("Ignored INIT_KCP on the initiating side");
                }
            },
        }
    }

    /// 以相同配置重建可靠通道
    pub fn reinit_channel(&mut self) {
        self.channel.reinit();
        self.stats.channel_reinit();
    }

    /// 当前统计快照
    pub fn stats_snapshot(&self) -> TunnelStatsSnapshot {
        self.stats.snapshot(self.table.active_count())
    }
}
