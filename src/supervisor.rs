/// 会话监督器
///
/// 两个看门狗：心跳超时时重置包传输层握手；可靠通道长时间无数据时
/// 重建通道并通知对端。二者都只由发起方触发恢复动作。
use crate::config::LimitsConfig;
use crate::connection::LocalSocket;
use crate::control_protocol::PacketTag;
use crate::mux::submit_frame;
use crate::protocol::{self, Command};
use crate::session::{Role, Session};
use crate::transport::TransportFactory;
use tracing::{debug, info, warn};

/// 心跳定时器的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// 尚未获知对端地址
    Skipped,
    /// 已发送心跳
    Sent,
    /// 心跳超时，已重置握手
    HandshakeReset,
}

/// 保活定时器的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// 已提交 NOP 帧
    Idle,
    /// 通道接收超时，已重建通道并发送 INIT_KCP
    ChannelReinitialized,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSupervisor {
    heartbeat_timeout_ms: u64,
    channel_recv_timeout_ms: u64,
}

impl SessionSupervisor {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            heartbeat_timeout_ms: limits.heartbeat_timeout().as_millis() as u64,
            channel_recv_timeout_ms: limits.channel_recv_timeout().as_millis() as u64,
        }
    }

    /// 心跳定时器（每秒）
    ///
    /// 对端未知时不做任何事。发起方心跳超时则重置握手，否则发送心跳。
    pub fn on_heartbeat_timer<F, S>(&self, session: &mut Session<F, S>, now_ms: u64) -> HeartbeatAction
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        if !session.packets().borrow().peer_known() {
            return HeartbeatAction::Skipped;
        }

        let silent_for = now_ms.saturating_sub(session.clock.last_heartbeat_received);
        if session.role() == Role::Initiating && silent_for > self.heartbeat_timeout_ms {
            info!("Re-init fake TCP connection.");
            if let Err(e) = session.packets().borrow_mut().reset_handshake() {
                warn!("Failed to reset handshake: {}", e);
            }
            session.stats.handshake_reset();
            return HeartbeatAction::HandshakeReset;
        }

        if let Err(e) = session.channel.send_control(PacketTag::HeartBeat) {
            debug!("Failed to send heartbeat: {}", e);
        }
        HeartbeatAction::Sent
    }

    /// 保活定时器（每秒）
    ///
    /// 总是提交一个 conv 0 的 NOP 帧。发起方通道接收超时则重建通道、
    /// 发送 INIT_KCP，并把接收时间回拨到半个超时之前，留出重试间隔。
    pub fn on_keepalive_timer<F, S>(&self, session: &mut Session<F, S>, now_ms: u64) -> KeepaliveAction
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        let nop = protocol::encode(0, Command::Nop, &[]);
        submit_frame(session, &nop, 0);

        let silent_for = now_ms.saturating_sub(session.clock.last_channel_data_received);
        if session.role() != Role::Initiating || silent_for <= self.channel_recv_timeout_ms {
            return KeepaliveAction::Idle;
        }

        info!("KCP recv timeout. Re-init KCP connection.");
        session.clock.last_channel_data_received =
            now_ms.saturating_sub(self.channel_recv_timeout_ms / 2);
        session.reinit_channel();
        if let Err(e) = session.channel.send_control(PacketTag::InitKcp) {
            warn!("Failed to send INIT_KCP: {}", e);
        }
        KeepaliveAction::ChannelReinitialized
    }
}
