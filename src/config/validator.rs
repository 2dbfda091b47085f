use anyhow::{bail, Result};
use tracing::warn;

use super::{ClientConfig, KcpConfig, LimitsConfig, ServerConfig};
use crate::protocol::HEADER_SIZE;

/// KCP 分段头长度
const KCP_OVERHEAD: usize = 24;
/// KCP 单条消息允许的最大分片数
const KCP_MAX_FRAGMENTS: usize = 127;

/// 配置验证器 - 负责所有配置验证逻辑
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证端口号
    pub fn validate_port(port: u16, context: &str) -> Result<()> {
        if port == 0 {
            bail!("{}: port cannot be 0", context);
        }
        Ok(())
    }

    /// 验证地址不为空
    pub fn validate_address(addr: &str, context: &str) -> Result<()> {
        if addr.trim().is_empty() {
            bail!("{}: address cannot be empty", context);
        }
        Ok(())
    }

    /// 验证服务器配置
    pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
        Self::validate_address(&config.bind_addr, "Server bind_addr")?;
        Self::validate_port(config.bind_port, "Server bind_port")?;
        Self::validate_address(&config.target_addr, "Server target_addr")?;
        Self::validate_port(config.target_port, "Server target_port")?;
        Ok(())
    }

    /// 验证客户端配置
    pub fn validate_client_config(config: &ClientConfig) -> Result<()> {
        Self::validate_address(&config.server_addr, "Client server_addr")?;
        Self::validate_port(config.server_port, "Client server_port")?;
        Self::validate_address(&config.listen_addr, "Client listen_addr")?;
        Self::validate_port(config.listen_port, "Client listen_port")?;
        Ok(())
    }

    /// 验证 KCP 参数
    pub fn validate_kcp_config(config: &KcpConfig) -> Result<()> {
        if !(50..=1500).contains(&config.mtu) {
            bail!("kcp.mtu must be between 50 and 1500 (current: {})", config.mtu);
        }
        if config.snd_wnd == 0 || config.rcv_wnd == 0 {
            bail!("kcp.snd_wnd and kcp.rcv_wnd must be greater than 0");
        }
        Ok(())
    }

    /// 验证限制参数
    pub fn validate_limits_config(config: &LimitsConfig) -> Result<()> {
        if config.max_connections == 0 {
            bail!("limits.max_connections must be greater than 0");
        }
        if config.max_connections > u32::MAX as usize {
            bail!("limits.max_connections cannot exceed {}", u32::MAX);
        }
        if config.buffer_size <= HEADER_SIZE {
            bail!(
                "limits.buffer_size must be greater than the frame header size ({})",
                HEADER_SIZE
            );
        }
        if config.max_send_queue == 0 {
            bail!("limits.max_send_queue must be greater than 0");
        }
        if config.max_pending_bytes == 0 {
            bail!("limits.max_pending_bytes must be greater than 0");
        }
        if config.heartbeat_timeout_secs == 0 || config.channel_recv_timeout_secs == 0 {
            bail!("limits timeouts must be greater than 0");
        }
        if config.keepalive_interval_ms == 0 {
            bail!("limits.keepalive_interval_ms must be greater than 0");
        }
        if config.keepalive_interval_ms / 1000 >= config.heartbeat_timeout_secs {
            warn!(
                "limits.keepalive_interval_ms ({}) is not shorter than heartbeat_timeout_secs ({}), \
                 the session will keep resetting",
                config.keepalive_interval_ms, config.heartbeat_timeout_secs
            );
        }
        Ok(())
    }

    /// 验证一次本地读取能作为单个 KCP 消息发送
    ///
    /// KCP 单条消息最多 127 个分片，且接收端必须能在接收窗口内重组。
    pub fn validate_message_size(kcp: &KcpConfig, limits: &LimitsConfig) -> Result<()> {
        let max = max_message_size(kcp);
        if limits.buffer_size > max {
            bail!(
                "limits.buffer_size ({}) exceeds the largest KCP message for mtu {} and rcv_wnd {} ({})",
                limits.buffer_size,
                kcp.mtu,
                kcp.rcv_wnd,
                max
            );
        }
        Ok(())
    }
}

/// 单条 KCP 消息的最大字节数
pub fn max_message_size(kcp: &KcpConfig) -> usize {
    let fragments = KCP_MAX_FRAGMENTS.min(kcp.rcv_wnd as usize);
    fragments * kcp.mtu.saturating_sub(KCP_OVERHEAD)
}
