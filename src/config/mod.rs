// 配置管理模块 - 使用模块化设计

mod validator;

pub use validator::ConfigValidator;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// KCP 工作模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KcpMode {
    /// 默认模式（等同 fast3 参数）
    #[default]
    Default,
    Normal,
    Fast,
    Fast2,
    Fast3,
}

/// 模式预设参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePreset {
    /// 低延迟模式（nodelay）
    pub low_delay: bool,
    /// 内部时钟间隔（毫秒）
    pub interval_ms: u32,
    /// 快速重传阈值
    pub fast_resend: u32,
    /// 关闭拥塞控制
    pub no_congestion_control: bool,
}

impl KcpMode {
    /// 模式对应的参数四元组
    pub fn preset(self) -> ModePreset {
        let (low_delay, interval_ms) = match self {
            KcpMode::Default => (true, 10),
            KcpMode::Normal => (false, 30),
            KcpMode::Fast => (false, 20),
            KcpMode::Fast2 => (true, 20),
            KcpMode::Fast3 => (true, 10),
        };
        ModePreset {
            low_delay,
            interval_ms,
            fast_resend: 2,
            no_congestion_control: true,
        }
    }
}

impl std::fmt::Display for KcpMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            KcpMode::Default => "default",
            KcpMode::Normal => "normal",
            KcpMode::Fast => "fast",
            KcpMode::Fast2 => "fast2",
            KcpMode::Fast3 => "fast3",
        })
    }
}

impl std::str::FromStr for KcpMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "normal" => Ok(Self::Normal),
            "fast" => Ok(Self::Fast),
            "fast2" => Ok(Self::Fast2),
            "fast3" => Ok(Self::Fast3),
            _ => anyhow::bail!("Unknown KCP mode: {}", s),
        }
    }
}

/// KCP 会话参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KcpConfig {
    /// 最大传输单元
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// 发送窗口（段数）
    #[serde(default = "default_wnd")]
    pub snd_wnd: u16,
    /// 接收窗口（段数）
    #[serde(default = "default_wnd")]
    pub rcv_wnd: u16,
}

fn default_mtu() -> usize {
    1350
}

fn default_wnd() -> u16 {
    1024
}

impl Default for KcpConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            snd_wnd: default_wnd(),
            rcv_wnd: default_wnd(),
        }
    }
}

/// 可靠通道配置，会话创建时确定，重建时原样复用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub low_delay: bool,
    pub interval_ms: u32,
    pub fast_resend: u32,
    pub no_congestion_control: bool,
    pub mtu: usize,
    pub snd_wnd: u16,
    pub rcv_wnd: u16,
}

impl ChannelConfig {
    /// 由模式预设和 KCP 参数组合
    pub fn new(mode: KcpMode, kcp: &KcpConfig) -> Self {
        let preset = mode.preset();
        Self {
            low_delay: preset.low_delay,
            interval_ms: preset.interval_ms,
            fast_resend: preset.fast_resend,
            no_congestion_control: preset.no_congestion_control,
            mtu: kcp.mtu,
            snd_wnd: kcp.snd_wnd,
            rcv_wnd: kcp.rcv_wnd,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new(KcpMode::Default, &KcpConfig::default())
    }
}

/// 连接与流控限制
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// 连接表容量
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// 单次本地读取 / 通道读取缓冲大小
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// KCP 发送队列超过该段数时暂停所有本地读取
    #[serde(default = "default_max_send_queue")]
    pub max_send_queue: usize,
    /// 任一连接待发送字节超过该值时本轮不从通道取数据
    #[serde(default = "default_max_pending_bytes")]
    pub max_pending_bytes: usize,
    /// 心跳超时（秒）
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    /// 通道接收超时（秒）
    #[serde(default = "default_channel_recv_timeout")]
    pub channel_recv_timeout_secs: u64,
    /// 心跳 / NOP 定时器间隔（毫秒）
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    4096
}

fn default_max_send_queue() -> usize {
    256
}

fn default_max_pending_bytes() -> usize {
    64 * 1024
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_channel_recv_timeout() -> u64 {
    20
}

fn default_keepalive_interval() -> u64 {
    1000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            max_send_queue: default_max_send_queue(),
            max_pending_bytes: default_max_pending_bytes(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            channel_recv_timeout_secs: default_channel_recv_timeout(),
            keepalive_interval_ms: default_keepalive_interval(),
        }
    }
}

impl LimitsConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn channel_recv_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_recv_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

/// 服务器端（接受方）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 包传输监听地址
    pub bind_addr: String,
    /// 包传输监听端口
    pub bind_port: u16,
    /// 每个 CONNECT 连接到的目标地址
    pub target_addr: String,
    /// 目标端口
    pub target_port: u16,
    /// KCP 模式
    #[serde(default)]
    pub mode: KcpMode,
}

/// 客户端（发起方）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// 服务器地址
    pub server_addr: String,
    /// 服务器端口
    pub server_port: u16,
    /// 本地监听地址（默认 127.0.0.1）
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// 本地监听端口
    pub listen_port: u16,
    /// KCP 模式
    #[serde(default)]
    pub mode: KcpMode,
}

/// 服务器完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFullConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub kcp: KcpConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// 客户端完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFullConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub kcp: KcpConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl ServerFullConfig {
    /// 可靠通道配置
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.server.mode, &self.kcp)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_server_config(&self.server)?;
        ConfigValidator::validate_kcp_config(&self.kcp)?;
        ConfigValidator::validate_limits_config(&self.limits)?;
        ConfigValidator::validate_message_size(&self.kcp, &self.limits)?;
        Ok(())
    }
}

impl ClientFullConfig {
    /// 可靠通道配置
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::new(self.client.mode, &self.kcp)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        ConfigValidator::validate_client_config(&self.client)?;
        ConfigValidator::validate_kcp_config(&self.kcp)?;
        ConfigValidator::validate_limits_config(&self.limits)?;
        ConfigValidator::validate_message_size(&self.kcp, &self.limits)?;
        Ok(())
    }
}

/// 应用配置
#[derive(Debug, Clone)]
pub enum AppConfig {
    Server(ServerFullConfig),
    Client(ClientFullConfig),
}

impl AppConfig {
    /// 从 TOML 文本解析服务器配置
    pub fn parse_server_config(content: &str) -> anyhow::Result<ServerFullConfig> {
        let config: ServerFullConfig =
            toml::from_str(content).context("Failed to parse server configuration")?;
        config
            .validate()
            .context("Server configuration validation failed")?;
        Ok(config)
    }

    /// 从 TOML 文本解析客户端配置
    pub fn parse_client_config(content: &str) -> anyhow::Result<ClientFullConfig> {
        let config: ClientFullConfig =
            toml::from_str(content).context("Failed to parse client configuration")?;
        config
            .validate()
            .context("Client configuration validation failed")?;
        Ok(config)
    }

    /// 从文件加载服务器配置
    pub fn load_server_config(path: &str) -> anyhow::Result<ServerFullConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse_server_config(&content)
    }

    /// 从文件加载客户端配置
    pub fn load_client_config(path: &str) -> anyhow::Result<ClientFullConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse_client_config(&content)
    }

    /// 从文件加载配置（自动检测类型）
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        if content.contains("[server]") {
            Ok(AppConfig::Server(Self::parse_server_config(&content)?))
        } else {
            Ok(AppConfig::Client(Self::parse_client_config(&content)?))
        }
    }
}
