/// 自定义错误类型
///
/// 使用 thiserror 定义隧道核心的错误类型，二进制入口处再用 anyhow 汇总
use std::io;
use thiserror::Error;

/// KCP Tunnel 的主要错误类型
#[derive(Error, Debug)]
pub enum TunnelError {
    /// 可靠通道发送队列已满
    #[error("Reliable channel is full")]
    ChannelFull,

    /// 槽位已被占用
    #[error("Connection slot {conv} is already in use")]
    AlreadyInUse { conv: u32 },

    /// 槽位未被占用
    #[error("Connection slot {conv} is not in use")]
    NotInUse { conv: u32 },

    /// conv 超出连接表容量
    #[error("Conversation id {conv} exceeds table capacity {capacity}")]
    ConvOutOfRange { conv: u32, capacity: usize },

    /// 本地连接失败
    #[error("Failed to connect local socket for conv {conv}: {source}")]
    ConnectionFailed {
        conv: u32,
        #[source]
        source: io::Error,
    },

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, TunnelError>;

impl TunnelError {
    /// 创建本地连接失败错误
    pub fn connection_failed(conv: u32, source: io::Error) -> Self {
        Self::ConnectionFailed { conv, source }
    }

    /// 创建传输层错误
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// 创建配置错误
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 检查是否为通道已满
    pub fn is_channel_full(&self) -> bool {
        matches!(self, Self::ChannelFull)
    }

    /// 检查是否为槽位未使用
    pub fn is_not_in_use(&self) -> bool {
        matches!(self, Self::NotInUse { .. })
    }

    /// 检查是否为 would-block，这类错误只表示"本轮无事可做"
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::AlreadyInUse { conv: 7 };
        assert_eq!(err.to_string(), "Connection slot 7 is already in use");

        let err = TunnelError::ConvOutOfRange {
            conv: 2048,
            capacity: 1024,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = TunnelError::connection_failed(3, io_err);
        assert!(err.to_string().contains("conv 3"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_error_is_checks() {
        let full = TunnelError::ChannelFull;
        let not_in_use = TunnelError::NotInUse { conv: 1 };
        let would_block = TunnelError::from(io::Error::from(io::ErrorKind::WouldBlock));
        let reset = TunnelError::from(io::Error::from(io::ErrorKind::ConnectionReset));

        assert!(full.is_channel_full());
        assert!(!full.is_not_in_use());
        assert!(not_in_use.is_not_in_use());
        assert!(would_block.is_would_block());
        assert!(!reset.is_would_block());
    }
}
