/// 基于 `kcp` crate 的可靠传输实现
use super::{OutboundSink, ReliableTransport, TransportFactory};
use crate::config::ChannelConfig;
use crate::error::{Result, TunnelError};
use kcp::Kcp;
use tracing::{debug, warn};

/// 发送队列的硬上限为发送窗口的倍数
const HARD_QUEUE_FACTOR: usize = 16;

/// KCP 会话
pub struct KcpTransport {
    kcp: Kcp<OutboundSink>,
    hard_queue_limit: usize,
}

impl KcpTransport {
    /// 按通道配置创建会话（conv 固定为 0）
    pub fn new(config: &ChannelConfig, output: OutboundSink) -> Self {
        let mut kcp = Kcp::new(0, output);
        if let Err(e) = kcp.set_mtu(config.mtu) {
            warn!("Invalid KCP MTU {}: {}", config.mtu, e);
        }
        kcp.set_wndsize(config.snd_wnd, config.rcv_wnd);
        kcp.set_nodelay(
            config.low_delay,
            config.interval_ms as i32,
            config.fast_resend as i32,
            config.no_congestion_control,
        );

        Self {
            kcp,
            hard_queue_limit: config.snd_wnd as usize * HARD_QUEUE_FACTOR,
        }
    }
}

impl ReliableTransport for KcpTransport {
    fn submit(&mut self, data: &[u8]) -> Result<()> {
        if self.kcp.wait_snd() >= self.hard_queue_limit {
            return Err(TunnelError::ChannelFull);
        }
        self.kcp
            .send(data)
            .map(|_| ())
            .map_err(|e| TunnelError::transport(format!("KCP send failed: {}", e)))
    }

    fn input(&mut self, segment: &[u8]) -> Result<()> {
        self.kcp
            .input(segment)
            .map(|_| ())
            .map_err(|e| TunnelError::transport(format!("KCP input rejected: {}", e)))
    }

    fn peek_size(&self) -> Option<usize> {
        self.kcp.peeksize().ok()
    }

    fn poll_received(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.kcp.recv(buf).ok()
    }

    fn tick(&mut self, now_ms: u32) {
        if let Err(e) = self.kcp.update(now_ms) {
            debug!("KCP update error: {}", e);
        }
    }

    fn outbound_queue_depth(&self) -> usize {
        self.kcp.wait_snd()
    }
}

/// 生成 [`KcpTransport`] 的工厂
#[derive(Debug, Clone, Copy, Default)]
pub struct KcpFactory;

impl TransportFactory for KcpFactory {
    type Transport = KcpTransport;

    fn create(&self, config: &ChannelConfig, output: OutboundSink) -> KcpTransport {
        KcpTransport::new(config, output)
    }
}
