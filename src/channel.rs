/// 可靠通道
///
/// 持有一个可靠传输会话，把它的输出桥接到包传输层，并为多路复用器
/// 提供提交、取数据与队列深度查询。重建时用同一份配置创建全新会话。
use crate::config::ChannelConfig;
use crate::control_protocol::PacketTag;
use crate::error::Result;
use crate::transport::{OutboundSink, ReliableTransport, SharedPacketTransport, TransportFactory};
use tracing::{info, warn};

pub struct ReliableChannel<F: TransportFactory> {
    factory: F,
    config: ChannelConfig,
    packets: SharedPacketTransport,
    transport: F::Transport,
    recv_buf: Vec<u8>,
    generation: u64,
}

impl<F: TransportFactory> ReliableChannel<F> {
    /// 创建通道，`recv_buffer_size` 为单次取数据的缓冲大小
    pub fn new(
        factory: F,
        config: ChannelConfig,
        packets: SharedPacketTransport,
        recv_buffer_size: usize,
    ) -> Self {
        let transport = factory.create(&config, OutboundSink::new(packets.clone()));
        Self {
            factory,
            config,
            packets,
            transport,
            recv_buf: vec![0u8; recv_buffer_size],
            generation: 0,
        }
    }

    /// 提交数据到发送队列
    pub fn submit(&mut self, bytes: &[u8]) -> Result<()> {
        self.transport.submit(bytes)
    }

    /// 推进可靠传输的内部时钟
    pub fn tick(&mut self, now_ms: u64) {
        self.transport.tick(now_ms as u32);
    }

    /// 取出一块已重组的数据，队列为空时返回 `None`
    pub fn drain(&mut self) -> Option<&[u8]> {
        let size = self.transport.peek_size()?;
        if size > self.recv_buf.len() {
            warn!(
                "Grow channel receive buffer from {} to {} bytes",
                self.recv_buf.len(),
                size
            );
            self.recv_buf.resize(size, 0);
        }
        let n = self.transport.poll_received(&mut self.recv_buf)?;
        Some(&self.recv_buf[..n])
    }

    /// 发送队列深度
    pub fn outbound_queue_depth(&self) -> usize {
        self.transport.outbound_queue_depth()
    }

    /// 输入一个 `PUSH_DATA` 包的负载
    pub fn input(&mut self, segment: &[u8]) {
        if let Err(e) = self.transport.input(segment) {
            warn!("Dropped inbound segment: {}", e);
        }
    }

    /// 以相同配置重建可靠传输会话
    pub fn reinit(&mut self) {
        self.transport = self
            .factory
            .create(&self.config, OutboundSink::new(self.packets.clone()));
        self.generation += 1;
        info!("Reliable channel re-initialized (generation {})", self.generation);
    }

    /// 发送控制标签包（不经过可靠传输）
    pub fn send_control(&self, tag: PacketTag) -> std::io::Result<usize> {
        self.packets
            .borrow_mut()
            .send_packet(tag.as_bytes(), Default::default())
    }

    /// 已重建次数
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 通道配置
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// 底层传输（测试与诊断用）
    pub fn transport(&self) -> &F::Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut F::Transport {
        &mut self.transport
    }
}
