mod factory;
mod kcp_transport;
mod udp;

pub use factory::{create_transport_client, create_transport_server, resolve};
pub use kcp_transport::{KcpFactory, KcpTransport};
pub use udp::UdpPacketTransport;

use crate::config::ChannelConfig;
use crate::control_protocol::PacketTag;
use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use tracing::debug;

/// 发包标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketFlags {
    /// 普通数据包
    #[default]
    Normal,
    /// 伪装握手的首个 SYN
    FirstSyn,
}

/// 包传输层接口（伪装传输的外部协作者）
///
/// 负责把字节作为单个数据包发往对端；握手构造、地址学习等细节由实现决定。
pub trait PacketTransport {
    /// 发送一个数据包，返回实际发送的字节数
    fn send_packet(&mut self, bytes: &[u8], flags: PacketFlags) -> io::Result<usize>;

    /// 是否已知对端地址
    fn peer_known(&self) -> bool;

    /// 重置伪装握手：新的序号、新的临时源端口，并重新发出首个握手包
    fn reset_handshake(&mut self) -> io::Result<()>;
}

/// 事件循环线程内共享的包传输句柄
pub type SharedPacketTransport = Rc<RefCell<dyn PacketTransport>>;

/// 可靠传输接口（ARQ 实现对本层不透明）
pub trait ReliableTransport {
    /// 将一条消息放入发送队列
    fn submit(&mut self, data: &[u8]) -> crate::Result<()>;

    /// 输入一个从对端收到的原始段
    fn input(&mut self, segment: &[u8]) -> crate::Result<()>;

    /// 下一条待取消息的大小
    fn peek_size(&self) -> Option<usize>;

    /// 取出一条已重组的消息，队列为空时返回 `None`
    fn poll_received(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// 推进内部时钟（重传与确认依赖此调用）
    fn tick(&mut self, now_ms: u32);

    /// 发送队列中待发送的段数
    fn outbound_queue_depth(&self) -> usize;
}

/// 可靠传输工厂，重建通道时用同一配置生成新实例
pub trait TransportFactory {
    type Transport: ReliableTransport;

    fn create(&self, config: &ChannelConfig, output: OutboundSink) -> Self::Transport;
}

/// 可靠传输的输出端
///
/// 每个待发段都加上 `PUSH_DATA` 标签后交给包传输层发送。
pub struct OutboundSink {
    transport: SharedPacketTransport,
}

impl OutboundSink {
    pub fn new(transport: SharedPacketTransport) -> Self {
        Self { transport }
    }

    /// 可靠传输产生待发段时的回调，返回包传输层的发送结果
    pub fn on_outbound_ready(&mut self, segment: &[u8]) -> io::Result<usize> {
        let packet = PacketTag::PushData.wrap(segment);
        let sent = self
            .transport
            .borrow_mut()
            .send_packet(&packet, PacketFlags::Normal);
        if let Err(ref e) = sent {
            debug!("Failed to send segment of {} bytes: {}", segment.len(), e);
        }
        sent
    }
}

impl io::Write for OutboundSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.on_outbound_ready(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
