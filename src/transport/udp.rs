/// 基于普通 UDP 的包传输实现
///
/// 不做协议伪装，只提供与伪装传输相同的接口：学习对端地址、
/// 非阻塞发包，以及换源端口重新握手。
use super::{PacketFlags, PacketTransport};
use rand::Rng;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// 重新握手时选择的临时源端口范围
const EPHEMERAL_PORT_BASE: u16 = 30000;
const EPHEMERAL_PORT_SPAN: u16 = 10000;

/// 套接字收发缓冲大小
const SOCKET_BUFFER_SIZE: usize = 4 * 1024 * 1024;

pub struct UdpPacketTransport {
    socket: Arc<UdpSocket>,
    peer: Option<SocketAddr>,
    /// 发起方重新握手时是否换端口
    rebind_on_reset: bool,
}

impl UdpPacketTransport {
    /// 接受方：绑定固定地址，对端地址从收到的包中学习
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = bind_udp(addr)?;
        Ok(Self {
            socket: Arc::new(socket),
            peer: None,
            rebind_on_reset: false,
        })
    }

    /// 发起方：绑定随机临时端口，对端固定为服务器地址
    pub fn connect(server: SocketAddr) -> io::Result<Self> {
        let socket = bind_udp(ephemeral_addr(server))?;
        Ok(Self {
            socket: Arc::new(socket),
            peer: Some(server),
            rebind_on_reset: true,
        })
    }

    /// 当前套接字
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    /// 当前对端地址
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 接受方根据收到的数据包更新对端地址
    pub fn learn_peer(&mut self, from: SocketAddr) {
        if self.peer != Some(from) {
            info!("Peer address is now {}", from);
            self.peer = Some(from);
        }
    }
}

impl PacketTransport for UdpPacketTransport {
    fn send_packet(&mut self, bytes: &[u8], flags: PacketFlags) -> io::Result<usize> {
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "peer address unknown"))?;
        if flags == PacketFlags::FirstSyn {
            debug!("Sending handshake packet to {}", peer);
        }
        match self.socket.try_send_to(bytes, peer) {
            // 注册后尚未收到可写事件时，直接走一次非阻塞系统调用
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                SockRef::from(self.socket.as_ref()).send_to(bytes, &peer.into())
            }
            result => result,
        }
    }

    fn peer_known(&self) -> bool {
        self.peer.is_some()
    }

    fn reset_handshake(&mut self) -> io::Result<()> {
        if self.rebind_on_reset {
            if let Some(peer) = self.peer {
                let socket = bind_udp(ephemeral_addr(peer))?;
                info!(
                    "Rebound packet transport to {}",
                    socket
                        .local_addr()
                        .map(|a| a.to_string())
                        .unwrap_or_default()
                );
                self.socket = Arc::new(socket);
            }
        }
        self.send_packet(&[], PacketFlags::FirstSyn).map(|_| ())
    }
}

fn ephemeral_addr(peer: SocketAddr) -> SocketAddr {
    let port = EPHEMERAL_PORT_BASE + rand::rng().random_range(0..EPHEMERAL_PORT_SPAN);
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port)
}

/// 创建非阻塞 UDP 套接字并注册到 tokio
fn bind_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
        debug!("Failed to set UDP receive buffer size: {}", e);
    }
    if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
        debug!("Failed to set UDP send buffer size: {}", e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}
