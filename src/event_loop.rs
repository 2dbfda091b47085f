/// 单线程事件循环
///
/// 会话状态只在主循环内访问；本地 TCP 套接字的就绪通知由轻量的
/// 观察任务通过 mpsc 通道送回主循环，每个通知都要等主循环确认后
/// 才会发出下一个，避免在可读/可写状态上空转。
use crate::config::LimitsConfig;
use crate::connection::{Connector, LocalSocket};
use crate::io_util::is_would_block;
use crate::mux::{self, FlowLimits, Multiplexer};
use crate::session::{Role, Session};
use crate::supervisor::SessionSupervisor;
use crate::transport::{KcpFactory, UdpPacketTransport};
use anyhow::Result;
use socket2::SockRef;
use std::cell::RefCell;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::io::Interest;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 单个 UDP 数据包的接收缓冲
const UDP_RECV_BUFFER_SIZE: usize = 64 * 1024;
/// 统计日志周期
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

/// 观察任务发回主循环的事件
#[derive(Debug)]
pub enum LoopEvent {
    Readable { conv: u32, id: u64 },
    Writable { conv: u32, id: u64 },
    ConnectFailed { conv: u32, id: u64, error: io::Error },
}

pub type EventSender = mpsc::UnboundedSender<LoopEvent>;

/// 运行在 tokio 上的本地 TCP 连接
///
/// 连接尚未建立时读写都返回 `WouldBlock`。观察任务在本结构被丢弃、
/// 兴趣通道关闭后自行退出。
pub struct TokioSocket {
    id: u64,
    stream: Arc<OnceLock<TcpStream>>,
    read_interest: watch::Sender<bool>,
    write_interest: watch::Sender<bool>,
    read_ack: Arc<Notify>,
    write_ack: Arc<Notify>,
}

struct Watchers {
    conv: u32,
    id: u64,
    stream: Arc<OnceLock<TcpStream>>,
    read_interest: watch::Receiver<bool>,
    write_interest: watch::Receiver<bool>,
    read_ack: Arc<Notify>,
    write_ack: Arc<Notify>,
    events: EventSender,
}

impl TokioSocket {
    fn pair(conv: u32, stream: OnceLock<TcpStream>, events: EventSender) -> (Self, Watchers) {
        let id = NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed);
        let stream = Arc::new(stream);
        let (read_tx, read_rx) = watch::channel(false);
        let (write_tx, write_rx) = watch::channel(false);
        let read_ack = Arc::new(Notify::new());
        let write_ack = Arc::new(Notify::new());
        let socket = Self {
            id,
            stream: Arc::clone(&stream),
            read_interest: read_tx,
            write_interest: write_tx,
            read_ack: Arc::clone(&read_ack),
            write_ack: Arc::clone(&write_ack),
        };
        let watchers = Watchers {
            conv,
            id,
            stream,
            read_interest: read_rx,
            write_interest: write_rx,
            read_ack,
            write_ack,
            events,
        };
        (socket, watchers)
    }

    /// 包装一个已接受的连接
    pub fn accepted(conv: u32, stream: TcpStream, events: EventSender) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for conv {}: {}", conv, e);
        }
        let (socket, watchers) = Self::pair(conv, OnceLock::from(stream), events);
        watchers.spawn();
        socket
    }

    /// 异步连接到 `target`，失败时发送 `ConnectFailed`
    pub fn connecting(conv: u32, target: SocketAddr, events: EventSender) -> Self {
        let (socket, watchers) = Self::pair(conv, OnceLock::new(), events);
        tokio::spawn(async move {
            match TcpStream::connect(target).await {
                Ok(stream) => {
                    debug!("Connected to {} for conv {}", target, conv);
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for conv {}: {}", conv, e);
                    }
                    let _ = watchers.stream.set(stream);
                    watchers.spawn();
                }
                Err(error) => {
                    let _ = watchers.events.send(LoopEvent::ConnectFailed {
                        conv: watchers.conv,
                        id: watchers.id,
                        error,
                    });
                }
            }
        });
        socket
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn wants_read(&self) -> bool {
        *self.read_interest.borrow()
    }

    pub fn wants_write(&self) -> bool {
        *self.write_interest.borrow()
    }

    /// 主循环处理完可读事件
    pub fn ack_readable(&self) {
        self.read_ack.notify_one();
    }

    /// 主循环处理完可写事件
    pub fn ack_writable(&self) {
        self.write_ack.notify_one();
    }

    fn not_connected() -> io::Error {
        io::Error::new(io::ErrorKind::WouldBlock, "connection in progress")
    }
}

fn set_interest(sender: &watch::Sender<bool>, enabled: bool) {
    sender.send_if_modified(|current| {
        if *current == enabled {
            false
        } else {
            *current = enabled;
            true
        }
    });
}

impl LocalSocket for TokioSocket {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.get() {
            Some(stream) => stream.try_read(buf),
            None => Err(Self::not_connected()),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.get() {
            Some(stream) => stream.try_write(buf),
            None => Err(Self::not_connected()),
        }
    }

    fn set_read_interest(&mut self, enabled: bool) {
        set_interest(&self.read_interest, enabled);
    }

    fn set_write_interest(&mut self, enabled: bool) {
        set_interest(&self.write_interest, enabled);
    }

    fn close(&mut self) {
        set_interest(&self.read_interest, false);
        set_interest(&self.write_interest, false);
        if let Some(stream) = self.stream.get() {
            if let Err(e) = SockRef::from(stream).shutdown(Shutdown::Both) {
                debug!("Shutdown of socket {} failed: {}", self.id, e);
            }
        }
    }
}

impl Watchers {
    fn spawn(self) {
        let Watchers {
            conv,
            id,
            stream,
            read_interest,
            write_interest,
            read_ack,
            write_ack,
            events,
        } = self;
        tokio::spawn(watch_readiness(
            Arc::clone(&stream),
            Interest::READABLE,
            read_interest,
            read_ack,
            events.clone(),
            move || LoopEvent::Readable { conv, id },
        ));
        tokio::spawn(watch_readiness(
            stream,
            Interest::WRITABLE,
            write_interest,
            write_ack,
            events,
            move || LoopEvent::Writable { conv, id },
        ));
    }
}

async fn watch_readiness<E>(
    stream: Arc<OnceLock<TcpStream>>,
    interest: Interest,
    mut enabled: watch::Receiver<bool>,
    ack: Arc<Notify>,
    events: EventSender,
    event: E,
) where
    E: Fn() -> LoopEvent,
{
    let Some(stream) = stream.get() else {
        return;
    };

    loop {
        if enabled.wait_for(|on| *on).await.is_err() {
            return;
        }

        tokio::select! {
            // 就绪错误同样交给主循环，由下一次读写暴露出来
            _ = stream.ready(interest) => {}
            changed = enabled.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        }

        if events.send(event()).is_err() {
            return;
        }

        tokio::select! {
            _ = ack.notified() => {}
            changed = enabled.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

/// 接受方使用的出站连接器
pub struct TcpConnector {
    target: SocketAddr,
    events: EventSender,
}

impl TcpConnector {
    pub fn new(target: SocketAddr, events: EventSender) -> Self {
        Self { target, events }
    }
}

impl Connector<TokioSocket> for TcpConnector {
    fn connect(&mut self, conv: u32) -> io::Result<TokioSocket> {
        Ok(TokioSocket::connecting(conv, self.target, self.events.clone()))
    }
}

/// 主循环所需的全部状态
pub struct EventLoop {
    session: Session<KcpFactory, TokioSocket>,
    mux: Multiplexer,
    supervisor: SessionSupervisor,
    udp: Rc<RefCell<UdpPacketTransport>>,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<LoopEvent>,
    listener: Option<TcpListener>,
    interval_ms: u32,
    keepalive_interval: Duration,
    started: Instant,
}

impl EventLoop {
    /// 创建事件通道，连接器需要在会话创建前拿到发送端
    pub fn channel() -> (EventSender, mpsc::UnboundedReceiver<LoopEvent>) {
        mpsc::unbounded_channel()
    }

    pub fn new(
        session: Session<KcpFactory, TokioSocket>,
        udp: Rc<RefCell<UdpPacketTransport>>,
        events: (EventSender, mpsc::UnboundedReceiver<LoopEvent>),
        listener: Option<TcpListener>,
        limits: &LimitsConfig,
        started: Instant,
    ) -> Self {
        let interval_ms = session.channel.config().interval_ms.max(1);
        Self {
            session,
            mux: Multiplexer::new(FlowLimits::from(limits)),
            supervisor: SessionSupervisor::new(limits),
            udp,
            events_tx: events.0,
            events_rx: events.1,
            listener,
            interval_ms,
            keepalive_interval: limits.keepalive_interval(),
            started,
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// 运行直到收到 Ctrl+C
    pub async fn run(mut self) -> Result<()> {
        let mut udp_buf = vec![0u8; UDP_RECV_BUFFER_SIZE];

        let mut reliable_timer = interval(Duration::from_millis(self.interval_ms as u64));
        reliable_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat_timer = interval(self.keepalive_interval);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive_timer = interval(self.keepalive_interval);
        keepalive_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats_timer = interval(STATS_LOG_INTERVAL);
        stats_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!(
            "Event loop running as {} side (Press Ctrl+C to stop)",
            self.session.role()
        );

        loop {
            // 重新握手可能换了套接字，每轮都取当前的
            let udp_socket = self.udp.borrow().socket();

            tokio::select! {
                received = udp_socket.recv_from(&mut udp_buf) => {
                    match received {
                        Ok((n, from)) => self.on_datagram(&udp_buf[..n], from),
                        Err(e) if is_would_block(&e) => {}
                        Err(e) => debug!("UDP receive error: {}", e),
                    }
                }
                _ = reliable_timer.tick() => {
                    let now = self.now_ms();
                    self.mux.on_reliable_tick(&mut self.session, now);
                }
                _ = heartbeat_timer.tick() => {
                    let now = self.now_ms();
                    self.supervisor.on_heartbeat_timer(&mut self.session, now);
                }
                _ = keepalive_timer.tick() => {
                    let now = self.now_ms();
                    self.supervisor.on_keepalive_timer(&mut self.session, now);
                }
                Some(event) = self.events_rx.recv() => {
                    self.on_loop_event(event);
                }
                accepted = accept(self.listener.as_ref()) => {
                    match accepted {
                        Ok((stream, addr)) => self.on_accepted(stream, addr),
                        Err(e) => warn!("Failed to accept local connection: {}", e),
                    }
                }
                _ = stats_timer.tick() => {
                    let snapshot = self.session.stats_snapshot();
                    match serde_json::to_string(&snapshot) {
                        Ok(json) => debug!("Tunnel stats: {}", json),
                        Err(e) => debug!("Failed to serialize stats: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping...");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn on_datagram(&mut self, packet: &[u8], from: SocketAddr) {
        if self.session.role() == Role::Accepting {
            self.udp.borrow_mut().learn_peer(from);
        }
        let now = self.now_ms();
        self.session.on_packet_received(packet, now);
    }

    fn on_accepted(&mut self, stream: TcpStream, addr: SocketAddr) {
        info!("Accepted local connection from {}", addr);
        let events = self.events_tx.clone();
        self.mux.on_local_accepted(&mut self.session, |conv| {
            TokioSocket::accepted(conv, stream, events)
        });
    }

    fn current_socket(&self, conv: u32, id: u64) -> Option<&TokioSocket> {
        self.session
            .table
            .get(conv)
            .and_then(|entry| entry.socket())
            .filter(|socket| socket.id() == id)
    }

    fn on_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Readable { conv, id } => {
                let Some(socket) = self.current_socket(conv, id) else {
                    return;
                };
                if socket.wants_read() {
                    self.mux.on_local_readable(&mut self.session, conv);
                }
                if let Some(socket) = self.current_socket(conv, id) {
                    socket.ack_readable();
                }
            }
            LoopEvent::Writable { conv, id } => {
                let Some(socket) = self.current_socket(conv, id) else {
                    return;
                };
                if socket.wants_write() {
                    self.mux.on_local_writable(&mut self.session, conv);
                }
                if let Some(socket) = self.current_socket(conv, id) {
                    socket.ack_writable();
                }
            }
            LoopEvent::ConnectFailed { conv, id, error } => {
                if self.current_socket(conv, id).is_none() {
                    return;
                }
                warn!("connect failed. conv={} error={}", conv, error);
                self.mux.on_local_failed(&mut self.session, conv);
            }
        }
    }

    /// 关闭所有本地连接并通知对端，再推进一次通道把通知发出去
    fn shutdown(&mut self) {
        let closed = self.session.table.close_all();
        for &conv in &closed {
            self.session.stats.connection_closed();
            mux::notify_remote_close(&mut self.session, conv);
        }
        let now = self.now_ms();
        self.session.channel.tick(now);
        info!(
            "Event loop stopped, {} local connections closed",
            closed.len()
        );
    }
}

async fn accept(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
