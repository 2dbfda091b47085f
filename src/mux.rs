/// 多路复用器
///
/// 把本地套接字事件转换为可靠通道上的帧，把通道收到的帧转换为本地
/// 套接字写入和连接表状态变化，并实施两道背压闸门：
///
/// - 下游闸门：可靠传输发送队列超过阈值时，暂停所有连接的本地读取；
/// - 上游闸门：任一连接的待发送积压超过上限时，本轮不从通道取数据。
use crate::config::LimitsConfig;
use crate::connection::{CloseOutcome, FlushOutcome, LocalSocket};
use crate::error::TunnelError;
use crate::io_util::ByteQueue;
use crate::protocol::{self, Command, FragmentHeader, HEADER_SIZE};
use crate::session::{Role, Session};
use crate::transport::TransportFactory;
use tracing::{debug, info, trace, warn};

/// 流控参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLimits {
    /// 单次本地读取缓冲（含帧头）
    pub buffer_size: usize,
    /// 发送队列阈值（段数）
    pub max_send_queue: usize,
    /// 单连接积压上限（字节）
    pub max_pending_bytes: usize,
}

impl From<&LimitsConfig> for FlowLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            buffer_size: limits.buffer_size,
            max_send_queue: limits.max_send_queue,
            max_pending_bytes: limits.max_pending_bytes,
        }
    }
}

pub struct Multiplexer {
    limits: FlowLimits,
    reassembly: ByteQueue,
    read_buf: Vec<u8>,
    reads_paused: bool,
}

impl Multiplexer {
    pub fn new(limits: FlowLimits) -> Self {
        Self {
            limits,
            reassembly: ByteQueue::with_capacity(limits.buffer_size),
            read_buf: vec![0u8; limits.buffer_size.saturating_sub(HEADER_SIZE).max(1)],
            reads_paused: false,
        }
    }

    /// 重组缓冲中尚未消费的字节
    pub fn pending_reassembly(&self) -> &[u8] {
        self.reassembly.as_slice()
    }

    /// 下游闸门当前是否关闭
    pub fn reads_paused(&self) -> bool {
        self.reads_paused
    }

    /// 本地连接可读：读取一块数据并作为 PUSH 帧提交
    pub fn on_local_readable<F, S>(&mut self, session: &mut Session<F, S>, conv: u32)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        match session.table.read(conv, &mut self.read_buf) {
            Ok(0) => {
                info!("recv ends. conv={}", conv);
                close_and_notify(session, conv);
            }
            Ok(n) => {
                let frame = protocol::encode(conv, Command::Push, &self.read_buf[..n]);
                submit_frame(session, &frame, n);
            }
            Err(e) if e.is_would_block() || e.is_not_in_use() => {}
            Err(e) => {
                info!("recv ends. conv={} error={}", conv, e);
                close_and_notify(session, conv);
            }
        }
    }

    /// 本地连接可写：排空待发送缓冲
    pub fn on_local_writable<F, S>(&mut self, session: &mut Session<F, S>, conv: u32)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        match session.table.flush_writable(conv) {
            Ok(FlushOutcome::Closed) => session.stats.connection_closed(),
            Ok(_) => {}
            Err(e) => {
                info!("send ends. conv={} error={}", conv, e);
                close_and_notify(session, conv);
            }
        }
    }

    /// 本地连接出现硬错误（例如异步连接失败）
    pub fn on_local_failed<F, S>(&mut self, session: &mut Session<F, S>, conv: u32)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        close_and_notify(session, conv);
    }

    /// 发起方接受了新的本地连接：分配 conv、由 `open` 构造套接字并通知对端
    ///
    /// 连接表已满时 `open` 不会被调用，返回 `None`。
    pub fn on_local_accepted<F, S, O>(&mut self, session: &mut Session<F, S>, open: O) -> Option<u32>
    where
        F: TransportFactory,
        S: LocalSocket,
        O: FnOnce(u32) -> S,
    {
        let Some(conv) = session.table.allocate() else {
            warn!(
                "Connection table full ({} slots), rejecting local connection",
                session.table.capacity()
            );
            return None;
        };
        if let Err(e) = session.table.attach(conv, open(conv)) {
            warn!("Failed to attach local connection: {}", e);
            return None;
        }
        if self.reads_paused {
            session.table.set_read_interest_all(false);
        }
        session.stats.connection_opened();
        notify_remote_connect(session, conv);
        Some(conv)
    }

    /// 可靠通道定时器：推进时钟、评估背压、排空并分发所有完整帧
    pub fn on_reliable_tick<F, S>(&mut self, session: &mut Session<F, S>, now_ms: u64)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        session.channel.tick(now_ms);

        // 两个闸门相互独立，下行闸门每次都要评估
        self.apply_read_gate(session);

        if session.table.any_backlog_exceeds(self.limits.max_pending_bytes) {
            trace!("Local backlog over limit, skip draining this tick");
            return;
        }

        while let Some(chunk) = session.channel.drain() {
            session.clock.last_channel_data_received = now_ms;
            self.reassembly.extend(chunk);
            self.dispatch_frames(session);

            if session.table.any_backlog_exceeds(self.limits.max_pending_bytes) {
                break;
            }
        }
    }

    fn apply_read_gate<F, S>(&mut self, session: &mut Session<F, S>)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        let depth = session.channel.outbound_queue_depth();
        let congested = depth > self.limits.max_send_queue;
        if congested != self.reads_paused {
            if congested {
                debug!("Send queue depth {} over limit, pausing local reads", depth);
            } else {
                debug!("Send queue depth {} back under limit, resuming local reads", depth);
            }
            self.reads_paused = congested;
        }
        session.table.set_read_interest_all(!congested);
    }

    /// 消费重组缓冲中的每一个完整帧
    fn dispatch_frames<F, S>(&mut self, session: &mut Session<F, S>)
    where
        F: TransportFactory,
        S: LocalSocket,
    {
        while let Some((header, payload, consumed)) = protocol::try_decode(self.reassembly.as_slice())
        {
            dispatch_frame(session, header, payload);
            self.reassembly.drain_front(consumed);
        }
    }
}

fn dispatch_frame<F, S>(session: &mut Session<F, S>, header: FragmentHeader, payload: &[u8])
where
    F: TransportFactory,
    S: LocalSocket,
{
    let conv = header.conv;
    session.stats.frame_received(payload.len());

    match header.command {
        Command::Nop => {}
        Command::Connect => {
            if session.role() != Role::Accepting {
                debug!("Ignored CONNECT for conv {} on the initiating side", conv);
                return;
            }
            info!("Remote notifies new connection. conv={}", conv);
            match session.open_local(conv) {
                Ok(()) => session.stats.connection_opened(),
                Err(e) => {
                    warn!("connect failed: {}", e);
                    close_and_notify(session, conv);
                }
            }
        }
        Command::Push => match session.table.push(conv, payload) {
            Ok(_) => {}
            Err(TunnelError::NotInUse { .. }) => {
                trace!("Dropped PUSH for idle conv {}", conv);
            }
            Err(e @ TunnelError::ConvOutOfRange { .. }) => {
                warn!("Dropped PUSH: {}", e);
            }
            Err(e) => {
                info!("send ends. conv={} error={}", conv, e);
                close_and_notify(session, conv);
            }
        },
        Command::Close => {
            if session.table.is_in_use(conv) {
                info!("Remote notifies closing. conv={}", conv);
            }
            if session.table.close(conv) == CloseOutcome::Closed {
                session.stats.connection_closed();
            }
        }
        Command::Unknown(value) => {
            warn!("Dropped frame with unknown command {} for conv {}", value, conv);
        }
    }
}

/// 立即关闭本地连接并通知对端
fn close_and_notify<F, S>(session: &mut Session<F, S>, conv: u32)
where
    F: TransportFactory,
    S: LocalSocket,
{
    if session.table.force_close(conv) {
        session.stats.connection_closed();
    }
    notify_remote_close(session, conv);
}

/// 通知对端新建连接
pub fn notify_remote_connect<F, S>(session: &mut Session<F, S>, conv: u32)
where
    F: TransportFactory,
    S: LocalSocket,
{
    info!("Notifying remote new connection. conv={}", conv);
    let frame = protocol::encode(conv, Command::Connect, &[]);
    submit_frame(session, &frame, 0);
}

/// 通知对端关闭连接
pub fn notify_remote_close<F, S>(session: &mut Session<F, S>, conv: u32)
where
    F: TransportFactory,
    S: LocalSocket,
{
    info!("Notifying remote closing. conv={}", conv);
    let frame = protocol::encode(conv, Command::Close, &[]);
    submit_frame(session, &frame, 0);
}

pub(crate) fn submit_frame<F, S>(session: &mut Session<F, S>, frame: &[u8], payload: usize)
where
    F: TransportFactory,
    S: LocalSocket,
{
    match session.channel.submit(frame) {
        Ok(()) => session.stats.frame_sent(payload),
        Err(e) => warn!("Failed to submit frame of {} bytes: {}", frame.len(), e),
    }
}
