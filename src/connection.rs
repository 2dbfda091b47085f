/// 连接表
///
/// 以 conv 为下标的定长槽位数组，每个槽位保存一个本地连接的套接字、
/// 待发送缓冲和延迟关闭标记。所有状态只在事件循环线程内访问。
use crate::error::{Result, TunnelError};
use crate::io_util::{is_would_block, ByteQueue};
use std::io;
use tracing::{debug, info};

/// 本地流套接字（非阻塞）
pub trait LocalSocket {
    /// 非阻塞读取，无数据时返回 `WouldBlock`，对端关闭时返回 `Ok(0)`
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 非阻塞写入，返回实际写入的字节数
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// 开启/停止可读事件订阅
    fn set_read_interest(&mut self, enabled: bool);

    /// 开启/停止可写事件订阅
    fn set_write_interest(&mut self, enabled: bool);

    /// 关闭套接字并停止所有订阅
    fn close(&mut self);
}

/// 接受方为新 conv 打开本地连接
pub trait Connector<S: LocalSocket> {
    fn connect(&mut self, conv: u32) -> io::Result<S>;
}

/// 单个槽位
#[derive(Debug)]
pub struct ConnectionEntry<S> {
    socket: Option<S>,
    pending_send: ByteQueue,
    pending_close: bool,
}

impl<S> Default for ConnectionEntry<S> {
    fn default() -> Self {
        Self {
            socket: None,
            pending_send: ByteQueue::default(),
            pending_close: false,
        }
    }
}

impl<S: LocalSocket> ConnectionEntry<S> {
    pub fn in_use(&self) -> bool {
        self.socket.is_some()
    }

    pub fn pending_send(&self) -> &[u8] {
        self.pending_send.as_slice()
    }

    pub fn pending_close(&self) -> bool {
        self.pending_close
    }

    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    fn teardown(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.set_read_interest(false);
            socket.set_write_interest(false);
            socket.close();
        }
        self.pending_send.clear();
        self.pending_close = false;
    }
}

/// `push` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 全部写出
    Written,
    /// 部分或全部进入待发送缓冲
    Queued { backlog: usize },
}

/// `close` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// 待发送缓冲非空，排空后再关闭
    Deferred,
    NotInUse,
}

/// `flush_writable` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 缓冲已清空
    Drained,
    /// 缓冲清空并执行了延迟关闭
    Closed,
    /// 仍有剩余
    Partial { remaining: usize },
    NotInUse,
}

pub struct ConnectionTable<S> {
    entries: Vec<ConnectionEntry<S>>,
}

impl<S: LocalSocket> ConnectionTable<S> {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, ConnectionEntry::default);
        Self { entries }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, conv: u32) -> Option<&ConnectionEntry<S>> {
        self.entries.get(conv as usize)
    }

    pub fn is_in_use(&self, conv: u32) -> bool {
        self.get(conv).map(|e| e.in_use()).unwrap_or(false)
    }

    /// 正在使用的 conv 数量
    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.in_use()).count()
    }

    /// 分配最小的空闲 conv（0 保留给 NOP）
    pub fn allocate(&self) -> Option<u32> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, e)| !e.in_use())
            .map(|(i, _)| i as u32)
    }

    fn entry_mut(&mut self, conv: u32) -> Result<&mut ConnectionEntry<S>> {
        let capacity = self.entries.len();
        self.entries
            .get_mut(conv as usize)
            .ok_or(TunnelError::ConvOutOfRange { conv, capacity })
    }

    fn in_use_entry_mut(&mut self, conv: u32) -> Result<&mut ConnectionEntry<S>> {
        let entry = self.entry_mut(conv)?;
        if !entry.in_use() {
            return Err(TunnelError::NotInUse { conv });
        }
        Ok(entry)
    }

    /// 把已接受的本地连接放入空闲槽位，同时订阅可读事件
    pub fn attach(&mut self, conv: u32, mut socket: S) -> Result<()> {
        let entry = self.entry_mut(conv)?;
        if entry.in_use() {
            return Err(TunnelError::AlreadyInUse { conv });
        }
        socket.set_read_interest(true);
        entry.socket = Some(socket);
        entry.pending_send.clear();
        entry.pending_close = false;
        Ok(())
    }

    /// 接受方为 conv 打开本地连接
    ///
    /// 槽位已被占用时先强制关闭旧连接，以远端为准。
    pub fn connect<C>(&mut self, conv: u32, connector: &mut C) -> Result<()>
    where
        C: Connector<S> + ?Sized,
    {
        let entry = self.entry_mut(conv)?;
        if entry.in_use() {
            info!("conv {} already in use. Closing", conv);
            entry.teardown();
        }

        let mut socket = connector
            .connect(conv)
            .map_err(|e| TunnelError::connection_failed(conv, e))?;
        socket.set_read_interest(true);
        socket.set_write_interest(true);
        entry.socket = Some(socket);
        entry.pending_send.clear();
        entry.pending_close = false;
        Ok(())
    }

    /// 从本地连接读取数据
    pub fn read(&mut self, conv: u32, buf: &mut [u8]) -> Result<usize> {
        let entry = self.in_use_entry_mut(conv)?;
        let socket = entry
            .socket
            .as_mut()
            .ok_or(TunnelError::NotInUse { conv })?;
        Ok(socket.try_read(buf)?)
    }

    /// 把负载写入本地连接
    ///
    /// 已有积压时直接排队以保持字节顺序；部分写入时剩余部分进入
    /// 待发送缓冲并订阅可写事件。硬错误以 `Err` 返回，由调用方关闭。
    pub fn push(&mut self, conv: u32, payload: &[u8]) -> Result<PushOutcome> {
        let entry = self.in_use_entry_mut(conv)?;

        let mut written = 0;
        if entry.pending_send.is_empty() {
            if let Some(socket) = entry.socket.as_mut() {
                written = match socket.try_write(payload) {
                    Ok(n) => n,
                    Err(e) if is_would_block(&e) => 0,
                    Err(e) => return Err(e.into()),
                };
            }
        }

        if written == payload.len() {
            return Ok(PushOutcome::Written);
        }

        entry.pending_send.extend(&payload[written..]);
        if let Some(socket) = entry.socket.as_mut() {
            socket.set_write_interest(true);
        }
        Ok(PushOutcome::Queued {
            backlog: entry.pending_send.len(),
        })
    }

    /// 关闭 conv；待发送缓冲非空时推迟到排空之后
    pub fn close(&mut self, conv: u32) -> CloseOutcome {
        let Ok(entry) = self.entry_mut(conv) else {
            return CloseOutcome::NotInUse;
        };
        if !entry.in_use() {
            return CloseOutcome::NotInUse;
        }
        if entry.pending_send.is_empty() {
            info!("Closing connection. conv={}", conv);
            entry.teardown();
            CloseOutcome::Closed
        } else {
            info!("Pending close connection. conv={}", conv);
            entry.pending_close = true;
            CloseOutcome::Deferred
        }
    }

    /// 立即关闭，丢弃待发送数据
    pub fn force_close(&mut self, conv: u32) -> bool {
        match self.entry_mut(conv) {
            Ok(entry) if entry.in_use() => {
                info!("Closing connection. conv={}", conv);
                entry.teardown();
                true
            }
            _ => false,
        }
    }

    /// 本地连接可写时排空待发送缓冲
    pub fn flush_writable(&mut self, conv: u32) -> Result<FlushOutcome> {
        let entry = match self.in_use_entry_mut(conv) {
            Ok(entry) => entry,
            Err(TunnelError::NotInUse { .. }) => return Ok(FlushOutcome::NotInUse),
            Err(e) => return Err(e),
        };
        let Some(socket) = entry.socket.as_mut() else {
            return Ok(FlushOutcome::NotInUse);
        };

        if entry.pending_send.is_empty() {
            socket.set_write_interest(false);
            return Ok(FlushOutcome::Drained);
        }

        let sent = match socket.try_write(entry.pending_send.as_slice()) {
            Ok(n) => n,
            Err(e) if is_would_block(&e) => 0,
            Err(e) => return Err(e.into()),
        };

        if sent == entry.pending_send.len() {
            entry.pending_send.clear();
            socket.set_write_interest(false);
            if entry.pending_close {
                info!("Closing connection after flush. conv={}", conv);
                entry.teardown();
                return Ok(FlushOutcome::Closed);
            }
            return Ok(FlushOutcome::Drained);
        }

        entry.pending_send.drain_front(sent);
        debug!(
            "Partially flushed conv={}: sent={} remaining={}",
            conv,
            sent,
            entry.pending_send.len()
        );
        Ok(FlushOutcome::Partial {
            remaining: entry.pending_send.len(),
        })
    }

    /// 是否有任一连接的积压超过上限
    pub fn any_backlog_exceeds(&self, limit: usize) -> bool {
        self.entries
            .iter()
            .any(|e| e.in_use() && e.pending_send.len() > limit)
    }

    /// 对所有使用中的连接开启/停止可读订阅
    pub fn set_read_interest_all(&mut self, enabled: bool) {
        for entry in self.entries.iter_mut() {
            if let Some(socket) = entry.socket.as_mut() {
                socket.set_read_interest(enabled);
            }
        }
    }

    /// 关闭所有连接，返回被关闭的 conv
    pub fn close_all(&mut self) -> Vec<u32> {
        let mut closed = Vec::new();
        for (conv, entry) in self.entries.iter_mut().enumerate() {
            if entry.in_use() {
                entry.teardown();
                closed.push(conv as u32);
            }
        }
        closed
    }
}
