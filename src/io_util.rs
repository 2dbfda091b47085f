/// 字节缓冲与非阻塞 I/O 辅助
///
/// 提供有序可增长的字节队列，用于重组缓冲和连接的待发送缓冲
use bytes::{Buf, BytesMut};
use std::io;

/// 判断 I/O 错误是否只是"暂时无法读写"
pub fn is_would_block(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// 有序字节队列
///
/// 只支持尾部追加和头部消费，剩余字节始终保持原有顺序。
///
/// # 示例
/// ```rust
/// use kcp_tunnel::io_util::ByteQueue;
///
/// let mut queue = ByteQueue::with_capacity(16);
/// queue.extend(b"Hello, ");
/// queue.extend(b"World!");
/// queue.drain_front(7);
/// assert_eq!(queue.as_slice(), b"World!");
/// ```
#[derive(Debug, Default)]
pub struct ByteQueue {
    inner: BytesMut,
}

impl ByteQueue {
    /// 创建指定容量的队列
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// 在尾部追加数据
    pub fn extend(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// 移除头部 `n` 个字节（超过长度时清空）
    pub fn drain_front(&mut self, n: usize) {
        let n = n.min(self.inner.len());
        self.inner.advance(n);
    }

    /// 获取数据切片
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// 清空队列（释放内存）
    pub fn clear(&mut self) {
        self.inner = BytesMut::new();
    }

    /// 获取当前长度
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// 检查是否为空
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&[u8]> for ByteQueue {
    fn from(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }
}

impl AsRef<[u8]> for ByteQueue {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_queue_basic() {
        let mut queue = ByteQueue::with_capacity(16);
        assert_eq!(queue.len(), 0);
        assert!(queue.is_empty());

        queue.extend(b"Hello");
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.as_slice(), b"Hello");

        queue.extend(b"!");
        assert_eq!(queue.as_slice(), b"Hello!");
    }

    #[test]
    fn test_byte_queue_drain_front_preserves_order() {
        let mut queue = ByteQueue::from(&b"abcdef"[..]);
        queue.drain_front(2);
        assert_eq!(queue.as_slice(), b"cdef");
        queue.extend(b"gh");
        queue.drain_front(3);
        assert_eq!(queue.as_slice(), b"fgh");
    }

    #[test]
    fn test_byte_queue_drain_past_end() {
        let mut queue = ByteQueue::from(&b"abc"[..]);
        queue.drain_front(10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_byte_queue_clear() {
        let mut queue = ByteQueue::from(&b"Test"[..]);
        queue.clear();
        assert!(queue.is_empty());
        queue.extend(b"x");
        assert_eq!(queue.as_slice(), b"x");
    }

    #[test]
    fn test_is_would_block() {
        assert!(is_would_block(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(is_would_block(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!is_would_block(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
    }
}
