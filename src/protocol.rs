/// 可靠通道上的分片帧编解码
///
/// 每个帧由固定 12 字节头部和 `length` 字节负载组成，所有整数均为大端序：
///
/// ```text
/// 0               4               8               12
/// +---------------+---------------+---------------+
/// |  conv (u32)   | command (u32) | length (u32)  |
/// +---------------+---------------+---------------+
/// | payload (length bytes)                        |
/// +-----------------------------------------------+
/// ```
///
/// 本模块无状态、无副作用，不负责拆分或合并帧。
use bytes::{BufMut, BytesMut};

/// 帧头部长度
pub const HEADER_SIZE: usize = 12;

/// 帧命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// 保活探测，无负载
    Nop,
    /// 通知对端建立新连接
    Connect,
    /// 连接数据
    Push,
    /// 通知对端关闭连接
    Close,
    /// 未知命令（仍按 length 消费）
    Unknown(u32),
}

impl Command {
    /// 从线上数值解析
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Command::Nop,
            1 => Command::Connect,
            2 => Command::Push,
            3 => Command::Close,
            other => Command::Unknown(other),
        }
    }

    /// 转换为线上数值
    pub fn as_u32(self) -> u32 {
        match self {
            Command::Nop => 0,
            Command::Connect => 1,
            Command::Push => 2,
            Command::Close => 3,
            Command::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Nop => write!(f, "NOP"),
            Command::Connect => write!(f, "CONNECT"),
            Command::Push => write!(f, "PUSH"),
            Command::Close => write!(f, "CLOSE"),
            Command::Unknown(v) => write!(f, "UNKNOWN({})", v),
        }
    }
}

/// 帧头部
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub conv: u32,
    pub command: Command,
    pub length: u32,
}

/// 编码一个完整帧（头部 + 负载）
pub fn encode(conv: u32, command: Command, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_into(&mut buf, conv, command, payload);
    buf
}

/// 将帧追加到已有缓冲区
pub fn encode_into(buf: &mut BytesMut, conv: u32, command: Command, payload: &[u8]) {
    buf.reserve(HEADER_SIZE + payload.len());
    buf.put_u32(conv);
    buf.put_u32(command.as_u32());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
}

/// 尝试从缓冲区头部解析一个完整帧
///
/// 返回 `(头部, 负载视图, 消费字节数)`；数据不足一个完整帧时返回 `None`。
pub fn try_decode(buf: &[u8]) -> Option<(FragmentHeader, &[u8], usize)> {
    if buf.len() < HEADER_SIZE {
        return None;
    }

    let conv = read_u32(&buf[0..4]);
    let command = Command::from_u32(read_u32(&buf[4..8]));
    let length = read_u32(&buf[8..12]);

    let total = HEADER_SIZE.checked_add(length as usize)?;
    if buf.len() < total {
        return None;
    }

    let header = FragmentHeader {
        conv,
        command,
        length,
    };
    Some((header, &buf[HEADER_SIZE..total], total))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_be_bytes(raw)
}
