/// 包传输边界上的控制标签
///
/// 每个经由包传输收发的数据包都以 8 字节 ASCII 标签开头，
/// 用于区分心跳、KCP 数据与重建 KCP 的通知。

/// 标签长度
pub const TAG_LEN: usize = 8;

/// 心跳（无负载）
pub const HEART_BEAT: &[u8; TAG_LEN] = b"HEART_BT";

/// KCP 数据段
pub const PUSH_DATA: &[u8; TAG_LEN] = b"PUSH_DAT";

/// 通知对端重建 KCP 会话（无负载）
pub const INIT_KCP: &[u8; TAG_LEN] = b"INIT_KCP";

/// 包标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketTag {
    HeartBeat,
    PushData,
    InitKcp,
}

impl PacketTag {
    /// 标签字节
    pub fn as_bytes(self) -> &'static [u8; TAG_LEN] {
        match self {
            PacketTag::HeartBeat => HEART_BEAT,
            PacketTag::PushData => PUSH_DATA,
            PacketTag::InitKcp => INIT_KCP,
        }
    }

    /// 解析包头标签，返回标签和剩余负载
    ///
    /// 不足 8 字节或标签未知（例如伪装层自身的控制包）时返回 `None`。
    pub fn parse(packet: &[u8]) -> Option<(PacketTag, &[u8])> {
        if packet.len() < TAG_LEN {
            return None;
        }
        let (tag, body) = packet.split_at(TAG_LEN);
        let tag = match tag {
            t if t == HEART_BEAT => PacketTag::HeartBeat,
            t if t == PUSH_DATA => PacketTag::PushData,
            t if t == INIT_KCP => PacketTag::InitKcp,
            _ => return None,
        };
        Some((tag, body))
    }

    /// 构造带标签的数据包
    pub fn wrap(self, body: &[u8]) -> Vec<u8> {
        let mut packet = Vec::with_capacity(TAG_LEN + body.len());
        packet.extend_from_slice(self.as_bytes());
        packet.extend_from_slice(body);
        packet
    }
}

impl std::fmt::Display for PacketTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 与线上字节一致
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}
