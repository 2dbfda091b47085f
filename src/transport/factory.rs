// 包传输工厂 - 根据配置创建传输实例

use super::UdpPacketTransport;
use crate::config::{ClientConfig, ServerConfig};
use anyhow::{Context, Result};
use std::net::SocketAddr;

/// 创建发起方的包传输（连接到服务器）
pub async fn create_transport_client(config: &ClientConfig) -> Result<UdpPacketTransport> {
    let server = resolve(&config.server_addr, config.server_port).await?;
    UdpPacketTransport::connect(server)
        .with_context(|| format!("Failed to create packet transport towards {}", server))
}

/// 创建接受方的包传输（绑定监听地址）
pub async fn create_transport_server(config: &ServerConfig) -> Result<UdpPacketTransport> {
    let addr = resolve(&config.bind_addr, config.bind_port).await?;
    UdpPacketTransport::bind(addr)
        .with_context(|| format!("Failed to bind packet transport on {}", addr))
}

/// 解析 host:port，取第一个结果
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow::anyhow!("No address found for {}:{}", host, port))
}
